//! Packet and BMC waveform synthesis
//!
//! Builds the bit sequence of a packet and encodes it as the edge stream a
//! logic analyzer would record, for loopback tests and demos.

use super::crc::frame_crc;
use super::symbols::{StartOfPacket, Symbol, SYMBOL_BITS};
use crate::runtime::Edge;

/// Bits in the preamble of a packet
pub const PREAMBLE_BITS: usize = 64;

/// Bit sequence of one packet: preamble, ordered set, header, data objects,
/// CRC and EOP. Reset ordered sets carry nothing after the ordered set.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    sop: StartOfPacket,
    header: Option<u16>,
    words: Vec<u32>,
    checksum: Option<u32>,
    eop: bool,
    preamble: usize,
}

impl PacketBuilder {
    pub fn new(header: u16) -> Self {
        Self {
            sop: StartOfPacket::Sop,
            header: Some(header),
            words: Vec::new(),
            checksum: None,
            eop: true,
            preamble: PREAMBLE_BITS,
        }
    }

    /// Hard Reset or Cable Reset
    pub fn reset(sop: StartOfPacket) -> Self {
        Self {
            sop,
            header: None,
            ..Self::new(0)
        }
    }

    pub fn sop(mut self, sop: StartOfPacket) -> Self {
        self.sop = sop;
        self
    }

    pub fn words(mut self, words: &[u32]) -> Self {
        self.words = words.to_vec();
        self
    }

    /// Send this CRC instead of the correct one
    pub fn checksum(mut self, checksum: u32) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn eop(mut self, eop: bool) -> Self {
        self.eop = eop;
        self
    }

    pub fn preamble(mut self, bits: usize) -> Self {
        self.preamble = bits;
        self
    }

    /// Bit index of the first header symbol
    pub fn header_offset(&self) -> usize {
        self.preamble + 4 * SYMBOL_BITS
    }

    pub fn bits(&self) -> Vec<bool> {
        let mut bits: Vec<bool> = (0..self.preamble).map(|i| i % 2 == 1).collect();
        for symbol in self.sop.sequence() {
            push_symbol(&mut bits, symbol);
        }
        let Some(header) = self.header else {
            return bits;
        };

        push_short(&mut bits, header);
        for &word in &self.words {
            push_word(&mut bits, word);
        }
        let checksum = self
            .checksum
            .unwrap_or_else(|| frame_crc(header, &self.words));
        push_word(&mut bits, checksum);
        if self.eop {
            push_symbol(&mut bits, Symbol::Eop);
        }
        bits
    }
}

fn push_symbol(bits: &mut Vec<bool>, symbol: Symbol) {
    let code = symbol.code().unwrap_or(0);
    bits.extend((0..SYMBOL_BITS).map(|i| (code >> i) & 1 != 0));
}

fn push_short(bits: &mut Vec<bool>, value: u16) {
    for n in 0..4 {
        push_symbol(bits, Symbol::Data(((value >> (4 * n)) & 0xF) as u8));
    }
}

fn push_word(bits: &mut Vec<bool>, word: u32) {
    push_short(bits, word as u16);
    push_short(bits, (word >> 16) as u16);
}

/// xorshift64 generator for jitter and randomized test traffic
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// The state must be non-zero, so the low bit is forced on
    pub fn new(seed: u64) -> Self {
        Self { state: seed | 1 }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }
}

/// Encodes bits as BMC edges.
///
/// The line starts low at sample 0 and every packet is preceded by an idle
/// stretch. A closing edge ends the last bit cell of each packet.
#[derive(Debug, Clone)]
pub struct BmcEncoder {
    half_cell: u64,
    idle: u64,
    jitter: u64,
    rng: XorShift64,
    time: u64,
    level: bool,
    edges: Vec<Edge>,
}

impl BmcEncoder {
    pub fn new(half_cell: u64) -> Self {
        Self {
            half_cell,
            idle: half_cell * 20,
            jitter: 0,
            rng: XorShift64::new(0x2545_F491_4F6C_DD1D),
            time: 0,
            level: false,
            edges: vec![Edge::new(0, false)],
        }
    }

    /// Move every edge by up to `max` samples, deterministically per `seed`
    pub fn with_jitter(mut self, max: u64, seed: u64) -> Self {
        self.jitter = max;
        self.rng = XorShift64::new(seed);
        self
    }

    /// Idle time before each packet, in samples
    pub fn with_idle(mut self, samples: u64) -> Self {
        self.idle = samples;
        self
    }

    /// Current position in samples
    pub fn time(&self) -> u64 {
        self.time
    }

    fn next_jitter(&mut self) -> i64 {
        if self.jitter == 0 {
            return 0;
        }
        let span = self.jitter * 2 + 1;
        (self.rng.next_u64() % span) as i64 - self.jitter as i64
    }

    fn toggle_at(&mut self, nominal: u64) {
        let jittered = nominal.saturating_add_signed(self.next_jitter());
        let floor = self.edges.last().map_or(0, |e| e.sample + 1);
        self.level = !self.level;
        self.edges.push(Edge::new(jittered.max(floor), self.level));
    }

    pub fn packet(&mut self, bits: &[bool]) -> &mut Self {
        self.time += self.idle;
        for &bit in bits {
            self.toggle_at(self.time);
            if bit {
                self.toggle_at(self.time + self.half_cell);
            }
            self.time += 2 * self.half_cell;
        }
        self.toggle_at(self.time);
        self
    }

    pub fn finish(self) -> Vec<Edge> {
        self.edges
    }
}
