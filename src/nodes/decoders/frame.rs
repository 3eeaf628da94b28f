//! Packet framing: header, data objects, CRC and EOP
//!
//! After the start-of-packet the packet is a run of data symbols read with a
//! single forward cursor: a 16-bit header (4 symbols), `object_count` 32-bit
//! data objects (8 symbols each), a 32-bit CRC (8 symbols) and the EOP
//! K-code. Each 16-bit group arrives low nibble first.
//!
//! Running out of bits is not an error. The group takes the value
//! [`TRUNCATED_SHORT`], a `TruncatedFrame` warning is recorded once, and
//! parsing carries on so every group still gets a value.

use std::fmt;

use super::crc::frame_crc;
use super::report::{Anomaly, Diagnostics};
use super::symbols::{Symbol, SyncMatch, StartOfPacket, SYMBOL_BITS, symbol_at};
use super::types::BitRecord;
use tracing::trace;

/// Value of a 16-bit group with missing bits
pub const TRUNCATED_SHORT: u16 = 0x0BAD;

/// Value of a 32-bit group with no bits at all
pub const TRUNCATED_WORD: u32 = 0x0BAD_0BAD;

/// Message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(pub u16);

impl Header {
    pub fn raw(self) -> u16 {
        self.0
    }

    /// 5-bit message type, control or data depending on `object_count`
    pub fn message_type(self) -> u8 {
        (self.0 & 0x1F) as u8
    }

    /// Port data role: DFP when set, UFP when clear. Reserved in cable packets.
    pub fn data_role(self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// Specification revision, 1-based
    pub fn spec_revision(self) -> u8 {
        ((self.0 >> 6) & 0x3) as u8 + 1
    }

    /// Port power role: source when set. Cable plug flag in cable packets.
    pub fn power_role(self) -> bool {
        self.0 & (1 << 8) != 0
    }

    pub fn message_id(self) -> u8 {
        ((self.0 >> 9) & 0x7) as u8
    }

    /// Number of 32-bit data objects
    pub fn object_count(self) -> usize {
        usize::from((self.0 >> 12) & 0x7)
    }

    pub fn is_extended(self) -> bool {
        self.0 & (1 << 15) != 0
    }

    pub fn is_control(self) -> bool {
        self.object_count() == 0
    }

    /// `SRC`, `SNK/DFP`, ... for port packets; `CABLE`/`PORT` for cable ones.
    /// The data role is shown only when it differs from the usual pairing.
    pub fn role_text(self, sop: StartOfPacket) -> String {
        if sop.is_cable() {
            return if self.power_role() { "CABLE" } else { "PORT" }.to_string();
        }
        let power = if self.power_role() { "SRC" } else { "SNK" };
        if self.power_role() == self.data_role() {
            power.to_string()
        } else {
            let data = if self.data_role() { "DFP" } else { "UFP" };
            format!("{}/{}", power, data)
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "H:{:04x}", self.0)
    }
}

/// A decoded packet. Values are kept even when `valid` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sop: StartOfPacket,
    pub header: Header,
    pub words: Vec<u32>,
    /// CRC as received
    pub checksum: u32,
    /// CRC computed over header and data objects; `None` if the received
    /// CRC was cut off
    pub expected_checksum: Option<u32>,
    pub eop_present: bool,
    pub truncated: bool,
    /// No anomaly anywhere in the window
    pub valid: bool,
}

impl Frame {
    pub fn checksum_ok(&self) -> bool {
        self.expected_checksum == Some(self.checksum)
    }
}

/// A symbol and the samples it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpan {
    pub symbol: Symbol,
    pub start: u64,
    pub end: u64,
}

/// Symbols read for one header, data object or CRC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub value: u32,
    pub start: u64,
    pub end: u64,
    pub symbols: Vec<SymbolSpan>,
    pub truncated: bool,
}

impl Group {
    fn merge(lo: Group, hi: Group) -> Group {
        let value = lo.value | (hi.value << 16);
        let end = if hi.symbols.is_empty() { lo.end } else { hi.end };
        let mut symbols = lo.symbols;
        symbols.extend(hi.symbols);
        Group {
            value,
            start: lo.start,
            end,
            symbols,
            truncated: lo.truncated || hi.truncated,
        }
    }
}

/// Where each part of the packet sits in the capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub sop_start: u64,
    pub sop_end: u64,
    pub header: Group,
    pub words: Vec<Group>,
    pub checksum: Group,
    pub eop: Option<SymbolSpan>,
}

impl FrameLayout {
    pub fn end(&self) -> u64 {
        self.eop.map_or(self.checksum.end, |eop| eop.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub frame: Frame,
    pub layout: FrameLayout,
}

/// Reads the packet following a start-of-packet.
///
/// The steps run in wire order: [`read_header`](Self::read_header),
/// [`read_data_objects`](Self::read_data_objects),
/// [`read_checksum`](Self::read_checksum), [`read_eop`](Self::read_eop),
/// then [`finish`](Self::finish). [`parse`](Self::parse) runs them all.
pub struct FrameParser<'a> {
    bits: &'a [BitRecord],
    sync: SyncMatch,
    cursor: usize,
    truncated: bool,
}

impl<'a> FrameParser<'a> {
    /// Start reading right after the ordered set
    pub fn new(bits: &'a [BitRecord], sync: SyncMatch) -> Self {
        Self {
            bits,
            sync,
            cursor: sync.end(),
            truncated: false,
        }
    }

    /// Current bit index
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn parse(mut self, diagnostics: &mut Diagnostics) -> ParsedFrame {
        let header = self.read_header(diagnostics);
        let words = self.read_data_objects(&header, diagnostics);
        let checksum = self.read_checksum(&header, &words, diagnostics);
        let eop = self.read_eop(diagnostics);
        self.finish(header, words, checksum, eop)
    }

    pub fn read_header(&mut self, diagnostics: &mut Diagnostics) -> Group {
        let group = self.read_short("header", diagnostics);
        let header = Header(group.value as u16);
        trace!("{} with {} data objects", header, header.object_count());
        group
    }

    /// As many data objects as the header declares
    pub fn read_data_objects(&mut self, header: &Group, diagnostics: &mut Diagnostics) -> Vec<Group> {
        let count = Header(header.value as u16).object_count();
        (0..count)
            .map(|i| self.read_word(&format!("data object {}", i + 1), diagnostics))
            .collect()
    }

    /// Read the CRC and compare it with the one computed over header and
    /// data objects. Returns the computed CRC, or `None` when the received
    /// one is incomplete.
    pub fn read_checksum(
        &mut self,
        header: &Group,
        words: &[Group],
        diagnostics: &mut Diagnostics,
    ) -> (Group, Option<u32>) {
        let group = self.read_word("CRC", diagnostics);
        if group.truncated {
            return (group, None);
        }
        let values: Vec<u32> = words.iter().map(|w| w.value).collect();
        let expected = frame_crc(header.value as u16, &values);
        if expected != group.value {
            diagnostics.push(
                group.start,
                group.end,
                Anomaly::ChecksumMismatch {
                    expected,
                    actual: group.value,
                },
            );
        }
        (group, Some(expected))
    }

    pub fn finish(
        self,
        header: Group,
        words: Vec<Group>,
        (checksum, expected_checksum): (Group, Option<u32>),
        eop: Option<SymbolSpan>,
    ) -> ParsedFrame {
        let (sop_start, sop_end) = self.span(self.sync.offset, self.sync.end());
        let frame = Frame {
            sop: self.sync.sop,
            header: Header(header.value as u16),
            words: words.iter().map(|w| w.value).collect(),
            checksum: checksum.value,
            expected_checksum,
            eop_present: eop.is_some(),
            truncated: self.truncated,
            valid: false,
        };
        let layout = FrameLayout {
            sop_start,
            sop_end,
            header,
            words,
            checksum,
            eop,
        };
        ParsedFrame { frame, layout }
    }

    /// Sample range of bits `[from, to)`, clamped to what was captured
    fn span(&self, from: usize, to: usize) -> (u64, u64) {
        let tail = self.bits.last().map_or(0, |b| b.end);
        let start = self.bits.get(from).map_or(tail, |b| b.start);
        let end = to
            .checked_sub(1)
            .and_then(|last| self.bits.get(last))
            .map_or(tail, |b| b.end);
        (start, end.max(start))
    }

    /// Four data symbols, low nibble first
    fn read_short(&mut self, what: &str, diagnostics: &mut Diagnostics) -> Group {
        let (start, _) = self.span(self.cursor, self.cursor);
        let mut value = 0u32;
        let mut symbols = Vec::with_capacity(4);
        let mut truncated = false;

        for n in 0..4 {
            let Some(symbol) = symbol_at(self.bits, self.cursor) else {
                truncated = true;
                break;
            };
            let (sym_start, sym_end) = self.span(self.cursor, self.cursor + SYMBOL_BITS);
            match symbol.nibble() {
                Some(nibble) => value |= u32::from(nibble) << (4 * n),
                None => diagnostics.push(
                    sym_start,
                    sym_end,
                    Anomaly::BadSymbol {
                        symbol,
                        group: what.to_string(),
                    },
                ),
            }
            symbols.push(SymbolSpan {
                symbol,
                start: sym_start,
                end: sym_end,
            });
            self.cursor += SYMBOL_BITS;
        }

        let end = symbols.last().map_or(start, |s| s.end);
        if truncated {
            value = u32::from(TRUNCATED_SHORT);
            if !self.truncated {
                self.truncated = true;
                diagnostics.push(
                    start,
                    end,
                    Anomaly::TruncatedFrame {
                        group: what.to_string(),
                    },
                );
            }
        }

        Group {
            value,
            start,
            end,
            symbols,
            truncated,
        }
    }

    fn read_word(&mut self, what: &str, diagnostics: &mut Diagnostics) -> Group {
        let lo = self.read_short(what, diagnostics);
        let hi = self.read_short(what, diagnostics);
        Group::merge(lo, hi)
    }

    /// The EOP K-code, if it is where the packet should end
    pub fn read_eop(&mut self, diagnostics: &mut Diagnostics) -> Option<SymbolSpan> {
        let found = symbol_at(self.bits, self.cursor);
        let (start, end) = self.span(self.cursor, self.cursor + SYMBOL_BITS);
        match found {
            Some(Symbol::Eop) => {
                self.cursor += SYMBOL_BITS;
                Some(SymbolSpan {
                    symbol: Symbol::Eop,
                    start,
                    end,
                })
            }
            // Cut-off packets already carry a truncation warning
            _ if self.truncated => None,
            found => {
                diagnostics.push(start, end, Anomaly::MissingTerminator { found });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::symbols::SymbolSynchronizer;
    use crate::nodes::decoders::synth::PacketBuilder;

    fn records(values: &[bool]) -> Vec<BitRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| BitRecord::new(v, i as u64 * 40, i as u64 * 40 + 40))
            .collect()
    }

    fn parse(bits: &[bool]) -> (ParsedFrame, Diagnostics) {
        let bits = records(bits);
        let sync = SymbolSynchronizer::new(3).locate(&bits).unwrap();
        let mut diagnostics = Diagnostics::default();
        let parsed = FrameParser::new(&bits, sync).parse(&mut diagnostics);
        (parsed, diagnostics)
    }

    #[test]
    fn test_header_fields() {
        let header = Header(0x0563);
        assert_eq!(header.message_type(), 3);
        assert!(header.data_role());
        assert_eq!(header.spec_revision(), 2);
        assert!(header.power_role());
        assert_eq!(header.message_id(), 2);
        assert_eq!(header.object_count(), 0);
        assert!(!header.is_extended());
        assert_eq!(header.role_text(StartOfPacket::Sop), "SRC");
        assert_eq!(Header(0x0543).role_text(StartOfPacket::Sop), "SRC/UFP");
        assert_eq!(Header(0x0023).role_text(StartOfPacket::Sop), "SNK/DFP");
        assert_eq!(Header(0x0143).role_text(StartOfPacket::SopPrime), "CABLE");
        assert_eq!(header.to_string(), "H:0563");
    }

    #[test]
    fn test_parses_control_packet() {
        let bits = PacketBuilder::new(0x0563).bits();
        let (parsed, diagnostics) = parse(&bits);
        assert!(diagnostics.is_empty());
        assert_eq!(parsed.frame.header, Header(0x0563));
        assert!(parsed.frame.words.is_empty());
        assert!(parsed.frame.checksum_ok());
        assert!(parsed.frame.eop_present);
        assert!(!parsed.frame.truncated);
        assert_eq!(parsed.layout.header.symbols.len(), 4);
        assert_eq!(parsed.layout.checksum.symbols.len(), 8);
    }

    #[test]
    fn test_parses_data_objects() {
        let bits = PacketBuilder::new(0x2161)
            .words(&[0x0001_912C, 0x9901_912C])
            .bits();
        let (parsed, diagnostics) = parse(&bits);
        assert!(diagnostics.is_empty());
        assert_eq!(parsed.frame.words, vec![0x0001_912C, 0x9901_912C]);
        assert_eq!(parsed.layout.words.len(), 2);
        assert!(parsed.layout.words[0].end <= parsed.layout.words[1].start);
    }

    #[test]
    fn test_checksum_mismatch_keeps_values() {
        let bits = PacketBuilder::new(0x1161)
            .words(&[0x0001_912C])
            .checksum(0x1234_5678)
            .bits();
        let (parsed, diagnostics) = parse(&bits);
        assert_eq!(parsed.frame.words, vec![0x0001_912C]);
        assert_eq!(parsed.frame.checksum, 0x1234_5678);
        assert!(!parsed.frame.checksum_ok());
        assert!(matches!(
            diagnostics.iter().next().map(|d| &d.anomaly),
            Some(Anomaly::ChecksumMismatch { actual: 0x1234_5678, .. })
        ));
    }

    #[test]
    fn test_truncated_payload_gets_sentinel() {
        let mut bits = PacketBuilder::new(0x2161)
            .words(&[0x0001_912C, 0x9901_912C])
            .bits();
        // Keep preamble, SOP, header and the first data object
        bits.truncate(64 + 20 + 20 + 40);
        let (parsed, diagnostics) = parse(&bits);

        assert_eq!(parsed.frame.words, vec![0x0001_912C, TRUNCATED_WORD]);
        assert_eq!(parsed.frame.checksum, TRUNCATED_WORD);
        assert!(parsed.frame.truncated);
        assert_eq!(parsed.frame.expected_checksum, None);
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics.iter().next().unwrap().anomaly,
            Anomaly::TruncatedFrame { group } if group == "data object 2"
        ));
    }

    #[test]
    fn test_missing_eop() {
        let bits = PacketBuilder::new(0x0563).eop(false).bits();
        let (parsed, diagnostics) = parse(&bits);
        assert!(!parsed.frame.eop_present);
        assert!(matches!(
            &diagnostics.iter().next().unwrap().anomaly,
            Anomaly::MissingTerminator { found: None }
        ));
    }

    #[test]
    fn test_bad_symbol_reads_as_zero() {
        let mut bits = PacketBuilder::new(0x0563).bits();
        // First header symbol becomes code 0x00
        for bit in &mut bits[84..89] {
            *bit = false;
        }
        let (parsed, diagnostics) = parse(&bits);
        assert_eq!(parsed.frame.header, Header(0x0560));
        assert!(
            diagnostics
                .iter()
                .any(|d| matches!(d.anomaly, Anomaly::BadSymbol { symbol: Symbol::Error, .. }))
        );
    }
}
