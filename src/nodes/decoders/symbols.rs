//! 4b5b symbols and start-of-packet synchronization
//!
//! Five consecutive bits (first bit least significant) form one symbol. A
//! packet starts with four K-code symbols, the ordered set that names the
//! recipient (SOP, SOP', ...) or signals a reset. The ordered set is found by
//! sliding over the window one bit at a time; a match needs only
//! `min_matches` of its four symbols so a single corrupted K-code does not
//! lose the packet.

use std::fmt;

use super::types::BitRecord;
use tracing::trace;

/// Bits per 4b5b symbol
pub const SYMBOL_BITS: usize = 5;

/// Symbols in a start-of-packet ordered set
pub const SOP_SYMBOLS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Data nibble 0x0..=0xF
    Data(u8),
    Sync1,
    Sync2,
    Sync3,
    Rst1,
    Rst2,
    Eop,
    /// Code with no assigned meaning
    Error,
}

use Symbol::*;

const SYMBOL_TABLE: [Symbol; 32] = [
    Error,    // 0x00
    Error,    // 0x01
    Error,    // 0x02
    Error,    // 0x03
    Error,    // 0x04
    Error,    // 0x05
    Sync3,    // 0x06
    Rst1,     // 0x07
    Error,    // 0x08
    Data(0x1), // 0x09
    Data(0x4), // 0x0A
    Data(0x5), // 0x0B
    Error,    // 0x0C
    Eop,      // 0x0D
    Data(0x6), // 0x0E
    Data(0x7), // 0x0F
    Error,    // 0x10
    Sync2,    // 0x11
    Data(0x8), // 0x12
    Data(0x9), // 0x13
    Data(0x2), // 0x14
    Data(0x3), // 0x15
    Data(0xA), // 0x16
    Data(0xB), // 0x17
    Sync1,    // 0x18
    Rst2,     // 0x19
    Data(0xC), // 0x1A
    Data(0xD), // 0x1B
    Data(0xE), // 0x1C
    Data(0xF), // 0x1D
    Data(0x0), // 0x1E
    Error,    // 0x1F
];

const DATA_CODES: [u8; 16] = [
    0x1E, 0x09, 0x14, 0x15, 0x0A, 0x0B, 0x0E, 0x0F, 0x12, 0x13, 0x16, 0x17, 0x1A, 0x1B, 0x1C, 0x1D,
];

impl Symbol {
    pub fn from_code(code: u8) -> Symbol {
        SYMBOL_TABLE[usize::from(code & 0x1F)]
    }

    /// 5-bit line code; `None` for `Error`, which has many codes
    pub fn code(self) -> Option<u8> {
        match self {
            Data(nibble) => DATA_CODES.get(usize::from(nibble)).copied(),
            Sync1 => Some(0x18),
            Sync2 => Some(0x11),
            Sync3 => Some(0x06),
            Rst1 => Some(0x07),
            Rst2 => Some(0x19),
            Eop => Some(0x0D),
            Error => None,
        }
    }

    pub fn nibble(self) -> Option<u8> {
        match self {
            Data(nibble) => Some(nibble),
            _ => None,
        }
    }

    pub fn is_data(self) -> bool {
        matches!(self, Data(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Data(nibble) => write!(f, "{:X}", nibble),
            Sync1 => f.write_str("S1"),
            Sync2 => f.write_str("S2"),
            Sync3 => f.write_str("S3"),
            Rst1 => f.write_str("RST1"),
            Rst2 => f.write_str("RST2"),
            Eop => f.write_str("EOP"),
            Error => f.write_str("ERROR"),
        }
    }
}

/// Decode the symbol starting at bit `index`, if five bits remain.
pub fn symbol_at(bits: &[BitRecord], index: usize) -> Option<Symbol> {
    let group = bits.get(index..index.checked_add(SYMBOL_BITS)?)?;
    let code = group
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, bit)| acc | (u8::from(bit.value) << i));
    Some(Symbol::from_code(code))
}

/// Start-of-packet ordered sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartOfPacket {
    Sop,
    SopPrime,
    SopDoublePrime,
    SopPrimeDebug,
    SopDoublePrimeDebug,
    CableReset,
    HardReset,
}

impl StartOfPacket {
    /// Search order; earlier entries win ties
    pub const ALL: [StartOfPacket; 7] = [
        StartOfPacket::Sop,
        StartOfPacket::SopPrime,
        StartOfPacket::SopDoublePrime,
        StartOfPacket::SopPrimeDebug,
        StartOfPacket::SopDoublePrimeDebug,
        StartOfPacket::CableReset,
        StartOfPacket::HardReset,
    ];

    pub fn sequence(self) -> [Symbol; SOP_SYMBOLS] {
        match self {
            StartOfPacket::Sop => [Sync1, Sync1, Sync1, Sync2],
            StartOfPacket::SopPrime => [Sync1, Sync1, Sync3, Sync3],
            StartOfPacket::SopDoublePrime => [Sync1, Sync3, Sync1, Sync3],
            StartOfPacket::SopPrimeDebug => [Sync1, Rst2, Rst2, Sync3],
            StartOfPacket::SopDoublePrimeDebug => [Sync1, Rst2, Sync3, Sync2],
            StartOfPacket::CableReset => [Rst1, Sync1, Rst1, Sync3],
            StartOfPacket::HardReset => [Rst1, Rst1, Rst1, Rst2],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StartOfPacket::Sop => "SOP",
            StartOfPacket::SopPrime => "SOP'",
            StartOfPacket::SopDoublePrime => "SOP''",
            StartOfPacket::SopPrimeDebug => "SOP'_Debug",
            StartOfPacket::SopDoublePrimeDebug => "SOP''_Debug",
            StartOfPacket::CableReset => "Cable Reset",
            StartOfPacket::HardReset => "Hard Reset",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            StartOfPacket::Sop => "S",
            StartOfPacket::SopPrime => "S'",
            StartOfPacket::SopDoublePrime => "S''",
            StartOfPacket::SopPrimeDebug => "S'D",
            StartOfPacket::SopDoublePrimeDebug => "S''D",
            StartOfPacket::CableReset => "CRST",
            StartOfPacket::HardReset => "HRST",
        }
    }

    pub fn is_reset(self) -> bool {
        matches!(self, StartOfPacket::CableReset | StartOfPacket::HardReset)
    }

    /// Packets addressed to a cable plug rather than the port partner
    pub fn is_cable(self) -> bool {
        !matches!(
            self,
            StartOfPacket::Sop | StartOfPacket::CableReset | StartOfPacket::HardReset
        )
    }

    /// Positions agreeing with this ordered set
    pub fn matches(self, candidate: &[Symbol; SOP_SYMBOLS]) -> usize {
        self.sequence()
            .iter()
            .zip(candidate)
            .filter(|(expected, actual)| expected == actual)
            .count()
    }
}

impl fmt::Display for StartOfPacket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A located ordered set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMatch {
    /// Bit index of the first symbol
    pub offset: usize,
    pub sop: StartOfPacket,
    /// Symbols agreeing with the ordered set, out of 4
    pub matches: usize,
    pub symbols: [Symbol; SOP_SYMBOLS],
}

impl SyncMatch {
    pub fn is_exact(&self) -> bool {
        self.matches == SOP_SYMBOLS
    }

    /// Bit index just past the ordered set
    pub fn end(&self) -> usize {
        self.offset + SOP_SYMBOLS * SYMBOL_BITS
    }
}

/// Finds the first start-of-packet in a window of bits
#[derive(Debug, Clone, Copy)]
pub struct SymbolSynchronizer {
    min_matches: usize,
}

impl SymbolSynchronizer {
    pub fn new(min_matches: usize) -> Self {
        Self {
            min_matches: min_matches.clamp(1, SOP_SYMBOLS),
        }
    }

    pub fn min_matches(&self) -> usize {
        self.min_matches
    }

    /// Scan every bit offset. At the first offset where any ordered set has
    /// at least `min_matches` agreeing symbols, the best scoring one wins.
    pub fn locate(&self, bits: &[BitRecord]) -> Option<SyncMatch> {
        let span = SOP_SYMBOLS * SYMBOL_BITS;
        if bits.len() < span {
            return None;
        }

        for offset in 0..=bits.len() - span {
            let candidate = Self::candidate(bits, offset)?;
            let mut best: Option<SyncMatch> = None;
            for sop in StartOfPacket::ALL {
                let matches = sop.matches(&candidate);
                if matches >= self.min_matches && best.is_none_or(|b| matches > b.matches) {
                    best = Some(SyncMatch {
                        offset,
                        sop,
                        matches,
                        symbols: candidate,
                    });
                }
            }
            if let Some(found) = best {
                trace!(
                    "{} at bit {} ({}/{} symbols)",
                    found.sop, found.offset, found.matches, SOP_SYMBOLS
                );
                return Some(found);
            }
        }
        None
    }

    fn candidate(bits: &[BitRecord], offset: usize) -> Option<[Symbol; SOP_SYMBOLS]> {
        let mut symbols = [Error; SOP_SYMBOLS];
        for (i, slot) in symbols.iter_mut().enumerate() {
            *slot = symbol_at(bits, offset + i * SYMBOL_BITS)?;
        }
        Some(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol_bits(symbol: Symbol) -> Vec<bool> {
        let code = symbol.code().unwrap_or(0);
        (0..SYMBOL_BITS).map(|i| (code >> i) & 1 != 0).collect()
    }

    fn records(values: &[bool]) -> Vec<BitRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| BitRecord::new(v, i as u64 * 10, i as u64 * 10 + 10))
            .collect()
    }

    fn preamble(n: usize) -> Vec<bool> {
        (0..n).map(|i| i % 2 == 1).collect()
    }

    fn with_symbols(mut bits: Vec<bool>, symbols: &[Symbol]) -> Vec<bool> {
        for &s in symbols {
            bits.extend(symbol_bits(s));
        }
        bits
    }

    #[test]
    fn test_table_is_consistent() {
        let mut data = 0;
        for code in 0u8..32 {
            let symbol = Symbol::from_code(code);
            if symbol != Error {
                assert_eq!(symbol.code(), Some(code));
            }
            if symbol.is_data() {
                data += 1;
            }
        }
        assert_eq!(data, 16);
        assert_eq!(Symbol::from_code(0x1E), Data(0));
        assert_eq!(Symbol::from_code(0x00), Error);
    }

    #[test]
    fn test_symbol_at_needs_five_bits() {
        let bits = records(&symbol_bits(Sync1));
        assert_eq!(symbol_at(&bits, 0), Some(Sync1));
        assert_eq!(symbol_at(&bits, 1), None);
    }

    #[test]
    fn test_every_ordered_set_is_found_after_preamble() {
        let sync = SymbolSynchronizer::new(3);
        for sop in StartOfPacket::ALL {
            let bits = records(&with_symbols(preamble(64), &sop.sequence()));
            let found = sync.locate(&bits).unwrap();
            assert_eq!(found.offset, 64, "{}", sop);
            assert_eq!(found.sop, sop);
            assert!(found.is_exact());
            assert_eq!(found.end(), 84);
        }
    }

    #[test]
    fn test_one_corrupted_symbol_is_accepted() {
        let sync = SymbolSynchronizer::new(3);
        let bits = records(&with_symbols(preamble(64), &[Sync1, Data(0), Sync1, Sync2]));
        let found = sync.locate(&bits).unwrap();
        assert_eq!(found.sop, StartOfPacket::Sop);
        assert_eq!(found.matches, 3);
        assert!(!found.is_exact());
    }

    #[test]
    fn test_two_corrupted_symbols_are_rejected_and_scan_continues() {
        let sync = SymbolSynchronizer::new(3);
        let bits = with_symbols(preamble(64), &[Sync1, Data(0), Data(0), Sync2]);
        let bits = with_symbols(bits, &[Data(1), Data(2), Data(3), Data(4)]);
        let mut bits = bits;
        bits.extend(preamble(16));
        let bits = with_symbols(bits, &StartOfPacket::Sop.sequence());

        let found = sync.locate(&records(&bits)).unwrap();
        assert_eq!(found.offset, 120);
        assert!(found.is_exact());
    }

    #[test]
    fn test_corrupted_hard_reset() {
        let sync = SymbolSynchronizer::new(3);
        let bits = records(&with_symbols(preamble(64), &[Rst1, Data(5), Rst1, Rst2]));
        let found = sync.locate(&bits).unwrap();
        assert_eq!(found.sop, StartOfPacket::HardReset);
        assert!(found.sop.is_reset());
        assert_eq!(found.matches, 3);
    }

    #[test]
    fn test_junk_has_no_start() {
        let sync = SymbolSynchronizer::new(3);
        let junk: Vec<Symbol> = [0u8, 5, 10, 15, 7, 3, 9]
            .iter()
            .cycle()
            .take(21)
            .map(|&n| Data(n))
            .collect();
        assert!(sync.locate(&records(&with_symbols(Vec::new(), &junk))).is_none());
        assert!(sync.locate(&records(&preamble(200))).is_none());
        assert!(sync.locate(&records(&preamble(10))).is_none());
    }

    #[test]
    fn test_strict_matching() {
        let sync = SymbolSynchronizer::new(4);
        let bits = records(&with_symbols(preamble(64), &[Sync1, Data(0), Sync1, Sync2]));
        assert!(sync.locate(&bits).is_none());
    }
}
