//! Per-window diagnostics and annotation assembly
//!
//! Protocol anomalies never abort a window. They are collected as
//! [`Diagnostic`]s while the window is decoded and turned into warning
//! annotations alongside the decoded fields.

use thiserror::Error;
use tracing::trace;

use super::bmc::{CaptureWindow, DemodFault};
use super::frame::{FrameLayout, Header, ParsedFrame, SymbolSpan};
use super::payload::{DataObject, MessageType};
use super::symbols::{StartOfPacket, Symbol, SyncMatch};
use super::types::{Annotation, Category};

fn found_text(found: &Option<Symbol>) -> String {
    match found {
        Some(symbol) => symbol.to_string(),
        None => "end of capture".to_string(),
    }
}

/// Something wrong with one window. Display text is the warning label.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    #[error("Demodulation error: {fault}")]
    Demodulation { fault: DemodFault },

    #[error("No start of packet found")]
    SyncNotFound,

    #[error("Corrupted {sop}: {matches} of 4 symbols match")]
    CorruptedStart { sop: StartOfPacket, matches: usize },

    #[error("Truncated frame at {group}")]
    TruncatedFrame { group: String },

    #[error("Bad symbol {symbol} in {group}")]
    BadSymbol { symbol: Symbol, group: String },

    #[error("CRC mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Missing EOP, found {}", found_text(.found))]
    MissingTerminator { found: Option<Symbol> },
}

impl Anomaly {
    pub fn short_label(&self) -> &'static str {
        match self {
            Anomaly::Demodulation { .. } => "DEMOD",
            Anomaly::SyncNotFound => "NOSOP",
            Anomaly::CorruptedStart { .. } => "SOP?",
            Anomaly::TruncatedFrame { .. } => "TRUNC",
            Anomaly::BadSymbol { .. } => "SYM?",
            Anomaly::ChecksumMismatch { .. } => "CRC!",
            Anomaly::MissingTerminator { .. } => "EOP?",
        }
    }
}

/// An anomaly and the samples it concerns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub start: u64,
    pub end: u64,
    pub anomaly: Anomaly,
}

impl Diagnostic {
    pub fn annotation(&self) -> Annotation {
        Annotation::new(
            self.start,
            self.end,
            Category::Warning,
            [self.anomaly.to_string(), self.anomaly.short_label().to_string()],
        )
    }
}

/// Anomalies of one window, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, start: u64, end: u64, anomaly: Anomaly) {
        trace!("{}..{}: {}", start, end, anomaly);
        self.entries.push(Diagnostic {
            start,
            end,
            anomaly,
        });
    }

    /// Record the demodulator's complaints about a window
    pub fn extend_demodulation(&mut self, window: &CaptureWindow) {
        for error in &window.demod_errors {
            self.push(
                error.start,
                error.end,
                Anomaly::Demodulation { fault: error.fault },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn summary(&self) -> DiagnosticSummary {
        let mut summary = DiagnosticSummary::default();
        for entry in &self.entries {
            let counter = match entry.anomaly {
                Anomaly::Demodulation { .. } => &mut summary.demodulation_errors,
                Anomaly::SyncNotFound => &mut summary.sync_not_found,
                Anomaly::CorruptedStart { .. } => &mut summary.corrupted_starts,
                Anomaly::TruncatedFrame { .. } => &mut summary.truncated_frames,
                Anomaly::BadSymbol { .. } => &mut summary.bad_symbols,
                Anomaly::ChecksumMismatch { .. } => &mut summary.checksum_mismatches,
                Anomaly::MissingTerminator { .. } => &mut summary.missing_terminators,
            };
            *counter += 1;
        }
        summary
    }
}

/// Anomaly counts for one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticSummary {
    pub demodulation_errors: usize,
    pub sync_not_found: usize,
    pub corrupted_starts: usize,
    pub truncated_frames: usize,
    pub bad_symbols: usize,
    pub checksum_mismatches: usize,
    pub missing_terminators: usize,
}

impl DiagnosticSummary {
    pub fn total(&self) -> usize {
        self.demodulation_errors
            + self.sync_not_found
            + self.corrupted_starts
            + self.truncated_frames
            + self.bad_symbols
            + self.checksum_mismatches
            + self.missing_terminators
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

/// `(r2) SRC/UFP[3]: ACCEPT`
pub fn message_label(header: Header, sop: StartOfPacket, message: MessageType) -> String {
    format!(
        "(r{}) {}[{}]: {}",
        header.spec_revision(),
        header.role_text(sop),
        header.message_id(),
        message
    )
}

/// Builds the annotations of a decoded window
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    sample_rate: u64,
    full_text: bool,
}

impl Reporter {
    pub fn new(sample_rate: u64, full_text: bool) -> Self {
        Self {
            sample_rate,
            full_text,
        }
    }

    /// `12.345ms`
    fn timestamp(&self, sample: u64) -> String {
        let micros = u128::from(sample) * 1_000_000 / u128::from(self.sample_rate.max(1));
        format!("{}.{:03}ms", micros / 1000, micros % 1000)
    }

    /// No start of packet: the whole window is preamble or noise
    pub fn junk(&self, window: &CaptureWindow, diagnostics: &Diagnostics) -> Vec<Annotation> {
        let (start, end) = window_extent(window);
        let mut annotations = vec![Annotation::new(
            start,
            end,
            Category::Preamble,
            ["Junk???", "XXX"],
        )];
        annotations.extend(diagnostics.iter().map(Diagnostic::annotation));
        annotations
    }

    /// A reset ordered set, followed by whatever went wrong in its window
    pub fn reset(
        &self,
        window: &CaptureWindow,
        sync: &SyncMatch,
        diagnostics: &Diagnostics,
    ) -> Vec<Annotation> {
        let start = window.bits.get(sync.offset).map_or(window.first_edge, |b| b.start);
        let end = window
            .bits
            .get(sync.end() - 1)
            .map_or(window.last_edge, |b| b.end);
        let mut annotations = vec![Annotation::new(
            start,
            end,
            Category::Reset,
            [sync.sop.name(), sync.sop.short_name()],
        )];
        annotations.extend(diagnostics.iter().map(Diagnostic::annotation));
        annotations
    }

    pub fn frame(
        &self,
        window: &CaptureWindow,
        parsed: &ParsedFrame,
        message: MessageType,
        objects: &[DataObject],
        diagnostics: &Diagnostics,
    ) -> Vec<Annotation> {
        let frame = &parsed.frame;
        let layout = &parsed.layout;
        let mut annotations = Vec::new();

        if let Some(first) = window.bits.first()
            && first.start < layout.sop_start
        {
            annotations.push(Annotation::new(
                first.start,
                layout.sop_start,
                Category::Preamble,
                ["Preamble", "PRE"],
            ));
        }

        annotations.push(Annotation::new(
            layout.sop_start,
            layout.sop_end,
            Category::StartOfPacket,
            [frame.sop.name(), frame.sop.short_name()],
        ));

        for symbol in all_symbols(layout) {
            annotations.push(Annotation::new(
                symbol.start,
                symbol.end,
                Category::Symbol,
                [symbol.symbol.to_string()],
            ));
        }

        let header = &layout.header;
        annotations.push(Annotation::new(
            header.start,
            header.end,
            Category::Header,
            [frame.header.to_string()],
        ));
        if !header.truncated {
            annotations.extend(header_fields(layout, frame.header, frame.sop, message));
        }

        let category = if frame.header.power_role() {
            Category::SourceMessage
        } else {
            Category::SinkMessage
        };
        let long = message_label(frame.header, frame.sop, message);
        annotations.push(Annotation::new(
            header.start,
            layout.end(),
            category,
            [long.clone(), message.to_string()],
        ));

        for (index, (object, group)) in objects.iter().zip(&layout.words).enumerate() {
            annotations.push(Annotation::new(
                group.start,
                group.end,
                Category::DataWord,
                [format!("{:08x}", object.word())],
            ));
            annotations.push(Annotation::new(
                group.start,
                group.end,
                Category::Payload,
                [object.label(), object.short_label(index)],
            ));
        }

        let checksum = &layout.checksum;
        let checksum_short = match frame.expected_checksum {
            None => "CRC?",
            Some(expected) if expected == frame.checksum => "CRC",
            Some(_) => "CRC!",
        };
        annotations.push(Annotation::new(
            checksum.start,
            checksum.end,
            Category::Checksum,
            [format!("CRC:{:08x}", frame.checksum), checksum_short.to_string()],
        ));

        if let Some(eop) = layout.eop {
            annotations.push(Annotation::new(
                eop.start,
                eop.end,
                Category::EndOfPacket,
                ["EOP"],
            ));
        }

        annotations.extend(diagnostics.iter().map(Diagnostic::annotation));

        if self.full_text {
            let mut text = format!("[{}] {}", self.timestamp(layout.sop_start), long);
            for object in objects {
                text.push(' ');
                text.push_str(&object.label());
            }
            if !frame.valid {
                text.push_str(" (invalid)");
            }
            annotations.push(Annotation::new(
                layout.sop_start,
                layout.end(),
                Category::Frame,
                [text],
            ));
        }

        annotations
    }
}

fn window_extent(window: &CaptureWindow) -> (u64, u64) {
    let start = window.bits.first().map_or(window.first_edge, |b| b.start);
    let end = window.bits.last().map_or(window.last_edge, |b| b.end);
    (start, end)
}

fn all_symbols(layout: &FrameLayout) -> impl Iterator<Item = &SymbolSpan> {
    layout
        .header
        .symbols
        .iter()
        .chain(layout.words.iter().flat_map(|g| g.symbols.iter()))
        .chain(layout.checksum.symbols.iter())
        .chain(layout.eop.iter())
}

/// One annotation per header field, over the symbols that carry it
fn header_fields(
    layout: &FrameLayout,
    header: Header,
    sop: StartOfPacket,
    message: MessageType,
) -> Vec<Annotation> {
    let symbols = &layout.header.symbols;
    let [s0, s1, s2, s3] = [0usize, 1, 2, 3].map(|i| symbols.get(i).map_or((0, 0), |s| (s.start, s.end)));
    let field = |(start, _): (u64, u64), (_, end): (u64, u64), labels: [String; 2]| {
        Annotation::new(start, end, Category::HeaderField, labels)
    };

    let mut fields = vec![field(
        s0,
        s1,
        [
            format!("Type: {}", message),
            header.message_type().to_string(),
        ],
    )];
    if !sop.is_cable() {
        let (long, short) = if header.data_role() {
            ("DFP", "D")
        } else {
            ("UFP", "U")
        };
        fields.push(field(s1, s1, [long.to_string(), short.to_string()]));
    }
    fields.push(field(
        s1,
        s1,
        [
            format!("Rev {}.0", header.spec_revision()),
            format!("R{}", header.spec_revision()),
        ],
    ));
    let (long, short) = match (sop.is_cable(), header.power_role()) {
        (false, true) => ("Source", "SRC"),
        (false, false) => ("Sink", "SNK"),
        (true, true) => ("Cable Plug", "C"),
        (true, false) => ("Port", "P"),
    };
    fields.push(field(s2, s2, [long.to_string(), short.to_string()]));
    fields.push(field(
        s2,
        s2,
        [
            format!("MsgId {}", header.message_id()),
            header.message_id().to_string(),
        ],
    ));
    fields.push(field(
        s3,
        s3,
        [
            format!("Objects {}", header.object_count()),
            header.object_count().to_string(),
        ],
    ));
    let (long, short) = if header.is_extended() {
        ("Extended", "E")
    } else {
        ("Not extended", "-")
    };
    fields.push(field(s3, s3, [long.to_string(), short.to_string()]));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::bmc::DemodulationError;
    use crate::nodes::decoders::types::BitRecord;

    #[test]
    fn test_anomaly_labels() {
        let mismatch = Anomaly::ChecksumMismatch {
            expected: 0xCBF4_3926,
            actual: 0xCBF4_3927,
        };
        assert_eq!(
            mismatch.to_string(),
            "CRC mismatch: expected cbf43926, got cbf43927"
        );
        assert_eq!(mismatch.short_label(), "CRC!");
        assert_eq!(
            Anomaly::MissingTerminator { found: None }.to_string(),
            "Missing EOP, found end of capture"
        );
        assert_eq!(
            Anomaly::MissingTerminator {
                found: Some(Symbol::Data(3))
            }
            .to_string(),
            "Missing EOP, found 3"
        );
        assert_eq!(
            Anomaly::CorruptedStart {
                sop: StartOfPacket::Sop,
                matches: 3
            }
            .to_string(),
            "Corrupted SOP: 3 of 4 symbols match"
        );
    }

    #[test]
    fn test_summary_counts_by_kind() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.push(0, 1, Anomaly::SyncNotFound);
        diagnostics.push(
            1,
            2,
            Anomaly::Demodulation {
                fault: DemodFault::Glitch,
            },
        );
        diagnostics.push(
            2,
            3,
            Anomaly::Demodulation {
                fault: DemodFault::OrphanHalfOne,
            },
        );
        let summary = diagnostics.summary();
        assert_eq!(summary.sync_not_found, 1);
        assert_eq!(summary.demodulation_errors, 2);
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_clean());
        assert!(Diagnostics::default().summary().is_clean());
    }

    #[test]
    fn test_junk_window() {
        let window = CaptureWindow {
            first_edge: 100,
            last_edge: 300,
            bits: vec![BitRecord::new(false, 100, 140), BitRecord::new(true, 140, 180)],
            demod_errors: vec![DemodulationError {
                start: 140,
                end: 180,
                fault: DemodFault::Glitch,
            }],
        };
        let mut diagnostics = Diagnostics::default();
        diagnostics.extend_demodulation(&window);
        diagnostics.push(100, 180, Anomaly::SyncNotFound);

        let annotations = Reporter::new(12_000_000, true).junk(&window, &diagnostics);
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[0].category, Category::Preamble);
        assert_eq!(annotations[0].labels, vec!["Junk???", "XXX"]);
        assert_eq!((annotations[0].start_sample, annotations[0].end_sample), (100, 180));
        assert_eq!(annotations[2].label(), "No start of packet found");
    }

    #[test]
    fn test_reset_window_keeps_warnings() {
        let window = CaptureWindow {
            first_edge: 100,
            last_edge: 900,
            bits: vec![BitRecord::new(false, 100, 140), BitRecord::new(false, 140, 180)],
            demod_errors: vec![DemodulationError {
                start: 100,
                end: 104,
                fault: DemodFault::Glitch,
            }],
        };
        let sync = SyncMatch {
            offset: 1,
            sop: StartOfPacket::HardReset,
            matches: 3,
            symbols: [Symbol::Rst1, Symbol::Rst1, Symbol::Data(0), Symbol::Rst2],
        };
        let mut diagnostics = Diagnostics::default();
        diagnostics.extend_demodulation(&window);
        diagnostics.push(140, 900, Anomaly::CorruptedStart { sop: sync.sop, matches: 3 });

        let annotations = Reporter::new(12_000_000, true).reset(&window, &sync, &diagnostics);
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations[0].category, Category::Reset);
        assert_eq!(annotations[0].labels, vec!["Hard Reset", "HRST"]);
        assert_eq!((annotations[0].start_sample, annotations[0].end_sample), (140, 900));
        assert_eq!(annotations[1].labels[1], "DEMOD");
        assert_eq!(annotations[2].labels[1], "SOP?");
    }

    #[test]
    fn test_timestamp() {
        let reporter = Reporter::new(12_000_000, true);
        assert_eq!(reporter.timestamp(12_000), "1.000ms");
        assert_eq!(reporter.timestamp(18), "0.001ms");
    }

    #[test]
    fn test_message_label() {
        let message = MessageType::from_header(Header(0x0563));
        assert_eq!(
            message_label(Header(0x0563), StartOfPacket::Sop, message),
            "(r2) SRC[2]: ACCEPT"
        );
    }
}
