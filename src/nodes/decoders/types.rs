//! Common decoder types

use std::fmt;

use super::frame::Frame;
use super::report::DiagnosticSummary;
use super::symbols::StartOfPacket;

/// A recovered bit and the sample range `[start, end)` it was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRecord {
    pub value: bool,
    pub start: u64,
    pub end: u64,
}

impl BitRecord {
    pub fn new(value: bool, start: u64, end: u64) -> Self {
        Self { value, start, end }
    }
}

/// Annotation row a label belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Preamble,
    Symbol,
    StartOfPacket,
    Header,
    HeaderField,
    SourceMessage,
    SinkMessage,
    DataWord,
    Payload,
    Checksum,
    EndOfPacket,
    Reset,
    Warning,
    Frame,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Preamble => "preamble",
            Category::Symbol => "symbol",
            Category::StartOfPacket => "sop",
            Category::Header => "header",
            Category::HeaderField => "header field",
            Category::SourceMessage => "src",
            Category::SinkMessage => "snk",
            Category::DataWord => "data",
            Category::Payload => "payload",
            Category::Checksum => "checksum",
            Category::EndOfPacket => "eop",
            Category::Reset => "reset",
            Category::Warning => "warning",
            Category::Frame => "frame",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded span of the capture, the unit of decoder output.
///
/// `labels` runs from the most to the least verbose variant so a viewer can
/// pick whichever fits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub start_sample: u64,
    pub end_sample: u64,
    pub category: Category,
    pub labels: Vec<String>,
}

impl Annotation {
    pub fn new(
        start_sample: u64,
        end_sample: u64,
        category: Category,
        labels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            start_sample,
            end_sample,
            category,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// The most verbose label
    pub fn label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}-{} [{}] {}",
            self.start_sample,
            self.end_sample,
            self.category,
            self.label()
        )
    }
}

/// How a capture window ended up being interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    /// A frame was parsed, possibly partial or invalid
    Frame(Frame),
    /// A Hard Reset or Cable Reset ordered set
    Reset(StartOfPacket),
    /// No start-of-packet anywhere in the window
    Junk,
}

/// Everything decoded from one idle-delimited capture window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReport {
    pub start_sample: u64,
    pub end_sample: u64,
    pub annotations: Vec<Annotation>,
    /// Recovered bits, one byte (0 or 1) per bit
    pub raw_bits: Vec<u8>,
    /// Bits per second over the window, for frames that were not truncated
    pub bitrate: Option<u64>,
    pub outcome: WindowOutcome,
    pub diagnostics: DiagnosticSummary,
}

impl WindowReport {
    pub fn frame(&self) -> Option<&Frame> {
        match &self.outcome {
            WindowOutcome::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Annotations on a single row, in emission order
    pub fn annotations_in(&self, category: Category) -> impl Iterator<Item = &Annotation> {
        self.annotations
            .iter()
            .filter(move |a| a.category == category)
    }
}
