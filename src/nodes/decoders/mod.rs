//! USB Power Delivery decoder
//!
//! The decode of one CC line runs as a chain of stages, each in its own
//! module:
//!
//! - [`bmc`]: edges to bits, split into capture windows
//! - [`symbols`]: 4b5b symbols and ordered-set alignment
//! - [`frame`]: header, data objects, CRC and EOP
//! - [`payload`]: message names and data object fields
//! - [`report`]: anomalies and annotations
//!
//! [`PdDecoder`] drives the chain for a single line and
//! [`PdDecoderNode`] runs it inside the scheduler.

pub mod bmc;
pub mod config;
pub mod crc;
pub mod frame;
pub mod payload;
pub mod pd_decoder;
pub mod report;
pub mod symbols;
pub mod synth;
pub mod types;

pub use bmc::{BitClockRecoverer, CaptureWindow, DemodFault, DemodState, DemodulationError};
pub use config::{DecoderConfig, Timing};
pub use frame::{Frame, FrameParser, Header, ParsedFrame};
pub use payload::{CapabilityMemo, DataObject, MessageType, PayloadInterpreter};
pub use pd_decoder::{DecoderState, PdDecoder, PdDecoderNode, Phase};
pub use report::{Anomaly, Diagnostic, DiagnosticSummary, Diagnostics, Reporter};
pub use symbols::{StartOfPacket, Symbol, SymbolSynchronizer, SyncMatch};
pub use synth::{BmcEncoder, PacketBuilder, XorShift64};
pub use types::{Annotation, BitRecord, Category, WindowOutcome, WindowReport};
