//! Passive USB Power Delivery BMC decoder
//!
//! Reads the CC lines of a logic analyzer capture and decodes the USB-PD
//! traffic on them: Biphase Mark Coding, 4b5b symbols, ordered sets,
//! message headers, data objects and the CRC-32 trailer. Each capture
//! window produces a [`WindowReport`] with time-stamped annotations and a
//! diagnostic summary.
//!
//! # Architecture
//!
//! - **DslFileSource**: streams edges from DSL files with on-demand ZIP archive reads
//! - **PdDecoder**: decodes the edge timeline of one CC line
//! - **Scheduler**: thread-per-node execution with crossbeam channels
//!
//! # Example
//!
//! ```no_run
//! use pdbmc::{DecoderConfig, DslFileSource, PdDecoder};
//!
//! let mut source = DslFileSource::new("capture.dsl")?;
//! let mut decoder = PdDecoder::new(DecoderConfig::new(source.sample_rate()))?;
//! for report in decoder.decode_edges(source.edges(0)?) {
//!     for annotation in &report.annotations {
//!         println!("{}", annotation);
//!     }
//! }
//! # Ok::<(), pdbmc::PdError>(())
//! ```

use thiserror::Error;

pub mod nodes;
pub mod runtime;

pub use nodes::decoders::{
    Annotation, Anomaly, BmcEncoder, Category, DecoderConfig, DiagnosticSummary, Frame,
    PacketBuilder, PdDecoder, PdDecoderNode, StartOfPacket, WindowOutcome, WindowReport,
};
pub use nodes::{DslFileSource, DslHeader};
pub use runtime::{Edge, ProcessNode, Receiver, Scheduler, Sender, WorkError, WorkResult, bounded};

#[derive(Error, Debug)]
pub enum PdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid probe number: {0}")]
    InvalidProbe(usize),

    #[error("Invalid block number: {0}")]
    InvalidBlock(u64),

    #[error("Position out of bounds: {0}")]
    OutOfBounds(u64),

    #[error("Sample rate is required")]
    MissingSampleRate,

    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PdError>;
