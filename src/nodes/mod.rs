//! Capture sources and protocol decoders
//!
//! - **DslFileSource**: streams per-probe edges out of a DSLogic .dsl capture
//! - **Decoders**: the USB-PD BMC decoder and its stages
//!
//! Sources and decoders are `ProcessNode`s, connected by the runtime's
//! channels and driven by the `Scheduler`.

pub mod decoders;
mod dsl_file;

pub use dsl_file::{DslFileSource, DslHeader};
