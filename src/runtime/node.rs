//! Node trait for streaming processing
//!
//! Defines the ProcessNode trait that all streaming nodes implement.
//! Nodes own their channel ends and process data when the scheduler calls
//! `work()`.

pub use super::errors::{WorkError, WorkResult};
pub use super::receiver::Receiver;
pub use super::sender::Sender;

/// A processing node that transforms data
/// - Sources own only output senders
/// - Sinks own only input receivers
/// - Processors own both
pub trait ProcessNode: Send {
    /// Get a debug name for this node
    fn name(&self) -> &str;

    /// Check if this node should stop processing
    fn should_stop(&self) -> bool {
        false
    }

    /// Do work: read from inputs, process, write to outputs.
    ///
    /// Returns `Ok(n)` with the number of items produced. `Err(Shutdown)`
    /// means the node has finished normally; any other error is a failure.
    fn work(&mut self) -> WorkResult<usize>;
}
