//! Channel receiver with cached end-of-stream
//!
//! [`Receiver`] wraps a single `crossbeam_channel::Receiver<ChannelMessage<T>>`,
//! unwraps `ChannelMessage` transparently and caches the end-of-stream state
//! so subsequent calls return `Shutdown`.
//!
//! A `Receiver<Edge>` is the edge timeline of one signal line: it is also an
//! `Iterator`, and the blocking `recv()` inside `next()` is the only point at
//! which a decoder waits for the next edge.

use crossbeam_channel::Receiver as CrossbeamReceiver;

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;

/// A single crossbeam receiver.
///
/// On `ChannelMessage::EndOfStream` a persistent flag is set so all later
/// `recv()` calls return `WorkError::Shutdown` immediately.
pub struct Receiver<T> {
    receiver: CrossbeamReceiver<ChannelMessage<T>>,
    eos: bool,
}

impl<T> Receiver<T> {
    /// Wrap a crossbeam receiver.
    pub fn new(receiver: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self {
            receiver,
            eos: false,
        }
    }

    /// Blocking receive.
    pub fn recv(&mut self) -> WorkResult<T> {
        if self.eos {
            return Err(WorkError::Shutdown);
        }

        match self.receiver.recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos = true;
                tracing::debug!("Receiver::recv() - EndOfStream received");
                Err(WorkError::Shutdown)
            }
            Err(_) => {
                self.eos = true;
                tracing::debug!("Receiver::recv() - channel disconnected, returning Shutdown");
                Err(WorkError::Shutdown)
            }
        }
    }
}

impl<T> Iterator for Receiver<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv().ok()
    }
}
