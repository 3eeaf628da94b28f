//! Broadcast sender with explicit end-of-stream signaling

use crossbeam_channel::{SendError, Sender as CrossbeamSender};

use super::receiver::Receiver;

/// Channel message wrapper for end-of-stream signaling
///
/// Wraps data flowing through channels so a producer can say when no more
/// data will follow. A capture source closes its edge channels at the end of
/// the file, which is what lets a decoder flush its last (idle-less) window.
///
/// Nodes never see this enum directly. `Sender::send()` wraps values in
/// `Sample(T)` and `Receiver::recv()` unwraps them transparently.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    /// A data sample
    Sample(T),
    /// End-of-stream marker, no more data will be sent
    EndOfStream,
}

/// Broadcast sender that sends to one or more consumers
pub struct Sender<T> {
    destinations: Vec<CrossbeamSender<ChannelMessage<T>>>,
}

/// Create a bounded single-destination channel pair.
pub fn bounded<T: Clone>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (Sender::new(vec![tx]), Receiver::new(rx))
}

impl<T: Clone> Sender<T> {
    /// Create a new Sender from a vector of crossbeam senders
    pub fn new(destinations: Vec<CrossbeamSender<ChannelMessage<T>>>) -> Self {
        Self { destinations }
    }

    /// Create a sender with no destinations; every send succeeds and is dropped.
    pub fn disconnected() -> Self {
        Self {
            destinations: Vec::new(),
        }
    }

    /// Add another destination and return the receiving end for it.
    pub fn subscribe(&mut self, capacity: usize) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        self.destinations.push(tx);
        Receiver::new(rx)
    }

    /// Get the number of broadcast destinations
    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Send a value to all destinations
    ///
    /// Fails only when no destination accepted the value.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let mut any_success = false;
        let mut last_error = None;

        for dest in &self.destinations {
            match dest.send(ChannelMessage::Sample(value.clone())) {
                Ok(()) => any_success = true,
                Err(SendError(msg)) => {
                    if let ChannelMessage::Sample(v) = msg {
                        last_error = Some(SendError(v));
                    }
                }
            }
        }

        if !any_success && let Some(e) = last_error {
            return Err(e);
        }

        Ok(())
    }

    /// Signal end-of-stream to all destinations
    ///
    /// Downstream `Receiver`s return `WorkError::Shutdown` once they reach
    /// the marker.
    pub fn close(&self) {
        for dest in &self.destinations {
            let _ = dest.send(ChannelMessage::EndOfStream);
        }
    }

    /// Check if this sender has any connected receivers
    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }
}

impl<T: Clone> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::WorkError;

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let mut tx = Sender::<u32>::disconnected();
        let mut a = tx.subscribe(4);
        let mut b = tx.subscribe(4);
        assert_eq!(tx.num_destinations(), 2);

        tx.send(7).unwrap();
        assert_eq!(a.recv().unwrap(), 7);
        assert_eq!(b.recv().unwrap(), 7);
    }

    #[test]
    fn test_close_ends_stream() {
        let (tx, mut rx) = bounded::<u32>(4);
        tx.send(1).unwrap();
        tx.close();

        assert_eq!(rx.recv().unwrap(), 1);
        assert!(matches!(rx.recv(), Err(WorkError::Shutdown)));
    }

    #[test]
    fn test_send_without_destinations_is_noop() {
        let tx = Sender::<u32>::disconnected();
        assert!(!tx.is_connected());
        assert!(tx.send(3).is_ok());
    }

    #[test]
    fn test_send_fails_when_all_receivers_dropped() {
        let (tx, rx) = bounded::<u32>(4);
        drop(rx);
        assert!(tx.send(3).is_err());
    }
}
