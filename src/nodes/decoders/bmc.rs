//! Biphase Mark Code clock recovery
//!
//! BMC carries its own clock: every bit cell starts with a transition and a
//! `1` adds a second transition half way through. With no reference clock,
//! bits are recovered purely from the spacing of consecutive edges:
//!
//! - two consecutive half-cell intervals make a `1`
//! - one full-cell interval makes a `0`
//! - a gap longer than the idle timeout ends the capture window
//!
//! A half-cell is remembered between edges (`DemodState::half_one`) because a
//! `1` spans an edge pair.

use std::fmt;

use super::config::Timing;
use super::types::BitRecord;
use crate::runtime::Edge;
use tracing::{debug, trace};

/// An edge interval that fits neither bit pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodFault {
    /// Interval shorter than half a half-cell
    Glitch,
    /// Full-cell interval while the second half of a `1` was expected
    OrphanHalfOne,
}

impl fmt::Display for DemodFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DemodFault::Glitch => f.write_str("glitch"),
            DemodFault::OrphanHalfOne => f.write_str("lone half-cell"),
        }
    }
}

/// Where demodulation went wrong; a best-effort `0` covers the same range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemodulationError {
    pub start: u64,
    pub end: u64,
    pub fault: DemodFault,
}

/// Bits recovered between two idle gaps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureWindow {
    /// Sample of the first edge in the window
    pub first_edge: u64,
    /// Sample of the last edge before the idle gap
    pub last_edge: u64,
    pub bits: Vec<BitRecord>,
    pub demod_errors: Vec<DemodulationError>,
}

impl CaptureWindow {
    fn starting_at(sample: u64) -> Self {
        Self {
            first_edge: sample,
            last_edge: sample,
            ..Self::default()
        }
    }

    /// Bit values as bytes, one per bit
    pub fn raw_bits(&self) -> Vec<u8> {
        self.bits.iter().map(|b| u8::from(b.value)).collect()
    }
}

/// Per-line demodulation state, carried from one edge to the next
#[derive(Debug, Clone, Default)]
pub struct DemodState {
    previous: Option<Edge>,
    /// Start sample of a half-cell still waiting for its partner
    half_one: Option<u64>,
    window: CaptureWindow,
}

impl DemodState {
    /// Whether a `1` is half received
    pub fn half_one_pending(&self) -> bool {
        self.half_one.is_some()
    }

    /// Bits recovered so far in the open window
    pub fn bits(&self) -> &[BitRecord] {
        &self.window.bits
    }

    fn begin_window(&mut self, edge: Edge) {
        self.previous = Some(edge);
        self.half_one = None;
        self.window = CaptureWindow::starting_at(edge.sample);
    }

    /// Close the open window. Windows without a single bit have no extent
    /// and are dropped.
    fn take_window(&mut self) -> Option<CaptureWindow> {
        let previous = self.previous?;
        let mut window = std::mem::take(&mut self.window);
        window.last_edge = previous.sample;
        if self.half_one.take().is_some() {
            trace!("Dropping trailing half-cell at {}", window.last_edge);
        }
        if window.bits.is_empty() {
            trace!("Dropping bit-less window at {}", window.first_edge);
            return None;
        }
        Some(window)
    }
}

/// Classifies edge intervals into bits
#[derive(Debug, Clone, Copy)]
pub struct BitClockRecoverer {
    timing: Timing,
}

impl BitClockRecoverer {
    pub fn new(timing: Timing) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Feed the next edge. Returns the window that an idle gap just closed.
    pub fn push_edge(&self, state: &mut DemodState, edge: Edge) -> Option<CaptureWindow> {
        let Some(previous) = state.previous else {
            state.begin_window(edge);
            return None;
        };

        if edge.level == previous.level {
            trace!("Ignoring non-transition {}", edge);
            return None;
        }

        let diff = edge.sample.saturating_sub(previous.sample);

        if diff > self.timing.idle_gap {
            let closed = state.take_window();
            if let Some(window) = &closed {
                debug!(
                    "Idle gap of {} samples closes window {}..{} ({} bits)",
                    diff,
                    window.first_edge,
                    window.last_edge,
                    window.bits.len()
                );
            }
            state.begin_window(edge);
            return closed;
        }

        let window = &mut state.window;
        if diff < self.timing.half_cell_min {
            let start = state.half_one.take().unwrap_or(previous.sample);
            trace!("Glitch of {} samples at {}", diff, edge.sample);
            window.demod_errors.push(DemodulationError {
                start,
                end: edge.sample,
                fault: DemodFault::Glitch,
            });
            window.bits.push(BitRecord::new(false, start, edge.sample));
        } else if diff <= self.timing.zero_threshold {
            match state.half_one.take() {
                Some(start) => {
                    trace!("bit 1 at {}..{}", start, edge.sample);
                    window.bits.push(BitRecord::new(true, start, edge.sample));
                }
                None => state.half_one = Some(previous.sample),
            }
        } else {
            match state.half_one.take() {
                Some(start) => {
                    trace!("Orphan half-cell at {}", start);
                    window.demod_errors.push(DemodulationError {
                        start,
                        end: edge.sample,
                        fault: DemodFault::OrphanHalfOne,
                    });
                    window.bits.push(BitRecord::new(false, start, edge.sample));
                }
                None => {
                    trace!("bit 0 at {}..{}", previous.sample, edge.sample);
                    window
                        .bits
                        .push(BitRecord::new(false, previous.sample, edge.sample));
                }
            }
        }

        state.previous = Some(edge);
        None
    }

    /// End of the edge stream: close whatever window is open.
    pub fn finish(&self, state: &mut DemodState) -> Option<CaptureWindow> {
        let closed = state.take_window();
        *state = DemodState::default();
        closed
    }

    /// Pull windows lazily from an edge stream.
    pub fn windows<I>(self, edges: I) -> Windows<I::IntoIter>
    where
        I: IntoIterator<Item = Edge>,
    {
        Windows {
            recoverer: self,
            state: DemodState::default(),
            edges: edges.into_iter(),
            done: false,
        }
    }
}

/// Iterator over the idle-delimited windows of an edge stream.
///
/// Each call to `next()` pulls edges until a window closes; nothing beyond
/// the current window is buffered.
pub struct Windows<I> {
    recoverer: BitClockRecoverer,
    state: DemodState,
    edges: I,
    done: bool,
}

impl<I: Iterator<Item = Edge>> Iterator for Windows<I> {
    type Item = CaptureWindow;

    fn next(&mut self) -> Option<CaptureWindow> {
        if self.done {
            return None;
        }
        for edge in self.edges.by_ref() {
            if let Some(window) = self.recoverer.push_edge(&mut self.state, edge) {
                return Some(window);
            }
        }
        self.done = true;
        self.recoverer.finish(&mut self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::config::DecoderConfig;

    fn recoverer() -> BitClockRecoverer {
        BitClockRecoverer::new(DecoderConfig::new(12_000_000).timing().unwrap())
    }

    /// Edges at the given samples with alternating levels
    fn edges(samples: &[u64]) -> Vec<Edge> {
        samples
            .iter()
            .enumerate()
            .map(|(i, &s)| Edge::new(s, i % 2 == 0))
            .collect()
    }

    fn values(window: &CaptureWindow) -> Vec<u8> {
        window.raw_bits()
    }

    #[test]
    fn test_zero_and_one_cells() {
        // 0, 1, 1, 0 with 20-sample half cells
        let windows: Vec<_> = recoverer()
            .windows(edges(&[0, 40, 60, 80, 100, 120, 160]))
            .collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(values(&windows[0]), vec![0, 1, 1, 0]);
        assert!(windows[0].demod_errors.is_empty());
    }

    #[test]
    fn test_bit_ranges_are_contiguous() {
        let windows: Vec<_> = recoverer()
            .windows(edges(&[0, 40, 60, 80, 120]))
            .collect();
        let bits = &windows[0].bits;
        assert_eq!(bits[0], BitRecord::new(false, 0, 40));
        assert_eq!(bits[1], BitRecord::new(true, 40, 80));
        assert_eq!(bits[2], BitRecord::new(false, 80, 120));
        for pair in bits.windows(2) {
            assert!(pair[0].start < pair[0].end);
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_idle_gap_splits_windows() {
        let windows: Vec<_> = recoverer()
            .windows(edges(&[0, 40, 80, 1000, 1040, 1060, 1080]))
            .collect();
        assert_eq!(windows.len(), 2);
        assert_eq!(values(&windows[0]), vec![0, 0]);
        assert_eq!(windows[0].last_edge, 80);
        assert_eq!(windows[1].first_edge, 1000);
        assert_eq!(values(&windows[1]), vec![0, 1]);
    }

    #[test]
    fn test_lone_edge_yields_no_window() {
        let windows: Vec<_> = recoverer().windows(edges(&[0, 500, 540])).collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].first_edge, 500);
    }

    #[test]
    fn test_orphan_half_cell_emits_zero_and_error() {
        // half cell then a full cell
        let windows: Vec<_> = recoverer().windows(edges(&[0, 20, 60, 100])).collect();
        let window = &windows[0];
        assert_eq!(values(window), vec![0, 0]);
        assert_eq!(window.bits[0], BitRecord::new(false, 0, 60));
        assert_eq!(
            window.demod_errors,
            vec![DemodulationError {
                start: 0,
                end: 60,
                fault: DemodFault::OrphanHalfOne
            }]
        );
    }

    #[test]
    fn test_glitch_emits_zero_and_error() {
        let windows: Vec<_> = recoverer().windows(edges(&[0, 40, 43, 83])).collect();
        let window = &windows[0];
        assert_eq!(values(window), vec![0, 0, 0]);
        assert_eq!(window.demod_errors.len(), 1);
        assert_eq!(window.demod_errors[0].fault, DemodFault::Glitch);
    }

    #[test]
    fn test_repeated_level_is_not_an_edge() {
        let stream = vec![
            Edge::new(0, true),
            Edge::new(40, false),
            Edge::new(50, false),
            Edge::new(80, true),
        ];
        let windows: Vec<_> = recoverer().windows(stream).collect();
        assert_eq!(values(&windows[0]), vec![0, 0]);
    }

    #[test]
    fn test_push_edge_tracks_pending_half() {
        let rec = recoverer();
        let mut state = DemodState::default();
        assert!(rec.push_edge(&mut state, Edge::new(0, true)).is_none());
        assert!(rec.push_edge(&mut state, Edge::new(20, false)).is_none());
        assert!(state.half_one_pending());
        assert!(rec.push_edge(&mut state, Edge::new(40, true)).is_none());
        assert!(!state.half_one_pending());
        assert_eq!(state.bits().len(), 1);

        let window = rec.finish(&mut state).unwrap();
        assert_eq!(values(&window), vec![1]);
        assert!(state.bits().is_empty());
    }
}
