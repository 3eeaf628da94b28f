//! Edge events on a single captured signal line

use std::fmt;

/// A level transition on one signal line.
///
/// Edges are run-length encoded: the line holds `level` from `sample` until
/// the next edge's `sample`. Timestamps are sample indices, not wall time;
/// the capture sample rate converts them to seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Sample index at which the line took this level
    pub sample: u64,
    /// Line level from this sample on
    pub level: bool,
}

impl Edge {
    /// Create a new edge
    pub fn new(sample: u64, level: bool) -> Self {
        Self { sample, level }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Edge[s={}, l={}]", self.sample, u8::from(self.level))
    }
}
