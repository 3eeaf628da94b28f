//! USB Power Delivery decoder, one CC line at a time
//!
//! Edges are pulled one by one and demodulated into bits. When an idle gap
//! closes a capture window the window is decoded in one pass:
//!
//!   1. Demodulating: bits accumulate until the line goes idle
//!   2. Synchronizing: find the start-of-packet ordered set
//!   3. Header, Payload, CRC, EOP: read the packet after the ordered set
//!
//! A reset ordered set ends the window after step 2, and so does a window
//! with no ordered set at all. Either way the decoder is back in
//! `Demodulating` for the next window.
//!
//! Nothing but the capability memo outlives a window.

use super::bmc::{BitClockRecoverer, CaptureWindow, DemodState};
use super::config::{DecoderConfig, Timing};
use super::frame::{FrameParser, ParsedFrame};
use super::payload::{CapabilityMemo, MessageType, PayloadInterpreter};
use super::report::{Anomaly, Diagnostics, Reporter};
use super::symbols::{SymbolSynchronizer, SyncMatch};
use super::types::{Annotation, WindowOutcome, WindowReport};
use crate::Result;
use crate::runtime::Edge;
use crate::runtime::node::{ProcessNode, Receiver, Sender, WorkError, WorkResult};
use tracing::{debug, info, trace};

/// Where the decoder is within a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Demodulating,
    Synchronizing,
    Header,
    Payload,
    Crc,
    Eop,
}

/// Everything the decoder carries between edges
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    pub phase: Phase,
    demod: DemodState,
    memo: CapabilityMemo,
    windows: u64,
}

impl DecoderState {
    pub fn memo(&self) -> &CapabilityMemo {
        &self.memo
    }

    pub fn demod(&self) -> &DemodState {
        &self.demod
    }

    /// Windows decoded so far
    pub fn windows(&self) -> u64 {
        self.windows
    }
}

/// Decoder for one CC line
pub struct PdDecoder {
    name: String,
    timing: Timing,
    recoverer: BitClockRecoverer,
    synchronizer: SymbolSynchronizer,
    reporter: Reporter,
    state: DecoderState,
}

impl PdDecoder {
    /// Fails if the configuration is unusable, most notably without a
    /// sample rate.
    pub fn new(config: DecoderConfig) -> Result<Self> {
        let timing = config.timing()?;
        debug!(
            "PD decoder timing at {} Hz: glitch < {}, half cell <= {}, idle > {} samples",
            timing.sample_rate, timing.half_cell_min, timing.zero_threshold, timing.idle_gap
        );
        Ok(Self {
            name: "pd_decoder".to_string(),
            timing,
            recoverer: BitClockRecoverer::new(timing),
            synchronizer: SymbolSynchronizer::new(config.sop_min_matches()),
            reporter: Reporter::new(timing.sample_rate, config.full_text),
            state: DecoderState::default(),
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    fn enter(&mut self, phase: Phase) {
        trace!("[{}] {:?} -> {:?}", self.name, self.state.phase, phase);
        self.state.phase = phase;
    }

    /// Feed one edge. Returns the report of the window it closed, if any.
    pub fn push_edge(&mut self, edge: Edge) -> Option<WindowReport> {
        let recoverer = self.recoverer;
        let window = recoverer.push_edge(&mut self.state.demod, edge)?;
        Some(self.decode_window(window))
    }

    /// End of the edge stream: decode whatever window is still open.
    pub fn flush(&mut self) -> Option<WindowReport> {
        let recoverer = self.recoverer;
        let window = recoverer.finish(&mut self.state.demod)?;
        Some(self.decode_window(window))
    }

    /// Decode every window of an edge stream.
    pub fn decode_edges<I>(&mut self, edges: I) -> Vec<WindowReport>
    where
        I: IntoIterator<Item = Edge>,
    {
        self.reports(edges).collect()
    }

    /// Lazily decode an edge stream, one report per window.
    pub fn reports<I>(&mut self, edges: I) -> Reports<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Edge>,
    {
        Reports {
            decoder: self,
            edges: edges.into_iter(),
            done: false,
        }
    }

    /// Decode one capture window.
    pub fn decode_window(&mut self, window: CaptureWindow) -> WindowReport {
        self.state.windows += 1;
        let mut diagnostics = Diagnostics::default();
        diagnostics.extend_demodulation(&window);

        self.enter(Phase::Synchronizing);
        let sync = self.synchronizer.locate(&window.bits);

        let (annotations, outcome, bitrate) = match sync {
            None => {
                let start = window.bits.first().map_or(window.first_edge, |b| b.start);
                let end = window.bits.last().map_or(window.last_edge, |b| b.end);
                diagnostics.push(start, end, Anomaly::SyncNotFound);
                debug!(
                    "[{}] No start of packet in {} bits at {}",
                    self.name,
                    window.bits.len(),
                    start
                );
                (
                    self.reporter.junk(&window, &diagnostics),
                    WindowOutcome::Junk,
                    None,
                )
            }
            Some(sync) if sync.sop.is_reset() => {
                if !sync.is_exact() {
                    self.push_corrupted_start(&window, &sync, &mut diagnostics);
                }
                debug!("[{}] {} at {}", self.name, sync.sop, window.first_edge);
                self.state.memo.clear();
                (
                    self.reporter.reset(&window, &sync, &diagnostics),
                    WindowOutcome::Reset(sync.sop),
                    None,
                )
            }
            Some(sync) => {
                let (annotations, parsed) = self.decode_frame(&window, sync, &mut diagnostics);
                let bitrate = if parsed.frame.truncated {
                    None
                } else {
                    self.bitrate(&window)
                };
                (annotations, WindowOutcome::Frame(parsed.frame), bitrate)
            }
        };

        self.enter(Phase::Demodulating);

        WindowReport {
            start_sample: window.first_edge,
            end_sample: window.last_edge,
            annotations,
            raw_bits: window.raw_bits(),
            bitrate,
            outcome,
            diagnostics: diagnostics.summary(),
        }
    }

    fn push_corrupted_start(
        &self,
        window: &CaptureWindow,
        sync: &SyncMatch,
        diagnostics: &mut Diagnostics,
    ) {
        let start = window.bits.get(sync.offset).map_or(0, |b| b.start);
        let end = window.bits.get(sync.end() - 1).map_or(start, |b| b.end);
        diagnostics.push(
            start,
            end,
            Anomaly::CorruptedStart {
                sop: sync.sop,
                matches: sync.matches,
            },
        );
    }

    fn decode_frame(
        &mut self,
        window: &CaptureWindow,
        sync: SyncMatch,
        diagnostics: &mut Diagnostics,
    ) -> (Vec<Annotation>, ParsedFrame) {
        if !sync.is_exact() {
            self.push_corrupted_start(window, &sync, diagnostics);
        }

        let mut parser = FrameParser::new(&window.bits, sync);
        self.enter(Phase::Header);
        let header = parser.read_header(diagnostics);
        self.enter(Phase::Payload);
        let words = parser.read_data_objects(&header, diagnostics);
        self.enter(Phase::Crc);
        let checksum = parser.read_checksum(&header, &words, diagnostics);
        self.enter(Phase::Eop);
        let eop = parser.read_eop(diagnostics);
        let mut parsed = parser.finish(header, words, checksum, eop);

        let frame = &mut parsed.frame;
        frame.valid = diagnostics.is_empty();

        let message = MessageType::from_header(frame.header);
        let objects = PayloadInterpreter::new(&self.state.memo).interpret(message, &frame.words);
        if frame.checksum_ok() {
            self.state.memo.record(&objects);
        }

        debug!(
            "[{}] {} {} with {} objects{}",
            self.name,
            frame.sop,
            message,
            frame.words.len(),
            if frame.valid { "" } else { " (invalid)" }
        );

        let annotations = self
            .reporter
            .frame(window, &parsed, message, &objects, diagnostics);
        (annotations, parsed)
    }

    /// Bits per second over the window
    fn bitrate(&self, window: &CaptureWindow) -> Option<u64> {
        let first = window.bits.first()?.start;
        let last = window.bits.last()?.end;
        let duration = last.checked_sub(first).filter(|&d| d > 0)?;
        let bits = window.bits.len() as u128;
        Some((u128::from(self.timing.sample_rate) * bits / u128::from(duration)) as u64)
    }
}

/// Window reports pulled from an edge stream
pub struct Reports<'d, I> {
    decoder: &'d mut PdDecoder,
    edges: I,
    done: bool,
}

impl<I: Iterator<Item = Edge>> Iterator for Reports<'_, I> {
    type Item = WindowReport;

    fn next(&mut self) -> Option<WindowReport> {
        if self.done {
            return None;
        }
        for edge in self.edges.by_ref() {
            if let Some(report) = self.decoder.push_edge(edge) {
                return Some(report);
            }
        }
        self.done = true;
        self.decoder.flush()
    }
}

/// Streaming node wrapping a [`PdDecoder`]
///
/// Input: edges of one CC line
/// Output: one `WindowReport` per capture window
pub struct PdDecoderNode {
    decoder: PdDecoder,
    input: Receiver<Edge>,
    output: Sender<WindowReport>,
    edges: u64,
}

impl PdDecoderNode {
    pub fn new(decoder: PdDecoder, input: Receiver<Edge>, output: Sender<WindowReport>) -> Self {
        Self {
            decoder,
            input,
            output,
            edges: 0,
        }
    }

    fn emit(&self, report: WindowReport) -> WorkResult<usize> {
        for annotation in &report.annotations {
            trace!("[{}] {}", self.decoder.name(), annotation);
        }
        self.output.send(report)?;
        Ok(1)
    }
}

impl ProcessNode for PdDecoderNode {
    fn name(&self) -> &str {
        self.decoder.name()
    }

    fn work(&mut self) -> WorkResult<usize> {
        match self.input.recv() {
            Ok(edge) => {
                self.edges += 1;
                match self.decoder.push_edge(edge) {
                    Some(report) => self.emit(report),
                    None => Ok(0),
                }
            }
            Err(WorkError::Shutdown) => {
                if let Some(report) = self.decoder.flush() {
                    self.emit(report)?;
                }
                info!(
                    "[{}] End of edges: {} edges, {} windows",
                    self.decoder.name(),
                    self.edges,
                    self.decoder.state().windows()
                );
                self.output.close();
                Err(WorkError::Shutdown)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PdError;
    use crate::nodes::decoders::symbols::StartOfPacket;
    use crate::nodes::decoders::synth::{BmcEncoder, PacketBuilder};
    use crate::nodes::decoders::types::Category;
    use crate::runtime::bounded;

    const RATE: u64 = 12_000_000;

    fn decoder() -> PdDecoder {
        PdDecoder::new(DecoderConfig::new(RATE)).unwrap()
    }

    fn edges(packets: &[PacketBuilder]) -> Vec<Edge> {
        let mut encoder = BmcEncoder::new(20);
        for packet in packets {
            encoder.packet(&packet.bits());
        }
        encoder.finish()
    }

    #[test]
    fn test_missing_sample_rate_fails_up_front() {
        let result = PdDecoder::new(DecoderConfig::default());
        assert!(matches!(result, Err(PdError::MissingSampleRate)));
    }

    #[test]
    fn test_phase_returns_to_demodulating() {
        let mut decoder = decoder();
        let reports = decoder.decode_edges(edges(&[PacketBuilder::new(0x0563)]));
        assert_eq!(reports.len(), 1);
        assert_eq!(decoder.state().phase, Phase::Demodulating);
        assert_eq!(decoder.state().windows(), 1);
    }

    #[test]
    fn test_bitrate_of_clean_frame() {
        let mut decoder = decoder();
        let reports = decoder.decode_edges(edges(&[PacketBuilder::new(0x0563)]));
        // 40 samples per bit at 12 MHz
        assert_eq!(reports[0].bitrate, Some(300_000));
        assert_eq!(reports[0].raw_bits.len(), 149);
    }

    #[test]
    fn test_reset_clears_memo() {
        let mut decoder = decoder();
        decoder.decode_edges(edges(&[PacketBuilder::new(0x1161).words(&[0x0001_912C])]));
        assert!(!decoder.state().memo().is_empty());

        let reports = decoder.decode_edges(edges(&[PacketBuilder::reset(StartOfPacket::CableReset)]));
        assert_eq!(reports[0].outcome, WindowOutcome::Reset(StartOfPacket::CableReset));
        assert!(decoder.state().memo().is_empty());
    }

    #[test]
    fn test_corrupted_frame_memo_untouched() {
        let mut decoder = decoder();
        decoder.decode_edges(edges(&[PacketBuilder::new(0x1161)
            .words(&[0x0001_912C])
            .checksum(0)]));
        assert!(decoder.state().memo().is_empty());
    }

    #[test]
    fn test_node_streams_reports() {
        let (edge_tx, edge_rx) = bounded::<Edge>(1024);
        let (report_tx, report_rx) = bounded::<WindowReport>(16);
        let mut node = PdDecoderNode::new(decoder().with_name("cc1"), edge_rx, report_tx);
        assert_eq!(node.name(), "cc1");

        let stream = edges(&[PacketBuilder::new(0x0563), PacketBuilder::new(0x0161)]);
        let count = stream.len();
        for edge in stream {
            edge_tx.send(edge).unwrap();
        }
        edge_tx.close();

        let mut produced = 0;
        for _ in 0..count {
            produced += node.work().unwrap();
        }
        // The second window only closes when the input ends
        assert_eq!(produced, 1);
        assert!(matches!(node.work(), Err(WorkError::Shutdown)));

        let reports: Vec<WindowReport> = report_rx.collect();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.frame().is_some_and(|f| f.valid)));
        assert_eq!(
            reports[1].annotations_in(Category::SourceMessage).count(),
            1
        );
    }
}
