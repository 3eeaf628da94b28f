//! DSL file source
//!
//! Provides `DslFileSource` - a runtime process node that reads DSLogic .dsl capture files
//! and outputs the edges of selected probes.
//!
//! A .dsl file is a zip archive holding a `header` text file and one entry per
//! probe and block, `L-<probe>/<block>`, with samples packed LSB first. Each
//! call to `work()` walks one block of every subscribed probe, so all probes
//! advance together and no probe is read ahead of the others.

use crate::runtime::node::{ProcessNode, Receiver, Sender, WorkError, WorkResult};
use crate::runtime::Edge;
use crate::{PdError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use zip::ZipArchive;

/// Header information from a DSL file
#[derive(Debug, Clone)]
pub struct DslHeader {
    /// Total number of probes/channels
    pub total_probes: usize,
    /// Sample rate as a string (e.g., "50 MHz")
    pub samplerate: String,
    /// Sample rate in Hz
    pub samplerate_hz: f64,
    /// Sample period in seconds (1 / sample_rate)
    pub sample_period: f64,
    /// Total number of samples captured
    pub total_samples: u64,
    /// Total number of data blocks
    pub total_blocks: u64,
    /// Samples per block (calculated)
    pub samples_per_block: u64,
    /// Probe names indexed by probe number (0-based)
    pub probe_names: Vec<String>,
}

/// Extract a single bit from a byte array at the given bit index
#[inline]
fn get_bit(data: &[u8], bit_index: usize) -> bool {
    let byte_index = bit_index / 8;
    let bit_offset = bit_index % 8;

    if byte_index < data.len() {
        (data[byte_index] >> bit_offset) & 1 == 1
    } else {
        false
    }
}

/// Edge stream of one probe being read
struct ProbeOutput {
    probe: usize,
    sender: Sender<Edge>,
    level: Option<bool>,
    edges_sent: u64,
}

impl ProbeOutput {
    /// Send the transitions in `count` samples of `data`, the first of which
    /// is sample number `start`. The very first sample is always sent so the
    /// receiver learns the initial level.
    fn walk(&mut self, data: &[u8], start: u64, count: u64) -> WorkResult<usize> {
        let mut sent = 0;
        for offset in 0..count {
            let value = get_bit(data, offset as usize);
            if self.level != Some(value) {
                self.sender.send(Edge::new(start + offset, value))?;
                self.level = Some(value);
                sent += 1;
            }
        }
        self.edges_sent += sent as u64;
        Ok(sent)
    }
}

/// Source node that reads a DSLogic .dsl capture file and outputs per-probe edges
///
/// # Example
/// ```no_run
/// use pdbmc::DslFileSource;
///
/// let mut source = DslFileSource::new("capture.dsl")?;
/// let cc1 = source.probe_index("CC1").unwrap_or(0);
/// let edges = source.subscribe(cc1, 4096)?;
/// # Ok::<(), pdbmc::PdError>(())
/// ```
pub struct DslFileSource<R = File> {
    name: String,
    archive: ZipArchive<R>,
    header: DslHeader,
    blocks: HashMap<(usize, u64), Arc<[u8]>>,
    outputs: Vec<ProbeOutput>,
    max_samples: Option<u64>,
    next_block: u64,
}

impl DslFileSource<File> {
    /// Open a DSL file from a path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> DslFileSource<R> {
    /// Read a DSL archive from any seekable reader
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let header = Self::parse_header(&mut archive)?;

        Ok(Self {
            name: "dsl_file_source".to_string(),
            archive,
            header,
            blocks: HashMap::new(),
            outputs: Vec::new(),
            max_samples: None,
            next_block: 0,
        })
    }

    fn parse_header(archive: &mut ZipArchive<R>) -> Result<DslHeader> {
        let mut header_file = archive
            .by_name("header")
            .map_err(|e| PdError::ParseHeader(format!("Cannot find header file: {}", e)))?;

        let mut header_content = String::new();
        header_file.read_to_string(&mut header_content)?;
        drop(header_file); // Explicitly drop to release archive borrow

        let mut total_probes: Option<usize> = None;
        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;
        let mut total_blocks: Option<u64> = None;
        let mut probe_names_map: HashMap<usize, String> = HashMap::new();

        for line in header_content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("total probes = ") {
                total_probes = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("samplerate = ") {
                samplerate = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("total samples = ") {
                total_samples = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("total blocks = ") {
                total_blocks = value.parse().ok();
            } else if line.starts_with("probe")
                && let Some((probe_part, name)) = line.split_once(" = ")
                && let Some(num_str) = probe_part.strip_prefix("probe")
                && let Ok(probe_num) = num_str.parse::<usize>()
            {
                probe_names_map.insert(probe_num, name.to_string());
            }
        }

        let total_probes =
            total_probes.ok_or_else(|| PdError::MissingField("total probes".to_string()))?;
        let samplerate =
            samplerate.ok_or_else(|| PdError::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| PdError::MissingField("total samples".to_string()))?;
        let total_blocks =
            total_blocks.ok_or_else(|| PdError::MissingField("total blocks".to_string()))?;

        let samplerate_hz = Self::parse_sample_rate(&samplerate)
            .ok_or_else(|| PdError::ParseHeader(format!("Invalid sample rate: {}", samplerate)))?;
        let sample_period = 1.0 / samplerate_hz;

        // Blocks are fixed-size except the last
        let samples_per_block = {
            let mut file = archive
                .by_name("L-0/0")
                .map_err(|_| PdError::ParseHeader("Could not read first block".to_string()))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            (buf.len() * 8) as u64
        };
        if samples_per_block == 0 {
            return Err(PdError::ParseHeader("First block is empty".to_string()));
        }

        debug!(
            "File has {} samples across {} blocks ({} samples/block standard size)",
            total_samples, total_blocks, samples_per_block
        );

        let probe_names = (0..total_probes)
            .map(|i| {
                probe_names_map
                    .get(&i)
                    .cloned()
                    .unwrap_or_else(|| format!("Probe{}", i))
            })
            .collect();

        Ok(DslHeader {
            total_probes,
            samplerate,
            samplerate_hz,
            sample_period,
            total_samples,
            total_blocks,
            samples_per_block,
            probe_names,
        })
    }

    /// Get the header information
    pub fn header(&self) -> &DslHeader {
        &self.header
    }

    /// Get the total number of probes
    pub fn total_probes(&self) -> usize {
        self.header.total_probes
    }

    /// Get the total number of samples
    pub fn total_samples(&self) -> u64 {
        self.header.total_samples
    }

    /// Get the sample rate in Hz
    pub fn samplerate_hz(&self) -> f64 {
        self.header.samplerate_hz
    }

    /// Sample rate rounded to whole Hz
    pub fn sample_rate(&self) -> u64 {
        self.header.samplerate_hz.round() as u64
    }

    /// Get the total capture duration in seconds
    pub fn capture_duration(&self) -> f64 {
        self.header.total_samples as f64 * self.header.sample_period
    }

    /// Find a probe by name, ignoring case
    pub fn probe_index(&self, name: &str) -> Option<usize> {
        self.header
            .probe_names
            .iter()
            .position(|probe| probe.eq_ignore_ascii_case(name))
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set maximum number of samples to read from file
    pub fn with_max_samples(mut self, max_samples: Option<u64>) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Stream the edges of `probe` into a new channel.
    pub fn subscribe(&mut self, probe: usize, capacity: usize) -> Result<Receiver<Edge>> {
        if probe >= self.header.total_probes {
            return Err(PdError::InvalidProbe(probe));
        }
        let mut sender = Sender::disconnected();
        let receiver = sender.subscribe(capacity);
        self.outputs.push(ProbeOutput {
            probe,
            sender,
            level: None,
            edges_sent: 0,
        });
        Ok(receiver)
    }

    fn load_block(&mut self, probe: usize, block_num: u64) -> Result<Arc<[u8]>> {
        let key = (probe, block_num);
        if let Some(data) = self.blocks.get(&key) {
            return Ok(Arc::clone(data));
        }

        let block_name = format!("L-{}/{}", probe, block_num);
        let mut file = self
            .archive
            .by_name(&block_name)
            .map_err(|_| PdError::InvalidBlock(block_num))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let data = Arc::<[u8]>::from(data);

        self.blocks.insert(key, Arc::clone(&data));
        Ok(data)
    }

    /// Read a single bit from a specific probe at a specific position
    pub fn read_bit(&mut self, probe: usize, position: u64) -> Result<bool> {
        if probe >= self.header.total_probes {
            return Err(PdError::InvalidProbe(probe));
        }
        if position >= self.header.total_samples {
            return Err(PdError::OutOfBounds(position));
        }

        let block_num = position / self.header.samples_per_block;
        if block_num >= self.header.total_blocks {
            return Err(PdError::OutOfBounds(position));
        }

        let sample_in_block = (position % self.header.samples_per_block) as usize;
        let data = self.load_block(probe, block_num)?;
        Ok(get_bit(&data, sample_in_block))
    }

    /// Read every edge of `probe` at once, without the streaming runtime.
    pub fn edges(&mut self, probe: usize) -> Result<Vec<Edge>> {
        if probe >= self.header.total_probes {
            return Err(PdError::InvalidProbe(probe));
        }

        let limit = self.sample_limit();
        let mut edges = Vec::new();
        let mut level = None;
        for block_num in 0..self.header.total_blocks {
            let block_start = block_num * self.header.samples_per_block;
            if block_start >= limit {
                break;
            }
            let data = self.load_block(probe, block_num)?;
            let count = ((data.len() * 8) as u64).min(limit - block_start);
            for offset in 0..count {
                let value = get_bit(&data, offset as usize);
                if level != Some(value) {
                    edges.push(Edge::new(block_start + offset, value));
                    level = Some(value);
                }
            }
            self.blocks.remove(&(probe, block_num));
        }

        debug!("[{}] Probe {}: {} edges", self.name, probe, edges.len());
        Ok(edges)
    }

    /// Number of samples to read, honouring `max_samples`
    fn sample_limit(&self) -> u64 {
        self.max_samples
            .unwrap_or(self.header.total_samples)
            .min(self.header.total_samples)
    }

    fn finish(&mut self) {
        for output in &self.outputs {
            info!(
                "[{}] Probe {} complete: {} edges sent",
                self.name, output.probe, output.edges_sent
            );
            output.sender.close();
        }
        self.outputs.clear();
    }

    // ── Associated Functions (Helpers) ──────────────────────────────────

    /// Parse a sample rate string (e.g., "50 MHz") into Hz
    fn parse_sample_rate(samplerate: &str) -> Option<f64> {
        let parts: Vec<&str> = samplerate.split_whitespace().collect();
        if parts.len() >= 2
            && let Ok(value) = parts[0].parse::<f64>()
        {
            let multiplier = match parts[1] {
                "GHz" => 1_000_000_000.0,
                "MHz" => 1_000_000.0,
                "KHz" | "kHz" => 1_000.0,
                "Hz" => 1.0,
                _ => return None,
            };
            return Some(value * multiplier);
        }
        None
    }
}

impl<R: Read + Seek + Send> ProcessNode for DslFileSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&mut self) -> WorkResult<usize> {
        let block_num = self.next_block;
        let block_start = block_num * self.header.samples_per_block;
        let limit = self.sample_limit();

        if self.outputs.is_empty() || block_num >= self.header.total_blocks || block_start >= limit {
            self.finish();
            return Err(WorkError::Shutdown);
        }

        if block_num == 0 {
            info!(
                "[{}] Streaming {} samples at {:.1} MHz ({} probes)",
                self.name,
                limit,
                self.header.samplerate_hz / 1_000_000.0,
                self.outputs.len()
            );
        }

        let mut sent = 0;
        for index in 0..self.outputs.len() {
            let probe = self.outputs[index].probe;
            let data = match self.load_block(probe, block_num) {
                Ok(data) => data,
                Err(e) => {
                    debug!("[{}] Probe {} block {}: {}, stopping", self.name, probe, block_num, e);
                    self.finish();
                    return Err(WorkError::Shutdown);
                }
            };
            let capacity = (data.len() * 8) as u64;
            let count = capacity.min(limit - block_start);
            sent += self.outputs[index].walk(&data, block_start, count)?;
            // Streamed blocks are read once
            self.blocks.remove(&(probe, block_num));
        }

        if block_num > 0 && block_num % 10 == 0 {
            debug!(
                "[{}] Progress: block {}/{}",
                self.name, block_num, self.header.total_blocks
            );
        }

        self.next_block += 1;
        Ok(sent)
    }
}
