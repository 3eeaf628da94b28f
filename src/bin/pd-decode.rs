//! Decode USB Power Delivery traffic from a DSLogic capture
//!
//! Usage:
//!   cargo run --release --bin pd-decode -- \
//!       --file capture.dsl --cc1 CC1 --cc2 CC2
//!
//! With CSV output (one file per CC line when both are decoded):
//!   cargo run --release --bin pd-decode -- \
//!       --file capture.dsl --cc1 0 \
//!       --csv-output pd.csv

use clap::Parser;
use pdbmc::runtime::{ProcessNode, Receiver, Scheduler, WorkError, WorkResult};
use pdbmc::{
    Category, DecoderConfig, DslFileSource, PdDecoder, PdDecoderNode, WindowOutcome, WindowReport,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to DSL file
    #[arg(short, long)]
    file: PathBuf,

    /// CC1 probe, by index or name
    #[arg(long, default_value = "CC1")]
    cc1: String,

    /// CC2 probe, by index or name (optional)
    #[arg(long)]
    cc2: Option<String>,

    /// BMC half-cell duration in microseconds
    #[arg(long, default_value_t = pdbmc::nodes::decoders::config::DEFAULT_UNIT_INTERVAL_US)]
    unit_interval_us: f64,

    /// Fraction of start-of-packet symbols that must match
    #[arg(long, default_value = "0.75")]
    sop_tolerance: f64,

    /// Idle time, in BMC half-cells (UI), that ends a capture window
    #[arg(long, default_value = "3.0")]
    idle_timeout_ui: f64,

    /// Maximum number of samples to read (0 = whole capture)
    #[arg(short, long, default_value = "0")]
    n: u64,

    /// Edge channel capacity
    #[arg(long, default_value = "65536")]
    buffer: usize,

    /// CSV output file path (optional)
    #[arg(long)]
    csv_output: Option<PathBuf>,
}

/// Sink that prints the reports of one CC line and optionally logs them as CSV
struct ReportPrinter {
    name: String,
    line: String,
    input: Receiver<WindowReport>,
    sample_rate: u64,
    csv: Option<BufWriter<File>>,
    windows: usize,
    frames: usize,
    invalid: usize,
    resets: usize,
    junk: usize,
}

impl ReportPrinter {
    fn new(line: &str, input: Receiver<WindowReport>, sample_rate: u64) -> Self {
        Self {
            name: format!("{}_printer", line),
            line: line.to_string(),
            input,
            sample_rate,
            csv: None,
            windows: 0,
            frames: 0,
            invalid: 0,
            resets: 0,
            junk: 0,
        }
    }

    fn with_csv(mut self, path: &Path) -> Result<Self, std::io::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        // Write CSV header
        writeln!(
            writer,
            "Id,Line,Start,End,Time[ms],Outcome,Message,Words,CRC,Valid,Bitrate,Anomalies"
        )?;

        self.csv = Some(writer);
        Ok(self)
    }

    fn print(&self, report: &WindowReport) {
        for annotation in &report.annotations {
            debug!("[{}] {}", self.line, annotation);
        }
        let rows = [Category::Frame, Category::Reset, Category::Warning];
        for annotation in report
            .annotations
            .iter()
            .filter(|a| rows.contains(&a.category))
        {
            println!("{:>4} {}", self.line, annotation.label());
        }
    }

    fn write_csv(&mut self, report: &WindowReport) -> std::io::Result<()> {
        let Some(writer) = self.csv.as_mut() else {
            return Ok(());
        };

        let time_ms = report.start_sample as f64 * 1000.0 / self.sample_rate.max(1) as f64;
        let message = report
            .annotations
            .iter()
            .find(|a| matches!(a.category, Category::SourceMessage | Category::SinkMessage))
            .map(|a| a.label().to_string());
        let (outcome, words, crc, valid) = match &report.outcome {
            WindowOutcome::Frame(frame) => (
                frame.sop.name().to_string(),
                frame
                    .words
                    .iter()
                    .map(|w| format!("{:08x}", w))
                    .collect::<Vec<_>>()
                    .join(" "),
                format!("{:08x}", frame.checksum),
                frame.valid,
            ),
            WindowOutcome::Reset(sop) => (sop.name().to_string(), String::new(), String::new(), true),
            WindowOutcome::Junk => ("junk".to_string(), String::new(), String::new(), false),
        };

        writeln!(
            writer,
            "{},{},{},{},{:.3},{},\"{}\",{},{},{},{},{}",
            self.windows,
            self.line,
            report.start_sample,
            report.end_sample,
            time_ms,
            outcome,
            message.unwrap_or_default(),
            words,
            crc,
            valid,
            report.bitrate.map(|b| b.to_string()).unwrap_or_default(),
            report.diagnostics.total()
        )
    }

    fn finish(&mut self) -> WorkResult<usize> {
        if let Some(writer) = self.csv.as_mut() {
            writer
                .flush()
                .map_err(|e| WorkError::NodeError(format!("CSV flush error: {}", e)))?;
        }
        info!(
            "[{}] {} windows: {} frames ({} invalid), {} resets, {} junk",
            self.line, self.windows, self.frames, self.invalid, self.resets, self.junk
        );
        Err(WorkError::Shutdown)
    }
}

impl ProcessNode for ReportPrinter {
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&mut self) -> WorkResult<usize> {
        let report = match self.input.recv() {
            Ok(report) => report,
            Err(WorkError::Shutdown) => return self.finish(),
            Err(e) => return Err(e),
        };

        self.windows += 1;
        match &report.outcome {
            WindowOutcome::Frame(frame) => {
                self.frames += 1;
                if !frame.valid {
                    self.invalid += 1;
                }
            }
            WindowOutcome::Reset(_) => self.resets += 1,
            WindowOutcome::Junk => self.junk += 1,
        }

        self.print(&report);
        self.write_csv(&report)
            .map_err(|e| WorkError::NodeError(format!("CSV write error: {}", e)))?;

        Ok(1)
    }
}

/// Resolve a probe given as an index or a name
fn resolve_probe(source: &DslFileSource, probe: &str) -> Result<usize, Box<dyn std::error::Error>> {
    if let Ok(index) = probe.parse::<usize>() {
        return Ok(index);
    }
    source.probe_index(probe).ok_or_else(|| {
        format!(
            "No probe named {:?}; available: {}",
            probe,
            source.header().probe_names.join(", ")
        )
        .into()
    })
}

/// `pd.csv` becomes `pd_cc2.csv` when more than one line is decoded
fn csv_path(base: &Path, line: &str, multiple: bool) -> PathBuf {
    if !multiple {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pd".to_string());
    let file_name = match base.extension() {
        Some(ext) => format!("{}_{}.{}", stem, line, ext.to_string_lossy()),
        None => format!("{}_{}", stem, line),
    };
    base.with_file_name(file_name)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== USB-PD Decode ===");
    info!("File: {}", args.file.display());

    let max_samples = (args.n > 0).then_some(args.n);
    let mut source = DslFileSource::new(&args.file)?.with_max_samples(max_samples);
    let sample_rate = source.sample_rate();
    info!(
        "Capture: {} probes, {} samples at {} ({:.3}s)",
        source.total_probes(),
        source.total_samples(),
        source.header().samplerate,
        source.capture_duration()
    );

    let config = DecoderConfig::new(sample_rate)
        .with_unit_interval_us(args.unit_interval_us)
        .with_sop_match_tolerance(args.sop_tolerance)
        .with_idle_timeout_ui(args.idle_timeout_ui);

    let mut lines = vec![("cc1", resolve_probe(&source, &args.cc1)?)];
    if let Some(cc2) = &args.cc2 {
        lines.push(("cc2", resolve_probe(&source, cc2)?));
    }
    let multiple = lines.len() > 1;

    let mut scheduler = Scheduler::new();
    for (line, probe) in &lines {
        info!(
            "{}: probe {} ({})",
            line.to_uppercase(),
            probe,
            source
                .header()
                .probe_names
                .get(*probe)
                .map(String::as_str)
                .unwrap_or("?")
        );

        let edges = source.subscribe(*probe, args.buffer)?;
        let (report_tx, report_rx) = pdbmc::bounded(1024);
        let decoder = PdDecoder::new(config.clone())?.with_name(format!("{}_decoder", line));
        scheduler.start_process(Box::new(PdDecoderNode::new(decoder, edges, report_tx)));

        let mut printer = ReportPrinter::new(line, report_rx, sample_rate);
        if let Some(base) = &args.csv_output {
            let path = csv_path(base, line, multiple);
            info!("{}: writing CSV to {}", line.to_uppercase(), path.display());
            printer = printer.with_csv(&path)?;
        }
        scheduler.start_process(Box::new(printer));
    }

    scheduler.start_process(Box::new(source.with_name("dsl_source")));

    info!("Running {} nodes", scheduler.num_threads());
    scheduler.wait();
    info!("Done");

    Ok(())
}
