//! Usvdetect - ultrasonic vocalization detector
//!
//! Entry point for the command-line front end.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use usvdetect::audio::recorder::Recorder;
use usvdetect::audio::source::{AudioSource, BufferSource, CpalSource};
use usvdetect::pulse::gpio::{DryRunSink, SysfsGpio};
use usvdetect::pulse::PulseSink;
use usvdetect::sink::ResultSink;
use usvdetect::{
    analyze_buffer, AudioBuffer, DetectionReport, DetectorConfig, DetectorError, LiveDetector,
    SessionState, SessionStats,
};

#[derive(Parser)]
#[command(name = "usvdetect")]
#[command(about = "Detect ultrasonic vocalizations in recordings or live audio")]
#[command(version)]
struct Cli {
    /// Config file (default: <data dir>/usvdetect/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a WAV file and print or save the detection report
    Analyze {
        /// WAV file to analyze
        input: PathBuf,

        /// Write the report here instead of printing it
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the detected spans, concatenated, to this WAV file
        #[arg(long)]
        extract: Option<PathBuf>,

        #[command(flatten)]
        detection: DetectionArgs,
    },

    /// Detect live and pulse the output line on every event onset
    Live {
        /// Log pulses instead of driving GPIO
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,

        /// Input device name (default: system default input)
        #[arg(long)]
        device: Option<String>,

        /// Feed a WAV file through the live pipeline in real time
        #[arg(long, conflicts_with = "device")]
        replay: Option<PathBuf>,

        #[command(flatten)]
        detection: DetectionArgs,

        #[command(flatten)]
        live: LiveArgs,
    },

    /// Record a fixed duration from the input device to a WAV file
    Record {
        /// Output WAV file
        output: PathBuf,

        /// Recording length in seconds
        #[arg(long)]
        seconds: f64,

        /// Input device name (default: system default input)
        #[arg(long)]
        device: Option<String>,

        /// Capture rate in Hz (default: configured primary rate)
        #[arg(long)]
        sample_rate: Option<u32>,
    },

    /// List input devices
    Devices,

    /// Print the effective configuration
    Config {
        /// Persist the effective configuration
        #[arg(long)]
        save: bool,

        #[command(flatten)]
        detection: DetectionArgs,

        #[command(flatten)]
        live: LiveArgs,
    },
}

/// Overrides shared by both pipelines
#[derive(clap::Args, Debug, Default)]
struct DetectionArgs {
    /// Band RMS threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Lower edge of the ultrasonic band in kHz
    #[arg(long)]
    min_freq_khz: Option<f64>,

    /// File-mode window length in milliseconds
    #[arg(long)]
    window_ms: Option<f64>,

    /// File-mode window overlap in percent
    #[arg(long)]
    overlap: Option<f64>,
}

impl DetectionArgs {
    fn apply(&self, config: &mut DetectorConfig) {
        if let Some(threshold) = self.threshold {
            config.threshold_rms = threshold;
        }
        if let Some(khz) = self.min_freq_khz {
            config.min_freq_hz = khz * 1000.0;
        }
        if let Some(ms) = self.window_ms {
            config.window_ms = ms;
        }
        if let Some(pct) = self.overlap {
            config.hop_overlap_pct = pct;
        }
    }
}

/// Live pipeline overrides
#[derive(clap::Args, Debug, Default)]
struct LiveArgs {
    /// GPIO pin to pulse
    #[arg(long)]
    pin: Option<u32>,

    /// Pulse length in milliseconds
    #[arg(long)]
    pulse_ms: Option<f64>,

    /// Primary capture rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Samples per analyzed block
    #[arg(long)]
    block_size: Option<usize>,
}

impl LiveArgs {
    fn apply(&self, config: &mut DetectorConfig) {
        if let Some(pin) = self.pin {
            config.pulse_pin_id = pin;
        }
        if let Some(ms) = self.pulse_ms {
            config.pulse_duration_s = ms / 1000.0;
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("usvdetect=info".parse()?)
                .add_directive("usvdetect_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!("usvdetect {} (built {})", usvdetect::VERSION, usvdetect::BUILD_DATE);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            input,
            report,
            extract,
            detection,
        } => {
            let mut config = config;
            detection.apply(&mut config);
            run_analyze(&config, &input, report.as_deref(), extract.as_deref())
        }
        Commands::Live {
            dry_run,
            seconds,
            device,
            replay,
            detection,
            live,
        } => {
            let mut config = config;
            detection.apply(&mut config);
            live.apply(&mut config);
            run_live(config, dry_run, seconds, device, replay.as_deref())
        }
        Commands::Record {
            output,
            seconds,
            device,
            sample_rate,
        } => run_record(&config, &output, seconds, device, sample_rate),
        Commands::Devices => list_devices(),
        Commands::Config {
            save,
            detection,
            live,
        } => {
            let mut config = config;
            detection.apply(&mut config);
            live.apply(&mut config);
            config.validate()?;
            println!("{}", config.to_json()?);
            if save {
                let path = cli.config.unwrap_or_else(DetectorConfig::path);
                config
                    .save(&path)
                    .with_context(|| format!("failed to save config to {}", path.display()))?;
                println!("Saved to {}", path.display());
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(path) => DetectorConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(DetectorConfig::load()),
    }
}

/// Prints file-mode progress to stderr in whole percent steps
#[derive(Default)]
struct ProgressPrinter {
    last_pct: Option<u32>,
}

impl ResultSink for ProgressPrinter {
    fn on_progress(&mut self, pct: f64) {
        let whole = pct.floor() as u32;
        if self.last_pct != Some(whole) {
            eprint!("\rAnalyzing: {:>3}%", whole);
            self.last_pct = Some(whole);
            if whole >= 100 {
                eprintln!();
            }
        }
    }
}

fn run_analyze(
    config: &DetectorConfig,
    input: &Path,
    report_path: Option<&Path>,
    extract_path: Option<&Path>,
) -> Result<()> {
    let buffer = AudioBuffer::from_wav(input)
        .with_context(|| format!("failed to load {}", input.display()))?;
    info!(
        "Loaded {} ({:.2}s @ {} Hz)",
        input.display(),
        buffer.duration_s(),
        buffer.sample_rate()
    );

    let mut progress = ProgressPrinter::default();
    let events = analyze_buffer(&buffer, config, &mut progress).context("analysis failed")?;

    let report = DetectionReport::new(buffer.sample_rate(), config, &events).with_source(input);
    match report_path {
        Some(path) => {
            report
                .save(path)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("{} detections, report written to {}", events.len(), path.display());
        }
        None => print!("{}", report.render()?),
    }

    if let Some(path) = extract_path {
        let spans = buffer.detected_spans(&events);
        if spans.is_empty() {
            println!("No detections, nothing extracted");
        } else {
            spans
                .write_wav(path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "Extracted {:.2}s of detected audio to {}",
                spans.duration_s(),
                path.display()
            );
        }
    }

    Ok(())
}

/// Flag cleared by Ctrl+C
fn install_ctrlc() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }
    running
}

fn run_live(
    mut config: DetectorConfig,
    dry_run: bool,
    seconds: Option<f64>,
    device: Option<String>,
    replay: Option<&Path>,
) -> Result<()> {
    let limit = seconds.map(run_length).transpose()?;
    let source: Arc<dyn AudioSource> = match replay {
        Some(path) => {
            let buffer = AudioBuffer::from_wav(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.sample_rate = buffer.sample_rate();
            config.fallback_sample_rate = buffer.sample_rate();
            Arc::new(BufferSource::paced(buffer))
        }
        None => match device {
            Some(name) => Arc::new(CpalSource::with_device(name)),
            None => Arc::new(CpalSource::new()),
        },
    };
    let sink: Box<dyn PulseSink> = if dry_run {
        Box::new(DryRunSink::new())
    } else {
        Box::new(SysfsGpio::new())
    };

    let block_size = config.block_size;
    let mut detector = LiveDetector::new(config, source, sink);
    if let Err(e) = detector.start() {
        if matches!(e, DetectorError::HardwareHandle(_)) {
            println!("Hint: use --dry-run on machines without GPIO");
        }
        return Err(e).context("failed to start live session");
    }

    let sample_rate = detector.sample_rate().unwrap_or_default();
    let mut stats = SessionStats::new();
    stats.set_session_info(sample_rate, block_size);

    println!(
        "Listening at {} Hz, {} samples per block ({:.1} ms). Press Ctrl+C to stop.",
        sample_rate,
        block_size,
        block_size as f64 * 1000.0 / sample_rate.max(1) as f64
    );
    println!();
    println!("Status:");
    println!("────────────────────────────────────────");

    let running = install_ctrlc();
    let started = Instant::now();
    let mut last_status = String::new();
    let mut failure = None;

    while running.load(Ordering::SeqCst) {
        detector.drain_updates(&mut stats);

        match detector.refresh() {
            SessionState::Running => {}
            SessionState::Error => {
                failure = detector.last_error().map(str::to_string);
                break;
            }
            _ => {
                println!("Input ended.");
                break;
            }
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }

        let s = stats.stats();
        if s.blocks > 0 {
            let status_line = format!(
                "RMS: {:>10.4} | Peak: {:>8.1} Hz | Events: {:>4} | Pulses: {:>4} | {}",
                s.current_rms,
                s.last_peak_hz,
                s.onsets,
                s.pulses,
                if s.in_event { "USV" } else { "quiet" }
            );

            // Only print if changed (reduce spam)
            if status_line != last_status {
                println!("{}", status_line);
                last_status = status_line;
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    println!();
    println!("Stopping...");
    detector.stop();
    detector.drain_updates(&mut stats);

    let s = stats.stats();
    println!(
        "{} blocks, {} events, {} pulses, max RMS {:.4}",
        s.blocks, s.onsets, s.pulses, s.max_rms
    );
    if let Some(summary) = detector.last_summary() {
        if summary.pulses_dropped > 0 {
            println!("{} onsets arrived while the line was busy", summary.pulses_dropped);
        }
    }
    if detector.dropped_updates() > 0 {
        warn!("{} block updates were dropped", detector.dropped_updates());
    }

    match failure {
        Some(message) => Err(anyhow!("live session failed: {}", message)),
        None => {
            println!("Done.");
            Ok(())
        }
    }
}

/// Parse a `--seconds` value into a duration
fn run_length(seconds: f64) -> Result<Duration> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(anyhow!("--seconds must be positive, got {}", seconds));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| anyhow!("--seconds {}: {}", seconds, e))
}

fn run_record(
    config: &DetectorConfig,
    output: &Path,
    seconds: f64,
    device: Option<String>,
    sample_rate: Option<u32>,
) -> Result<()> {
    let duration = run_length(seconds)?;
    let source: Arc<dyn AudioSource> = match device {
        Some(name) => Arc::new(CpalSource::with_device(name)),
        None => Arc::new(CpalSource::new()),
    };
    let sample_rate = sample_rate.unwrap_or(config.sample_rate);

    println!("Recording {:.1}s at {} Hz. Press Ctrl+C to stop early.", seconds, sample_rate);
    let handle = Recorder::new(source, sample_rate, duration)
        .with_probe_timeout(config.probe_timeout())
        .start()?;

    let running = install_ctrlc();
    while handle.is_alive() {
        if !running.load(Ordering::SeqCst) {
            handle.stop();
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let buffer = handle.wait().context("recording failed")?;
    buffer
        .write_wav(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Wrote {:.2}s ({} samples) to {}",
        buffer.duration_s(),
        buffer.len(),
        output.display()
    );
    Ok(())
}

fn list_devices() -> Result<()> {
    println!("Scanning for input devices...");
    println!();

    let devices = CpalSource::list_devices().context("failed to list input devices")?;
    if devices.is_empty() {
        println!("No input devices found.");
    } else {
        println!("Found {} device(s):", devices.len());
        for (i, name) in devices.iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
    }
    Ok(())
}
