//! vidmark - circle people in a video file
//!
//! Runs one annotation job:
//! 1. Loads configuration (TOML file, `VIDMARK_*` env, command-line flags)
//! 2. Selects the detector backend from the registry
//! 3. Decodes the input, annotates every Nth frame, re-encodes to the output
//! 4. Reports progress on stderr and, with `--json`, as JSON lines on stdout

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use vidmark::notify::{JsonLinesObserver, LogObserver};
use vidmark::ui::Ui;
use vidmark::{CancelToken, JobId, JobRunner, Notifier, PipelineRunner, VidmarkConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input video file (or a stub:// locator).
    input: String,
    /// Output video file (or a stub:// locator).
    output: String,
    /// Job identifier; a random one is generated when omitted.
    #[arg(long)]
    job_id: Option<String>,
    /// TOML configuration file.
    #[arg(long, env = "VIDMARK_CONFIG")]
    config: Option<PathBuf>,
    /// Detector backend (noop|tract).
    #[arg(long)]
    backend: Option<String>,
    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Run detection on every Nth frame.
    #[arg(long)]
    stride: Option<u64>,
    /// Minimum (exclusive) detection confidence.
    #[arg(long)]
    threshold: Option<f32>,
    /// Emit job events as JSON lines on stdout.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = VidmarkConfig::load_with(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.detector.backend = backend;
    }
    if let Some(model) = args.model {
        config.detector.model_path = Some(model);
    }
    if let Some(stride) = args.stride {
        config.pipeline.sampling_stride = stride;
    }
    if let Some(threshold) = args.threshold {
        config.detector.confidence_threshold = threshold;
    }
    config.validate()?;

    let job_id = match args.job_id {
        Some(id) => JobId::new(id)?,
        None => JobId::generate(),
    };

    let registry = config.backend_registry()?;
    registry.warm_up_all()?;
    let backend = registry
        .default_backend()
        .context("no detector backend registered")?;
    log::info!(
        "vidmark {}: backend={} (available: {})",
        env!("CARGO_PKG_VERSION"),
        registry.default_name().unwrap_or("none"),
        registry.list().join(", ")
    );

    let notifier = Arc::new(Notifier::new());
    notifier.register(Arc::new(LogObserver));
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);
    notifier.register(Arc::new(ui.job_progress(job_id.as_str())));
    if args.json {
        notifier.register(Arc::new(JsonLinesObserver::new(std::io::stdout())));
    }

    let runner = PipelineRunner::new(config.pipeline_config(), backend, notifier)?;
    let jobs = JobRunner::new(runner);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling job");
        on_interrupt.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let handle = jobs.start_job_with_cancel(args.input, args.output, job_id, cancel)?;

    let report = handle.join()?;
    log::info!(
        "job {}: {} after {:.2?} ({} frames, {} sampled, {} subjects, {} detector failures)",
        report.job_id,
        report.status.label(),
        report.elapsed,
        report.frames_processed,
        report.frames_sampled,
        report.subjects_annotated,
        report.detector.frames_failed
    );

    match report.error_message() {
        None => Ok(()),
        Some(message) => Err(anyhow!("job {} failed: {}", report.job_id, message)),
    }
}
