use crate::{
    config::Config,
    engine::{
        ConnectionDescriptor,
        helper::HelperBroker,
        process::{SofficeLauncher, resolve_soffice_exe},
    },
    executor::ConversionRequest,
    formats::InputFormats,
    report::ConversionReport,
    resolver::FilterTable,
    util::{ensure_dir, now_rfc3339},
    worker::Worker,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "office-pdf")]
#[command(about = "Convert office documents to PDF through a supervised headless LibreOffice")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./office-pdf.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert one document.
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Input filter to try; repeat to give several, in order.
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Convert several documents into one directory, reusing the engine.
    Batch {
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Start the engine, connect to it, and report what was found.
    Doctor {},
    /// Print the export capability table and the input filter map.
    Filters {},
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;

    match &args.cmd {
        Command::Convert {
            input,
            output,
            filters,
            timeout,
        } => convert(&cfg, input, output, filters, *timeout).await,
        Command::Batch {
            out_dir,
            filters,
            timeout,
            inputs,
        } => batch(&cfg, out_dir, filters, *timeout, inputs).await,
        Command::Doctor {} => doctor(&cfg).await,
        Command::Filters {} => filters(&cfg),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["office-pdf.toml", "office-pdf.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from("office-pdf.log"))
}

fn build_request(
    cfg: &Config,
    formats: &InputFormats,
    input: &Path,
    output: &Path,
    filters: &[String],
    timeout: Option<u64>,
) -> Result<ConversionRequest> {
    validate_input(cfg, input)?;
    let candidates = if filters.is_empty() {
        formats
            .for_path(input)
            .map(<[String]>::to_vec)
            .ok_or_else(|| anyhow!("no input filters known for {}; pass --filter", input.display()))?
    } else {
        filters.to_vec()
    };
    let timeout = timeout
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| cfg.conversion.timeout());
    Ok(ConversionRequest::new(input, output, candidates).with_timeout(timeout))
}

async fn run_one(worker: &Worker, req: &ConversionRequest, resubmits: u32) -> ConversionReport {
    let mut attempt = 0;
    loop {
        let started = now_rfc3339();
        let clock = Instant::now();
        let outcome = worker.convert(req).await;
        let report = ConversionReport::new(req, started, clock.elapsed(), &outcome);
        match outcome {
            Err(err) if err.is_retryable() && attempt < resubmits => {
                attempt += 1;
                warn!("resubmitting {} after: {err}", req.input.display());
            }
            _ => return report,
        }
    }
}

fn write_report(cfg: &Config, req: &ConversionRequest, report: &ConversionReport) -> Result<()> {
    if !cfg.output.write_report_json {
        return Ok(());
    }
    let mut name = req.output.clone().into_os_string();
    name.push(&cfg.output.report_suffix);
    std::fs::write(&name, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("writing report {}", PathBuf::from(&name).display()))?;
    Ok(())
}

async fn convert(
    cfg: &Config,
    input: &Path,
    output: &Path,
    filters: &[String],
    timeout: Option<u64>,
) -> Result<()> {
    let formats = InputFormats::from_config(cfg);
    let req = build_request(cfg, &formats, input, output, filters, timeout)?;

    let worker = Worker::from_config(cfg);
    let report = run_one(&worker, &req, cfg.conversion.resubmit_attempts).await;
    worker.shutdown().await;

    write_report(cfg, &req, &report)?;
    if cfg.output.print_summary {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if !report.is_ok() {
        return Err(anyhow!("conversion failed: {}", input.display()));
    }
    Ok(())
}

async fn batch(
    cfg: &Config,
    out_dir: &Path,
    filters: &[String],
    timeout: Option<u64>,
    inputs: &[PathBuf],
) -> Result<()> {
    ensure_dir(out_dir)?;
    let formats = InputFormats::from_config(cfg);
    let worker = Worker::from_config(cfg);

    let mut reports = Vec::with_capacity(inputs.len());
    let mut failed = 0usize;
    for (input, output) in inputs.iter().zip(batch_outputs(out_dir, inputs)) {
        let req = match build_request(cfg, &formats, input, &output, filters, timeout) {
            Ok(req) => req,
            Err(err) => {
                warn!("skipping {}: {err:#}", input.display());
                failed += 1;
                continue;
            }
        };
        let report = run_one(&worker, &req, cfg.conversion.resubmit_attempts).await;
        write_report(cfg, &req, &report)?;
        if !report.is_ok() {
            failed += 1;
        }
        reports.push(report);
    }
    worker.shutdown().await;

    info!("batch finished: {} inputs, {} failed", inputs.len(), failed);
    if cfg.output.print_summary {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failed > 0 {
        return Err(anyhow!("{failed} of {} conversions failed", inputs.len()));
    }
    Ok(())
}

/// One distinct PDF path in `out_dir` per input.
///
/// Inputs keep `<stem>.pdf` when no other input shares their stem. Otherwise the
/// full file name is kept (`a.docx.pdf`), with a `-N` suffix if even that repeats.
/// Names are compared case-insensitively.
pub fn batch_outputs(out_dir: &Path, inputs: &[PathBuf]) -> Vec<PathBuf> {
    let stem_of = |p: &Path| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    };
    let mut stem_counts: HashMap<String, usize> = HashMap::new();
    for input in inputs {
        *stem_counts.entry(stem_of(input).to_lowercase()).or_default() += 1;
    }

    let mut taken = HashSet::new();
    let mut outputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let stem = stem_of(input);
        let base = if stem_counts[&stem.to_lowercase()] == 1 {
            stem
        } else {
            input
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or(stem)
        };
        let mut name = base.clone();
        let mut n = 2;
        while !taken.insert(name.to_lowercase()) {
            name = format!("{base}-{n}");
            n += 1;
        }
        if name != stem_of(input) {
            debug!("{} -> {name}.pdf to avoid an output clash", input.display());
        }
        outputs.push(out_dir.join(format!("{name}.pdf")));
    }
    outputs
}

async fn doctor(cfg: &Config) -> Result<()> {
    let launcher = SofficeLauncher::new(
        resolve_soffice_exe(&cfg.engine.soffice_exe),
        cfg.engine.extra_args.clone(),
    );
    let broker = HelperBroker::from_config(cfg);
    let descriptor =
        ConnectionDescriptor::new(&cfg.engine.host, cfg.engine.port, &cfg.engine.protocol);

    let worker = Worker::from_config(cfg);
    let clock = Instant::now();
    let ready = worker.ensure_ready().await;
    let state = worker.state().await;
    worker.shutdown().await;

    let diag = serde_json::json!({
        "soffice_exe": launcher.exe(),
        "soffice_args": launcher.args(&descriptor),
        "python_exe": broker.python_exe(),
        "bridge_script": broker.script(),
        "bridge_script_exists": broker.script().exists(),
        "accept": descriptor.accept_string(),
        "state": state,
        "ok": ready.is_ok(),
        "error": ready.as_ref().err().map(|e| e.to_string()),
        "connect_ms": clock.elapsed().as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&diag)?);
    ready.map(|_| ()).context("engine not reachable")
}

fn filters(cfg: &Config) -> Result<()> {
    let table = FilterTable::default();
    let inputs: serde_json::Map<String, serde_json::Value> = InputFormats::from_config(cfg)
        .iter()
        .map(|(ext, filters)| (ext.clone(), serde_json::json!(filters)))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "export": table.entries(),
            "input": inputs,
        }))?
    );
    Ok(())
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    if !input.is_file() {
        return Err(anyhow!("input does not exist or is not a file: {}", input.display()));
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}
