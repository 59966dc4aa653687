use crate::{
    config::Config,
    notify::LogNotifier,
    report::{JobReport, TranslationReport},
    session::AnalyzerSession,
    transport::{HttpTransport, Transport},
    translate::TranslationPipeline,
    types::{AnalysisOptions, AnalysisStatus, AnalysisTask, Credentials, DocumentSource},
    util::{ensure_dir, now_rfc3339, sha256_hex, write_output},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "paper-ingest")]
#[command(about = "Streamed document analysis, chunked translation and per-image analysis")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./paper-ingest.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a PDF (file or URL) and write the extracted text and images.
    Analyze {
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        input: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        /// Ask the server to translate while parsing.
        #[arg(long)]
        translate: bool,
        #[arg(long)]
        no_charts: bool,
        #[arg(long)]
        no_paper_analysis: bool,
        /// Translate the extracted text chunk by chunk afterwards.
        #[arg(long)]
        translate_after: bool,
        #[arg(long)]
        no_image_analysis: bool,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Translate a text file chunk by chunk.
    Translate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the server-side state of a task.
    Status {
        #[arg(long)]
        task_id: String,
    },
    /// Cancel a server-side task.
    Cancel {
        #[arg(long)]
        task_id: String,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = if cfg_path.exists() {
        Config::load(&cfg_path)?
    } else {
        Config::default()
    };

    match &args.cmd {
        Command::Analyze {
            input,
            url,
            translate,
            no_charts,
            no_paper_analysis,
            translate_after,
            no_image_analysis,
            out_dir,
        } => {
            let mut options = match (input, url) {
                (Some(path), _) => {
                    let bytes = tokio::fs::read(path)
                        .await
                        .with_context(|| format!("reading input: {}", path.display()))?;
                    let name = path
                        .file_name()
                        .and_then(|s| s.to_str())
                        .unwrap_or("document.pdf")
                        .to_string();
                    AnalysisOptions::file(name, bytes)
                }
                (None, Some(url)) => AnalysisOptions::url(url.clone()),
                (None, None) => return Err(anyhow!("either --input or --url is required")),
            };
            options.translate = *translate || cfg.analysis.translate;
            options.extract_charts = !*no_charts && cfg.analysis.extract_charts;
            options.enable_paper_analysis =
                !*no_paper_analysis && cfg.analysis.enable_paper_analysis;

            let run = AnalyzeRun {
                translate_after: *translate_after,
                analyze_images: !*no_image_analysis,
                out_dir: out_dir.clone(),
            };
            analyze(&args, &cfg, options, run).await
        }
        Command::Translate { input, out } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            translate(&cfg, input, out.as_deref()).await
        }
        Command::Status { task_id } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            let transport = HttpTransport::new(&cfg)?;
            let status = transport.task_status(task_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Cancel { task_id } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            let transport = HttpTransport::new(&cfg)?;
            let credentials = Credentials::new(cfg.resolve_api_key()?, "");
            transport.cancel_task(task_id, &credentials).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "task_id": task_id,
                    "status": "cancel requested"
                }))?
            );
            Ok(())
        }
    }
}

struct AnalyzeRun {
    translate_after: bool,
    analyze_images: bool,
    out_dir: Option<PathBuf>,
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("paper-ingest.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("paper-ingest.example.toml"))
    }
}

fn init_logging(
    args: &Args,
    cfg: &Config,
    file_path: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
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
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

/// Resolves `fut`, or `None` if Ctrl-C arrives first (dropping `fut`).
async fn until_interrupt<F: Future>(fut: F) -> Option<F::Output> {
    tokio::select! {
        out = fut => Some(out),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    }
}

async fn analyze(
    args: &Args,
    cfg: &Config,
    options: AnalysisOptions,
    run: AnalyzeRun,
) -> Result<()> {
    let credentials = cfg.resolve_credentials()?;

    let (source, job_key) = match &options.source {
        DocumentSource::File { name, bytes } => (name.clone(), sha256_hex(bytes)),
        DocumentSource::Url(url) => (url.trim().to_string(), sha256_hex(url.trim().as_bytes())),
    };
    let job_id = sha256_hex(format!("{}:{}", source, job_key).as_bytes());

    let out_root = run
        .out_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.output.out_dir));
    let job_dir = out_root.join(&job_id);
    ensure_dir(&job_dir)?;

    let log_path = resolve_log_path(cfg, Some(&job_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;
    info!("job_id={job_id} out={}", job_dir.display());

    let transport = Arc::new(HttpTransport::new(cfg)?);
    let session = AnalyzerSession::new(cfg, transport, Arc::new(LogNotifier));

    let mut updates = session.analysis.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last = (AnalysisStatus::Idle, u8::MAX);
        while updates.changed().await.is_ok() {
            let task: AnalysisTask = updates.borrow_and_update().clone();
            if (task.status, task.progress) != last {
                last = (task.status, task.progress);
                info!(status = %task.status, progress = task.progress, "{}", task.status_message);
            }
        }
    });

    let started = now_rfc3339();
    let outcome = until_interrupt(session.start_analysis(options, credentials.clone())).await;
    watcher.abort();

    let result = match outcome {
        None => {
            session.cancel().await;
            None
        }
        Some(Ok(result)) => result,
        Some(Err(err)) => {
            let report = JobReport::from_task(&job_id, &source, &session.analysis.snapshot());
            write_report(cfg, &job_dir, &report)?;
            return Err(anyhow::Error::new(err).context(format!("analysis of {source} failed")));
        }
    };

    let mut report = JobReport::from_task(&job_id, &source, &session.analysis.snapshot());
    let Some(result) = result else {
        write_report(cfg, &job_dir, &report)?;
        print_summary(&job_id, &job_dir, "cancelled")?;
        return Ok(());
    };

    let final_dir = job_dir.join("final");
    write_output(&final_dir, &cfg.output.original_filename, &result.original_text)?;

    if run.analyze_images {
        match until_interrupt(session.analyze_images(&credentials)).await {
            Some(summary) => report.image_walk = summary,
            None => session.images.abort_walk(),
        }
    }

    if run.translate_after && !result.original_text.trim().is_empty() {
        match until_interrupt(session.translate_result(&credentials)).await {
            Some(Ok(_)) => {}
            Some(Err(err)) => warn!("translation stopped: {err}"),
            None => session.translation.cancel(),
        }
        report.translation = Some(TranslationReport::from(&session.translation.snapshot()));
    }

    let translated = session.display_translation();
    if !translated.is_empty() {
        write_output(&final_dir, &cfg.output.translated_filename, &translated)?;
    }

    let images = session.images.annotated(&session.ordered_images());
    write_output(
        &final_dir,
        &cfg.output.images_filename,
        serde_json::to_string_pretty(&images)?,
    )?;
    write_report(cfg, &job_dir, &report)?;

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "job_id": job_id,
            "source": source,
            "remote_task_id": report.remote_task_id,
            "started": started,
            "finished": now_rfc3339(),
            "original": format!("final/{}", cfg.output.original_filename),
            "translated": (!translated.is_empty())
                .then(|| format!("final/{}", cfg.output.translated_filename)),
            "images": format!("final/{}", cfg.output.images_filename),
            "report": format!("final/{}", cfg.output.report_filename),
        });
        write_output(&job_dir, "index.json", serde_json::to_string_pretty(&index)?)?;
    }

    print_summary(&job_id, &job_dir, "ok")
}

async fn translate(cfg: &Config, input: &Path, out: Option<&Path>) -> Result<()> {
    let api_key = cfg.resolve_api_key()?;
    let text = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("reading input: {}", input.display()))?;

    let transport = Arc::new(HttpTransport::new(cfg)?);
    let pipeline =
        TranslationPipeline::new(transport, Arc::new(LogNotifier), cfg.translation.clone());

    let outcome = until_interrupt(pipeline.start(&text, &api_key)).await;
    if outcome.is_none() {
        pipeline.cancel();
    }
    let job = pipeline.snapshot();

    match out {
        Some(path) => {
            std::fs::write(path, &job.translated)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(
                "wrote {} of {} chunks to {}",
                job.chunks_done,
                job.chunks_total,
                path.display()
            );
        }
        None => println!("{}", job.translated),
    }

    match outcome {
        Some(Err(err)) => Err(anyhow::Error::new(err).context("translation failed")),
        _ => Ok(()),
    }
}

fn write_report(cfg: &Config, job_dir: &Path, report: &JobReport) -> Result<()> {
    write_output(
        &job_dir.join("final"),
        &cfg.output.report_filename,
        serde_json::to_string_pretty(report)?,
    )
}

fn print_summary(job_id: &str, job_dir: &Path, status: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "job_id": job_id,
            "job_dir": job_dir,
            "status": status
        }))?
    );
    Ok(())
}

fn resolve_log_path(cfg: &Config, job_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(job_dir) = job_dir {
        return Some(job_dir.join("logs").join("paper-ingest.log"));
    }

    Some(PathBuf::from(&cfg.output.out_dir).join("paper-ingest.log"))
}
