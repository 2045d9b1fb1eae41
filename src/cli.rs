use crate::engine::{api, EngineControl, QueryEngine};
use crate::model::{QueryConfig, QueryEvent, StageState};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "assistive-vqa-cli",
    version,
    about = "Ask questions about an image via an OCR/VQA assistant service, with optional TUI"
)]
pub struct Cli {
    /// Image file to analyze
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Question to ask about the image (240 characters max)
    #[arg(long)]
    pub question: Option<String>,

    /// Base URL of the assistant service (ASSISTIVE_VQA_API_URL overrides the default)
    #[arg(long, default_value_t = api::default_base_url())]
    pub base_url: String,

    /// Print JSON result and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Check service health and module availability, then exit
    #[arg(long)]
    pub check: bool,

    /// Artificial delay between simulated progress substeps
    #[arg(long, default_value = "160ms")]
    pub stage_delay: humantime::Duration,

    /// Overall request timeout
    #[arg(long, default_value = "120s")]
    pub request_timeout: humantime::Duration,

    /// Submit immediately on launch when --image and --question are both set
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub query_on_launch: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.check {
        return run_check(&args).await;
    }

    // Silent mode takes precedence over other output modes
    if args.silent {
        return run_query_engine(args, true).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_query_engine(args, false).await;
    }

    run_text(args).await
}

/// Generate a random id used to correlate a submission in logs and output.
fn gen_request_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

fn user_agent() -> String {
    format!("assistive-vqa-cli/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a `QueryConfig` from CLI arguments and the submitted inputs.
pub fn build_config(args: &Cli, image_path: PathBuf, question: String) -> QueryConfig {
    QueryConfig {
        base_url: args.base_url.trim_end_matches('/').to_string(),
        request_id: gen_request_id(),
        image_path,
        question,
        stage_delay: Duration::from(args.stage_delay),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: user_agent(),
    }
}

fn require_inputs(args: &Cli) -> Result<(PathBuf, String)> {
    match (args.image.clone(), args.question.clone()) {
        (Some(image), Some(question)) => Ok((image, question)),
        _ => Err(anyhow::anyhow!(
            "Please provide both an image and a question (--image and --question)."
        )),
    }
}

/// Run a single query without the TUI and print the outcome as JSON.
/// `silent` suppresses all output; the exit code alone reports success.
async fn run_query_engine(args: Cli, silent: bool) -> Result<()> {
    let (image, question) = require_inputs(&args)?;
    let cfg = build_config(&args, image, question);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<QueryEvent>();
    let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    let engine = QueryEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

    // Stage progress is not printed in JSON mode; consume and drop.
    while let Some(_ev) = evt_rx.recv().await {}

    let outcome = handle
        .await
        .context("query task failed")?
        .map_err(anyhow::Error::new)?;

    if !silent {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}

async fn run_text(args: Cli) -> Result<()> {
    let (image, question) = require_inputs(&args)?;
    let cfg = build_config(&args, image, question);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<QueryEvent>();
    let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    let engine = QueryEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            QueryEvent::StagesInitialized => {
                let _ = out_tx.send(OutputLine::Stderr("== Query started ==".into()));
            }
            QueryEvent::StageUpdate { stage, state, hint } => {
                let state_str = match state {
                    StageState::Pending => "pending",
                    StageState::Active => "active",
                    StageState::Done => "done",
                    StageState::Error => "error",
                };
                let hint = hint.map(|h| format!(" ({h})")).unwrap_or_default();
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "{}: {state_str}{hint}",
                    stage.label()
                )));
            }
            QueryEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
            // One-shot mode reads the terminal state from the join result.
            QueryEvent::QueryCompleted { .. } | QueryEvent::QueryFailed { .. } => {}
        }
    }

    let res = handle.await.context("query task failed")?;
    match res {
        Ok(outcome) => {
            let summary = crate::text_summary::build_text_summary(&outcome);
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
            drop(out_tx);
            let _ = out_handle.await;
            Ok(())
        }
        Err(e) => {
            drop(out_tx);
            let _ = out_handle.await;
            Err(anyhow::Error::new(e))
        }
    }
}

/// Probe the service's health and module-availability endpoints.
async fn run_check(args: &Cli) -> Result<()> {
    let client = api::ApiClient::new(
        &args.base_url,
        &user_agent(),
        Duration::from(args.request_timeout),
    )?;

    let health = client.fetch_health().await?;
    let detail = health
        .message
        .map(|m| format!(" ({m})"))
        .unwrap_or_default();
    println!("Health: {}{detail}", health.status);

    let modules = client.fetch_modules().await?;
    println!(
        "OCR module: {}",
        if modules.ocr_available {
            "available"
        } else {
            "unavailable"
        }
    );
    println!(
        "VQA module: {}",
        if modules.vqa_available {
            "available"
        } else {
            "unavailable"
        }
    );
    if let Some(status) = modules.status {
        println!("Status: {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let args = Cli::parse_from(["assistive-vqa-cli"]);
        assert!(!args.json && !args.text && !args.silent && !args.check);
        assert_eq!(Duration::from(args.stage_delay), Duration::from_millis(160));
        assert_eq!(Duration::from(args.request_timeout), Duration::from_secs(120));
        assert!(args.query_on_launch);
    }

    #[test]
    fn build_config_maps_arguments() {
        let args = Cli::parse_from([
            "assistive-vqa-cli",
            "--base-url",
            "http://example.test:5001/",
            "--stage-delay",
            "50ms",
        ]);
        let cfg = build_config(
            &args,
            PathBuf::from("/tmp/photo.png"),
            "What is this?".into(),
        );
        assert_eq!(cfg.base_url, "http://example.test:5001");
        assert_eq!(cfg.question, "What is this?");
        assert_eq!(cfg.stage_delay, Duration::from_millis(50));
        assert!(!cfg.request_id.is_empty());
        assert!(cfg.request_id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn one_shot_modes_require_both_inputs() {
        let args = Cli::parse_from(["assistive-vqa-cli", "--question", "hi?"]);
        assert!(require_inputs(&args).is_err());
        let args = Cli::parse_from([
            "assistive-vqa-cli",
            "--image",
            "/tmp/a.png",
            "--question",
            "hi?",
        ]);
        assert!(require_inputs(&args).is_ok());
    }
}
