//! Query lifecycle controller.
//!
//! Owns single-flight submit/cancel/reset orchestration and forwards engine
//! events to presentation layers. Last submit wins: a new submission cancels
//! the in-flight run and mutes its remaining events, so only the latest
//! outcome is ever rendered.

use crate::cli::{build_config, Cli};
use crate::engine::{EngineControl, QueryEngine, QueryError};
use crate::model::{FailureKind, InfoEvent, QueryConfig, QueryEvent, QueryOutcome};
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers to control the query lifecycle.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Submit {
        image_path: PathBuf,
        question: String,
    },
    Cancel,
    Reset,
    Quit,
}

/// Internal handle for a running query task.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    event_rx: UnboundedReceiver<QueryEvent>,
    handle: Option<tokio::task::JoinHandle<Result<QueryOutcome, QueryError>>>,
    /// Superseded or reset: drop remaining events instead of forwarding.
    muted: bool,
    events_done: bool,
}

/// Spawn a new query run and return its control handle.
fn start_run(args: &Cli, image_path: PathBuf, question: String) -> RunCtx {
    let cfg: QueryConfig = build_config(args, image_path, question);
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    let (run_tx, event_rx) = mpsc::unbounded_channel::<QueryEvent>();
    let engine = QueryEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(run_tx, ctrl_rx).await });
    RunCtx {
        ctrl_tx,
        event_rx,
        handle: Some(handle),
        muted: false,
        events_done: false,
    }
}

/// Orchestrate query runs based on UI commands and emit events back to
/// presentation layers.
pub(crate) async fn run_controller(
    args: &Cli,
    event_tx: UnboundedSender<QueryEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut current: Option<RunCtx> = match (&args.image, &args.question) {
        (Some(image), Some(question)) if args.query_on_launch => {
            Some(start_run(args, image.clone(), question.clone()))
        }
        _ => None,
    };
    let mut pending_submit: Option<(PathBuf, String)> = None;
    let mut quit_pending = false;

    loop {
        // Split the borrows up front: the event arm and the join arm each
        // poll a different field of the same run context.
        let (run_event_rx, run_handle) = match current.as_mut() {
            Some(ctx) if !ctx.events_done => (Some(&mut ctx.event_rx), ctx.handle.as_mut()),
            Some(ctx) => (None, ctx.handle.as_mut()),
            None => (None, None),
        };

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Submit { image_path, question }) => {
                        if let Some(ctx) = &mut current {
                            // Supersede the active run; its outcome is never rendered.
                            ctx.muted = true;
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            pending_submit = Some((image_path, question));
                        } else {
                            current = Some(start_run(args, image_path, question));
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        pending_submit = None;
                        if let Some(ctx) = &current {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            let _ = event_tx.send(QueryEvent::Info(InfoEvent::Message(
                                "Canceling…".into(),
                            )));
                        }
                    }
                    Some(UiCommand::Reset) => {
                        // The UI clears its own state; the dying run must not repaint it.
                        pending_submit = None;
                        if let Some(ctx) = &mut current {
                            ctx.muted = true;
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current run to finish so the engine task
                        // is never left dangling.
                        quit_pending = true;
                        pending_submit = None;
                        match &mut current {
                            Some(ctx) => {
                                ctx.muted = true;
                                let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            }
                            None => break Ok(()),
                        }
                    }
                }
            }
            ev = async {
                match run_event_rx {
                    Some(rx) => rx.recv().await,
                    None => futures::future::pending().await,
                }
            } => {
                if let Some(ctx) = &mut current {
                    match ev {
                        Some(ev) if !ctx.muted => { let _ = event_tx.send(ev); }
                        Some(_) => {}
                        // Engine finished; completion is observed on the join arm.
                        None => ctx.events_done = true,
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be
            // dropped if another select branch is chosen, and we'll never observe
            // completion.
            maybe_done = async {
                match run_handle {
                    Some(h) => Some(h.await),
                    None => futures::future::pending().await,
                }
            } => {
                if let Some(join_res) = maybe_done {
                    let mut muted = true;
                    if let Some(ctx) = &mut current {
                        ctx.handle.take();
                        // Flush stage events that raced with completion so they land
                        // before the terminal event.
                        while let Ok(ev) = ctx.event_rx.try_recv() {
                            if !ctx.muted {
                                let _ = event_tx.send(ev);
                            }
                        }
                        muted = ctx.muted;
                    }
                    if !muted {
                        match join_res {
                            Ok(Ok(outcome)) => {
                                let _ = event_tx.send(QueryEvent::QueryCompleted {
                                    result: Box::new(outcome),
                                });
                            }
                            Ok(Err(err)) => {
                                let _ = event_tx.send(QueryEvent::QueryFailed {
                                    kind: err.kind(),
                                    message: err.to_string(),
                                });
                            }
                            Err(e) => {
                                let _ = event_tx.send(QueryEvent::QueryFailed {
                                    kind: FailureKind::Application,
                                    message: format!("Query task failed: {e}"),
                                });
                            }
                        }
                    }
                    current = None;
                    if quit_pending {
                        break Ok(());
                    }
                    if let Some((image_path, question)) = pending_submit.take() {
                        current = Some(start_run(args, image_path, question));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn temp_image(name: &str) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("avqa-controller-{}-{name}", std::process::id()));
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nfake").unwrap();
        path
    }

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    async fn respond_canned(sock: &mut tokio::net::TcpStream, body: &str) {
        let mut buf = vec![0u8; 64 * 1024];
        let mut data = Vec::new();
        loop {
            let n = sock.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = find_subsequence(&data, b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&data[..pos]).to_ascii_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut remaining = content_length.saturating_sub(data.len() - (pos + 4));
                while remaining > 0 {
                    let n = sock.read(&mut buf).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    remaining = remaining.saturating_sub(n);
                }
                break;
            }
        }
        let resp = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        sock.write_all(resp.as_bytes()).await.unwrap();
        sock.shutdown().await.ok();
    }

    /// Server whose first connection stalls forever and whose later
    /// connections answer with a canned success payload.
    async fn stall_then_succeed() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut conn = 0usize;
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let first = conn == 0;
                conn += 1;
                tokio::spawn(async move {
                    if first {
                        let mut buf = vec![0u8; 4096];
                        while sock.read(&mut buf).await.unwrap_or(0) > 0 {}
                    } else {
                        respond_canned(
                            &mut sock,
                            r#"{"success":true,"answer":"ok","module":"vqa","details":{"vqa_answer":"ok"}}"#,
                        )
                        .await;
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    fn test_args(base_url: &str) -> Cli {
        Cli::parse_from([
            "assistive-vqa-cli",
            "--base-url",
            base_url,
            "--stage-delay",
            "1ms",
            "--query-on-launch",
            "false",
        ])
    }

    #[tokio::test]
    async fn second_submit_supersedes_first() {
        let base = stall_then_succeed().await;
        let image = temp_image("supersede.png");
        let args = test_args(&base);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<QueryEvent>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
        let ctrl = tokio::spawn(async move { run_controller(&args, event_tx, cmd_rx).await });

        cmd_tx
            .send(UiCommand::Submit {
                image_path: image.clone(),
                question: "first?".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        cmd_tx
            .send(UiCommand::Submit {
                image_path: image.clone(),
                question: "second?".into(),
            })
            .unwrap();

        // The only terminal event must belong to the second submission.
        let mut completed = None;
        while completed.is_none() {
            let ev = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
                .await
                .expect("controller went quiet")
                .expect("event channel closed");
            match ev {
                QueryEvent::QueryCompleted { result } => completed = Some(result),
                QueryEvent::QueryFailed { message, .. } => {
                    panic!("first run's failure leaked through: {message}")
                }
                _ => {}
            }
        }
        assert_eq!(completed.unwrap().question, "second?");

        cmd_tx.send(UiCommand::Quit).unwrap();
        ctrl.await.unwrap().unwrap();
        std::fs::remove_file(image).ok();
    }

    #[tokio::test]
    async fn reset_mutes_inflight_run() {
        let base = stall_then_succeed().await;
        let image = temp_image("reset.png");
        let args = test_args(&base);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<QueryEvent>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
        let ctrl = tokio::spawn(async move { run_controller(&args, event_tx, cmd_rx).await });

        cmd_tx
            .send(UiCommand::Submit {
                image_path: image.clone(),
                question: "doomed?".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Drain the pre-reset stage events, then reset.
        while event_rx.try_recv().is_ok() {}
        cmd_tx.send(UiCommand::Reset).unwrap();

        // The canceled run's error events must never surface.
        let leak = tokio::time::timeout(Duration::from_millis(400), event_rx.recv()).await;
        assert!(leak.is_err(), "muted run leaked an event: {leak:?}");

        cmd_tx.send(UiCommand::Quit).unwrap();
        ctrl.await.unwrap().unwrap();
        std::fs::remove_file(image).ok();
    }

    #[tokio::test]
    async fn quit_while_idle_exits_immediately() {
        let args = test_args("http://127.0.0.1:1");
        let (event_tx, _event_rx) = mpsc::unbounded_channel::<QueryEvent>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
        let ctrl = tokio::spawn(async move { run_controller(&args, event_tx, cmd_rx).await });
        cmd_tx.send(UiCommand::Quit).unwrap();
        tokio::time::timeout(Duration::from_secs(1), ctrl)
            .await
            .expect("controller did not exit")
            .unwrap()
            .unwrap();
    }
}
