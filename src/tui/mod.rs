mod help;
mod state;

use crate::cli::Cli;
use crate::engine::validate;
use crate::model::{QueryEvent, StageState, MAX_QUESTION_CHARS};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{AnswerView, Focus, UiState, EXAMPLE_QUESTIONS};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure and task switching in the hot path.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<QueryEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&args, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    mut event_rx: UnboundedReceiver<QueryEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        base_url: args.base_url.clone(),
        ..Default::default()
    };
    if let Some(q) = args.question.as_deref() {
        for c in q.chars() {
            state.push_question_char(c);
        }
    }
    if let Some(p) = args.image.as_ref() {
        state.set_image_path(p.display().to_string());
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive; unbounded channel avoids backpressure.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(k, &mut state, &cmd_tx) {
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

/// Dispatch one key press. Returns true when the app should exit.
fn handle_key(k: KeyEvent, state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>) -> bool {
    // Ctrl-C quits regardless of which field has focus.
    if k.modifiers == KeyModifiers::CONTROL && k.code == KeyCode::Char('c') {
        let _ = cmd_tx.send(UiCommand::Quit);
        return true;
    }

    match state.focus {
        Focus::Question => match k.code {
            KeyCode::Esc => state.focus = Focus::None,
            KeyCode::Enter => {
                state.focus = Focus::None;
                try_submit(state, cmd_tx);
            }
            KeyCode::Backspace => state.pop_question_char(),
            KeyCode::Char(c) => state.push_question_char(c),
            _ => {}
        },
        Focus::ImagePath => match k.code {
            KeyCode::Esc => state.focus = Focus::None,
            KeyCode::Enter => {
                state.focus = Focus::None;
                state.set_image_path(state.image_path.clone());
            }
            KeyCode::Backspace => {
                state.image_path.pop();
            }
            KeyCode::Char(c) => state.image_path.push(c),
            _ => {}
        },
        Focus::None => match (k.modifiers, k.code) {
            (_, KeyCode::Char('q')) => {
                let _ = cmd_tx.send(UiCommand::Quit);
                return true;
            }
            (_, KeyCode::Tab) => {
                state.tab = (state.tab + 1) % 2;
            }
            (_, KeyCode::Char('?')) => {
                state.tab = 1;
            }
            (_, KeyCode::Char('i')) => {
                state.focus = Focus::ImagePath;
            }
            (_, KeyCode::Char('e')) | (_, KeyCode::Char('/')) => {
                state.focus = Focus::Question;
            }
            (_, KeyCode::Char(c @ '1'..='5')) => {
                state.use_example(c as usize - '1' as usize);
            }
            (_, KeyCode::Enter) | (_, KeyCode::Char('s')) => {
                try_submit(state, cmd_tx);
            }
            (_, KeyCode::Char('c')) => {
                if state.loading {
                    state.info = "Canceling…".into();
                    let _ = cmd_tx.send(UiCommand::Cancel);
                }
            }
            (_, KeyCode::Char('x')) => {
                let _ = cmd_tx.send(UiCommand::Reset);
                state.reset();
            }
            (_, KeyCode::Char('y')) => {
                if let Some(result) = state.result.as_ref() {
                    match copy_to_clipboard(&result.answer) {
                        Ok(()) => state.info = "✓ Answer copied to clipboard".into(),
                        Err(e) => state.info = format!("Clipboard copy failed: {e:#}"),
                    }
                } else {
                    state.info = "No answer to copy yet.".into();
                }
            }
            _ => {}
        },
    }
    false
}

/// Validate the two inputs locally, then hand the submission to the
/// controller. Invalid inputs surface inline and never reach the network.
fn try_submit(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>) {
    let question = state.question.trim().to_string();
    let image_path = state.image_path.trim().to_string();
    if question.is_empty() || image_path.is_empty() {
        state.error = Some(validate::MISSING_INPUTS_MSG.to_string());
        state.result = None;
        state.loading = false;
        return;
    }
    state.error = None;
    state.info = "Submitting…".into();
    let _ = cmd_tx.send(UiCommand::Submit {
        image_path: PathBuf::from(image_path),
        question,
    });
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Query"), Line::from("Help")])
        .select(state.tab)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("assistive-vqa-cli"),
        )
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_query(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }

    draw_status(chunks[2], f, state);
}

fn draw_query(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)].as_ref())
        .split(area);

    let inputs = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(5),
                Constraint::Length(6),
                Constraint::Min(0),
            ]
            .as_ref(),
        )
        .split(columns[0]);

    draw_image_input(inputs[0], f, state);
    draw_question_input(inputs[1], f, state);
    draw_examples(inputs[2], f);
    draw_answer(columns[1], f, state);
}

fn field_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn draw_image_input(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let focused = state.focus == Focus::ImagePath;
    let mut lines = vec![Line::from(if state.image_path.is_empty() {
        Span::styled(
            "press 'i' to enter an image path",
            Style::default().fg(Color::DarkGray),
        )
    } else {
        Span::raw(state.image_path.clone())
    })];
    if let Some(note) = state.image_note.as_deref() {
        let color = if state.image_valid {
            Color::Green
        } else {
            Color::Red
        };
        lines.push(Line::from(Span::styled(
            note.to_string(),
            Style::default().fg(color),
        )));
    }

    let title = if focused { "Image (editing)" } else { "Image" };
    let p = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(field_style(focused)),
    );
    f.render_widget(p, area);
}

fn draw_question_input(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let focused = state.focus == Focus::Question;
    let body = if state.question.is_empty() {
        Line::from(Span::styled(
            "press 'e' to type a question",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Line::from(Span::raw(state.question.clone()))
    };

    let title = Line::from(vec![
        Span::raw(if focused {
            "Question (Enter submits) "
        } else {
            "Question "
        }),
        Span::styled(
            format!("{}/{}", state.question.chars().count(), MAX_QUESTION_CHARS),
            Style::default().fg(Color::Gray),
        ),
    ]);
    let p = Paragraph::new(vec![body]).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(field_style(focused)),
    );
    f.render_widget(p, area);
}

fn draw_examples(area: Rect, f: &mut ratatui::Frame) {
    let lines: Vec<Line> = EXAMPLE_QUESTIONS
        .iter()
        .enumerate()
        .map(|(i, q)| {
            Line::from(vec![
                Span::raw("  "),
                Span::styled(format!("{}", i + 1), Style::default().fg(Color::Magenta)),
                Span::raw("  "),
                Span::raw(*q),
            ])
        })
        .collect();
    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Example questions"),
    );
    f.render_widget(p, area);
}

fn stage_glyph(state: StageState) -> (&'static str, Color) {
    match state {
        StageState::Pending => ("○", Color::DarkGray),
        StageState::Active => ("◐", Color::Yellow),
        StageState::Done => ("●", Color::Green),
        StageState::Error => ("✗", Color::Red),
    }
}

fn draw_answer(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    match state.answer_view() {
        AnswerView::Idle => {
            let p = Paragraph::new(vec![
                Line::from(""),
                Line::from(Span::styled(
                    "Set an image and a question, then press Enter.",
                    Style::default().fg(Color::DarkGray),
                )),
            ])
            .block(Block::default().borders(Borders::ALL).title("Answer"));
            f.render_widget(p, area);
        }
        AnswerView::Progress => draw_progress(area, f, state),
        AnswerView::Error => {
            let msg = state.error.as_deref().unwrap_or("Unknown error");
            let p = Paragraph::new(vec![
                Line::from(""),
                Line::from(Span::styled(
                    msg.to_string(),
                    Style::default().fg(Color::Red),
                )),
            ])
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Error")
                    .border_style(Style::default().fg(Color::Red)),
            );
            f.render_widget(p, area);
        }
        AnswerView::Success => draw_success(area, f, state),
    }
}

fn draw_progress(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = vec![Line::from("")];
    for entry in &state.stages {
        let (glyph, color) = stage_glyph(entry.state);
        let mut spans = vec![
            Span::raw("  "),
            Span::styled(glyph, Style::default().fg(color)),
            Span::raw("  "),
            Span::raw(format!("{:<18}", entry.stage.label())),
        ];
        if let Some(hint) = entry.hint.as_deref() {
            spans.push(Span::styled(
                hint.to_string(),
                Style::default().fg(Color::Gray),
            ));
        }
        lines.push(Line::from(spans));
    }
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Processing"));
    f.render_widget(p, area);
}

fn draw_success(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(result) = state.result.as_ref() else {
        return;
    };

    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            result.answer.clone(),
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    if !result.module.is_empty() {
        lines.push(Line::from(vec![
            Span::styled("Module: ", Style::default().fg(Color::Gray)),
            Span::raw(result.module.clone()),
        ]));
    }
    lines.push(Line::from(vec![
        Span::styled("Latency: ", Style::default().fg(Color::Gray)),
        Span::raw(format!("{} ms", result.latency_ms.max(1))),
    ]));
    if !result.ocr_text.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Detected text",
            Style::default().fg(Color::Cyan),
        )));
        lines.push(Line::from(Span::raw(result.ocr_text.clone())));
    }
    if !result.vqa_answer.is_empty() && result.vqa_answer != result.answer {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Visual answer",
            Style::default().fg(Color::Cyan),
        )));
        lines.push(Line::from(Span::raw(result.vqa_answer.clone())));
    }
    if result.vqa_question_used != result.question {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled("Prompt used: ", Style::default().fg(Color::Gray)),
            Span::raw(result.vqa_question_used.clone()),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "press 'y' to copy the answer",
        Style::default().fg(Color::DarkGray),
    )));

    let p = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Answer")
            .border_style(Style::default().fg(Color::Green)),
    );
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let line = Line::from(vec![
        Span::styled("Service: ", Style::default().fg(Color::Gray)),
        Span::raw(state.base_url.clone()),
        Span::raw("   "),
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(state.info.clone()),
    ]);
    let status =
        Paragraph::new(vec![line]).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, area);
}

/// Initialize the clipboard manager thread if not already initialized.
/// A dedicated thread keeps each clipboard instance alive long enough for
/// clipboard managers on Linux to read the contents.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Copy text to clipboard. Returns immediately after queuing the operation.
fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}
