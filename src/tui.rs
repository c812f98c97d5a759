use std::io;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;

use crate::core::control::RunState;
use crate::core::dispatcher::Dispatcher;
use crate::core::error::DispatchError;
use crate::core::event::{Completion, DispatchEvent, Progress};
use crate::core::formatter::{format_estimate, format_progress_line};
use crate::core::job::Task;

fn terminal_error(e: io::Error) -> DispatchError {
    DispatchError::Terminal {
        message: e.to_string(),
    }
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self, DispatchError> {
        enable_raw_mode().map_err(terminal_error)?;
        let mut stdout = io::stdout();
        if let Err(e) = stdout.execute(EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(terminal_error(e));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = stdout.execute(LeaveAlternateScreen);
    }
}

#[derive(Debug)]
struct AppState {
    task_id: i64,
    history: Vec<String>,
    progress: Option<Progress>,
    completion: Option<Completion>,
    total: u32,
    degraded: u32,
    run_state: RunState,
    should_quit: bool,
    scroll_offset: usize,
    view_lines: usize,
    tick: u64,
}

const DIVIDER_MARKER: &str = "<divider>";

impl AppState {
    fn new(task: &Task, interval_secs: u32) -> Self {
        let pending = task.total.saturating_sub(task.success + task.fail) as usize;
        let mut history = Vec::new();
        history.push(format!(
            "Task #{}: {} recipients, {} pending, about {} at {}s intervals.",
            task.id,
            task.total,
            pending,
            format_estimate(pending, interval_secs),
            interval_secs
        ));
        history.push("Keys: p pause, r resume, c cancel, q quit.".to_string());
        history.push(DIVIDER_MARKER.to_string());
        Self {
            task_id: task.id,
            history,
            progress: None,
            completion: None,
            total: task.total,
            degraded: 0,
            run_state: RunState::Running,
            should_quit: false,
            scroll_offset: 0,
            view_lines: 1,
            tick: 0,
        }
    }

    fn push_history(&mut self, line: impl Into<String>) {
        const MAX_LINES: usize = 500;
        if self.history.len() >= MAX_LINES {
            let drain_count = self.history.len().saturating_sub(MAX_LINES - 1);
            self.history.drain(0..drain_count);
        }
        self.history.push(line.into());
        self.clamp_scroll();
    }

    fn apply(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Progress(progress) => {
                self.push_history(format_progress_line(&progress));
                self.total = progress.total;
                self.progress = Some(progress);
            }
            DispatchEvent::Degraded { job_id, error } => {
                self.degraded += 1;
                match job_id {
                    Some(id) => self.push_history(format!("warning: job {id} not saved: {error}")),
                    None => self.push_history(format!("warning: task summary not saved: {error}")),
                }
            }
            DispatchEvent::Completed(completion) => {
                self.push_history(DIVIDER_MARKER);
                self.push_history(format!(
                    "Finished: {} sent, {} failed. Press q to exit.",
                    completion.success, completion.fail
                ));
                self.completion = Some(completion);
            }
        }
    }

    fn set_view_lines(&mut self, lines: usize) {
        self.view_lines = lines.max(1);
        self.clamp_scroll();
    }

    fn scroll_up(&mut self, lines: usize) {
        let max_scroll = self.max_scroll();
        self.scroll_offset = (self.scroll_offset + lines).min(max_scroll);
    }

    fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    fn max_scroll(&self) -> usize {
        self.history.len().saturating_sub(self.view_lines)
    }

    fn clamp_scroll(&mut self) {
        let max_scroll = self.max_scroll();
        if self.scroll_offset > max_scroll {
            self.scroll_offset = max_scroll;
        }
    }
}

/// Observes a started run until the operator quits.
///
/// Quitting while the run is active cancels it first; the caller joins the
/// dispatch thread afterwards.
pub fn run(
    dispatcher: &Dispatcher,
    events: Receiver<DispatchEvent>,
    task: &Task,
    interval_secs: u32,
) -> Result<(), DispatchError> {
    let _guard = TerminalGuard::enter()?;
    let stdout = io::stdout();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(terminal_error)?;

    let mut app = AppState::new(task, interval_secs);

    loop {
        while let Ok(event) = events.try_recv() {
            app.apply(event);
        }
        app.run_state = dispatcher.state();

        let size = terminal.size().map_err(terminal_error)?;
        let history_height = size.height.saturating_sub(6).max(3) as usize;
        app.set_view_lines(history_height.saturating_sub(2).max(1));
        app.tick = app.tick.wrapping_add(1);

        terminal
            .draw(|frame| {
                let layout = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(4), Constraint::Min(3)])
                    .split(frame.size());

                let header = render_header(&app, layout[0].width as usize);
                frame.render_widget(header, layout[0]);

                let history =
                    render_history(&app, layout[1].height as usize, layout[1].width as usize);
                frame.render_widget(history, layout[1]);
            })
            .map_err(terminal_error)?;

        if event::poll(Duration::from_millis(50)).map_err(terminal_error)? {
            if let Event::Key(key) = event::read().map_err(terminal_error)? {
                if key.kind == KeyEventKind::Press {
                    handle_key(&mut app, dispatcher, key.code, key.modifiers);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    dispatcher.unsubscribe();
    Ok(())
}

fn handle_key(app: &mut AppState, dispatcher: &Dispatcher, code: KeyCode, modifiers: KeyModifiers) {
    match code {
        KeyCode::Char('p') | KeyCode::Char('P') => {
            if dispatcher.pause() {
                app.push_history(">> paused");
            }
        }
        KeyCode::Char('r') | KeyCode::Char('R') => {
            if dispatcher.resume() {
                app.push_history(">> resumed");
            }
        }
        KeyCode::Char(' ') => {
            if dispatcher.pause() {
                app.push_history(">> paused");
            } else if dispatcher.resume() {
                app.push_history(">> resumed");
            }
        }
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            dispatcher.cancel();
            app.should_quit = true;
        }
        KeyCode::Char('c') | KeyCode::Char('C') => {
            if dispatcher.cancel() {
                app.push_history(">> cancelling after the current message...");
            }
        }
        KeyCode::Char('q') | KeyCode::Esc => {
            dispatcher.cancel();
            app.should_quit = true;
        }
        KeyCode::PageUp => {
            let step = app.view_lines.saturating_sub(1).max(1);
            app.scroll_up(step);
        }
        KeyCode::PageDown => {
            let step = app.view_lines.saturating_sub(1).max(1);
            app.scroll_down(step);
        }
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        _ => {}
    }
}

fn state_label(state: RunState) -> &'static str {
    match state {
        RunState::Idle => "Idle",
        RunState::Running => "Sending",
        RunState::Paused => "Paused",
        RunState::Cancelled => "Cancelled",
        RunState::Completed => "Completed",
    }
}

fn render_header(app: &AppState, width: usize) -> Paragraph<'static> {
    let counts = match &app.progress {
        Some(progress) => format!(
            "{}/{}  ok={} failed={}",
            progress.processed, progress.total, progress.success, progress.fail
        ),
        None => format!("0/{}", app.total),
    };
    let mut status = state_label(app.run_state).to_string();
    if app.degraded > 0 {
        status.push_str(&format!("  ({} store writes failed)", app.degraded));
    }

    let bar_width = width.saturating_sub(30).clamp(10, 40);
    let progress_bar = render_progress_bar(app, bar_width);

    let text = vec![
        Line::from(vec![Span::raw("Status: "), Span::raw(status)]),
        Line::from(vec![
            Span::raw(progress_bar),
            Span::raw(" "),
            Span::raw(counts),
        ]),
    ];

    Paragraph::new(text)
        .block(
            Block::default()
                .title(format!("smsflow · task #{}", app.task_id))
                .borders(Borders::ALL),
        )
        .wrap(Wrap { trim: true })
}

fn render_progress_bar(app: &AppState, width: usize) -> String {
    let width = width.max(10);
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');

    let processed = app.progress.as_ref().map_or(0, |progress| progress.processed);
    let ratio = if app.total > 0 {
        (f64::from(processed) / f64::from(app.total)).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let active = app.completion.is_none() && app.run_state == RunState::Running;

    for idx in 0..width {
        if idx < filled {
            bar.push('=');
        } else if idx == filled && active && app.tick % 10 < 5 {
            bar.push('>');
        } else {
            bar.push(' ');
        }
    }
    bar.push(']');
    bar
}

fn render_history(app: &AppState, height: usize, width: usize) -> Paragraph<'static> {
    let max_lines = height.saturating_sub(2).max(1);
    let end = app.history.len().saturating_sub(app.scroll_offset);
    let start = end.saturating_sub(max_lines);
    let divider_width = width.saturating_sub(2).max(1);
    let divider = "─".repeat(divider_width);
    let lines: Vec<Line> = app.history[start..end]
        .iter()
        .map(|line| {
            if line == DIVIDER_MARKER {
                Line::from(Span::raw(divider.clone()))
            } else {
                Line::from(line.clone())
            }
        })
        .collect();

    Paragraph::new(lines)
        .block(Block::default().title("Log").borders(Borders::ALL))
        .wrap(Wrap { trim: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{ChannelSelector, TaskStatus};

    fn app() -> AppState {
        let task = Task {
            id: 9,
            body: "hi".to_string(),
            total: 4,
            success: 0,
            fail: 0,
            interval_secs: 3,
            channel: ChannelSelector::DEFAULT,
            status: TaskStatus::Pending,
            created_at: 0,
        };
        AppState::new(&task, 3)
    }

    #[test]
    fn events_land_in_the_log() {
        let mut app = app();
        app.apply(DispatchEvent::Progress(Progress {
            processed: 2,
            total: 4,
            success: 1,
            fail: 1,
            message: "[2/4] 200 - fail".to_string(),
        }));
        app.apply(DispatchEvent::Degraded {
            job_id: Some(2),
            error: "disk full".to_string(),
        });
        app.apply(DispatchEvent::Completed(Completion { success: 1, fail: 1 }));

        assert_eq!(app.degraded, 1);
        assert!(app.history.iter().any(|line| line.starts_with("[2/4] 200 - fail")));
        assert!(app.history.last().unwrap().starts_with("Finished: 1 sent, 1 failed"));
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        let mut app = app();
        app.run_state = RunState::Completed;
        app.apply(DispatchEvent::Progress(Progress {
            processed: 2,
            total: 4,
            success: 2,
            fail: 0,
            message: String::new(),
        }));
        let bar = render_progress_bar(&app, 10);
        assert_eq!(bar, "[=====     ]");
    }
}
