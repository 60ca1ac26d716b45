use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};
use std::{
    sync::{Arc, Mutex},
    thread,
};

use camino::{Utf8Path, Utf8PathBuf};
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{BatchReport, CancelToken, ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::domain::AccessionState;
use crate::error::BgdError;

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Dashboard,
    Logs,
}

#[derive(Debug, Clone)]
struct Row {
    accession: String,
    state: AccessionState,
    note: String,
    elapsed: Option<Duration>,
}

#[derive(Debug)]
struct DashboardState {
    status: String,
    rows: Vec<Row>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    active: bool,
    cancel_requested: bool,
}

impl DashboardState {
    fn count(&self, state: AccessionState) -> usize {
        self.rows.iter().filter(|row| row.state == state).count()
    }

    fn settled(&self) -> usize {
        self.rows.iter().filter(|row| row.state.is_terminal()).count()
    }

    fn apply(&mut self, event: ProgressEvent) {
        let message = event.message.trim().to_string();
        match (event.accession, event.state) {
            (Some(accession), Some(state)) => {
                let line = format!("{accession}: {} {message}", state.label());
                match self.rows.iter_mut().find(|row| row.accession == accession) {
                    Some(row) => {
                        row.state = state;
                        row.note = message;
                        if event.elapsed.is_some() {
                            row.elapsed = event.elapsed;
                        }
                    }
                    None => self.rows.push(Row {
                        accession,
                        state,
                        note: message,
                        elapsed: event.elapsed,
                    }),
                }
                push_bounded(&mut self.events, line.clone(), EVENTS_MAX);
                push_bounded(&mut self.logs, format!("[{}] {line}", timestamp()), LOGS_MAX);
            }
            _ => {
                if let Some(elapsed) = event.elapsed {
                    push_bounded(
                        &mut self.logs,
                        format!("[{}] {message} ({} ms)", timestamp(), elapsed.as_millis()),
                        LOGS_MAX,
                    );
                } else {
                    push_bounded(&mut self.logs, format!("[{}] {message}", timestamp()), LOGS_MAX);
                }
                push_bounded(&mut self.events, message.clone(), EVENTS_MAX);
                self.status = message;
            }
        }
    }
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<DashboardState>>,
    cancel: CancelToken,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<DashboardState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.apply(event);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind, cancel: CancelToken) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(DashboardState {
                status: "ready".to_string(),
                rows: Vec::new(),
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Dashboard,
                started: Instant::now(),
                active: false,
                cancel_requested: false,
            })),
            cancel,
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread and redraws until it returns. `q`, `Esc`
    /// and Ctrl-C request cancellation; the worker stops before its next
    /// accession and its result is still returned.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, BgdError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick, None))
                    .into_diagnostic()?;
            }

            match poll_worker(&rx) {
                WorkerPoll::Running => {}
                WorkerPoll::Finished(result) => break Some(result),
                WorkerPoll::Lost => break None,
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    self.handle_key(key);
                }
            }

            tick = tick.wrapping_add(1);
        };

        self.set_active(false);
        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        match result {
            Some(result) => result.map_err(miette::Report::new),
            None => Err(miette::miette!("worker stopped without returning a result")),
        }
    }

    /// Shows the final dashboard with the batch totals until a key is pressed.
    pub fn finish_batch(&mut self, report: &BatchReport) -> miette::Result<()> {
        let summary = batch_summary_line(report);
        if let Ok(mut state) = self.state.lock() {
            state.status = summary.clone();
            state.view = View::Dashboard;
        }

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, 0, Some(&summary)))
                    .into_diagnostic()?;
            }
            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::F(4) | KeyCode::Char('l') => self.toggle_logs(),
                        KeyCode::Up => self.scroll_logs(-1),
                        KeyCode::Down => self.scroll_logs(1),
                        _ => break,
                    }
                }
            }
        }

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(())
    }

    /// Asks whether previous results under `root` may be removed.
    pub fn confirm_wipe(
        &mut self,
        root: &Utf8Path,
        existing: &[Utf8PathBuf],
    ) -> miette::Result<bool> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        let mut lines = vec![
            Line::from(format!("Output folder {root} already holds results:")),
            Line::from(""),
        ];
        lines.extend(existing.iter().map(|path| {
            Line::from(Span::styled(
                path.to_string(),
                Style::default().fg(Color::Yellow),
            ))
        }));
        lines.push(Line::from(""));
        lines.push(Line::from("Delete them and start over?"));
        lines.push(Line::from("Press y to delete, n to cancel."));

        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(lines.clone())
                        .alignment(Alignment::Center)
                        .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(confirmed)
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        let ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c'));
        match key.code {
            _ if ctrl_c => self.request_cancel(),
            KeyCode::Char('q') | KeyCode::Esc => self.request_cancel(),
            KeyCode::F(4) | KeyCode::Char('l') => self.toggle_logs(),
            KeyCode::Up => self.scroll_logs(-1),
            KeyCode::Down => self.scroll_logs(1),
            _ => {}
        }
    }

    fn request_cancel(&self) {
        self.cancel.cancel();
        if let Ok(mut state) = self.state.lock() {
            if !state.cancel_requested {
                state.cancel_requested = true;
                state.status = "cancelling after the current accession".to_string();
            }
        }
    }

    fn toggle_logs(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.view = match state.view {
                View::Dashboard => View::Logs,
                View::Logs => View::Dashboard,
            };
        }
        self.log_scroll = 0;
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        if delta.is_negative() {
            self.log_scroll = self.log_scroll.saturating_sub(delta.unsigned_abs());
        } else {
            self.log_scroll = self.log_scroll.saturating_add(delta as u16);
        }
    }
}

enum WorkerPoll<R> {
    Running,
    Finished(Result<R, BgdError>),
    /// The worker hung up without sending, e.g. after a panic.
    Lost,
}

fn poll_worker<R>(rx: &Receiver<Result<R, BgdError>>) -> WorkerPoll<R> {
    match rx.try_recv() {
        Ok(result) => WorkerPoll::Finished(result),
        Err(TryRecvError::Empty) => WorkerPoll::Running,
        Err(TryRecvError::Disconnected) => WorkerPoll::Lost,
    }
}

pub fn batch_summary_line(report: &BatchReport) -> String {
    let mut line = format!(
        "{} done, {} failed, {} skipped of {}",
        report.count(AccessionState::Done),
        report.count(AccessionState::Failed),
        report.count(AccessionState::Skipped),
        report.outcomes.len()
    );
    if report.cancelled {
        line.push_str(&format!(
            ", {} not started (cancelled)",
            report.count(AccessionState::Pending)
        ));
    }
    if let Some(path) = &report.report_path {
        line.push_str(&format!("; failures listed in {path}"));
    }
    line
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    state: &DashboardState,
    tick: usize,
    footer: Option<&str>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tui.kind, tick), chunks[0]);
    match state.view {
        View::Dashboard => draw_dashboard(frame, state, chunks[1]),
        View::Logs => frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[1]),
    }

    let hint = match footer {
        Some(_) => "any key: exit   l/F4: logs",
        None => "q/Esc: cancel after current   l/F4: logs",
    };
    let footer_line = Line::from(vec![
        Span::styled(
            footer.unwrap_or(state.status.as_str()).to_string(),
            Style::default().fg(Color::White),
        ),
        Span::raw("   "),
        Span::styled(hint, Style::default().fg(Color::Gray)),
    ]);
    frame.render_widget(
        Paragraph::new(footer_line)
            .block(Block::default().borders(Borders::TOP))
            .wrap(Wrap { trim: true }),
        chunks[2],
    );
}

fn draw_dashboard(frame: &mut ratatui::Frame, state: &DashboardState, area: Rect) {
    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    frame.render_widget(draw_accession_panel(state, main[0].height), main[0]);
    frame.render_widget(draw_events_panel(state), main[1]);
}

fn draw_header(state: &DashboardState, kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Fetch => "Fetch",
        ProgressSinkKind::Rename => "Rename",
    };
    let total = state.rows.len();
    let settled = state.settled();
    let percent = if total == 0 {
        0
    } else {
        (settled * 100 / total) as u8
    };
    let header_line = Line::from(vec![
        Span::styled(
            "BGD",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw(format!(
            "   Elapsed: {}s   ",
            state.started.elapsed().as_secs()
        )),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let counts_line = Line::from(vec![
        Span::raw(progress_bar(percent)),
        Span::raw(format!(" {settled}/{total}   ")),
        Span::styled(
            format!("done {}", state.count(AccessionState::Done)),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  "),
        Span::styled(
            format!("failed {}", state.count(AccessionState::Failed)),
            Style::default().fg(Color::Red),
        ),
        Span::raw("  "),
        Span::styled(
            format!("skipped {}", state.count(AccessionState::Skipped)),
            Style::default().fg(Color::Yellow),
        ),
    ]);
    Paragraph::new(vec![header_line, counts_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_accession_panel(state: &DashboardState, height: u16) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "ACCESSIONS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    let visible = height.saturating_sub(1).max(1) as usize;
    for row in &state.rows[visible_window(&state.rows, visible)] {
        let elapsed = row
            .elapsed
            .map(|value| format!(" {}ms", value.as_millis()))
            .unwrap_or_default();
        lines.push(Line::from(vec![
            Span::styled(
                format!("{:<11}", row.state.label()),
                Style::default().fg(state_color(row.state)),
            ),
            Span::raw(format!("{:<20} ", row.accession)),
            Span::styled(
                format!("{}{elapsed}", row.note),
                Style::default().fg(Color::Gray),
            ),
        ]));
    }
    Paragraph::new(lines).block(Block::default().borders(Borders::RIGHT))
}

fn draw_events_panel(state: &DashboardState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "RECENT EVENTS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &DashboardState, scroll: u16) -> Paragraph<'static> {
    let lines = state
        .logs
        .iter()
        .map(|entry| Line::from(entry.clone()))
        .collect::<Vec<_>>();
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Logs"))
        .scroll((scroll, 0))
        .wrap(Wrap { trim: false })
}

/// Rows to draw so the accession currently in flight stays on screen.
fn visible_window(rows: &[Row], visible: usize) -> std::ops::Range<usize> {
    if rows.len() <= visible {
        return 0..rows.len();
    }
    let focus = rows
        .iter()
        .position(|row| !row.state.is_terminal())
        .unwrap_or(rows.len() - 1);
    let start = focus
        .saturating_sub(visible / 3)
        .min(rows.len() - visible);
    start..start + visible
}

fn state_color(state: AccessionState) -> Color {
    match state {
        AccessionState::Pending => Color::DarkGray,
        AccessionState::Done => Color::Green,
        AccessionState::Renamed => Color::Magenta,
        AccessionState::Failed => Color::Red,
        AccessionState::Skipped => Color::Yellow,
        AccessionState::Downloading | AccessionState::Moving | AccessionState::Unzipping => {
            Color::Cyan
        }
    }
}

fn progress_bar(percent: u8) -> String {
    let total = 20;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
