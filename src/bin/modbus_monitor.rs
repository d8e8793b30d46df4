//! Interactive terminal monitor for Modbus TCP/RTU devices
//!
//! Polls the configured register catalog and shows the results in a live
//! table. Keys: F1 help, F3 filter, F4 or `/` search, F5 clear filter and
//! search, F6 new read, Esc cancel, F10 / q / Ctrl+C quit.

use std::error::Error;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use log::{error, info, warn};
use ratatui::prelude::*;
use ratatui::widgets::{Block, BorderType, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use modbus_monitor::catalog::CatalogSource;
use modbus_monitor::config::{AddressBase, DeviceTarget, MonitorConfig, SerialSettings, DEFAULT_TCP_PORT};
use modbus_monitor::display::{self, DisplaySurface, COLUMN_COUNT, COLUMN_WIDTHS};
use modbus_monitor::{
    CallbackLogger, InputPrompt, LogLevel, ModbusConnector, MonitorError, MonitorResult, MonitorSession,
};

/// How often the input thread checks whether the monitor has exited
const INPUT_POLL: Duration = Duration::from_millis(100);

/// Quiet period after the last resize before the screen is redrawn
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "modbus-monitor", version, about = "Live Modbus TCP/RTU register monitor")]
struct Args {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the local simulator preset (TCP 127.0.0.1:502)
    #[arg(long, conflicts_with_all = ["tcp", "serial"])]
    simulator: bool,

    /// Modbus TCP target
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "serial")]
    tcp: Option<String>,

    /// Serial port for Modbus RTU
    #[arg(long, value_name = "PATH")]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Slave id to scan
    #[arg(long)]
    slave: Option<u8>,

    /// First scanned address
    #[arg(long)]
    scan_start: Option<u16>,

    /// Last scanned address (inclusive)
    #[arg(long)]
    scan_end: Option<u16>,

    /// Start a new read this many milliseconds after the previous one
    #[arg(long, value_name = "MS")]
    refresh_ms: Option<u64>,

    /// Save the resolved configuration before starting
    #[arg(long, value_name = "FILE")]
    save_config: Option<PathBuf>,

    /// Log file (the terminal is taken by the table)
    #[arg(long, value_name = "FILE", default_value = "modbus-monitor.log")]
    log_file: PathBuf,
}

fn parse_tcp_target(text: &str) -> MonitorResult<DeviceTarget> {
    let (host, port) = match text.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| MonitorError::configuration(format!("Invalid TCP port in {}", text)))?;
            (host, port)
        }
        None => (text, DEFAULT_TCP_PORT),
    };
    Ok(DeviceTarget::Tcp {
        host: host.to_string(),
        port,
    })
}

/// Resolve the configuration from file, preset and command line overrides
fn resolve_config(args: &Args) -> MonitorResult<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) if !args.simulator => MonitorConfig::load(path)?,
        _ => MonitorConfig::simulator(),
    };

    if let Some(tcp) = &args.tcp {
        config.device = parse_tcp_target(tcp)?;
    }
    if let Some(path) = &args.serial {
        config.device = DeviceTarget::Serial(SerialSettings::new(path.clone(), args.baud));
    }
    if let Some(interval) = args.refresh_ms {
        config.refresh_interval_ms = Some(interval);
    }
    if let Some(slave) = args.slave {
        config.default_slave_id = slave;
    }

    match &mut config.registers {
        CatalogSource::Scan(scan) => {
            if let Some(slave) = args.slave {
                scan.slave_id = Some(slave);
            }
            if let Some(start) = args.scan_start {
                scan.start_address = start;
            }
            if let Some(end) = args.scan_end {
                scan.end_address = end;
            }
        }
        CatalogSource::Named { .. } => {
            if args.scan_start.is_some() || args.scan_end.is_some() {
                warn!("Scan range ignored: configuration uses a named register list");
            }
        }
    }

    config.validate()?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
    }
    Ok(config)
}

fn init_logging(path: &PathBuf) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

// ── Terminal surface ─────────────────────────────────────────────────────────

/// Prompt drawn over the table
#[derive(Debug, Clone, PartialEq)]
enum PromptView {
    Hidden,
    FilterColumn { selected: usize },
    FilterValue { column: usize, input: String },
    Search { input: String },
}

/// Everything drawn on screen except the terminal itself
struct View {
    address_base: AddressBase,
    header: Vec<String>,
    rows: Vec<display::Row>,
    status: String,
    scroll: usize,
    page: usize,
    help: bool,
    prompt: PromptView,
}

/// Display surface drawing into the terminal with ratatui
struct TerminalSurface {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    view: View,
}

impl TerminalSurface {
    fn new(address_base: AddressBase) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal,
            view: View {
                address_base,
                header: Vec::new(),
                rows: Vec::new(),
                status: String::new(),
                scroll: 0,
                page: 1,
                help: false,
                prompt: PromptView::Hidden,
            },
        })
    }

    fn draw(&mut self) -> io::Result<()> {
        let mut page = self.view.page;
        let view = &self.view;
        self.terminal.draw(|frame| page = draw(frame, view))?;
        self.view.page = page.max(1);
        Ok(())
    }

    fn redraw(&mut self) {
        if let Err(err) = self.draw() {
            warn!("Screen redraw failed: {}", err);
        }
    }

    fn scroll_by(&mut self, delta: isize) {
        let last = self.view.rows.len().saturating_sub(1);
        let next = self.view.scroll as isize + delta;
        self.view.scroll = next.clamp(0, last as isize) as usize;
        self.redraw();
    }
}

impl DisplaySurface for TerminalSurface {
    fn update_table(&mut self, header: &[&str], rows: &[display::Row]) -> MonitorResult<()> {
        let previous_header = std::mem::replace(&mut self.view.header, header.iter().map(|h| h.to_string()).collect());
        let previous_rows = std::mem::replace(&mut self.view.rows, rows.to_vec());
        let previous_scroll = self.view.scroll;
        self.view.scroll = self.view.scroll.min(rows.len().saturating_sub(1));

        if let Err(err) = self.draw() {
            self.view.header = previous_header;
            self.view.rows = previous_rows;
            self.view.scroll = previous_scroll;
            return Err(MonitorError::display(err.to_string()));
        }
        Ok(())
    }

    fn update_status(&mut self, line: &str) {
        self.view.status = line.to_string();
        self.redraw();
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

fn status_style(status: &str) -> Style {
    match status {
        "OK" => Style::new().green(),
        "Wait" => Style::new().yellow(),
        _ => Style::new().red(),
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// Draw the whole screen; returns the number of visible table rows
fn draw(frame: &mut Frame, view: &View) -> usize {
    let [status_area, table_area, footer_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());

    frame.render_widget(
        Paragraph::new(view.status.as_str()).style(Style::new().black().on_white()),
        status_area,
    );

    let header = Row::new(view.header.iter().map(|h| Cell::from(h.as_str())))
        .style(Style::new().black().on_white().bold());
    let visible = table_area.height.saturating_sub(3) as usize;
    let rows = view.rows.iter().skip(view.scroll).take(visible.max(1)).map(|cells| {
        Row::new(cells.iter().enumerate().map(|(i, cell)| {
            if i == COLUMN_COUNT - 1 {
                Cell::from(cell.as_str()).style(status_style(cell))
            } else {
                Cell::from(cell.as_str())
            }
        }))
    });
    let widths = COLUMN_WIDTHS.map(|w| Constraint::Length(w as u16));
    frame.render_widget(
        Table::new(rows, widths).header(header).block(
            Block::bordered()
                .title(format!(" Registers ─ {} rows ─ {} ", view.rows.len(), view.address_base))
                .border_type(BorderType::Rounded)
                .border_style(Style::new().dark_gray()),
        ),
        table_area,
    );

    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(" F1 ", Style::new().black().on_dark_gray()),
            Span::raw(" help  "),
            Span::styled(" F3 ", Style::new().black().on_dark_gray()),
            Span::raw(" filter  "),
            Span::styled(" F4 / ", Style::new().black().on_dark_gray()),
            Span::raw(" search  "),
            Span::styled(" F5 ", Style::new().black().on_dark_gray()),
            Span::raw(" clear  "),
            Span::styled(" F6 ", Style::new().black().on_dark_gray()),
            Span::raw(" read  "),
            Span::styled(" F10 q ", Style::new().black().on_red()),
            Span::raw(" quit"),
        ]))
        .alignment(Alignment::Center),
        footer_area,
    );

    match &view.prompt {
        PromptView::Hidden => {}
        PromptView::FilterColumn { selected } => {
            let area = centered(frame.area(), 30, COLUMN_COUNT as u16 + 2);
            let items: Vec<ListItem> = display::TABLE_HEADER
                .iter()
                .enumerate()
                .map(|(i, name)| ListItem::new(format!("{}: {}", i, name)))
                .collect();
            let mut state = ListState::default();
            state.select(Some(*selected));
            frame.render_widget(Clear, area);
            frame.render_stateful_widget(
                List::new(items)
                    .highlight_style(Style::new().black().on_cyan())
                    .block(Block::bordered().title(" Filter column ").border_type(BorderType::Rounded)),
                area,
                &mut state,
            );
        }
        PromptView::FilterValue { column, input } => {
            let title = format!(" Filter {} ", display::TABLE_HEADER.get(*column).copied().unwrap_or("?"));
            draw_input(frame, &title, input);
        }
        PromptView::Search { input } => draw_input(frame, " Search ", input),
    }

    if view.help {
        let area = centered(frame.area(), 46, 12);
        frame.render_widget(Clear, area);
        frame.render_widget(
            Paragraph::new(vec![
                Line::from(" F1        toggle this help"),
                Line::from(" F3        filter by column"),
                Line::from(" F4 or /   search all columns"),
                Line::from(" F5        clear filter and search"),
                Line::from(" F6        start a new read"),
                Line::from(" Esc       cancel prompt / close help"),
                Line::from(" ↑ ↓ PgUp PgDn  scroll"),
                Line::from(" F10 q Ctrl+C   quit"),
            ])
            .block(
                Block::bordered()
                    .title(" Help ")
                    .border_type(BorderType::Rounded)
                    .border_style(Style::new().cyan()),
            ),
            area,
        );
    }

    visible
}

fn draw_input(frame: &mut Frame, title: &str, input: &str) {
    let area = centered(frame.area(), 50, 3);
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(format!("{}_", input)).block(
            Block::bordered()
                .title(title.to_string())
                .border_type(BorderType::Rounded)
                .border_style(Style::new().yellow()),
        ),
        area,
    );
}

// ── Event handling ───────────────────────────────────────────────────────────

type Session = MonitorSession<ModbusConnector, TerminalSurface>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Continue,
    Quit,
}

enum LineEdit {
    Submit,
    Cancel,
    Edited,
}

fn edit_line(input: &mut String, key: &KeyEvent) -> LineEdit {
    match key.code {
        KeyCode::Enter => LineEdit::Submit,
        KeyCode::Esc => LineEdit::Cancel,
        KeyCode::Backspace => {
            input.pop();
            LineEdit::Edited
        }
        KeyCode::Char(c) => {
            input.push(c);
            LineEdit::Edited
        }
        _ => LineEdit::Edited,
    }
}

fn is_quit_key(key: &KeyEvent) -> bool {
    key.code == KeyCode::F(10) || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

fn handle_key(session: &mut Session, key: KeyEvent) -> Control {
    if key.kind != KeyEventKind::Press {
        return Control::Continue;
    }
    if is_quit_key(&key) {
        return Control::Quit;
    }

    let prompt = std::mem::replace(&mut session.display_mut().view.prompt, PromptView::Hidden);
    match prompt {
        PromptView::Hidden => return handle_table_key(session, key),
        PromptView::FilterColumn { selected } => match key.code {
            KeyCode::Enter => {
                session.display_mut().view.prompt = PromptView::FilterValue {
                    column: selected,
                    input: String::new(),
                };
            }
            KeyCode::Esc => session.cancel_input(),
            KeyCode::Up => {
                session.display_mut().view.prompt = PromptView::FilterColumn {
                    selected: selected.saturating_sub(1),
                };
            }
            KeyCode::Down => {
                session.display_mut().view.prompt = PromptView::FilterColumn {
                    selected: (selected + 1).min(COLUMN_COUNT - 1),
                };
            }
            _ => session.display_mut().view.prompt = PromptView::FilterColumn { selected },
        },
        PromptView::FilterValue { column, mut input } => match edit_line(&mut input, &key) {
            LineEdit::Submit => session.apply_filter(column, &input),
            LineEdit::Cancel => session.cancel_input(),
            LineEdit::Edited => session.display_mut().view.prompt = PromptView::FilterValue { column, input },
        },
        PromptView::Search { mut input } => match edit_line(&mut input, &key) {
            LineEdit::Submit => session.apply_search(&input),
            LineEdit::Cancel => session.cancel_input(),
            LineEdit::Edited => session.display_mut().view.prompt = PromptView::Search { input },
        },
    }
    session.display_mut().redraw();
    Control::Continue
}

fn handle_table_key(session: &mut Session, key: KeyEvent) -> Control {
    let help = session.display().view.help;
    match key.code {
        KeyCode::Char('q') => return Control::Quit,
        KeyCode::F(1) => {
            session.display_mut().view.help = !help;
            session.display_mut().redraw();
        }
        KeyCode::Esc if help => {
            session.display_mut().view.help = false;
            session.display_mut().redraw();
        }
        _ if help => {}
        KeyCode::F(3) => {
            if session.begin_input_capture(InputPrompt::Filter) {
                session.display_mut().view.prompt = PromptView::FilterColumn { selected: 0 };
                session.display_mut().redraw();
            }
        }
        KeyCode::F(4) | KeyCode::Char('/') => {
            if session.begin_input_capture(InputPrompt::Search) {
                session.display_mut().view.prompt = PromptView::Search { input: String::new() };
                session.display_mut().redraw();
            }
        }
        KeyCode::F(5) => {
            session.clear_view();
        }
        KeyCode::F(6) => session.request_refresh(),
        KeyCode::Up => session.display_mut().scroll_by(-1),
        KeyCode::Down => session.display_mut().scroll_by(1),
        KeyCode::PageUp => {
            let page = session.display().view.page as isize;
            session.display_mut().scroll_by(-page);
        }
        KeyCode::PageDown => {
            let page = session.display().view.page as isize;
            session.display_mut().scroll_by(page);
        }
        KeyCode::Home => session.display_mut().scroll_by(isize::MIN / 2),
        KeyCode::End => session.display_mut().scroll_by(isize::MAX / 2),
        _ => {}
    }
    Control::Continue
}

/// Handle one terminal event; returns `true` when the monitor should exit
///
/// Resizes only move the pending resize redraw.
fn dispatch(session: &mut Session, event: Event, resize_at: &mut Option<Instant>) -> bool {
    match event {
        Event::Key(key) => handle_key(session, key) == Control::Quit,
        Event::Resize(_, _) => {
            *resize_at = Some(Instant::now() + RESIZE_DEBOUNCE);
            false
        }
        _ => false,
    }
}

fn is_quit_event(event: &Event) -> bool {
    matches!(event, Event::Key(key) if key.kind == KeyEventKind::Press && is_quit_key(key))
}

/// Read terminal events on a plain thread and forward them to the event loop
fn spawn_input_reader(tx: UnboundedSender<Event>) {
    std::thread::spawn(move || loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(INPUT_POLL) {
            Ok(true) => match event::read() {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!("Terminal input failed: {}", err);
                    break;
                }
            },
            Ok(false) => {}
            Err(err) => {
                error!("Terminal input failed: {}", err);
                break;
            }
        }
    });
}

async fn wait_for<F: Future + Unpin>(future: &mut Option<F>) -> F::Output {
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn run(session: &mut Session, mut events: UnboundedReceiver<Event>) {
    let mut attempt = None;
    let mut resize_at = None;
    session.initialize();

    loop {
        if let Some(next) = session.take_connect_attempt() {
            attempt = Some(next);
        }
        if resize_at.map_or(false, |at| Instant::now() >= at) {
            resize_at = None;
            session.display_mut().redraw();
        }

        // One read at a time; keys queued during the read are handled before the next one
        if session.cycle_running() {
            let mut pending = Vec::new();
            let step = {
                let step = session.step_cycle();
                tokio::pin!(step);
                loop {
                    tokio::select! {
                        result = &mut step => break result,
                        Some(event) = events.recv() => {
                            if is_quit_event(&event) {
                                return;
                            }
                            pending.push(event);
                        }
                    }
                }
            };
            if let Err(err) = step {
                warn!("Poll cycle step failed: {}", err);
            }
            for event in pending {
                if dispatch(session, event, &mut resize_at) {
                    return;
                }
            }
            continue;
        }

        if session.take_refresh_request(Instant::now()) {
            if let Err(err) = session.start_cycle() {
                info!("Cycle not started: {}", err);
            }
            continue;
        }

        let deadline = earliest(session.next_deadline(), resize_at);
        tokio::select! {
            result = wait_for(&mut attempt) => {
                attempt = None;
                session.handle_connect_result(result);
            }
            event = events.recv() => match event {
                Some(event) => {
                    if dispatch(session, event, &mut resize_at) {
                        return;
                    }
                }
                None => return,
            },
            _ = sleep_until(deadline) => {
                if session.retry_due(Instant::now()) {
                    session.request_connect();
                }
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let config = resolve_config(&args)?;
    info!("Monitoring {} ({})", config.device, modbus_monitor::info());

    let surface = TerminalSurface::new(config.address_base)?;
    let mut session = MonitorSession::from_config(
        &config,
        ModbusConnector::default(),
        surface,
        CallbackLogger::facade(LogLevel::Debug),
    )?;

    let (tx, rx) = mpsc::unbounded_channel();
    spawn_input_reader(tx);

    run(&mut session, rx).await;

    session.shutdown().await;
    drop(session);
    println!("Cleaning up and exiting...");
    Ok(())
}
