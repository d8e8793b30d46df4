//! # Monitor Session
//!
//! The session is the single owner of everything a running monitor mutates:
//! the register catalog, the connection manager, the poll engine, the
//! filter and search state, the status shown on the status line and the
//! display surface. Front ends drive it with plain method calls and feed the
//! results of connection attempts back in; nothing inside the session
//! schedules work on its own.
//!
//! ## Status transitions
//!
//! ```text
//! Initializing -> Connecting -> Connected -> Reading -> ReadComplete
//!                     ^   |                     |  \-> TableUpdateError
//!                     |   v                     |
//!              ConnectionFailed           (port closed) -> Connecting
//! ```
//!
//! Input capture (a filter or search prompt being open) is orthogonal to the
//! status: it blocks new cycles and suppresses status-line redraws until the
//! prompt is closed.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};

use crate::client::Connector;
use crate::connection::{ConnectAttempt, ConnectEvent, ConnectionManager, LinkState};
use crate::config::MonitorConfig;
use crate::display::{format_row, DisplaySurface, Row, StatusLine, TABLE_HEADER};
use crate::error::{MonitorError, MonitorResult};
use crate::logging::CallbackLogger;
use crate::poll::{CycleOutcome, CycleReport, PollEngine};
use crate::projection::{project, FilterSpec, SearchSpec};
use crate::protocol::{ModbusAddress, RegisterDescriptor, RegisterKind, RowResult, StatusLabel};

/// Longest connection error excerpt shown on the status line
const STATUS_ERROR_EXCERPT: usize = 30;

/// Overall session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Connecting,
    Connected,
    Reading,
    ReadComplete,
    ConnectionFailed,
    TableUpdateError,
}

impl SessionStatus {
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Initializing => "Initializing",
            SessionStatus::Connecting => "Connecting...",
            SessionStatus::Connected => "Connected",
            SessionStatus::Reading => "Reading...",
            SessionStatus::ReadComplete => "Read Complete",
            SessionStatus::ConnectionFailed => "Connection Failed",
            SessionStatus::TableUpdateError => "Table Update Err",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Named events driving [`SessionState`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectRequested,
    ConnectSucceeded { target: String },
    ConnectFailed { error: String },
    CycleStarted { total: usize },
    CycleProgress { completed: usize, total: usize, percent: u8 },
    CycleCompleted { rows: usize },
    CycleAborted { reason: String },
    RegisterReadFailed {
        kind: RegisterKind,
        address: ModbusAddress,
        status: StatusLabel,
    },
    TableUpdateFailed { error: String },
    InputCaptureStarted,
    InputCaptureEnded,
}

/// Status, progress and input-capture flag of a session
#[derive(Debug, Clone)]
pub struct SessionState {
    status: SessionStatus,
    progress: Option<u8>,
    action: Option<String>,
    last_update: Option<DateTime<Local>>,
    input_capture: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Initializing,
            progress: None,
            action: None,
            last_update: None,
            input_capture: false,
        }
    }

    /// Apply one event
    pub fn apply(&mut self, event: &SessionEvent) {
        debug!("Session event: {:?}", event);
        match event {
            SessionEvent::ConnectRequested => self.enter(SessionStatus::Connecting, None),
            SessionEvent::ConnectSucceeded { target } => {
                self.enter(
                    SessionStatus::Connected,
                    Some(format!("Connected to {}. Starting read...", target)),
                );
            }
            SessionEvent::ConnectFailed { error } => {
                let excerpt: String = error.chars().take(STATUS_ERROR_EXCERPT).collect();
                self.enter(
                    SessionStatus::ConnectionFailed,
                    Some(format!("Connection failed: {}. Retrying...", excerpt)),
                );
            }
            SessionEvent::CycleStarted { .. } => {
                self.enter(SessionStatus::Reading, None);
                self.progress = Some(0);
            }
            SessionEvent::CycleProgress {
                completed,
                total,
                percent,
            } => {
                if self.status == SessionStatus::Reading {
                    self.progress = Some((*percent).min(100));
                    self.action = Some(format!("Reading {}/{}...", completed, total));
                }
            }
            SessionEvent::CycleCompleted { .. } => {
                self.enter(SessionStatus::ReadComplete, None);
                self.last_update = Some(Local::now());
            }
            SessionEvent::CycleAborted { reason } => {
                warn!("Poll cycle aborted: {}", reason);
                self.enter(SessionStatus::Connecting, None);
            }
            SessionEvent::RegisterReadFailed { kind, address, status } => {
                debug!("{} @{} failed with {}", kind, address, status);
            }
            SessionEvent::TableUpdateFailed { error } => {
                error!("Table update error: {}", error);
                self.enter(SessionStatus::TableUpdateError, None);
                self.last_update = Some(Local::now());
            }
            SessionEvent::InputCaptureStarted => self.input_capture = true,
            SessionEvent::InputCaptureEnded => self.input_capture = false,
        }
    }

    fn enter(&mut self, status: SessionStatus, action: Option<String>) {
        self.status = status;
        self.progress = None;
        self.action = action;
    }

    /// Replace the free-text action shown on the status line
    pub fn set_action<S: Into<String>>(&mut self, action: S) {
        self.action = Some(action.into());
    }

    /// Check whether a poll cycle may start now
    pub fn can_start_cycle(&self, link_open: bool) -> MonitorResult<()> {
        if self.status == SessionStatus::Reading {
            return Err(MonitorError::cycle_blocked("a poll cycle is already running"));
        }
        if self.input_capture {
            return Err(MonitorError::cycle_blocked("input capture is active"));
        }
        if !link_open {
            return Err(MonitorError::cycle_blocked("connection is not open"));
        }
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Cycle progress; `Some` only while reading
    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    /// Text for the status line's `Status:` field
    pub fn action(&self) -> &str {
        self.action.as_deref().unwrap_or(self.status.label())
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    pub fn input_capture(&self) -> bool {
        self.input_capture
    }
}

/// Prompt a front end has open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPrompt {
    Filter,
    Search,
}

/// What a call to [`MonitorSession::run_cycle`] did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleSummary {
    /// `rows` were read, `shown` survived the projection
    Completed { rows: usize, shown: usize },
    /// Link lost after `rows` registers; a reconnect has been started
    Aborted { rows: usize, reason: MonitorError },
}

fn compose_status(
    state: &SessionState,
    link: LinkState,
    target: &str,
    filter: &FilterSpec,
    search: &SearchSpec,
) -> String {
    StatusLine {
        progress: state.progress(),
        link,
        target,
        action: state.action(),
        last_update: state.last_update(),
        filter,
        search,
    }
    .to_string()
}

/// Session context object
pub struct MonitorSession<K: Connector, D: DisplaySurface> {
    catalog: Vec<RegisterDescriptor>,
    connection: ConnectionManager<K>,
    engine: PollEngine,
    display: D,
    state: SessionState,
    filter: FilterSpec,
    search: SearchSpec,
    prompt: Option<InputPrompt>,
    rows: Vec<RowResult>,
    pending_connect: Option<ConnectAttempt<K::Client>>,
    retry_at: Option<Instant>,
    refresh_interval: Option<Duration>,
    refresh_at: Option<Instant>,
    refresh_requested: bool,
}

impl<K: Connector, D: DisplaySurface> MonitorSession<K, D> {
    pub fn new(
        catalog: Vec<RegisterDescriptor>,
        connection: ConnectionManager<K>,
        engine: PollEngine,
        display: D,
    ) -> Self {
        Self {
            catalog,
            connection,
            engine,
            display,
            state: SessionState::new(),
            filter: FilterSpec::default(),
            search: SearchSpec::default(),
            prompt: None,
            rows: Vec::new(),
            pending_connect: None,
            retry_at: None,
            refresh_interval: None,
            refresh_at: None,
            refresh_requested: false,
        }
    }

    /// Build a session from a resolved configuration
    ///
    /// Fails only when the catalog cannot be built.
    pub fn from_config(
        config: &MonitorConfig,
        connector: K,
        display: D,
        logger: CallbackLogger,
    ) -> MonitorResult<Self> {
        config.validate()?;
        let catalog = config.build_catalog()?;
        info!("Catalog built with {} registers", catalog.len());

        let connection = ConnectionManager::from_config(connector, config);
        let mut session = Self::new(catalog, connection, PollEngine::new(logger), display);
        session.refresh_interval = config.refresh_interval();
        Ok(session)
    }

    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Show placeholder rows and the initial status, then start connecting
    pub fn initialize(&mut self) {
        self.rows = self.catalog.iter().map(RowResult::waiting).collect();
        self.show_rows();
        self.redraw_status();
        self.request_connect();
    }

    /// Start a connection attempt
    ///
    /// Cancels any pending retry. Returns `false` when the connection
    /// manager ignored the request because a link is open or being opened.
    /// The attempt itself is collected with
    /// [`take_connect_attempt`](Self::take_connect_attempt).
    pub fn request_connect(&mut self) -> bool {
        self.retry_at = None;
        match self.connection.connect() {
            Some(attempt) => {
                self.pending_connect = Some(attempt);
                self.state.apply(&SessionEvent::ConnectRequested);
                self.redraw_status();
                true
            }
            None => false,
        }
    }

    /// The connection attempt started by the last accepted connect request
    pub fn take_connect_attempt(&mut self) -> Option<ConnectAttempt<K::Client>> {
        self.pending_connect.take()
    }

    /// Fold a finished connection attempt into the session
    ///
    /// Success requests the first cycle; failure schedules the single
    /// pending retry.
    pub fn handle_connect_result(&mut self, result: MonitorResult<K::Client>) -> ConnectEvent {
        let event = self.connection.complete_connect(result);
        match &event {
            ConnectEvent::Succeeded { target } => {
                self.state.apply(&SessionEvent::ConnectSucceeded { target: target.clone() });
                self.refresh_requested = true;
            }
            ConnectEvent::Failed { error, retry_after } => {
                self.state.apply(&SessionEvent::ConnectFailed {
                    error: error.message().to_string(),
                });
                self.retry_at = Some(Instant::now() + *retry_after);
            }
        }
        self.redraw_status();
        event
    }

    /// Request a connection and wait for the attempt in place
    pub async fn connect_now(&mut self) -> Option<ConnectEvent> {
        if !self.request_connect() {
            return None;
        }
        let attempt = self.take_connect_attempt()?;
        let result = attempt.await;
        Some(self.handle_connect_result(result))
    }

    /// Check whether the pending retry is due
    pub fn retry_due(&self, now: Instant) -> bool {
        self.retry_at.map_or(false, |at| now >= at)
    }

    /// Earliest retry or refresh deadline
    ///
    /// The refresh deadline only counts while a cycle could start.
    pub fn next_deadline(&self) -> Option<Instant> {
        let refresh_at = self
            .refresh_at
            .filter(|_| self.state.can_start_cycle(self.connection.is_open()).is_ok());
        match (self.retry_at, refresh_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Ask for a fresh cycle at the next opportunity
    pub fn request_refresh(&mut self) {
        self.refresh_requested = true;
        self.state.set_action("Initiating New Read...");
        self.redraw_status();
    }

    /// Consume a pending refresh if a cycle may start now
    ///
    /// A refresh that cannot start yet stays pending.
    pub fn take_refresh_request(&mut self, now: Instant) -> bool {
        let interval_due = self.refresh_at.map_or(false, |at| now >= at);
        if !(self.refresh_requested || interval_due) {
            return false;
        }
        if self.state.can_start_cycle(self.connection.is_open()).is_err() {
            return false;
        }
        self.refresh_requested = false;
        self.refresh_at = None;
        true
    }

    /// Start a poll cycle
    ///
    /// Fails with [`MonitorError::CycleBlocked`] while a cycle runs, a prompt
    /// is open or the link is down. The cycle is advanced with
    /// [`step_cycle`](Self::step_cycle).
    pub fn start_cycle(&mut self) -> MonitorResult<()> {
        if let Err(err) = self.state.can_start_cycle(self.connection.is_open()) {
            debug!("Cycle not started: {}", err);
            if !self.connection.is_open() && !self.state.input_capture() {
                self.state.set_action("Waiting for connection...");
                self.redraw_status();
            }
            return Err(err);
        }
        self.engine.begin(self.catalog.len(), &self.connection)?;
        self.refresh_requested = false;
        self.refresh_at = None;

        self.state.apply(&SessionEvent::CycleStarted {
            total: self.catalog.len(),
        });
        self.redraw_status();
        Ok(())
    }

    /// Check whether a started cycle still has registers to read
    pub fn cycle_running(&self) -> bool {
        self.engine.is_in_flight()
    }

    /// Read the next register of the running cycle
    ///
    /// Returns the summary once the cycle is over. Prompts may be opened and
    /// closed between steps; progress is not drawn while one is open.
    pub async fn step_cycle(&mut self) -> MonitorResult<Option<CycleSummary>> {
        let target = self.connection.state().target.clone();
        let state = &mut self.state;
        let display = &mut self.display;
        let filter = &self.filter;
        let search = &self.search;
        let mut sink = |report: CycleReport| match report {
            CycleReport::Progress(progress) => {
                state.apply(&SessionEvent::CycleProgress {
                    completed: progress.completed,
                    total: progress.total,
                    percent: progress.percent,
                });
                if !state.input_capture() {
                    display.update_status(&compose_status(state, LinkState::Connected, &target, filter, search));
                }
            }
            CycleReport::ReadFailed { kind, address, status } => {
                state.apply(&SessionEvent::RegisterReadFailed { kind, address, status });
            }
        };

        let outcome = self
            .engine
            .step(&self.catalog, &mut self.connection, &mut sink)
            .await?;
        Ok(outcome.map(|outcome| self.finish_cycle(outcome)))
    }

    fn finish_cycle(&mut self, outcome: CycleOutcome) -> CycleSummary {
        match outcome {
            CycleOutcome::Completed(rows) => {
                let read = rows.len();
                self.rows = rows;
                let shown = self.show_rows();
                if self.state.status() != SessionStatus::TableUpdateError {
                    self.state.apply(&SessionEvent::CycleCompleted { rows: read });
                }
                if let Some(interval) = self.refresh_interval {
                    self.refresh_at = Some(Instant::now() + interval);
                }
                self.redraw_status();
                CycleSummary::Completed { rows: read, shown }
            }
            CycleOutcome::Aborted { rows, reason } => {
                self.state.apply(&SessionEvent::CycleAborted {
                    reason: reason.to_string(),
                });
                self.redraw_status();
                self.request_connect();
                CycleSummary::Aborted {
                    rows: rows.len(),
                    reason,
                }
            }
        }
    }

    /// Run one whole poll cycle and publish its rows
    pub async fn run_cycle(&mut self) -> MonitorResult<CycleSummary> {
        self.start_cycle()?;
        loop {
            if let Some(summary) = self.step_cycle().await? {
                return Ok(summary);
            }
        }
    }

    /// Open a filter or search prompt
    ///
    /// Returns `false` when another prompt is already open.
    pub fn begin_input_capture(&mut self, prompt: InputPrompt) -> bool {
        if self.state.input_capture() {
            return false;
        }
        self.prompt = Some(prompt);
        self.state.apply(&SessionEvent::InputCaptureStarted);
        true
    }

    /// Close the filter prompt, filtering `column` by `value`
    pub fn apply_filter(&mut self, column: usize, value: &str) {
        self.filter = FilterSpec::new(column, value.trim());
        self.end_input_capture("Applying Filter...");
    }

    /// Close the search prompt, searching for `pattern`
    pub fn apply_search(&mut self, pattern: &str) {
        self.search = SearchSpec::new(pattern.trim());
        self.end_input_capture("Applying Search...");
    }

    /// Close the open prompt, clearing the filter or search it was editing
    pub fn cancel_input(&mut self) {
        let action = match self.prompt {
            Some(InputPrompt::Filter) => {
                self.filter.clear();
                "Filter Cancelled..."
            }
            Some(InputPrompt::Search) => {
                self.search.clear();
                "Search Cancelled..."
            }
            None => "Cancelled Input...",
        };
        self.end_input_capture(action);
    }

    /// Drop both filter and search
    ///
    /// Ignored while a prompt is open.
    pub fn clear_view(&mut self) -> bool {
        if self.state.input_capture() {
            return false;
        }
        self.filter.clear();
        self.search.clear();
        self.view_changed("Clearing Filter/Search...");
        true
    }

    fn end_input_capture(&mut self, action: &str) {
        self.prompt = None;
        self.state.apply(&SessionEvent::InputCaptureEnded);
        self.view_changed(action);
    }

    /// Re-project cached rows now and ask for fresh data
    fn view_changed(&mut self, action: &str) {
        self.show_rows();
        self.state.set_action(action);
        self.refresh_requested = true;
        self.redraw_status();
    }

    /// Push the projected row set to the display
    ///
    /// Returns the number of rows shown, or zero when the display rejected
    /// the update and kept its previous table.
    fn show_rows(&mut self) -> usize {
        let projected = project(self.rows.clone(), &self.filter, &self.search);
        let formatted: Vec<Row> = projected.iter().map(format_row).collect();
        match self.display.update_table(&TABLE_HEADER, &formatted) {
            Ok(()) => formatted.len(),
            Err(err) => {
                self.state.apply(&SessionEvent::TableUpdateFailed { error: err.to_string() });
                0
            }
        }
    }

    /// Compose the status line from current state
    pub fn status_line(&self) -> String {
        compose_status(
            &self.state,
            self.link_state(),
            &self.connection.state().target,
            &self.filter,
            &self.search,
        )
    }

    fn link_state(&self) -> LinkState {
        if self.connection.is_open() {
            LinkState::Connected
        } else {
            match self.connection.link_state() {
                LinkState::Connecting => LinkState::Connecting,
                _ => LinkState::Disconnected,
            }
        }
    }

    /// Redraw the status line unless a prompt is open
    pub fn redraw_status(&mut self) {
        if self.state.input_capture() {
            return;
        }
        let line = self.status_line();
        self.display.update_status(&line);
    }

    /// Cancel pending work and close the link
    pub async fn shutdown(&mut self) {
        info!("Shutting down monitor session");
        self.retry_at = None;
        self.refresh_at = None;
        self.refresh_requested = false;
        self.pending_connect = None;
        self.engine.abandon();
        self.connection.close().await;
        let metrics = self.engine.metrics();
        info!(
            "{} cycles completed, {} aborted, {} reads ({:.1}% ok)",
            metrics.completed_cycles,
            metrics.aborted_cycles,
            metrics.total_requests,
            metrics.success_rate()
        );
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn search(&self) -> &SearchSpec {
        &self.search
    }

    /// Full row set of the last completed cycle
    pub fn rows(&self) -> &[RowResult] {
        &self.rows
    }

    pub fn catalog(&self) -> &[RegisterDescriptor] {
        &self.catalog
    }

    pub fn connection(&self) -> &ConnectionManager<K> {
        &self.connection
    }

    pub fn engine(&self) -> &PollEngine {
        &self.engine
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_transitions() {
        let mut state = SessionState::new();
        assert_eq!(state.status(), SessionStatus::Initializing);
        assert_eq!(state.action(), "Initializing");

        state.apply(&SessionEvent::ConnectRequested);
        assert_eq!(state.status(), SessionStatus::Connecting);

        state.apply(&SessionEvent::ConnectFailed {
            error: "Connection refused by the remote host at 10.0.0.1:502".to_string(),
        });
        assert_eq!(state.status(), SessionStatus::ConnectionFailed);
        assert_eq!(
            state.action(),
            "Connection failed: Connection refused by the remo. Retrying..."
        );

        state.apply(&SessionEvent::ConnectRequested);
        state.apply(&SessionEvent::ConnectSucceeded {
            target: "10.0.0.1:502".to_string(),
        });
        assert_eq!(state.status(), SessionStatus::Connected);
        assert_eq!(state.action(), "Connected to 10.0.0.1:502. Starting read...");
    }

    #[test]
    fn test_progress_only_while_reading() {
        let mut state = SessionState::new();
        state.apply(&SessionEvent::CycleProgress {
            completed: 5,
            total: 10,
            percent: 50,
        });
        assert_eq!(state.progress(), None);

        state.apply(&SessionEvent::CycleStarted { total: 10 });
        assert_eq!(state.progress(), Some(0));
        state.apply(&SessionEvent::CycleProgress {
            completed: 5,
            total: 10,
            percent: 50,
        });
        assert_eq!(state.progress(), Some(50));
        assert_eq!(state.action(), "Reading 5/10...");

        state.apply(&SessionEvent::CycleCompleted { rows: 10 });
        assert_eq!(state.status(), SessionStatus::ReadComplete);
        assert_eq!(state.progress(), None);
        assert!(state.last_update().is_some());
    }

    #[test]
    fn test_abort_returns_to_connecting() {
        let mut state = SessionState::new();
        state.apply(&SessionEvent::CycleStarted { total: 3 });
        state.apply(&SessionEvent::CycleAborted {
            reason: "Port Not Open".to_string(),
        });
        assert_eq!(state.status(), SessionStatus::Connecting);
        assert_eq!(state.progress(), None);
    }

    #[test]
    fn test_cycle_gate() {
        let mut state = SessionState::new();
        assert!(state.can_start_cycle(true).is_ok());
        assert!(state.can_start_cycle(false).is_err());

        state.apply(&SessionEvent::InputCaptureStarted);
        assert!(matches!(
            state.can_start_cycle(true),
            Err(MonitorError::CycleBlocked { .. })
        ));
        state.apply(&SessionEvent::InputCaptureEnded);

        state.apply(&SessionEvent::CycleStarted { total: 1 });
        assert!(state.can_start_cycle(true).is_err());
    }

    #[test]
    fn test_table_update_failure_status() {
        let mut state = SessionState::new();
        state.apply(&SessionEvent::TableUpdateFailed {
            error: "surface gone".to_string(),
        });
        assert_eq!(state.status(), SessionStatus::TableUpdateError);
        assert_eq!(state.action(), "Table Update Err");
    }
}
