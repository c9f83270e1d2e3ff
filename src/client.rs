//! Async client for the trivia game server.
//!
//! [`TriviaClient`] is a thin handle in front of a background session task.
//! The task owns the [`SyncEngine`], the live transport and the reconnect
//! policy; the handle talks to it over an unbounded command channel.
//!
//! State flows out two ways:
//! - every change publishes a fresh `Arc<SessionSnapshot>` on a
//!   [`watch`] channel (see [`TriviaClient::subscribe`]);
//! - edge notifications ([`TriviaEvent`]) go to the bounded receiver
//!   returned by [`TriviaClient::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = TriviaConfig::new("http://localhost:5001");
//! let (mut client, mut events) = TriviaClient::connect_websocket(config)?;
//!
//! client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic))?;
//!
//! while let Some(event) = events.recv().await {
//!     if let TriviaEvent::PhaseChanged { to: Phase::Game, .. } = event {
//!         let snapshot = client.snapshot();
//!         /* … */
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::{Reconciliation, SyncEngine};
use crate::error::{Result, TriviaError};
use crate::event::TriviaEvent;
use crate::protocol::{BotDifficulty, ClientCommand, GameMode, HelpKind, ServerEvent};
use crate::snapshot::{Phase, SessionSnapshot};
use crate::transport::{Connector, Transport};

/// Default trivia backend.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5001";

const DEFAULT_LOBBY_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_FAULT_DISPLAY: Duration = Duration::from_secs(5);
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RECONNECT_DELAY_MAX: Duration = Duration::from_secs(5);

/// Environment variable overriding [`TriviaConfig::backend_url`].
pub const ENV_BACKEND_URL: &str = "TRIVIA_BACKEND_URL";
/// Environment variable overriding [`TriviaConfig::lobby_default_wait`], in seconds.
pub const ENV_LOBBY_WAIT_TIME: &str = "TRIVIA_LOBBY_WAIT_TIME";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`TriviaClient`].
///
/// # Example
///
/// ```
/// use trivia_sync_client::client::TriviaConfig;
/// use std::time::Duration;
///
/// let config = TriviaConfig::new("https://trivia.example.com")
///     .with_fault_display(Duration::from_secs(3))
///     .with_max_reconnect_attempts(Some(10));
/// assert_eq!(config.backend_url, "https://trivia.example.com");
/// assert_eq!(config.lobby_default_wait, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct TriviaConfig {
    /// HTTP(S) URL of the trivia backend.
    pub backend_url: String,
    /// Countdown shown by an idle lobby, e.g. after a game ends.
    ///
    /// Defaults to **30 seconds**.
    pub lobby_default_wait: Duration,
    /// How long a server fault stays in the snapshot before it is cleared.
    ///
    /// Defaults to **5 seconds**.
    pub fault_display: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning
    /// instead of stalling the session loop. `Disconnected` is always
    /// delivered. Defaults to **256**; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Grace period for [`TriviaClient::shutdown`] before the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Limit for one WebSocket connect plus handshake.
    ///
    /// Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Delay before the first reconnect attempt; doubled on each failure.
    ///
    /// Defaults to **1 second**.
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnect delay.
    ///
    /// Defaults to **5 seconds**.
    pub reconnect_delay_max: Duration,
    /// Consecutive failed connection attempts before giving up.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl TriviaConfig {
    /// Create a configuration for `backend_url` with default values.
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            lobby_default_wait: DEFAULT_LOBBY_WAIT,
            fault_display: DEFAULT_FAULT_DISPLAY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_delay_max: DEFAULT_RECONNECT_DELAY_MAX,
            max_reconnect_attempts: None,
        }
    }

    /// Defaults, overridden by `TRIVIA_BACKEND_URL` and `TRIVIA_LOBBY_WAIT_TIME`.
    ///
    /// An unparsable wait time is logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|u| !u.trim().is_empty()) {
            config.backend_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_LOBBY_WAIT_TIME) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.lobby_default_wait = Duration::from_secs(secs),
                Err(e) => warn!(value = %raw, error = %e, "ignoring invalid {ENV_LOBBY_WAIT_TIME}"),
            }
        }
        config
    }

    #[must_use]
    pub fn with_lobby_default_wait(mut self, wait: Duration) -> Self {
        self.lobby_default_wait = wait;
        self
    }

    #[must_use]
    pub fn with_fault_display(mut self, window: Duration) -> Self {
        self.fault_display = window;
        self
    }

    /// Set the capacity of the bounded event channel (clamped to at least 1).
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout. Zero aborts the session task at once.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the initial and maximum reconnect delay.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.reconnect_delay_max = max.max(initial);
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn reconnect_backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.reconnect_delay
            .saturating_mul(1_u32 << doublings)
            .min(self.reconnect_delay_max)
    }
}

impl Default for TriviaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}

// ── JoinLobbyParams ─────────────────────────────────────────────────

/// Parameters for [`TriviaClient::join_lobby`].
///
/// # Example
///
/// ```
/// use trivia_sync_client::client::JoinLobbyParams;
/// use trivia_sync_client::protocol::{BotDifficulty, GameMode};
///
/// let params = JoinLobbyParams::new("ana", GameMode::BattleRoyale)
///     .with_bot_difficulty(BotDifficulty::Expert);
/// assert_eq!(params.username, "ana");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinLobbyParams {
    pub username: String,
    pub mode: GameMode,
    pub bot_difficulty: BotDifficulty,
}

impl JoinLobbyParams {
    pub fn new(username: impl Into<String>, mode: GameMode) -> Self {
        Self {
            username: username.into(),
            mode,
            bot_difficulty: BotDifficulty::default(),
        }
    }

    #[must_use]
    pub fn with_bot_difficulty(mut self, bot_difficulty: BotDifficulty) -> Self {
        self.bot_difficulty = bot_difficulty;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Flags shared between the handle and the session task.
struct ClientState {
    connected: AtomicBool,
    joining: AtomicBool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            joining: AtomicBool::new(false),
        }
    }
}

/// Work items for the session task.
#[derive(Debug)]
enum Command {
    Send(ClientCommand),
    Join(JoinLobbyParams),
    PlayAgain,
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to a running trivia session.
///
/// Created via [`TriviaClient::start`]. Command methods validate local
/// preconditions against the latest snapshot, queue the command and return
/// immediately; nothing waits for a server reply.
pub struct TriviaClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<Arc<SessionSnapshot>>,
    state: Arc<ClientState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl TriviaClient {
    /// Spawn the session task and return a handle plus the event receiver.
    ///
    /// The task connects through `connector` right away and reconnects after
    /// every connection loss, as configured. Must be called inside a tokio
    /// runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        config: TriviaConfig,
    ) -> (Self, mpsc::Receiver<TriviaEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<TriviaEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let engine = SyncEngine::new(config.lobby_default_wait, config.fault_display);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(engine.snapshot().clone()));

        let state = Arc::new(ClientState::new());
        let session = Session {
            engine,
            event_tx,
            snapshot_tx,
            state: Arc::clone(&state),
            phase: Phase::UsernamePrompt,
            joining: false,
        };

        let task = tokio::spawn(session_loop(connector, session, cmd_rx, shutdown_rx, config.clone()));

        let client = Self {
            cmd_tx,
            snapshot_rx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    /// [`start`](Self::start) with the bundled Socket.IO WebSocket connector
    /// pointed at `config.backend_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Protocol`] if the backend URL is not usable.
    #[cfg(feature = "transport-websocket")]
    pub fn connect_websocket(config: TriviaConfig) -> Result<(Self, mpsc::Receiver<TriviaEvent>)> {
        let connector = crate::transports::WebSocketConnector::new(&config.backend_url)?
            .with_timeout(config.connect_timeout);
        Ok(Self::start(connector, config))
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Ask to join the lobby for `params.mode`.
    ///
    /// The username is trimmed. While the request is in flight (until a game
    /// or leaderboard arrives, or the connection drops) further joins are
    /// rejected.
    ///
    /// # Errors
    ///
    /// - [`TriviaError::EmptyUsername`] if the trimmed username is empty
    /// - [`TriviaError::AlreadyJoining`] if a join is already in flight
    /// - [`TriviaError::NotConnected`] if there is no live connection
    /// - [`TriviaError::GameInProgress`] while the server reports a running
    ///   game this client is not part of
    pub fn join_lobby(&self, params: JoinLobbyParams) -> Result<()> {
        let username = params.username.trim();
        if username.is_empty() {
            return Err(TriviaError::EmptyUsername);
        }
        if !self.is_connected() {
            return Err(TriviaError::NotConnected);
        }
        if let Some(mode) = self.snapshot_rx.borrow().game_in_progress_mode {
            return Err(TriviaError::GameInProgress(mode));
        }
        if self
            .state
            .joining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TriviaError::AlreadyJoining);
        }
        let params = JoinLobbyParams {
            username: username.to_string(),
            ..params
        };
        self.cmd_tx.send(Command::Join(params)).map_err(|_| {
            self.state.joining.store(false, Ordering::Release);
            TriviaError::NotConnected
        })
    }

    /// Answer the open question.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::AnswerLocked`] when no question is open, its
    /// result is already shown, or this client is spectating; otherwise
    /// [`TriviaError::NotConnected`] if there is no live connection.
    pub fn submit_answer(&self, answer: impl Into<String>) -> Result<()> {
        if self.snapshot_rx.borrow().answer_locked() {
            return Err(TriviaError::AnswerLocked);
        }
        self.send(ClientCommand::SubmitAnswer {
            answer: answer.into(),
        })
    }

    /// Spend a help on the open question.
    ///
    /// # Errors
    ///
    /// - [`TriviaError::HelpsLocked`] if the round is resolved, this client
    ///   already answered, or it is spectating
    /// - [`TriviaError::HelpUnavailable`] if `kind` was already spent
    /// - [`TriviaError::NotConnected`] if there is no live connection
    pub fn use_help(&self, kind: HelpKind) -> Result<()> {
        {
            let snapshot = self.snapshot_rx.borrow();
            if snapshot.helps_locked() {
                return Err(TriviaError::HelpsLocked);
            }
            if !snapshot.helps.is_available(kind) {
                return Err(TriviaError::HelpUnavailable(kind));
            }
        }
        self.send(ClientCommand::UseHelp { kind })
    }

    /// Post a text line to the game chat. Surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::EmptyChatMessage`] for blank text, or
    /// [`TriviaError::NotConnected`] if there is no live connection.
    pub fn send_chat_message(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TriviaError::EmptyChatMessage);
        }
        self.send(ClientCommand::SendChatMessage {
            message: Some(text.to_string()),
            emoji: None,
        })
    }

    /// Post an emoji reaction to the game chat.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::EmptyChatMessage`] for a blank symbol, or
    /// [`TriviaError::NotConnected`] if there is no live connection.
    pub fn send_emoji(&self, symbol: &str) -> Result<()> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(TriviaError::EmptyChatMessage);
        }
        self.send(ClientCommand::SendChatMessage {
            message: None,
            emoji: Some(symbol.to_string()),
        })
    }

    /// Return to mode selection, discarding the finished (or abandoned) game.
    /// Works while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::NotConnected`] if the session task has exited.
    pub fn play_again(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::PlayAgain)
            .map_err(|_| TriviaError::NotConnected)
    }

    /// Close the connection and stop the session task.
    ///
    /// The event receiver yields a final `Disconnected` and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("TriviaClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// A receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshot_rx.clone()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot_rx.borrow())
    }

    /// Derived phase of the latest snapshot.
    pub fn phase(&self) -> Phase {
        self.snapshot_rx.borrow().phase()
    }

    /// Returns `true` while a transport connection is live.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Returns `true` while a join request is in flight.
    pub fn is_joining(&self) -> bool {
        self.state.joining.load(Ordering::Acquire)
    }

    fn send(&self, command: ClientCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(TriviaError::NotConnected);
        }
        self.cmd_tx
            .send(Command::Send(command))
            .map_err(|_| TriviaError::NotConnected)
    }
}

impl std::fmt::Debug for TriviaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriviaClient")
            .field("connected", &self.is_connected())
            .field("joining", &self.is_joining())
            .field("phase", &self.phase())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for TriviaClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close from `Drop`; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session task ────────────────────────────────────────────────────

/// Everything the session task owns besides the transport.
struct Session {
    engine: SyncEngine,
    event_tx: mpsc::Sender<TriviaEvent>,
    snapshot_tx: watch::Sender<Arc<SessionSnapshot>>,
    state: Arc<ClientState>,
    phase: Phase,
    joining: bool,
}

/// Why a connected stretch ended.
enum Exit {
    Shutdown,
    Lost(Option<String>),
}

impl Session {
    /// Publish the engine's snapshot and emit edge events.
    async fn publish(&mut self) {
        let snapshot = self.engine.snapshot();
        let phase = snapshot.phase();
        let joining = snapshot.intent.joining;
        if self.joining && !joining {
            self.state.joining.store(false, Ordering::Release);
        }
        self.joining = joining;
        self.snapshot_tx.send_replace(Arc::new(snapshot.clone()));

        if phase != self.phase {
            let from = std::mem::replace(&mut self.phase, phase);
            debug!(%from, to = %phase, "phase changed");
            emit_event(&self.event_tx, TriviaEvent::PhaseChanged { from, to: phase }).await;
        }
    }

    async fn on_connected(&mut self) {
        self.state.connected.store(true, Ordering::Release);
        self.engine.apply(&ServerEvent::Connect, Instant::now());
        self.publish().await;
        emit_event(&self.event_tx, TriviaEvent::Connected).await;
    }

    async fn on_disconnected(&mut self, reason: Option<String>) {
        self.state.connected.store(false, Ordering::Release);
        self.state.joining.store(false, Ordering::Release);
        self.engine.apply(&ServerEvent::Disconnect, Instant::now());
        self.publish().await;
        emit_disconnected(&self.event_tx, reason).await;
    }

    /// Decode and reconcile one inbound event array.
    async fn on_frame(&mut self, text: &str) {
        let event = match ServerEvent::from_frame(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, raw = %text, "failed to decode server event");
                return;
            }
        };

        if matches!(event, ServerEvent::Connect | ServerEvent::Disconnect) {
            emit_event(
                &self.event_tx,
                TriviaEvent::Discarded {
                    event: event.name(),
                    reason: "reserved event name",
                },
            )
            .await;
            return;
        }

        match self.engine.apply(&event, Instant::now()) {
            Reconciliation::Applied => {
                debug!(event = event.name(), revision = self.engine.snapshot().revision, "applied");
                self.publish().await;
                emit_event(&self.event_tx, TriviaEvent::Update(event)).await;
            }
            Reconciliation::Unchanged => {
                emit_event(&self.event_tx, TriviaEvent::Update(event)).await;
            }
            Reconciliation::Discarded { reason } => {
                emit_event(
                    &self.event_tx,
                    TriviaEvent::Discarded {
                        event: event.name(),
                        reason,
                    },
                )
                .await;
            }
        }
    }

    /// Handle a command that needs no connection; others are dropped.
    async fn on_offline_command(&mut self, command: Command) {
        match command {
            Command::PlayAgain => {
                self.engine.play_again();
                self.publish().await;
            }
            Command::Join(params) => {
                warn!(username = %params.username, "dropping join request while disconnected");
                self.state.joining.store(false, Ordering::Release);
            }
            Command::Send(cmd) => {
                warn!(command = cmd.name(), "dropping command while disconnected");
            }
        }
    }

    async fn expire_fault(&mut self) {
        if self.engine.expire_fault(Instant::now()) {
            self.publish().await;
            emit_event(&self.event_tx, TriviaEvent::FaultCleared).await;
        }
    }

    fn fault_deadline(&self) -> Option<Instant> {
        self.engine.fault_deadline()
    }
}

/// Sleeps until the fault deadline, or forever when there is none.
async fn fault_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Connect, run, and reconnect until shutdown or the attempt budget runs out.
async fn session_loop<C: Connector>(
    mut connector: C,
    mut session: Session,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: oneshot::Receiver<()>,
    config: TriviaConfig,
) {
    debug!("session loop started");

    loop {
        let Some(transport) =
            establish(&mut connector, &mut session, &mut cmd_rx, &mut shutdown_rx, &config).await
        else {
            break;
        };

        session.on_connected().await;
        match run_connected(transport, &mut session, &mut cmd_rx, &mut shutdown_rx).await {
            Exit::Shutdown => {
                session.on_disconnected(Some("client shut down".into())).await;
                break;
            }
            Exit::Lost(reason) => {
                info!(reason = ?reason, "connection lost; reconnecting");
                session.on_disconnected(reason).await;
            }
        }
    }

    debug!("session loop exited");
}

/// Obtain a connected transport, retrying with backoff.
///
/// Returns `None` on shutdown or when the attempt budget is spent; the final
/// `Disconnected` has been emitted in both cases.
async fn establish<C: Connector>(
    connector: &mut C,
    session: &mut Session,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    config: &TriviaConfig,
) -> Option<C::Transport> {
    let mut failures: u32 = 0;

    loop {
        let outcome = {
            let connect = connector.connect();
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    _ = &mut *shutdown_rx => break None,
                    Some(cmd) = cmd_rx.recv() => session.on_offline_command(cmd).await,
                    _ = fault_timer(session.fault_deadline()) => session.expire_fault().await,
                }
            }
        };

        let error = match outcome {
            Some(Ok(transport)) => return Some(transport),
            Some(Err(e)) => e,
            None => {
                emit_disconnected(&session.event_tx, Some("client shut down".into())).await;
                return None;
            }
        };

        failures = failures.saturating_add(1);
        warn!(error = %error, attempt = failures, "connection attempt failed");
        if config.max_reconnect_attempts.is_some_and(|max| failures >= max) {
            error!(attempts = failures, "giving up on reconnecting");
            emit_disconnected(
                &session.event_tx,
                Some(format!("reconnect attempts exhausted: {error}")),
            )
            .await;
            return None;
        }

        let delay = config.reconnect_backoff(failures);
        emit_event(
            &session.event_tx,
            TriviaEvent::Reconnecting {
                attempt: failures,
                delay,
            },
        )
        .await;

        // `sleep` saturates overlong delays instead of overflowing the deadline.
        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                () = &mut backoff => break,
                _ = &mut *shutdown_rx => {
                    emit_disconnected(&session.event_tx, Some("client shut down".into())).await;
                    return None;
                }
                Some(cmd) = cmd_rx.recv() => session.on_offline_command(cmd).await,
                _ = fault_timer(session.fault_deadline()) => session.expire_fault().await,
            }
        }
    }
}

/// Multiplex commands, shutdown, inbound frames and the fault timer over a
/// live transport.
async fn run_connected(
    mut transport: impl Transport,
    session: &mut Session,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Exit {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed, closing transport");
                    let _ = transport.close().await;
                    return Exit::Shutdown;
                };
                let outbound = match cmd {
                    Command::Send(outbound) => outbound,
                    Command::Join(params) => {
                        session.engine.begin_join(&params.username, params.mode, params.bot_difficulty);
                        session.publish().await;
                        ClientCommand::JoinLobbyRequest {
                            username: params.username,
                            mode: params.mode,
                            bot_difficulty: params.bot_difficulty,
                        }
                    }
                    Command::PlayAgain => {
                        session.engine.play_again();
                        session.publish().await;
                        continue;
                    }
                };
                debug!(command = outbound.name(), "sending client command");
                match outbound.to_frame() {
                    Ok(frame) => {
                        if let Err(e) = transport.send(frame).await {
                            error!("transport send error: {e}");
                            return Exit::Lost(Some(format!("transport send error: {e}")));
                        }
                    }
                    Err(e) => {
                        error!("failed to serialize {}: {e}", outbound.name());
                        session.engine.cancel_join();
                        session.publish().await;
                    }
                }
            }

            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                return Exit::Shutdown;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => session.on_frame(&text).await,
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return Exit::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("transport closed by server");
                        return Exit::Lost(None);
                    }
                }
            }

            _ = fault_timer(session.fault_deadline()) => session.expire_fault().await,
        }
    }
}

/// Emit an event without blocking; drops it with a warning when the channel is full.
async fn emit_event(event_tx: &mpsc::Sender<TriviaEvent>, event: TriviaEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// `Disconnected` is awaited rather than dropped so consumers always see it.
async fn emit_disconnected(event_tx: &mpsc::Sender<TriviaEvent>, reason: Option<String>) {
    if event_tx
        .send(TriviaEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted frames; hangs once the script is exhausted.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, TriviaError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, event_array: String) -> std::result::Result<(), TriviaError> {
            self.sent.lock().unwrap().push(event_array);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, TriviaError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), TriviaError> {
            Ok(())
        }
    }

    /// Hands out one scripted transport, then never connects again.
    struct OnceConnector(Option<MockTransport>);

    #[async_trait]
    impl Connector for OnceConnector {
        type Transport = MockTransport;

        async fn connect(&mut self) -> std::result::Result<MockTransport, TriviaError> {
            match self.0.take() {
                Some(transport) => Ok(transport),
                None => std::future::pending().await,
            }
        }
    }

    fn mock(frames: &[&str]) -> (OnceConnector, Arc<StdMutex<Vec<String>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = MockTransport {
            incoming: frames.iter().map(|f| Some(Ok((*f).to_string()))).collect(),
            sent: Arc::clone(&sent),
        };
        (OnceConnector(Some(transport)), sent)
    }

    #[test]
    fn config_defaults() {
        let config = TriviaConfig::default();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.lobby_default_wait, Duration::from_secs(30));
        assert_eq!(config.fault_display, Duration::from_secs(5));
        assert_eq!(config.event_channel_capacity, 256);
        assert!(config.max_reconnect_attempts.is_none());
    }

    #[test]
    fn event_channel_capacity_is_clamped() {
        let config = TriviaConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let config = TriviaConfig::default();
        assert_eq!(config.reconnect_backoff(1), Duration::from_secs(1));
        assert_eq!(config.reconnect_backoff(2), Duration::from_secs(2));
        assert_eq!(config.reconnect_backoff(3), Duration::from_secs(4));
        assert_eq!(config.reconnect_backoff(4), Duration::from_secs(5));
        assert_eq!(config.reconnect_backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn env_lookup_overrides_defaults() {
        let config = TriviaConfig::from_lookup(|key| match key {
            ENV_BACKEND_URL => Some(" http://game.local:8080 ".into()),
            ENV_LOBBY_WAIT_TIME => Some("45".into()),
            _ => None,
        });
        assert_eq!(config.backend_url, "http://game.local:8080");
        assert_eq!(config.lobby_default_wait, Duration::from_secs(45));
    }

    #[test]
    fn env_lookup_ignores_invalid_wait_time() {
        let config = TriviaConfig::from_lookup(|key| match key {
            ENV_LOBBY_WAIT_TIME => Some("soon".into()),
            _ => None,
        });
        assert_eq!(config.lobby_default_wait, Duration::from_secs(30));
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    }

    #[tokio::test]
    async fn connected_then_ack_updates_snapshot() {
        let (connector, _sent) = mock(&[r#"["connection_ack",{"sid":"abc"}]"#]);
        let (mut client, mut events) = TriviaClient::start(connector, TriviaConfig::default());

        assert_eq!(events.recv().await.unwrap(), TriviaEvent::Connected);
        let event = events.recv().await.unwrap();
        assert!(matches!(event, TriviaEvent::Update(ServerEvent::ConnectionAck(_))));

        let snapshot = client.snapshot();
        assert!(snapshot.connection.connected);
        assert_eq!(snapshot.connection.self_id.as_deref(), Some("abc"));
        assert!(client.is_connected());

        client.shutdown().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn join_sends_trimmed_username_and_blocks_second_join() {
        let (connector, sent) = mock(&[]);
        let (mut client, mut events) = TriviaClient::start(connector, TriviaConfig::default());
        assert_eq!(events.recv().await.unwrap(), TriviaEvent::Connected);

        client
            .join_lobby(JoinLobbyParams::new("  ana  ", GameMode::Classic))
            .unwrap();
        let err = client
            .join_lobby(JoinLobbyParams::new("ana", GameMode::Classic))
            .unwrap_err();
        assert!(matches!(err, TriviaError::AlreadyJoining));

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            TriviaEvent::PhaseChanged {
                from: Phase::UsernamePrompt,
                to: Phase::Lobby
            }
        );

        client.shutdown().await;
        let sent = sent.lock().unwrap();
        let frame: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(
            frame,
            serde_json::json!(["join_lobby_request", {"username": "ana", "mode": "classic", "bot_difficulty": "easy"}])
        );
        assert!(!client.is_joining());
    }

    #[tokio::test]
    async fn blank_username_is_rejected_locally() {
        let (connector, sent) = mock(&[]);
        let (mut client, _events) = TriviaClient::start(connector, TriviaConfig::default());

        let err = client
            .join_lobby(JoinLobbyParams::new("   ", GameMode::Classic))
            .unwrap_err();
        assert!(matches!(err, TriviaError::EmptyUsername));
        assert!(err.is_local_rejection());

        client.shutdown().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn debug_impl_reports_state() {
        let (connector, _sent) = mock(&[]);
        let (mut client, _events) = TriviaClient::start(connector, TriviaConfig::default());
        let debug = format!("{client:?}");
        assert!(debug.contains("TriviaClient"));
        assert!(debug.contains("has_task: true"));
        client.shutdown().await;
    }
}
