//! Synchronization engine: one reconciliation rule per inbound event.
//!
//! [`SyncEngine`] owns the [`SessionSnapshot`] exclusively. Every call to
//! [`apply`](SyncEngine::apply) runs a single rule to completion; payloads
//! are fully decoded before they get here, so no rule can fail halfway and
//! leave a torn snapshot behind.
//!
//! The engine is synchronous and knows nothing about transports or tasks.
//! Time is passed in explicitly so the fault window can be driven by a
//! paused tokio clock in tests.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::protocol::{
    BotDifficulty, ChatEntry, ConnectionAck, GameMode, GameOver, GameSession, HelpKind,
    HelpResult, LobbyStatus, QuestionResult, RoundQuestion, ServerEvent,
};
use crate::snapshot::{resolve_self, Fault, SessionSnapshot};

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The snapshot changed and its revision was bumped.
    Applied,
    /// The event was valid but carries nothing to store.
    Unchanged,
    /// The event was rejected; the snapshot is untouched.
    Discarded { reason: &'static str },
}

impl Reconciliation {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Owns the session snapshot and applies server events to it.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    snapshot: SessionSnapshot,
    lobby_default_wait: u32,
    fault_window: Duration,
}

impl SyncEngine {
    /// Creates an engine with an empty snapshot.
    ///
    /// `lobby_default_wait` is the countdown shown by an idle lobby;
    /// `fault_window` is how long a server fault stays visible.
    pub fn new(lobby_default_wait: Duration, fault_window: Duration) -> Self {
        let lobby_default_wait = u32::try_from(lobby_default_wait.as_secs()).unwrap_or(u32::MAX);
        Self {
            snapshot: SessionSnapshot::new(lobby_default_wait),
            lobby_default_wait,
            fault_window,
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Applies the reconciliation rule for `event`.
    pub fn apply(&mut self, event: &ServerEvent, now: Instant) -> Reconciliation {
        let outcome = match event {
            ServerEvent::Connect => {
                self.snapshot.connection.connected = true;
                Reconciliation::Applied
            }
            ServerEvent::Disconnect => {
                self.snapshot.connection.connected = false;
                self.snapshot.intent.joining = false;
                Reconciliation::Applied
            }
            ServerEvent::ConnectionAck(ack) => self.on_connection_ack(ack),
            ServerEvent::ErrorMessage { message } => self.on_error(message, now),
            ServerEvent::LobbyCountdownUpdate(status) => {
                self.snapshot.lobby = status.clone();
                Reconciliation::Applied
            }
            ServerEvent::GameStarting(session) => self.on_game_starting(session),
            ServerEvent::NewQuestion(question) => self.on_new_question(question),
            ServerEvent::QuestionResult(result) => self.on_question_result(result),
            ServerEvent::GameOver(over) => self.on_game_over(over),
            ServerEvent::HelpResult(help) => self.on_help_result(help),
            ServerEvent::NewChatMessage(entry) => {
                self.snapshot.chat.push(entry.clone());
                Reconciliation::Applied
            }
            ServerEvent::PlayerUsedHelp {
                username,
                help_type,
            } => {
                self.snapshot
                    .chat
                    .push(ChatEntry::system(format!("{username} used {help_type}.")));
                Reconciliation::Applied
            }
            ServerEvent::PlayerLeft { sid, username } => {
                if let Some(game) = self.snapshot.game.as_mut() {
                    game.players.retain(|p| p.id != *sid);
                }
                self.snapshot
                    .chat
                    .push(ChatEntry::system(format!("{username} has left.")));
                Reconciliation::Applied
            }
            ServerEvent::AnswerReceipt { .. } => Reconciliation::Unchanged,
        };

        match outcome {
            Reconciliation::Applied => self.bump(),
            Reconciliation::Discarded { reason } => {
                debug!(event = event.name(), reason, "event discarded");
            }
            Reconciliation::Unchanged => {}
        }
        outcome
    }

    // ── Local intents ───────────────────────────────────────────────

    /// Records a lobby join request and marks it in flight.
    pub fn begin_join(&mut self, username: &str, mode: GameMode, bot_difficulty: BotDifficulty) {
        let intent = &mut self.snapshot.intent;
        intent.username = username.to_string();
        intent.desired_mode = Some(mode);
        intent.bot_difficulty = bot_difficulty;
        intent.joining = true;
        self.bump();
    }

    /// Clears the in-flight marker after a join could not be sent.
    pub fn cancel_join(&mut self) {
        if self.snapshot.intent.joining {
            self.snapshot.intent.joining = false;
            self.bump();
        }
    }

    /// Leaves the leaderboard (or an abandoned game) for mode selection.
    ///
    /// The username is kept so the user can rejoin in one step.
    pub fn play_again(&mut self) {
        let snap = &mut self.snapshot;
        snap.intent.desired_mode = None;
        snap.intent.joining = false;
        snap.game = None;
        snap.question = None;
        snap.result = None;
        snap.leaderboard = None;
        snap.advice = None;
        snap.lobby = LobbyStatus::idle(self.lobby_default_wait);
        self.bump();
    }

    /// When the visible fault should disappear.
    ///
    /// `None` if there is no fault, or if the window is too long to land on
    /// a representable instant (the fault then stays until replaced).
    pub fn fault_deadline(&self) -> Option<Instant> {
        self.snapshot
            .fault
            .as_ref()
            .and_then(|fault| fault.raised_at.checked_add(self.fault_window))
    }

    /// Clears the fault if its window has elapsed at `now`.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn expire_fault(&mut self, now: Instant) -> bool {
        match self.fault_deadline() {
            Some(deadline) if deadline <= now => {
                self.snapshot.fault = None;
                self.bump();
                true
            }
            _ => false,
        }
    }

    // ── Rules ───────────────────────────────────────────────────────

    fn on_connection_ack(&mut self, ack: &ConnectionAck) -> Reconciliation {
        let snap = &mut self.snapshot;
        snap.connection.self_id = Some(ack.sid.clone());
        snap.game_in_progress_mode = ack.game_in_progress_mode;
        if let Some(lobby) = &ack.lobby_status {
            snap.lobby = lobby.clone();
        }
        Reconciliation::Applied
    }

    fn on_error(&mut self, message: &str, now: Instant) -> Reconciliation {
        if message.trim().is_empty() {
            return Reconciliation::Discarded {
                reason: "empty error message",
            };
        }
        self.snapshot.fault = Some(Fault {
            message: message.to_string(),
            raised_at: now,
        });
        Reconciliation::Applied
    }

    fn on_game_starting(&mut self, session: &GameSession) -> Reconciliation {
        let snap = &mut self.snapshot;
        snap.helps = resolve_self(
            &session.players,
            snap.connection.self_id.as_deref(),
            &snap.intent.username,
        )
        .and_then(|me| me.helps)
        .unwrap_or_default();
        snap.game = Some(session.clone());
        snap.chat.clear();
        snap.question = None;
        snap.result = None;
        snap.leaderboard = None;
        snap.advice = None;
        snap.intent.joining = false;
        Reconciliation::Applied
    }

    fn on_new_question(&mut self, question: &RoundQuestion) -> Reconciliation {
        let snap = &mut self.snapshot;
        if let Some(current) = &snap.question {
            if question.number <= current.number {
                return Reconciliation::Discarded {
                    reason: "question number not newer than current",
                };
            }
        }
        snap.question = Some(question.clone());
        snap.result = None;
        snap.advice = None;
        if let Some(game) = snap.game.as_mut() {
            for player in &mut game.players {
                player.reset_round();
            }
        }
        Reconciliation::Applied
    }

    fn on_question_result(&mut self, result: &QuestionResult) -> Reconciliation {
        let snap = &mut self.snapshot;
        if let (Some(number), Some(current)) = (result.question_number, &snap.question) {
            if number != current.number {
                return Reconciliation::Discarded {
                    reason: "result for a different question",
                };
            }
        }

        let self_id = match snap.game.as_ref() {
            Some(game) => resolve_self(
                &game.players,
                snap.connection.self_id.as_deref(),
                &snap.intent.username,
            )
            .map(|me| me.id.clone()),
            None => None,
        }
        .or_else(|| snap.connection.self_id.clone());

        if let Some(budget) = self_id
            .as_ref()
            .and_then(|id| result.player_data.get(id))
            .and_then(|delta| delta.helps)
        {
            snap.helps = budget;
        }

        let mut mode = result.mode;
        if let Some(game) = snap.game.as_mut() {
            for player in &mut game.players {
                if let Some(delta) = result.player_data.get(&player.id) {
                    player.merge(delta);
                }
            }
            mode = mode.or(Some(game.mode));
        }

        if mode == Some(GameMode::BattleRoyale) {
            if let (Some(count), Some(question)) =
                (result.active_player_count, snap.question.as_mut())
            {
                question.active_player_count = Some(count);
            }
        }

        snap.result = Some(result.clone());
        Reconciliation::Applied
    }

    fn on_game_over(&mut self, over: &GameOver) -> Reconciliation {
        let snap = &mut self.snapshot;
        snap.leaderboard = Some(over.clone());
        snap.question = None;
        snap.result = None;
        snap.game = None;
        snap.advice = None;
        snap.game_in_progress_mode = None;
        snap.lobby = LobbyStatus::idle(self.lobby_default_wait);
        snap.intent.joining = false;
        Reconciliation::Applied
    }

    fn on_help_result(&mut self, help: &HelpResult) -> Reconciliation {
        let snap = &mut self.snapshot;
        if let Some(budget) = help.helps_remaining {
            snap.helps = budget;
        }
        match help.kind {
            HelpKind::FiftyFifty => {
                if let (Some(options), Some(question)) = (&help.options, snap.question.as_mut()) {
                    question.options = options.clone();
                    question.fifty_fifty_used = true;
                }
            }
            HelpKind::DoubleScore => {
                // Only a confirmed activation carries a message.
                if let (Some(_), Some(question)) = (&help.message, snap.question.as_mut()) {
                    question.double_score_active = true;
                }
            }
            HelpKind::CallFriend => {
                if let Some(text) = help.advice.as_ref().or(help.message.as_ref()) {
                    snap.advice = Some(text.clone());
                }
            }
        }
        Reconciliation::Applied
    }

    fn bump(&mut self) {
        self.snapshot.revision = self.snapshot.revision.wrapping_add(1);
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(5))
    }
}

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
    use crate::protocol::{Difficulty, HelpBudget, PlayerState, QuestionTotal};

    fn question(number: u32) -> RoundQuestion {
        RoundQuestion {
            text: format!("question {number}"),
            number,
            total: QuestionTotal::Count(10),
            duration: 20,
            difficulty: Difficulty::Level(1),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            active_player_count: None,
            initial_player_count: None,
            fifty_fifty_used: false,
            double_score_active: false,
        }
    }

    fn session(mode: GameMode) -> GameSession {
        GameSession {
            mode,
            players: vec![PlayerState {
                id: "abc".into(),
                username: "ana".into(),
                is_bot: false,
                score: 0,
                answered_this_round: false,
                current_answer_correct: None,
                points_this_round: 0,
                place: 0,
                is_eliminated: false,
                helps: None,
            }],
            initial_player_count: 1,
            session_id: "classic_1".into(),
        }
    }

    #[test]
    fn connect_and_disconnect_toggle_connectivity_only() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        engine.apply(&ServerEvent::Connect, now);
        engine.apply(&ServerEvent::GameStarting(session(GameMode::Classic)), now);
        engine.apply(&ServerEvent::Disconnect, now);

        let snap = engine.snapshot();
        assert!(!snap.connection.connected);
        assert!(snap.game.is_some());
    }

    #[test]
    fn disconnect_clears_pending_join() {
        let mut engine = SyncEngine::default();
        engine.begin_join("ana", GameMode::Classic, BotDifficulty::Easy);
        assert!(engine.snapshot().intent.joining);
        engine.apply(&ServerEvent::Disconnect, Instant::now());
        assert!(!engine.snapshot().intent.joining);
        assert_eq!(engine.snapshot().intent.desired_mode, Some(GameMode::Classic));
    }

    #[test]
    fn stale_question_is_discarded() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        assert!(engine.apply(&ServerEvent::NewQuestion(question(2)), now).is_applied());
        let revision = engine.snapshot().revision;

        let outcome = engine.apply(&ServerEvent::NewQuestion(question(2)), now);
        assert!(matches!(outcome, Reconciliation::Discarded { .. }));
        let outcome = engine.apply(&ServerEvent::NewQuestion(question(1)), now);
        assert!(matches!(outcome, Reconciliation::Discarded { .. }));
        assert_eq!(engine.snapshot().revision, revision);
    }

    #[test]
    fn result_for_other_question_is_discarded() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        engine.apply(&ServerEvent::NewQuestion(question(3)), now);
        let result = QuestionResult {
            correct_answer: "a".into(),
            player_data: Default::default(),
            mode: None,
            active_player_count: None,
            question_number: Some(2),
        };
        let outcome = engine.apply(&ServerEvent::QuestionResult(result), now);
        assert!(matches!(outcome, Reconciliation::Discarded { .. }));
        assert!(engine.snapshot().result.is_none());
    }

    #[test]
    fn empty_error_message_is_discarded() {
        let mut engine = SyncEngine::default();
        let outcome = engine.apply(
            &ServerEvent::ErrorMessage {
                message: "   ".into(),
            },
            Instant::now(),
        );
        assert!(matches!(outcome, Reconciliation::Discarded { .. }));
        assert!(engine.snapshot().fault.is_none());
    }

    #[test]
    fn newer_fault_replaces_deadline() {
        let mut engine = SyncEngine::default();
        let start = Instant::now();
        engine.apply(
            &ServerEvent::ErrorMessage {
                message: "first".into(),
            },
            start,
        );
        let later = start + Duration::from_secs(3);
        engine.apply(
            &ServerEvent::ErrorMessage {
                message: "second".into(),
            },
            later,
        );

        assert!(!engine.expire_fault(start + Duration::from_secs(5)));
        assert_eq!(engine.snapshot().fault.as_ref().unwrap().message, "second");
        assert!(engine.expire_fault(later + Duration::from_secs(5)));
        assert!(engine.snapshot().fault.is_none());
        assert!(engine.fault_deadline().is_none());
    }

    #[test]
    fn unbounded_fault_window_never_expires() {
        let mut engine = SyncEngine::new(Duration::from_secs(30), Duration::MAX);
        let now = Instant::now();
        engine.apply(
            &ServerEvent::ErrorMessage {
                message: "boom".into(),
            },
            now,
        );

        assert!(engine.fault_deadline().is_none());
        assert!(!engine.expire_fault(now + Duration::from_secs(3600)));
        assert_eq!(engine.snapshot().fault.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn double_score_without_message_is_not_activated() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        engine.apply(&ServerEvent::NewQuestion(question(1)), now);
        engine.apply(
            &ServerEvent::HelpResult(HelpResult {
                kind: HelpKind::DoubleScore,
                helps_remaining: None,
                options: None,
                message: None,
                advice: None,
            }),
            now,
        );

        assert!(!engine.snapshot().question.as_ref().unwrap().double_score_active);
    }

    #[test]
    fn help_results_update_question_locally() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        engine.apply(&ServerEvent::NewQuestion(question(1)), now);

        engine.apply(
            &ServerEvent::HelpResult(HelpResult {
                kind: HelpKind::FiftyFifty,
                helps_remaining: Some(HelpBudget {
                    fifty_fifty: false,
                    call_friend: true,
                    double_score: true,
                }),
                options: Some(vec!["a".into(), "c".into()]),
                message: None,
                advice: None,
            }),
            now,
        );
        engine.apply(
            &ServerEvent::HelpResult(HelpResult {
                kind: HelpKind::DoubleScore,
                helps_remaining: None,
                options: None,
                message: Some("Double score active!".into()),
                advice: None,
            }),
            now,
        );
        engine.apply(
            &ServerEvent::HelpResult(HelpResult {
                kind: HelpKind::CallFriend,
                helps_remaining: None,
                options: None,
                message: None,
                advice: Some("I'd go with c".into()),
            }),
            now,
        );

        let snap = engine.snapshot();
        let q = snap.question.as_ref().unwrap();
        assert_eq!(q.options, vec!["a".to_string(), "c".to_string()]);
        assert!(q.fifty_fifty_used);
        assert!(q.double_score_active);
        assert!(!snap.helps.fifty_fifty);
        assert_eq!(snap.advice.as_deref(), Some("I'd go with c"));

        engine.apply(&ServerEvent::NewQuestion(question(2)), now);
        assert!(engine.snapshot().advice.is_none());
    }

    #[test]
    fn battle_royale_result_updates_active_count() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        engine.apply(&ServerEvent::GameStarting(session(GameMode::BattleRoyale)), now);
        engine.apply(&ServerEvent::NewQuestion(question(1)), now);
        engine.apply(
            &ServerEvent::QuestionResult(QuestionResult {
                correct_answer: "a".into(),
                player_data: Default::default(),
                mode: None,
                active_player_count: Some(4),
                question_number: None,
            }),
            now,
        );
        let q = engine.snapshot().question.as_ref().unwrap();
        assert_eq!(q.active_player_count, Some(4));
    }

    #[test]
    fn answer_receipt_changes_nothing() {
        let mut engine = SyncEngine::default();
        let before = engine.snapshot().clone();
        let outcome = engine.apply(
            &ServerEvent::AnswerReceipt {
                message: "Answer received".into(),
            },
            Instant::now(),
        );
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert_eq!(engine.snapshot(), &before);
    }

    #[test]
    fn play_again_returns_to_mode_selection() {
        let mut engine = SyncEngine::default();
        let now = Instant::now();
        engine.begin_join("ana", GameMode::Classic, BotDifficulty::Advanced);
        engine.apply(&ServerEvent::GameStarting(session(GameMode::Classic)), now);
        engine.apply(
            &ServerEvent::GameOver(GameOver {
                leaderboard: Vec::new(),
                mode: Some(GameMode::Classic),
            }),
            now,
        );
        engine.play_again();

        let snap = engine.snapshot();
        assert!(snap.leaderboard.is_none());
        assert!(snap.intent.desired_mode.is_none());
        assert_eq!(snap.intent.username, "ana");
        assert_eq!(snap.phase(), crate::snapshot::Phase::UsernamePrompt);
    }
}
