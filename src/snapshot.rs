//! The Session Snapshot: everything the presentation layer renders.
//!
//! A snapshot is only ever mutated by [`SyncEngine`](crate::engine::SyncEngine)
//! and published as an immutable `Arc<SessionSnapshot>`, so readers always
//! see a state in which every reconciliation rule has run to completion.

use std::fmt;

use tokio::time::Instant;

use crate::protocol::{
    BotDifficulty, ChatEntry, GameMode, GameOver, GameSession, HelpBudget, LobbyStatus,
    PlayerId, PlayerState, QuestionResult, RoundQuestion,
};

/// Transport connectivity and the server-assigned identity of this client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub connected: bool,
    /// Set by `connection_ack`; kept across a disconnect until the next ack.
    pub self_id: Option<PlayerId>,
}

/// A server-declared error shown to the user for a bounded time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub raised_at: Instant,
}

/// What the local user asked for, independent of server state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIntent {
    pub username: String,
    pub desired_mode: Option<GameMode>,
    pub bot_difficulty: BotDifficulty,
    /// A join request is in flight and no game or leaderboard has arrived yet.
    pub joining: bool,
}

/// Top-level screen the presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    UsernamePrompt,
    Lobby,
    Game,
    Leaderboard,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UsernamePrompt => "username_prompt",
            Self::Lobby => "lobby",
            Self::Game => "game",
            Self::Leaderboard => "leaderboard",
        };
        f.write_str(name)
    }
}

/// The full client-side view of shared game state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionIdentity,
    /// Mode of a game already running when this client connected.
    pub game_in_progress_mode: Option<GameMode>,
    pub lobby: LobbyStatus,
    pub game: Option<GameSession>,
    pub question: Option<RoundQuestion>,
    pub result: Option<QuestionResult>,
    pub leaderboard: Option<GameOver>,
    pub helps: HelpBudget,
    pub chat: Vec<ChatEntry>,
    pub fault: Option<Fault>,
    pub intent: LocalIntent,
    /// Latest "call a friend" advice; display only.
    pub advice: Option<String>,
    /// Bumped by every applied rule.
    pub revision: u64,
}

impl SessionSnapshot {
    /// An empty snapshot with an idle lobby of `lobby_wait_seconds`.
    pub fn new(lobby_wait_seconds: u32) -> Self {
        Self {
            connection: ConnectionIdentity::default(),
            game_in_progress_mode: None,
            lobby: LobbyStatus::idle(lobby_wait_seconds),
            game: None,
            question: None,
            result: None,
            leaderboard: None,
            helps: HelpBudget::default(),
            chat: Vec::new(),
            fault: None,
            intent: LocalIntent::default(),
            advice: None,
            revision: 0,
        }
    }

    /// Derives the current phase. A running game wins over a leaderboard,
    /// which wins over a pending lobby choice.
    pub fn phase(&self) -> Phase {
        if self.game.is_some() {
            Phase::Game
        } else if self.leaderboard.is_some() {
            Phase::Leaderboard
        } else if self.intent.desired_mode.is_some() {
            Phase::Lobby
        } else {
            Phase::UsernamePrompt
        }
    }

    /// This client's player record in the running game.
    ///
    /// Matched by id first. If the id is unknown (for instance the ack has
    /// not arrived yet), falls back to the local username, but only when
    /// exactly one human player carries it.
    pub fn me(&self) -> Option<&PlayerState> {
        let game = self.game.as_ref()?;
        resolve_self(
            &game.players,
            self.connection.self_id.as_deref(),
            &self.intent.username,
        )
    }

    /// Eliminated from a battle royale game and watching the rest play.
    pub fn is_spectating(&self) -> bool {
        let battle_royale = self
            .game
            .as_ref()
            .is_some_and(|g| g.mode == GameMode::BattleRoyale);
        battle_royale && self.me().is_some_and(|p| p.is_eliminated)
    }

    /// Final place of this client, once the server assigned one.
    pub fn my_place(&self) -> Option<u32> {
        self.me().map(|p| p.place).filter(|place| *place > 0)
    }

    /// Helps cannot be spent: the round is resolved, this client is
    /// spectating, or it already answered.
    pub fn helps_locked(&self) -> bool {
        self.question.is_none()
            || self.result.is_some()
            || self.is_spectating()
            || self.me().is_some_and(|p| p.answered_this_round)
    }

    /// Answers cannot be submitted: no open question, the round is
    /// resolved, or this client is spectating.
    pub fn answer_locked(&self) -> bool {
        self.question.is_none() || self.result.is_some() || self.is_spectating()
    }

    /// Players still in the running: the server's count in battle royale,
    /// the roster size otherwise.
    pub fn players_remaining(&self) -> usize {
        let Some(game) = self.game.as_ref() else {
            return 0;
        };
        let reported = self
            .question
            .as_ref()
            .and_then(|q| q.active_player_count)
            .filter(|_| game.mode == GameMode::BattleRoyale);
        match reported {
            Some(count) => usize::try_from(count).unwrap_or(usize::MAX),
            None => game.active_players().count(),
        }
    }
}

/// Resolves the local player inside `players`.
pub(crate) fn resolve_self<'a>(
    players: &'a [PlayerState],
    self_id: Option<&str>,
    username: &str,
) -> Option<&'a PlayerState> {
    if let Some(id) = self_id {
        if let Some(player) = players.iter().find(|p| p.id == id) {
            return Some(player);
        }
    }
    if username.is_empty() {
        return None;
    }
    let mut humans = players
        .iter()
        .filter(|p| !p.is_bot && p.username == username);
    match (humans.next(), humans.next()) {
        (Some(only), None) => Some(only),
        _ => None,
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

    fn player(id: &str, name: &str, is_bot: bool) -> PlayerState {
        PlayerState {
            id: id.into(),
            username: name.into(),
            is_bot,
            score: 0,
            answered_this_round: false,
            current_answer_correct: None,
            points_this_round: 0,
            place: 0,
            is_eliminated: false,
            helps: None,
        }
    }

    fn with_game(mode: GameMode, players: Vec<PlayerState>) -> SessionSnapshot {
        let mut snap = SessionSnapshot::new(30);
        snap.game = Some(GameSession {
            mode,
            players,
            initial_player_count: 0,
            session_id: "g".into(),
        });
        snap
    }

    fn question(active: Option<u32>) -> RoundQuestion {
        RoundQuestion {
            text: "q".into(),
            number: 1,
            total: crate::protocol::QuestionTotal::Count(5),
            duration: 20,
            difficulty: crate::protocol::Difficulty::Level(1),
            options: vec!["a".into(), "b".into()],
            active_player_count: active,
            initial_player_count: None,
            fifty_fifty_used: false,
            double_score_active: false,
        }
    }

    #[test]
    fn phase_precedence() {
        let mut snap = SessionSnapshot::new(30);
        assert_eq!(snap.phase(), Phase::UsernamePrompt);

        snap.intent.desired_mode = Some(GameMode::Classic);
        assert_eq!(snap.phase(), Phase::Lobby);

        snap.leaderboard = Some(GameOver {
            leaderboard: Vec::new(),
            mode: None,
        });
        assert_eq!(snap.phase(), Phase::Leaderboard);

        snap.game = with_game(GameMode::Classic, Vec::new()).game;
        assert_eq!(snap.phase(), Phase::Game);
    }

    #[test]
    fn me_prefers_id_over_username() {
        let mut snap = with_game(
            GameMode::Classic,
            vec![player("x", "ana", false), player("abc", "bob", false)],
        );
        snap.connection.self_id = Some("abc".into());
        snap.intent.username = "ana".into();
        assert_eq!(snap.me().unwrap().id, "abc");
    }

    #[test]
    fn username_fallback_requires_a_unique_human() {
        let mut snap = with_game(
            GameMode::Classic,
            vec![player("b1", "ana", true), player("x", "ana", false)],
        );
        snap.intent.username = "ana".into();
        assert_eq!(snap.me().unwrap().id, "x");

        snap.game
            .as_mut()
            .unwrap()
            .players
            .push(player("y", "ana", false));
        assert!(snap.me().is_none());
    }

    #[test]
    fn spectating_only_in_battle_royale() {
        let mut eliminated = player("abc", "ana", false);
        eliminated.is_eliminated = true;

        let mut snap = with_game(GameMode::BattleRoyale, vec![eliminated.clone()]);
        snap.connection.self_id = Some("abc".into());
        snap.question = Some(question(Some(3)));
        assert!(snap.is_spectating());
        assert!(snap.answer_locked());
        assert!(snap.helps_locked());

        let mut snap = with_game(GameMode::Classic, vec![eliminated]);
        snap.connection.self_id = Some("abc".into());
        snap.question = Some(question(None));
        assert!(!snap.is_spectating());
        assert!(!snap.answer_locked());
    }

    #[test]
    fn answering_locks_helps_but_not_answers() {
        let mut me = player("abc", "ana", false);
        me.answered_this_round = true;
        let mut snap = with_game(GameMode::Classic, vec![me]);
        snap.connection.self_id = Some("abc".into());
        snap.question = Some(question(None));
        assert!(snap.helps_locked());
        assert!(!snap.answer_locked());
    }

    #[test]
    fn players_remaining_uses_reported_count_in_battle_royale() {
        let mut snap = with_game(
            GameMode::BattleRoyale,
            vec![player("a", "a", false), player("b", "b", true)],
        );
        assert_eq!(snap.players_remaining(), 2);
        snap.question = Some(question(Some(7)));
        assert_eq!(snap.players_remaining(), 7);
    }

    #[test]
    fn my_place_ignores_undetermined() {
        let mut snap = with_game(GameMode::BattleRoyale, vec![player("abc", "ana", false)]);
        snap.connection.self_id = Some("abc".into());
        assert_eq!(snap.my_place(), None);
        snap.game.as_mut().unwrap().players[0].place = 2;
        assert_eq!(snap.my_place(), Some(2));
    }
}
