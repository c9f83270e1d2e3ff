//! Wire-compatible event types for the trivia game server.
//!
//! The server speaks Socket.IO: every application message is a named event
//! carried as a JSON array `["event_name", payload]`. [`ServerEvent`] and
//! [`ClientCommand`] are the typed forms of that array. The payload structs
//! double as the snapshot's entity types, so a reconciliation rule that
//! "replaces X wholesale" simply moves the decoded payload into place.
//!
//! Field names follow the server's JSON exactly; where the Rust name differs
//! the wire name is kept through `#[serde(rename)]`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TriviaError};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-assigned socket id identifying a connected player (or a bot).
pub type PlayerId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Game mode offered by the lobby.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Fixed number of questions, ranked by score.
    Classic,
    /// Progressive elimination, ranked by place.
    BattleRoyale,
}

impl GameMode {
    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Classic => "Classic",
            Self::BattleRoyale => "Battle Royale",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bot skill level requested when joining a lobby.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotDifficulty {
    #[default]
    Easy,
    Advanced,
    Expert,
}

/// One-shot assists a player may spend once per game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HelpKind {
    /// Removes two wrong options.
    FiftyFifty,
    /// Asks an advisor for a hint.
    CallFriend,
    /// Doubles the points of a correct answer this round.
    DoubleScore,
}

impl HelpKind {
    /// All help kinds, in display order.
    pub const ALL: [HelpKind; 3] = [Self::FiftyFifty, Self::CallFriend, Self::DoubleScore];

    /// Wire name of the help.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiftyFifty => "fifty_fifty",
            Self::CallFriend => "call_friend",
            Self::DoubleScore => "double_score",
        }
    }
}

impl fmt::Display for HelpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a chat log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    User,
    System,
}

/// Total number of questions; battle royale games report a label instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum QuestionTotal {
    Count(u32),
    Label(String),
}

impl Default for QuestionTotal {
    fn default() -> Self {
        Self::Count(0)
    }
}

impl fmt::Display for QuestionTotal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// Question difficulty: a numeric level, or a label when the server has none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Difficulty {
    Level(u32),
    Label(String),
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Label("N/A".to_string())
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(n) => write!(f, "{n}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// Remaining one-shot helps for a player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelpBudget {
    #[serde(default)]
    pub fifty_fifty: bool,
    #[serde(default)]
    pub call_friend: bool,
    #[serde(default)]
    pub double_score: bool,
}

impl Default for HelpBudget {
    /// A fresh game grants every help once.
    fn default() -> Self {
        Self {
            fifty_fifty: true,
            call_friend: true,
            double_score: true,
        }
    }
}

impl HelpBudget {
    /// Whether `kind` can still be spent.
    pub fn is_available(&self, kind: HelpKind) -> bool {
        match kind {
            HelpKind::FiftyFifty => self.fifty_fifty,
            HelpKind::CallFriend => self.call_friend,
            HelpKind::DoubleScore => self.double_score,
        }
    }

    /// Number of helps left.
    pub fn remaining(&self) -> usize {
        HelpKind::ALL
            .iter()
            .filter(|kind| self.is_available(**kind))
            .count()
    }
}

/// A player waiting in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyPlayer {
    #[serde(rename = "sid", default)]
    pub id: PlayerId,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_mode: Option<GameMode>,
    #[serde(
        rename = "bot_difficulty_pref",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bot_difficulty: Option<BotDifficulty>,
}

/// Shared pre-game waiting room. Every field is authoritative, so updates
/// replace the whole value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyStatus {
    pub mode: Option<GameMode>,
    pub time_remaining: u32,
    #[serde(default)]
    pub players: Vec<LobbyPlayer>,
    #[serde(default)]
    pub is_active: bool,
}

impl LobbyStatus {
    /// The idle lobby shown when no countdown is running.
    pub fn idle(wait_seconds: u32) -> Self {
        Self {
            mode: None,
            time_remaining: wait_seconds,
            players: Vec::new(),
            is_active: false,
        }
    }
}

/// One participant inside a running game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerState {
    #[serde(rename = "sid")]
    pub id: PlayerId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub answered_this_round: bool,
    #[serde(default)]
    pub current_answer_correct: Option<bool>,
    #[serde(rename = "potential_points_this_round", default)]
    pub points_this_round: i64,
    /// Final placing in battle royale; `0` while undetermined.
    #[serde(default)]
    pub place: u32,
    #[serde(default)]
    pub is_eliminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helps: Option<HelpBudget>,
}

impl PlayerState {
    /// Clears the flags that only describe the round that just ended.
    pub fn reset_round(&mut self) {
        self.answered_this_round = false;
        self.current_answer_correct = None;
        self.points_this_round = 0;
    }

    /// Overlays the fields present in `delta`, keeping everything else.
    pub fn merge(&mut self, delta: &PlayerDelta) {
        if let Some(score) = delta.score {
            self.score = score;
        }
        if let Some(answered) = delta.answered_this_round {
            self.answered_this_round = answered;
        }
        if let Some(correct) = delta.current_answer_correct {
            self.current_answer_correct = Some(correct);
        }
        if let Some(points) = delta.points_this_round {
            self.points_this_round = points;
        }
        if let Some(place) = delta.place {
            self.place = place;
        }
        if let Some(eliminated) = delta.is_eliminated {
            self.is_eliminated = eliminated;
        }
        if let Some(helps) = delta.helps {
            self.helps = Some(helps);
        }
    }
}

/// Partial per-player update carried by a round result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_this_round: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_answer_correct: Option<bool>,
    #[serde(
        rename = "potential_points_this_round",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub points_this_round: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_eliminated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helps: Option<HelpBudget>,
}

/// An in-progress round-based game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSession {
    pub mode: GameMode,
    #[serde(default)]
    pub players: Vec<PlayerState>,
    #[serde(default)]
    pub initial_player_count: u32,
    #[serde(rename = "game_id", default)]
    pub session_id: String,
}

impl GameSession {
    /// Looks up a player by id.
    pub fn player(&self, id: &str) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Players not yet eliminated.
    pub fn active_players(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.iter().filter(|p| !p.is_eliminated)
    }
}

/// The question currently open for answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundQuestion {
    #[serde(rename = "question")]
    pub text: String,
    #[serde(rename = "question_number")]
    pub number: u32,
    #[serde(rename = "total_questions", default)]
    pub total: QuestionTotal,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_player_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_player_count: Option<u32>,
    /// Set locally once the 50/50 help narrowed `options`.
    #[serde(skip)]
    pub fifty_fifty_used: bool,
    /// Set locally once double score was activated for this question.
    #[serde(skip)]
    pub double_score_active: bool,
}

/// Outcome of the round that just closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionResult {
    pub correct_answer: String,
    #[serde(default)]
    pub player_data: BTreeMap<PlayerId, PlayerDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GameMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_player_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
}

/// A ranked row of the final leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub username: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub place: u32,
}

/// Final standings of a finished game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameOver {
    #[serde(default)]
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GameMode>,
}

impl GameOver {
    /// Entries flagged as winners: the battle royale survivor, or the top
    /// scorer in classic games.
    pub fn winners(&self) -> impl Iterator<Item = &LeaderboardEntry> {
        let battle_royale = self.mode == Some(GameMode::BattleRoyale);
        let top = self.leaderboard.first().map(|e| e.score);
        self.leaderboard.iter().filter(move |entry| {
            if battle_royale {
                entry.place == 1
            } else {
                Some(entry.score) == top
            }
        })
    }
}

/// The private answer to this client's help request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelpResult {
    #[serde(rename = "type")]
    pub kind: HelpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helps_remaining: Option<HelpBudget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
}

/// One line of the chat transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEntry {
    #[serde(rename = "type", default)]
    pub kind: ChatKind,
    #[serde(rename = "sender_sid", default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

impl ChatEntry {
    /// A locally synthesized system notice.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: ChatKind::System,
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Greeting sent by the server right after the socket connects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionAck {
    pub sid: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_in_progress_mode: Option<GameMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lobby_status: Option<LobbyStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── Events ──────────────────────────────────────────────────────────

/// Events pushed from server to client.
///
/// `Connect` and `Disconnect` never travel as frames; the session loop
/// synthesizes them from transport state so that every state change goes
/// through the same reconciliation path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The transport connected.
    Connect,
    /// The transport dropped.
    Disconnect,
    /// Server greeting with this client's id.
    ConnectionAck(ConnectionAck),
    /// A server-declared fault to show the user.
    ErrorMessage {
        #[serde(default)]
        message: String,
    },
    /// Lobby countdown tick or roster change.
    LobbyCountdownUpdate(LobbyStatus),
    /// A game is starting (or being re-sent on rejoin).
    GameStarting(GameSession),
    /// The next question opened.
    NewQuestion(RoundQuestion),
    /// The current question closed.
    QuestionResult(QuestionResult),
    /// The game finished.
    GameOver(GameOver),
    /// Reply to this client's `use_help`.
    HelpResult(HelpResult),
    /// Chat line broadcast to the game room.
    NewChatMessage(ChatEntry),
    /// Another player spent a help.
    PlayerUsedHelp { username: String, help_type: String },
    /// A player disconnected from the game.
    PlayerLeft { sid: PlayerId, username: String },
    /// The server accepted this client's answer.
    AnswerReceipt {
        #[serde(default)]
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::ConnectionAck(_) => "connection_ack",
            Self::ErrorMessage { .. } => "error_message",
            Self::LobbyCountdownUpdate(_) => "lobby_countdown_update",
            Self::GameStarting(_) => "game_starting",
            Self::NewQuestion(_) => "new_question",
            Self::QuestionResult(_) => "question_result",
            Self::GameOver(_) => "game_over",
            Self::HelpResult(_) => "help_result",
            Self::NewChatMessage(_) => "new_chat_message",
            Self::PlayerUsedHelp { .. } => "player_used_help",
            Self::PlayerLeft { .. } => "player_left",
            Self::AnswerReceipt { .. } => "answer_receipt",
        }
    }

    /// Decodes a Socket.IO event array `["name", payload?]`.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Protocol`] if the array has no event name, and
    /// [`TriviaError::Serialization`] for unknown events or malformed payloads.
    pub fn from_frame(text: &str) -> Result<Self> {
        let parts: Vec<Value> = serde_json::from_str(text)?;
        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some(Value::String(name)) => name,
            _ => return Err(TriviaError::Protocol("event array without a name".into())),
        };

        let mut tagged = serde_json::Map::new();
        tagged.insert("event".into(), Value::String(name));
        if let Some(payload) = parts.next().filter(|p| !p.is_null()) {
            tagged.insert("payload".into(), payload);
        }
        Ok(serde_json::from_value(Value::Object(tagged))?)
    }

    /// Encodes the event as a Socket.IO event array.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Serialization`] if the payload cannot be encoded.
    pub fn to_frame(&self) -> Result<String> {
        encode_tagged(serde_json::to_value(self)?)
    }
}

/// Commands sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Ask to be placed in the lobby for `mode`.
    JoinLobbyRequest {
        username: String,
        mode: GameMode,
        bot_difficulty: BotDifficulty,
    },
    /// Answer the open question.
    SubmitAnswer { answer: String },
    /// Spend a help on the open question.
    UseHelp {
        #[serde(rename = "type")]
        kind: HelpKind,
    },
    /// Post a text line and/or an emoji to the game chat.
    SendChatMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emoji: Option<String>,
    },
}

impl ClientCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinLobbyRequest { .. } => "join_lobby_request",
            Self::SubmitAnswer { .. } => "submit_answer",
            Self::UseHelp { .. } => "use_help",
            Self::SendChatMessage { .. } => "send_chat_message",
        }
    }

    /// Encodes the command as a Socket.IO event array.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Serialization`] if the payload cannot be encoded.
    pub fn to_frame(&self) -> Result<String> {
        encode_tagged(serde_json::to_value(self)?)
    }
}

/// Turns `{"event": name, "payload": p}` into `[name, p]` (or `[name]`).
fn encode_tagged(tagged: Value) -> Result<String> {
    let Value::Object(mut map) = tagged else {
        return Err(TriviaError::Protocol("event did not encode to an object".into()));
    };
    let name = map
        .remove("event")
        .ok_or_else(|| TriviaError::Protocol("event without a name".into()))?;
    let array = match map.remove("payload") {
        Some(payload) => vec![name, payload],
        None => vec![name],
    };
    Ok(serde_json::to_string(&array)?)
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
    use serde_json::json;

    #[test]
    fn decodes_connection_ack_with_lobby() {
        let text = json!([
            "connection_ack",
            {
                "sid": "abc",
                "message": "Connected!",
                "lobby_status": {"mode": null, "time_remaining": 30, "players": [], "is_active": false}
            }
        ])
        .to_string();

        let event = ServerEvent::from_frame(&text).unwrap();
        let ServerEvent::ConnectionAck(ack) = event else {
            panic!("expected ConnectionAck, got {event:?}");
        };
        assert_eq!(ack.sid, "abc");
        assert_eq!(ack.lobby_status, Some(LobbyStatus::idle(30)));
        assert!(ack.game_in_progress_mode.is_none());
    }

    #[test]
    fn decodes_battle_royale_question_with_ongoing_total() {
        let text = json!([
            "new_question",
            {
                "question": "Capital of Peru?",
                "options": ["Lima", "Quito", "Bogota", "La Paz"],
                "question_number": 4,
                "total_questions": "Ongoing",
                "duration": 20,
                "difficulty": 3,
                "target_difficulty_level": 3,
                "active_player_count": 6,
                "initial_player_count": 8
            }
        ])
        .to_string();

        let ServerEvent::NewQuestion(q) = ServerEvent::from_frame(&text).unwrap() else {
            panic!("expected NewQuestion");
        };
        assert_eq!(q.number, 4);
        assert_eq!(q.total, QuestionTotal::Label("Ongoing".into()));
        assert_eq!(q.difficulty, Difficulty::Level(3));
        assert_eq!(q.active_player_count, Some(6));
        assert!(!q.fifty_fifty_used);
    }

    #[test]
    fn classic_question_nulls_become_none() {
        let text = json!([
            "new_question",
            {
                "question": "2 + 2?",
                "options": ["3", "4"],
                "question_number": 1,
                "total_questions": 10,
                "duration": 20,
                "difficulty": "N/A",
                "active_player_count": null,
                "initial_player_count": null
            }
        ])
        .to_string();

        let ServerEvent::NewQuestion(q) = ServerEvent::from_frame(&text).unwrap() else {
            panic!("expected NewQuestion");
        };
        assert_eq!(q.total, QuestionTotal::Count(10));
        assert_eq!(q.difficulty, Difficulty::Label("N/A".into()));
        assert!(q.active_player_count.is_none());
    }

    #[test]
    fn game_starting_maps_wire_names() {
        let text = json!([
            "game_starting",
            {
                "game_id": "classic_1234",
                "mode": "classic",
                "initial_player_count": 2,
                "players": [
                    {"sid": "abc", "username": "ana", "score": 0, "is_bot": false,
                     "helps": {"fifty_fifty": false, "call_friend": true, "double_score": true},
                     "is_eliminated": false, "place": 0},
                    {"sid": "bot_1", "username": "Robo", "score": 0, "is_bot": true}
                ]
            }
        ])
        .to_string();

        let ServerEvent::GameStarting(session) = ServerEvent::from_frame(&text).unwrap() else {
            panic!("expected GameStarting");
        };
        assert_eq!(session.session_id, "classic_1234");
        assert_eq!(session.players.len(), 2);
        let ana = session.player("abc").unwrap();
        assert!(!ana.helps.unwrap().fifty_fifty);
        assert!(session.player("bot_1").unwrap().helps.is_none());
    }

    #[test]
    fn question_result_deltas_keep_absent_fields_empty() {
        let text = json!([
            "question_result",
            {
                "mode": "classic",
                "question_number": 2,
                "correct_answer": "Lima",
                "player_data": {"abc": {"score": 10}},
                "active_player_count": null
            }
        ])
        .to_string();

        let ServerEvent::QuestionResult(result) = ServerEvent::from_frame(&text).unwrap() else {
            panic!("expected QuestionResult");
        };
        let delta = &result.player_data["abc"];
        assert_eq!(delta.score, Some(10));
        assert!(delta.answered_this_round.is_none());
        assert!(delta.helps.is_none());
        assert_eq!(result.question_number, Some(2));
    }

    #[test]
    fn chat_entry_defaults_to_user_kind() {
        let text = json!([
            "new_chat_message",
            {"sender_sid": "abc", "sender_name": "ana", "is_bot": false, "emoji": "🎉"}
        ])
        .to_string();

        let ServerEvent::NewChatMessage(entry) = ServerEvent::from_frame(&text).unwrap() else {
            panic!("expected NewChatMessage");
        };
        assert_eq!(entry.kind, ChatKind::User);
        assert_eq!(entry.emoji.as_deref(), Some("🎉"));
        assert!(entry.text.is_none());
    }

    #[test]
    fn help_result_uses_type_field() {
        let text = json!([
            "help_result",
            {"type": "fifty_fifty", "helps_remaining": {"fifty_fifty": false, "call_friend": true, "double_score": true},
             "options": ["Lima", "Quito"]}
        ])
        .to_string();

        let ServerEvent::HelpResult(help) = ServerEvent::from_frame(&text).unwrap() else {
            panic!("expected HelpResult");
        };
        assert_eq!(help.kind, HelpKind::FiftyFifty);
        assert_eq!(help.options.unwrap().len(), 2);
        assert_eq!(help.helps_remaining.unwrap().remaining(), 2);
    }

    #[test]
    fn unknown_event_is_an_error() {
        let err = ServerEvent::from_frame(r#"["server_mood", {"mood": "happy"}]"#).unwrap_err();
        assert!(matches!(err, TriviaError::Serialization(_)));
    }

    #[test]
    fn nameless_array_is_a_protocol_error() {
        let err = ServerEvent::from_frame("[42, {}]").unwrap_err();
        assert!(matches!(err, TriviaError::Protocol(_)));
        let err = ServerEvent::from_frame("[]").unwrap_err();
        assert!(matches!(err, TriviaError::Protocol(_)));
    }

    #[test]
    fn join_lobby_request_encodes_as_event_array() {
        let cmd = ClientCommand::JoinLobbyRequest {
            username: "ana".into(),
            mode: GameMode::BattleRoyale,
            bot_difficulty: BotDifficulty::Expert,
        };
        let frame: Value = serde_json::from_str(&cmd.to_frame().unwrap()).unwrap();
        assert_eq!(
            frame,
            json!(["join_lobby_request", {"username": "ana", "mode": "battle_royale", "bot_difficulty": "expert"}])
        );
    }

    #[test]
    fn emoji_only_chat_omits_message_field() {
        let cmd = ClientCommand::SendChatMessage {
            message: None,
            emoji: Some("👍".into()),
        };
        let frame: Value = serde_json::from_str(&cmd.to_frame().unwrap()).unwrap();
        assert_eq!(frame, json!(["send_chat_message", {"emoji": "👍"}]));
    }

    #[test]
    fn use_help_renames_kind_to_type() {
        let cmd = ClientCommand::UseHelp {
            kind: HelpKind::DoubleScore,
        };
        let frame: Value = serde_json::from_str(&cmd.to_frame().unwrap()).unwrap();
        assert_eq!(frame, json!(["use_help", {"type": "double_score"}]));
        assert_eq!(cmd.name(), "use_help");
    }

    #[test]
    fn unit_events_encode_without_payload() {
        assert_eq!(ServerEvent::Disconnect.to_frame().unwrap(), r#"["disconnect"]"#);
        assert_eq!(
            ServerEvent::from_frame(r#"["connect"]"#).unwrap(),
            ServerEvent::Connect
        );
    }

    #[test]
    fn player_merge_preserves_absent_fields() {
        let mut player = PlayerState {
            id: "abc".into(),
            username: "ana".into(),
            is_bot: false,
            score: 5,
            answered_this_round: true,
            current_answer_correct: Some(true),
            points_this_round: 5,
            place: 0,
            is_eliminated: false,
            helps: None,
        };
        player.merge(&PlayerDelta {
            score: Some(10),
            place: Some(2),
            ..PlayerDelta::default()
        });
        assert_eq!(player.score, 10);
        assert_eq!(player.place, 2);
        assert!(player.answered_this_round);
        assert_eq!(player.current_answer_correct, Some(true));
    }

    #[test]
    fn winners_follow_mode() {
        let entry = |name: &str, score, place| LeaderboardEntry {
            username: name.into(),
            score,
            is_bot: false,
            place,
        };
        let classic = GameOver {
            leaderboard: vec![entry("a", 30, 0), entry("b", 30, 0), entry("c", 10, 0)],
            mode: Some(GameMode::Classic),
        };
        assert_eq!(classic.winners().count(), 2);

        let royale = GameOver {
            leaderboard: vec![entry("a", 30, 2), entry("b", 20, 1)],
            mode: Some(GameMode::BattleRoyale),
        };
        let names: Vec<_> = royale.winners().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["b"]);
    }
}
