#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-level tests for the trivia protocol.
//!
//! Each fixture is a complete WebSocket text frame as the game server emits
//! it, taken through the same two steps the transport and session loop use:
//! [`frame::decode`] for the Engine.IO/Socket.IO envelope, then
//! [`ServerEvent::from_frame`] for the event array.

use serde_json::{json, Value};

use trivia_sync_client::frame::{self, Packet};
use trivia_sync_client::protocol::{
    ChatKind, Difficulty, GameMode, HelpKind, QuestionTotal, ServerEvent,
};
use trivia_sync_client::{BotDifficulty, ClientCommand, TriviaError};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

/// Unwrap a `42…` frame and decode its event array.
fn server_event(wire: &str) -> ServerEvent {
    match frame::decode(wire).expect("decode packet") {
        Packet::Event { data, .. } => ServerEvent::from_frame(&data).expect("decode event"),
        other => panic!("expected an event packet, got {other:?}"),
    }
}

fn wire(name: &str, payload: Value) -> String {
    frame::encode_event(&json!([name, payload]).to_string())
}

// ════════════════════════════════════════════════════════════════════
// Server fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn connection_ack_during_running_game() {
    let event = server_event(&wire(
        "connection_ack",
        json!({
            "sid": "k2Jd9x",
            "message": "Connected!",
            "game_in_progress_mode": "battle_royale",
            "lobby_status": {"mode": "battle_royale", "time_remaining": 12, "players": [], "is_active": false}
        }),
    ));

    let ServerEvent::ConnectionAck(ack) = event else {
        panic!("expected ConnectionAck");
    };
    assert_eq!(ack.sid, "k2Jd9x");
    assert_eq!(ack.game_in_progress_mode, Some(GameMode::BattleRoyale));
    assert_eq!(ack.lobby_status.unwrap().time_remaining, 12);
}

#[test]
fn lobby_update_carries_bot_preferences() {
    let event = server_event(&wire(
        "lobby_countdown_update",
        json!({
            "mode": "classic",
            "time_remaining": 17,
            "is_active": true,
            "players": [
                {"sid": "a1", "username": "ana", "desired_mode": "classic", "bot_difficulty_pref": "expert"},
                {"sid": "b2", "username": "bo", "desired_mode": "classic"}
            ]
        }),
    ));

    let ServerEvent::LobbyCountdownUpdate(lobby) = event else {
        panic!("expected LobbyCountdownUpdate");
    };
    assert_eq!(lobby.mode, Some(GameMode::Classic));
    assert!(lobby.is_active);
    assert_eq!(lobby.players[0].bot_difficulty, Some(BotDifficulty::Expert));
    assert_eq!(lobby.players[1].bot_difficulty, None);
}

#[test]
fn battle_royale_result_with_eliminations() {
    let event = server_event(&wire(
        "question_result",
        json!({
            "mode": "battle_royale",
            "question_number": 6,
            "correct_answer": "Quito",
            "active_player_count": 3,
            "player_data": {
                "a1": {"score": 60, "answered_this_round": true, "current_answer_correct": true,
                       "potential_points_this_round": 10, "is_eliminated": false, "place": 0},
                "bot_3": {"score": 20, "answered_this_round": true, "current_answer_correct": false,
                          "is_eliminated": true, "place": 5}
            }
        }),
    ));

    let ServerEvent::QuestionResult(result) = event else {
        panic!("expected QuestionResult");
    };
    assert_eq!(result.mode, Some(GameMode::BattleRoyale));
    assert_eq!(result.active_player_count, Some(3));
    assert_eq!(result.player_data["a1"].points_this_round, Some(10));
    let bot = &result.player_data["bot_3"];
    assert_eq!(bot.is_eliminated, Some(true));
    assert_eq!(bot.place, Some(5));
}

#[test]
fn battle_royale_game_over_ranks_by_place() {
    let event = server_event(&wire(
        "game_over",
        json!({
            "mode": "battle_royale",
            "leaderboard": [
                {"username": "ana", "score": 90, "is_bot": false, "place": 1},
                {"username": "Robo", "score": 120, "is_bot": true, "place": 2}
            ]
        }),
    ));

    let ServerEvent::GameOver(over) = event else {
        panic!("expected GameOver");
    };
    let winners: Vec<_> = over.winners().map(|e| e.username.as_str()).collect();
    assert_eq!(winners, vec!["ana"]);
}

#[test]
fn call_friend_result_carries_advice() {
    let event = server_event(&wire(
        "help_result",
        json!({
            "type": "call_friend",
            "advice": "Pretty sure it's Lima.",
            "helps_remaining": {"fifty_fifty": true, "call_friend": false, "double_score": true}
        }),
    ));

    let ServerEvent::HelpResult(help) = event else {
        panic!("expected HelpResult");
    };
    assert_eq!(help.kind, HelpKind::CallFriend);
    assert_eq!(help.advice.as_deref(), Some("Pretty sure it's Lima."));
    assert!(!help.helps_remaining.unwrap().call_friend);
}

#[test]
fn system_chat_and_roster_notices() {
    let chat = server_event(&wire(
        "new_chat_message",
        json!({"type": "system", "text": "Game starting!"}),
    ));
    let ServerEvent::NewChatMessage(entry) = chat else {
        panic!("expected NewChatMessage");
    };
    assert_eq!(entry.kind, ChatKind::System);
    assert!(entry.sender_id.is_none());

    assert_eq!(
        server_event(&wire(
            "player_used_help",
            json!({"username": "bo", "help_type": "fifty_fifty"})
        )),
        ServerEvent::PlayerUsedHelp {
            username: "bo".into(),
            help_type: "fifty_fifty".into()
        }
    );
    assert_eq!(
        server_event(&wire("player_left", json!({"sid": "b2", "username": "bo"}))),
        ServerEvent::PlayerLeft {
            sid: "b2".into(),
            username: "bo".into()
        }
    );
}

#[test]
fn question_without_difficulty_uses_label() {
    let event = server_event(&wire(
        "new_question",
        json!({
            "question": "Largest ocean?",
            "options": ["Atlantic", "Pacific", "Indian", "Arctic"],
            "question_number": 1,
            "total_questions": 10,
            "duration": 15
        }),
    ));

    let ServerEvent::NewQuestion(q) = event else {
        panic!("expected NewQuestion");
    };
    assert_eq!(q.total, QuestionTotal::Count(10));
    assert_eq!(q.difficulty, Difficulty::default());
    assert_eq!(q.difficulty.to_string(), "N/A");
}

#[test]
fn error_message_with_acknowledgement_id() {
    let event = server_event(r#"429["error_message",{"message":"Username taken"}]"#);
    assert_eq!(
        event,
        ServerEvent::ErrorMessage {
            message: "Username taken".into()
        }
    );
}

#[test]
fn payload_type_mismatch_is_a_serialization_error() {
    let err = ServerEvent::from_frame(r#"["new_question",{"question_number":"one"}]"#).unwrap_err();
    assert!(matches!(err, TriviaError::Serialization(_)));
    assert!(!err.is_local_rejection());
}

// ════════════════════════════════════════════════════════════════════
// Envelope
// ════════════════════════════════════════════════════════════════════

#[test]
fn connect_error_packet_reports_message() {
    assert_eq!(
        frame::decode(r#"44{"message":"Not authorized"}"#).unwrap(),
        Packet::ConnectError {
            message: "Not authorized".into()
        }
    );
}

#[test]
fn binary_and_unknown_packets_are_rejected() {
    assert!(matches!(frame::decode(""), Err(TriviaError::Protocol(_))));
    assert!(matches!(frame::decode("9"), Err(TriviaError::Protocol(_))));
    assert!(matches!(
        frame::decode(r#"451-["upload",{"_placeholder":true,"num":0}]"#),
        Err(TriviaError::Protocol(_))
    ));
}

#[test]
fn commands_are_framed_for_the_wire() {
    let cmd = ClientCommand::SubmitAnswer {
        answer: "Pacific".into(),
    };
    let text = frame::encode_event(&cmd.to_frame().unwrap());
    assert!(text.starts_with("42[\"submit_answer\""));

    let Packet::Event { ack_id, data } = frame::decode(&text).unwrap() else {
        panic!("expected event packet");
    };
    assert!(ack_id.is_none());
    let parsed: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(parsed, json!(["submit_answer", {"answer": "Pacific"}]));
}

#[test]
fn backend_urls_map_to_engine_io_endpoints() {
    assert_eq!(
        frame::engine_io_url("http://localhost:5001/").unwrap(),
        "ws://localhost:5001/socket.io/?EIO=4&transport=websocket"
    );
    assert_eq!(
        frame::engine_io_url("https://trivia.example.com").unwrap(),
        "wss://trivia.example.com/socket.io/?EIO=4&transport=websocket"
    );
    assert!(matches!(
        frame::engine_io_url("localhost:5001"),
        Err(TriviaError::Protocol(_))
    ));
}
