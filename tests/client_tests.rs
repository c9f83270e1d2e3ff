#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for `TriviaClient`.
//!
//! A `MockConnector` from `tests/common` scripts the server side, either as
//! a fixed list of frames or as a live feed the test pushes into, and the
//! tests observe the client through its event channel, its snapshot
//! subscription and the commands it sent.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use trivia_sync_client::protocol::GameMode;
use trivia_sync_client::{
    BotDifficulty, HelpKind, JoinLobbyParams, Phase, ServerEvent, TriviaClient, TriviaConfig,
    TriviaError, TriviaEvent,
};

use common::{
    ack, error_message, frame, game_over, game_starting, helps, live, lobby_update,
    new_question, next_matching, player, push, question_result, wait_for_snapshot, wait_sent,
    Attempt, MockConnector,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start(connector: MockConnector) -> (TriviaClient, mpsc::Receiver<TriviaEvent>) {
    TriviaClient::start(connector, TriviaConfig::default())
}

async fn connected(events: &mut mpsc::Receiver<TriviaEvent>) {
    next_matching(events, |e| matches!(e, TriviaEvent::Connected)).await;
}

fn refused() -> TriviaError {
    TriviaError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

// ════════════════════════════════════════════════════════════════════
// Event flow
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn first_events_are_connected_then_ack() {
    let (connector, _recorder) = MockConnector::scripted(vec![ack("abc")]);
    let (mut client, mut events) = start(connector);

    assert_eq!(events.recv().await.unwrap(), TriviaEvent::Connected);
    match events.recv().await.unwrap() {
        TriviaEvent::Update(ServerEvent::ConnectionAck(ack)) => assert_eq!(ack.sid, "abc"),
        other => panic!("expected ConnectionAck update, got {other:?}"),
    }
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn game_start_emits_phase_change_before_update() {
    let (connector, _recorder) = MockConnector::scripted(vec![
        ack("abc"),
        game_starting("classic", vec![player("abc", "ana", false, Some(helps(true, true, true)))]),
    ]);
    let (mut client, mut events) = start(connector);

    let phase = next_matching(&mut events, |e| matches!(e, TriviaEvent::PhaseChanged { .. })).await;
    assert_eq!(
        phase,
        TriviaEvent::PhaseChanged {
            from: Phase::UsernamePrompt,
            to: Phase::Game
        }
    );
    let update = events.recv().await.unwrap();
    assert!(matches!(update, TriviaEvent::Update(ServerEvent::GameStarting(_))));
    assert_eq!(client.phase(), Phase::Game);

    client.shutdown().await;
}

#[tokio::test]
async fn identity_acknowledged_before_game_drives_help_budget() {
    let (connector, _recorder) = MockConnector::scripted(vec![
        ack("abc"),
        game_starting(
            "classic",
            vec![
                player("bot_1", "Robo", true, None),
                player("abc", "ana", false, Some(helps(false, true, true))),
            ],
        ),
    ]);
    let (mut client, _events) = start(connector);

    let mut rx = client.subscribe();
    let snapshot = wait_for_snapshot(&mut rx, |s| s.game.is_some()).await;
    assert!(!snapshot.helps.fifty_fifty);
    assert!(snapshot.helps.call_friend);

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_skipped() {
    let (connector, _recorder) = MockConnector::scripted(vec![
        "not json".to_string(),
        frame("server_mood", json!({"mood": "grumpy"})),
        "[42]".to_string(),
        r#"["disconnect"]"#.to_string(),
        ack("abc"),
    ]);
    let (mut client, mut events) = start(connector);

    let discarded =
        next_matching(&mut events, |e| matches!(e, TriviaEvent::Discarded { .. })).await;
    assert_eq!(
        discarded,
        TriviaEvent::Discarded {
            event: "disconnect",
            reason: "reserved event name"
        }
    );
    next_matching(&mut events, |e| {
        matches!(e, TriviaEvent::Update(ServerEvent::ConnectionAck(_)))
    })
    .await;

    let snapshot = client.snapshot();
    assert!(snapshot.connection.connected);
    assert_eq!(snapshot.connection.self_id.as_deref(), Some("abc"));

    client.shutdown().await;
}

#[tokio::test]
async fn stale_question_is_reported_as_discarded() {
    let (connector, _recorder) = MockConnector::scripted(vec![new_question(2), new_question(1)]);
    let (mut client, mut events) = start(connector);

    let event = next_matching(&mut events, |e| matches!(e, TriviaEvent::Discarded { .. })).await;
    match event {
        TriviaEvent::Discarded { event, .. } => assert_eq!(event, "new_question"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.snapshot().question.as_ref().unwrap().number, 2);

    client.shutdown().await;
}

#[tokio::test]
async fn answer_receipt_is_forwarded_without_state_change() {
    let (connector, _recorder) =
        MockConnector::scripted(vec![frame("answer_receipt", json!({"message": "Answer received"}))]);
    let (mut client, mut events) = start(connector);

    let event = next_matching(&mut events, |e| matches!(e, TriviaEvent::Update(_))).await;
    assert_eq!(
        event,
        TriviaEvent::Update(ServerEvent::AnswerReceipt {
            message: "Answer received".into()
        })
    );
    // Only the synthetic connect was applied.
    assert_eq!(client.snapshot().revision, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn snapshot_stays_current_when_events_are_dropped() {
    let (connector, _recorder) = MockConnector::new(vec![Attempt::Connect(vec![
        Some(Ok(ack("abc"))),
        Some(Ok(lobby_update("classic", 20, &["ana"]))),
        Some(Ok(lobby_update("classic", 19, &["ana"]))),
        Some(Ok(lobby_update("classic", 18, &["ana", "bob"]))),
        None,
    ])]);
    let config = TriviaConfig::default().with_event_channel_capacity(1);
    let (mut client, mut events) = TriviaClient::start(connector, config);

    assert_eq!(events.recv().await.unwrap(), TriviaEvent::Connected);
    assert_eq!(
        events.recv().await.unwrap(),
        TriviaEvent::Disconnected { reason: None }
    );

    let snapshot = client.snapshot();
    assert_eq!(snapshot.lobby.time_remaining, 18);
    assert_eq!(snapshot.lobby.players.len(), 2);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Commands
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn commands_are_rejected_before_connecting() {
    let (connector, recorder) = MockConnector::new(vec![]);
    let (mut client, _events) = start(connector);

    assert!(!client.is_connected());
    let err = client
        .join_lobby(JoinLobbyParams::new("ana", GameMode::Classic))
        .unwrap_err();
    assert!(matches!(err, TriviaError::NotConnected));
    let err = client.send_chat_message("hello").unwrap_err();
    assert!(matches!(err, TriviaError::NotConnected));
    assert!(matches!(client.submit_answer("Lima"), Err(TriviaError::AnswerLocked)));
    assert!(matches!(client.use_help(HelpKind::CallFriend), Err(TriviaError::HelpsLocked)));

    client.shutdown().await;
    assert!(recorder.sent_json().is_empty());
}

#[tokio::test]
async fn join_lobby_marks_join_in_flight_until_game_starts() {
    let (attempt, feed) = live();
    let (connector, recorder) = MockConnector::new(vec![attempt]);
    let (mut client, mut events) = start(connector);
    connected(&mut events).await;
    push(&feed, ack("abc"));

    assert_ok!(client.join_lobby(
        JoinLobbyParams::new("ana", GameMode::BattleRoyale).with_bot_difficulty(BotDifficulty::Advanced)
    ));
    assert!(client.is_joining());
    let err = assert_err!(client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic)));
    assert!(matches!(err, TriviaError::AlreadyJoining));

    let sent = wait_sent(&recorder, 1).await;
    assert_eq!(
        sent[0],
        json!(["join_lobby_request", {"username": "ana", "mode": "battle_royale", "bot_difficulty": "advanced"}])
    );

    let mut rx = client.subscribe();
    let snapshot = wait_for_snapshot(&mut rx, |s| s.intent.joining).await;
    assert_eq!(snapshot.phase(), Phase::Lobby);
    assert_eq!(snapshot.intent.desired_mode, Some(GameMode::BattleRoyale));

    push(&feed, game_starting("battle_royale", vec![player("abc", "ana", false, None)]));
    wait_for_snapshot(&mut rx, |s| s.game.is_some()).await;
    assert!(!client.is_joining());

    client.shutdown().await;
}

#[tokio::test]
async fn dropped_connection_releases_pending_join() {
    let (attempt, feed) = live();
    let (connector, recorder) = MockConnector::new(vec![attempt]);
    let (mut client, mut events) = start(connector);
    connected(&mut events).await;

    client
        .join_lobby(JoinLobbyParams::new("ana", GameMode::Classic))
        .unwrap();
    wait_sent(&recorder, 1).await;
    feed.send(None).unwrap();

    next_matching(&mut events, |e| matches!(e, TriviaEvent::Disconnected { .. })).await;
    assert!(!client.is_joining());
    assert!(!client.is_connected());
    assert!(matches!(
        client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic)),
        Err(TriviaError::NotConnected)
    ));
    // Intent survives so the lobby screen stays up.
    assert_eq!(client.phase(), Phase::Lobby);

    client.shutdown().await;
}

#[tokio::test]
async fn join_is_refused_while_another_game_runs() {
    let (attempt, feed) = live();
    let (connector, recorder) = MockConnector::new(vec![attempt]);
    let (mut client, mut events) = start(connector);
    connected(&mut events).await;

    push(
        &feed,
        frame(
            "connection_ack",
            json!({"sid": "abc", "message": "Connected!", "game_in_progress_mode": "classic"}),
        ),
    );
    let mut rx = client.subscribe();
    wait_for_snapshot(&mut rx, |s| s.game_in_progress_mode.is_some()).await;

    let err = assert_err!(client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic)));
    assert!(matches!(err, TriviaError::GameInProgress(GameMode::Classic)));
    assert!(err.is_local_rejection());
    assert!(!client.is_joining());

    push(
        &feed,
        game_over(json!([{"username": "bo", "score": 30, "is_bot": false}])),
    );
    wait_for_snapshot(&mut rx, |s| s.game_in_progress_mode.is_none()).await;
    assert_ok!(client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic)));

    let sent = wait_sent(&recorder, 1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], "join_lobby_request");

    client.shutdown().await;
}

#[tokio::test]
async fn answers_and_helps_follow_round_state() {
    let (attempt, feed) = live();
    let (connector, recorder) = MockConnector::new(vec![attempt]);
    let (mut client, mut events) = start(connector);
    connected(&mut events).await;

    push(&feed, ack("abc"));
    push(
        &feed,
        game_starting(
            "classic",
            vec![player("abc", "ana", false, Some(helps(false, true, true))), player("b", "Robo", true, None)],
        ),
    );
    push(&feed, new_question(1));

    let mut rx = client.subscribe();
    wait_for_snapshot(&mut rx, |s| s.question.is_some()).await;

    assert!(matches!(
        client.use_help(HelpKind::FiftyFifty),
        Err(TriviaError::HelpUnavailable(HelpKind::FiftyFifty))
    ));
    assert_ok!(client.use_help(HelpKind::CallFriend));
    assert_ok!(client.submit_answer("Lima"));
    let sent = wait_sent(&recorder, 2).await;
    assert_eq!(sent[0], json!(["use_help", {"type": "call_friend"}]));
    assert_eq!(sent[1], json!(["submit_answer", {"answer": "Lima"}]));

    push(
        &feed,
        question_result(
            1,
            json!({"abc": {"score": 10, "answered_this_round": true, "current_answer_correct": true,
                           "helps": helps(false, false, true)}}),
        ),
    );
    let snapshot = wait_for_snapshot(&mut rx, |s| s.result.is_some()).await;
    assert_eq!(snapshot.me().unwrap().score, 10);
    assert!(!snapshot.helps.call_friend);

    assert!(matches!(client.submit_answer("Quito"), Err(TriviaError::AnswerLocked)));
    assert!(matches!(client.use_help(HelpKind::DoubleScore), Err(TriviaError::HelpsLocked)));

    push(&feed, new_question(2));
    wait_for_snapshot(&mut rx, |s| s.result.is_none()).await;
    assert_ok!(client.use_help(HelpKind::DoubleScore));
    wait_sent(&recorder, 3).await;

    client.shutdown().await;
}

#[tokio::test]
async fn chat_messages_are_trimmed_and_emojis_sent_separately() {
    let (connector, recorder) = MockConnector::scripted(vec![ack("abc")]);
    let (mut client, mut events) = start(connector);
    connected(&mut events).await;

    let err = client.send_chat_message("   ").unwrap_err();
    assert!(matches!(err, TriviaError::EmptyChatMessage));
    assert!(err.is_local_rejection());
    assert!(matches!(client.send_emoji(""), Err(TriviaError::EmptyChatMessage)));

    client.send_chat_message("  good luck  ").unwrap();
    client.send_emoji("🎉").unwrap();

    let sent = wait_sent(&recorder, 2).await;
    assert_eq!(sent[0], json!(["send_chat_message", {"message": "good luck"}]));
    assert_eq!(sent[1], json!(["send_chat_message", {"emoji": "🎉"}]));

    client.shutdown().await;
}

#[tokio::test]
async fn play_again_works_while_disconnected() {
    let (connector, _recorder) = MockConnector::new(vec![Attempt::Connect(vec![
        Some(Ok(ack("abc"))),
        Some(Ok(game_starting("classic", vec![player("abc", "ana", false, None)]))),
        Some(Ok(game_over(json!([{"username": "ana", "score": 40, "is_bot": false}])))),
        None,
    ])]);
    let (mut client, mut events) = start(connector);

    next_matching(&mut events, |e| matches!(e, TriviaEvent::Disconnected { .. })).await;
    assert_eq!(client.phase(), Phase::Leaderboard);

    client.play_again().unwrap();
    let phase = next_matching(&mut events, |e| matches!(e, TriviaEvent::PhaseChanged { .. })).await;
    assert_eq!(
        phase,
        TriviaEvent::PhaseChanged {
            from: Phase::Leaderboard,
            to: Phase::UsernamePrompt
        }
    );
    let snapshot = client.snapshot();
    assert!(snapshot.leaderboard.is_none());
    assert_eq!(snapshot.lobby.time_remaining, 30);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Faults
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn fault_clears_itself_after_display_window() {
    let (connector, _recorder) = MockConnector::scripted(vec![error_message("Lobby is full")]);
    let (mut client, mut events) = start(connector);

    let mut rx = client.subscribe();
    let snapshot = wait_for_snapshot(&mut rx, |s| s.fault.is_some()).await;
    let raised_at = snapshot.fault.as_ref().unwrap().raised_at;
    assert_eq!(snapshot.fault.as_ref().unwrap().message, "Lobby is full");

    next_matching(&mut events, |e| matches!(e, TriviaEvent::FaultCleared)).await;
    assert!(Instant::now() >= raised_at + Duration::from_secs(5));
    assert!(client.snapshot().fault.is_none());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn newer_fault_restarts_the_window() {
    let (attempt, feed) = live();
    let (connector, _recorder) = MockConnector::new(vec![attempt]);
    let config = TriviaConfig::default().with_fault_display(Duration::from_secs(5));
    let (mut client, mut events) = TriviaClient::start(connector, config);
    connected(&mut events).await;

    let mut rx = client.subscribe();
    push(&feed, error_message("first"));
    wait_for_snapshot(&mut rx, |s| s.fault.is_some()).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    push(&feed, error_message("second"));
    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.fault.as_ref().is_some_and(|f| f.message == "second")
    })
    .await;
    let second_raised = snapshot.fault.as_ref().unwrap().raised_at;

    next_matching(&mut events, |e| matches!(e, TriviaEvent::FaultCleared)).await;
    assert!(Instant::now() >= second_raised + Duration::from_secs(5));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Reconnection and shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn reconnects_with_backoff_and_keeps_game_state() {
    let (connector, recorder) = MockConnector::new(vec![
        Attempt::Connect(vec![
            Some(Ok(ack("first"))),
            Some(Ok(game_starting("classic", vec![player("first", "ana", false, None)]))),
            None,
        ]),
        Attempt::Fail(refused()),
        Attempt::Connect(vec![Some(Ok(ack("second")))]),
    ]);
    let (mut client, mut events) = start(connector);

    let disconnected =
        next_matching(&mut events, |e| matches!(e, TriviaEvent::Disconnected { .. })).await;
    assert_eq!(disconnected, TriviaEvent::Disconnected { reason: None });

    let reconnecting =
        next_matching(&mut events, |e| matches!(e, TriviaEvent::Reconnecting { .. })).await;
    assert_eq!(
        reconnecting,
        TriviaEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );

    connected(&mut events).await;
    let mut rx = client.subscribe();
    let snapshot = wait_for_snapshot(&mut rx, |s| {
        s.connection.self_id.as_deref() == Some("second")
    })
    .await;
    assert!(snapshot.connection.connected);
    assert!(snapshot.game.is_some());
    assert_eq!(recorder.connect_count(), 3);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unbounded_backoff_waits_until_shutdown() {
    let (connector, recorder) = MockConnector::new(vec![Attempt::Fail(refused())]);
    let config = TriviaConfig::default()
        .with_reconnect_backoff(Duration::MAX, Duration::MAX)
        .with_fault_display(Duration::MAX);
    let (mut client, mut events) = TriviaClient::start(connector, config);

    let reconnecting =
        next_matching(&mut events, |e| matches!(e, TriviaEvent::Reconnecting { .. })).await;
    assert_eq!(
        reconnecting,
        TriviaEvent::Reconnecting {
            attempt: 1,
            delay: Duration::MAX
        }
    );

    client.shutdown().await;
    assert_eq!(recorder.connect_count(), 1);
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let (connector, recorder) = MockConnector::new(vec![Attempt::Fail(refused()), Attempt::Fail(refused())]);
    let config = TriviaConfig::default().with_max_reconnect_attempts(Some(2));
    let (_client, mut events) = TriviaClient::start(connector, config);

    assert_eq!(
        events.recv().await.unwrap(),
        TriviaEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    match events.recv().await.unwrap() {
        TriviaEvent::Disconnected { reason: Some(reason) } => {
            assert!(reason.contains("exhausted"), "unexpected reason: {reason}");
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert!(events.recv().await.is_none());
    assert_eq!(recorder.connect_count(), 2);
}

#[tokio::test]
async fn shutdown_closes_transport_and_ends_event_stream() {
    let (connector, recorder) = MockConnector::scripted(vec![ack("abc")]);
    let (mut client, mut events) = start(connector);
    next_matching(&mut events, |e| matches!(e, TriviaEvent::Update(_))).await;

    client.shutdown().await;

    assert_eq!(
        events.recv().await.unwrap(),
        TriviaEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
    assert!(events.recv().await.is_none());
    assert!(recorder.closed.load(std::sync::atomic::Ordering::Relaxed));
    assert!(!client.is_connected());
    assert!(!client.snapshot().connection.connected);
}

#[tokio::test]
async fn shutdown_while_connecting_emits_disconnected() {
    let (connector, _recorder) = MockConnector::new(vec![]);
    let (mut client, mut events) = start(connector);

    client.shutdown().await;
    assert_eq!(
        events.recv().await.unwrap(),
        TriviaEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn commands_fail_after_shutdown() {
    let (connector, _recorder) = MockConnector::scripted(vec![ack("abc")]);
    let (mut client, mut events) = start(connector);
    connected(&mut events).await;

    client.shutdown().await;
    assert!(matches!(client.send_emoji("👋"), Err(TriviaError::NotConnected)));
    assert!(matches!(client.play_again(), Err(TriviaError::NotConnected)));
}
