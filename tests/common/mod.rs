#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for trivia client integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that hands out
//! one transport per connection attempt, and builders for the server's
//! event arrays.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use trivia_sync_client::{Connector, SessionSnapshot, Transport, TriviaError, TriviaEvent};

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted frames for `recv`: `Some(Ok(text))`, `Some(Err(_))`, or `None` for
/// a clean close.
pub type Script = Vec<Option<Result<String, TriviaError>>>;

/// Where a [`MockTransport`] gets its inbound frames from.
enum Source {
    Scripted(VecDeque<Option<Result<String, TriviaError>>>),
    Live(mpsc::UnboundedReceiver<Option<Result<String, TriviaError>>>),
}

/// A mock transport that replays a script (or a live feed) and records
/// everything sent.
pub struct MockTransport {
    incoming: Source,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, event_array: String) -> Result<(), TriviaError> {
        self.sent.lock().unwrap().push(event_array);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TriviaError>> {
        let next = match &mut self.incoming {
            Source::Scripted(script) => script.pop_front(),
            Source::Live(feed) => feed.recv().await,
        };
        match next {
            Some(item) => item,
            // Script exhausted: stay open until the client shuts down.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TriviaError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// One scripted connection attempt.
pub enum Attempt {
    Connect(Script),
    Live(mpsc::UnboundedReceiver<Option<Result<String, TriviaError>>>),
    Fail(TriviaError),
}

/// Pushes frames into a live connection.
pub type Feed = mpsc::UnboundedSender<Option<Result<String, TriviaError>>>;

/// A connection attempt whose frames are pushed by the test as it goes.
pub fn live() -> (Attempt, Feed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Attempt::Live(rx), tx)
}

/// Queue one frame on a live connection.
pub fn push(feed: &Feed, text: String) {
    feed.send(Some(Ok(text))).unwrap();
}

/// Hands out scripted connection attempts in order; once they run out,
/// `connect` never completes.
pub struct MockConnector {
    attempts: VecDeque<Attempt>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

/// Shared handles for inspecting what the client did.
#[derive(Clone)]
pub struct Recorder {
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
    pub connects: Arc<AtomicUsize>,
}

impl Recorder {
    /// Sent event arrays, parsed.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl MockConnector {
    pub fn new(attempts: Vec<Attempt>) -> (Self, Recorder) {
        let recorder = Recorder {
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
        };
        let connector = Self {
            attempts: VecDeque::from(attempts),
            sent: Arc::clone(&recorder.sent),
            closed: Arc::clone(&recorder.closed),
            connects: Arc::clone(&recorder.connects),
        };
        (connector, recorder)
    }

    /// A single successful connection replaying `frames`.
    pub fn scripted(frames: Vec<String>) -> (Self, Recorder) {
        Self::new(vec![Attempt::Connect(
            frames.into_iter().map(|f| Some(Ok(f))).collect(),
        )])
    }

    fn transport(&self, incoming: Source) -> MockTransport {
        MockTransport {
            incoming,
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, TriviaError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.attempts.pop_front() {
            Some(Attempt::Connect(script)) => {
                Ok(self.transport(Source::Scripted(VecDeque::from(script))))
            }
            Some(Attempt::Live(feed)) => Ok(self.transport(Source::Live(feed))),
            Some(Attempt::Fail(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}

// ── Waiting helpers ─────────────────────────────────────────────────

/// Receive events until one matches `pred`, returning it.
pub async fn next_matching(
    events: &mut mpsc::Receiver<TriviaEvent>,
    pred: impl Fn(&TriviaEvent) -> bool,
) -> TriviaEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the published snapshot satisfies `pred`.
pub async fn wait_for_snapshot(
    rx: &mut watch::Receiver<Arc<SessionSnapshot>>,
    pred: impl FnMut(&Arc<SessionSnapshot>) -> bool,
) -> Arc<SessionSnapshot> {
    let snapshot = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("snapshot sender dropped");
    Arc::clone(&snapshot)
}

/// Wait until the client has sent at least `count` event arrays.
pub async fn wait_sent(recorder: &Recorder, count: usize) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if recorder.sent.lock().unwrap().len() >= count {
                return recorder.sent_json();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for sent commands")
}

// ── Event array builders ────────────────────────────────────────────

/// `["name", payload]` as the server would send it.
pub fn frame(name: &str, payload: Value) -> String {
    json!([name, payload]).to_string()
}

pub fn ack(sid: &str) -> String {
    frame(
        "connection_ack",
        json!({
            "sid": sid,
            "message": "Connected!",
            "lobby_status": {"mode": null, "time_remaining": 30, "players": [], "is_active": false}
        }),
    )
}

pub fn lobby_update(mode: &str, time_remaining: u32, usernames: &[&str]) -> String {
    let players: Vec<Value> = usernames
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"sid": format!("sid-{i}"), "username": name, "desired_mode": mode}))
        .collect();
    frame(
        "lobby_countdown_update",
        json!({"mode": mode, "time_remaining": time_remaining, "players": players, "is_active": true}),
    )
}

/// A player record as carried by `game_starting`.
pub fn player(sid: &str, username: &str, is_bot: bool, helps: Option<Value>) -> Value {
    let mut player = json!({
        "sid": sid,
        "username": username,
        "score": 0,
        "is_bot": is_bot,
        "is_eliminated": false,
        "place": 0
    });
    if let Some(helps) = helps {
        player["helps"] = helps;
    }
    player
}

pub fn helps(fifty_fifty: bool, call_friend: bool, double_score: bool) -> Value {
    json!({"fifty_fifty": fifty_fifty, "call_friend": call_friend, "double_score": double_score})
}

pub fn game_starting(mode: &str, players: Vec<Value>) -> String {
    let count = players.len();
    frame(
        "game_starting",
        json!({"game_id": format!("{mode}_test"), "mode": mode, "players": players, "initial_player_count": count}),
    )
}

pub fn new_question(number: u32) -> String {
    frame(
        "new_question",
        json!({
            "question": format!("Question {number}?"),
            "options": ["Lima", "Quito", "Bogota", "La Paz"],
            "question_number": number,
            "total_questions": 10,
            "duration": 20,
            "difficulty": 2,
            "target_difficulty_level": 2,
            "active_player_count": null,
            "initial_player_count": null
        }),
    )
}

pub fn question_result(number: u32, player_data: Value) -> String {
    frame(
        "question_result",
        json!({
            "mode": "classic",
            "question_number": number,
            "correct_answer": "Lima",
            "player_data": player_data,
            "active_player_count": null
        }),
    )
}

pub fn game_over(entries: Value) -> String {
    frame("game_over", json!({"leaderboard": entries}))
}

pub fn error_message(message: &str) -> String {
    frame("error_message", json!({"message": message}))
}
