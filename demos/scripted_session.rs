//! # Scripted Session Example
//!
//! Plays a complete two-question classic game against an in-process fake
//! server, using a channel-backed [`Transport`] and [`Connector`]. Handy for:
//!
//! - **Testing** presentation code without a running backend
//! - **Custom backends**: the same two traits adapt any I/O layer
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_session
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use trivia_sync_client::protocol::GameMode;
use trivia_sync_client::{
    Connector, JoinLobbyParams, ServerEvent, TriviaClient, TriviaConfig, TriviaError,
    TriviaEvent, Transport,
};

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based loopback transport
// ─────────────────────────────────────────────────────────────────────

/// Client half: event arrays out through `tx`, in through `rx`.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half: read what the client sent, push server events.
pub struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, event_array: String) -> Result<(), TriviaError> {
        self.tx
            .send(event_array)
            .map_err(|e| TriviaError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `mpsc::UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, TriviaError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TriviaError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A connector that hands out the loopback once
// ─────────────────────────────────────────────────────────────────────

struct LoopbackConnector(Option<LoopbackTransport>);

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&mut self) -> Result<LoopbackTransport, TriviaError> {
        self.0.take().ok_or_else(|| {
            TriviaError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "loopback already used",
            ))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: The fake server
// ─────────────────────────────────────────────────────────────────────

const QUESTIONS: &[(&str, [&str; 4], &str)] = &[
    ("Capital of Peru?", ["Lima", "Quito", "Bogota", "La Paz"], "Lima"),
    ("Largest ocean?", ["Atlantic", "Pacific", "Indian", "Arctic"], "Pacific"),
];

fn emit(server: &LoopbackServer, name: &str, payload: Value) {
    // The client side going away ends the demo anyway.
    let _ = server.tx.send(json!([name, payload]).to_string());
}

async fn run_server(mut server: LoopbackServer) {
    emit(
        &server,
        "connection_ack",
        json!({"sid": "sid-ana", "message": "Connected!"}),
    );

    let mut username = String::new();
    let mut score: i64 = 0;
    let mut question = 0usize;

    while let Some(text) = server.rx.recv().await {
        tracing::info!("server received: {text}");
        let Ok(Value::Array(parts)) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let name = parts.first().and_then(Value::as_str).unwrap_or_default();
        let payload = parts.get(1).cloned().unwrap_or(Value::Null);

        match name {
            "join_lobby_request" => {
                username = payload
                    .get("username")
                    .and_then(Value::as_str)
                    .unwrap_or("player")
                    .to_string();
                emit(
                    &server,
                    "lobby_countdown_update",
                    json!({"mode": "classic", "time_remaining": 3, "is_active": true,
                           "players": [{"sid": "sid-ana", "username": username, "desired_mode": "classic"}]}),
                );
                emit(
                    &server,
                    "game_starting",
                    json!({"game_id": "classic_demo", "mode": "classic", "initial_player_count": 2,
                           "players": [
                               {"sid": "sid-ana", "username": username, "score": 0, "is_bot": false,
                                "helps": {"fifty_fifty": true, "call_friend": true, "double_score": true}},
                               {"sid": "bot_1", "username": "Robo", "score": 0, "is_bot": true}
                           ]}),
                );
                send_question(&server, question);
            }
            "submit_answer" => {
                let Some((_, _, correct)) = QUESTIONS.get(question) else {
                    continue;
                };
                let right = payload.get("answer").and_then(Value::as_str) == Some(*correct);
                if right {
                    score += 10;
                }
                emit(&server, "answer_receipt", json!({"message": "Answer received"}));
                emit(
                    &server,
                    "question_result",
                    json!({"mode": "classic", "question_number": question + 1, "correct_answer": correct,
                           "player_data": {
                               "sid-ana": {"score": score, "answered_this_round": true, "current_answer_correct": right},
                               "bot_1": {"score": 10, "answered_this_round": true, "current_answer_correct": true}
                           }}),
                );

                question += 1;
                if question < QUESTIONS.len() {
                    send_question(&server, question);
                } else {
                    let mut board = vec![
                        json!({"username": username, "score": score, "is_bot": false}),
                        json!({"username": "Robo", "score": 20, "is_bot": true}),
                    ];
                    board.sort_by_key(|e| std::cmp::Reverse(e.get("score").and_then(Value::as_i64)));
                    emit(&server, "game_over", json!({"mode": "classic", "leaderboard": board}));
                }
            }
            other => tracing::debug!("server ignoring {other}"),
        }
    }
}

fn send_question(server: &LoopbackServer, index: usize) {
    let Some((text, options, _)) = QUESTIONS.get(index) else {
        return;
    };
    emit(
        server,
        "new_question",
        json!({"question": text, "options": options, "question_number": index + 1,
               "total_questions": QUESTIONS.len(), "duration": 20, "difficulty": 1}),
    );
}

// ─────────────────────────────────────────────────────────────────────
// Step 4: Drive the client
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, server) = loopback_pair();
    tokio::spawn(run_server(server));

    let (mut client, mut events) = TriviaClient::start(
        LoopbackConnector(Some(transport)),
        TriviaConfig::default(),
    );

    while let Some(event) = events.recv().await {
        match event {
            TriviaEvent::Connected => {
                client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic))?;
            }
            TriviaEvent::PhaseChanged { from, to } => {
                tracing::info!("phase {from} -> {to}");
            }
            TriviaEvent::Update(ServerEvent::NewQuestion(q)) => {
                // Always pick the first option; the fake server grades it.
                let answer = q.options.first().cloned().unwrap_or_default();
                tracing::info!("Q{}: {} -> answering {answer}", q.number, q.text);
                client.submit_answer(answer)?;
            }
            TriviaEvent::Update(ServerEvent::QuestionResult(result)) => {
                let score = client.snapshot().me().map_or(0, |me| me.score);
                tracing::info!("correct: {}, my score: {score}", result.correct_answer);
            }
            TriviaEvent::Update(ServerEvent::GameOver(over)) => {
                for entry in over.winners() {
                    tracing::info!("winner: {} with {}", entry.username, entry.score);
                }
                break;
            }
            other => tracing::debug!("event: {other:?}"),
        }
    }

    tracing::info!("final phase: {}", client.phase());
    client.shutdown().await;
    tracing::info!("scripted session finished");
    Ok(())
}
