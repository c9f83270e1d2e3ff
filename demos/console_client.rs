//! # Console Client Example
//!
//! A line-based trivia client against a live server:
//!
//! 1. Connect to the backend named by `TRIVIA_BACKEND_URL`
//! 2. Join the lobby once the connection is up
//! 3. Print lobby, question, result and leaderboard screens as the
//!    snapshot changes
//! 4. Read answers and commands from stdin
//! 5. Shut down gracefully on Ctrl+C or `/quit`
//!
//! ## Running
//!
//! ```sh
//! # Start the trivia server on localhost:5001, then:
//! cargo run --example console_client -- ana classic
//!
//! # Battle royale against a different backend:
//! TRIVIA_BACKEND_URL=http://trivia.local:5001 cargo run --example console_client -- ana battle_royale
//! ```
//!
//! Input: a number answers the open question; `/50`, `/call` and `/double`
//! spend helps; `/say <text>` chats; `/again` rejoins from the leaderboard;
//! `/quit` exits.

use tokio::io::{AsyncBufReadExt, BufReader};

use trivia_sync_client::protocol::GameMode;
use trivia_sync_client::{
    HelpKind, JoinLobbyParams, Phase, SessionSnapshot, TriviaClient, TriviaConfig, TriviaError,
    TriviaEvent,
};

fn parse_mode(raw: Option<String>) -> GameMode {
    match raw.as_deref() {
        Some("battle_royale" | "br") => GameMode::BattleRoyale,
        _ => GameMode::Classic,
    }
}

fn print_screen(snapshot: &SessionSnapshot) {
    match snapshot.phase() {
        Phase::UsernamePrompt => println!("-- pick a mode and join --"),
        Phase::Lobby => {
            let lobby = &snapshot.lobby;
            let names: Vec<&str> = lobby.players.iter().map(|p| p.username.as_str()).collect();
            println!(
                "-- lobby: {}s, players: {} --",
                lobby.time_remaining,
                names.join(", ")
            );
        }
        Phase::Game => {
            if let Some(result) = &snapshot.result {
                println!("-- correct answer: {} --", result.correct_answer);
                if let Some(me) = snapshot.me() {
                    println!("   your score: {}", me.score);
                }
            } else if let Some(q) = &snapshot.question {
                println!("-- Q{}/{}: {} --", q.number, q.total, q.text);
                for (i, option) in q.options.iter().enumerate() {
                    println!("   {}. {option}", i + 1);
                }
                if let Some(advice) = &snapshot.advice {
                    println!("   friend says: {advice}");
                }
                if snapshot.is_spectating() {
                    println!("   (spectating)");
                }
            }
        }
        Phase::Leaderboard => {
            if let Some(over) = &snapshot.leaderboard {
                println!("-- game over --");
                for (i, entry) in over.leaderboard.iter().enumerate() {
                    println!("   {}. {} ({})", i + 1, entry.username, entry.score);
                }
                println!("   type /again to play again");
            }
        }
    }
    if let Some(fault) = &snapshot.fault {
        println!("!! {}", fault.message);
    }
}

fn handle_line(client: &TriviaClient, join: &JoinLobbyParams, line: &str) -> Result<bool, TriviaError> {
    let line = line.trim();
    match line {
        "/quit" => return Ok(false),
        "/again" => {
            client.play_again()?;
            client.join_lobby(join.clone())?;
        }
        "/50" => client.use_help(HelpKind::FiftyFifty)?,
        "/call" => client.use_help(HelpKind::CallFriend)?,
        "/double" => client.use_help(HelpKind::DoubleScore)?,
        _ => {
            if let Some(text) = line.strip_prefix("/say ") {
                client.send_chat_message(text)?;
            } else if let Ok(choice) = line.parse::<usize>() {
                let snapshot = client.snapshot();
                let option = snapshot
                    .question
                    .as_ref()
                    .and_then(|q| q.options.get(choice.saturating_sub(1)))
                    .cloned();
                match option {
                    Some(option) => client.submit_answer(option)?,
                    None => println!("no option {choice}"),
                }
            }
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=trivia_sync_client=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let username = args.next().unwrap_or_else(|| "player".to_string());
    let join = JoinLobbyParams::new(username, parse_mode(args.next()));
    let config = TriviaConfig::from_env();
    tracing::info!("Connecting to {}", config.backend_url);

    let (mut client, mut events) = TriviaClient::connect_websocket(config)?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };
                match event {
                    TriviaEvent::Connected => {
                        // A new socket id drops us from the lobby, so rejoin
                        // unless a game or leaderboard is showing.
                        if matches!(client.phase(), Phase::UsernamePrompt | Phase::Lobby) {
                            if let Err(e) = client.join_lobby(join.clone()) {
                                println!("cannot join: {e}");
                            }
                        }
                    }
                    TriviaEvent::Update(_) | TriviaEvent::FaultCleared => {
                        print_screen(&client.snapshot());
                    }
                    TriviaEvent::PhaseChanged { from, to } => {
                        tracing::debug!("{from} -> {to}");
                    }
                    TriviaEvent::Reconnecting { attempt, delay } => {
                        println!("connection lost, retry #{attempt} in {delay:?}");
                    }
                    TriviaEvent::Disconnected { reason: Some(reason) } if reason.contains("exhausted") => {
                        println!("giving up: {reason}");
                        break;
                    }
                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match handle_line(&client, &join, &line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("cannot do that now: {e}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    Ok(())
}
