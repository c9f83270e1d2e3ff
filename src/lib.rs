//! # Trivia Sync Client
//!
//! Client-side state synchronization for a real-time, server-authoritative
//! multiplayer trivia game.
//!
//! The server pushes named events (lobby countdowns, questions, round
//! results, chat, help outcomes) over Socket.IO. This crate reconciles that
//! stream into one consistent [`SessionSnapshot`] that a presentation layer
//! can render, and sends the player's commands back.
//!
//! ## Features
//!
//! - **Single-owner engine**: [`SyncEngine`] applies one rule per event to
//!   completion, so snapshots are never torn
//! - **Snapshot subscription**: every change is published as an
//!   `Arc<SessionSnapshot>` through a `tokio::sync::watch` channel
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for
//!   any backend; the default `transport-websocket` feature provides
//!   Socket.IO over WebSocket
//! - **Automatic reconnect** with exponential backoff
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "transport-websocket")]
//! # async fn run() -> Result<(), trivia_sync_client::TriviaError> {
//! use trivia_sync_client::{GameMode, JoinLobbyParams, TriviaClient, TriviaConfig, TriviaEvent};
//!
//! let (mut client, mut events) = TriviaClient::connect_websocket(TriviaConfig::from_env())?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TriviaEvent::Connected => {
//!             client.join_lobby(JoinLobbyParams::new("ana", GameMode::Classic))?;
//!         }
//!         TriviaEvent::PhaseChanged { to, .. } => println!("now in {to}"),
//!         TriviaEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod protocol;
pub mod snapshot;
pub mod transport;
pub mod transports;

pub use client::{JoinLobbyParams, TriviaClient, TriviaConfig};
pub use engine::{Reconciliation, SyncEngine};
pub use error::TriviaError;
pub use event::TriviaEvent;
pub use protocol::{BotDifficulty, ClientCommand, GameMode, HelpKind, ServerEvent};
pub use snapshot::{Phase, SessionSnapshot};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{SocketIoTransport, WebSocketConnector};
