//! Transport abstraction for the trivia event channel.
//!
//! A [`Transport`] moves Socket.IO event arrays (`["name", payload]`) between
//! client and server. Packet framing, heartbeats and the namespace handshake
//! are the transport's business; the session loop only ever sees whole
//! event arrays.
//!
//! A [`Connector`] produces connected transports. The session loop calls it
//! once at start and again after every connection loss.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use trivia_sync_client::error::TriviaError;
//! use trivia_sync_client::transport::{Connector, Transport};
//!
//! struct LoopbackTransport;
//!
//! #[async_trait]
//! impl Transport for LoopbackTransport {
//!     async fn send(&mut self, event_array: String) -> Result<(), TriviaError> {
//!         // Write one event array
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, TriviaError>> {
//!         // Yield the next event array, or None once the peer closed
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), TriviaError> {
//!         todo!()
//!     }
//! }
//!
//! struct LoopbackConnector;
//!
//! #[async_trait]
//! impl Connector for LoopbackConnector {
//!     type Transport = LoopbackTransport;
//!
//!     async fn connect(&mut self) -> Result<LoopbackTransport, TriviaError> {
//!         Ok(LoopbackTransport)
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::TriviaError;

/// A bidirectional channel of Socket.IO event arrays.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is polled inside `tokio::select!` and **MUST**
/// be cancel-safe: if it is dropped before completing, the next call must
/// not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one event array, e.g. `["submit_answer",{"answer":"Lima"}]`.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::TransportSend`] if the frame could not be written.
    async fn send(&mut self, event_array: String) -> Result<(), TriviaError>;

    /// Receive the next event array.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: one event array arrived
    /// - `Some(Err(e))`: the connection failed
    /// - `None`: the server closed the connection
    ///
    /// # Cancel Safety
    ///
    /// Dropping this future mid-await must not drop a frame; see [`Transport`].
    async fn recv(&mut self) -> Option<Result<String, TriviaError>>;

    /// Close the connection gracefully. Implementations release resources
    /// even when the close handshake fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    async fn close(&mut self) -> Result<(), TriviaError>;
}

/// Opens connected transports, once per connection attempt.
#[async_trait]
pub trait Connector: Send + 'static {
    type Transport: Transport;

    /// Establish a new connection, including any protocol handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or refuses the session.
    async fn connect(&mut self) -> Result<Self::Transport, TriviaError>;
}
