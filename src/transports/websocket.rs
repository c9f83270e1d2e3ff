//! Socket.IO over WebSocket, built on `tokio-tungstenite`.
//!
//! [`SocketIoTransport`] performs the Engine.IO v4 open handshake and the
//! Socket.IO default-namespace connect, answers server heartbeats, and hands
//! the session loop plain event arrays. [`WebSocketConnector`] opens one such
//! transport per connection attempt.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), trivia_sync_client::TriviaError> {
//! use trivia_sync_client::{Connector, Transport, WebSocketConnector};
//!
//! let mut connector = WebSocketConnector::new("http://localhost:5001")?;
//! let mut transport = connector.connect().await?;
//!
//! if let Some(Ok(event)) = transport.recv().await {
//!     println!("server said: {event}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::TriviaError;
use crate::frame::{self, Packet};
use crate::transport::{Connector, Transport};

/// The underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Default limit for the WebSocket connect plus Socket.IO handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`Transport`] speaking Socket.IO v5 over a WebSocket.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe. A heartbeat reply interrupted by
/// cancellation stays pending and is flushed by the next `recv` or `send`.
#[derive(Debug)]
pub struct SocketIoTransport {
    stream: WsStream,
    engine_sid: String,
    pong_pending: bool,
    closed: bool,
}

impl SocketIoTransport {
    /// Connects to an Engine.IO WebSocket endpoint and joins the default
    /// namespace.
    ///
    /// `url` is the full endpoint, see [`frame::engine_io_url`].
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Io`] if the WebSocket cannot be opened,
    /// [`TriviaError::ServerError`] if the server refuses the namespace, and
    /// [`TriviaError::Protocol`] if the handshake is malformed.
    pub async fn connect(url: &str) -> Result<Self, TriviaError> {
        tracing::debug!(url = %url, "connecting to Socket.IO server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            TriviaError::Io(std::io::Error::new(kind, e))
        })?;

        let transport = Self::handshake(stream).await?;
        tracing::info!(url = %url, engine_sid = %transport.engine_sid, "Socket.IO session established");
        Ok(transport)
    }

    /// Like [`connect`](Self::connect), failing with [`TriviaError::Timeout`]
    /// if the whole handshake does not finish within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Timeout`] on deadline, or any error of
    /// [`connect`](Self::connect).
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, TriviaError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| TriviaError::Timeout)?
    }

    /// Runs the Engine.IO and Socket.IO handshakes on an open WebSocket.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn handshake(stream: WsStream) -> Result<Self, TriviaError> {
        let mut transport = Self {
            stream,
            engine_sid: String::new(),
            pong_pending: false,
            closed: false,
        };

        let open = loop {
            match transport.next_packet().await? {
                Packet::Open(open) => break open,
                Packet::Ping => transport.pong().await?,
                other => tracing::debug!(?other, "ignoring packet before open"),
            }
        };
        tracing::debug!(
            ping_interval_ms = open.ping_interval,
            ping_timeout_ms = open.ping_timeout,
            "engine.io session opened"
        );
        transport.engine_sid = open.sid;

        transport.write(frame::CONNECT.to_string()).await?;
        loop {
            match transport.next_packet().await? {
                Packet::Connect { .. } => break,
                Packet::ConnectError { message } => {
                    return Err(TriviaError::ServerError { message });
                }
                Packet::Ping => transport.pong().await?,
                other => tracing::debug!(?other, "ignoring packet before namespace connect"),
            }
        }
        Ok(transport)
    }

    /// Engine.IO session id assigned during the open handshake.
    pub fn engine_sid(&self) -> &str {
        &self.engine_sid
    }

    /// Reads the next text packet during the handshake.
    async fn next_packet(&mut self) -> Result<Packet, TriviaError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return frame::decode(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return Err(TriviaError::TransportClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TriviaError::TransportReceive(e.to_string())),
            }
        }
    }

    async fn write(&mut self, text: String) -> Result<(), TriviaError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TriviaError::TransportSend(e.to_string()))
    }

    async fn pong(&mut self) -> Result<(), TriviaError> {
        self.pong_pending = true;
        self.write(frame::PONG.to_string()).await?;
        self.pong_pending = false;
        Ok(())
    }

    async fn flush_pong(&mut self) -> Result<(), TriviaError> {
        if self.pong_pending {
            self.pong().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn send(&mut self, event_array: String) -> Result<(), TriviaError> {
        if self.closed {
            return Err(TriviaError::TransportClosed);
        }
        self.flush_pong().await?;
        self.write(frame::encode_event(&event_array)).await
    }

    async fn recv(&mut self) -> Option<Result<String, TriviaError>> {
        if let Err(e) = self.flush_pong().await {
            return Some(Err(e));
        }
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Some(Err(TriviaError::TransportReceive(e.to_string()))),
                None => return None,
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Binary(_) => {
                    tracing::warn!("received binary WebSocket frame, skipping");
                    continue;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            match frame::decode(text.as_str()) {
                Ok(Packet::Event { data, .. }) => return Some(Ok(data)),
                Ok(Packet::Ping) => {
                    if let Err(e) = self.pong().await {
                        return Some(Err(e));
                    }
                }
                Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                    tracing::info!("server closed the Socket.IO session");
                    return None;
                }
                Ok(Packet::ConnectError { message }) => {
                    return Some(Err(TriviaError::ServerError { message }));
                }
                Ok(other) => tracing::debug!(?other, "ignoring engine.io packet"),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable packet");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TriviaError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.write(frame::DISCONNECT.to_string()).await {
            tracing::debug!(error = %e, "namespace disconnect not delivered");
        }
        self.stream
            .close(None)
            .await
            .map_err(|e| TriviaError::TransportSend(e.to_string()))
    }
}

/// Opens a fresh [`SocketIoTransport`] for every connection attempt.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    timeout: Duration,
}

impl WebSocketConnector {
    /// Targets the trivia backend at `backend_url` (`http`, `https`, `ws` or `wss`).
    ///
    /// # Errors
    ///
    /// Returns [`TriviaError::Protocol`] if the URL scheme is not supported.
    pub fn new(backend_url: &str) -> Result<Self, TriviaError> {
        Ok(Self {
            url: frame::engine_io_url(backend_url)?,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Limits each connection attempt, handshake included.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The Engine.IO endpoint this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = SocketIoTransport;

    async fn connect(&mut self) -> Result<SocketIoTransport, TriviaError> {
        SocketIoTransport::connect_with_timeout(&self.url, self.timeout).await
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

    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    type ServerWs = WebSocketStream<TcpStream>;

    #[test]
    fn socket_io_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SocketIoTransport>();
    }

    #[test]
    fn connector_builds_engine_io_url() {
        let connector = WebSocketConnector::new("http://localhost:5001").unwrap();
        assert_eq!(
            connector.url(),
            "ws://localhost:5001/socket.io/?EIO=4&transport=websocket"
        );
        assert!(WebSocketConnector::new("localhost:5001").is_err());
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = SocketIoTransport::connect("ws://127.0.0.1:1/socket.io/?EIO=4&transport=websocket")
            .await
            .unwrap_err();
        assert!(matches!(err, TriviaError::Io(_)));
    }

    // ── Mock Socket.IO server ────────────────────────────────────────────

    async fn next_text(ws: &mut ServerWs) -> Option<String> {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                return Some(text.as_str().to_string());
            }
        }
        None
    }

    async fn send_text(ws: &mut ServerWs, text: &str) {
        ws.send(Message::Text(text.into())).await.unwrap();
    }

    /// Accepts one connection, completes the handshake, then runs `handler`.
    async fn start_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            send_text(
                &mut ws,
                r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
            )
            .await;
            assert_eq!(next_text(&mut ws).await.as_deref(), Some("40"));
            send_text(&mut ws, r#"40{"sid":"abc"}"#).await;
            handler(ws).await;
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn handshake_then_receives_event_arrays() {
        let url = start_server(|mut ws| async move {
            send_text(&mut ws, r#"42["connection_ack",{"sid":"abc"}]"#).await;
            ws.close(None).await.unwrap();
        })
        .await;

        let mut connector = WebSocketConnector::new(&url).unwrap();
        let mut transport = connector.connect().await.unwrap();
        assert_eq!(transport.engine_sid(), "eio-1");

        let event = transport.recv().await.unwrap().unwrap();
        assert_eq!(event, r#"["connection_ack",{"sid":"abc"}]"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn answers_heartbeat_pings() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let url = start_server(|mut ws| async move {
            send_text(&mut ws, "2").await;
            let reply = next_text(&mut ws).await;
            send_text(&mut ws, r#"42["lobby_countdown_update",{"mode":null,"time_remaining":30}]"#)
                .await;
            tx.send(reply).unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketConnector::new(&url)
            .unwrap()
            .connect()
            .await
            .unwrap();
        let event = transport.recv().await.unwrap().unwrap();
        assert!(event.starts_with(r#"["lobby_countdown_update""#));
        assert_eq!(rx.await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn send_wraps_event_in_message_packet() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let url = start_server(|mut ws| async move {
            tx.send(next_text(&mut ws).await).unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketConnector::new(&url)
            .unwrap()
            .connect()
            .await
            .unwrap();
        transport
            .send(r#"["submit_answer",{"answer":"Lima"}]"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            rx.await.unwrap().as_deref(),
            Some(r#"42["submit_answer",{"answer":"Lima"}]"#)
        );
    }

    #[tokio::test]
    async fn namespace_disconnect_ends_stream() {
        let url = start_server(|mut ws| async move {
            send_text(&mut ws, "41").await;
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketConnector::new(&url)
            .unwrap()
            .connect()
            .await
            .unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_error_is_reported_as_server_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            send_text(&mut ws, r#"0{"sid":"eio-2","pingInterval":25000,"pingTimeout":20000}"#)
                .await;
            let _ = next_text(&mut ws).await;
            send_text(&mut ws, r#"44{"message":"lobby full"}"#).await;
            while let Some(Ok(_)) = ws.next().await {}
        });

        let err = WebSocketConnector::new(&format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap_err();
        match err {
            TriviaError::ServerError { message } => assert_eq!(message, "lobby full"),
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketConnector::new(&url)
            .unwrap()
            .connect()
            .await
            .unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send(r#"["use_help"]"#.to_string()).await.unwrap_err();
        assert!(matches!(err, TriviaError::TransportClosed));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Accepts TCP but never answers the WebSocket upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let url = frame::engine_io_url(&format!("http://{addr}")).unwrap();
        let err = SocketIoTransport::connect_with_timeout(&url, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TriviaError::Timeout));
    }
}
