//! Relay websocket client for integration tests.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Default bound on waiting for a single frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the server sent next.
#[derive(Debug)]
pub enum Received {
    Json(Value),
    Closed(Option<CloseFrame<'static>>),
}

/// One relay participant's socket.
pub struct WsClient {
    socket: Socket,
    /// Messages that arrived ahead of the join acknowledgement.
    pending: VecDeque<Value>,
}

impl WsClient {
    /// Open a websocket to `url`.
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self {
            socket,
            pending: VecDeque::new(),
        })
    }

    /// Open a websocket and announce `participant_id` with a `connect`
    /// message, waiting for the `session_joined` acknowledgement.
    ///
    /// Room traffic that lands between admission and the acknowledgement
    /// is kept and returned by the next receives.
    pub async fn join(url: &str, participant_id: &str) -> Result<Self, anyhow::Error> {
        let mut client = Self::connect(url).await?;
        client
            .send_json(&json!({"type": "connect", "participantId": participant_id}))
            .await?;

        let mut early = VecDeque::new();
        loop {
            let message = match client.recv_within(RECV_TIMEOUT).await {
                Some(Received::Json(message)) => message,
                other => anyhow::bail!("no acknowledgement for {}: {:?}", participant_id, other),
            };
            if message["type"] == "session_joined" && message["participantId"] == participant_id {
                break;
            }
            early.push_back(message);
        }
        client.pending = early;
        Ok(client)
    }

    pub async fn send_json(&mut self, value: &Value) -> Result<(), anyhow::Error> {
        self.send_text(&value.to_string()).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Binary(bytes)).await?;
        Ok(())
    }

    /// Next data frame or close, skipping control frames.
    ///
    /// `None` on timeout.
    pub async fn recv_within(&mut self, limit: Duration) -> Option<Received> {
        if let Some(message) = self.pending.pop_front() {
            return Some(Received::Json(message));
        }

        let next = async {
            loop {
                match self.socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let value = serde_json::from_str(&text).expect("server sent non-JSON text");
                        return Received::Json(value);
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let value =
                            serde_json::from_slice(&bytes).expect("server sent non-JSON binary");
                        return Received::Json(value);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Received::Closed(frame.map(CloseFrame::into_owned));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return Received::Closed(None),
                }
            }
        };
        tokio::time::timeout(limit, next).await.ok()
    }

    /// Next JSON message; panics on timeout or close.
    pub async fn recv_json(&mut self) -> Value {
        match self.recv_within(RECV_TIMEOUT).await {
            Some(Received::Json(value)) => value,
            Some(Received::Closed(frame)) => panic!("socket closed while waiting: {frame:?}"),
            None => panic!("no message within {RECV_TIMEOUT:?}"),
        }
    }

    /// Wait for the server to close the socket and return the close code.
    ///
    /// Data frames that arrive first are skipped. `None` if the socket ended
    /// without a close frame.
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            match self.recv_within(RECV_TIMEOUT).await {
                Some(Received::Json(_)) => continue,
                Some(Received::Closed(frame)) => return frame.map(|f| u16::from(f.code)),
                None => panic!("socket not closed within {RECV_TIMEOUT:?}"),
            }
        }
    }

    /// Assert nothing arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        if let Some(received) = self.recv_within(quiet).await {
            panic!("expected silence, got {received:?}");
        }
    }

    /// Send a close frame and drain until the server acknowledges.
    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
        let _ = tokio::time::timeout(RECV_TIMEOUT, async {
            while let Some(Ok(_)) = self.socket.next().await {}
        })
        .await;
    }

    /// Drop the TCP connection without a close handshake.
    pub fn abort(self) {
        drop(self.socket);
    }
}
