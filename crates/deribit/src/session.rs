//! One logical venue connection: connect, authenticate, subscribe, stream,
//! reconnect-with-resubscribe, graceful close.
//!
//! A session is owned by exactly one task. The transport is a single duplex
//! stream carrying both responses and pushes, so a request/response caller
//! and a notification loop must never share one session; each concurrent
//! responsibility opens its own.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use strangle_core::{BotError, Result, RunFlag, VenueEndpoint};

use crate::codec::{decode, Incoming, RpcRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Streaming,
    Reconnecting,
    Closing,
}

/// One notification-loop read: either a push or a transport-level drop the
/// caller is expected to answer with [`Session::reconnect`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Push { channel: String, data: Value },
    Disconnected,
}

pub struct Session {
    url: String,
    client_id: String,
    client_secret: String,
    run: RunFlag,
    channels: Vec<String>,
    state: SessionState,
    stream: Option<WsStream>,
    consecutive_failures: u32,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl Session {
    #[must_use]
    pub fn new(
        endpoint: &VenueEndpoint,
        run: RunFlag,
        max_reconnect_attempts: u32,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            url: endpoint.url.clone(),
            client_id: endpoint.client_id.clone(),
            client_secret: endpoint.client_secret.clone(),
            run,
            channels: Vec::new(),
            state: SessionState::Disconnected,
            stream: None,
            consecutive_failures: 0,
            max_reconnect_attempts,
            reconnect_delay,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The retained subscription set, replayed after every reconnect.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Opens the transport and authenticates. Fails fast on an `error`
    /// response to `public/auth`.
    ///
    /// # Errors
    ///
    /// [`BotError::Transport`] if the socket cannot be opened,
    /// [`BotError::Auth`] if the venue rejects the credentials.
    pub async fn connect_and_auth(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        tracing::debug!(url = %self.url, "connecting");

        let url = url::Url::parse(&self.url)
            .map_err(|e| BotError::Transport(format!("bad endpoint url {}: {e}", self.url)))?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| BotError::Transport(format!("connect to {}: {e}", self.url)))?;
        self.stream = Some(stream);

        self.state = SessionState::Authenticating;
        let auth = self
            .request(
                "public/auth",
                json!({
                    "grant_type": "client_credentials",
                    "client_id": self.client_id,
                    "client_secret": self.client_secret,
                }),
            )
            .await;

        match auth {
            Ok(_) => {
                self.state = SessionState::Subscribed;
                tracing::info!(url = %self.url, "session authenticated");
                Ok(())
            }
            Err(BotError::Rpc { code, message } | BotError::Auth { code, message }) => {
                // Any auth rejection is terminal for the process.
                self.run.shutdown();
                Err(BotError::Auth { code, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Subscribes to a channel group, fire-and-forget. The set is retained
    /// (deduplicated) so reconnects can replay it verbatim; the venue
    /// tolerates duplicate subscribe calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be sent.
    pub async fn subscribe(&mut self, channels: &[String]) -> Result<()> {
        self.retain_channels(channels);
        self.send_subscribe(channels).await?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Adds channels to the retained set without duplicates.
    pub fn retain_channels(&mut self, channels: &[String]) {
        for ch in channels {
            if !self.channels.contains(ch) {
                self.channels.push(ch.clone());
            }
        }
    }

    async fn send_subscribe(&mut self, channels: &[String]) -> Result<()> {
        let req = RpcRequest::new("private/subscribe", json!({ "channels": channels }));
        self.send(&req).await
    }

    /// Send-then-receive-one. Response frames are matched by framing: this
    /// session must not have live subscriptions, so the next non-push frame
    /// is the answer to this request.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and RPC `error` responses; fatal
    /// (auth/session) error codes also flip the run flag.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let req = RpcRequest::new(method, params);
        self.send(&req).await?;

        loop {
            match self.recv_frame().await? {
                Some(Incoming::Result(value)) => return Ok(value),
                Some(Incoming::Error { code, message }) => {
                    let err = BotError::from_rpc(code, message);
                    if err.is_fatal() {
                        self.run.shutdown();
                    }
                    return Err(err);
                }
                Some(Incoming::Notification { channel, .. }) => {
                    tracing::warn!(%channel, %method, "push received on a request session, skipped");
                }
                Some(Incoming::Unexpected(obj)) => {
                    tracing::debug!(frame = %obj, "unexpected frame while awaiting response");
                }
                None => {
                    return Err(BotError::Transport(format!(
                        "socket closed while awaiting response to {method}"
                    )))
                }
            }
        }
    }

    /// Blocks until the next subscription push. Transport-level trouble
    /// (closed socket, decode failure) comes back as
    /// [`StreamEvent::Disconnected`] rather than an error, leaving the
    /// reconnect decision to the caller.
    ///
    /// # Errors
    ///
    /// Only fatal RPC errors pushed by the venue surface as `Err`.
    pub async fn recv_notification(&mut self) -> Result<StreamEvent> {
        loop {
            match self.recv_frame().await {
                Ok(Some(Incoming::Notification { channel, data })) => {
                    return Ok(StreamEvent::Push { channel, data })
                }
                Ok(Some(Incoming::Result(_))) => {
                    // Ack of a fire-and-forget subscribe; nothing to do.
                }
                Ok(Some(Incoming::Error { code, message })) => {
                    let err = BotError::from_rpc(code, message);
                    if err.is_fatal() {
                        self.run.shutdown();
                        return Err(err);
                    }
                    tracing::warn!(error = %err, "non-fatal RPC error on stream, ignored");
                }
                Ok(Some(Incoming::Unexpected(obj))) => {
                    tracing::debug!(frame = %obj, "unclassifiable frame, ignored");
                }
                Ok(None) => {
                    self.state = SessionState::Reconnecting;
                    return Ok(StreamEvent::Disconnected);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream decode failure, treating as disconnect");
                    self.state = SessionState::Reconnecting;
                    return Ok(StreamEvent::Disconnected);
                }
            }
        }
    }

    /// Re-enters `Connecting` with the same channel set. Bounded: after
    /// `max_reconnect_attempts` consecutive failures the session gives up
    /// with [`BotError::ConnectionExhausted`].
    ///
    /// # Errors
    ///
    /// [`BotError::ConnectionExhausted`] once the retry budget is spent,
    /// [`BotError::Auth`] if re-authentication is rejected.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.state = SessionState::Reconnecting;
        self.stream = None;

        loop {
            self.consecutive_failures += 1;
            if self.consecutive_failures > self.max_reconnect_attempts {
                self.run.shutdown();
                return Err(BotError::ConnectionExhausted {
                    attempts: self.consecutive_failures - 1,
                });
            }

            tokio::time::sleep(self.backoff_delay()).await;
            tracing::info!(
                attempt = self.consecutive_failures,
                url = %self.url,
                "reconnecting"
            );

            match self.connect_and_auth().await {
                Ok(()) => {
                    let channels = self.channels.clone();
                    if !channels.is_empty() {
                        self.send_subscribe(&channels).await?;
                        self.state = SessionState::Streaming;
                    }
                    self.consecutive_failures = 0;
                    return Ok(());
                }
                Err(e @ BotError::Auth { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Linear backoff: attempt number times the base delay.
    #[must_use]
    pub fn backoff_delay(&self) -> Duration {
        self.reconnect_delay * self.consecutive_failures.max(1)
    }

    /// Best-effort unsubscribe-and-close. Idempotent: calling it twice does
    /// not raise and does not resend the unsubscribe.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closing {
            return;
        }
        self.state = SessionState::Closing;

        if self.stream.is_some() {
            let req = RpcRequest::new("public/unsubscribe_all", json!({}));
            if let Err(e) = self.send(&req).await {
                tracing::debug!(error = %e, "unsubscribe_all on close failed, ignoring");
            }
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
        tracing::info!(url = %self.url, "session closed");
    }

    async fn send(&mut self, req: &RpcRequest) -> Result<()> {
        let wire = req.encode()?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BotError::Transport("not connected".into()))?;
        stream
            .send(Message::Text(wire))
            .await
            .map_err(|e| BotError::Transport(e.to_string()))
    }

    /// Reads the next text frame. `Ok(None)` means the transport is gone.
    async fn recv_frame(&mut self) -> Result<Option<Incoming>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BotError::Transport("not connected".into()))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode(&text).map(Some),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket receive error");
                    return Ok(None);
                }
            }
        }
    }
}
