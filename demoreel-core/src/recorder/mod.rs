pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use self::protocol::{opcode, Envelope};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder connection failed: {0}")]
    Connect(String),
    #[error("recorder did not answer within {0:?}")]
    ConnectTimeout(Duration),
    #[error("recorder handshake failed: {0}")]
    Handshake(String),
    #[error("recorder request {request} failed: {message}")]
    Request { request: String, message: String },
    #[error("recorder control channel closed")]
    ChannelClosed,
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// One job's exclusive handle on the capture application.
///
/// `connected`/`recording` are the orchestrator's view, consulted by the
/// cleanup phase to decide which teardown steps still apply.
#[async_trait]
pub trait RecorderSession: Send + std::fmt::Debug {
    fn is_connected(&self) -> bool;
    fn is_recording(&self) -> bool;
    /// Starts recording. Returns `false` when the recorder was already
    /// capturing and this session adopted the in-progress recording
    /// instead of issuing a duplicate start.
    async fn start_record(&mut self) -> RecorderResult<bool>;
    /// Stops recording. Skipped (Ok) when this session never started one.
    async fn stop_record(&mut self) -> RecorderResult<()>;
    /// Best-effort teardown of the control channel.
    async fn disconnect(&mut self);
}

#[async_trait]
pub trait RecorderConnector: Send + Sync {
    async fn connect(&self) -> RecorderResult<Box<dyn RecorderSession>>;
}

/// Dials the capture application's websocket control channel and performs
/// the v5 Hello/Identify handshake.
pub struct ObsConnector {
    host: String,
    port: u16,
    password: Option<String>,
    connect_timeout: Duration,
}

impl ObsConnector {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            password,
            connect_timeout,
        }
    }

    async fn handshake(&self) -> RecorderResult<ObsSession> {
        let url = format!("ws://{}:{}", self.host, self.port);
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| RecorderError::ConnectTimeout(self.connect_timeout))?
            .map_err(|err| RecorderError::Connect(err.to_string()))?;
        let mut session = ObsSession {
            stream,
            connected: false,
            recording: false,
            next_request_id: 1,
        };

        let hello = session.read_until(opcode::HELLO).await?;
        let authentication = match protocol::hello_authentication(&hello) {
            Some(challenge) => {
                let password = self.password.as_deref().ok_or_else(|| {
                    RecorderError::Handshake(
                        "recorder requires authentication but no password is configured".into(),
                    )
                })?;
                Some(protocol::authentication_token(
                    password,
                    &challenge.salt,
                    &challenge.challenge,
                ))
            }
            None => None,
        };
        session
            .send(protocol::identify_message(authentication.as_deref()))
            .await?;
        session.read_until(opcode::IDENTIFIED).await?;
        session.connected = true;
        info!(host = %self.host, port = self.port, "connected to recorder");
        Ok(session)
    }
}

#[async_trait]
impl RecorderConnector for ObsConnector {
    async fn connect(&self) -> RecorderResult<Box<dyn RecorderSession>> {
        let session = self.handshake().await?;
        Ok(Box::new(session))
    }
}

#[derive(Debug)]
pub struct ObsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connected: bool,
    recording: bool,
    next_request_id: u64,
}

impl ObsSession {
    async fn send(&mut self, payload: String) -> RecorderResult<()> {
        self.stream
            .send(Message::Text(payload))
            .await
            .map_err(|err| RecorderError::Connect(err.to_string()))
    }

    /// Reads frames until one with the wanted opcode arrives. Events and
    /// other traffic are skipped.
    async fn read_until(&mut self, wanted: u8) -> RecorderResult<Value> {
        loop {
            let message = self
                .stream
                .next()
                .await
                .ok_or(RecorderError::ChannelClosed)?
                .map_err(|err| RecorderError::Connect(err.to_string()))?;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return Err(RecorderError::ChannelClosed),
                _ => continue,
            };
            let Envelope { op, d } = protocol::parse_envelope(&text)
                .map_err(|err| RecorderError::Handshake(err.to_string()))?;
            if op == wanted {
                return Ok(d);
            }
            if op != opcode::EVENT {
                debug!(op, "ignoring unexpected control frame");
            }
        }
    }

    async fn request(&mut self, request_type: &str) -> RecorderResult<Value> {
        let request_id = format!("demoreel-{}", self.next_request_id);
        self.next_request_id += 1;
        self.send(protocol::request_message(request_type, &request_id))
            .await?;
        loop {
            let d = self.read_until(opcode::REQUEST_RESPONSE).await?;
            let response = protocol::parse_request_response(d)
                .map_err(|err| RecorderError::Handshake(err.to_string()))?;
            if response.request_id != request_id {
                debug!(request_id = %response.request_id, "skipping stale response");
                continue;
            }
            if !response.request_status.result {
                return Err(RecorderError::Request {
                    request: request_type.to_string(),
                    message: response
                        .request_status
                        .comment
                        .unwrap_or_else(|| format!("code {}", response.request_status.code)),
                });
            }
            return Ok(response.response_data);
        }
    }

    async fn output_active(&mut self) -> RecorderResult<bool> {
        let data = self.request("GetRecordStatus").await?;
        Ok(data
            .get("outputActive")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

#[async_trait]
impl RecorderSession for ObsSession {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    async fn start_record(&mut self) -> RecorderResult<bool> {
        if self.output_active().await? {
            warn!("recorder is already capturing; adopting the in-progress recording");
            self.recording = true;
            return Ok(false);
        }
        self.request("StartRecord").await?;
        self.recording = true;
        info!("recorder started");
        Ok(true)
    }

    async fn stop_record(&mut self) -> RecorderResult<()> {
        if !self.recording {
            debug!("recorder was never started by this session, skipping stop");
            return Ok(());
        }
        self.recording = false;
        if self.output_active().await? {
            self.request("StopRecord").await?;
            info!("recorder stopped");
        } else {
            warn!("recorder was not capturing at stop time");
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(error) = self.stream.close(None).await {
            debug!(%error, "error while closing recorder control channel");
        } else {
            info!("disconnected from recorder");
        }
    }
}
