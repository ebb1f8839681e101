//! WebSocket transport for the assistant service
//!
//! Each turn opens one WebSocket connection. Requests and responses travel as
//! JSON text frames; a binary frame is treated as raw response audio. Reads use
//! a short socket timeout so the engine can poll without blocking.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::transport::{AssistRequest, AssistResponse, AssistantChannel, AssistantSession, SessionRead};
use crate::{Error, Result};

/// Connection settings for the assistant service
pub struct WebSocketChannel {
    endpoint: String,
    token: SecretString,
    read_timeout: Duration,
}

impl WebSocketChannel {
    /// Load credentials and check the endpoint URL, without connecting
    ///
    /// The credentials file holds a bearer token; surrounding whitespace is
    /// ignored. `read_timeout` bounds each session read, after which the read
    /// reports [`SessionRead::Pending`].
    ///
    /// # Errors
    ///
    /// Returns error if the credentials file is missing or empty, or the
    /// endpoint is not a valid WebSocket URL
    pub fn new(endpoint: &str, credentials_path: &Path, read_timeout: Duration) -> Result<Self> {
        let raw = std::fs::read_to_string(credentials_path).map_err(|e| {
            Error::Credentials(format!(
                "failed to read {}: {e}",
                credentials_path.display()
            ))
        })?;

        let token = raw.trim();
        if token.is_empty() {
            return Err(Error::Credentials(format!(
                "{} is empty",
                credentials_path.display()
            )));
        }

        endpoint
            .into_client_request()
            .map_err(|e| Error::Config(format!("invalid assistant endpoint {endpoint}: {e}")))?;

        tracing::info!(endpoint, "assistant channel configured");

        Ok(Self {
            endpoint: endpoint.to_string(),
            token: SecretString::from(token.to_string()),
            read_timeout,
        })
    }

    /// Like [`new`](Self::new), then complete one handshake with the service
    ///
    /// # Errors
    ///
    /// Returns error if the channel cannot be configured or the service
    /// cannot be reached
    pub fn connect(endpoint: &str, credentials_path: &Path, read_timeout: Duration) -> Result<Self> {
        let channel = Self::new(endpoint, credentials_path, read_timeout)?;

        let mut session = channel.open_session()?;
        session.finish()?;
        tracing::info!(endpoint, "assistant service reachable");

        Ok(channel)
    }

    /// Service endpoint URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AssistantChannel for WebSocketChannel {
    fn open_session(&self) -> Result<Box<dyn AssistantSession>> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|e| Error::Credentials(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, response) = tungstenite::connect(request)?;
        tracing::debug!(status = %response.status(), "assistant session opened");

        set_read_timeout(socket.get_ref(), self.read_timeout)?;

        Ok(Box::new(WebSocketSession {
            socket,
            closed: false,
        }))
    }
}

fn set_read_timeout(stream: &MaybeTlsStream<TcpStream>, timeout: Duration) -> Result<()> {
    match stream {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(Some(timeout))?,
        MaybeTlsStream::Rustls(tls) => tls.get_ref().set_read_timeout(Some(timeout))?,
        _ => tracing::warn!("unknown stream type; reads may block"),
    }
    Ok(())
}

/// One turn over a WebSocket connection
struct WebSocketSession {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl AssistantSession for WebSocketSession {
    fn write(&mut self, request: &AssistRequest) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("session already finished".to_string()));
        }

        let json = serde_json::to_string(request)?;
        self.socket.send(Message::Text(json))?;
        Ok(())
    }

    fn read(&mut self) -> Result<SessionRead> {
        if self.closed {
            return Ok(SessionRead::Finished);
        }

        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(SessionRead::Message(serde_json::from_str(&text)?)),
            Ok(Message::Binary(audio)) => Ok(SessionRead::Message(AssistResponse {
                audio_out: Some(audio),
                ..AssistResponse::default()
            })),
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "service closed the session");
                self.closed = true;
                Ok(SessionRead::Finished)
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(SessionRead::Pending),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(SessionRead::Pending)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.closed = true;
                Ok(SessionRead::Finished)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        match self.socket.close(None) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
