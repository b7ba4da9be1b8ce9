//! Connection manager: socket lifecycle state machine, resume tokens, bounded
//! retry and inbound frame dispatch.
//!
//! The manager performs no I/O. The runtime reports transport events to it and
//! executes what it decides (connect, wait, transmit).

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::blocks::Block;
use crate::identity::ConnectionIdentity;
use crate::messages::{ChatRequest, HistoryEntry, ProtocolError, ServerMessage};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Fixed-delay retry with an attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// A handshake still pending after this long counts as a failed attempt.
    pub handshake_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Parameters attached to one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub client_id: String,
    pub reconnect_token: Option<String>,
}

impl ConnectParams {
    /// Socket URL for `endpoint` with the identity as query parameters.
    pub fn url(&self, endpoint: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            if let Some(token) = &self.reconnect_token {
                query.append_pair("reconnect_token", token);
            }
        }
        Ok(url)
    }
}

/// Socket endpoint for an HTTP base URL: `http`→`ws`, `https`→`wss`.
pub fn websocket_endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// What to do after the transport dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Wait, then attempt again.
    After(Duration),
    /// The bound was just reached; notify once and stop.
    Exhausted,
    /// Already exhausted, or the close was requested locally.
    Stopped,
}

/// Inbound frame routed to the conversation controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Reply {
        content: String,
        sources: Vec<String>,
        model: Option<String>,
    },
    Error(String),
    History(Vec<HistoryEntry>),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection is {0}")]
    NotConnected(ConnectionState),
    #[error("a request is already in flight")]
    InFlight,
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct ConnectionManager {
    state: ConnectionState,
    identity: ConnectionIdentity,
    policy: RetryPolicy,
    attempts: u32,
    exhausted: bool,
    in_flight: bool,
}

impl ConnectionManager {
    pub fn new(identity: ConnectionIdentity, policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            identity,
            policy,
            attempts: 0,
            exhausted: false,
            in_flight: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Automatic attempts made since the last successful handshake.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Open with no request outstanding.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open && !self.in_flight
    }

    /// Explicit connect request. Clears a previous exhaustion. `None` unless
    /// currently disconnected.
    pub fn connect(&mut self) -> Option<ConnectParams> {
        if self.state != ConnectionState::Disconnected {
            debug!(state = %self.state, "connect ignored");
            return None;
        }
        self.attempts = 0;
        self.exhausted = false;
        Some(self.begin_attempt())
    }

    /// Automatic attempt once the retry delay has elapsed.
    pub fn retry(&mut self) -> Option<ConnectParams> {
        if self.state != ConnectionState::Disconnected || self.exhausted {
            return None;
        }
        info!(attempt = self.attempts, max = self.policy.max_attempts, "reconnecting");
        Some(self.begin_attempt())
    }

    fn begin_attempt(&mut self) -> ConnectParams {
        self.state = ConnectionState::Connecting;
        ConnectParams {
            client_id: self.identity.client_id().to_string(),
            reconnect_token: self.identity.reconnect_token().map(str::to_string),
        }
    }

    /// Handshake completed.
    pub fn on_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "handshake reported while not connecting");
        }
        info!("connected");
        self.state = ConnectionState::Open;
        self.attempts = 0;
    }

    /// Local close requested; the following transport close does not retry.
    pub fn close(&mut self) {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            self.state = ConnectionState::Closing;
        }
    }

    /// Transport failed or the server closed. Clears the in-flight flag and
    /// decides whether to retry.
    pub fn on_closed(&mut self) -> Reconnect {
        let previous = self.state;
        self.state = ConnectionState::Disconnected;
        self.in_flight = false;

        if previous == ConnectionState::Closing {
            debug!("closed locally");
            return Reconnect::Stopped;
        }
        if self.exhausted {
            return Reconnect::Stopped;
        }
        if self.attempts >= self.policy.max_attempts {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            self.exhausted = true;
            return Reconnect::Exhausted;
        }
        self.attempts += 1;
        info!(
            attempt = self.attempts,
            delay_ms = self.policy.delay.as_millis() as u64,
            "connection lost, scheduling reconnect"
        );
        Reconnect::After(self.policy.delay)
    }

    /// Decode and route one inbound frame. Token frames are absorbed here.
    pub fn on_frame(&mut self, text: &str) -> Result<Option<Inbound>, ProtocolError> {
        let inbound = match ServerMessage::parse(text)? {
            ServerMessage::Reply {
                content,
                sources,
                model,
            } => {
                self.in_flight = false;
                Inbound::Reply {
                    content,
                    sources,
                    model,
                }
            }
            ServerMessage::Error(text) => {
                self.in_flight = false;
                Inbound::Error(text)
            }
            ServerMessage::ReconnectToken(token) => {
                debug!("reconnect token issued");
                self.identity.replace_token(token);
                return Ok(None);
            }
            ServerMessage::History(entries) => Inbound::History(entries),
        };
        Ok(Some(inbound))
    }

    /// Encode a chat request and mark it in flight.
    pub fn send(&mut self, blocks: &[Block], model: &str) -> Result<String, SendError> {
        if self.state != ConnectionState::Open {
            return Err(SendError::NotConnected(self.state));
        }
        if self.in_flight {
            return Err(SendError::InFlight);
        }
        let frame = serde_json::to_string(&ChatRequest::new(blocks, model))?;
        self.in_flight = true;
        Ok(frame)
    }
}
