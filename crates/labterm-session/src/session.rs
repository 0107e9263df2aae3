use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use labterm_pty::{DriverControl, Target, TermSize, TransportKind};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{SessionError, SessionResult};
use crate::prompt::{ConnectWatch, HostnameSniffer};
use crate::ring_buffer::RingBuffer;

/// Opaque, never-reused session identifier.
pub type SessionId = String;

/// Identifier of a UI surface (a top-level window).
pub type SurfaceId = String;

pub const DEFAULT_TELNET_PORT: u32 = 23;

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Closed,
    Error,
}

impl SessionStatus {
    /// No further output is accepted once a session is closed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Error)
    }
}

/// Where the current label came from. Discovered hostnames never override a
/// label the user typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSource {
    Default,
    User,
    Discovered,
}

/// Parameters of a create call, as received from a surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub size: Option<TermSize>,
}

fn default_port() -> u32 {
    DEFAULT_TELNET_PORT
}

impl CreateRequest {
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
            label: None,
            size: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_size(mut self, size: TermSize) -> Self {
        self.size = Some(size);
        self
    }

    /// Reject malformed input before anything is allocated.
    pub fn target(&self) -> SessionResult<Target> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(SessionError::InvalidArgument("host must not be empty".into()));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(SessionError::InvalidArgument(format!(
                "host contains whitespace: {host:?}"
            )));
        }
        let port = validate_port(self.port)?;
        Ok(Target::new(host, port))
    }
}

/// Ports are 1-65535.
pub fn validate_port(port: u32) -> SessionResult<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(SessionError::InvalidArgument(format!(
            "port {port} is outside 1-65535"
        ))),
    }
}

/// `host` for the standard Telnet port, `host:port` otherwise.
pub fn default_label(host: &str, port: u16) -> String {
    if u32::from(port) == DEFAULT_TELNET_PORT {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Read-only view of a session, returned by describe/list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub host: String,
    pub port: u16,
    pub label: String,
    pub label_source: LabelSource,
    pub status: SessionStatus,
    pub last_error: Option<String>,
    pub transport: TransportKind,
    pub owner: Option<SurfaceId>,
    pub dispose_on_unmount: bool,
    pub buffered_bytes: usize,
    pub created_at: DateTime<Utc>,
}

/// The subset of metadata a merging surface needs to render a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub host: String,
    pub port: u16,
    pub label: String,
}

impl From<&SessionInfo> for SessionMeta {
    fn from(info: &SessionInfo) -> Self {
        Self {
            host: info.host.clone(),
            port: info.port,
            label: info.label.clone(),
        }
    }
}

/// Mutable per-session state: metadata, status, and scrollback. Guarded by a
/// per-session lock that is also held while events are published, which is
/// what keeps every subscriber's view of one session in the same order.
pub(crate) struct SessionState {
    pub host: String,
    pub port: u16,
    pub label: String,
    pub label_source: LabelSource,
    pub status: SessionStatus,
    pub last_error: Option<String>,
    pub ring: RingBuffer,
    pub owner: Option<SurfaceId>,
    pub dispose_on_unmount: bool,
    pub size: TermSize,
    pub sniffer: HostnameSniffer,
    pub connect: ConnectWatch,
    /// Driver variant actually serving the session, known once spawned.
    pub transport: TransportKind,
}

/// One registry entry.
pub(crate) struct SessionEntry {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<SessionState>,
    /// Control half of the driver. `None` before spawn and after reaping.
    pub driver: Mutex<Option<Box<dyn DriverControl>>>,
    /// Set once dispose has started; a late spawn must kill its driver.
    pub disposing: AtomicBool,
    /// Flips to `true` once the driver has been reaped (or never existed).
    reaped: watch::Sender<bool>,
}

impl SessionEntry {
    pub fn new(id: SessionId, state: SessionState) -> Self {
        let (reaped, _) = watch::channel(false);
        Self {
            id,
            created_at: Utc::now(),
            state: Mutex::new(state),
            driver: Mutex::new(None),
            disposing: AtomicBool::new(false),
            reaped,
        }
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }

    pub fn mark_reaped(&self) {
        self.reaped.send_replace(true);
    }

    pub fn reaped(&self) -> watch::Receiver<bool> {
        self.reaped.subscribe()
    }

    pub fn info(&self, state: &SessionState) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            host: state.host.clone(),
            port: state.port,
            label: state.label.clone(),
            label_source: state.label_source,
            status: state.status,
            last_error: state.last_error.clone(),
            transport: state.transport,
            owner: state.owner.clone(),
            dispose_on_unmount: state.dispose_on_unmount,
            buffered_bytes: state.ring.len(),
            created_at: self.created_at,
        }
    }
}
