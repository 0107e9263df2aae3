use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipe::PipeTransport;
use crate::pty::{pty_available, PtyTransport};

/// Errors from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

/// Destination of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Which driver variant is serving a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Pty,
    Pipe,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Pty => "pty",
            TransportKind::Pipe => "pipe",
        }
    }
}

/// Configured transport preference. `Auto` probes for pty support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Auto,
    Pty,
    Pipe,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(TransportMode::Auto),
            "pty" => Ok(TransportMode::Pty),
            "pipe" => Ok(TransportMode::Pipe),
            other => Err(format!("unknown transport mode: {other}")),
        }
    }
}

/// The remote-access program to launch, with `{host}` and `{port}`
/// placeholders in its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `telnet {host} {port}`.
    pub fn telnet() -> Self {
        Self::new("telnet", vec!["{host}".to_string(), "{port}".to_string()])
    }

    /// Substitute the placeholders for `target`.
    pub fn render(&self, target: &Target) -> Vec<String> {
        let port = target.port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{host}", &target.host).replace("{port}", &port))
            .collect()
    }
}

impl Default for LaunchCommand {
    fn default() -> Self {
        Self::telnet()
    }
}

/// How a driver process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<u32>,
    pub signal: Option<String>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Control half of an open connection.
///
/// Every method is non-blocking except `write`, which may block briefly when
/// the kernel buffer is full.
pub trait DriverControl: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn resize(&mut self, size: TermSize) -> Result<(), TransportError>;
    /// Returns `Some` once the process has exited.
    fn try_wait(&mut self) -> Option<ExitInfo>;
    /// Ask the process to go away.
    fn terminate(&mut self) -> Result<(), TransportError>;
    /// Kill the process unconditionally.
    fn force_kill(&mut self) -> Result<(), TransportError>;
    fn pid(&self) -> Option<u32>;
}

/// A freshly opened transport: the reader goes to the I/O thread, the
/// control half stays with the session.
pub struct Connection {
    pub kind: TransportKind,
    pub reader: Box<dyn Read + Send>,
    pub control: Box<dyn DriverControl>,
}

/// Opens connections to lab devices.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Spawn the driver and return as soon as the process exists. The remote
    /// connection may still be in progress.
    fn open(&self, target: &Target, size: TermSize) -> Result<Connection, TransportError>;
}

/// Build the transport for `mode`, probing the platform when `Auto`.
pub fn select_transport(
    mode: TransportMode,
    command: LaunchCommand,
) -> Result<Arc<dyn Transport>, TransportError> {
    match mode {
        TransportMode::Pty => Ok(Arc::new(PtyTransport::new(command))),
        TransportMode::Pipe => Ok(Arc::new(PipeTransport::new(command))),
        TransportMode::Auto => {
            if pty_available() {
                Ok(Arc::new(PtyTransport::new(command)))
            } else {
                log::warn!("pseudo-terminal unavailable, falling back to plain process pipes");
                Ok(Arc::new(PipeTransport::new(command)))
            }
        }
    }
}

/// Result of [`shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    pub exit: ExitInfo,
    /// The grace period ran out and the process was force-killed.
    pub forced: bool,
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Terminate a driver, wait up to `grace` for it to exit, then force-kill.
///
/// Blocks the calling thread. Always returns; a process that survives the
/// force-kill is reported with an empty [`ExitInfo`].
pub fn shutdown(control: &mut dyn DriverControl, grace: Duration) -> Shutdown {
    if let Some(exit) = control.try_wait() {
        return Shutdown { exit, forced: false };
    }

    if let Err(e) = control.terminate() {
        log::debug!("terminate failed: {e}");
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(exit) = control.try_wait() {
            return Shutdown { exit, forced: false };
        }
        thread::sleep(POLL_INTERVAL);
    }

    log::warn!(
        "driver (pid {:?}) did not exit within {grace:?}, force-killing",
        control.pid()
    );
    if let Err(e) = control.force_kill() {
        log::warn!("force kill failed: {e}");
    }

    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        if let Some(exit) = control.try_wait() {
            return Shutdown { exit, forced: true };
        }
        if Instant::now() >= deadline {
            return Shutdown {
                exit: ExitInfo::default(),
                forced: true,
            };
        }
        thread::sleep(POLL_INTERVAL);
    }
}
