//! Fallback transport: the Telnet client as a plain child process.
//!
//! Used where a pseudo-terminal cannot be allocated. stdout and stderr are
//! merged into a single ordered-per-stream reader; there is no line
//! discipline, so resize is a no-op.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread;

use crate::transport::{
    Connection, DriverControl, ExitInfo, LaunchCommand, Target, TermSize, Transport,
    TransportError, TransportKind,
};

#[derive(Debug, Clone)]
pub struct PipeTransport {
    command: LaunchCommand,
}

impl PipeTransport {
    pub fn new(command: LaunchCommand) -> Self {
        Self { command }
    }
}

impl Transport for PipeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    fn open(&self, target: &Target, _size: TermSize) -> Result<Connection, TransportError> {
        let mut child = Command::new(&self.command.program)
            .args(self.command.render(target))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TransportError::Spawn(format!("failed to spawn {}: {e}", self.command.program))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("child has no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Spawn("child has no stderr".to_string()))?;

        let pid = child.id();
        let (tx, rx) = mpsc::channel();
        forward(format!("pipe-out-{pid}"), stdout, tx.clone())?;
        forward(format!("pipe-err-{pid}"), stderr, tx)?;

        log::debug!(
            "spawned {} for {}:{} without a pty (pid {pid})",
            self.command.program,
            target.host,
            target.port
        );

        Ok(Connection {
            kind: TransportKind::Pipe,
            reader: Box::new(MergedReader {
                rx,
                pending: Vec::new(),
                pos: 0,
            }),
            control: Box::new(PipeControl { stdin, child }),
        })
    }
}

/// Copy one child stream into the merge channel on its own thread.
fn forward<R: Read + Send + 'static>(
    name: String,
    mut stream: R,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), TransportError> {
    thread::Builder::new().name(name).spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return,
            }
        }
    })?;
    Ok(())
}

/// Blocking reader over the merged stdout/stderr chunks. Returns EOF once
/// both streams have closed.
struct MergedReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for MergedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct PipeControl {
    stdin: Option<ChildStdin>,
    child: Child,
}

impl DriverControl for PipeControl {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(data)?;
        stdin.flush()?;
        Ok(())
    }

    fn resize(&mut self, _size: TermSize) -> Result<(), TransportError> {
        Ok(())
    }

    fn try_wait(&mut self) -> Option<ExitInfo> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_info(status)),
            _ => None,
        }
    }

    fn terminate(&mut self) -> Result<(), TransportError> {
        // Closing stdin ends the client's session; kill covers clients that
        // keep running on EOF.
        self.stdin = None;
        self.child.kill()?;
        Ok(())
    }

    fn force_kill(&mut self) -> Result<(), TransportError> {
        self.child.kill()?;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

#[cfg(unix)]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;
    ExitInfo {
        code: status.code().map(|c| c as u32),
        signal: status.signal().map(|s| format!("signal {s}")),
    }
}

#[cfg(not(unix))]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    ExitInfo {
        code: status.code().map(|c| c as u32),
        signal: None,
    }
}
