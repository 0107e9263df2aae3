use std::io::Write;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::transport::{
    Connection, DriverControl, ExitInfo, LaunchCommand, Target, TermSize, Transport,
    TransportError, TransportKind,
};

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Whether this platform can allocate a pseudo-terminal.
pub fn pty_available() -> bool {
    native_pty_system().openpty(pty_size(TermSize::new(2, 2))).is_ok()
}

/// Runs the Telnet client inside a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtyTransport {
    command: LaunchCommand,
}

impl PtyTransport {
    pub fn new(command: LaunchCommand) -> Self {
        Self { command }
    }
}

impl Transport for PtyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pty
    }

    fn open(&self, target: &Target, size: TermSize) -> Result<Connection, TransportError> {
        let pair = native_pty_system()
            .openpty(pty_size(size))
            .map_err(|e| TransportError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&self.command.program);
        cmd.args(self.command.render(target));
        cmd.env("TERM", "xterm-256color");

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            TransportError::Spawn(format!("failed to spawn {}: {e}", self.command.program))
        })?;
        // The child holds its own copy; keeping ours open would hide EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TransportError::Spawn(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TransportError::Spawn(format!("failed to take writer: {e}")))?;

        log::debug!(
            "spawned {} for {}:{} in a pty (pid {:?})",
            self.command.program,
            target.host,
            target.port,
            child.process_id()
        );

        Ok(Connection {
            kind: TransportKind::Pty,
            reader,
            control: Box::new(PtyControl {
                master: pair.master,
                writer,
                child,
            }),
        })
    }
}

/// Owns the pty master, its writer, and the child process.
struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl DriverControl for PtyControl {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, size: TermSize) -> Result<(), TransportError> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| TransportError::Resize(format!("{e}")))
    }

    fn try_wait(&mut self) -> Option<ExitInfo> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(ExitInfo {
                code: Some(status.exit_code()),
                signal: status.signal().map(str::to_string),
            }),
            _ => None,
        }
    }

    fn terminate(&mut self) -> Result<(), TransportError> {
        // portable-pty hangs up the child before escalating.
        self.child.kill()?;
        Ok(())
    }

    fn force_kill(&mut self) -> Result<(), TransportError> {
        self.child.kill()?;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}
