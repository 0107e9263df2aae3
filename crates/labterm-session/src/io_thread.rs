//! Per-session I/O thread that reads driver output into the registry.
//!
//! Driver reads are blocking, so each session gets a dedicated OS thread. The
//! reader is owned by the thread directly (not behind the session lock), so a
//! stalled remote host never holds a lock another session or a surface needs.

use std::io::{self, Read};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use labterm_pty::{DriverControl, ExitInfo};

use crate::registry::SessionRegistry;
use crate::session::SessionEntry;

/// Start the read loop for a session on a dedicated OS thread.
pub(crate) fn start_io_thread(
    registry: Weak<SessionRegistry>,
    entry: Arc<SessionEntry>,
    reader: Box<dyn Read + Send>,
) -> io::Result<()> {
    let short_id: String = entry.id.chars().take(8).collect();
    thread::Builder::new()
        .name(format!("telnet-io-{short_id}"))
        .spawn(move || io_loop(registry, entry, reader))?;
    Ok(())
}

fn io_loop(
    registry: Weak<SessionRegistry>,
    entry: Arc<SessionEntry>,
    mut reader: Box<dyn Read + Send>,
) {
    let mut buf = [0u8; 16 * 1024];

    let read_error = loop {
        match reader.read(&mut buf) {
            Ok(0) => break None,
            Ok(n) => match registry.upgrade() {
                Some(registry) => registry.append_to(&entry, &buf[..n]),
                // Registry dropped at application shutdown.
                None => return,
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // On Linux a pty master reports EIO once the child is gone.
            Err(e) => break Some(e),
        }
    };

    log::debug!("session {}: read loop finished ({read_error:?})", entry.id);
    if let Some(registry) = registry.upgrade() {
        registry.reap(&entry, read_error);
    }
}

/// Poll `control` until the process exits or `grace` runs out.
pub(crate) fn wait_for_exit(control: &mut dyn DriverControl, grace: Duration) -> Option<ExitInfo> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(exit) = control.try_wait() {
            return Some(exit);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
