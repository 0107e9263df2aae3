//! Process-wide table of live Telnet sessions.
//!
//! The registry owns every driver and its scrollback. Surfaces only ever hold
//! session IDs; closing a window never touches a driver unless the window
//! explicitly disposes it.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use labterm_pty::{shutdown, Connection, ExitInfo, Target, TermSize, Transport, TransportKind};
use uuid::Uuid;

use crate::bridge::{Bridge, BridgeEvent, SubscriberId};
use crate::error::{SessionError, SessionResult};
use crate::io_thread::{start_io_thread, wait_for_exit};
use crate::prompt::{ConnectWatch, HostnameSniffer};
use crate::ring_buffer::RingBuffer;
use crate::session::{
    default_label, validate_port, CreateRequest, LabelSource, SessionEntry, SessionId,
    SessionInfo, SessionState, SessionStatus, SurfaceId,
};

/// How long the read loop waits for the process after EOF before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Scrollback kept per session.
    pub ring_buffer_bytes: usize,
    /// Grace period between terminate and force-kill on dispose.
    pub dispose_timeout: Duration,
    /// Terminal size used when a create request has none.
    pub default_size: TermSize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ring_buffer_bytes: 256 * 1024,
            dispose_timeout: Duration::from_secs(3),
            default_size: TermSize::default(),
        }
    }
}

enum Outcome {
    Exited(ExitInfo),
    Failed(String),
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    bridge: Bridge,
    transport: Arc<dyn Transport>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn Transport>, bridge: Bridge, config: RegistryConfig) -> Arc<Self> {
        log::info!(
            "session registry ready (transport={}, scrollback={} bytes)",
            transport.kind().as_str(),
            config.ring_buffer_bytes
        );
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            bridge,
            transport,
            config,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Validate, allocate, and spawn a session. Returns its ID even when the
    /// spawn fails; the failure is visible as `Error` status on the session.
    pub fn create(self: &Arc<Self>, request: &CreateRequest) -> SessionResult<SessionId> {
        let id = self.allocate(request, None)?;
        self.start(&id);
        Ok(id)
    }

    /// Register a session in `Idle` without spawning anything.
    pub(crate) fn allocate(
        &self,
        request: &CreateRequest,
        owner: Option<SurfaceId>,
    ) -> SessionResult<SessionId> {
        let target = request.target()?;
        let (label, label_source) = match request
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
        {
            Some(label) => (label.to_string(), LabelSource::User),
            None => (default_label(&target.host, target.port), LabelSource::Default),
        };

        let id = Uuid::new_v4().to_string();
        let state = SessionState {
            host: target.host.clone(),
            port: target.port,
            label,
            label_source,
            status: SessionStatus::Idle,
            last_error: None,
            ring: RingBuffer::new(self.config.ring_buffer_bytes),
            owner,
            dispose_on_unmount: true,
            size: request.size.unwrap_or(self.config.default_size),
            sniffer: HostnameSniffer::new(),
            connect: ConnectWatch::new(),
            transport: self.transport.kind(),
        };
        let entry = Arc::new(SessionEntry::new(id.clone(), state));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&entry));

        log::info!("session {id} allocated for {}:{}", target.host, target.port);
        self.publish_status(&entry, SessionStatus::Idle);
        Ok(id)
    }

    /// Spawn the driver for an `Idle` session. Blocks for the duration of the
    /// OS spawn, so async callers run it on a blocking thread.
    pub(crate) fn start(self: &Arc<Self>, id: &str) {
        let Some(entry) = self.lookup(id) else {
            log::debug!("start: session {id} is already gone");
            return;
        };

        let (target, size) = {
            let mut state = lock(&entry.state);
            if entry.is_disposing() {
                drop(state);
                entry.mark_reaped();
                return;
            }
            if state.status != SessionStatus::Idle {
                return;
            }
            state.status = SessionStatus::Connecting;
            self.bridge.publish(BridgeEvent::Status {
                id: entry.id.clone(),
                status: SessionStatus::Connecting,
            });
            (Target::new(state.host.clone(), state.port), state.size)
        };

        match self.transport.open(&target, size) {
            Ok(conn) => self.install(&entry, conn),
            Err(e) => {
                log::warn!("session {id}: spawn failed: {e}");
                self.fail(&entry, SessionError::Connect(e.to_string()).to_string());
                entry.mark_reaped();
            }
        }
    }

    fn install(self: &Arc<Self>, entry: &Arc<SessionEntry>, conn: Connection) {
        let Connection {
            kind,
            reader,
            mut control,
        } = conn;
        lock(&entry.state).transport = kind;

        let mut slot = lock(&entry.driver);
        if entry.is_disposing() {
            drop(slot);
            log::debug!("session {}: disposed during spawn, killing driver", entry.id);
            shutdown(control.as_mut(), self.config.dispose_timeout);
            entry.mark_reaped();
            return;
        }
        if let Some(pid) = control.pid() {
            log::debug!("session {}: driver pid {pid}", entry.id);
        }
        *slot = Some(control);
        drop(slot);

        if let Err(e) = start_io_thread(Arc::downgrade(self), Arc::clone(entry), reader) {
            log::error!("session {}: failed to start I/O thread: {e}", entry.id);
            if let Some(mut control) = lock(&entry.driver).take() {
                shutdown(control.as_mut(), self.config.dispose_timeout);
            }
            self.fail(entry, format!("failed to start I/O thread: {e}"));
            entry.mark_reaped();
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn remove(&self, id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        let entry = self.lookup(id)?;
        let state = lock(&entry.state);
        Some(entry.info(&state))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    /// Every live session, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let entries: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut infos: Vec<_> = entries
            .iter()
            .map(|entry| entry.info(&lock(&entry.state)))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed output into a session as if its driver produced it.
    pub fn append_output(&self, id: &str, data: &[u8]) {
        if let Some(entry) = self.lookup(id) {
            self.append_to(&entry, data);
        }
    }

    pub(crate) fn append_to(&self, entry: &SessionEntry, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut state = lock(&entry.state);
        if state.status.is_terminal() {
            log::trace!("session {}: dropping {} bytes after exit", entry.id, data.len());
            return;
        }
        // Output only confirms the connection once it is more than the
        // client announcing its attempt.
        if state.status != SessionStatus::Connected && state.connect.feed(data) {
            state.status = SessionStatus::Connected;
            log::info!("session {} connected", entry.id);
            self.bridge.publish(BridgeEvent::Status {
                id: entry.id.clone(),
                status: SessionStatus::Connected,
            });
        }

        let offset = state.ring.total_written();
        state.ring.write(data);
        self.bridge.publish(BridgeEvent::Data {
            id: entry.id.clone(),
            data: data.to_vec(),
            offset,
        });

        if let Some(host) = state.sniffer.feed(data) {
            if state.label_source != LabelSource::User && state.label != host {
                log::info!("session {}: discovered hostname {host}", entry.id);
                state.label = host.clone();
                state.label_source = LabelSource::Discovered;
                self.bridge.publish(BridgeEvent::Label {
                    id: entry.id.clone(),
                    label: Some(host),
                    host: None,
                    port: None,
                });
            }
        }
    }

    /// Current scrollback, oldest byte first.
    pub fn snapshot(&self, id: &str) -> SessionResult<Vec<u8>> {
        let entry = self
            .lookup(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        let state = lock(&entry.state);
        Ok(state.ring.read_all())
    }

    /// Queue the scrollback as a `Hydrate` event for one subscriber. Taken
    /// under the session lock, so every later `Data` event continues exactly
    /// where the snapshot ends.
    pub(crate) fn hydrate(&self, id: &str, subscriber: SubscriberId) -> SessionResult<usize> {
        let entry = self
            .lookup(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        let state = lock(&entry.state);
        let data = state.ring.read_all();
        let len = data.len();
        if !self.bridge.deliver(
            subscriber,
            BridgeEvent::Hydrate {
                id: entry.id.clone(),
                data,
            },
        ) {
            log::debug!("session {id}: hydrate target {subscriber} is gone");
        }
        Ok(len)
    }

    /// Forward keystrokes. Unknown or exited sessions drop the input.
    pub fn write(&self, id: &str, data: &[u8]) {
        let Some(entry) = self.lookup(id) else {
            log::debug!("write to unknown session {id} dropped");
            return;
        };
        let mut slot = lock(&entry.driver);
        match slot.as_mut() {
            Some(control) => {
                if let Err(e) = control.write(data) {
                    log::warn!("session {id}: write failed: {e}");
                }
            }
            None => log::debug!("session {id}: no driver, input dropped"),
        }
    }

    pub fn resize(&self, id: &str, size: TermSize) {
        let Some(entry) = self.lookup(id) else {
            log::debug!("resize of unknown session {id} ignored");
            return;
        };
        lock(&entry.state).size = size;
        let mut slot = lock(&entry.driver);
        if let Some(control) = slot.as_mut() {
            if let Err(e) = control.resize(size) {
                log::warn!("session {id}: resize to {}x{} failed: {e}", size.cols, size.rows);
            }
        }
    }

    /// Set a user label. An empty label reverts to the default.
    pub fn set_label(&self, id: &str, label: &str) -> SessionResult<()> {
        self.update_meta(id, |state| {
            let label = label.trim();
            if label.is_empty() {
                state.label = default_label(&state.host, state.port);
                state.label_source = LabelSource::Default;
                state.sniffer.reset();
            } else {
                state.label = label.to_string();
                state.label_source = LabelSource::User;
            }
            Ok((Some(state.label.clone()), None, None))
        })
    }

    /// Change the recorded host. The running connection is not touched.
    pub fn set_host(&self, id: &str, host: &str) -> SessionResult<()> {
        let host = host.trim();
        if host.is_empty() {
            return Err(SessionError::InvalidArgument("host must not be empty".into()));
        }
        self.update_meta(id, |state| {
            state.host = host.to_string();
            let label = refresh_default_label(state);
            Ok((label, Some(state.host.clone()), None))
        })
    }

    /// Change the recorded port. The running connection is not touched.
    pub fn set_port(&self, id: &str, port: u32) -> SessionResult<()> {
        let port = validate_port(port)?;
        self.update_meta(id, |state| {
            state.port = port;
            let label = refresh_default_label(state);
            Ok((label, None, Some(port)))
        })
    }

    fn update_meta<F>(&self, id: &str, apply: F) -> SessionResult<()>
    where
        F: FnOnce(
            &mut SessionState,
        ) -> SessionResult<(Option<String>, Option<String>, Option<u16>)>,
    {
        let entry = self
            .lookup(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        let mut state = lock(&entry.state);
        let (label, host, port) = apply(&mut state)?;
        self.bridge.publish(BridgeEvent::Label {
            id: entry.id.clone(),
            label,
            host,
            port,
        });
        Ok(())
    }

    /// Returns the previous owner.
    pub(crate) fn set_owner(
        &self,
        id: &str,
        owner: Option<SurfaceId>,
    ) -> SessionResult<Option<SurfaceId>> {
        let entry = self
            .lookup(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        let mut state = lock(&entry.state);
        Ok(std::mem::replace(&mut state.owner, owner))
    }

    /// Returns the previous flag.
    pub(crate) fn set_dispose_on_unmount(&self, id: &str, flag: bool) -> SessionResult<bool> {
        let entry = self
            .lookup(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        let mut state = lock(&entry.state);
        Ok(std::mem::replace(&mut state.dispose_on_unmount, flag))
    }

    /// Sessions owned by `surface`, with their dispose-on-unmount flag.
    pub(crate) fn owned_by(&self, surface: &str) -> Vec<(SessionId, bool)> {
        let entries: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries
            .iter()
            .filter_map(|entry| {
                let state = lock(&entry.state);
                (state.owner.as_deref() == Some(surface))
                    .then(|| (entry.id.clone(), state.dispose_on_unmount))
            })
            .collect()
    }

    /// Terminate the driver and forget the session. Idempotent: unknown IDs
    /// and repeated calls succeed, and only the first call runs the kill.
    pub async fn dispose(&self, id: &str) -> bool {
        let Some(entry) = self.lookup(id) else {
            log::debug!("dispose: session {id} already gone");
            return true;
        };

        let control = {
            let mut slot = lock(&entry.driver);
            entry.disposing.store(true, Ordering::Release);
            slot.take()
        };

        match control {
            Some(mut control) => {
                let grace = self.config.dispose_timeout;
                let result =
                    tokio::task::spawn_blocking(move || shutdown(control.as_mut(), grace)).await;
                let exit = match result {
                    Ok(outcome) => {
                        if outcome.forced {
                            log::warn!("session {id}: driver ignored terminate, force-killed");
                        }
                        outcome.exit
                    }
                    Err(e) => {
                        log::error!("session {id}: shutdown task failed: {e}");
                        ExitInfo::default()
                    }
                };
                self.close(&entry, exit);
                entry.mark_reaped();
            }
            None => {
                // Spawn still in flight or the read loop is reaping; either
                // side marks the entry reaped when it is done.
                let idle = lock(&entry.state).status == SessionStatus::Idle;
                if !idle {
                    let mut reaped = entry.reaped();
                    let wait = reaped.wait_for(|done| *done);
                    if tokio::time::timeout(self.config.dispose_timeout * 2, wait)
                        .await
                        .is_err()
                    {
                        log::warn!("session {id}: gave up waiting for driver to exit");
                    }
                }
                self.close(&entry, ExitInfo::default());
            }
        }

        self.remove(id);
        log::info!("session {id} disposed");
        true
    }

    /// Move a live session to `Closed` and announce the exit.
    fn close(&self, entry: &SessionEntry, exit: ExitInfo) {
        let mut state = lock(&entry.state);
        if state.status.is_terminal() {
            return;
        }
        state.status = SessionStatus::Closed;
        self.publish_exit(entry, exit);
    }

    fn publish_exit(&self, entry: &SessionEntry, exit: ExitInfo) {
        self.bridge.publish(BridgeEvent::Status {
            id: entry.id.clone(),
            status: SessionStatus::Closed,
        });
        self.bridge.publish(BridgeEvent::Exit {
            id: entry.id.clone(),
            exit_code: exit.code,
            signal: exit.signal,
        });
    }

    fn publish_status(&self, entry: &SessionEntry, status: SessionStatus) {
        self.bridge.publish(BridgeEvent::Status {
            id: entry.id.clone(),
            status,
        });
    }

    /// Move a session to `Error`. The entry is kept so the pane can show why.
    fn fail(&self, entry: &SessionEntry, message: String) {
        let mut state = lock(&entry.state);
        if state.status.is_terminal() {
            return;
        }
        state.status = SessionStatus::Error;
        state.last_error = Some(message.clone());
        self.bridge.publish(BridgeEvent::Error {
            id: entry.id.clone(),
            message,
        });
        self.publish_status(entry, SessionStatus::Error);
    }

    /// Called by the read loop once the driver's output has ended.
    pub(crate) fn reap(&self, entry: &SessionEntry, read_error: Option<io::Error>) {
        let Some(mut control) = lock(&entry.driver).take() else {
            // A dispose owns the driver and finishes the entry.
            return;
        };

        let outcome = match (wait_for_exit(control.as_mut(), EXIT_GRACE), read_error) {
            (Some(exit), _) => Outcome::Exited(exit),
            (None, Some(e)) => {
                shutdown(control.as_mut(), self.config.dispose_timeout);
                Outcome::Failed(format!("read failed: {e}"))
            }
            (None, None) => Outcome::Exited(shutdown(control.as_mut(), EXIT_GRACE).exit),
        };
        drop(control);

        let remove = {
            let mut state = lock(&entry.state);
            match outcome {
                Outcome::Exited(_) if state.status.is_terminal() => {
                    log::debug!("session {}: exited after {:?}", entry.id, state.status);
                    false
                }
                Outcome::Exited(exit)
                    if state.status != SessionStatus::Connected && !exit.success() =>
                {
                    let notice = state.connect.notice().map(str::to_string);
                    drop(state);
                    let mut reason = match (&exit.code, &exit.signal) {
                        (Some(code), _) => format!("telnet exited with code {code}"),
                        (None, Some(signal)) => format!("telnet killed by {signal}"),
                        (None, None) => "telnet exited".to_string(),
                    };
                    if let Some(notice) = notice {
                        reason = format!("{notice} ({reason})");
                    }
                    log::warn!("session {}: {reason} before connecting", entry.id);
                    self.fail(entry, SessionError::Connect(reason).to_string());
                    false
                }
                Outcome::Exited(exit) => {
                    log::info!(
                        "session {} closed (code={:?}, signal={:?})",
                        entry.id,
                        exit.code,
                        exit.signal
                    );
                    state.status = SessionStatus::Closed;
                    self.publish_exit(entry, exit);
                    true
                }
                Outcome::Failed(message) => {
                    drop(state);
                    log::warn!("session {}: {message}", entry.id);
                    self.fail(entry, message);
                    false
                }
            }
        };

        entry.mark_reaped();
        if remove {
            self.remove(&entry.id);
        }
    }
}

/// Recompute a default label after host or port changed. Returns the new
/// label when it changed.
fn refresh_default_label(state: &mut SessionState) -> Option<String> {
    if state.label_source != LabelSource::Default {
        return None;
    }
    state.label = default_label(&state.host, state.port);
    Some(state.label.clone())
}
