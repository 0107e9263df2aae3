//! Moves sessions between UI surfaces without touching their drivers.
//!
//! A surface (the main window or a detached window) binds to sessions by ID.
//! Ownership decides who may detach a session and whether closing the surface
//! disposes it: an owned session with `dispose_on_unmount` set is disposed
//! when its surface closes, anything else survives.
//!
//! Detaching is a handoff. The origin surface keeps ownership until the new
//! window attaches; a new window that closes first hands the session back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::bridge::{SubscriberId, Subscription};
use crate::error::{SessionError, SessionResult};
use crate::registry::{lock, SessionRegistry};
use crate::session::{CreateRequest, SessionId, SessionMeta, SurfaceId};
use labterm_pty::TermSize;

/// Per-surface view of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingState {
    Unbound,
    Creating,
    Attached,
    Detaching,
    DetachedElsewhere,
}

/// What a window host needs to open a detached window for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachRequest {
    pub session_id: SessionId,
    pub host: String,
    pub port: u16,
    pub label: String,
    pub title: String,
}

/// Opens top-level windows. Implemented by the desktop shell.
pub trait WindowHost: Send + Sync {
    /// Open a window that will attach to `request.session_id`, returning the
    /// new surface's ID.
    fn open_detached(&self, request: &DetachRequest) -> Result<SurfaceId, String>;
}

struct SurfaceRecord {
    subscriber: SubscriberId,
    bindings: HashMap<SessionId, BindingState>,
    /// Cancelled when the surface closes; aborts its pending creates.
    cancel: CancellationToken,
}

/// A detach whose new window has not attached yet.
#[derive(Debug, Clone)]
struct PendingDetach {
    session: SessionId,
    origin: SurfaceId,
    /// Origin's `dispose_on_unmount`, restored if the handoff falls through.
    restore_flag: bool,
}

pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    windows: Arc<dyn WindowHost>,
    surfaces: Mutex<HashMap<SurfaceId, SurfaceRecord>>,
    /// Keyed by the new window's surface ID.
    pending: Mutex<HashMap<SurfaceId, PendingDetach>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<SessionRegistry>, windows: Arc<dyn WindowHost>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            windows,
            surfaces: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a surface and hand back its event stream. Registering the
    /// same surface again (a reload) replaces the old stream and bindings.
    pub fn open_surface(&self, surface: &str) -> Subscription {
        let subscription = self.registry.bridge().subscribe();
        let record = SurfaceRecord {
            subscriber: subscription.id(),
            bindings: HashMap::new(),
            cancel: CancellationToken::new(),
        };
        if let Some(old) = lock(&self.surfaces).insert(surface.to_string(), record) {
            log::debug!("surface {surface} re-registered");
            old.cancel.cancel();
            self.registry.bridge().unsubscribe(old.subscriber);
        }
        log::info!("surface {surface} opened");
        subscription
    }

    fn subscriber_of(&self, surface: &str) -> SessionResult<(SubscriberId, CancellationToken)> {
        lock(&self.surfaces)
            .get(surface)
            .map(|r| (r.subscriber, r.cancel.clone()))
            .ok_or_else(|| SessionError::SurfaceNotFound(surface.to_string()))
    }

    fn set_binding(&self, surface: &str, id: &str, state: BindingState) {
        if let Some(record) = lock(&self.surfaces).get_mut(surface) {
            if state == BindingState::Unbound {
                record.bindings.remove(id);
            } else {
                record.bindings.insert(id.to_string(), state);
            }
        }
    }

    pub fn binding(&self, surface: &str, id: &str) -> BindingState {
        lock(&self.surfaces)
            .get(surface)
            .and_then(|r| r.bindings.get(id).copied())
            .unwrap_or(BindingState::Unbound)
    }

    /// Every session `surface` has a binding for.
    pub fn bindings(&self, surface: &str) -> Vec<(SessionId, BindingState)> {
        let mut out: Vec<_> = lock(&self.surfaces)
            .get(surface)
            .map(|r| r.bindings.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Create a session owned by `surface`. If the surface closes while the
    /// driver is still spawning, the session is disposed and `Cancelled` is
    /// returned.
    pub async fn create(&self, surface: &str, request: CreateRequest) -> SessionResult<SessionId> {
        let (_, cancel) = self.subscriber_of(surface)?;
        let id = self.registry.allocate(&request, Some(surface.to_string()))?;
        self.set_binding(surface, &id, BindingState::Creating);

        let registry = Arc::clone(&self.registry);
        let spawn_id = id.clone();
        let spawn = tokio::task::spawn_blocking(move || registry.start(&spawn_id));

        tokio::select! {
            joined = spawn => {
                if let Err(e) = joined {
                    log::error!("session {id}: spawn task failed: {e}");
                }
            }
            _ = cancel.cancelled() => {
                log::info!("session {id}: surface {surface} closed during create");
                let registry = Arc::clone(&self.registry);
                let dispose_id = id.clone();
                tokio::spawn(async move {
                    registry.dispose(&dispose_id).await;
                });
                return Err(SessionError::Cancelled);
            }
        }

        self.set_binding(surface, &id, BindingState::Attached);
        Ok(id)
    }

    /// Bind `surface` to an existing session and replay its scrollback.
    /// Fails without side effects when the session does not exist.
    pub fn attach(&self, surface: &str, id: &str, size: Option<TermSize>) -> SessionResult<usize> {
        if !self.registry.contains(id) {
            return Err(SessionError::SessionNotFound(id.to_string()));
        }
        let (subscriber, _) = self.subscriber_of(surface)?;
        if let Some(size) = size {
            self.registry.resize(id, size);
        }
        let replayed = self.registry.hydrate(id, subscriber)?;
        self.set_binding(surface, id, BindingState::Attached);
        log::debug!("surface {surface} attached to {id} ({replayed} bytes replayed)");
        self.complete_detach(surface, id)?;
        Ok(replayed)
    }

    /// Hand ownership to `surface` if it is the new window of a pending detach
    /// of `id`.
    fn complete_detach(&self, surface: &str, id: &str) -> SessionResult<()> {
        let handoff = {
            let mut pending = lock(&self.pending);
            if pending.get(surface).is_some_and(|p| p.session == id) {
                pending.remove(surface)
            } else {
                None
            }
        };
        let Some(handoff) = handoff else {
            return Ok(());
        };
        self.registry.set_owner(id, Some(surface.to_string()))?;
        self.set_binding(&handoff.origin, id, BindingState::DetachedElsewhere);
        log::info!("session {id} handed from {} to {surface}", handoff.origin);
        Ok(())
    }

    fn pending_for_session(&self, id: &str) -> bool {
        lock(&self.pending).values().any(|p| p.session == id)
    }

    fn forget_pending(&self, id: &str) {
        lock(&self.pending).retain(|_, p| p.session != id);
    }

    /// Open a new window for a session. Only the owning surface may detach;
    /// the driver keeps running throughout. `surface` stays the owner, with
    /// the binding `Detaching`, until the new window attaches. On failure the
    /// session stays with `surface`.
    pub fn detach(
        &self,
        surface: &str,
        id: &str,
        title: Option<&str>,
    ) -> SessionResult<SurfaceId> {
        let info = self
            .registry
            .get(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        if info.owner.as_deref() != Some(surface) {
            return Err(SessionError::NotOwner {
                id: id.to_string(),
                surface: surface.to_string(),
            });
        }
        if self.pending_for_session(id) {
            return Err(SessionError::InvalidArgument(format!(
                "session {id} is already being detached"
            )));
        }

        let previous_flag = self.registry.set_dispose_on_unmount(id, false)?;
        self.set_binding(surface, id, BindingState::Detaching);

        let request = DetachRequest {
            session_id: id.to_string(),
            host: info.host.clone(),
            port: info.port,
            label: info.label.clone(),
            title: title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} - Telnet", info.label)),
        };
        match self.windows.open_detached(&request) {
            Ok(new_surface) => {
                lock(&self.pending).insert(
                    new_surface.clone(),
                    PendingDetach {
                        session: id.to_string(),
                        origin: surface.to_string(),
                        restore_flag: previous_flag,
                    },
                );
                log::info!("session {id} detaching from {surface} to {new_surface}");
                Ok(new_surface)
            }
            Err(e) => {
                log::warn!("session {id}: detach window failed: {e}");
                // The session may have been disposed in the meantime.
                let _ = self.registry.set_dispose_on_unmount(id, previous_flag);
                self.set_binding(surface, id, BindingState::Attached);
                Err(SessionError::WindowOpen(e))
            }
        }
    }

    /// Pull a session into `surface` and make it the owner. Returns `None`
    /// for an unknown ID. A surface already attached just gets the metadata
    /// back so it can focus the tab.
    pub fn merge(&self, surface: &str, id: &str) -> SessionResult<Option<SessionMeta>> {
        let Some(info) = self.registry.get(id) else {
            return Ok(None);
        };
        let meta = SessionMeta::from(&info);
        if self.binding(surface, id) == BindingState::Attached {
            return Ok(Some(meta));
        }

        self.attach(surface, id, None)?;
        self.forget_pending(id);
        let previous = self.registry.set_owner(id, Some(surface.to_string()))?;
        self.registry.set_dispose_on_unmount(id, true)?;
        if let Some(previous) = previous.filter(|p| p != surface) {
            self.set_binding(&previous, id, BindingState::DetachedElsewhere);
        }
        log::info!("session {id} merged into {surface}");
        Ok(Some(meta))
    }

    /// Dispose a session and drop every surface's binding to it.
    pub async fn dispose(&self, id: &str) -> bool {
        let disposed = self.registry.dispose(id).await;
        self.forget_pending(id);
        for record in lock(&self.surfaces).values_mut() {
            record.bindings.remove(id);
        }
        disposed
    }

    /// Tear down a surface: abort its pending creates, stop its event stream,
    /// settle unfinished detaches, dispose the sessions it owns with
    /// `dispose_on_unmount` set, and orphan the rest.
    pub async fn close_surface(&self, surface: &str) {
        // A window can close before it ever subscribed; its sessions still
        // need settling.
        match lock(&self.surfaces).remove(surface) {
            Some(record) => {
                record.cancel.cancel();
                self.registry.bridge().unsubscribe(record.subscriber);
            }
            None => log::debug!("close_surface: {surface} was not registered"),
        }

        // New window gone before attaching: the handoff falls through.
        let abandoned = lock(&self.pending).remove(surface);
        if let Some(handoff) = abandoned {
            self.abandon_detach(surface, handoff).await;
        }

        // Origin gone mid-handoff: the new window takes over now.
        let handed: Vec<(SurfaceId, SessionId)> = lock(&self.pending)
            .iter()
            .filter(|(_, p)| p.origin == surface)
            .map(|(target, p)| (target.clone(), p.session.clone()))
            .collect();
        for (target, id) in &handed {
            log::debug!("surface {surface} closed mid-detach, {id} goes to {target}");
            let _ = self.registry.set_owner(id, Some(target.clone()));
        }

        for (id, dispose) in self.registry.owned_by(surface) {
            if dispose {
                log::info!("surface {surface} closed, disposing {id}");
                self.dispose(&id).await;
            } else {
                log::debug!("surface {surface} closed, {id} lives on");
                let _ = self.registry.set_owner(&id, None);
            }
        }
        log::info!("surface {surface} closed");
    }

    /// Undo a detach whose new window closed without attaching.
    async fn abandon_detach(&self, target: &str, handoff: PendingDetach) {
        let id = handoff.session.as_str();
        log::warn!("session {id}: detached window {target} closed before attaching");
        if self.registry.set_dispose_on_unmount(id, handoff.restore_flag).is_err() {
            return;
        }
        if lock(&self.surfaces).contains_key(&handoff.origin) {
            let _ = self.registry.set_owner(id, Some(handoff.origin.clone()));
            self.set_binding(&handoff.origin, id, BindingState::Attached);
            return;
        }
        // The origin closed too; settle the session the way its close would
        // have.
        if handoff.restore_flag {
            log::info!("session {id}: no window left to take it, disposing");
            self.dispose(id).await;
        } else {
            let _ = self.registry.set_owner(id, None);
        }
    }

    pub fn surface_count(&self) -> usize {
        lock(&self.surfaces).len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bridge::{Bridge, BridgeEvent};
    use crate::registry::RegistryConfig;
    use crate::testing::{drain, eventually, next_event, wait_for, ScriptedTransport};

    #[derive(Default)]
    struct FakeWindows {
        opened: Mutex<Vec<DetachRequest>>,
        fail: Mutex<bool>,
    }

    impl WindowHost for FakeWindows {
        fn open_detached(&self, request: &DetachRequest) -> Result<SurfaceId, String> {
            if *self.fail.lock().unwrap() {
                return Err("window creation refused".into());
            }
            let mut opened = self.opened.lock().unwrap();
            opened.push(request.clone());
            Ok(format!("detached-{}", opened.len()))
        }
    }

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        windows: Arc<FakeWindows>,
        orchestrator: Arc<Orchestrator>,
    }

    fn fixture() -> Fixture {
        let transport = ScriptedTransport::new();
        let windows = Arc::new(FakeWindows::default());
        let registry = SessionRegistry::new(
            transport.clone(),
            Bridge::new(),
            RegistryConfig {
                dispose_timeout: Duration::from_millis(200),
                ..RegistryConfig::default()
            },
        );
        let orchestrator = Orchestrator::new(registry, windows.clone());
        Fixture {
            transport,
            windows,
            orchestrator,
        }
    }

    fn hydrated(event: &BridgeEvent) -> Option<Vec<u8>> {
        match event {
            BridgeEvent::Hydrate { data, .. } => Some(data.clone()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn create_binds_and_owns() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");

        let id = f
            .orchestrator
            .create("main", CreateRequest::new("192.168.1.10", 23))
            .await
            .unwrap();
        assert_eq!(f.orchestrator.binding("main", &id), BindingState::Attached);
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some("main"));
        assert!(info.dispose_on_unmount);
    }

    #[tokio::test]
    async fn create_from_unknown_surface_fails() {
        let f = fixture();
        let err = f
            .orchestrator
            .create("ghost", CreateRequest::new("r1", 23))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SurfaceNotFound("ghost".into()));
        assert!(f.orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn attach_to_unknown_session_changes_nothing() {
        let f = fixture();
        let mut main = f.orchestrator.open_surface("main");

        let err = f.orchestrator.attach("main", "nope", None).unwrap_err();
        assert_eq!(err, SessionError::SessionNotFound("nope".into()));
        assert!(f.orchestrator.bindings("main").is_empty());
        assert!(f.orchestrator.registry().is_empty());
        assert!(drain(&mut main, Duration::from_millis(30)).await.is_empty());
    }

    #[tokio::test]
    async fn attach_replays_scrollback_then_streams() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();
        let driver = f.transport.last_driver();
        driver.emit(b"banner\r\nR1>");
        assert!(
            eventually(|| f.orchestrator.registry().snapshot(&id).unwrap().ends_with(b"R1>"))
                .await
        );

        let mut second = f.orchestrator.open_surface("second");
        let replayed = f
            .orchestrator
            .attach("second", &id, Some(TermSize::new(100, 30)))
            .unwrap();
        assert_eq!(replayed, b"banner\r\nR1>".len());

        let event = wait_for(&mut second, |e| hydrated(e).is_some()).await;
        assert_eq!(hydrated(&event).unwrap(), b"banner\r\nR1>");

        driver.emit(b"more");
        match wait_for(&mut second, |e| matches!(e, BridgeEvent::Data { .. })).await {
            BridgeEvent::Data { data, offset, .. } => {
                assert_eq!(data, b"more");
                assert_eq!(offset, replayed as u64);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(driver.resizes(), vec![TermSize::new(100, 30)]);
    }

    #[tokio::test]
    async fn detach_then_reattach_keeps_driver_and_history() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();
        let driver = f.transport.last_driver();
        driver.emit(b"R1#show clock\r\n*10:00:00.000 UTC\r\nR1#");
        assert!(eventually(|| f.orchestrator.registry().get(&id).unwrap().buffered_bytes > 0).await);

        let new_surface = f.orchestrator.detach("main", &id, None).unwrap();
        assert_eq!(new_surface, "detached-1");
        let request = f.windows.opened.lock().unwrap()[0].clone();
        assert_eq!(request.session_id, id);
        assert_eq!(request.label, "R1");

        // Main keeps the session until the new window attaches.
        assert_eq!(f.orchestrator.binding("main", &id), BindingState::Detaching);
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some("main"));
        assert!(!info.dispose_on_unmount);

        let mut detached = f.orchestrator.open_surface("detached-1");
        f.orchestrator.attach("detached-1", &id, None).unwrap();
        let event = wait_for(&mut detached, |e| hydrated(e).is_some()).await;
        assert!(hydrated(&event).unwrap().ends_with(b"UTC\r\nR1#"));
        assert_eq!(
            f.orchestrator.binding("main", &id),
            BindingState::DetachedElsewhere
        );
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some("detached-1"));

        // Closing the original window leaves the session alone.
        f.orchestrator.close_surface("main").await;
        assert!(f.orchestrator.registry().contains(&id));
        assert_eq!(driver.terminations(), 0);

        // A detached window closing does not dispose (flag is false).
        f.orchestrator.close_surface("detached-1").await;
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner, None);
        assert_eq!(driver.terminations(), 0);
    }

    #[tokio::test]
    async fn failed_detach_reverts() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();
        *f.windows.fail.lock().unwrap() = true;

        let err = f.orchestrator.detach("main", &id, None).unwrap_err();
        assert!(matches!(err, SessionError::WindowOpen(_)));
        assert_eq!(f.orchestrator.binding("main", &id), BindingState::Attached);
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert!(info.dispose_on_unmount);
        assert_eq!(info.owner.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn detached_window_closing_before_attach_hands_session_back() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();

        let new_surface = f.orchestrator.detach("main", &id, None).unwrap();
        f.orchestrator.close_surface(&new_surface).await;

        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some("main"));
        assert!(info.dispose_on_unmount);
        assert_eq!(f.orchestrator.binding("main", &id), BindingState::Attached);
        assert_eq!(f.transport.last_driver().terminations(), 0);

        // The handoff is over, so main may detach again, and closing main
        // disposes as before.
        f.orchestrator.detach("main", &id, None).unwrap();
        f.orchestrator.close_surface("detached-2").await;
        f.orchestrator.close_surface("main").await;
        assert!(!f.orchestrator.registry().contains(&id));
    }

    #[tokio::test]
    async fn origin_closing_mid_detach_hands_session_to_new_window() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();

        let new_surface = f.orchestrator.detach("main", &id, None).unwrap();
        f.orchestrator.close_surface("main").await;
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some(new_surface.as_str()));

        let _win = f.orchestrator.open_surface(&new_surface);
        f.orchestrator.attach(&new_surface, &id, None).unwrap();
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some(new_surface.as_str()));
        assert!(!info.dispose_on_unmount);
        assert_eq!(f.transport.last_driver().terminations(), 0);
    }

    #[tokio::test]
    async fn both_windows_closing_mid_detach_settles_like_the_origin() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();

        let new_surface = f.orchestrator.detach("main", &id, None).unwrap();
        f.orchestrator.close_surface("main").await;
        f.orchestrator.close_surface(&new_surface).await;

        // Main owned it with dispose-on-unmount set.
        assert!(!f.orchestrator.registry().contains(&id));
        assert_eq!(f.transport.last_driver().terminations(), 1);
    }

    #[tokio::test]
    async fn second_detach_while_pending_is_rejected() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();

        f.orchestrator.detach("main", &id, None).unwrap();
        let err = f.orchestrator.detach("main", &id, None).unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert_eq!(f.windows.opened.lock().unwrap().len(), 1);
        assert_eq!(f.orchestrator.binding("main", &id), BindingState::Detaching);
    }

    #[tokio::test]
    async fn only_owner_may_detach() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let _other = f.orchestrator.open_surface("other");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();
        f.orchestrator.attach("other", &id, None).unwrap();

        let err = f.orchestrator.detach("other", &id, None).unwrap_err();
        assert!(matches!(err, SessionError::NotOwner { .. }));
        assert!(f.windows.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_claims_ownership() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("10.0.0.1", 32769))
            .await
            .unwrap();
        let detached = f.orchestrator.detach("main", &id, None).unwrap();
        let mut win = f.orchestrator.open_surface(&detached);
        f.orchestrator.attach(&detached, &id, None).unwrap();

        // Already attached: just metadata, no second hydrate.
        wait_for(&mut win, |e| hydrated(e).is_some()).await;
        let meta = f.orchestrator.merge(&detached, &id).unwrap().unwrap();
        assert_eq!(meta.label, "10.0.0.1:32769");
        assert!(drain(&mut win, Duration::from_millis(30))
            .await
            .iter()
            .all(|e| hydrated(e).is_none()));

        // Back into main.
        let meta = f.orchestrator.merge("main", &id).unwrap().unwrap();
        assert_eq!((meta.host.as_str(), meta.port), ("10.0.0.1", 32769));
        let info = f.orchestrator.registry().get(&id).unwrap();
        assert_eq!(info.owner.as_deref(), Some("main"));
        assert!(info.dispose_on_unmount);
        assert_eq!(f.orchestrator.binding("main", &id), BindingState::Attached);
        assert_eq!(
            f.orchestrator.binding(&detached, &id),
            BindingState::DetachedElsewhere
        );

        assert_eq!(f.orchestrator.merge("main", "unknown").unwrap(), None);
    }

    #[tokio::test]
    async fn closing_owner_disposes_and_notifies_others() {
        let f = fixture();
        let _main = f.orchestrator.open_surface("main");
        let mut other = f.orchestrator.open_surface("other");
        let id = f
            .orchestrator
            .create("main", CreateRequest::new("r1", 23))
            .await
            .unwrap();
        f.orchestrator.attach("other", &id, None).unwrap();

        f.orchestrator.close_surface("main").await;
        assert!(!f.orchestrator.registry().contains(&id));
        assert_eq!(f.transport.last_driver().terminations(), 1);
        assert_eq!(f.orchestrator.binding("other", &id), BindingState::Unbound);

        let exit = wait_for(&mut other, |e| matches!(e, BridgeEvent::Exit { .. })).await;
        assert_eq!(exit.session_id(), id);
        assert_eq!(f.orchestrator.surface_count(), 1);
    }

    #[tokio::test]
    async fn closing_surface_cancels_pending_create() {
        let f = fixture();
        f.transport.set_open_delay(Duration::from_millis(300));
        let _main = f.orchestrator.open_surface("main");

        let orchestrator = Arc::clone(&f.orchestrator);
        let pending = tokio::spawn(async move {
            orchestrator
                .create("main", CreateRequest::new("r1", 23))
                .await
        });
        // Wait until the spawn is underway, then close the window.
        assert!(eventually(|| f.transport.opens() == 1).await);
        f.orchestrator.close_surface("main").await;
        assert_eq!(pending.await.unwrap(), Err(SessionError::Cancelled));

        assert!(eventually(|| f.orchestrator.registry().is_empty()).await);
        let transport = Arc::clone(&f.transport);
        assert!(
            eventually(move || {
                transport.driver_count() == 1 && transport.driver(0).terminations() == 1
            })
            .await
        );
    }

    #[tokio::test]
    async fn two_surfaces_see_the_same_stream() {
        let f = fixture();
        let mut a = f.orchestrator.open_surface("a");
        let mut b = f.orchestrator.open_surface("b");
        let id = f
            .orchestrator
            .create("a", CreateRequest::new("r1", 23))
            .await
            .unwrap();
        let driver = f.transport.last_driver();
        for i in 0..50u8 {
            driver.emit(&[b'0' + (i % 10)]);
        }
        driver.exit(0);

        let mut seen_a = Vec::new();
        loop {
            let event = next_event(&mut a).await;
            let done = matches!(event, BridgeEvent::Exit { .. });
            seen_a.push(event);
            if done {
                break;
            }
        }
        let seen_b = drain(&mut b, Duration::from_millis(100)).await;
        assert_eq!(seen_a, seen_b);
        assert!(seen_a.iter().all(|e| e.session_id() == id));
        let data = seen_a
            .iter()
            .filter(|e| matches!(e, BridgeEvent::Data { .. }))
            .count();
        assert!(data > 0);
    }
}
