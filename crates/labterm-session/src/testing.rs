//! Scripted in-memory transport for deterministic registry tests.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use labterm_pty::{
    Connection, DriverControl, ExitInfo, Target, TermSize, Transport, TransportError,
    TransportKind,
};
use tokio::time::timeout;

use crate::bridge::{BridgeEvent, Subscription};

#[derive(Default)]
struct DriverShared {
    target: Mutex<Option<Target>>,
    written: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<TermSize>>,
    exit: Mutex<Option<ExitInfo>>,
    terminations: AtomicUsize,
    kills: AtomicUsize,
    stubborn: bool,
}

/// Test-side handle to one opened driver.
#[derive(Clone)]
pub(crate) struct ScriptedDriver {
    shared: Arc<DriverShared>,
    tx: mpsc::Sender<Option<Vec<u8>>>,
}

impl ScriptedDriver {
    /// Emit output as if the remote device sent it.
    pub fn emit(&self, data: &[u8]) {
        let _ = self.tx.send(Some(data.to_vec()));
    }

    /// End the process with `code`.
    pub fn exit(&self, code: u32) {
        *self.shared.exit.lock().unwrap() = Some(ExitInfo {
            code: Some(code),
            signal: None,
        });
        let _ = self.tx.send(None);
    }

    pub fn target(&self) -> Option<Target> {
        self.shared.target.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.shared.written.lock().unwrap().clone()
    }

    pub fn resizes(&self) -> Vec<TermSize> {
        self.shared.resizes.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> usize {
        self.shared.terminations.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.shared.kills.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    drivers: Mutex<Vec<ScriptedDriver>>,
    fail_next: Mutex<Option<String>>,
    open_delay: Mutex<Option<Duration>>,
    stubborn: AtomicBool,
    opens: AtomicUsize,
    connection_kind: Mutex<Option<TransportKind>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `open` fail with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    /// Block each `open` for `delay` (a slow OS handshake).
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = Some(delay);
    }

    /// Drivers opened from now on ignore `terminate`.
    pub fn set_stubborn(&self, stubborn: bool) {
        self.stubborn.store(stubborn, Ordering::SeqCst);
    }

    /// Report `kind` on opened connections (a per-connection fallback).
    pub fn set_connection_kind(&self, kind: TransportKind) {
        *self.connection_kind.lock().unwrap() = Some(kind);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.lock().unwrap().len()
    }

    pub fn driver(&self, index: usize) -> ScriptedDriver {
        self.drivers.lock().unwrap()[index].clone()
    }

    pub fn last_driver(&self) -> ScriptedDriver {
        self.drivers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no driver opened")
    }
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pty
    }

    fn open(&self, target: &Target, _size: TermSize) -> Result<Connection, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.open_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(TransportError::Spawn(message));
        }

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(DriverShared {
            stubborn: self.stubborn.load(Ordering::SeqCst),
            ..DriverShared::default()
        });
        *shared.target.lock().unwrap() = Some(target.clone());
        self.drivers.lock().unwrap().push(ScriptedDriver {
            shared: Arc::clone(&shared),
            tx: tx.clone(),
        });

        Ok(Connection {
            kind: self.connection_kind.lock().unwrap().unwrap_or(TransportKind::Pty),
            reader: Box::new(ChannelReader {
                rx,
                pending: Vec::new(),
                pos: 0,
            }),
            control: Box::new(ScriptedControl { shared, tx }),
        })
    }
}

struct ChannelReader {
    rx: mpsc::Receiver<Option<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(Some(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Ok(None) | Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct ScriptedControl {
    shared: Arc<DriverShared>,
    tx: mpsc::Sender<Option<Vec<u8>>>,
}

impl DriverControl for ScriptedControl {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.shared.exit.lock().unwrap().is_some() {
            return Err(TransportError::Io(io::ErrorKind::BrokenPipe.into()));
        }
        self.shared.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, size: TermSize) -> Result<(), TransportError> {
        self.shared.resizes.lock().unwrap().push(size);
        Ok(())
    }

    fn try_wait(&mut self) -> Option<ExitInfo> {
        self.shared.exit.lock().unwrap().clone()
    }

    fn terminate(&mut self) -> Result<(), TransportError> {
        self.shared.terminations.fetch_add(1, Ordering::SeqCst);
        if !self.shared.stubborn {
            *self.shared.exit.lock().unwrap() = Some(ExitInfo {
                code: None,
                signal: Some("SIGHUP".to_string()),
            });
            let _ = self.tx.send(None);
        }
        Ok(())
    }

    fn force_kill(&mut self) -> Result<(), TransportError> {
        self.shared.kills.fetch_add(1, Ordering::SeqCst);
        *self.shared.exit.lock().unwrap() = Some(ExitInfo {
            code: None,
            signal: Some("SIGKILL".to_string()),
        });
        let _ = self.tx.send(None);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Next event within two seconds.
pub(crate) async fn next_event(sub: &mut Subscription) -> BridgeEvent {
    timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for a bridge event")
        .expect("subscription closed")
}

/// Skip events until one matches `pred`.
pub(crate) async fn wait_for<F>(sub: &mut Subscription, mut pred: F) -> BridgeEvent
where
    F: FnMut(&BridgeEvent) -> bool,
{
    loop {
        let event = next_event(sub).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Collect every event that arrives within `window`.
pub(crate) async fn drain(sub: &mut Subscription, window: Duration) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = timeout(window, sub.recv()).await {
        events.push(event);
    }
    events
}

/// Poll `cond` for up to two seconds.
pub(crate) async fn eventually<F: FnMut() -> bool>(mut cond: F) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
