//! Application state shared between Tauri commands and window callbacks.

use std::sync::{Arc, Mutex};

use labterm_session::Orchestrator;
use rusqlite::Connection;

use crate::config::AppConfig;
use crate::deeplink::TelnetAction;

/// Global app state managed by Tauri.
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    /// Launch requests not yet picked up by the main window.
    pub pending_actions: Mutex<Vec<TelnetAction>>,
}

impl AppState {
    pub fn new(db: Arc<Mutex<Connection>>, config: AppConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            db,
            config,
            orchestrator,
            pending_actions: Mutex::new(Vec::new()),
        }
    }

    pub fn push_actions(&self, actions: Vec<TelnetAction>) {
        if let Ok(mut pending) = self.pending_actions.lock() {
            pending.extend(actions);
        }
    }

    pub fn take_actions(&self) -> Vec<TelnetAction> {
        self.pending_actions
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }
}
