//! Tauri commands for moving sessions between windows.

use labterm_session::{SessionError, SessionMeta};
use tauri::WebviewWindow;

use crate::state::AppState;

/// Move a session from the calling window into a new window. `false` when
/// the window could not be opened; the session then stays where it was.
#[tauri::command]
pub async fn open_detached_window(
    window: WebviewWindow,
    state: tauri::State<'_, AppState>,
    session_id: String,
    title: Option<String>,
) -> Result<bool, String> {
    match state
        .orchestrator
        .detach(window.label(), &session_id, title.as_deref())
    {
        Ok(_) => Ok(true),
        Err(SessionError::WindowOpen(e)) => {
            log::warn!("open_detached_window: {e}");
            Ok(false)
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Pull a running session into the calling window.
#[tauri::command]
pub async fn reattach_session(
    window: WebviewWindow,
    state: tauri::State<'_, AppState>,
    session_id: String,
) -> Result<Option<SessionMeta>, String> {
    state
        .orchestrator
        .merge(window.label(), &session_id)
        .map_err(|e| e.to_string())
}
