//! Tauri commands for terminal session management.
//!
//! The calling window's label is its surface ID. Sessions are created,
//! attached and disposed through the orchestrator; input, resize and reads go
//! straight to the registry.

use labterm_pty::TermSize;
use labterm_session::{BridgeEvent, CreateRequest, SessionError, SessionInfo};
use serde::Serialize;
use tauri::ipc::Channel;
use tauri::WebviewWindow;

use crate::ipc::start_event_pump;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub id: String,
}

fn size_from(cols: Option<u16>, rows: Option<u16>) -> Option<TermSize> {
    match (cols, rows) {
        (Some(cols), Some(rows)) if cols > 0 && rows > 0 => Some(TermSize::new(cols, rows)),
        _ => None,
    }
}

/// Bind the calling window to a channel that receives every bridge event.
#[tauri::command]
pub async fn subscribe_bridge(
    window: WebviewWindow,
    state: tauri::State<'_, AppState>,
    channel: Channel<BridgeEvent>,
) -> Result<(), String> {
    let surface = window.label().to_string();
    let subscription = state.orchestrator.open_surface(&surface);
    start_event_pump(surface, subscription, channel);
    Ok(())
}

/// Create a session owned by the calling window.
#[tauri::command]
pub async fn create_session(
    window: WebviewWindow,
    state: tauri::State<'_, AppState>,
    host: String,
    port: Option<u32>,
    label: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
) -> Result<CreatedSession, String> {
    let port = port.unwrap_or(u32::from(state.config.default_port));
    let request = CreateRequest {
        host,
        port,
        label,
        size: size_from(cols, rows),
    };
    let id = state
        .orchestrator
        .create(window.label(), request)
        .await
        .map_err(|e| e.to_string())?;
    Ok(CreatedSession { id })
}

/// Attach the calling window to a running session. `false` if it is gone.
#[tauri::command]
pub async fn attach_session(
    window: WebviewWindow,
    state: tauri::State<'_, AppState>,
    id: String,
    cols: Option<u16>,
    rows: Option<u16>,
) -> Result<bool, String> {
    match state
        .orchestrator
        .attach(window.label(), &id, size_from(cols, rows))
    {
        Ok(_) => Ok(true),
        Err(SessionError::SessionNotFound(_)) => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

#[tauri::command]
pub async fn describe_session(
    state: tauri::State<'_, AppState>,
    id: String,
) -> Result<Option<SessionInfo>, String> {
    Ok(state.orchestrator.registry().get(&id))
}

#[tauri::command]
pub async fn list_sessions(state: tauri::State<'_, AppState>) -> Result<Vec<SessionInfo>, String> {
    Ok(state.orchestrator.registry().list())
}

/// Scrollback as text. Empty for unknown sessions.
#[tauri::command]
pub async fn read_buffer(state: tauri::State<'_, AppState>, id: String) -> Result<String, String> {
    let bytes = state
        .orchestrator
        .registry()
        .snapshot(&id)
        .unwrap_or_default();
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write user input to a session. Input for unknown sessions is dropped.
#[tauri::command]
pub async fn write_input(
    state: tauri::State<'_, AppState>,
    id: String,
    data: String,
) -> Result<(), String> {
    state.orchestrator.registry().write(&id, data.as_bytes());
    Ok(())
}

#[tauri::command]
pub async fn resize_session(
    state: tauri::State<'_, AppState>,
    id: String,
    cols: u16,
    rows: u16,
) -> Result<(), String> {
    if let Some(size) = size_from(Some(cols), Some(rows)) {
        state.orchestrator.registry().resize(&id, size);
    }
    Ok(())
}

/// Terminate a session. Always succeeds, including for unknown IDs.
#[tauri::command]
pub async fn dispose_session(state: tauri::State<'_, AppState>, id: String) -> Result<bool, String> {
    Ok(state.orchestrator.dispose(&id).await)
}

#[tauri::command]
pub async fn rename_session(
    state: tauri::State<'_, AppState>,
    id: String,
    label: String,
) -> Result<(), String> {
    state
        .orchestrator
        .registry()
        .set_label(&id, &label)
        .map_err(|e| e.to_string())
}
