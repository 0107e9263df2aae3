use crate::deeplink::TelnetAction;
use crate::state::AppState;

/// Return and clear launch requests received so far.
#[tauri::command]
pub async fn consume_pending_telnet_actions(
    state: tauri::State<'_, AppState>,
) -> Result<Vec<TelnetAction>, String> {
    Ok(state.take_actions())
}
