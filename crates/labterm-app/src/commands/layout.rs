use labterm_db::{tabs, TabRecord};

use crate::state::AppState;

#[tauri::command]
pub async fn save_tab_layout(
    state: tauri::State<'_, AppState>,
    tabs: Vec<TabRecord>,
) -> Result<(), String> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        tabs::save_layout(&mut conn, &tabs).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

#[tauri::command]
pub async fn load_tab_layout(state: tauri::State<'_, AppState>) -> Result<Vec<TabRecord>, String> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        tabs::load_layout(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}
