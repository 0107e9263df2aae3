use std::collections::BTreeMap;

use labterm_db::settings;

use crate::config;
use crate::state::AppState;

#[tauri::command]
pub async fn get_settings(
    state: tauri::State<'_, AppState>,
) -> Result<BTreeMap<String, String>, String> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        config::list(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// Store a setting. Takes effect on next launch.
#[tauri::command]
pub async fn update_setting(
    state: tauri::State<'_, AppState>,
    key: String,
    value: String,
) -> Result<(), String> {
    config::validate(&key, &value)?;
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        settings::set(&conn, &key, value.trim()).map_err(|e| e.to_string())?;
        log::info!("setting {key} updated");
        Ok(())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}
