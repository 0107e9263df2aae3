use crate::health::{probe, HealthReport};
use crate::state::AppState;

/// TCP reachability of `ip:port`, bounded by the configured timeout.
#[tauri::command]
pub async fn probe_health(
    state: tauri::State<'_, AppState>,
    ip: String,
    port: Option<u16>,
) -> Result<HealthReport, String> {
    let port = port.unwrap_or(state.config.default_port);
    Ok(probe(&ip, port, state.config.health_timeout).await)
}
