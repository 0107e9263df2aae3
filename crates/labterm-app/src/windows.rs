//! Detached terminal windows.

use labterm_session::{DetachRequest, SurfaceId, WindowHost};
use tauri::{AppHandle, Url, WebviewUrl, WebviewWindowBuilder};
use uuid::Uuid;

/// Opens detached windows as new webviews of the running app.
pub struct TauriWindowHost {
    app: AppHandle,
}

impl TauriWindowHost {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl WindowHost for TauriWindowHost {
    fn open_detached(&self, request: &DetachRequest) -> Result<SurfaceId, String> {
        let label = format!("detached-{}", Uuid::new_v4().simple());
        let path = detached_path(request)?;
        WebviewWindowBuilder::new(&self.app, &label, WebviewUrl::App(path.into()))
            .title(&request.title)
            .inner_size(960.0, 600.0)
            .build()
            .map_err(|e| e.to_string())?;
        log::info!("opened window {label} for session {}", request.session_id);
        Ok(label)
    }
}

/// `index.html?session=..&host=..&port=..&label=..`, percent-encoded.
pub fn detached_path(request: &DetachRequest) -> Result<String, String> {
    let port = request.port.to_string();
    let url = Url::parse_with_params(
        "tauri://localhost/index.html",
        [
            ("session", request.session_id.as_str()),
            ("host", request.host.as_str()),
            ("port", port.as_str()),
            ("label", request.label.as_str()),
        ],
    )
    .map_err(|e| e.to_string())?;
    Ok(format!("index.html?{}", url.query().unwrap_or_default()))
}
