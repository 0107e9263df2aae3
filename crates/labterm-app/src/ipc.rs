//! Event pump from a surface's bridge subscription to its webview.
//!
//! Each window gets one pump running as a tokio task. Events are forwarded in
//! order as tagged JSON over a Tauri channel; the pump ends when the surface
//! unsubscribes or the webview drops the channel.

use labterm_session::{BridgeEvent, Subscription};
use tauri::ipc::Channel;

pub fn start_event_pump(surface: String, mut subscription: Subscription, channel: Channel<BridgeEvent>) {
    tauri::async_runtime::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let Err(e) = channel.send(event) {
                log::debug!("surface {surface}: channel closed ({e}), stopping pump");
                break;
            }
        }
        log::debug!("surface {surface}: event pump stopped");
    });
}
