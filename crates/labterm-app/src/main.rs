// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod commands;
mod config;
mod deeplink;
mod health;
mod ipc;
mod state;
mod windows;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use labterm_session::{Bridge, Orchestrator, SessionRegistry};
use state::AppState;
use tauri::{Emitter, Manager, WindowEvent};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Set up the global ~/.labterm directory.
    let labterm_home = home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".labterm");
    if let Err(e) = std::fs::create_dir_all(&labterm_home) {
        eprintln!("fatal: failed to create {}: {e}", labterm_home.display());
        std::process::exit(1);
    }

    // Open (or create) the SQLite database at ~/.labterm/labterm.db.
    let db_path = labterm_home.join("labterm.db");
    let db = match labterm_db::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("fatal: failed to open {}: {e}", db_path.display());
            std::process::exit(1);
        }
    };

    // Seed default settings on first launch, then read them.
    let app_config = match config::seed(&db).and_then(|_| config::load(&db)) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("failed to read settings, using defaults: {e}");
            config::AppConfig::default()
        }
    };
    let db = Arc::new(Mutex::new(db));

    let transport =
        match labterm_pty::select_transport(app_config.transport_mode, app_config.launch.clone()) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("fatal: no usable transport: {e}");
                std::process::exit(1);
            }
        };
    let registry = SessionRegistry::new(transport, Bridge::new(), app_config.registry_config());

    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, argv, _cwd| {
            // A second launch forwards its telnet:// arguments here.
            let actions = deeplink::actions_from_args(argv.iter().skip(1));
            if let Some(main) = app.get_webview_window("main") {
                let _ = main.set_focus();
            }
            if actions.is_empty() {
                return;
            }
            log::info!("received {} launch request(s) from second instance", actions.len());
            if let Some(state) = app.try_state::<AppState>() {
                state.push_actions(actions.clone());
            }
            let _ = app.emit("telnet://requests", &actions);
        }))
        .setup(move |app| {
            let host = Arc::new(windows::TauriWindowHost::new(app.handle().clone()));
            let orchestrator = Orchestrator::new(registry, host);
            let state = AppState::new(db, app_config, orchestrator);

            let initial = deeplink::actions_from_args(std::env::args().skip(1));
            if !initial.is_empty() {
                log::info!("{} launch request(s) on the command line", initial.len());
                state.push_actions(initial);
            }

            app.manage(state);
            Ok(())
        })
        .on_window_event(|window, event| {
            if let WindowEvent::Destroyed = event {
                let Some(state) = window.try_state::<AppState>() else {
                    return;
                };
                let surface = window.label().to_string();
                let orchestrator = Arc::clone(&state.orchestrator);
                tauri::async_runtime::spawn(async move {
                    orchestrator.close_surface(&surface).await;
                });
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::terminal::subscribe_bridge,
            commands::terminal::create_session,
            commands::terminal::attach_session,
            commands::terminal::describe_session,
            commands::terminal::list_sessions,
            commands::terminal::read_buffer,
            commands::terminal::write_input,
            commands::terminal::resize_session,
            commands::terminal::dispose_session,
            commands::terminal::rename_session,
            commands::windows::open_detached_window,
            commands::windows::reattach_session,
            commands::layout::save_tab_layout,
            commands::layout::load_tab_layout,
            commands::health::probe_health,
            commands::settings::get_settings,
            commands::settings::update_setting,
            commands::deeplink::consume_pending_telnet_actions,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
