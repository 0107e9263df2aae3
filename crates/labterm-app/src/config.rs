//! Application settings, stored in the `settings` table.
//!
//! Defaults are seeded on first launch. Values are read once at startup; an
//! unparsable value falls back to its default with a warning.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use labterm_db::settings;
use labterm_pty::{LaunchCommand, TermSize, TransportMode};
use labterm_session::{validate_port, RegistryConfig};
use rusqlite::Connection;

pub const RING_BUFFER_BYTES: &str = "ring_buffer_bytes";
pub const DEFAULT_PORT: &str = "default_port";
pub const DISPOSE_TIMEOUT_MS: &str = "dispose_timeout_ms";
pub const HEALTH_TIMEOUT_MS: &str = "health_timeout_ms";
pub const TRANSPORT_MODE: &str = "transport_mode";
pub const TELNET_PROGRAM: &str = "telnet_program";
pub const TELNET_ARGS: &str = "telnet_args";

const KEYS: [&str; 7] = [
    RING_BUFFER_BYTES,
    DEFAULT_PORT,
    DISPOSE_TIMEOUT_MS,
    HEALTH_TIMEOUT_MS,
    TRANSPORT_MODE,
    TELNET_PROGRAM,
    TELNET_ARGS,
];

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub ring_buffer_bytes: usize,
    pub default_port: u16,
    pub dispose_timeout: Duration,
    pub health_timeout: Duration,
    pub transport_mode: TransportMode,
    pub launch: LaunchCommand,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ring_buffer_bytes: 256 * 1024,
            default_port: 23,
            dispose_timeout: Duration::from_secs(3),
            health_timeout: Duration::from_secs(4),
            transport_mode: TransportMode::Auto,
            launch: LaunchCommand::telnet(),
        }
    }
}

impl AppConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            ring_buffer_bytes: self.ring_buffer_bytes,
            dispose_timeout: self.dispose_timeout,
            default_size: TermSize::default(),
        }
    }

    fn default_value(&self, key: &str) -> Option<String> {
        let value = match key {
            RING_BUFFER_BYTES => self.ring_buffer_bytes.to_string(),
            DEFAULT_PORT => self.default_port.to_string(),
            DISPOSE_TIMEOUT_MS => self.dispose_timeout.as_millis().to_string(),
            HEALTH_TIMEOUT_MS => self.health_timeout.as_millis().to_string(),
            TRANSPORT_MODE => "auto".to_string(),
            TELNET_PROGRAM => self.launch.program.clone(),
            TELNET_ARGS => self.launch.args.join(" "),
            _ => return None,
        };
        Some(value)
    }
}

/// Write defaults for every key that has no value yet.
pub fn seed(conn: &Connection) -> rusqlite::Result<()> {
    let defaults = AppConfig::default();
    for key in KEYS {
        if let Some(value) = defaults.default_value(key) {
            if settings::set_if_absent(conn, key, &value)? {
                log::debug!("seeded setting {key}={value}");
            }
        }
    }
    Ok(())
}

pub fn load(conn: &Connection) -> rusqlite::Result<AppConfig> {
    let mut config = AppConfig::default();

    if let Some(v) = parsed::<usize>(conn, RING_BUFFER_BYTES)? {
        config.ring_buffer_bytes = v;
    }
    if let Some(v) = parsed::<u32>(conn, DEFAULT_PORT)? {
        match validate_port(v) {
            Ok(port) => config.default_port = port,
            Err(e) => log::warn!("ignoring {DEFAULT_PORT}: {e}"),
        }
    }
    if let Some(v) = parsed::<u64>(conn, DISPOSE_TIMEOUT_MS)? {
        config.dispose_timeout = Duration::from_millis(v);
    }
    if let Some(v) = parsed::<u64>(conn, HEALTH_TIMEOUT_MS)? {
        config.health_timeout = Duration::from_millis(v);
    }
    if let Some(v) = parsed::<TransportMode>(conn, TRANSPORT_MODE)? {
        config.transport_mode = v;
    }
    if let Some(program) = settings::get(conn, TELNET_PROGRAM)? {
        if !program.trim().is_empty() {
            config.launch.program = program.trim().to_string();
        }
    }
    if let Some(args) = settings::get(conn, TELNET_ARGS)? {
        config.launch.args = args.split_whitespace().map(str::to_string).collect();
    }

    Ok(config)
}

fn parsed<T>(conn: &Connection, key: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = settings::get(conn, key)? else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            log::warn!("ignoring setting {key}={raw:?}: {e}");
            Ok(None)
        }
    }
}

/// Reject values `load` would ignore, so the settings form can report them.
pub fn validate(key: &str, value: &str) -> Result<(), String> {
    let value = value.trim();
    match key {
        RING_BUFFER_BYTES => match value.parse::<usize>() {
            Ok(n) if n >= 1024 => Ok(()),
            _ => Err(format!("{key} must be an integer of at least 1024")),
        },
        DEFAULT_PORT => value
            .parse::<u32>()
            .map_err(|e| e.to_string())
            .and_then(|p| validate_port(p).map(|_| ()).map_err(|e| e.to_string())),
        DISPOSE_TIMEOUT_MS | HEALTH_TIMEOUT_MS => match value.parse::<u64>() {
            Ok(n) if n > 0 => Ok(()),
            _ => Err(format!("{key} must be a positive number of milliseconds")),
        },
        TRANSPORT_MODE => TransportMode::from_str(value).map(|_| ()),
        TELNET_PROGRAM if value.is_empty() => Err(format!("{key} must not be empty")),
        TELNET_PROGRAM | TELNET_ARGS => Ok(()),
        other => Err(format!("unknown setting: {other}")),
    }
}

pub fn list(conn: &Connection) -> rusqlite::Result<BTreeMap<String, String>> {
    Ok(settings::list(conn)?.into_iter().collect())
}
