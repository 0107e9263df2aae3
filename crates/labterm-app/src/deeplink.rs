//! `telnet://host[:port]` launch requests from the command line or from a
//! second instance of the app.

use serde::{Deserialize, Serialize};
use tauri::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelnetAction {
    Open { request: TelnetLaunchRequest },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelnetLaunchRequest {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Parse `telnet://host[:port]`, or a bare `host[:port]`.
pub fn parse_telnet_url(arg: &str) -> Option<TelnetLaunchRequest> {
    let arg = arg.trim();
    if arg.is_empty() || arg.starts_with('-') {
        return None;
    }
    let url = if arg.to_ascii_lowercase().starts_with("telnet://") {
        arg.to_string()
    } else if arg.contains("://") {
        return None;
    } else {
        format!("telnet://{arg}")
    };

    let parsed = Url::parse(&url).ok()?;
    let host = parsed.host_str()?.trim_matches(|c| c == '[' || c == ']');
    if host.is_empty() {
        return None;
    }
    Some(TelnetLaunchRequest {
        host: host.to_string(),
        port: parsed.port(),
        label: None,
    })
}

/// Launch actions found in `args` (the binary path already skipped).
pub fn actions_from_args<I, S>(args: I) -> Vec<TelnetAction>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .filter_map(|arg| parse_telnet_url(arg.as_ref()))
        .map(|request| TelnetAction::Open { request })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(host: &str, port: Option<u16>) -> TelnetLaunchRequest {
        TelnetLaunchRequest {
            host: host.to_string(),
            port,
            label: None,
        }
    }

    #[test]
    fn test_parse_scheme_and_port() {
        assert_eq!(
            parse_telnet_url("telnet://192.168.1.10:32769"),
            Some(req("192.168.1.10", Some(32769)))
        );
        assert_eq!(
            parse_telnet_url("TELNET://router.lab"),
            Some(req("router.lab", None))
        );
    }

    #[test]
    fn test_parse_bare_host() {
        assert_eq!(parse_telnet_url(" 10.0.0.5:2001 "), Some(req("10.0.0.5", Some(2001))));
        assert_eq!(parse_telnet_url("r1"), Some(req("r1", None)));
    }

    #[test]
    fn test_rejects_other_input() {
        assert_eq!(parse_telnet_url(""), None);
        assert_eq!(parse_telnet_url("--verbose"), None);
        assert_eq!(parse_telnet_url("ssh://10.0.0.1"), None);
        assert_eq!(parse_telnet_url("telnet://"), None);
    }

    #[test]
    fn test_actions_from_args() {
        let actions = actions_from_args(["--minimized", "telnet://r1:2000", "r2"]);
        assert_eq!(
            actions,
            vec![
                TelnetAction::Open { request: req("r1", Some(2000)) },
                TelnetAction::Open { request: req("r2", None) },
            ]
        );
    }

    #[test]
    fn test_action_json_shape() {
        let action = TelnetAction::Open {
            request: req("r1", Some(23)),
        };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            serde_json::json!({"type": "open", "request": {"host": "r1", "port": 23}})
        );
    }
}
