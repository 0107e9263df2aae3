//! Output sniffing: hostname discovery from device prompts (`R1#`, `Switch>`,
//! `R1(config)#`) and telling the Telnet client's own chatter apart from the
//! remote device while a connection is being set up.

use std::sync::OnceLock;

use regex::Regex;

/// Longest partial line kept while waiting for a prompt.
const MAX_LINE: usize = 128;

fn prompt_regex() -> &'static Regex {
    static PROMPT: OnceLock<Regex> = OnceLock::new();
    PROMPT.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9._-]{0,62})(?:\([A-Za-z0-9-]+\))?[>#] ?$")
            .expect("prompt pattern is valid")
    })
}

/// Watches a session's output and reports the device hostname each time the
/// prompt shows a new one.
#[derive(Debug, Default)]
pub struct HostnameSniffer {
    line: Vec<u8>,
    last: Option<String>,
}

impl HostnameSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of output. Returns the hostname when the current line is
    /// a prompt naming a host different from the last one seen.
    pub fn feed(&mut self, data: &[u8]) -> Option<String> {
        for &byte in data {
            match byte {
                b'\r' | b'\n' => self.line.clear(),
                0x08 | 0x7f => {
                    self.line.pop();
                }
                b if b < 0x20 => {}
                b => {
                    if self.line.len() < MAX_LINE {
                        self.line.push(b);
                    }
                }
            }
        }

        let text = std::str::from_utf8(&self.line).ok()?;
        let host = prompt_regex().captures(text)?.get(1)?.as_str();
        if self.last.as_deref() == Some(host) {
            return None;
        }
        self.last = Some(host.to_string());
        self.last.clone()
    }

    /// Forget the last reported hostname, so the next prompt is news again.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Line starts the client prints before the remote side says anything.
const PREAMBLE_STARTS: [&str; 3] = ["Trying ", "Connecting To ", "Connecting to "];

/// Line starts of client diagnostics (`telnet: Unable to connect ...`).
const NOTICE_STARTS: [&str; 6] = ["telnet:", "telnet.exe:", "busybox:", "nc:", "ncat:", "netcat:"];

fn notice_regex() -> &'static Regex {
    static NOTICE: OnceLock<Regex> = OnceLock::new();
    NOTICE.get_or_init(|| {
        Regex::new(r"Could not open connection|Unable to connect|could not resolve")
            .expect("notice pattern is valid")
    })
}

enum LineKind {
    Preamble,
    Notice,
    Remote,
}

fn classify(line: &str) -> LineKind {
    if NOTICE_STARTS.iter().any(|s| line.starts_with(s)) || notice_regex().is_match(line) {
        LineKind::Notice
    } else if PREAMBLE_STARTS.iter().any(|s| line.starts_with(s)) {
        LineKind::Preamble
    } else {
        LineKind::Remote
    }
}

/// A partial line that may still turn into client chatter.
fn may_become_client_line(partial: &str) -> bool {
    PREAMBLE_STARTS
        .iter()
        .chain(NOTICE_STARTS.iter())
        .any(|s| s.starts_with(partial))
}

/// Watches output while a session is connecting. A Telnet client prints
/// `Trying 10.0.0.1...` before it connects and a diagnostic before it gives
/// up; neither means the remote device answered.
#[derive(Debug, Default)]
pub struct ConnectWatch {
    line: Vec<u8>,
    notice: Option<String>,
}

impl ConnectWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of output. Returns `true` once a line from the remote side
    /// (or the client's `Connected to ...` banner) has been seen.
    pub fn feed(&mut self, data: &[u8]) -> bool {
        for &byte in data {
            match byte {
                b'\r' | b'\n' => {
                    if self.finish_line() {
                        return true;
                    }
                }
                b if b < 0x20 => {}
                b => {
                    if self.line.len() < MAX_LINE {
                        self.line.push(b);
                    }
                }
            }
        }

        // A trailing partial line (`Password: `, `R1>`) counts as soon as it
        // can no longer be the start of client chatter.
        let partial = String::from_utf8_lossy(&self.line);
        let partial = partial.trim_start();
        !partial.is_empty()
            && matches!(classify(partial), LineKind::Remote)
            && !may_become_client_line(partial)
    }

    fn finish_line(&mut self) -> bool {
        let line = String::from_utf8_lossy(&self.line).trim().to_string();
        self.line.clear();
        if line.is_empty() {
            return false;
        }
        match classify(&line) {
            LineKind::Preamble => false,
            LineKind::Notice => {
                self.notice = Some(line);
                false
            }
            LineKind::Remote => true,
        }
    }

    /// Last diagnostic the client printed, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }
}
