//! Reachability probe shown to the user before opening a session.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Ports where the probe also asks for an HTTP status line (the lab's web UI).
const HTTP_PORTS: [u16; 3] = [80, 8000, 8080];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    fn failed(message: String) -> Self {
        Self {
            ok: false,
            status: None,
            status_text: None,
            latency_ms: None,
            message: Some(message),
        }
    }
}

/// Connect to `ip:port` within `limit`. On web ports a `HEAD /` is sent and
/// the status line reported; elsewhere an accepted connection is enough.
pub async fn probe(ip: &str, port: u16, limit: Duration) -> HealthReport {
    let ip = ip.trim();
    if ip.is_empty() {
        return HealthReport::failed("ip must not be empty".to_string());
    }
    if port == 0 {
        return HealthReport::failed("port must be 1-65535".to_string());
    }

    let started = Instant::now();
    let mut stream = match timeout(limit, TcpStream::connect((ip, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            log::debug!("health probe {ip}:{port} failed: {e}");
            return HealthReport::failed(e.to_string());
        }
        Err(_) => {
            log::debug!("health probe {ip}:{port} timed out");
            return HealthReport::failed(format!("timed out after {} ms", limit.as_millis()));
        }
    };
    let connect_ms = elapsed_ms(started);

    if !HTTP_PORTS.contains(&port) {
        return HealthReport {
            ok: true,
            status: None,
            status_text: Some("open".to_string()),
            latency_ms: Some(connect_ms),
            message: None,
        };
    }

    let remaining = limit.saturating_sub(started.elapsed());
    match timeout(remaining, http_status(&mut stream, ip)).await {
        Ok(Ok((status, text))) => HealthReport {
            ok: (200..400).contains(&status),
            status: Some(status),
            status_text: Some(text),
            latency_ms: Some(elapsed_ms(started)),
            message: None,
        },
        Ok(Err(e)) => HealthReport {
            ok: true,
            status: None,
            status_text: Some("open".to_string()),
            latency_ms: Some(connect_ms),
            message: Some(format!("not an HTTP endpoint: {e}")),
        },
        Err(_) => HealthReport {
            ok: true,
            status: None,
            status_text: Some("open".to_string()),
            latency_ms: Some(connect_ms),
            message: Some("no HTTP response".to_string()),
        },
    }
}

async fn http_status(stream: &mut TcpStream, host: &str) -> std::io::Result<(u16, String)> {
    let request = format!("HEAD / HTTP/1.0\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    while !buf.contains(&b'\n') && buf.len() < 1024 {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    parse_status_line(&buf).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed status line")
    })
}

/// `HTTP/1.1 200 OK` -> `(200, "OK")`.
fn parse_status_line(buf: &[u8]) -> Option<(u16, String)> {
    let line = buf.split(|&b| b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?.trim_end();
    let mut parts = line.splitn(3, ' ');
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let status = parts.next()?.parse().ok()?;
    let text = parts.next().unwrap_or("").to_string();
    Some((status, text))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
