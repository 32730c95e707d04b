//! One-shot HTTP health probe against a running server

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

const BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub status: u16,
    pub elapsed_ms: u128,
    /// First bytes of the response body
    pub body: String,
}

impl ProbeReport {
    pub fn healthy(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} in {}ms ({})",
            self.url,
            self.status,
            self.elapsed_ms,
            if self.healthy() { "healthy" } else { "unhealthy" }
        )
    }
}

/// URL for probing `path` on a server bound to `host:port`. A wildcard bind
/// address is probed on loopback.
pub fn probe_url(host: &str, port: u16, path: &str) -> String {
    let host = match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "[::1]",
        other => other,
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("http://{}:{}{}", host, port, path)
}

/// Issue a single GET. Connection failures are errors; any HTTP response,
/// whatever its status, is a report.
pub async fn probe(url: &str, timeout: Duration) -> Result<ProbeReport> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let started = Instant::now();
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let elapsed_ms = started.elapsed().as_millis();

    debug!(url, status, elapsed_ms, "Probe finished");
    Ok(ProbeReport {
        url: url.to_string(),
        status,
        elapsed_ms,
        body: body.chars().take(BODY_PREVIEW).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use yare::parameterized;

    #[parameterized(
        wildcard = { "0.0.0.0", 8080, "/", "http://127.0.0.1:8080/" },
        named = { "localhost", 9000, "/health", "http://localhost:9000/health" },
        relative_path = { "10.0.0.2", 80, "status", "http://10.0.0.2:80/status" },
        ipv6_wildcard = { "::", 8080, "/", "http://[::1]:8080/" },
    )]
    fn test_probe_url(host: &str, port: u16, path: &str, expected: &str) {
        assert_eq!(probe_url(host, port, path), expected);
    }

    async fn serve_once(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = "{\"status\":\"ok\"}";
            let response = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_probe_healthy() {
        let port = serve_once("HTTP/1.1 200 OK").await;
        let report = probe(&probe_url("127.0.0.1", port, "/"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.healthy());
        assert_eq!(report.body, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn test_probe_unhealthy_status() {
        let port = serve_once("HTTP/1.1 503 Service Unavailable").await;
        let report = probe(&probe_url("127.0.0.1", port, "/"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.status, 503);
        assert!(!report.healthy());
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(probe(&probe_url("127.0.0.1", port, "/"), Duration::from_secs(2))
            .await
            .is_err());
    }
}
