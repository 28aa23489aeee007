//! HTTP query surface.
//!
//! `GET /` runs one full session and answers `{"vagas": n}`. Requests are
//! served one at a time on a single thread; stopping the server also
//! cancels a session that is still running.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ParkwatchConfig;
use crate::session::{run_configured_session, CancelToken, SessionEnd, SessionOutcome};

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8798".to_string(),
        }
    }
}

/// Runs one session per query.
pub trait SessionRunner: Send + Sync {
    fn run_session(&self, cancel: &CancelToken) -> Result<SessionOutcome>;
}

impl<F> SessionRunner for F
where
    F: Fn(&CancelToken) -> Result<SessionOutcome> + Send + Sync,
{
    fn run_session(&self, cancel: &CancelToken) -> Result<SessionOutcome> {
        self(cancel)
    }
}

/// Runs sessions against the configured source and detector.
pub struct ConfiguredRunner {
    config: ParkwatchConfig,
}

impl ConfiguredRunner {
    pub fn new(config: ParkwatchConfig) -> Self {
        Self { config }
    }
}

impl SessionRunner for ConfiguredRunner {
    fn run_session(&self, cancel: &CancelToken) -> Result<SessionOutcome> {
        run_configured_session(&self.config, cancel)
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer<R: SessionRunner> {
    cfg: ApiConfig,
    runner: R,
}

impl<R: SessionRunner + 'static> ApiServer<R> {
    pub fn new(cfg: ApiConfig, runner: R) -> Self {
        Self { cfg, runner }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = CancelToken::new();
        let shutdown_thread = shutdown.clone();
        let runner = self.runner;
        let join = std::thread::Builder::new()
            .name("parkwatch-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &runner, &shutdown_thread) {
                    log::error!("query api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api<R: SessionRunner>(listener: TcpListener, runner: &R, shutdown: &CancelToken) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, runner, shutdown) {
                    log::warn!("query api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection<R: SessionRunner>(
    mut stream: TcpStream,
    runner: &R,
    shutdown: &CancelToken,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        "/" => {
            let outcome = match runner.run_session(shutdown) {
                Ok(outcome) => outcome,
                Err(err) => {
                    log::error!("session for {} {} failed: {:#}", request.method, request.path, err);
                    return write_json_response(
                        &mut stream,
                        503,
                        r#"{"error":"session_unavailable"}"#,
                    );
                }
            };
            if outcome.end == SessionEnd::Cancelled {
                log::info!("session for {} cancelled by shutdown", request.path);
                return write_json_response(&mut stream, 503, r#"{"error":"session_unavailable"}"#);
            }
            let payload = serde_json::to_vec(&serde_json::json!({ "vagas": outcome.free_spaces }))?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
