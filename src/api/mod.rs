//! HTTP API.
//!
//! A small hand-rolled HTTP/1.1 server over `TcpListener`: the accept loop
//! runs on one thread and each connection is handled on its own, so the MJPEG
//! stream can hold its connection open without blocking other requests.
//! Read endpoints that need the database degrade to empty listings when the
//! store is unavailable; only writes surface errors to the client.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::hub::FrameHub;
use crate::sink::parse_capture_filename;
use crate::storage::SqliteAlertStore;
use crate::{chat, now_s};

const MAX_REQUEST_BYTES: usize = 65536;
const DEFAULT_ALERTS_LIMIT: usize = 10;
const DEFAULT_CAPTURES_LIMIT: usize = 20;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub db_path: String,
    pub captures_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8360".to_string(),
            db_path: "sentinel.db".to_string(),
            captures_dir: PathBuf::from("captured_alerts"),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    hub: FrameHub,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, hub: FrameHub) -> Self {
        Self { cfg, hub }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
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

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let hub = self.hub.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, hub, shutdown_thread) {
                log::error!("api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    hub: FrameHub,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let cfg = cfg.clone();
                let hub = hub.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &hub) {
                        log::debug!("api request ended: {}", err);
                    }
                });
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

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, hub: &FrameHub) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let path = request.path.as_str();

    match (request.method.as_str(), path) {
        ("GET", "/") => {
            let body = json!({
                "status": "Road Sentinel running",
                "endpoints": ["/video_feed", "/alerts", "/captures", "/camera/status"],
            });
            write_json_value(&mut stream, 200, &body)
        }
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/video_feed") => stream_mjpeg(&mut stream, hub),
        ("GET", "/camera/status") => {
            let body = json!({
                "camera_initialized": !hub.is_closed(),
                "streaming": hub.latest_frame().is_some(),
                "subscribers": hub.subscriber_count(),
            });
            write_json_value(&mut stream, 200, &body)
        }
        ("GET", "/alerts") => {
            let limit = request.query_usize("limit").unwrap_or(DEFAULT_ALERTS_LIMIT);
            let alerts = match SqliteAlertStore::open(&cfg.db_path)
                .and_then(|store| store.recent_alerts(limit))
            {
                Ok(alerts) => alerts,
                Err(err) => {
                    log::warn!("database not available for alerts: {err:#}");
                    Vec::new()
                }
            };
            write_json_value(&mut stream, 200, &serde_json::to_value(alerts)?)
        }
        ("GET", _) if path.starts_with("/alerts/") && path.ends_with("/image") => {
            alert_image(&mut stream, cfg, path)
        }
        ("GET", "/captures") => {
            let limit = request
                .query_usize("limit")
                .unwrap_or(DEFAULT_CAPTURES_LIMIT);
            let files = list_captures(cfg, limit);
            write_json_value(&mut stream, 200, &serde_json::to_value(files)?)
        }
        ("GET", _) if path.starts_with("/captures/image/") => {
            capture_image(&mut stream, cfg, path)
        }
        ("GET", "/captures/stats") => {
            let stats = capture_stats(cfg)?;
            write_json_value(&mut stream, 200, &stats)
        }
        ("POST", "/api/chat") => api_chat(&mut stream, cfg, &request),
        ("GET", "/api/chat/suggestions") => {
            let recent = recent_alerts_or_empty(cfg, DEFAULT_ALERTS_LIMIT);
            let body = json!({ "suggestions": chat::suggestions(&recent) });
            write_json_value(&mut stream, 200, &body)
        }
        ("POST", "/api/users/register") => api_register(&mut stream, cfg, &request),
        ("POST", "/api/users/login") => api_login(&mut stream, cfg, &request),
        ("GET", _) if path.starts_with("/api/users/") => api_user(&mut stream, cfg, path),
        ("GET", "/api/admin/users") => api_admin_users(&mut stream, cfg),
        ("GET", _) if path.starts_with("/api/admin/users/") && path.ends_with("/alerts") => {
            api_user_alerts(&mut stream, cfg, path)
        }
        ("GET", "/api/admin/stats") => api_admin_stats(&mut stream, cfg),
        ("GET", _) => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        _ => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
    }
}

// -------------------- streaming --------------------

/// Serve the MJPEG stream on this connection until the client disconnects or
/// the hub closes. Every part is a complete JPEG.
fn stream_mjpeg(stream: &mut TcpStream, hub: &FrameHub) -> Result<()> {
    if hub.is_closed() && hub.latest_frame().is_none() {
        return write_json_response(stream, 503, r#"{"error":"camera_not_available"}"#);
    }

    let rx = hub.subscribe();
    stream.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
          Cache-Control: no-store\r\n\
          Connection: close\r\n\r\n",
    )?;

    for frame in rx {
        let part = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        );
        stream.write_all(part.as_bytes())?;
        stream.write_all(&frame)?;
        stream.write_all(b"\r\n")?;
    }
    Ok(())
}

// -------------------- alerts & captures --------------------

fn alert_image(stream: &mut TcpStream, cfg: &ApiConfig, path: &str) -> Result<()> {
    let id_part = path
        .strip_prefix("/alerts/")
        .and_then(|rest| rest.strip_suffix("/image"))
        .ok_or_else(|| anyhow!("malformed alert image path"))?;
    let Ok(alert_id) = id_part.parse::<i64>() else {
        return write_json_response(stream, 404, r#"{"error":"not_found"}"#);
    };

    match SqliteAlertStore::open(&cfg.db_path).and_then(|store| store.alert_image(alert_id)) {
        Ok(Some(image)) => write_response(stream, 200, "image/jpeg", &image),
        Ok(None) => write_json_response(stream, 404, r#"{"error":"image_not_found"}"#),
        Err(err) => {
            log::warn!("alert image lookup failed: {err:#}");
            write_json_response(stream, 500, r#"{"error":"database_error"}"#)
        }
    }
}

fn list_captures(cfg: &ApiConfig, limit: usize) -> Vec<serde_json::Value> {
    let Ok(entries) = std::fs::read_dir(&cfg.captures_dir) else {
        return Vec::new();
    };

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((timestamp, distance)) = parse_capture_filename(&name) else {
            continue;
        };
        let filesize = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push((
            timestamp,
            json!({
                "filename": name,
                "timestamp": timestamp,
                "distance": distance,
                "filesize": filesize,
                "url": format!("/captures/image/{name}"),
            }),
        ));
    }

    files.sort_by(|a, b| b.0.cmp(&a.0));
    files.into_iter().take(limit).map(|(_, v)| v).collect()
}

fn capture_image(stream: &mut TcpStream, cfg: &ApiConfig, path: &str) -> Result<()> {
    let filename = path
        .strip_prefix("/captures/image/")
        .ok_or_else(|| anyhow!("malformed capture path"))?;
    // Only filenames matching the capture convention are served; this also
    // rules out path traversal.
    if parse_capture_filename(filename).is_none() {
        return write_json_response(stream, 404, r#"{"error":"image_not_found"}"#);
    }
    match std::fs::read(cfg.captures_dir.join(filename)) {
        Ok(bytes) => write_response(stream, 200, "image/jpeg", &bytes),
        Err(_) => write_json_response(stream, 404, r#"{"error":"image_not_found"}"#),
    }
}

fn capture_stats(cfg: &ApiConfig) -> Result<serde_json::Value> {
    let now = now_s()?;
    let today_start = now - now % (24 * 60 * 60);

    let mut total = 0u64;
    let mut today = 0u64;
    let mut latest = 0u64;
    if let Ok(entries) = std::fs::read_dir(&cfg.captures_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((timestamp, _)) = parse_capture_filename(&name) else {
                continue;
            };
            total += 1;
            if timestamp >= today_start {
                today += 1;
            }
            latest = latest.max(timestamp);
        }
    }
    Ok(json!({ "total": total, "today": today, "latest": latest }))
}

// -------------------- chat --------------------

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

fn api_chat(stream: &mut TcpStream, cfg: &ApiConfig, request: &HttpRequest) -> Result<()> {
    let Ok(chat_request) = serde_json::from_slice::<ChatRequest>(&request.body) else {
        return write_json_response(stream, 400, r#"{"error":"invalid_body"}"#);
    };
    let recent = recent_alerts_or_empty(cfg, DEFAULT_ALERTS_LIMIT);
    let body = json!({
        "response": chat::respond(&chat_request.message, &recent),
        "timestamp": now_s()?,
        "mode": "offline",
    });
    write_json_value(stream, 200, &body)
}

fn recent_alerts_or_empty(cfg: &ApiConfig, limit: usize) -> Vec<crate::storage::AlertRow> {
    SqliteAlertStore::open(&cfg.db_path)
        .and_then(|store| store.recent_alerts(limit))
        .unwrap_or_default()
}

// -------------------- users --------------------

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    uid: String,
    email: String,
    display_name: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    uid: String,
}

fn api_register(stream: &mut TcpStream, cfg: &ApiConfig, request: &HttpRequest) -> Result<()> {
    let Ok(body) = serde_json::from_slice::<RegisterRequest>(&request.body) else {
        return write_json_response(stream, 400, r#"{"error":"invalid_body"}"#);
    };
    let mut store = match SqliteAlertStore::open(&cfg.db_path) {
        Ok(store) => store,
        Err(err) => {
            log::warn!("database not available for register: {err:#}");
            return write_json_response(stream, 503, r#"{"error":"database_unavailable"}"#);
        }
    };
    match store.register_user(
        &body.uid,
        &body.email,
        body.display_name.as_deref(),
        body.email_verified,
        now_s()? as i64,
    ) {
        Ok(outcome) => {
            let message = if outcome.created {
                "User registered successfully"
            } else {
                "User already exists"
            };
            write_json_value(
                stream,
                200,
                &json!({ "message": message, "user_id": outcome.user_id }),
            )
        }
        Err(err) => {
            log::warn!("register failed: {err:#}");
            write_json_response(stream, 500, r#"{"error":"database_error"}"#)
        }
    }
}

fn api_login(stream: &mut TcpStream, cfg: &ApiConfig, request: &HttpRequest) -> Result<()> {
    let Ok(body) = serde_json::from_slice::<LoginRequest>(&request.body) else {
        return write_json_response(stream, 400, r#"{"error":"invalid_body"}"#);
    };
    let mut store = match SqliteAlertStore::open(&cfg.db_path) {
        Ok(store) => store,
        Err(err) => {
            log::warn!("database not available for login: {err:#}");
            return write_json_response(stream, 503, r#"{"error":"database_unavailable"}"#);
        }
    };
    let ip = request.headers.get("x-forwarded-for").map(String::as_str);
    let agent = request.headers.get("user-agent").map(String::as_str);
    match store.log_login(&body.uid, ip, agent, now_s()? as i64) {
        Ok(true) => write_json_value(stream, 200, &json!({ "message": "Login logged successfully" })),
        Ok(false) => write_json_response(stream, 404, r#"{"error":"user_not_found"}"#),
        Err(err) => {
            log::warn!("login logging failed: {err:#}");
            write_json_response(stream, 500, r#"{"error":"database_error"}"#)
        }
    }
}

fn api_user(stream: &mut TcpStream, cfg: &ApiConfig, path: &str) -> Result<()> {
    let uid = path
        .strip_prefix("/api/users/")
        .ok_or_else(|| anyhow!("malformed user path"))?;
    match SqliteAlertStore::open(&cfg.db_path).and_then(|store| store.user_by_uid(uid)) {
        Ok(Some(user)) => write_json_value(stream, 200, &serde_json::to_value(user)?),
        Ok(None) => write_json_response(stream, 404, r#"{"error":"user_not_found"}"#),
        Err(err) => {
            log::warn!("user lookup failed: {err:#}");
            write_json_response(stream, 500, r#"{"error":"database_error"}"#)
        }
    }
}

fn api_admin_users(stream: &mut TcpStream, cfg: &ApiConfig) -> Result<()> {
    let users = match SqliteAlertStore::open(&cfg.db_path).and_then(|store| store.list_users()) {
        Ok(users) => users,
        Err(err) => {
            log::warn!("user listing failed: {err:#}");
            Vec::new()
        }
    };
    let body = json!({ "total": users.len(), "users": users });
    write_json_value(stream, 200, &body)
}

fn api_user_alerts(stream: &mut TcpStream, cfg: &ApiConfig, path: &str) -> Result<()> {
    let id_part = path
        .strip_prefix("/api/admin/users/")
        .and_then(|rest| rest.strip_suffix("/alerts"))
        .ok_or_else(|| anyhow!("malformed user alerts path"))?;
    let Ok(user_id) = id_part.parse::<i64>() else {
        return write_json_response(stream, 404, r#"{"error":"not_found"}"#);
    };
    let alerts = match SqliteAlertStore::open(&cfg.db_path)
        .and_then(|store| store.alerts_for_user(user_id))
    {
        Ok(alerts) => alerts,
        Err(err) => {
            log::warn!("user alert listing failed: {err:#}");
            Vec::new()
        }
    };
    let body = json!({ "total": alerts.len(), "alerts": alerts });
    write_json_value(stream, 200, &body)
}

fn api_admin_stats(stream: &mut TcpStream, cfg: &ApiConfig) -> Result<()> {
    match SqliteAlertStore::open(&cfg.db_path)
        .and_then(|store| store.admin_stats(now_s()? as i64))
    {
        Ok(stats) => write_json_value(stream, 200, &serde_json::to_value(stats)?),
        Err(err) => {
            log::warn!("stats query failed: {err:#}");
            write_json_response(stream, 500, r#"{"error":"database_error"}"#)
        }
    }
}

// -------------------- http plumbing --------------------

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("truncated request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    // Body: whatever followed the header terminator plus the remainder
    // announced by Content-Length.
    let mut body = data[header_end + 4..].to_vec();
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("truncated request body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        headers,
        body,
    })
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_usize(&self, key: &str) -> Option<usize> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == key {
                    return v.parse().ok();
                }
            }
        }
        None
    }
}

fn write_json_value(stream: &mut TcpStream, status: u16, value: &serde_json::Value) -> Result<()> {
    write_response(stream, status, "application/json", &serde_json::to_vec(value)?)
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
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
