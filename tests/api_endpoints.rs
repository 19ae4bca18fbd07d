//! API endpoint tests: raw HTTP over TcpStream against a server spawned on
//! an ephemeral port, backed by a temporary database and captures dir.

use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use road_sentinel::api::{ApiConfig, ApiHandle, ApiServer};
use road_sentinel::sink::capture_filename;
use road_sentinel::{FrameHub, SqliteAlertStore};

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let pos = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..pos]).to_string();
    let body = response[(pos + 4).min(response.len())..].to_vec();
    Ok((headers, body))
}

fn get(addr: std::net::SocketAddr, path: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes())?;
    read_response(&mut stream)
}

fn post_json(addr: std::net::SocketAddr, path: &str, body: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes())?;
    read_response(&mut stream)
}

fn json_body(body: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(body)?)
}

struct TestApi {
    _dir: tempfile::TempDir,
    hub: FrameHub,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(setup: impl FnOnce(&mut SqliteAlertStore, &ApiConfig) -> Result<()>) -> Result<Self> {
        let dir = tempdir()?;
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            db_path: dir.path().join("sentinel.db").to_string_lossy().to_string(),
            captures_dir: dir.path().join("captured_alerts"),
        };
        std::fs::create_dir_all(&cfg.captures_dir)?;

        let mut store = SqliteAlertStore::open(&cfg.db_path)?;
        setup(&mut store, &cfg)?;
        drop(store);

        let hub = FrameHub::new();
        let api_handle = ApiServer::new(cfg, hub.clone()).spawn()?;

        Ok(Self {
            _dir: dir,
            hub,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.hub.close();
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn seed_alert(store: &mut SqliteAlertStore, cfg: &ApiConfig, ts: i64, dist: f64) -> Result<()> {
    let filename = capture_filename(ts as u64, dist as f32);
    let path = cfg.captures_dir.join(&filename);
    std::fs::write(&path, b"jpegbytes")?;
    store.insert_alert(ts, "car", 0.87, dist, &path.to_string_lossy(), b"jpegbytes")?;
    Ok(())
}

#[test]
fn health_and_root_are_served() -> Result<()> {
    let api = TestApi::new(|_store, _cfg| Ok(()))?;

    let (headers, body) = get(api.addr(), "/health")?;
    assert!(headers.contains("200 OK"));
    assert!(String::from_utf8_lossy(&body).contains(r#""status":"ok""#));

    let (headers, body) = get(api.addr(), "/")?;
    assert!(headers.contains("200 OK"));
    let value = json_body(&body)?;
    assert!(value["endpoints"]
        .as_array()
        .expect("endpoint list")
        .iter()
        .any(|e| e == "/video_feed"));
    Ok(())
}

#[test]
fn alerts_listing_returns_rows_newest_first() -> Result<()> {
    let api = TestApi::new(|store, cfg| {
        seed_alert(store, cfg, 1_700_000_000, 42.3)?;
        seed_alert(store, cfg, 1_700_000_010, 18.5)?;
        Ok(())
    })?;

    let (headers, body) = get(api.addr(), "/alerts?limit=10")?;
    assert!(headers.contains("200 OK"));
    let value = json_body(&body)?;
    let alerts = value.as_array().expect("alert array");
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0]["distance_m"], 18.5);
    assert_eq!(alerts[1]["object_class"], "car");
    Ok(())
}

#[test]
fn alert_image_round_trips_and_unknown_id_is_404() -> Result<()> {
    let api = TestApi::new(|store, cfg| seed_alert(store, cfg, 1_700_000_000, 42.3))?;

    let (list_headers, list_body) = get(api.addr(), "/alerts")?;
    assert!(list_headers.contains("200 OK"));
    let id = json_body(&list_body)?[0]["id"].as_i64().expect("alert id");

    let (headers, body) = get(api.addr(), &format!("/alerts/{id}/image"))?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("image/jpeg"));
    assert_eq!(body, b"jpegbytes");

    let (headers, _) = get(api.addr(), "/alerts/99999/image")?;
    assert!(headers.contains("404 Not Found"));
    Ok(())
}

#[test]
fn captures_listing_parses_filenames_and_serves_files() -> Result<()> {
    let api = TestApi::new(|store, cfg| {
        seed_alert(store, cfg, 1_700_000_000, 42.3)?;
        // A stray file in the captures dir is ignored.
        std::fs::write(cfg.captures_dir.join("notes.txt"), b"not a capture")?;
        Ok(())
    })?;

    let (headers, body) = get(api.addr(), "/captures")?;
    assert!(headers.contains("200 OK"));
    let value = json_body(&body)?;
    let files = value.as_array().expect("capture array");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["timestamp"], 1_700_000_000u64);
    assert_eq!(files[0]["distance"], "42.3m");

    let filename = files[0]["filename"].as_str().expect("filename");
    let (headers, bytes) = get(api.addr(), &format!("/captures/image/{filename}"))?;
    assert!(headers.contains("200 OK"));
    assert_eq!(bytes, b"jpegbytes");

    // Anything outside the capture naming convention is refused.
    let (headers, _) = get(api.addr(), "/captures/image/notes.txt")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = get(api.addr(), "/captures/image/..%2Fsentinel.db")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, body) = get(api.addr(), "/captures/stats")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(json_body(&body)?["total"], 1);
    Ok(())
}

#[test]
fn chat_answers_and_suggestions_reflect_alert_history() -> Result<()> {
    let api = TestApi::new(|store, cfg| seed_alert(store, cfg, 1_700_000_000, 20.0))?;

    let (headers, body) = post_json(api.addr(), "/api/chat", r#"{"message":"show recent alerts"}"#)?;
    assert!(headers.contains("200 OK"));
    let value = json_body(&body)?;
    assert_eq!(value["mode"], "offline");
    assert!(value["response"]
        .as_str()
        .expect("response text")
        .contains("car at 20.0m"));

    let (headers, body) = get(api.addr(), "/api/chat/suggestions")?;
    assert!(headers.contains("200 OK"));
    let value = json_body(&body)?;
    assert!(!value["suggestions"].as_array().expect("suggestions").is_empty());

    let (headers, _) = post_json(api.addr(), "/api/chat", "not json")?;
    assert!(headers.contains("400 Bad Request"));
    Ok(())
}

#[test]
fn user_lifecycle_register_login_fetch() -> Result<()> {
    let api = TestApi::new(|_store, _cfg| Ok(()))?;

    let (headers, body) = post_json(
        api.addr(),
        "/api/users/register",
        r#"{"uid":"uid-1","email":"a@example.com","display_name":"A"}"#,
    )?;
    assert!(headers.contains("200 OK"));
    let value = json_body(&body)?;
    assert_eq!(value["message"], "User registered successfully");

    // Registering the same uid again reports the existing row.
    let (_, body) = post_json(
        api.addr(),
        "/api/users/register",
        r#"{"uid":"uid-1","email":"a@example.com"}"#,
    )?;
    assert_eq!(json_body(&body)?["message"], "User already exists");

    let (headers, _) = post_json(api.addr(), "/api/users/login", r#"{"uid":"uid-1"}"#)?;
    assert!(headers.contains("200 OK"));
    let (headers, _) = post_json(api.addr(), "/api/users/login", r#"{"uid":"nobody"}"#)?;
    assert!(headers.contains("404 Not Found"));

    let (headers, body) = get(api.addr(), "/api/users/uid-1")?;
    assert!(headers.contains("200 OK"));
    let user = json_body(&body)?;
    assert_eq!(user["email"], "a@example.com");
    assert!(user["last_login"].as_i64().is_some());

    let (headers, body) = get(api.addr(), "/api/admin/users")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(json_body(&body)?["total"], 1);

    let (headers, body) = get(api.addr(), "/api/admin/stats")?;
    assert!(headers.contains("200 OK"));
    let stats = json_body(&body)?;
    assert_eq!(stats["total_users"], 1);
    assert_eq!(stats["active_users"], 1);
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new(|_store, _cfg| Ok(()))?;

    let (headers, _) = get(api.addr(), "/nope")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = post_json(api.addr(), "/alerts", "{}")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn video_feed_streams_multipart_jpeg_parts() -> Result<()> {
    let api = TestApi::new(|_store, _cfg| Ok(()))?;
    let hub = api.hub.clone();

    // Publish frames on a cadence until the hub closes at test teardown.
    let publisher = std::thread::spawn(move || {
        for i in 0..100u8 {
            if hub.is_closed() {
                break;
            }
            hub.publish(vec![0xFF, 0xD8, i, 0xFF, 0xD9]);
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    let mut stream = TcpStream::connect(api.addr())?;
    stream.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    stream.set_read_timeout(Some(Duration::from_millis(200)))?;

    // Read until we have seen the multipart header and two boundaries.
    let mut collected = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut buf = [0u8; 1024];
    while Instant::now() < deadline {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(_) => {}
        }
        let text = String::from_utf8_lossy(&collected);
        if text.matches("--frame").count() >= 2 {
            break;
        }
    }

    let text = String::from_utf8_lossy(&collected);
    assert!(text.contains("multipart/x-mixed-replace"));
    assert!(text.contains("Content-Type: image/jpeg"));
    assert!(
        text.matches("--frame").count() >= 2,
        "expected at least two multipart frames"
    );

    drop(stream);
    api.hub.close();
    publisher.join().expect("publisher thread");
    Ok(())
}
