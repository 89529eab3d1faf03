//! HTTP surface tests, exercised with raw sockets.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use tempfile::TempDir;

use greenloop::api::{ApiHandle, ApiServer};
use greenloop::config::{OwnerToken, ServiceConfig};
use greenloop::{OwnerIdentity, UserAggregate};

const TOKEN: &str = "test-token-1";

fn spawn_server(dir: &TempDir) -> ApiHandle {
    let cfg = ServiceConfig {
        db_path: dir.path().join("api.db").to_str().unwrap().to_string(),
        media_dir: dir.path().join("uploads").to_str().unwrap().to_string(),
        api_addr: "127.0.0.1:0".to_string(),
        api_token_path: None,
        owners: vec![OwnerToken {
            token: TOKEN.to_string(),
            identity: OwnerIdentity {
                owner_id: "auth0|maya".to_string(),
                display_name: "Maya".to_string(),
                avatar: None,
            },
        }],
    };
    ApiServer::new(cfg).spawn().unwrap()
}

fn send_raw(addr: SocketAddr, request: &[u8]) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request).unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let text = String::from_utf8_lossy(&response).to_string();
    let status: u16 = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    send_raw(addr, request.as_bytes())
}

fn post_json(addr: SocketAddr, path: &str, token: Option<&str>, body: &str) -> (u16, String) {
    let auth = token
        .map(|t| format!("Authorization: Bearer {t}\r\n"))
        .unwrap_or_default();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\n{auth}Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    send_raw(addr, request.as_bytes())
}

#[test]
fn health_endpoint_answers() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);
    let (status, body) = get(handle.addr, "/health");
    assert_eq!(status, 200);
    assert!(body.contains("ok"));
    handle.stop().unwrap();
}

#[test]
fn json_submission_creates_a_record() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);
    let body = r#"{"counts":{"Recyclable":2,"Compost":1},"location":{"type":"Point","coordinates":[-79.19,43.79]}}"#;
    let (status, response) = post_json(handle.addr, "/submissions", Some(TOKEN), body);
    assert_eq!(status, 201);
    let record: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(record["owner_id"], "auth0|maya");
    assert_eq!(record["recycle"], 2);
    assert_eq!(record["compost"], 1);
    handle.stop().unwrap();
}

#[test]
fn multipart_submission_stores_the_media_blob() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);

    let data = r#"{"counts":{"Trash":1}}"#;
    let body = format!(
        "--b1\r\nContent-Disposition: form-data; name=\"data\"\r\n\r\n{data}\r\n\
         --b1\r\nContent-Disposition: form-data; name=\"media\"; filename=\"clip.webm\"\r\n\
         Content-Type: application/octet-stream\r\n\r\nFRAMES\r\n--b1--\r\n"
    );
    let request = format!(
        "POST /submissions HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer {TOKEN}\r\n\
         Content-Type: multipart/form-data; boundary=b1\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let (status, response) = send_raw(handle.addr, request.as_bytes());
    assert_eq!(status, 201);

    let record: serde_json::Value = serde_json::from_str(&response).unwrap();
    let media_ref = record["media_ref"].as_str().expect("media_ref set");
    let stored = std::fs::read(dir.path().join("uploads").join(media_ref)).unwrap();
    assert_eq!(stored, b"FRAMES");
    handle.stop().unwrap();
}

#[test]
fn submissions_require_a_known_token() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);
    let body = r#"{"counts":{"Trash":1}}"#;

    let (status, _) = post_json(handle.addr, "/submissions", None, body);
    assert_eq!(status, 401);
    let (status, _) = post_json(handle.addr, "/submissions", Some("wrong"), body);
    assert_eq!(status, 401);
    handle.stop().unwrap();
}

#[test]
fn malformed_location_gets_a_400_message() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);
    let body = r#"{"counts":{"Trash":1},"location":{"type":"Point","coordinates":["x",43.79]}}"#;
    let (status, response) = post_json(handle.addr, "/submissions", Some(TOKEN), body);
    assert_eq!(status, 400);
    assert!(response.contains("message"));

    // Wrong geometry kind is caught by validation, same status.
    let body = r#"{"counts":{"Trash":1},"location":{"type":"Polygon","coordinates":[0.0,0.0]}}"#;
    let (status, _) = post_json(handle.addr, "/submissions", Some(TOKEN), body);
    assert_eq!(status, 400);
    handle.stop().unwrap();
}

#[test]
fn users_listing_is_public_and_ranked() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);
    let body = r#"{"counts":{"Recyclable":3}}"#;
    let (status, _) = post_json(handle.addr, "/submissions", Some(TOKEN), body);
    assert_eq!(status, 201);

    let (status, response) = get(handle.addr, "/users");
    assert_eq!(status, 200);
    let users: Vec<UserAggregate> = serde_json::from_str(&response).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].total_items, 3);
    assert_eq!(users[0].display_name, "Maya");
    handle.stop().unwrap();
}

#[test]
fn unknown_paths_return_404() {
    let dir = TempDir::new().unwrap();
    let handle = spawn_server(&dir);
    let (status, _) = get(handle.addr, "/nope");
    assert_eq!(status, 404);
    handle.stop().unwrap();
}
