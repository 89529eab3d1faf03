//! HTTP surface for the ingestion service.
//!
//! A deliberately small, hand-rolled HTTP/1.1 server:
//!
//! - `POST /submissions` — bearer-token authenticated; accepts either a JSON
//!   body or `multipart/form-data` with a `data` JSON part and an optional
//!   `media` blob part. 201 with the created record, 400 `{"message"}` on
//!   validation failure, 500 `{"message"}` on storage failure.
//! - `GET /users` — ranked leaderboard listing, unauthenticated.
//! - `GET /health`.
//!
//! Token issuance belongs to the external identity provider; the server only
//! resolves configured bearer tokens to owner identities. When no owners are
//! configured, an ephemeral demo token is generated at startup.

use anyhow::{anyhow, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::service::{parse_payload, SubmissionService, SubmitError};
use crate::store::{MediaStore, SqliteSubmissionStore};
use crate::OwnerIdentity;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    /// Set when the server generated an ephemeral demo token.
    pub demo_token: Option<String>,
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

/// Bearer token → owner identity map.
#[derive(Clone, Debug, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, OwnerIdentity>,
}

impl TokenRegistry {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        let tokens = cfg
            .owners
            .iter()
            .map(|owner| (owner.token.clone(), owner.identity.clone()))
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn insert(&mut self, token: String, identity: OwnerIdentity) {
        self.tokens.insert(token, identity);
    }

    pub fn resolve(&self, token: &str) -> Option<&OwnerIdentity> {
        self.tokens.get(token)
    }
}

/// Generate an opaque random token for the demo owner.
fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

pub struct ApiServer {
    cfg: ServiceConfig,
}

impl ApiServer {
    pub fn new(cfg: ServiceConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.api_addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let mut tokens = TokenRegistry::from_config(&self.cfg);
        let mut demo_token = None;
        if tokens.is_empty() {
            let token = generate_token();
            tokens.insert(
                token.clone(),
                OwnerIdentity {
                    owner_id: "demo".to_string(),
                    display_name: "Demo".to_string(),
                    avatar: None,
                },
            );
            if let Some(path) = &self.cfg.api_token_path {
                write_token_file(path, &token)?;
                log::info!("demo token written to {}", path.display());
            } else {
                log::warn!("no owners configured; demo token (handle securely): {}", token);
            }
            demo_token = Some(token);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, tokens, shutdown_thread) {
                log::error!("submission api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            demo_token,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ServiceConfig,
    tokens: TokenRegistry,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let store = SqliteSubmissionStore::open(&cfg.db_path)?;
    let media = MediaStore::open(&cfg.media_dir)?;
    let mut service = SubmissionService::new(store).with_media_store(media);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &mut service, &tokens) {
                    log::warn!("submission api request rejected: {}", err);
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

fn handle_connection(
    mut stream: TcpStream,
    service: &mut SubmissionService<SqliteSubmissionStore>,
    tokens: &TokenRegistry,
) -> Result<()> {
    let request = read_request(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
        }
        ("GET", "/users") => match service.list_users() {
            Ok(users) => {
                let body = serde_json::to_vec(&users)?;
                write_response(&mut stream, 200, "application/json", &body)?;
            }
            Err(err) => {
                log::error!("leaderboard listing failed: {}", err);
                write_json_response(&mut stream, 500, r#"{"message":"storage failure"}"#)?;
            }
        },
        ("POST", "/submissions") => {
            handle_submission(&mut stream, &request, service, tokens)?;
        }
        ("GET", _) | ("POST", _) => {
            write_json_response(&mut stream, 404, r#"{"message":"not found"}"#)?;
        }
        _ => {
            write_json_response(&mut stream, 405, r#"{"message":"method not allowed"}"#)?;
        }
    }
    Ok(())
}

fn handle_submission(
    stream: &mut TcpStream,
    request: &HttpRequest,
    service: &mut SubmissionService<SqliteSubmissionStore>,
    tokens: &TokenRegistry,
) -> Result<()> {
    let Some(token) = request.bearer_token() else {
        write_json_response(stream, 401, r#"{"message":"missing token"}"#)?;
        return Ok(());
    };
    let Some(owner) = tokens.resolve(&token) else {
        write_json_response(stream, 401, r#"{"message":"invalid token"}"#)?;
        return Ok(());
    };

    let (data, media) = match extract_submission_body(request) {
        Ok(parts) => parts,
        Err(msg) => {
            let body = serde_json::to_string(&serde_json::json!({ "message": msg }))?;
            write_json_response(stream, 400, &body)?;
            return Ok(());
        }
    };

    let payload = match parse_payload(&data) {
        Ok(payload) => payload,
        Err(err) => {
            let body = serde_json::to_string(&serde_json::json!({ "message": err.to_string() }))?;
            write_json_response(stream, 400, &body)?;
            return Ok(());
        }
    };

    match service.submit(owner, &payload, media.as_deref()) {
        Ok(record) => {
            let body = serde_json::to_vec(&record)?;
            write_response(stream, 201, "application/json", &body)?;
        }
        Err(SubmitError::InvalidPayload(msg)) => {
            let body = serde_json::to_string(&serde_json::json!({ "message": msg }))?;
            write_json_response(stream, 400, &body)?;
        }
        Err(SubmitError::Persistence(err)) => {
            log::error!("submission persistence failed: {}", err);
            write_json_response(stream, 500, r#"{"message":"storage failure"}"#)?;
        }
    }
    Ok(())
}

/// Pull the payload JSON and optional media blob out of the request body.
/// Multipart bodies carry a `data` part (JSON) and an optional `media` part;
/// plain JSON bodies are the payload itself.
fn extract_submission_body(request: &HttpRequest) -> Result<(Vec<u8>, Option<Vec<u8>>), String> {
    let content_type = request
        .headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or("application/json");

    if let Some(boundary) = multipart_boundary(content_type) {
        let parts = parse_multipart(&request.body, boundary)?;
        let mut data = None;
        let mut media = None;
        for part in parts {
            match part.name.as_str() {
                "data" => data = Some(part.data),
                "media" | "video" => media = Some(part.data),
                _ => {}
            }
        }
        let data = data.ok_or_else(|| "multipart body is missing the data part".to_string())?;
        Ok((data, media))
    } else {
        Ok((request.body.clone(), None))
    }
}

fn multipart_boundary(content_type: &str) -> Option<&str> {
    let mut parts = content_type.split(';').map(str::trim);
    if !parts
        .next()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("multipart/form-data"))
    {
        return None;
    }
    parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

struct MultipartPart {
    name: String,
    data: Vec<u8>,
}

fn parse_multipart(body: &[u8], boundary: &str) -> Result<Vec<MultipartPart>, String> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();
    let mut offset = find(body, &delimiter, 0)
        .ok_or_else(|| "multipart body has no opening boundary".to_string())?
        + delimiter.len();

    loop {
        // Closing delimiter is "--boundary--".
        if body[offset..].starts_with(b"--") {
            break;
        }
        // Skip the CRLF after the delimiter.
        if body[offset..].starts_with(b"\r\n") {
            offset += 2;
        }

        let headers_end = find(body, b"\r\n\r\n", offset)
            .ok_or_else(|| "multipart part is missing its header block".to_string())?;
        let header_text = String::from_utf8_lossy(&body[offset..headers_end]);
        let name = header_text
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                if !key.trim().eq_ignore_ascii_case("content-disposition") {
                    return None;
                }
                value.split(';').map(str::trim).find_map(|param| {
                    let (key, value) = param.split_once('=')?;
                    (key.trim() == "name").then(|| value.trim().trim_matches('"').to_string())
                })
            })
            .ok_or_else(|| "multipart part has no field name".to_string())?;

        let data_start = headers_end + 4;
        let next_delim = find(body, &delimiter, data_start)
            .ok_or_else(|| "multipart part is not terminated".to_string())?;
        // Part data ends with CRLF before the next delimiter.
        let data_end = next_delim.saturating_sub(2).max(data_start);
        parts.push(MultipartPart {
            name,
            data: body[data_start..data_end].to_vec(),
        });
        offset = next_delim + delimiter.len();
    }
    Ok(parts)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let headers_end = loop {
        if let Some(pos) = find(&data, b"\r\n\r\n", 0) {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request header block too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before header block"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let header_text = String::from_utf8_lossy(&data[..headers_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|value| value.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }

    let mut body = data[headers_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
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
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
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

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        let value = self.headers.get("authorization")?;
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
            return Some(parts[1].to_string());
        }
        None
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
