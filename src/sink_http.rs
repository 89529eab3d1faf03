//! Submission sink that talks to a remote ingestion endpoint over HTTP.
//!
//! Sends `multipart/form-data` with a `data` JSON part and a `media` blob
//! part, mirroring what the ingestion API accepts. Enabled by the
//! `http-sink` feature.

use rand::RngCore;
use std::time::Duration;

use crate::session::{SendFailure, SubmissionSink};
use crate::{SubmissionPayload, SubmissionRecord};

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpSink {
    agent: ureq::Agent,
    endpoint: String,
    token: String,
}

impl HttpSink {
    /// `base_url` is the service root, e.g. `http://127.0.0.1:5001`.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self::with_timeout(base_url, token, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, token: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: format!("{}/submissions", base_url.trim_end_matches('/')),
            token: token.to_string(),
        }
    }
}

fn random_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::from("greenloop-");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn multipart_body(boundary: &str, data: &[u8], media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + media.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"data\"\r\n\
          Content-Type: application/json\r\n\r\n",
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"media\"; filename=\"capture.bin\"\r\n\
          Content-Type: application/octet-stream\r\n\r\n",
    );
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Best-effort extraction of the `message` field from an error body.
fn error_message(response: ureq::Response) -> String {
    let status = response.status();
    let fallback = format!("endpoint returned status {}", status);
    match response.into_string() {
        Ok(body) => serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str().map(String::from)))
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

impl SubmissionSink for HttpSink {
    fn submit(
        &mut self,
        payload: &SubmissionPayload,
        media: &[u8],
    ) -> Result<SubmissionRecord, SendFailure> {
        let data = serde_json::to_vec(payload)
            .map_err(|e| SendFailure::Rejected(format!("unserializable payload: {}", e)))?;
        let boundary = random_boundary();
        let body = multipart_body(&boundary, &data, media);

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body);

        match response {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|e| SendFailure::Transport(format!("unreadable response: {}", e)))?;
                let record: SubmissionRecord = serde_json::from_str(&body)
                    .map_err(|e| SendFailure::Transport(format!("unreadable response: {}", e)))?;
                Ok(record)
            }
            Err(ureq::Error::Status(status, response)) if (400..500).contains(&status) => {
                Err(SendFailure::Rejected(error_message(response)))
            }
            Err(ureq::Error::Status(_, response)) => {
                Err(SendFailure::Transport(error_message(response)))
            }
            Err(ureq::Error::Transport(err)) => Err(SendFailure::Transport(err.to_string())),
        }
    }
}
