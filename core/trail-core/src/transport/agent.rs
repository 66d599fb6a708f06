//! Client for the background agent's Unix socket.
//!
//! One newline-terminated JSON request per connection, one newline-terminated
//! JSON response back. Once the agent acknowledges a batch it owns delivery,
//! so the shell-side process never waits on the network.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use cmdtrail_agent_protocol::{
    BatchPayload, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use rand::RngCore;

use super::{AgentProbe, Channel, Transport};
use crate::error::{Result, TrailError};

/// Health-checks the agent with a `get_health` request.
pub struct SocketProbe;

impl AgentProbe for SocketProbe {
    fn is_ready(&self, socket: &Path, timeout: Duration) -> bool {
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        };

        let response = match send_request(socket, &request, timeout) {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "Agent probe failed");
                return false;
            }
        };

        response.ok
            && response
                .data
                .as_ref()
                .and_then(|data| data.get("status"))
                .and_then(|value| value.as_str())
                == Some("ok")
    }
}

/// Hands batches to the agent over its socket.
pub struct UnixAgent {
    socket: PathBuf,
    timeout: Duration,
}

impl UnixAgent {
    pub fn new(socket: PathBuf, timeout: Duration) -> Self {
        UnixAgent { socket, timeout }
    }
}

impl Transport for UnixAgent {
    fn channel(&self) -> Channel {
        Channel::LocalAgent
    }

    fn send(&self, payload: &BatchPayload) -> Result<()> {
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::SubmitBatch,
            id: Some(make_request_id()),
            params: Some(
                serde_json::to_value(payload)
                    .map_err(|err| TrailError::json("serialize batch", err))?,
            ),
        };

        let response = send_request(&self.socket, &request, self.timeout)
            .map_err(TrailError::AgentUnavailable)?;
        if response.ok {
            tracing::debug!(
                id = ?request.id,
                records = payload.records.len(),
                "Agent accepted batch"
            );
            return Ok(());
        }

        let (code, message) = response
            .error
            .map(|err| (err.code, err.message))
            .unwrap_or_else(|| ("unknown".to_string(), "Unknown agent error".to_string()));
        Err(TrailError::AgentRejected { code, message })
    }
}

fn send_request(
    socket: &Path,
    request: &Request,
    timeout: Duration,
) -> std::result::Result<Response, String> {
    let mut stream = UnixStream::connect(socket)
        .map_err(|err| format!("Failed to connect to agent socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(timeout));

    let mut line = serde_json::to_vec(request)
        .map_err(|err| format!("Failed to encode request: {}", err))?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .map_err(|err| format!("Failed to send request: {}", err))?;

    read_response(stream)
}

/// Reads one newline-terminated response, bounded by [`MAX_REQUEST_BYTES`].
fn read_response(stream: UnixStream) -> std::result::Result<Response, String> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES as u64 + 1));
    let mut line = Vec::new();

    match reader.read_until(b'\n', &mut line) {
        Ok(_) => {}
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            return Err("Timed out waiting for agent response".to_string());
        }
        Err(err) => return Err(format!("Failed to read agent response: {}", err)),
    }

    if line.len() > MAX_REQUEST_BYTES {
        return Err(format!("Agent response exceeded {} bytes", MAX_REQUEST_BYTES));
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.is_empty() {
        return Err("Agent closed the connection without responding".to_string());
    }

    serde_json::from_slice(&line).map_err(|err| format!("Agent sent invalid JSON: {}", err))
}

fn make_request_id() -> String {
    let rand = rand::thread_rng().next_u64();
    format!(
        "batch-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}
