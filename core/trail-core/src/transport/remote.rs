//! Direct delivery to the analytics API, used when the agent is not running.

use std::time::Duration;

use cmdtrail_agent_protocol::BatchPayload;

use super::{Channel, Transport};
use crate::error::{Result, TrailError};

const BATCH_PATH: &str = "/api/v1/commands/batch";
const MAX_ERROR_BODY_CHARS: usize = 200;

pub struct RemoteApiClient {
    url: String,
    auth_token: Option<String>,
    agent: ureq::Agent,
}

impl RemoteApiClient {
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> Self {
        RemoteApiClient {
            url: format!("{}{}", endpoint.trim_end_matches('/'), BATCH_PATH),
            auth_token,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for RemoteApiClient {
    fn channel(&self) -> Channel {
        Channel::RemoteApi
    }

    fn send(&self, payload: &BatchPayload) -> Result<()> {
        let body = serde_json::to_string(payload)
            .map_err(|err| TrailError::json("serialize batch", err))?;

        let mut request = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        if let Some(token) = self.auth_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        match request.send_string(&body) {
            Ok(_) => {
                tracing::debug!(
                    url = %self.url,
                    records = payload.records.len(),
                    "Remote API accepted batch"
                );
                Ok(())
            }
            Err(ureq::Error::Status(code, response)) => {
                let detail = response
                    .into_string()
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_ERROR_BODY_CHARS)
                    .collect::<String>();
                Err(TrailError::Remote(format!("HTTP {}: {}", code, detail)))
            }
            Err(err) => Err(TrailError::Remote(err.to_string())),
        }
    }
}
