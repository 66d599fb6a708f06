//! Batch delivery: local agent first, direct remote call as fallback.
//!
//! ```text
//!                    ┌── probe ready ──→ UnixAgent (agent.sock) ──→ agent forwards later
//! TransportSelector ─┤
//!                    └── not ready ────→ RemoteApiClient (HTTPS, synchronous)
//! ```
//!
//! Both channels implement [`Transport`]. The probe is a bounded-time
//! liveness check, not a circuit breaker; any health tracking lives in the
//! agent. A failed send is returned to the caller as-is: there is no retry
//! loop here, the next sync resends the same window.

mod agent;
mod remote;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use agent::{SocketProbe, UnixAgent};
pub use cmdtrail_agent_protocol::{BatchMetadata, BatchPayload, BatchRecord};
pub use remote::RemoteApiClient;

use crate::config::SyncConfig;
use crate::error::{Result, TrailError};
use crate::storage::StorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    LocalAgent,
    RemoteApi,
}

/// A way to hand a batch off for delivery.
pub trait Transport {
    fn channel(&self) -> Channel;
    fn send(&self, payload: &BatchPayload) -> Result<()>;
}

/// Readiness check for the local agent.
pub trait AgentProbe {
    fn is_ready(&self, socket: &Path, timeout: Duration) -> bool;
}

pub struct TransportSelector {
    probe: Box<dyn AgentProbe>,
    socket: PathBuf,
    probe_timeout: Duration,
    agent: Box<dyn Transport>,
    remote: Option<Box<dyn Transport>>,
}

impl TransportSelector {
    pub fn new(
        probe: Box<dyn AgentProbe>,
        socket: PathBuf,
        probe_timeout: Duration,
        agent: Box<dyn Transport>,
        remote: Option<Box<dyn Transport>>,
    ) -> Self {
        TransportSelector {
            probe,
            socket,
            probe_timeout,
            agent,
            remote,
        }
    }

    /// Wires the production channels from configuration.
    pub fn from_config(config: &SyncConfig, storage: &StorageConfig) -> Self {
        let socket = config.agent_socket_path(storage);
        let remote = config
            .remote_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| {
                Box::new(RemoteApiClient::new(
                    endpoint,
                    config.auth_token.clone(),
                    config.remote_timeout(),
                )) as Box<dyn Transport>
            });

        Self::new(
            Box::new(SocketProbe),
            socket.clone(),
            config.probe_timeout(),
            Box::new(UnixAgent::new(socket, config.agent_send_timeout())),
            remote,
        )
    }

    /// Sends through the agent when it answers the probe, otherwise directly.
    pub fn deliver(&self, payload: &BatchPayload) -> Result<Channel> {
        if self.probe.is_ready(&self.socket, self.probe_timeout) {
            tracing::debug!(socket = %self.socket.display(), "Local agent ready");
            self.agent.send(payload)?;
            return Ok(self.agent.channel());
        }

        let remote = self.remote.as_ref().ok_or(TrailError::NoTransport)?;
        tracing::debug!(
            socket = %self.socket.display(),
            "Local agent not ready; sending directly"
        );
        remote.send(payload)?;
        Ok(remote.channel())
    }
}
