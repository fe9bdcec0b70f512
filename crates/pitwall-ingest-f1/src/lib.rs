//! F1 UDP strategy source for Pitwall.
//!
//! Listens for EA/Codemasters F1 binary UDP packets, reconstructs per-car
//! tyre/lap state and session signals, and emits throttled immutable
//! [`model::LiveState`] snapshots over the core snapshot channel. Feed the
//! snapshots to [`analysis::WetnessEngine`] for the switch advisory.

pub mod decode;
pub mod listener;
pub mod tracker;

pub use listener::{F1Config, FeedState};
pub use tracker::CarStateTracker;

use std::net::SocketAddr;
use std::time::Duration;

use tracing::info;

use pitwall_ingest_core::{
    channel, IngestError, SnapshotRx, SnapshotTx, StopToken, TelemetrySource,
};

/// The F1 UDP source, usable through the [`TelemetrySource`] trait.
pub struct F1Source {
    cfg: F1Config,
}

impl F1Source {
    pub fn new(cfg: F1Config) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl TelemetrySource for F1Source {
    async fn run(&self, tx: SnapshotTx, stop: StopToken) -> Result<(), IngestError> {
        let socket = listener::bind(&self.cfg.bind_addr).await?;
        info!(addr = %self.cfg.bind_addr, "f1 udp listener bound");
        listener::run_loop(socket, self.cfg.clone(), tx, stop).await
    }
}

/// A running listener: bind-on-start, caller-owned subscription, bounded stop.
pub struct F1Listener {
    stop: StopToken,
    handle: tokio::task::JoinHandle<Result<(), IngestError>>,
    local_addr: SocketAddr,
}

impl F1Listener {
    /// Bind the socket and spawn the worker task, handing back the snapshot
    /// receiver (clone it for further subscribers). A bind failure is a
    /// fatal startup error, reported here and never retried. Dropping every
    /// receiver never stops the worker; it only mutes emissions.
    pub async fn start(cfg: F1Config) -> Result<(F1Listener, SnapshotRx), IngestError> {
        let socket = listener::bind(&cfg.bind_addr).await?;
        let local_addr = socket.local_addr().map_err(IngestError::Transport)?;
        info!(addr = %local_addr, "f1 udp listener bound");
        let (tx, rx) = channel();
        let stop = StopToken::new();
        let handle = tokio::spawn(listener::run_loop(socket, cfg, tx, stop.clone()));
        Ok((Self { stop, handle, local_addr }, rx))
    }

    /// The bound address (useful when the config asked for port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the worker and join it within `timeout`, surfacing the
    /// worker's terminal error if it had one.
    pub async fn stop(self, timeout: Duration) -> Result<(), IngestError> {
        self.stop.stop();
        match tokio::time::timeout(timeout, self.handle).await {
            Err(_) => Err(IngestError::StopTimeout(timeout)),
            Ok(Err(join)) => Err(IngestError::Other(anyhow::Error::new(join))),
            Ok(Ok(result)) => result,
        }
    }
}
