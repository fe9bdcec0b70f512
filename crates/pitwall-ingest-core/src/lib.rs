//! Core ingest plumbing shared by Pitwall telemetry sources

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use model::LiveState;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("worker did not stop within {0:?}")]
    StopTimeout(Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SnapshotTx = crossbeam_channel::Sender<LiveState>;
pub type SnapshotRx = crossbeam_channel::Receiver<LiveState>;

pub fn channel() -> (SnapshotTx, SnapshotRx) {
    crossbeam_channel::unbounded()
}

/// Cooperative shutdown flag checked by source workers each receive cycle.
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Trait for any live source connector producing strategy snapshots.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn run(&self, tx: SnapshotTx, stop: StopToken) -> Result<(), IngestError>;
}

/// Spawn a source onto the current tokio runtime.
pub fn spawn_source<S>(
    src: S,
    tx: SnapshotTx,
    stop: StopToken,
) -> tokio::task::JoinHandle<Result<(), IngestError>>
where
    S: TelemetrySource + 'static,
{
    tokio::spawn(async move { src.run(tx, stop).await })
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Consecutive identical readings required before a value is accepted.
    pub n: u32,
    /// Accept a standing candidate after this long even below `n` repeats.
    pub max_age_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { n: 6, max_age_ms: 700 }
    }
}

/// Stabilizes a noisy scalar reading.
///
/// A candidate value must repeat `n` times, or stand for `max_age`, before
/// it becomes the accepted value. `update` returns `Some` exactly once per
/// accepted change, so single noisy frames neither flip the output nor
/// retrigger it.
#[derive(Debug)]
pub struct Debounce<T> {
    n: u32,
    max_age: Duration,
    accepted: Option<T>,
    candidate: Option<T>,
    count: u32,
    since: Instant,
}

impl<T: PartialEq + Copy> Debounce<T> {
    pub fn new(n: u32, max_age: Duration) -> Self {
        Self {
            n: n.max(1),
            max_age,
            accepted: None,
            candidate: None,
            count: 0,
            since: Instant::now(),
        }
    }

    pub fn from_config(cfg: DebounceConfig) -> Self {
        Self::new(cfg.n, Duration::from_millis(cfg.max_age_ms))
    }

    pub fn accepted(&self) -> Option<T> {
        self.accepted
    }

    pub fn update(&mut self, value: T) -> Option<T> {
        self.update_at(value, Instant::now())
    }

    pub fn update_at(&mut self, value: T, now: Instant) -> Option<T> {
        if self.accepted == Some(value) {
            // reading agrees with the published state; drop any rival candidate
            self.candidate = None;
            self.count = 0;
            return None;
        }
        match self.candidate {
            Some(c) if c == value => {
                self.count += 1;
                if self.count >= self.n || now.duration_since(self.since) >= self.max_age {
                    self.accepted = Some(value);
                    self.candidate = None;
                    self.count = 0;
                    return Some(value);
                }
                None
            }
            _ => {
                self.candidate = Some(value);
                self.count = 1;
                self.since = now;
                None
            }
        }
    }
}

/// Coalesces high-rate mutations into rate-limited emissions.
///
/// Mutations mark the gate dirty; `try_emit_at` fires only when dirty and
/// the minimum interval has passed since the previous emission.
#[derive(Debug)]
pub struct EmitGate {
    min_interval: Duration,
    dirty: bool,
    last_emit: Option<Instant>,
}

impl EmitGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, dirty: false, last_emit: None }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn try_emit(&mut self) -> bool {
        self.try_emit_at(Instant::now())
    }

    pub fn try_emit_at(&mut self, now: Instant) -> bool {
        if !self.dirty {
            return false;
        }
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.dirty = false;
        self.last_emit = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Instant {
        Instant::now()
    }

    #[test]
    fn debounce_holds_below_threshold() {
        let mut d = Debounce::new(6, Duration::from_millis(700));
        let now = t0();
        for _ in 0..5 {
            assert_eq!(d.update_at(3u8, now), None);
        }
        assert_eq!(d.accepted(), None);
    }

    #[test]
    fn debounce_emits_exactly_once_at_threshold() {
        let mut d = Debounce::new(6, Duration::from_millis(700));
        let now = t0();
        for _ in 0..5 {
            assert_eq!(d.update_at(3u8, now), None);
        }
        assert_eq!(d.update_at(3u8, now), Some(3));
        // further identical readings are silent
        assert_eq!(d.update_at(3u8, now), None);
        assert_eq!(d.accepted(), Some(3));
    }

    #[test]
    fn debounce_single_wobble_does_not_flip() {
        let mut d = Debounce::new(3, Duration::from_millis(700));
        let now = t0();
        for _ in 0..3 {
            d.update_at(1u8, now);
        }
        assert_eq!(d.accepted(), Some(1));
        assert_eq!(d.update_at(2, now), None);
        assert_eq!(d.update_at(1, now), None);
        assert_eq!(d.accepted(), Some(1));
    }

    #[test]
    fn debounce_max_age_accepts_standing_candidate() {
        let mut d = Debounce::new(10, Duration::from_millis(700));
        let now = t0();
        assert_eq!(d.update_at(4u8, now), None);
        let later = now + Duration::from_millis(800);
        assert_eq!(d.update_at(4, later), Some(4));
    }

    #[test]
    fn debounce_new_value_resets_counter() {
        let mut d = Debounce::new(3, Duration::from_secs(60));
        let now = t0();
        d.update_at(1u8, now);
        d.update_at(1, now);
        d.update_at(2, now); // rival candidate resets progress
        d.update_at(1, now);
        assert_eq!(d.update_at(1, now), None);
        assert_eq!(d.update_at(1, now), Some(1));
    }

    #[test]
    fn emit_gate_requires_dirty() {
        let mut g = EmitGate::new(Duration::from_millis(500));
        assert!(!g.try_emit_at(t0()));
    }

    #[test]
    fn emit_gate_rate_limits() {
        let mut g = EmitGate::new(Duration::from_millis(500));
        let now = t0();
        g.mark_dirty();
        assert!(g.try_emit_at(now));
        g.mark_dirty();
        assert!(!g.try_emit_at(now + Duration::from_millis(200)));
        assert!(g.try_emit_at(now + Duration::from_millis(500)));
        assert!(!g.try_emit_at(now + Duration::from_millis(1100)));
    }
}
