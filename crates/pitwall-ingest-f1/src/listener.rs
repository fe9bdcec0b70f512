//! The UDP worker: socket ownership, debouncing, snapshot assembly/emission.
//!
//! Every piece of mutable state lives in [`FeedState`], owned by the worker
//! task alone; consumers only ever see immutable [`LiveState`] copies over
//! the snapshot channel, so no locks guard any of this.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use analysis::aggregate;
use model::{LiveState, SafetyCarStatus, SessionSignals, Weather};
use pitwall_ingest_core::{
    Debounce, DebounceConfig, EmitGate, IngestError, SnapshotTx, StopToken,
};

use crate::decode::{decode, Decoded};
use crate::tracker::CarStateTracker;

/// Largest datagram the feed sends is well under this.
const MAX_DATAGRAM: usize = 2048;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct F1Config {
    /// e.g. "0.0.0.0:20777"
    pub bind_addr: String,
    /// Wire format hint; other plausible formats still decode, the hint
    /// only drives a one-time log line.
    pub expected_format: u16,
    /// Minimum interval between snapshot emissions.
    pub emit_interval_ms: u64,
    /// Receive timeout; bounds how long a stop request can go unnoticed.
    pub recv_timeout_ms: u64,
    pub debounce: DebounceConfig,
}

impl Default for F1Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:20777".into(),
            expected_format: 2025,
            emit_interval_ms: 500,
            recv_timeout_ms: 250,
            debounce: DebounceConfig::default(),
        }
    }
}

/// Decode-side state for one listener worker.
pub struct FeedState {
    tracker: CarStateTracker,
    session: SessionSignals,
    deb_weather: Debounce<Weather>,
    deb_safety_car: Debounce<SafetyCarStatus>,
    deb_rain_now: Debounce<u8>,
    deb_rain_next: Debounce<u8>,
    gate: EmitGate,
    expected_format: u16,
    format_noted: bool,
    consumer_warned: bool,
}

impl FeedState {
    pub fn new(cfg: &F1Config) -> Self {
        Self {
            tracker: CarStateTracker::new(),
            session: SessionSignals::default(),
            deb_weather: Debounce::from_config(cfg.debounce),
            deb_safety_car: Debounce::from_config(cfg.debounce),
            deb_rain_now: Debounce::from_config(cfg.debounce),
            deb_rain_next: Debounce::from_config(cfg.debounce),
            gate: EmitGate::new(Duration::from_millis(cfg.emit_interval_ms)),
            expected_format: cfg.expected_format,
            format_noted: false,
            consumer_warned: false,
        }
    }

    /// Decode one datagram and fold it into session/tracker state.
    /// Malformed input never reaches this far as anything but a no-op.
    pub fn process_datagram(&mut self, raw: &[u8], now: Instant) {
        let Some((hdr, decoded)) = decode(raw) else { return };

        if hdr.packet_format != self.expected_format && !self.format_noted {
            info!(
                format = hdr.packet_format,
                expected = self.expected_format,
                "packet format differs from configured hint"
            );
            self.format_noted = true;
        }

        if self.tracker.note_header(hdr.session_uid, hdr.player_car_index) {
            debug!(session_uid = hdr.session_uid, "new session observed, buffers cleared");
        }
        self.session.session_uid = Some(hdr.session_uid);

        match decoded {
            Decoded::Session(frame) => {
                // forecast and temperatures are replaced wholesale; the four
                // noisy scalars go through their debouncers
                self.session.forecast = frame.forecast;
                if frame.track_temp_c.is_some() {
                    self.session.track_temp_c = frame.track_temp_c;
                }
                if frame.air_temp_c.is_some() {
                    self.session.air_temp_c = frame.air_temp_c;
                }

                let mut changed = false;
                if let Some(w) = frame.weather {
                    if let Some(w) = self.deb_weather.update_at(w, now) {
                        self.session.weather = Some(w);
                        changed = true;
                    }
                }
                if let Some(sc) = frame.safety_car {
                    if let Some(sc) = self.deb_safety_car.update_at(sc, now) {
                        self.session.safety_car = Some(sc);
                        changed = true;
                    }
                }
                if let Some(r) = frame.rain_now_pct {
                    if let Some(r) = self.deb_rain_now.update_at(r, now) {
                        self.session.rain_now_pct = Some(r);
                        changed = true;
                    }
                }
                if let Some(r) = frame.rain_next_pct {
                    if let Some(r) = self.deb_rain_next.update_at(r, now) {
                        self.session.rain_next_pct = Some(r);
                        changed = true;
                    }
                }
                if changed {
                    self.gate.mark_dirty();
                }
            }
            Decoded::LapData(entries) => {
                if self.tracker.apply_lap_data(&entries) {
                    self.gate.mark_dirty();
                }
            }
            Decoded::CarStatus(entries) => {
                if self.tracker.apply_status(&entries) {
                    self.gate.mark_dirty();
                }
            }
            Decoded::Ignored => {}
        }
    }

    /// Deep-copied snapshot of everything consumers may see.
    pub fn snapshot(&self) -> LiveState {
        LiveState {
            session: self.session.clone(),
            player_index: self.tracker.player_index(),
            player: self.tracker.player_reference(),
            fleet: aggregate(&self.tracker.slot_laps()),
            slots: self.tracker.summaries(),
        }
    }

    /// Emit a snapshot if the gate allows it. A vanished consumer is logged
    /// once and must never stop the decode loop.
    pub fn maybe_emit(&mut self, tx: &SnapshotTx, now: Instant) {
        if !self.gate.try_emit_at(now) {
            return;
        }
        if tx.send(self.snapshot()).is_err() && !self.consumer_warned {
            warn!("snapshot consumer disconnected; decoding continues");
            self.consumer_warned = true;
        }
    }

    pub fn session(&self) -> &SessionSignals {
        &self.session
    }
}

pub(crate) async fn bind(addr: &str) -> Result<UdpSocket, IngestError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|e| IngestError::Bind { addr: addr.to_string(), source: e })
}

/// The worker loop. Receive timeouts are steady state (they let the stop
/// token breathe); any other socket error is fatal and reported once to the
/// owner through the returned error.
pub(crate) async fn run_loop(
    socket: UdpSocket,
    cfg: F1Config,
    tx: SnapshotTx,
    stop: StopToken,
) -> Result<(), IngestError> {
    let recv_timeout = Duration::from_millis(cfg.recv_timeout_ms.max(1));
    let mut state = FeedState::new(&cfg);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !stop.is_stopped() {
        match tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)).await {
            Err(_) => {} // receive timeout
            Ok(Err(e)) => {
                warn!(error = %e, "udp receive failed, listener exits");
                return Err(IngestError::Transport(e));
            }
            Ok(Ok((len, _peer))) => state.process_datagram(&buf[..len], Instant::now()),
        }
        state.maybe_emit(&tx, Instant::now());
    }
    info!("f1 udp listener stopped");
    Ok(())
}
