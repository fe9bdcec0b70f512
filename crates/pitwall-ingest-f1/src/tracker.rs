//! Per-participant tyre and lap state machines.
//!
//! One slot per car, addressed by validated index. Slots survive packet loss
//! and reordering: lap-time events are change-detected against the stored
//! value, compound changes during a pit cycle are buffered until the car is
//! back on track, and rolling pace buffers sit behind a robust outlier gate.

use analysis::{reference_deltas, robust_accept, SlotLaps};
use model::{LapFlag, PitPhase, PlayerReference, RefCounts, SlotSummary, TyreClass, MAX_CARS};

use crate::decode::{LapEntry, StatusEntry};

/// Rolling lap buffers keep this many laps per compound class.
const ROLLING_CAP: usize = 5;
/// A lap at least this much slower than the previous one, right after a
/// compound change, is an out-lap.
const OUTLAP_SLOW_MS: i64 = 8_000;
/// Laps this slow are in-laps/out-laps regardless of history.
const CRAWL_LAP_MS: u32 = 200_000;
/// Outlier gate: filter only once this many laps exist, within max(2.5 s, 3.5 sigma).
const GATE_MIN_SAMPLES: usize = 3;
const GATE_ABS_THRESHOLD_S: f64 = 2.5;
/// Hard plausibility band for the player's reference laps.
const REF_LAP_MIN_S: f64 = 20.0;
const REF_LAP_MAX_S: f64 = 400.0;

#[derive(Debug, Clone, Default)]
struct ClassBuffers {
    slick: Vec<f64>,
    inter: Vec<f64>,
    wet: Vec<f64>,
}

impl ClassBuffers {
    fn get(&self, class: TyreClass) -> &[f64] {
        match class {
            TyreClass::Slick => &self.slick,
            TyreClass::Intermediate => &self.inter,
            TyreClass::Wet => &self.wet,
        }
    }

    fn get_mut(&mut self, class: TyreClass) -> &mut Vec<f64> {
        match class {
            TyreClass::Slick => &mut self.slick,
            TyreClass::Intermediate => &mut self.inter,
            TyreClass::Wet => &mut self.wet,
        }
    }

    /// Gate-then-push; the buffer holds the `ROLLING_CAP` most recent laps.
    fn offer(&mut self, class: TyreClass, lap_s: f64) -> bool {
        let buf = self.get_mut(class);
        if !robust_accept(buf, lap_s, GATE_MIN_SAMPLES, GATE_ABS_THRESHOLD_S) {
            return false;
        }
        buf.push(lap_s);
        if buf.len() > ROLLING_CAP {
            buf.remove(0);
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    last_lap_ms: Option<u32>,
    tyre: Option<TyreClass>,
    pending_tyre: Option<TyreClass>,
    pit: PitPhase,
    ignore_next_lap: bool,
    /// Last lap time before an on-track swap cleared `last_lap_ms`; the
    /// out-lap slowness check compares against it.
    outlap_baseline_ms: Option<u32>,
    lap_flag: LapFlag,
    laps: ClassBuffers,
}

/// All per-participant state plus the local driver's reference buffers.
#[derive(Debug)]
pub struct CarStateTracker {
    slots: Vec<Slot>,
    player_index: Option<usize>,
    session_uid: Option<u64>,
    refs: ClassBuffers,
}

impl Default for CarStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CarStateTracker {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::default(); MAX_CARS],
            player_index: None,
            session_uid: None,
            refs: ClassBuffers::default(),
        }
    }

    pub fn player_index(&self) -> Option<usize> {
        self.player_index
    }

    pub fn session_uid(&self) -> Option<u64> {
        self.session_uid
    }

    /// Record the header of any accepted packet. Returns true when a new
    /// session identifier was observed, which clears every learned buffer
    /// (no carry-over bias between sessions). A reconnect with the same
    /// identifier clears nothing.
    pub fn note_header(&mut self, session_uid: u64, player_car_index: u8) -> bool {
        let idx = usize::from(player_car_index);
        if idx < MAX_CARS {
            self.player_index = Some(idx);
        }
        if self.session_uid == Some(session_uid) {
            return false;
        }
        self.session_uid = Some(session_uid);
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
        self.refs = ClassBuffers::default();
        true
    }

    /// Apply one lap-data packet. Returns true if anything visible changed.
    pub fn apply_lap_data(&mut self, entries: &[LapEntry; MAX_CARS]) -> bool {
        let mut changed = false;
        for (i, entry) in entries.iter().enumerate() {
            let slot = &mut self.slots[i];

            let was_in_pit = slot.pit.in_pit_cycle();
            slot.pit = entry.pit;
            if was_in_pit && !entry.pit.in_pit_cycle() {
                // back on track: commit the compound chosen during the stop
                if let Some(pending) = slot.pending_tyre.take() {
                    if slot.tyre != Some(pending) {
                        slot.tyre = Some(pending);
                        changed = true;
                    }
                }
            }

            let Some(ms) = entry.last_lap_ms else { continue };
            if slot.last_lap_ms == Some(ms) {
                continue;
            }
            let prev_ms = slot.last_lap_ms;
            slot.last_lap_ms = Some(ms);
            changed = true;

            let mut valid = true;
            let mut flag = LapFlag::Ok;

            // pit status flaps across session transitions, so in-lap detection
            // stays conservative: pit phase plus a crawling lap time
            if slot.pit.in_pit_cycle() && ms >= CRAWL_LAP_MS {
                valid = false;
                flag = LapFlag::InLap;
            }

            if slot.ignore_next_lap {
                let baseline = prev_ms.or(slot.outlap_baseline_ms);
                let much_slower = baseline
                    .map(|p| i64::from(ms) - i64::from(p) >= OUTLAP_SLOW_MS)
                    .unwrap_or(false);
                if much_slower || ms >= CRAWL_LAP_MS {
                    valid = false;
                    flag = LapFlag::OutLap;
                }
                // the game often skips the out-lap time entirely, so the first
                // normal-looking lap after a swap is kept; either way the arm
                // flag is consumed by this event
                slot.ignore_next_lap = false;
                slot.outlap_baseline_ms = None;
            }

            slot.lap_flag = flag;

            if !valid {
                continue;
            }
            let lap_s = f64::from(ms) / 1000.0;
            if let Some(class) = slot.tyre {
                slot.laps.offer(class, lap_s);
            }
            if self.player_index == Some(i) && flag == LapFlag::Ok {
                // class unseen this early counts as slick
                let class = slot.tyre.unwrap_or(TyreClass::Slick);
                if (REF_LAP_MIN_S..=REF_LAP_MAX_S).contains(&lap_s) {
                    self.refs.offer(class, lap_s);
                }
            }
        }
        changed
    }

    /// Apply one car-status packet. Returns true if anything visible changed.
    pub fn apply_status(&mut self, entries: &[StatusEntry; MAX_CARS]) -> bool {
        let mut changed = false;
        for (i, entry) in entries.iter().enumerate() {
            let slot = &mut self.slots[i];
            if slot.pit.in_pit_cycle() {
                // hold the reveal until the stop actually happens
                slot.pending_tyre = Some(entry.tyre);
                continue;
            }
            if slot.tyre == Some(entry.tyre) {
                continue;
            }
            let prev = slot.tyre;
            slot.tyre = Some(entry.tyre);
            changed = true;

            // the class often flips before the next lap-time event; the last
            // stored time belongs to the old compound
            slot.outlap_baseline_ms = slot.last_lap_ms;
            slot.last_lap_ms = None;
            slot.lap_flag = LapFlag::TyreSwap;

            if prev.is_some() {
                slot.ignore_next_lap = true;
            }
        }
        changed
    }

    pub fn summaries(&self) -> Vec<SlotSummary> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, s)| SlotSummary {
                index,
                tyre: s.tyre,
                pit: s.pit,
                last_lap_ms: s.last_lap_ms,
                lap_flag: s.lap_flag,
            })
            .collect()
    }

    /// Borrowed per-slot views for the fleet aggregator.
    pub fn slot_laps(&self) -> Vec<SlotLaps<'_>> {
        self.slots
            .iter()
            .map(|s| SlotLaps {
                tyre: s.tyre,
                slick: s.laps.get(TyreClass::Slick),
                inter: s.laps.get(TyreClass::Intermediate),
                wet: s.laps.get(TyreClass::Wet),
            })
            .collect()
    }

    pub fn player_reference(&self) -> PlayerReference {
        let player_slot = self.player_index.and_then(|i| self.slots.get(i));
        let (delta_is, delta_ws, delta_wi) =
            reference_deltas(&self.refs.slick, &self.refs.inter, &self.refs.wet);
        PlayerReference {
            tyre: player_slot.and_then(|s| s.tyre),
            last_lap_s: player_slot
                .and_then(|s| s.last_lap_ms)
                .map(|ms| f64::from(ms) / 1000.0),
            counts: RefCounts {
                slick: self.refs.slick.len(),
                inter: self.refs.inter.len(),
                wet: self.refs.wet.len(),
            },
            delta_inter_vs_slick_s: delta_is,
            delta_wet_vs_slick_s: delta_ws,
            delta_wet_vs_inter_s: delta_wi,
        }
    }

    #[cfg(test)]
    fn slot_buffer(&self, index: usize, class: TyreClass) -> &[f64] {
        self.slots[index].laps.get(class)
    }
}
