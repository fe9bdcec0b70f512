//! Fleet statistics and wetness fusion for Pitwall

pub mod advisory;
pub mod fusion;

pub use advisory::{decide, compound_class, DecisionContext};
pub use fusion::{
    forecast_time_to_above, forecast_time_to_below, forecast_value_at, BaselineCache,
    EngineConfig, FusionParams, Hysteresis, HysteresisConfig, Ramp, RollingSeries,
    WetnessEngine,
};

use model::{FleetAggregate, TyreClass};

/// Per-car deltas outside this band are spins/out-laps, not signal.
const DELTA_SANE_S: f64 = 10.0;
/// Fleet deltas need at least this many per-car deltas behind them.
const FLEET_MIN_CARS: usize = 3;
/// A per-car delta needs at least this many laps on each compound side.
const SIDE_MIN_LAPS: usize = 2;

pub fn median(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut v = xs.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = v.len();
    if n % 2 == 1 {
        Some(v[n / 2])
    } else {
        Some((v[n / 2 - 1] + v[n / 2]) / 2.0)
    }
}

/// Robust outlier gate for rolling lap buffers.
///
/// Below `min_n` samples everything is accepted. Past that, a candidate must
/// sit within max(`abs_threshold`, 3.5 sigma) of the buffer median, with
/// sigma approximated from the MAD (1.4826 * MAD for normal data).
pub fn robust_accept(buf: &[f64], candidate: f64, min_n: usize, abs_threshold: f64) -> bool {
    if buf.len() < min_n {
        return true;
    }
    let Some(med) = median(buf) else { return true };
    let devs: Vec<f64> = buf.iter().map(|x| (x - med).abs()).collect();
    let Some(mad) = median(&devs) else { return true };
    let sigma = 1.4826 * mad;
    let threshold = abs_threshold.max(3.5 * sigma);
    (candidate - med).abs() <= threshold
}

/// Borrowed view of one participant's tyre class and rolling lap buffers.
#[derive(Clone, Copy, Debug)]
pub struct SlotLaps<'a> {
    pub tyre: Option<TyreClass>,
    pub slick: &'a [f64],
    pub inter: &'a [f64],
    pub wet: &'a [f64],
}

fn per_car_delta(faster_side: &[f64], slower_side: &[f64]) -> Option<f64> {
    if faster_side.len() < SIDE_MIN_LAPS || slower_side.len() < SIDE_MIN_LAPS {
        return None;
    }
    let d = median(faster_side)? - median(slower_side)?;
    (d.abs() < DELTA_SANE_S).then_some(d)
}

fn fleet_median(deltas: &[f64]) -> Option<f64> {
    if deltas.len() < FLEET_MIN_CARS {
        return None;
    }
    median(deltas)
}

/// Fleet-wide counts, shares and pace deltas from all slots.
///
/// Deltas are computed per car first and the fleet value is the median of
/// those, so one outlier driver cannot dominate a pooled comparison.
/// `inter_*` compat fields mean "any non-slick".
pub fn aggregate(slots: &[SlotLaps<'_>]) -> FleetAggregate {
    let mut slick = 0usize;
    let mut inter_only = 0usize;
    let mut wet = 0usize;
    for s in slots {
        match s.tyre {
            Some(TyreClass::Slick) => slick += 1,
            Some(TyreClass::Intermediate) => inter_only += 1,
            Some(TyreClass::Wet) => wet += 1,
            None => {}
        }
    }
    let total = slick + inter_only + wet;
    let inter = inter_only + wet;
    let share = |n: usize| if total > 0 { n as f64 / total as f64 } else { 0.0 };

    let mut deltas_is = Vec::new();
    let mut deltas_wi = Vec::new();
    let mut deltas_ws = Vec::new();
    for s in slots {
        // non-slick side pools inter + wet laps (compat semantics)
        let mut non_slick: Vec<f64> = Vec::with_capacity(s.inter.len() + s.wet.len());
        non_slick.extend_from_slice(s.inter);
        non_slick.extend_from_slice(s.wet);
        if let Some(d) = per_car_delta(&non_slick, s.slick) {
            deltas_is.push(d);
        }
        if let Some(d) = per_car_delta(s.wet, s.inter) {
            deltas_wi.push(d);
        }
        if let Some(d) = per_car_delta(s.wet, s.slick) {
            deltas_ws.push(d);
        }
    }

    FleetAggregate {
        slick_count: slick,
        inter_only_count: inter_only,
        wet_count: wet,
        inter_count: inter,
        inter_share: share(inter),
        inter_only_share: share(inter_only),
        wet_share: share(wet),
        delta_inter_vs_slick_s: fleet_median(&deltas_is),
        delta_wet_vs_inter_s: fleet_median(&deltas_wi),
        delta_wet_vs_slick_s: fleet_median(&deltas_ws),
    }
}

/// The local driver's learned deltas (I-S, W-S, W-I), each requiring two
/// laps per side.
pub fn reference_deltas(
    slick: &[f64],
    inter: &[f64],
    wet: &[f64],
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let pair = |a: &[f64], b: &[f64]| -> Option<f64> {
        if a.len() >= SIDE_MIN_LAPS && b.len() >= SIDE_MIN_LAPS {
            Some(median(a)? - median(b)?)
        } else {
            None
        }
    };
    (pair(inter, slick), pair(wet, slick), pair(wet, inter))
}
