//! Wetness fusion: rolling medians, weighted scoring, hysteresis, baseline pace

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use model::{Assessment, DriverInputs, ForecastSample, LapRow, LiveState};

use crate::advisory::{compound_class, decide, DecisionContext};
use crate::median;

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Time-windowed sample buffer reduced by median, robust to single bad frames.
#[derive(Debug)]
pub struct RollingSeries {
    window: Duration,
    samples: VecDeque<(Instant, f64)>,
}

impl RollingSeries {
    pub fn new(window: Duration) -> Self {
        Self { window, samples: VecDeque::new() }
    }

    pub fn push_at(&mut self, now: Instant, value: Option<f64>) {
        if let Some(v) = value {
            self.samples.push_back((now, v));
        }
        if let Some(cutoff) = now.checked_sub(self.window) {
            while self.samples.front().map(|(t, _)| *t < cutoff).unwrap_or(false) {
                self.samples.pop_front();
            }
        }
    }

    pub fn median(&self) -> Option<f64> {
        let values: Vec<f64> = self.samples.iter().map(|(_, v)| *v).collect();
        median(&values)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Linear ramp from 0 at `start` to 1 at `start + span`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Ramp {
    pub start: f64,
    pub span: f64,
}

impl Ramp {
    pub fn score(self, x: f64) -> f64 {
        clamp01((x - self.start) / self.span)
    }
}

/// Named weight/threshold set for one fusion pass.
///
/// Instantiated twice: once for the dry/intermediate boundary and once, with
/// narrower ramps, for the intermediate/full-wet boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FusionParams {
    /// Partial score per weather enum value (0..=5).
    pub weather_steps: [f64; 6],
    pub share: Ramp,
    /// Applied to the negated pace delta (positive = non-slick faster).
    pub pace: Ramp,
    pub rain: Ramp,
    pub baseline: Option<Ramp>,
    pub w_weather: f64,
    pub w_pace: f64,
    pub w_share: f64,
    pub w_rain: f64,
    pub w_baseline: f64,
    /// The fused score is floored at `weather_score * floor_factor`: a hard
    /// game-state signal must not be contradicted by the softer average.
    pub floor_factor: f64,
}

impl FusionParams {
    pub fn wetness() -> Self {
        Self {
            weather_steps: [0.0, 0.0, 0.0, 0.45, 0.80, 0.95],
            share: Ramp { start: 0.15, span: 0.35 },
            pace: Ramp { start: 0.5, span: 2.0 },
            rain: Ramp { start: 35.0, span: 35.0 },
            baseline: Some(Ramp { start: 0.7, span: 2.0 }),
            w_weather: 0.30,
            w_pace: 0.35,
            w_share: 0.25,
            w_rain: 0.20,
            w_baseline: 0.20,
            floor_factor: 1.0,
        }
    }

    pub fn full_wetness() -> Self {
        Self {
            weather_steps: [0.0, 0.0, 0.0, 0.0, 0.75, 0.95],
            share: Ramp { start: 0.05, span: 0.25 },
            pace: Ramp { start: 0.20, span: 1.30 },
            rain: Ramp { start: 60.0, span: 30.0 },
            baseline: None,
            w_weather: 0.35,
            w_pace: 0.35,
            w_share: 0.25,
            w_rain: 0.20,
            w_baseline: 0.0,
            floor_factor: 0.85,
        }
    }

    pub fn scores(
        &self,
        weather_med: Option<f64>,
        share_med: Option<f64>,
        delta_med: Option<f64>,
        rain_med: Option<f64>,
        baseline_loss: Option<f64>,
    ) -> PartialScores {
        PartialScores {
            weather: weather_med.map(|w| {
                let idx = (w.max(0.0).floor() as usize).min(5);
                self.weather_steps[idx]
            }),
            share: share_med.map(|x| self.share.score(x)),
            pace: delta_med.map(|d| self.pace.score(-d)),
            rain: rain_med.map(|r| self.rain.score(r)),
            baseline: match self.baseline {
                Some(ramp) => baseline_loss.map(|l| ramp.score(l)),
                None => None,
            },
        }
    }

    /// Weighted average over the signals that are actually available;
    /// missing ones drop out of numerator and denominator alike.
    pub fn fuse(&self, s: &PartialScores) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        let mut add = |sig: Option<f64>, w: f64| {
            if let Some(v) = sig {
                num += v * w;
                den += w;
            }
        };
        add(s.weather, self.w_weather);
        add(s.pace, self.w_pace);
        add(s.share, self.w_share);
        add(s.rain, self.w_rain);
        add(s.baseline, self.w_baseline);
        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }
}

/// Independent partial scores in [0,1]; `None` means no evidence.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PartialScores {
    pub weather: Option<f64>,
    pub share: Option<f64>,
    pub pace: Option<f64>,
    pub rain: Option<f64>,
    pub baseline: Option<f64>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct HysteresisConfig {
    pub on_threshold: f64,
    pub off_threshold: f64,
    pub hold_on: u32,
    pub hold_off: u32,
}

/// Two-threshold mode gate with separate entry/exit hold counts.
///
/// Leaving the elevated mode requires more consecutive evidence than
/// entering it, biasing toward caution when downgrading from wet settings.
#[derive(Clone, Debug)]
pub struct Hysteresis {
    cfg: HysteresisConfig,
    on_count: u32,
    off_count: u32,
    active: bool,
}

impl Hysteresis {
    pub fn new(cfg: HysteresisConfig) -> Self {
        Self { cfg, on_count: 0, off_count: 0, active: false }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn observe(&mut self, score: f64) -> bool {
        if score >= self.cfg.on_threshold {
            self.on_count += 1;
            self.off_count = 0;
        } else if score <= self.cfg.off_threshold {
            self.off_count += 1;
            self.on_count = 0;
        } else {
            // dead zone: counters decay, they do not reset
            self.on_count = self.on_count.saturating_sub(1);
            self.off_count = self.off_count.saturating_sub(1);
        }
        if !self.active && self.on_count >= self.cfg.hold_on {
            self.active = true;
        }
        if self.active && self.off_count >= self.cfg.hold_off {
            self.active = false;
        }
        self.active
    }

    pub fn reset(&mut self) {
        self.on_count = 0;
        self.off_count = 0;
        self.active = false;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub window_s: f64,
    pub min_samples: usize,
    pub wet: HysteresisConfig,
    pub full_wet: HysteresisConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_s: 20.0,
            min_samples: 4,
            wet: HysteresisConfig {
                on_threshold: 0.65,
                off_threshold: 0.35,
                hold_on: 2,
                hold_off: 3,
            },
            full_wet: HysteresisConfig {
                on_threshold: 0.78,
                off_threshold: 0.55,
                hold_on: 2,
                hold_off: 3,
            },
        }
    }
}

/// Rain % at or after `t_min` minutes (stepwise; last known beyond horizon).
pub fn forecast_value_at(fc: &[ForecastSample], t_min: u8) -> Option<u8> {
    for s in fc {
        if s.time_offset_min >= t_min {
            return Some(s.rain_pct);
        }
    }
    fc.last().map(|s| s.rain_pct)
}

/// First minute where forecast rain is at or below `threshold`.
pub fn forecast_time_to_below(fc: &[ForecastSample], threshold: u8) -> Option<u8> {
    fc.iter().find(|s| s.rain_pct <= threshold).map(|s| s.time_offset_min)
}

/// First minute where forecast rain is at or above `threshold`.
pub fn forecast_time_to_above(fc: &[ForecastSample], threshold: u8) -> Option<u8> {
    fc.iter().find(|s| s.rain_pct >= threshold).map(|s| s.time_offset_min)
}

/// Expected pace per (track, tyre) from historical lap rows, median-based,
/// refreshed at most every 10 seconds.
#[derive(Debug)]
pub struct BaselineCache {
    ttl: Duration,
    cache: HashMap<(String, String), (Instant, f64)>,
}

impl Default for BaselineCache {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(10), cache: HashMap::new() }
    }
}

impl BaselineCache {
    pub fn expected_pace_at(
        &mut self,
        track: &str,
        tyre: &str,
        rows: &[LapRow],
        now: Instant,
    ) -> Option<f64> {
        let track_key = track.trim().to_string();
        let tyre_key = tyre.trim().to_uppercase();
        if track_key.is_empty() || tyre_key.is_empty() {
            return None;
        }
        let key = (track_key.clone(), tyre_key.clone());
        if let Some((stamp, value)) = self.cache.get(&key) {
            if now.duration_since(*stamp) < self.ttl {
                return Some(*value);
            }
        }
        let times: Vec<f64> = rows
            .iter()
            .filter(|r| {
                r.track.trim() == track_key
                    && r.tyre.trim().to_uppercase() == tyre_key
                    // ignore obviously broken laps
                    && r.lap_time_s > 10.0
                    && r.lap_time_s < 400.0
            })
            .map(|r| r.lap_time_s)
            .collect();
        let med = median(&times)?;
        self.cache.insert(key, (now, med));
        Some(med)
    }
}

/// Stateful fusion engine: two scored boundaries, each behind its own
/// hysteresis gate, fed from rolling medians of fleet and session signals.
#[derive(Debug)]
pub struct WetnessEngine {
    cfg: EngineConfig,
    params: FusionParams,
    fw_params: FusionParams,
    inter_share: RollingSeries,
    delta_is: RollingSeries,
    rain_next: RollingSeries,
    track_temp: RollingSeries,
    weather: RollingSeries,
    wet_share: RollingSeries,
    delta_wi: RollingSeries,
    wet_gate: Hysteresis,
    fw_gate: Hysteresis,
    baseline: BaselineCache,
}

impl Default for WetnessEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl WetnessEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        let window = Duration::from_secs_f64(cfg.window_s);
        Self {
            wet_gate: Hysteresis::new(cfg.wet),
            fw_gate: Hysteresis::new(cfg.full_wet),
            cfg,
            params: FusionParams::wetness(),
            fw_params: FusionParams::full_wetness(),
            inter_share: RollingSeries::new(window),
            delta_is: RollingSeries::new(window),
            rain_next: RollingSeries::new(window),
            track_temp: RollingSeries::new(window),
            weather: RollingSeries::new(window),
            wet_share: RollingSeries::new(window),
            delta_wi: RollingSeries::new(window),
            baseline: BaselineCache::default(),
        }
    }

    pub fn wet_mode(&self) -> bool {
        self.wet_gate.active()
    }

    pub fn full_wet_mode(&self) -> bool {
        self.fw_gate.active()
    }

    pub fn update(
        &mut self,
        state: &LiveState,
        inputs: &DriverInputs,
        rows: &[LapRow],
    ) -> Assessment {
        self.update_at(state, inputs, rows, Instant::now())
    }

    pub fn update_at(
        &mut self,
        state: &LiveState,
        inputs: &DriverInputs,
        rows: &[LapRow],
        now: Instant,
    ) -> Assessment {
        let sig = &state.session;

        self.inter_share.push_at(now, Some(state.fleet.inter_share));
        self.delta_is.push_at(now, state.fleet.delta_inter_vs_slick_s);
        self.rain_next.push_at(now, sig.rain_next_pct.map(f64::from));
        self.track_temp.push_at(now, sig.track_temp_c.map(f64::from));
        self.weather.push_at(now, sig.weather.map(|w| f64::from(w.as_raw())));
        self.wet_share.push_at(now, Some(state.fleet.wet_share));
        self.delta_wi.push_at(now, state.fleet.delta_wet_vs_inter_s);

        let inter_share_med = self.inter_share.median();
        let delta_is_med = self.delta_is.median();
        let rain_next_med = self.rain_next.median();
        let track_temp_med = self.track_temp.median();
        let weather_med = self.weather.median();
        let wet_share_med = self.wet_share.median();
        let delta_wi_med = self.delta_wi.median();

        let fc = &sig.forecast;
        let drying_soon = forecast_time_to_below(fc, 25).map(|t| t <= 15).unwrap_or(false);
        let heavy_incoming = forecast_time_to_above(fc, 60).map(|t| t <= 10).unwrap_or(false);

        let expected =
            self.baseline.expected_pace_at(&inputs.track, &inputs.current_tyre, rows, now);
        let baseline_loss = match (expected, inputs.your_last_lap_s) {
            (Some(e), Some(l)) => Some(l - e),
            _ => None,
        };

        let scores = self.params.scores(
            weather_med,
            inter_share_med,
            delta_is_med,
            rain_next_med,
            baseline_loss,
        );
        let mut wetness = self.params.fuse(&scores);
        if let Some(t) = track_temp_med {
            // cooler track: slightly earlier switch, capped at +0.08
            wetness += clamp01((22.0 - t) / 18.0) * 0.08;
        }
        wetness = clamp01(wetness);
        if let Some(w0) = scores.weather {
            wetness = wetness.max(w0 * self.params.floor_factor);
        }

        let fw_scores =
            self.fw_params.scores(weather_med, wet_share_med, delta_wi_med, rain_next_med, None);
        let mut full_wetness = self.fw_params.fuse(&fw_scores);
        if let Some(w0) = fw_scores.weather {
            full_wetness = full_wetness.max(w0 * self.fw_params.floor_factor);
        }
        full_wetness = clamp01(full_wetness);
        if heavy_incoming {
            full_wetness = (full_wetness + 0.10).min(1.0);
        }

        let n_signals = [scores.share, scores.pace, scores.rain, scores.baseline]
            .iter()
            .filter(|s| s.is_some())
            .count();
        let n_samples = self.rain_next.len() + self.delta_is.len() + self.inter_share.len();
        let sample_fill = clamp01(n_samples as f64 / (self.cfg.min_samples * 3) as f64);
        let mut confidence = clamp01(0.15 + 0.20 * n_signals as f64 + 0.15 * sample_fill);

        let under_sc = sig.under_safety_car();
        if under_sc {
            // risk tolerance for an early switch is lower behind the SC
            wetness = clamp01(wetness + 0.06);
            confidence = clamp01(confidence + 0.05);
        }

        let wet_mode = self.wet_gate.observe(wetness);
        let full_wet_mode = if wet_mode {
            self.fw_gate.observe(full_wetness)
        } else {
            self.fw_gate.reset();
            false
        };

        let ctx = DecisionContext {
            tyre: compound_class(&inputs.current_tyre),
            laps_remaining: inputs.laps_remaining,
            wet_mode,
            full_wet_mode,
            wetness,
            full_wetness,
            delta_is_med,
            delta_wi_med,
            rain_next_med,
            inter_share_med,
            weather_raining: weather_med.map(|w| w >= 3.0).unwrap_or(false),
            under_sc,
            drying_soon,
        };
        let advisory = decide(&ctx);

        let debug = format!(
            "wetness={:.2} conf={:.2} mode={} fullwet={} fwScore={:.2} | \
             share(I+W)={} share(W)={} dI-S={} dW-I={} rainNext={} trackT={} baseLoss={}",
            wetness,
            confidence,
            if wet_mode { "INTER" } else { "DRY" },
            if full_wet_mode { "ON" } else { "OFF" },
            full_wetness,
            opt_fmt(inter_share_med, 3),
            opt_fmt(wet_share_med, 3),
            opt_fmt(delta_is_med, 2),
            opt_fmt(delta_wi_med, 2),
            opt_fmt(rain_next_med, 1),
            opt_fmt(track_temp_med, 1),
            opt_fmt(baseline_loss, 2),
        );

        Assessment {
            advisory,
            wetness,
            full_wetness,
            wet_mode,
            full_wet_mode,
            confidence,
            debug,
        }
    }
}

fn opt_fmt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) => format!("{x:.decimals$}"),
        None => "-".to_string(),
    }
}
