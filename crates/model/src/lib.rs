//! Shared strategy data model used by Pitwall

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of participant slots in the F1 wire format.
pub const MAX_CARS: usize = 22;

/// Coarse tyre classification driving the strategy logic.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum TyreClass {
    Slick,
    Intermediate,
    Wet,
}

impl TyreClass {
    /// Map the game's visual-compound discriminant: 8 is the full wet,
    /// 7 the intermediate, everything else some slick compound.
    pub fn from_visual(raw: u8) -> TyreClass {
        match raw {
            8 => TyreClass::Wet,
            7 => TyreClass::Intermediate,
            _ => TyreClass::Slick,
        }
    }
}

impl fmt::Display for TyreClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TyreClass::Slick => "SLICK",
            TyreClass::Intermediate => "INTER",
            TyreClass::Wet => "WET",
        };
        f.write_str(s)
    }
}

/// Session weather enum as sent on the wire (0..=5).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Weather {
    Clear,
    LightCloud,
    Overcast,
    LightRain,
    HeavyRain,
    Storm,
}

impl Weather {
    pub fn from_raw(raw: u8) -> Option<Weather> {
        Some(match raw {
            0 => Weather::Clear,
            1 => Weather::LightCloud,
            2 => Weather::Overcast,
            3 => Weather::LightRain,
            4 => Weather::HeavyRain,
            5 => Weather::Storm,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }

    /// True once precipitation is actually falling.
    pub fn raining(self) -> bool {
        self >= Weather::LightRain
    }
}

/// Race-control status (0 none, 1 SC, 2 VSC, 3 formation lap).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum SafetyCarStatus {
    None,
    Full,
    Virtual,
    Formation,
}

impl SafetyCarStatus {
    pub fn from_raw(raw: u8) -> Option<SafetyCarStatus> {
        Some(match raw {
            0 => SafetyCarStatus::None,
            1 => SafetyCarStatus::Full,
            2 => SafetyCarStatus::Virtual,
            3 => SafetyCarStatus::Formation,
            _ => return None,
        })
    }

    /// SC and VSC both cut pit time-loss and shift the switch calculus.
    pub fn slows_field(self) -> bool {
        matches!(self, SafetyCarStatus::Full | SafetyCarStatus::Virtual)
    }
}

/// Pit-cycle phase per participant, from the wire pit-status byte.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum PitPhase {
    #[default]
    OnTrack,
    Pitting,
    PendingTyreReveal,
}

impl PitPhase {
    pub fn from_raw(raw: u8) -> PitPhase {
        match raw {
            1 => PitPhase::Pitting,
            2 => PitPhase::PendingTyreReveal,
            _ => PitPhase::OnTrack,
        }
    }

    pub fn in_pit_cycle(self) -> bool {
        !matches!(self, PitPhase::OnTrack)
    }
}

/// Quality marker for a slot's most recent lap-time event.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum LapFlag {
    #[default]
    Ok,
    InLap,
    OutLap,
    TyreSwap,
}

/// One weather-forecast sample, deduplicated by minute offset.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ForecastSample {
    pub time_offset_min: u8,
    pub rain_pct: u8,
    pub weather: Weather,
}

/// Session-level signals, replaced wholesale per valid session packet.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SessionSignals {
    pub session_uid: Option<u64>,
    pub weather: Option<Weather>,
    pub safety_car: Option<SafetyCarStatus>,
    pub rain_now_pct: Option<u8>,
    pub rain_next_pct: Option<u8>,
    pub forecast: Vec<ForecastSample>,
    pub track_temp_c: Option<i8>,
    pub air_temp_c: Option<i8>,
}

impl SessionSignals {
    pub fn under_safety_car(&self) -> bool {
        self.safety_car.map(SafetyCarStatus::slows_field).unwrap_or(false)
    }
}

/// Public per-participant summary included in each snapshot.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SlotSummary {
    pub index: usize,
    pub tyre: Option<TyreClass>,
    pub pit: PitPhase,
    pub last_lap_ms: Option<u32>,
    pub lap_flag: LapFlag,
}

/// Reference-lap sample counts per class for the local driver.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct RefCounts {
    pub slick: usize,
    pub inter: usize,
    pub wet: usize,
}

impl fmt::Display for RefCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S:{} I:{} W:{}", self.slick, self.inter, self.wet)
    }
}

/// Fleet-wide tyre counts, shares and pace deltas.
///
/// `inter`/`inter_share` keep their historical meaning of "any non-slick"
/// (intermediate + wet combined); the split values sit beside them.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct FleetAggregate {
    pub slick_count: usize,
    pub inter_only_count: usize,
    pub wet_count: usize,
    pub inter_count: usize,
    pub inter_share: f64,
    pub inter_only_share: f64,
    pub wet_share: f64,
    pub delta_inter_vs_slick_s: Option<f64>,
    pub delta_wet_vs_inter_s: Option<f64>,
    pub delta_wet_vs_slick_s: Option<f64>,
}

/// The locally-controlled driver's learned reference pace.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PlayerReference {
    pub tyre: Option<TyreClass>,
    pub last_lap_s: Option<f64>,
    pub counts: RefCounts,
    pub delta_inter_vs_slick_s: Option<f64>,
    pub delta_wet_vs_slick_s: Option<f64>,
    pub delta_wet_vs_inter_s: Option<f64>,
}

/// Immutable snapshot delivered to subscribers at the throttled rate.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LiveState {
    pub session: SessionSignals,
    pub player_index: Option<usize>,
    pub player: PlayerReference,
    pub fleet: FleetAggregate,
    pub slots: Vec<SlotSummary>,
}

/// One historical lap row as supplied by the external lap store.
///
/// Shape mirrors the store's per-track query result; this core only ever
/// reads `track`/`tyre`/`lap_time_s` for the baseline pace.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LapRow {
    pub created_at: String,
    pub session: String,
    pub track: String,
    pub tyre: String,
    pub weather: String,
    pub lap_time_s: f64,
    pub fuel_load: Option<f64>,
    pub wear_fl: Option<f64>,
    pub wear_fr: Option<f64>,
    pub wear_rl: Option<f64>,
    pub wear_rr: Option<f64>,
}

/// Collaborator-supplied context for one assessment update.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DriverInputs {
    pub track: String,
    /// Current tyre selection as the UI reports it ("C3", "INTER", "WET", ...).
    pub current_tyre: String,
    pub laps_remaining: u32,
    /// Estimated stationary + lane time lost to a stop, seconds.
    pub pit_loss_s: f64,
    pub your_last_lap_s: Option<f64>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum AdvisoryAction {
    StayOut,
    /// Box within this many laps (>= 1).
    BoxIn(u8),
}

/// A single recommendation with the signal that drove it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Advisory {
    pub action: AdvisoryAction,
    pub target: Option<TyreClass>,
    pub reason: String,
}

impl Advisory {
    pub fn stay(reason: impl Into<String>) -> Advisory {
        Advisory { action: AdvisoryAction::StayOut, target: None, reason: reason.into() }
    }

    pub fn box_in(laps: u8, target: TyreClass, reason: impl Into<String>) -> Advisory {
        Advisory {
            action: AdvisoryAction::BoxIn(laps.max(1)),
            target: Some(target),
            reason: reason.into(),
        }
    }

    pub fn lead_laps(&self) -> Option<u8> {
        match self.action {
            AdvisoryAction::BoxIn(n) => Some(n),
            AdvisoryAction::StayOut => None,
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.action, self.target) {
            (AdvisoryAction::StayOut, _) => write!(f, "STAY OUT - {}", self.reason),
            (AdvisoryAction::BoxIn(n), Some(t)) => {
                write!(f, "BOX IN {} ({}) - {}", n, t, self.reason)
            }
            (AdvisoryAction::BoxIn(n), None) => write!(f, "BOX IN {} - {}", n, self.reason),
        }
    }
}

/// Fused wetness assessment plus the advisory derived from it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Assessment {
    pub advisory: Advisory,
    /// Dry <-> intermediate boundary score, 0..=1.
    pub wetness: f64,
    /// Intermediate <-> full-wet boundary score, 0..=1.
    pub full_wetness: f64,
    pub wet_mode: bool,
    pub full_wet_mode: bool,
    pub confidence: f64,
    pub debug: String,
}
