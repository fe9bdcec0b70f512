//! Maps compound class, mode flags and scored signals to a recommendation

use model::{Advisory, TyreClass};

/// Everything the decision table looks at for one tick.
#[derive(Clone, Debug)]
pub struct DecisionContext {
    pub tyre: Option<TyreClass>,
    pub laps_remaining: u32,
    pub wet_mode: bool,
    pub full_wet_mode: bool,
    pub wetness: f64,
    pub full_wetness: f64,
    pub delta_is_med: Option<f64>,
    pub delta_wi_med: Option<f64>,
    pub rain_next_med: Option<f64>,
    pub inter_share_med: Option<f64>,
    pub weather_raining: bool,
    pub under_sc: bool,
    pub drying_soon: bool,
}

/// Classify the UI's tyre string: slick compounds come through as "C1".."C5"
/// (or "SLICK"/"DRY"), the rain tyres by name. Unrecognised strings fall
/// into the non-slick handling, like the source UI did.
pub fn compound_class(s: &str) -> Option<TyreClass> {
    let t = s.trim().to_uppercase();
    if t.is_empty() {
        return None;
    }
    if t.starts_with('C') || t == "SLICK" || t == "DRY" {
        return Some(TyreClass::Slick);
    }
    if t.contains("INTER") {
        return Some(TyreClass::Intermediate);
    }
    if t.contains("WET") {
        return Some(TyreClass::Wet);
    }
    None
}

/// Pure decision table. Lead times shrink under SC/VSC (cheap stop) and as
/// the driving score passes its urgency threshold.
pub fn decide(ctx: &DecisionContext) -> Advisory {
    if ctx.laps_remaining <= 1 {
        return Advisory::stay("Race ending: one lap or less remaining.");
    }

    if ctx.tyre == Some(TyreClass::Slick) {
        if !ctx.wet_mode {
            return Advisory::stay("Wetness not high enough for intermediates.");
        }
        if ctx.drying_soon && ctx.wetness <= 0.80 && !ctx.under_sc {
            return Advisory::stay("Forecast: wet phase looks short, staying out on slicks.");
        }
        if ctx.delta_is_med.map(|d| d < -0.30).unwrap_or(false) {
            return Advisory::box_in(
                1,
                TyreClass::Intermediate,
                "Field pace: intermediates already faster than slicks.",
            );
        }
        let mut lead = if ctx.wetness > 0.80 { 1 } else { 2 };
        if ctx.under_sc {
            lead = 1;
        }
        return Advisory::box_in(
            lead,
            TyreClass::Intermediate,
            "Wetness trend suggests switching to intermediates.",
        );
    }

    // on intermediates, full wets, or an unrecognised selection
    let is_inter = ctx.tyre == Some(TyreClass::Intermediate);
    let is_wet = ctx.tyre == Some(TyreClass::Wet);

    let mut advisory = if is_inter && ctx.full_wet_mode {
        if ctx.delta_wi_med.map(|d| d < -0.20).unwrap_or(false) {
            Advisory::box_in(
                1,
                TyreClass::Wet,
                "Field pace: full wets already faster than intermediates.",
            )
        } else {
            let mut lead = if ctx.full_wetness > 0.85 { 1 } else { 2 };
            if ctx.under_sc {
                lead = 1;
            }
            Advisory::box_in(lead, TyreClass::Wet, "Rain intensity suggests switching to full wets.")
        }
    } else if is_wet && !ctx.full_wet_mode && ctx.wet_mode {
        Advisory::box_in(
            1,
            TyreClass::Intermediate,
            "Conditions easing: intermediates cover the remaining wetness.",
        )
    } else if !ctx.wet_mode && !ctx.weather_raining {
        let low_rain = ctx.rain_next_med.map(|r| r < 25.0).unwrap_or(false);
        let low_share = ctx.inter_share_med.map(|s| s < 0.20).unwrap_or(false);
        if low_rain && low_share {
            Advisory::box_in(
                1,
                TyreClass::Slick,
                "Drying: low forecast rain and few cars left on wet tyres.",
            )
        } else {
            Advisory::box_in(2, TyreClass::Slick, "Drying trend suggests slicks soon.")
        }
    } else if is_wet {
        Advisory::stay("Stay on full wets: wet mode still active.")
    } else {
        Advisory::stay("Stay on intermediates: wet mode still active.")
    };

    if ctx.drying_soon && !ctx.under_sc && ctx.laps_remaining > 3 {
        advisory = Advisory::stay("Forecast: drying soon, avoid an unnecessary tyre change.");
    }
    advisory
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::AdvisoryAction;

    fn ctx(tyre: Option<TyreClass>) -> DecisionContext {
        DecisionContext {
            tyre,
            laps_remaining: 20,
            wet_mode: false,
            full_wet_mode: false,
            wetness: 0.0,
            full_wetness: 0.0,
            delta_is_med: None,
            delta_wi_med: None,
            rain_next_med: None,
            inter_share_med: None,
            weather_raining: false,
            under_sc: false,
            drying_soon: false,
        }
    }

    #[test]
    fn compound_class_parses_ui_strings() {
        assert_eq!(compound_class("C3"), Some(TyreClass::Slick));
        assert_eq!(compound_class("slick"), Some(TyreClass::Slick));
        assert_eq!(compound_class("Intermediate"), Some(TyreClass::Intermediate));
        assert_eq!(compound_class("WET"), Some(TyreClass::Wet));
        assert_eq!(compound_class(""), None);
        assert_eq!(compound_class("banana"), None);
    }

    #[test]
    fn race_ending_always_stays_out() {
        let mut c = ctx(Some(TyreClass::Slick));
        c.laps_remaining = 1;
        c.wet_mode = true;
        c.wetness = 1.0;
        assert_eq!(decide(&c).action, AdvisoryAction::StayOut);
    }

    #[test]
    fn slick_without_wet_mode_stays_out() {
        let out = decide(&ctx(Some(TyreClass::Slick)));
        assert_eq!(out.action, AdvisoryAction::StayOut);
        assert!(!out.reason.is_empty());
    }

    #[test]
    fn slick_wet_mode_confident_delta_boxes_now() {
        let mut c = ctx(Some(TyreClass::Slick));
        c.wet_mode = true;
        c.delta_is_med = Some(-0.5);
        let out = decide(&c);
        assert_eq!(out.action, AdvisoryAction::BoxIn(1));
        assert_eq!(out.target, Some(TyreClass::Intermediate));
    }

    #[test]
    fn slick_wet_mode_lead_time_follows_wetness_and_sc() {
        let mut c = ctx(Some(TyreClass::Slick));
        c.wet_mode = true;
        c.wetness = 0.70;
        assert_eq!(decide(&c).action, AdvisoryAction::BoxIn(2));
        c.wetness = 0.85;
        assert_eq!(decide(&c).action, AdvisoryAction::BoxIn(1));
        c.wetness = 0.70;
        c.under_sc = true;
        assert_eq!(decide(&c).action, AdvisoryAction::BoxIn(1));
    }

    #[test]
    fn slick_short_wet_phase_override() {
        let mut c = ctx(Some(TyreClass::Slick));
        c.wet_mode = true;
        c.wetness = 0.80;
        c.drying_soon = true;
        assert_eq!(decide(&c).action, AdvisoryAction::StayOut);
        // under SC the cheap stop wins over waiting
        c.under_sc = true;
        assert_eq!(decide(&c).action, AdvisoryAction::BoxIn(1));
        // extreme wetness also disables the override
        c.under_sc = false;
        c.wetness = 0.90;
        assert!(matches!(decide(&c).action, AdvisoryAction::BoxIn(_)));
    }

    #[test]
    fn inter_full_wet_mode_calls_for_wets() {
        let mut c = ctx(Some(TyreClass::Intermediate));
        c.wet_mode = true;
        c.full_wet_mode = true;
        c.delta_wi_med = Some(-0.4);
        let out = decide(&c);
        assert_eq!(out.action, AdvisoryAction::BoxIn(1));
        assert_eq!(out.target, Some(TyreClass::Wet));
    }

    #[test]
    fn wet_with_easing_conditions_steps_down_to_inters() {
        let mut c = ctx(Some(TyreClass::Wet));
        c.wet_mode = true;
        c.full_wet_mode = false;
        let out = decide(&c);
        assert_eq!(out.action, AdvisoryAction::BoxIn(1));
        assert_eq!(out.target, Some(TyreClass::Intermediate));
    }

    #[test]
    fn inter_when_dry_returns_to_slicks_with_short_lead() {
        let mut c = ctx(Some(TyreClass::Intermediate));
        c.rain_next_med = Some(10.0);
        c.inter_share_med = Some(0.05);
        let out = decide(&c);
        assert_eq!(out.action, AdvisoryAction::BoxIn(1));
        assert_eq!(out.target, Some(TyreClass::Slick));

        // without both low-rain and low-share evidence the lead stretches
        c.inter_share_med = Some(0.5);
        assert_eq!(decide(&c).action, AdvisoryAction::BoxIn(2));
    }

    #[test]
    fn inter_holds_station_while_wet_mode_active() {
        let mut c = ctx(Some(TyreClass::Intermediate));
        c.wet_mode = true;
        assert_eq!(decide(&c).action, AdvisoryAction::StayOut);
    }

    #[test]
    fn drying_soon_overrides_non_slick_box_call() {
        let mut c = ctx(Some(TyreClass::Intermediate));
        c.wet_mode = true;
        c.full_wet_mode = true;
        c.full_wetness = 0.9;
        c.drying_soon = true;
        assert_eq!(decide(&c).action, AdvisoryAction::StayOut);
        // not with only three laps left: the change pays for itself
        c.laps_remaining = 3;
        assert!(matches!(decide(&c).action, AdvisoryAction::BoxIn(_)));
    }

    #[test]
    fn every_branch_carries_a_reason() {
        let mut cases = Vec::new();
        for tyre in [None, Some(TyreClass::Slick), Some(TyreClass::Intermediate), Some(TyreClass::Wet)] {
            for wet in [false, true] {
                for full in [false, true] {
                    let mut c = ctx(tyre);
                    c.wet_mode = wet;
                    c.full_wet_mode = full;
                    cases.push(decide(&c));
                }
            }
        }
        assert!(cases.iter().all(|a| !a.reason.is_empty()));
    }
}
