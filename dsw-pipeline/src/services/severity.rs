//! Severity scoring
//!
//! `score` is pure: base severity in, signals in, clamped severity out. The
//! caller decides the base (analyzer or keyword heuristic) and skips the
//! adjustment entirely when signals could not be fetched.

use chrono::{DateTime, Duration, Utc};

use crate::adapters::Signals;
use crate::rules::RuleTable;
use dsw_common::time::clamp_unit;

pub const ACTIVE_WARNING_BONUS: f32 = 0.4;
pub const SEISMIC_BONUS: f32 = 0.3;
pub const STORM_FORECAST_BONUS: f32 = 0.2;

/// Quakes at or above this magnitude count toward the seismic bonus
pub const SEISMIC_MIN_MAGNITUDE: f32 = 4.0;

/// Quakes older than this are ignored
pub fn seismic_lookback() -> Duration {
    Duration::hours(24)
}

/// Which adjustments applied; logged alongside the final score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Adjustments {
    pub active_warning: bool,
    pub recent_quake: bool,
    pub storm_forecast: bool,
}

fn covers(area: Option<&str>, location: &str) -> bool {
    area.map_or(true, |a| a.trim().eq_ignore_ascii_case(location.trim()))
}

/// Work out which signal adjustments apply to `location` at `now`
pub fn adjustments(location: &str, signals: &Signals, rules: &RuleTable, now: DateTime<Utc>) -> Adjustments {
    let active_warning = signals
        .active_warnings
        .iter()
        .any(|w| w.is_active_at(now) && covers(w.area.as_deref(), location));

    let since = now - seismic_lookback();
    let recent_quake = signals.recent_quakes.iter().any(|q| {
        q.magnitude >= SEISMIC_MIN_MAGNITUDE
            && q.occurred_at >= since
            && q.occurred_at <= now
            && covers(q.location.as_deref(), location)
    });

    let storm_forecast = signals
        .storm_forecast
        .as_deref()
        .map_or(false, |forecast| rules.has_storm_intensity(forecast));

    Adjustments {
        active_warning,
        recent_quake,
        storm_forecast,
    }
}

/// Final severity for an event at `location`, always in `[0, 1]`
pub fn score(base: f32, location: &str, signals: &Signals, rules: &RuleTable, now: DateTime<Utc>) -> f32 {
    let applied = adjustments(location, signals, rules, now);
    let mut severity = clamp_unit(base);
    if applied.active_warning {
        severity += ACTIVE_WARNING_BONUS;
    }
    if applied.recent_quake {
        severity += SEISMIC_BONUS;
    }
    if applied.storm_forecast {
        severity += STORM_FORECAST_BONUS;
    }
    clamp_unit(severity)
}
