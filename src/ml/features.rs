//! Feature engineering shared by scaler fitting and online serving.
//!
//! [`FEATURE_NAMES`] is the single definition of the model's input columns. The
//! fitted input scaler records these names and is rejected at load time if they
//! differ, so the fitting and serving paths cannot drift apart silently.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const FEATURE_COUNT: usize = 12;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "duration_seconds",
    "total_counts",
    "x_pos_asec",
    "y_pos_asec",
    "start_hour_sin",
    "start_hour_cos",
    "start_minute_sin",
    "start_minute_cos",
    "end_hour_sin",
    "end_hour_cos",
    "end_minute_sin",
    "end_minute_cos",
];

/// Name of the single output column.
pub const TARGET_NAME: &str = "peak_offset_seconds";

/// Raw request fields, in the order they are reported back on validation errors.
pub const REQUIRED_FIELDS: [&str; 9] = [
    "total_counts",
    "x_pos_asec",
    "y_pos_asec",
    "start_hour",
    "start_minute",
    "start_second",
    "end_hour",
    "end_minute",
    "end_second",
];

pub const HOURS_PER_DAY: u32 = 24;
pub const MINUTES_PER_HOUR: u32 = 60;
const SECONDS_PER_DAY: i64 = 86_400;

/// Maps `value` in `[0, period)` onto the unit circle as `(sin, cos)`.
pub fn cyclical_encode(value: u32, period: u32) -> (f64, f64) {
    let angle = 2.0 * PI * f64::from(value) / f64::from(period);
    (angle.sin(), angle.cos())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl ClockTime {
    pub fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self { hour, minute, second }
    }

    pub fn seconds_from_midnight(&self) -> i64 {
        i64::from(self.hour) * 3600 + i64::from(self.minute) * 60 + i64::from(self.second)
    }

    /// `None` when any component is outside its nominal range.
    pub fn to_naive_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second)
    }
}

impl From<NaiveTime> for ClockTime {
    fn from(time: NaiveTime) -> Self {
        use chrono::Timelike;
        Self::new(time.hour(), time.minute(), time.second())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub start: ClockTime,
    pub end: ClockTime,
    pub total_counts: f64,
    pub x_pos_asec: f64,
    pub y_pos_asec: f64,
}

impl RawObservation {
    /// Elapsed seconds from start to end, treating an end earlier than the start
    /// as falling on the following day.
    pub fn duration_seconds(&self) -> f64 {
        let reference = reference_date();
        let start = reference.and_time(clock_or_midnight(&self.start));
        let mut end: NaiveDateTime = reference.and_time(clock_or_midnight(&self.end));
        if end < start {
            end += TimeDelta::days(1);
        }
        (end - start).num_seconds() as f64
    }
}

/// Fixed-order model input. Indices follow [`FEATURE_NAMES`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn from_observation(observation: &RawObservation) -> Self {
        let (start_hour_sin, start_hour_cos) =
            cyclical_encode(observation.start.hour, HOURS_PER_DAY);
        let (start_minute_sin, start_minute_cos) =
            cyclical_encode(observation.start.minute, MINUTES_PER_HOUR);
        let (end_hour_sin, end_hour_cos) = cyclical_encode(observation.end.hour, HOURS_PER_DAY);
        let (end_minute_sin, end_minute_cos) =
            cyclical_encode(observation.end.minute, MINUTES_PER_HOUR);

        Self([
            observation.duration_seconds(),
            observation.total_counts,
            observation.x_pos_asec,
            observation.y_pos_asec,
            start_hour_sin,
            start_hour_cos,
            start_minute_sin,
            start_minute_cos,
            end_hour_sin,
            end_hour_cos,
            end_minute_sin,
            end_minute_cos,
        ])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

// Validated observations always convert; the fallback keeps the builder total.
fn clock_or_midnight(clock: &ClockTime) -> NaiveTime {
    clock.to_naive_time().unwrap_or_else(|| {
        NaiveTime::MIN + TimeDelta::seconds(clock.seconds_from_midnight() % SECONDS_PER_DAY)
    })
}
