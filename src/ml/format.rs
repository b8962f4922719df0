use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use super::features::ClockTime;
use crate::error::PredictionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_offset_seconds: f64,
    pub predicted_offset_formatted: String,
    pub predicted_peak_time: String,
}

/// Negative offsets are model imprecision and are floored to zero.
pub fn clamp_offset(raw_seconds: f64) -> f64 {
    raw_seconds.max(0.0)
}

/// Nearest whole second, ties to even.
pub fn whole_seconds(seconds: f64) -> i64 {
    seconds.round_ties_even() as i64
}

/// `HH:MM:SS` where hours keep counting past a day, e.g. `25:00:00`.
pub fn format_offset(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Time of day reached `offset_seconds` after `start`, wrapping past midnight.
/// `None` when the offset does not fit in a `TimeDelta`.
pub fn peak_time_of_day(start: &ClockTime, offset_seconds: i64) -> Option<String> {
    let start = start.to_naive_time().unwrap_or(NaiveTime::MIN);
    let (peak, _) = start.overflowing_add_signed(TimeDelta::try_seconds(offset_seconds)?);
    Some(peak.format("%H:%M:%S").to_string())
}

pub fn format_prediction(
    start: &ClockTime,
    raw_offset_seconds: f64,
) -> Result<PredictionResult, PredictionError> {
    let offset = clamp_offset(raw_offset_seconds);
    let rounded = whole_seconds(offset);
    let predicted_peak_time = peak_time_of_day(start, rounded).ok_or_else(|| {
        PredictionError::Inference(format!(
            "predicted offset of {} seconds is out of range",
            offset
        ))
    })?;

    Ok(PredictionResult {
        predicted_offset_seconds: offset,
        predicted_offset_formatted: format_offset(rounded),
        predicted_peak_time,
    })
}
