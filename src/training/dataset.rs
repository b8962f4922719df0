//! Loading and cleaning of the historical flare catalogue.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use tracing::{info, warn};

use crate::error::DatasetError;
use crate::ml::{ClockTime, RawObservation};

const REQUIRED_COLUMNS: [&str; 7] = [
    "start.date",
    "start.time",
    "end",
    "peak",
    "total.counts",
    "x.pos.asec",
    "y.pos.asec",
];

#[derive(Debug, Deserialize)]
struct FlareRow {
    #[serde(rename = "start.date")]
    start_date: String,
    #[serde(rename = "start.time")]
    start_time: String,
    end: String,
    peak: String,
    #[serde(rename = "total.counts", deserialize_with = "csv::invalid_option")]
    total_counts: Option<f64>,
    #[serde(rename = "x.pos.asec", deserialize_with = "csv::invalid_option")]
    x_pos_asec: Option<f64>,
    #[serde(rename = "y.pos.asec", deserialize_with = "csv::invalid_option")]
    y_pos_asec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub observation: RawObservation,
    pub peak_offset_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningReport {
    pub total_rows: usize,
    pub unparsable: usize,
    pub negative_offset: usize,
    pub kept: usize,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub samples: Vec<TrainingSample>,
    pub report: CleaningReport,
}

impl Dataset {
    pub fn load(path: &str) -> Result<Self, DatasetError> {
        info!("Loading flare dataset from {}", path);
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let headers = reader.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|header| header == column) {
                return Err(DatasetError::MissingColumn(column.to_string()));
            }
        }

        let mut report = CleaningReport::default();
        let mut samples = Vec::new();
        for row in reader.deserialize::<FlareRow>() {
            report.total_rows += 1;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping malformed row {}: {}", report.total_rows, e);
                    report.unparsable += 1;
                    continue;
                }
            };
            match clean_row(&row) {
                RowOutcome::Kept(sample) => samples.push(sample),
                RowOutcome::Unparsable => report.unparsable += 1,
                RowOutcome::NegativeOffset => report.negative_offset += 1,
            }
        }
        report.kept = samples.len();

        info!(
            total = report.total_rows,
            unparsable = report.unparsable,
            negative_offset = report.negative_offset,
            kept = report.kept,
            "Dataset cleaned"
        );

        if samples.is_empty() {
            return Err(DatasetError::Empty(format!(
                "no usable rows out of {}",
                report.total_rows
            )));
        }
        Ok(Self { samples, report })
    }
}

enum RowOutcome {
    Kept(TrainingSample),
    Unparsable,
    NegativeOffset,
}

fn clean_row(row: &FlareRow) -> RowOutcome {
    let parsed = (|| {
        let date = NaiveDate::parse_from_str(&row.start_date, "%Y-%m-%d").ok()?;
        let start = parse_clock(&row.start_time)?;
        let end = parse_clock(&row.end)?;
        let peak = parse_clock(&row.peak)?;
        let total_counts = row.total_counts.filter(|v| v.is_finite())?;
        let x_pos_asec = row.x_pos_asec.filter(|v| v.is_finite())?;
        let y_pos_asec = row.y_pos_asec.filter(|v| v.is_finite())?;
        Some((date, start, end, peak, total_counts, x_pos_asec, y_pos_asec))
    })();

    let Some((date, start, end, peak, total_counts, x_pos_asec, y_pos_asec)) = parsed else {
        return RowOutcome::Unparsable;
    };

    // The catalogue records only a start date, so a peak before the start time
    // cannot be placed reliably and is discarded.
    let start_at: NaiveDateTime = date.and_time(start);
    let peak_at: NaiveDateTime = date.and_time(peak);
    let offset = (peak_at - start_at).num_seconds();
    if offset < 0 {
        return RowOutcome::NegativeOffset;
    }

    RowOutcome::Kept(TrainingSample {
        observation: RawObservation {
            start: ClockTime::from(start),
            end: ClockTime::from(end),
            total_counts,
            x_pos_asec,
            y_pos_asec,
        },
        peak_offset_seconds: offset as f64,
    })
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "flare,start.date,start.time,peak,end,duration.s,total.counts,x.pos.asec,y.pos.asec";

    fn load(rows: &[&str]) -> Result<Dataset, DatasetError> {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        Dataset::from_reader(text.as_bytes())
    }

    #[test]
    fn parses_clean_rows() {
        let dataset = load(&["2120516,2002-02-12,21:29:56,21:33:38,21:41:48,712,136,592,-358"]).unwrap();
        assert_eq!(dataset.samples.len(), 1);
        let sample = &dataset.samples[0];
        assert_eq!(sample.peak_offset_seconds, 222.0);
        assert_eq!(sample.observation.start, ClockTime::new(21, 29, 56));
        assert_eq!(sample.observation.end, ClockTime::new(21, 41, 48));
        assert_eq!(sample.observation.total_counts, 136.0);
        assert_eq!(sample.observation.y_pos_asec, -358.0);
    }

    #[test]
    fn drops_unparsable_and_negative_rows() {
        let dataset = load(&[
            "1,2002-02-12,21:29:56,21:33:38,21:41:48,712,136,592,-358",
            "2,2002-02-12,not-a-time,21:33:38,21:41:48,712,136,592,-358",
            "3,2002-02-12,23:59:00,00:01:00,00:05:00,360,50,10,10",
            "4,2002-02-12,10:00:00,10:01:00,10:05:00,300,,10,10",
            "5,2002-02-13,10:00:00,10:00:00,10:05:00,300,20,10,10",
        ])
        .unwrap();

        assert_eq!(
            dataset.report,
            CleaningReport {
                total_rows: 5,
                unparsable: 2,
                negative_offset: 1,
                kept: 2,
            }
        );
        assert_eq!(dataset.samples[1].peak_offset_seconds, 0.0);
    }

    #[test]
    fn empty_after_cleaning_is_an_error() {
        let err = load(&["1,2002-02-12,21:29:56,21:20:00,21:41:48,712,136,592,-358"]).unwrap_err();
        assert!(matches!(err, DatasetError::Empty(_)));
    }

    #[test]
    fn missing_column_is_reported() {
        let err = Dataset::from_reader("start.date,start.time,end\n2002-02-12,21:29:56,21:41:48".as_bytes())
            .unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn(column) if column == "peak"));
    }
}
