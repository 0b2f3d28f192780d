// 📊 Health Scoring - composite 0-100 score per county
//
// Two formulas exist and must stay separate:
// - weighted: baseline minus weighted penalties (county detail)
// - unweighted: 100 minus the average penalty (rankings, see `rankings`)
// Changing either one changes published scores.

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{get_measures, HealthMeasureRecord};
use crate::measures::{
    parse_raw_value, round_one_decimal, weight_for, DataFormatError, Measure, BASELINE_SCORE,
};

// ============================================================================
// USABLE VALUES
// ============================================================================

/// Recognized measure with a numeric raw value.
/// Unrecognized names are never usable; bad values are logged and skipped.
pub fn usable_value(record: &HealthMeasureRecord) -> Option<(Measure, f64)> {
    let measure = Measure::from_name(&record.measure_name)?;

    match parse_raw_value(record.raw_value.as_deref()) {
        Ok(value) => Some((measure, value)),
        Err(DataFormatError::Missing) => None,
        Err(e) => {
            debug!(
                county = %record.county,
                state = %record.state,
                measure = %record.measure_name,
                "Skipping measure: {}",
                e
            );
            None
        }
    }
}

// ============================================================================
// WEIGHTED SCORE
// ============================================================================

/// Weighted score for one county's measures.
///
/// Starts at 100 and subtracts `penalty × weight` per usable measure, then
/// clamps to [0, 100] and rounds to one decimal. A set with no usable
/// measure scores 0, never 100.
pub fn weighted_health_score(measures: &[HealthMeasureRecord]) -> f64 {
    let mut score = BASELINE_SCORE;
    let mut usable = 0;

    for record in measures {
        if let Some((measure, value)) = usable_value(record) {
            score -= measure.penalty(value) * weight_for(&record.measure_name);
            usable += 1;
        }
    }

    if usable == 0 {
        return 0.0;
    }

    round_one_decimal(score).clamp(0.0, 100.0)
}

// ============================================================================
// UNWEIGHTED AVERAGE
// ============================================================================

/// Running sum of unweighted penalties.
/// Local to one computation; never shared between requests.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PenaltyAccumulator {
    sum: f64,
    count: usize,
}

impl PenaltyAccumulator {
    /// Returns true when the record contributed
    pub fn add(&mut self, record: &HealthMeasureRecord) -> bool {
        match usable_value(record) {
            Some((measure, value)) => {
                self.sum += measure.penalty(value);
                self.count += 1;
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// `None` when nothing was usable (an empty SQL `AVG`)
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// `max(0, 100 - average)` rounded; a null average scores 0
    pub fn score(&self) -> f64 {
        match self.average() {
            Some(avg) => round_one_decimal((BASELINE_SCORE - avg).max(0.0)),
            None => 0.0,
        }
    }
}

// ============================================================================
// COUNTY DETAIL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyHealthDetail {
    pub county: String,
    pub state: String,

    /// Weighted score
    pub health_score: f64,

    /// Unweighted average over every usable row, as the rankings compute it
    pub ranking_score: f64,

    pub health_measures: Vec<HealthMeasureRecord>,
}

/// Score one county from its recognized measures.
/// An unknown county is not an error: it has no measures and scores 0.
pub fn compute_county_health_detail(
    conn: &Connection,
    county: &str,
    state: &str,
) -> Result<CountyHealthDetail> {
    let health_measures = get_measures(conn, county, state)?;
    Ok(score_county_detail(county, state, health_measures))
}

/// Pure half of [`compute_county_health_detail`]
pub fn score_county_detail(
    county: &str,
    state: &str,
    health_measures: Vec<HealthMeasureRecord>,
) -> CountyHealthDetail {
    let mut accumulator = PenaltyAccumulator::default();
    for record in &health_measures {
        accumulator.add(record);
    }

    CountyHealthDetail {
        county: county.to_string(),
        state: state.to_string(),
        health_score: weighted_health_score(&health_measures),
        ranking_score: accumulator.score(),
        health_measures,
    }
}
