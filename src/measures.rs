// 🩺 Measure Vocabulary - the seven health measures used for scoring
// Weights, penalty families and raw value parsing live here so the weighted
// and batch scoring paths agree on what a "usable" value is.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Weight applied to a measure name outside the recognized vocabulary
/// (weighted path only).
pub const DEFAULT_WEIGHT: f64 = 0.10;

/// Score every county starts from before penalties are applied.
pub const BASELINE_SCORE: f64 = 100.0;

// ============================================================================
// MEASURE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Measure {
    AdultObesity,
    PhysicalInactivity,
    ChildrenInPoverty,
    ViolentCrimeRate,
    PreventableHospitalStays,
    Unemployment,
    Uninsured,
}

/// How a raw value turns into a penalty
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PenaltyFamily {
    /// Stored as a fraction (0.25 = 25%), penalty is the percentage
    Rate,

    /// Count per 100k population, scaled down and capped
    PerCapita { divisor: f64, cap: f64 },
}

impl Measure {
    pub const ALL: [Measure; 7] = [
        Measure::ViolentCrimeRate,
        Measure::Unemployment,
        Measure::ChildrenInPoverty,
        Measure::AdultObesity,
        Measure::PhysicalInactivity,
        Measure::Uninsured,
        Measure::PreventableHospitalStays,
    ];

    /// Name as it appears in the `measure_name` column
    pub fn name(&self) -> &'static str {
        match self {
            Measure::AdultObesity => "Adult obesity",
            Measure::PhysicalInactivity => "Physical inactivity",
            Measure::ChildrenInPoverty => "Children in poverty",
            Measure::ViolentCrimeRate => "Violent crime rate",
            Measure::PreventableHospitalStays => "Preventable hospital stays",
            Measure::Unemployment => "Unemployment",
            Measure::Uninsured => "Uninsured",
        }
    }

    /// Exact-name lookup. Anything else is not a recognized measure.
    pub fn from_name(name: &str) -> Option<Self> {
        Measure::ALL.iter().copied().find(|m| m.name() == name)
    }

    pub fn weight(&self) -> f64 {
        match self {
            Measure::AdultObesity => 0.20,
            Measure::PhysicalInactivity => 0.15,
            Measure::ChildrenInPoverty => 0.15,
            Measure::ViolentCrimeRate => 0.15,
            Measure::PreventableHospitalStays => 0.15,
            Measure::Unemployment => 0.10,
            Measure::Uninsured => 0.10,
        }
    }

    pub fn family(&self) -> PenaltyFamily {
        match self {
            Measure::ViolentCrimeRate => PenaltyFamily::PerCapita {
                divisor: 10.0,
                cap: 10.0,
            },
            Measure::PreventableHospitalStays => PenaltyFamily::PerCapita {
                divisor: 100.0,
                cap: 5.0,
            },
            _ => PenaltyFamily::Rate,
        }
    }

    /// Unweighted penalty for a parsed raw value
    pub fn penalty(&self, value: f64) -> f64 {
        match self.family() {
            PenaltyFamily::Rate => value * 100.0,
            PenaltyFamily::PerCapita { divisor, cap } => (value / divisor).min(cap),
        }
    }
}

/// Weight for any measure name, falling back to [`DEFAULT_WEIGHT`]
pub fn weight_for(measure_name: &str) -> f64 {
    Measure::from_name(measure_name)
        .map(|m| m.weight())
        .unwrap_or(DEFAULT_WEIGHT)
}

/// Recognized names in SQL `IN (...)` order
pub fn recognized_names() -> Vec<&'static str> {
    Measure::ALL.iter().map(|m| m.name()).collect()
}

// ============================================================================
// RAW VALUE PARSING
// ============================================================================

/// A raw value that cannot contribute to a score.
/// Always recovered by skipping the single measure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataFormatError {
    #[error("raw value is missing")]
    Missing,

    #[error("raw value {0:?} is not a number")]
    NotNumeric(String),
}

/// Parse a string-encoded raw value.
/// Surrounding whitespace is ignored; NaN and infinities are rejected.
pub fn parse_raw_value(raw: Option<&str>) -> Result<f64, DataFormatError> {
    let trimmed = match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Err(DataFormatError::Missing),
    };

    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DataFormatError::NotNumeric(trimmed.to_string())),
    }
}

/// Round half away from zero to one decimal place
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = Measure::ALL.iter().map(|m| m.weight()).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_name_round_trip() {
        for measure in Measure::ALL {
            assert_eq!(Measure::from_name(measure.name()), Some(measure));
        }
        assert_eq!(Measure::from_name("adult obesity"), None);
        assert_eq!(Measure::from_name("Premature death"), None);
    }

    #[test]
    fn test_unrecognized_weight_defaults() {
        assert_relative_eq!(weight_for("Premature death"), DEFAULT_WEIGHT);
        assert_relative_eq!(weight_for("Adult obesity"), 0.20);
    }

    #[test]
    fn test_rate_penalty() {
        assert_relative_eq!(Measure::AdultObesity.penalty(0.25), 25.0, epsilon = 1e-9);
        assert_relative_eq!(Measure::Uninsured.penalty(0.0), 0.0);
    }

    #[test]
    fn test_per_capita_penalties_are_capped() {
        assert_relative_eq!(Measure::ViolentCrimeRate.penalty(50.0), 5.0);
        assert_relative_eq!(Measure::ViolentCrimeRate.penalty(900.0), 10.0);
        assert_relative_eq!(Measure::PreventableHospitalStays.penalty(250.0), 2.5);
        assert_relative_eq!(Measure::PreventableHospitalStays.penalty(4000.0), 5.0);
    }

    #[test]
    fn test_parse_raw_value() {
        assert_eq!(parse_raw_value(Some("0.30")), Ok(0.30));
        assert_eq!(parse_raw_value(Some(" 12 ")), Ok(12.0));
        assert_eq!(parse_raw_value(None), Err(DataFormatError::Missing));
        assert_eq!(parse_raw_value(Some("")), Err(DataFormatError::Missing));
        assert_eq!(parse_raw_value(Some("   ")), Err(DataFormatError::Missing));
        assert_eq!(
            parse_raw_value(Some("n/a")),
            Err(DataFormatError::NotNumeric("n/a".to_string()))
        );
        assert!(parse_raw_value(Some("NaN")).is_err());
        assert!(parse_raw_value(Some("inf")).is_err());
    }

    #[test]
    fn test_round_one_decimal() {
        assert_eq!(round_one_decimal(69.99999999999999), 70.0);
        assert_eq!(round_one_decimal(94.04), 94.0);
        assert_eq!(round_one_decimal(94.06), 94.1);
    }
}
