// 🔍 Deduplication Engine - one row-group per (county, state)
// The same county can show up under several FIPS variants (blank vs populated).
// Rows are grouped by (county, state, fips) and one group is kept per county.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;

use crate::db::HealthMeasureRecord;
use crate::scoring::PenaltyAccumulator;

// ============================================================================
// COUNTY GROUP
// ============================================================================

/// Measure rows sharing (county, state, fips_code)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountyGroup {
    pub county: String,
    pub state: String,

    /// Blank and missing codes are the same group
    pub fips_code: Option<String>,

    #[serde(skip)]
    penalties: PenaltyAccumulator,
}

impl CountyGroup {
    fn new(record: &HealthMeasureRecord) -> Self {
        CountyGroup {
            county: record.county.clone(),
            state: record.state.clone(),
            fips_code: record.fips().map(str::to_string),
            penalties: PenaltyAccumulator::default(),
        }
    }

    pub fn has_fips(&self) -> bool {
        self.fips_code.is_some()
    }

    /// Rows with a usable value
    pub fn measure_count(&self) -> usize {
        self.penalties.count()
    }

    pub fn average_penalty(&self) -> Option<f64> {
        self.penalties.average()
    }

    /// Unweighted batch score; 0 when nothing was usable
    pub fn health_score(&self) -> f64 {
        self.penalties.score()
    }

    fn key(&self) -> (&str, &str) {
        (self.county.as_str(), self.state.as_str())
    }
}

/// Group rows by (county, state, fips), in order of first appearance
pub fn group_measures(records: &[HealthMeasureRecord]) -> Vec<CountyGroup> {
    let mut groups: Vec<CountyGroup> = Vec::new();
    let mut index: HashMap<(String, String, Option<String>), usize> = HashMap::new();

    for record in records {
        let key = (
            record.county.clone(),
            record.state.clone(),
            record.fips().map(str::to_string),
        );

        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(CountyGroup::new(record));
            groups.len() - 1
        });

        groups[slot].penalties.add(record);
    }

    groups
}

// ============================================================================
// REPRESENTATIVE SELECTION
// ============================================================================

/// Pick the group that stands in for its county.
///
/// Stable sort by (has fips first, measure_count descending), first wins.
/// A populated FIPS code outranks a higher measure count.
/// Callers drop groups with no usable value first; see `select_representatives`.
pub fn pick_representative(mut candidates: Vec<CountyGroup>) -> Option<CountyGroup> {
    candidates.sort_by_key(|g| (!g.has_fips(), Reverse(g.measure_count())));
    candidates.into_iter().next()
}

/// Groups with no usable value only stand in for a county that has nothing
/// else; otherwise they are dropped before the pick.
fn usable_candidates(candidates: Vec<CountyGroup>) -> Vec<CountyGroup> {
    if candidates.iter().any(|g| g.measure_count() > 0) {
        candidates.into_iter().filter(|g| g.measure_count() > 0).collect()
    } else {
        candidates
    }
}

/// Exactly one group per (county, state), in order of the county's first
/// appearance
pub fn select_representatives(groups: Vec<CountyGroup>) -> Vec<CountyGroup> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut by_county: HashMap<(String, String), Vec<CountyGroup>> = HashMap::new();

    for group in groups {
        let key = (group.key().0.to_string(), group.key().1.to_string());
        by_county
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(group);
    }

    order
        .into_iter()
        .filter_map(|key| by_county.remove(&key))
        .map(usable_candidates)
        .filter_map(pick_representative)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(county: &str, state: &str, fips: Option<&str>, name: &str, raw: &str) -> HealthMeasureRecord {
        HealthMeasureRecord {
            county: county.to_string(),
            state: state.to_string(),
            fips_code: fips.map(str::to_string),
            measure_name: name.to_string(),
            raw_value: Some(raw.to_string()),
            year_span: None,
            release_year: Some(2024),
        }
    }

    const ALL_NAMES: [&str; 7] = [
        "Violent crime rate",
        "Unemployment",
        "Children in poverty",
        "Adult obesity",
        "Physical inactivity",
        "Uninsured",
        "Preventable hospital stays",
    ];

    #[test]
    fn test_grouping_by_fips_variant() {
        let records = vec![
            row("Cook County", "IL", Some("17031"), "Adult obesity", "0.30"),
            row("Cook County", "IL", None, "Uninsured", "0.10"),
            row("Cook County", "IL", Some("17031"), "Uninsured", "0.08"),
            row("Cook County", "IL", Some(""), "Unemployment", "0.05"),
        ];

        let groups = group_measures(&records);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].fips_code.as_deref(), Some("17031"));
        assert_eq!(groups[0].measure_count(), 2);
        assert_eq!(groups[1].fips_code, None);
        assert_eq!(groups[1].measure_count(), 2);
    }

    #[test]
    fn test_fips_outranks_measure_count() {
        let mut records = Vec::new();
        for name in ALL_NAMES {
            records.push(row("Cook County", "IL", None, name, "0.10"));
        }
        for name in &ALL_NAMES[..3] {
            records.push(row("Cook County", "IL", Some("17031"), name, "0.10"));
        }

        let picked = select_representatives(group_measures(&records));

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].fips_code.as_deref(), Some("17031"));
        assert_eq!(picked[0].measure_count(), 3);
    }

    #[test]
    fn test_measure_count_breaks_ties_between_fips_groups() {
        let records = vec![
            row("Lake County", "IL", Some("17097"), "Uninsured", "0.05"),
            row("Lake County", "IL", Some("17097-X"), "Uninsured", "0.05"),
            row("Lake County", "IL", Some("17097-X"), "Adult obesity", "0.25"),
        ];

        let picked = select_representatives(group_measures(&records));
        assert_eq!(picked[0].fips_code.as_deref(), Some("17097-X"));
    }

    #[test]
    fn test_full_tie_keeps_first_group() {
        let records = vec![
            row("Lake County", "IL", Some("A"), "Uninsured", "0.05"),
            row("Lake County", "IL", Some("B"), "Uninsured", "0.05"),
        ];

        for _ in 0..5 {
            let picked = select_representatives(group_measures(&records));
            assert_eq!(picked[0].fips_code.as_deref(), Some("A"));
        }
    }

    #[test]
    fn test_one_representative_per_county_in_first_seen_order() {
        let records = vec![
            row("Lake County", "OH", None, "Uninsured", "0.05"),
            row("Cook County", "IL", Some("17031"), "Uninsured", "0.08"),
            row("Lake County", "IL", None, "Uninsured", "0.05"),
            row("Lake County", "OH", Some("39085"), "Uninsured", "0.05"),
        ];

        let picked = select_representatives(group_measures(&records));
        let keys: Vec<(&str, &str)> = picked.iter().map(|g| g.key()).collect();

        assert_eq!(
            keys,
            vec![("Lake County", "OH"), ("Cook County", "IL"), ("Lake County", "IL")]
        );
        assert_eq!(picked[0].fips_code.as_deref(), Some("39085"));
    }

    #[test]
    fn test_empty_fips_group_yields_to_usable_group() {
        let mut records = vec![
            HealthMeasureRecord {
                raw_value: None,
                ..row("Cook County", "IL", Some("17031"), "Adult obesity", "")
            },
            row("Cook County", "IL", Some("17031"), "Uninsured", ""),
        ];
        for name in ["Adult obesity", "Uninsured", "Unemployment"] {
            records.push(row("Cook County", "IL", None, name, "0.10"));
        }

        let picked = select_representatives(group_measures(&records));

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].fips_code, None);
        assert_eq!(picked[0].measure_count(), 3);
        assert_eq!(picked[0].health_score(), 90.0);
    }

    #[test]
    fn test_only_empty_groups_still_represent_county() {
        let records = vec![
            row("Cook County", "IL", Some("17031"), "Uninsured", ""),
            row("Cook County", "IL", None, "Adult obesity", "n/a"),
        ];

        let picked = select_representatives(group_measures(&records));

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].fips_code.as_deref(), Some("17031"));
        assert_eq!(picked[0].health_score(), 0.0);
    }

    #[test]
    fn test_group_without_usable_values() {
        let records = vec![row("Cook County", "IL", None, "Uninsured", "suppressed")];
        let groups = group_measures(&records);

        assert_eq!(groups[0].measure_count(), 0);
        assert_eq!(groups[0].average_penalty(), None);
        assert_eq!(groups[0].health_score(), 0.0);
    }
}
