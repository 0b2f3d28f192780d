// 🏆 Health Rankings - deduplicated, ordered, paginated county scores

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::db::{count_distinct_counties, get_all_measures, CountyFilter, HealthMeasureRecord};
use crate::deduplication::{group_measures, select_representatives};
use crate::measures::Measure;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 50;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum QueryError {
    /// Rejected instead of defaulted so caller bugs stay visible
    #[error("invalid query parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("query parameter `{0}` is required")]
    MissingParameter(&'static str),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ============================================================================
// PAGINATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

impl Pagination {
    /// page defaults to 1, per_page to 20 and is capped at 50.
    /// page < 1 or per_page < 1 is rejected.
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Result<Self, QueryError> {
        let page = page.unwrap_or(DEFAULT_PAGE);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);

        if page < 1 {
            return Err(QueryError::InvalidParameter {
                name: "page",
                reason: format!("must be at least 1, got {}", page),
            });
        }
        if per_page < 1 {
            return Err(QueryError::InvalidParameter {
                name: "per_page",
                reason: format!("must be at least 1, got {}", per_page),
            });
        }

        Ok(Pagination {
            page: page as usize,
            per_page: per_page.min(MAX_PER_PAGE) as usize,
        })
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: DEFAULT_PAGE as usize,
            per_page: DEFAULT_PER_PAGE as usize,
        }
    }
}

// ============================================================================
// COUNTY AGGREGATE
// ============================================================================

/// Computed per request, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyAggregate {
    pub county: String,
    pub state: String,
    pub fips_code: Option<String>,
    pub measure_count: usize,
    pub health_score: f64,
}

/// Real county rows only: not the national row, not a state row tagged as
/// a county, and named with the "County" convention. Names outside the
/// convention (parishes, boroughs, independent cities) are excluded too.
pub fn is_rankable_county(county: &str, state: &str) -> bool {
    county != "United States" && county != state && county.contains("County")
}

/// Score every county in `records` and order best first.
///
/// Rows are filtered, grouped per (county, state, fips), reduced to one
/// representative per (county, state), scored with the unweighted average,
/// and stably sorted by score so ties keep input order.
pub fn aggregate_counties(records: &[HealthMeasureRecord], filter: &CountyFilter) -> Vec<CountyAggregate> {
    let eligible: Vec<HealthMeasureRecord> = records
        .iter()
        .filter(|r| is_rankable_county(&r.county, &r.state))
        .filter(|r| filter.matches(&r.county, &r.state))
        .filter(|r| Measure::from_name(&r.measure_name).is_some())
        .cloned()
        .collect();

    let mut aggregates: Vec<CountyAggregate> = select_representatives(group_measures(&eligible))
        .into_iter()
        .map(|group| CountyAggregate {
            health_score: group.health_score(),
            measure_count: group.measure_count(),
            county: group.county,
            state: group.state,
            fips_code: group.fips_code,
        })
        .collect();

    // sort_by is stable
    aggregates.sort_by(|a, b| b.health_score.total_cmp(&a.health_score));
    aggregates
}

// ============================================================================
// RANKING PAGE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RankingQuery {
    pub county: Option<String>,
    pub state: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl RankingQuery {
    pub fn filter(&self) -> CountyFilter {
        CountyFilter::new(self.county.clone(), self.state.clone())
    }

    pub fn pagination(&self) -> Result<Pagination, QueryError> {
        Pagination::new(self.page, self.per_page)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingPage {
    pub count: usize,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    pub data: Vec<CountyAggregate>,
}

/// Rank `records` and cut one page.
///
/// `total` comes from the store (distinct rankable counties) and is reported
/// as is, even when it differs from the number of ranked aggregates.
pub fn rank_page(
    records: &[HealthMeasureRecord],
    filter: &CountyFilter,
    total: usize,
    pagination: Pagination,
) -> RankingPage {
    let ranked = aggregate_counties(records, filter);
    debug!(ranked = ranked.len(), total, "Ranked counties");

    let data: Vec<CountyAggregate> = ranked
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.per_page)
        .collect();

    RankingPage {
        count: data.len(),
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages: pagination.total_pages(total),
        data,
    }
}

/// Validate, fetch and rank in one call
pub fn list_health_rankings(conn: &Connection, query: &RankingQuery) -> Result<RankingPage, QueryError> {
    let pagination = query.pagination()?;
    let filter = query.filter();

    let records = get_all_measures(conn, &filter)?;
    let total = count_distinct_counties(conn, &filter)?;

    Ok(rank_page(&records, &filter, total.max(0) as usize, pagination))
}
