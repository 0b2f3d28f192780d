// 🗺️ Location Lookups - ZIP, county, city, state and metro queries
// Straight reads over `zip_county`, joined with health measures where useful.
// Nothing here computes scores of its own; ranked lists come from `rankings`.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::str::FromStr;

use crate::db::{get_all_measures, get_measures, get_metro_measures, CountyFilter, HealthMeasureRecord, RANKABLE_COUNTY_SQL};
use crate::rankings::{aggregate_counties, CountyAggregate, QueryError};
use crate::scoring::weighted_health_score;

/// Health rows shown on the enhanced ZIP lookup
pub const ZIP_MEASURE_LIMIT: usize = 10;

/// Health rows shown on the basic ZIP lookup
pub const ZIP_SUMMARY_MEASURE_LIMIT: usize = 5;

/// Cities listed in analytics
pub const TOP_CITY_LIMIT: usize = 10;

// ============================================================================
// HELPERS
// ============================================================================

/// SQLite treats a negative LIMIT as "no limit"
fn limit_value(limit: Option<usize>) -> Value {
    Value::Integer(limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1))
}

/// `%term%` with LIKE wildcards in the term escaped (use with `ESCAPE '\'`)
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn split_list(joined: Option<String>) -> Vec<String> {
    let mut items: Vec<String> = joined
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    items.sort();
    items
}

fn string_column(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params_from_iter(params.iter()), |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

// ============================================================================
// COUNTIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountySummary {
    pub county: String,
    pub state: String,
    pub default_city: Option<String>,
    pub zip_count: i64,
}

fn county_summaries(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Vec<CountySummary>> {
    let mut stmt = conn.prepare(sql)?;
    let counties = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(CountySummary {
                county: row.get(0)?,
                state: row.get(1)?,
                default_city: row.get(2)?,
                zip_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counties)
}

/// One row per (county, state) with its ZIP count
pub fn list_counties(conn: &Connection, state: Option<&str>, limit: Option<usize>) -> Result<Vec<CountySummary>> {
    let mut sql = String::from(
        "SELECT county, state, MIN(default_city), COUNT(zip_code)
         FROM zip_county",
    );
    let mut params = Vec::new();

    if let Some(state) = state {
        sql.push_str(" WHERE state = ?");
        params.push(Value::Text(state.to_string()));
    }
    sql.push_str(" GROUP BY county, state ORDER BY county, state LIMIT ?");
    params.push(limit_value(limit));

    county_summaries(conn, &sql, params).context("Failed to list counties")
}

/// Counties whose name or state contains `query`
pub fn search_counties(conn: &Connection, query: &str) -> Result<Vec<CountySummary>, QueryError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(QueryError::MissingParameter("q"));
    }

    let pattern = like_pattern(query);
    let counties = county_summaries(
        conn,
        "SELECT county, state, MIN(default_city), COUNT(zip_code)
         FROM zip_county
         WHERE county LIKE ?1 ESCAPE '\\' OR state LIKE ?1 ESCAPE '\\'
         GROUP BY county, state
         ORDER BY county, state",
        vec![Value::Text(pattern)],
    )
    .context("Failed to search counties")?;

    Ok(counties)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountyDetails {
    pub county: String,
    pub state: String,
    pub default_city: Option<String>,
    pub zip_count: i64,
    pub zip_codes: Vec<String>,
    pub health_score: f64,
    pub health_measures: Vec<HealthMeasureRecord>,
}

/// County with its ZIP codes and recognized health measures.
/// Without `state` the first matching state alphabetically is used.
pub fn county_details(conn: &Connection, county: &str, state: Option<&str>) -> Result<Option<CountyDetails>> {
    let mut sql = String::from(
        "SELECT county, state, MIN(default_city), COUNT(zip_code)
         FROM zip_county
         WHERE county = ?",
    );
    let mut params = vec![Value::Text(county.to_string())];
    if let Some(state) = state {
        sql.push_str(" AND state = ?");
        params.push(Value::Text(state.to_string()));
    }
    sql.push_str(" GROUP BY county, state ORDER BY state LIMIT 1");

    let summary = match county_summaries(conn, &sql, params)?.into_iter().next() {
        Some(summary) => summary,
        None => return Ok(None),
    };

    let zip_codes = string_column(
        conn,
        "SELECT zip_code FROM zip_county WHERE county = ?1 AND state = ?2 ORDER BY zip_code",
        &[
            Value::Text(summary.county.clone()),
            Value::Text(summary.state.clone()),
        ],
    )?;
    let health_measures = get_measures(conn, &summary.county, &summary.state)?;

    Ok(Some(CountyDetails {
        health_score: weighted_health_score(&health_measures),
        county: summary.county,
        state: summary.state,
        default_city: summary.default_city,
        zip_count: summary.zip_count,
        zip_codes,
        health_measures,
    }))
}

// ============================================================================
// ZIP CODES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipLocation {
    pub county: String,
    pub state: String,
    pub default_city: Option<String>,
    pub metro_area: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipStatistics {
    pub total_zips_in_county: i64,
    pub total_zips_in_city: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipEntry {
    pub zip_code: String,
    pub county: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipDetails {
    pub zip_code: String,
    pub location: ZipLocation,
    pub statistics: ZipStatistics,
    pub health_score: f64,
    pub health_measures: Vec<HealthMeasureRecord>,
    pub county_zips: Vec<String>,
    pub city_zips: Vec<ZipEntry>,
}

fn zip_entries(conn: &Connection, sql: &str, param: &str) -> Result<Vec<ZipEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let entries = stmt
        .query_map([param], |row| {
            Ok(ZipEntry {
                zip_code: row.get(0)?,
                county: row.get(1)?,
                state: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZipSummary {
    pub zip_code: String,
    pub county: String,
    pub state: String,
    pub default_city: Option<String>,
    pub health_rankings: Vec<HealthMeasureRecord>,
}

fn zip_location(conn: &Connection, zip_code: &str) -> Result<Option<ZipLocation>> {
    conn.query_row(
        "SELECT county, state, default_city, metro_area FROM zip_county WHERE zip_code = ?1",
        [zip_code],
        |row| {
            Ok(ZipLocation {
                county: row.get(0)?,
                state: row.get(1)?,
                default_city: row.get(2)?,
                metro_area: row.get(3)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("Failed to look up ZIP {}", zip_code))
}

/// County and the latest few recognized measures for one ZIP code
pub fn zip_summary(conn: &Connection, zip_code: &str) -> Result<Option<ZipSummary>> {
    let location = match zip_location(conn, zip_code)? {
        Some(location) => location,
        None => return Ok(None),
    };

    let mut health_rankings = get_measures(conn, &location.county, &location.state)?;
    health_rankings.truncate(ZIP_SUMMARY_MEASURE_LIMIT);

    Ok(Some(ZipSummary {
        zip_code: zip_code.to_string(),
        county: location.county,
        state: location.state,
        default_city: location.default_city,
        health_rankings,
    }))
}

/// Everything known about one ZIP code
pub fn zip_details(conn: &Connection, zip_code: &str) -> Result<Option<ZipDetails>> {
    let location = match zip_location(conn, zip_code)? {
        Some(location) => location,
        None => return Ok(None),
    };

    let county_zips = string_column(
        conn,
        "SELECT zip_code FROM zip_county WHERE county = ?1 AND state = ?2 ORDER BY zip_code",
        &[
            Value::Text(location.county.clone()),
            Value::Text(location.state.clone()),
        ],
    )?;

    let city_zips = match &location.default_city {
        Some(city) => zip_entries(
            conn,
            "SELECT zip_code, county, state FROM zip_county
             WHERE default_city = ?1
             ORDER BY county, zip_code",
            city,
        )?,
        None => Vec::new(),
    };

    let mut health_measures = get_measures(conn, &location.county, &location.state)?;
    let health_score = weighted_health_score(&health_measures);
    health_measures.truncate(ZIP_MEASURE_LIMIT);

    Ok(Some(ZipDetails {
        zip_code: zip_code.to_string(),
        statistics: ZipStatistics {
            total_zips_in_county: county_zips.len() as i64,
            total_zips_in_city: city_zips.len() as i64,
        },
        location,
        health_score,
        health_measures,
        county_zips,
        city_zips,
    }))
}

// ============================================================================
// CITIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitySummary {
    pub city: String,
    pub county_count: i64,
    pub state_count: i64,
    pub zip_count: i64,
    pub states: Vec<String>,
}

fn city_summaries(conn: &Connection, state: Option<&str>, limit: Option<usize>) -> Result<Vec<CitySummary>> {
    let mut sql = String::from(
        "SELECT default_city,
                COUNT(DISTINCT county || ', ' || state),
                COUNT(DISTINCT state),
                COUNT(zip_code),
                GROUP_CONCAT(DISTINCT state)
         FROM zip_county
         WHERE default_city IS NOT NULL AND default_city != ''",
    );
    let mut params = Vec::new();

    if let Some(state) = state {
        sql.push_str(" AND state = ?");
        params.push(Value::Text(state.to_string()));
    }
    sql.push_str(" GROUP BY default_city ORDER BY COUNT(zip_code) DESC, default_city LIMIT ?");
    params.push(limit_value(limit));

    let mut stmt = conn.prepare(&sql)?;
    let cities = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(CitySummary {
                city: row.get(0)?,
                county_count: row.get(1)?,
                state_count: row.get(2)?,
                zip_count: row.get(3)?,
                states: split_list(row.get(4)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cities)
}

/// Cities ordered by ZIP count, largest first
pub fn list_cities(conn: &Connection, state: Option<&str>, limit: Option<usize>) -> Result<Vec<CitySummary>> {
    city_summaries(conn, state, limit).context("Failed to list cities")
}

// ============================================================================
// STATES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub state: String,
    pub county_count: i64,
    pub city_count: i64,
    pub zip_count: i64,
}

/// States ordered by county count, largest first
pub fn list_states(conn: &Connection, limit: Option<usize>) -> Result<Vec<StateSummary>> {
    let mut stmt = conn.prepare(
        "SELECT state, COUNT(DISTINCT county), COUNT(DISTINCT default_city), COUNT(zip_code)
         FROM zip_county
         GROUP BY state
         ORDER BY COUNT(DISTINCT county) DESC, state
         LIMIT ?1",
    )?;

    let states = stmt
        .query_map([limit_value(limit)], |row| {
            Ok(StateSummary {
                state: row.get(0)?,
                county_count: row.get(1)?,
                city_count: row.get(2)?,
                zip_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to list states")?;

    Ok(states)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateStatistics {
    pub county_count: i64,
    pub metro_count: i64,
    pub zip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateCounty {
    pub county: String,
    pub metro_area: Option<String>,
    pub zip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetroSummary {
    pub metro_area: String,
    pub county_count: i64,
    pub zip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDetails {
    pub state: String,
    pub statistics: StateStatistics,
    pub counties: Vec<StateCounty>,
    pub metro_areas: Vec<MetroSummary>,
    pub health_rankings: Vec<CountyAggregate>,
}

/// State overview with its counties, metro areas and ranked counties
pub fn state_details(conn: &Connection, state: &str) -> Result<Option<StateDetails>> {
    let statistics = conn.query_row(
        "SELECT COUNT(DISTINCT county), COUNT(DISTINCT metro_area), COUNT(zip_code)
         FROM zip_county
         WHERE state = ?1",
        [state],
        |row| {
            Ok(StateStatistics {
                county_count: row.get(0)?,
                metro_count: row.get(1)?,
                zip_count: row.get(2)?,
            })
        },
    )?;

    if statistics.zip_count == 0 {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT county, metro_area, COUNT(zip_code)
         FROM zip_county
         WHERE state = ?1
         GROUP BY county, metro_area
         ORDER BY county",
    )?;
    let counties = stmt
        .query_map([state], |row| {
            Ok(StateCounty {
                county: row.get(0)?,
                metro_area: row.get(1)?,
                zip_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT metro_area, COUNT(DISTINCT county), COUNT(zip_code)
         FROM zip_county
         WHERE state = ?1 AND metro_area IS NOT NULL AND metro_area != ''
         GROUP BY metro_area
         ORDER BY COUNT(zip_code) DESC, metro_area",
    )?;
    let metro_areas = stmt
        .query_map([state], |row| {
            Ok(MetroSummary {
                metro_area: row.get(0)?,
                county_count: row.get(1)?,
                zip_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let filter = CountyFilter::for_state(state);
    let health_rankings = aggregate_counties(&get_all_measures(conn, &filter)?, &filter);

    Ok(Some(StateDetails {
        state: state.to_string(),
        statistics,
        counties,
        metro_areas,
        health_rankings,
    }))
}

// ============================================================================
// METRO AREAS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetroStatistics {
    pub county_count: i64,
    pub state_count: i64,
    pub zip_count: i64,
    pub states: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetroCounty {
    pub county: String,
    pub state: String,
    pub zip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetroDetails {
    pub metro_area: String,
    pub statistics: MetroStatistics,
    pub counties: Vec<MetroCounty>,
    pub zip_codes: Vec<ZipEntry>,
    pub health_rankings: Vec<CountyAggregate>,
}

pub fn metro_details(conn: &Connection, metro_area: &str) -> Result<Option<MetroDetails>> {
    let statistics = conn.query_row(
        "SELECT COUNT(DISTINCT county || ', ' || state),
                COUNT(DISTINCT state),
                COUNT(zip_code),
                GROUP_CONCAT(DISTINCT state)
         FROM zip_county
         WHERE metro_area = ?1",
        [metro_area],
        |row| {
            Ok(MetroStatistics {
                county_count: row.get(0)?,
                state_count: row.get(1)?,
                zip_count: row.get(2)?,
                states: split_list(row.get(3)?),
            })
        },
    )?;

    if statistics.zip_count == 0 {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT county, state, COUNT(zip_code)
         FROM zip_county
         WHERE metro_area = ?1
         GROUP BY county, state
         ORDER BY county, state",
    )?;
    let counties = stmt
        .query_map([metro_area], |row| {
            Ok(MetroCounty {
                county: row.get(0)?,
                state: row.get(1)?,
                zip_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let zip_codes = zip_entries(
        conn,
        "SELECT zip_code, county, state FROM zip_county
         WHERE metro_area = ?1
         ORDER BY county, zip_code",
        metro_area,
    )?;

    let health_rankings = aggregate_counties(&get_metro_measures(conn, metro_area)?, &CountyFilter::default());

    Ok(Some(MetroDetails {
        metro_area: metro_area.to_string(),
        statistics,
        counties,
        zip_codes,
        health_rankings,
    }))
}

// ============================================================================
// LOCATION SEARCH
// ============================================================================

/// Which kinds of location a search covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    All,
    Zip,
    County,
    /// Searches city names
    Metro,
    State,
}

impl SearchScope {
    fn includes(&self, kind: MatchKind) -> bool {
        match self {
            SearchScope::All => true,
            SearchScope::Zip => kind == MatchKind::Zip,
            SearchScope::County => kind == MatchKind::County,
            SearchScope::Metro => kind == MatchKind::City,
            SearchScope::State => kind == MatchKind::State,
        }
    }
}

impl FromStr for SearchScope {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(SearchScope::All),
            "zip" => Ok(SearchScope::Zip),
            "county" => Ok(SearchScope::County),
            "metro" | "city" => Ok(SearchScope::Metro),
            "state" => Ok(SearchScope::State),
            other => Err(QueryError::InvalidParameter {
                name: "type",
                reason: format!("unknown location type {:?}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    State,
    Zip,
    County,
    City,
}

impl MatchKind {
    fn priority(&self) -> u8 {
        match self {
            MatchKind::State => 1,
            MatchKind::Zip => 2,
            MatchKind::County => 3,
            MatchKind::City => 4,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            MatchKind::State => "State",
            MatchKind::Zip => "ZIP Code",
            MatchKind::County => "County",
            MatchKind::City => "City",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationMatch {
    #[serde(rename = "type")]
    pub kind: MatchKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county_count: Option<i64>,
    pub description: &'static str,
}

impl LocationMatch {
    fn new(kind: MatchKind, name: String) -> Self {
        LocationMatch {
            kind,
            name,
            county: None,
            state: None,
            default_city: None,
            zip_count: None,
            county_count: None,
            description: kind.description(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSearchResults {
    /// Query after state-name normalization
    pub query: String,
    #[serde(rename = "type")]
    pub scope: SearchScope,
    pub count: usize,
    pub data: Vec<LocationMatch>,
}

const STATE_NAMES: &[(&str, &str)] = &[
    ("alabama", "AL"), ("alaska", "AK"), ("arizona", "AZ"), ("arkansas", "AR"),
    ("california", "CA"), ("colorado", "CO"), ("connecticut", "CT"), ("delaware", "DE"),
    ("district of columbia", "DC"), ("florida", "FL"), ("georgia", "GA"), ("hawaii", "HI"),
    ("idaho", "ID"), ("illinois", "IL"), ("indiana", "IN"), ("iowa", "IA"),
    ("kansas", "KS"), ("kentucky", "KY"), ("louisiana", "LA"), ("maine", "ME"),
    ("maryland", "MD"), ("massachusetts", "MA"), ("michigan", "MI"), ("minnesota", "MN"),
    ("mississippi", "MS"), ("missouri", "MO"), ("montana", "MT"), ("nebraska", "NE"),
    ("nevada", "NV"), ("new hampshire", "NH"), ("new jersey", "NJ"), ("new mexico", "NM"),
    ("new york", "NY"), ("north carolina", "NC"), ("north dakota", "ND"), ("ohio", "OH"),
    ("oklahoma", "OK"), ("oregon", "OR"), ("pennsylvania", "PA"), ("rhode island", "RI"),
    ("south carolina", "SC"), ("south dakota", "SD"), ("tennessee", "TN"), ("texas", "TX"),
    ("utah", "UT"), ("vermont", "VT"), ("virginia", "VA"), ("washington", "WA"),
    ("west virginia", "WV"), ("wisconsin", "WI"), ("wyoming", "WY"),
];

/// Full state name → two-letter code; anything else is returned trimmed
pub fn normalize_query(query: &str) -> String {
    let trimmed = query.trim();
    let lower = trimmed.to_lowercase();

    STATE_NAMES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSearch {
    pub q: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub limit: Option<usize>,
}

/// Substring search across ZIPs, counties, cities and states.
///
/// Ordering: exact name matches first, then states for short queries, then
/// by kind (state, zip, county, city), then by name.
pub fn search_locations(conn: &Connection, search: &LocationSearch) -> Result<LocationSearchResults, QueryError> {
    if search.q.trim().is_empty() {
        return Err(QueryError::MissingParameter("q"));
    }
    let scope: SearchScope = search.scope.as_deref().unwrap_or("all").parse()?;
    let query = normalize_query(&search.q);
    let pattern = like_pattern(&query);
    let state = search.state.as_deref().filter(|s| !s.trim().is_empty());

    let mut results = Vec::new();
    if scope.includes(MatchKind::Zip) {
        results.extend(search_zips(conn, &pattern, state)?);
    }
    if scope.includes(MatchKind::County) {
        results.extend(search_county_matches(conn, &pattern, state)?);
    }
    if scope.includes(MatchKind::City) {
        results.extend(search_cities(conn, &pattern, state)?);
    }
    if scope.includes(MatchKind::State) {
        results.extend(search_states(conn, &pattern)?);
    }

    let upper = query.to_uppercase();
    let short_query = query.chars().count() <= 3;
    results.sort_by(|a, b| {
        let key = |m: &LocationMatch| {
            (
                m.name.to_uppercase() != upper,
                !(m.kind == MatchKind::State && short_query),
                m.kind.priority(),
            )
        };
        key(a).cmp(&key(b)).then_with(|| a.name.cmp(&b.name))
    });

    if let Some(limit) = search.limit {
        results.truncate(limit);
    }

    Ok(LocationSearchResults {
        query,
        scope,
        count: results.len(),
        data: results,
    })
}

fn state_clause(sql: &mut String, params: &mut Vec<Value>, state: Option<&str>) {
    if let Some(state) = state {
        sql.push_str(" AND state = ?");
        params.push(Value::Text(state.to_string()));
    }
}

fn search_zips(conn: &Connection, pattern: &str, state: Option<&str>) -> Result<Vec<LocationMatch>> {
    let mut sql = String::from(
        "SELECT zip_code, county, state, default_city
         FROM zip_county
         WHERE zip_code LIKE ? ESCAPE '\\'",
    );
    let mut params = vec![Value::Text(pattern.to_string())];
    state_clause(&mut sql, &mut params, state);

    let mut stmt = conn.prepare(&sql)?;
    let matches = stmt
        .query_map(params_from_iter(params), |row| {
            let mut m = LocationMatch::new(MatchKind::Zip, row.get(0)?);
            m.county = row.get(1)?;
            m.state = row.get(2)?;
            m.default_city = row.get(3)?;
            Ok(m)
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to search ZIP codes")?;
    Ok(matches)
}

fn search_county_matches(conn: &Connection, pattern: &str, state: Option<&str>) -> Result<Vec<LocationMatch>> {
    let mut sql = String::from(
        "SELECT county, state, MIN(default_city), COUNT(zip_code)
         FROM zip_county
         WHERE county LIKE ? ESCAPE '\\'",
    );
    let mut params = vec![Value::Text(pattern.to_string())];
    state_clause(&mut sql, &mut params, state);
    sql.push_str(" GROUP BY county, state");

    let mut stmt = conn.prepare(&sql)?;
    let matches = stmt
        .query_map(params_from_iter(params), |row| {
            let county: String = row.get(0)?;
            let mut m = LocationMatch::new(MatchKind::County, county.clone());
            m.county = Some(county);
            m.state = row.get(1)?;
            m.default_city = row.get(2)?;
            m.zip_count = row.get(3)?;
            Ok(m)
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to search counties")?;
    Ok(matches)
}

fn search_cities(conn: &Connection, pattern: &str, state: Option<&str>) -> Result<Vec<LocationMatch>> {
    let mut sql = String::from(
        "SELECT default_city, COUNT(DISTINCT county || ', ' || state), COUNT(zip_code)
         FROM zip_county
         WHERE default_city LIKE ? ESCAPE '\\'
         AND default_city IS NOT NULL AND default_city != ''",
    );
    let mut params = vec![Value::Text(pattern.to_string())];
    state_clause(&mut sql, &mut params, state);
    sql.push_str(" GROUP BY default_city");

    let mut stmt = conn.prepare(&sql)?;
    let matches = stmt
        .query_map(params_from_iter(params), |row| {
            let city: String = row.get(0)?;
            let mut m = LocationMatch::new(MatchKind::City, city.clone());
            m.default_city = Some(city);
            m.county_count = row.get(1)?;
            m.zip_count = row.get(2)?;
            Ok(m)
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to search cities")?;
    Ok(matches)
}

fn search_states(conn: &Connection, pattern: &str) -> Result<Vec<LocationMatch>> {
    let mut stmt = conn.prepare(
        "SELECT state, COUNT(DISTINCT county), COUNT(zip_code)
         FROM zip_county
         WHERE state LIKE ?1 ESCAPE '\\'
         GROUP BY state",
    )?;
    let matches = stmt
        .query_map([pattern], |row| {
            let state: String = row.get(0)?;
            let mut m = LocationMatch::new(MatchKind::State, state.clone());
            m.state = Some(state);
            m.county_count = row.get(1)?;
            m.zip_count = row.get(2)?;
            Ok(m)
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to search states")?;
    Ok(matches)
}

// ============================================================================
// STATS & ANALYTICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDistribution {
    pub state: String,
    pub county_count: i64,
    pub zip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_zip_codes: i64,
    pub total_counties: i64,
    pub total_states: i64,
    pub total_health_records: i64,
    pub state_distribution: Vec<StateDistribution>,
}

pub fn stats(conn: &Connection) -> Result<DatasetStats> {
    let (total_zip_codes, total_counties, total_states): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT county || ', ' || state), COUNT(DISTINCT state)
         FROM zip_county",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let total_health_records: i64 =
        conn.query_row("SELECT COUNT(*) FROM county_health_rankings", [], |row| row.get(0))?;

    let state_distribution = list_states(conn, None)?
        .into_iter()
        .map(|s| StateDistribution {
            state: s.state,
            county_count: s.county_count,
            zip_count: s.zip_count,
        })
        .collect();

    Ok(DatasetStats {
        total_zip_codes,
        total_counties,
        total_states,
        total_health_records,
        state_distribution,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthByState {
    pub state: String,
    pub county_count: i64,
    pub health_records: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    pub geographic_distribution: Vec<StateSummary>,
    pub top_cities: Vec<CitySummary>,
    pub health_by_state: Vec<HealthByState>,
}

pub fn analytics(conn: &Connection) -> Result<Analytics> {
    let geographic_distribution = list_states(conn, None)?;
    let top_cities = list_cities(conn, None, Some(TOP_CITY_LIMIT))?;

    let sql = format!(
        "SELECT state, COUNT(DISTINCT county), COUNT(*)
         FROM county_health_rankings
         WHERE {}
         GROUP BY state
         ORDER BY COUNT(DISTINCT county) DESC, state",
        RANKABLE_COUNTY_SQL
    );
    let mut stmt = conn.prepare(&sql)?;
    let health_by_state = stmt
        .query_map(params![], |row| {
            Ok(HealthByState {
                state: row.get(0)?,
                county_count: row.get(1)?,
                health_records: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to summarize health records")?;

    Ok(Analytics {
        geographic_distribution,
        top_cities,
        health_by_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_health_measures, insert_locations, setup_database, LocationRecord};

    fn zip(zip: &str, county: &str, state: &str, city: Option<&str>, metro: Option<&str>) -> LocationRecord {
        LocationRecord {
            zip_code: zip.to_string(),
            county: county.to_string(),
            state: state.to_string(),
            city: city.map(str::to_string),
            metro_area: metro.map(str::to_string),
        }
    }

    fn measure(county: &str, state: &str, name: &str, raw: &str) -> HealthMeasureRecord {
        HealthMeasureRecord {
            county: county.to_string(),
            state: state.to_string(),
            fips_code: None,
            measure_name: name.to_string(),
            raw_value: Some(raw.to_string()),
            year_span: None,
            release_year: Some(2024),
        }
    }

    fn seeded_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let chicago = Some("Chicago-Naperville-Elgin");
        insert_locations(
            &conn,
            &[
                zip("60601", "Cook County", "IL", Some("Chicago"), chicago),
                zip("60602", "Cook County", "IL", Some("Chicago"), chicago),
                zip("60044", "Lake County", "IL", Some("Lake Bluff"), chicago),
                zip("62701", "Sangamon County", "IL", Some("Springfield"), None),
                zip("65801", "Greene County", "MO", Some("Springfield"), None),
                zip("44077", "Lake County", "OH", Some("Painesville"), None),
                zip("99999", "Kusilvak Census Area", "AK", None, None),
            ],
        )
        .unwrap();

        insert_health_measures(
            &conn,
            &[
                measure("Cook County", "IL", "Adult obesity", "0.30"),
                measure("Lake County", "IL", "Adult obesity", "0.20"),
                measure("Illinois", "IL", "Adult obesity", "0.31"),
                measure("Greene County", "MO", "Uninsured", "0.10"),
            ],
        )
        .unwrap();

        conn
    }

    #[test]
    fn test_list_counties() {
        let conn = seeded_db();

        let all = list_counties(&conn, None, None).unwrap();
        assert_eq!(all.len(), 6);

        let il = list_counties(&conn, Some("IL"), None).unwrap();
        let names: Vec<&str> = il.iter().map(|c| c.county.as_str()).collect();
        assert_eq!(names, vec!["Cook County", "Lake County", "Sangamon County"]);
        assert_eq!(il[0].zip_count, 2);

        assert_eq!(list_counties(&conn, None, Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_county_details() {
        let conn = seeded_db();

        let cook = county_details(&conn, "Cook County", Some("IL")).unwrap().unwrap();
        assert_eq!(cook.zip_codes, vec!["60601", "60602"]);
        assert_eq!(cook.health_measures.len(), 1);
        assert_eq!(cook.health_score, 94.0);

        // Without a state the alphabetically first state wins
        let lake = county_details(&conn, "Lake County", None).unwrap().unwrap();
        assert_eq!(lake.state, "IL");

        assert!(county_details(&conn, "Nowhere County", None).unwrap().is_none());
    }

    #[test]
    fn test_zip_details() {
        let conn = seeded_db();

        let details = zip_details(&conn, "60601").unwrap().unwrap();
        assert_eq!(details.location.county, "Cook County");
        assert_eq!(details.statistics.total_zips_in_county, 2);
        assert_eq!(details.statistics.total_zips_in_city, 2);
        assert_eq!(details.county_zips, vec!["60601", "60602"]);
        assert_eq!(details.health_measures.len(), 1);

        let no_city = zip_details(&conn, "99999").unwrap().unwrap();
        assert_eq!(no_city.statistics.total_zips_in_city, 0);
        assert!(no_city.city_zips.is_empty());
        assert_eq!(no_city.health_score, 0.0);

        assert!(zip_details(&conn, "00000").unwrap().is_none());
    }

    #[test]
    fn test_zip_summary_caps_measures() {
        let conn = seeded_db();
        insert_health_measures(
            &conn,
            &[
                measure("Cook County", "IL", "Uninsured", "0.08"),
                measure("Cook County", "IL", "Unemployment", "0.05"),
                measure("Cook County", "IL", "Children in poverty", "0.15"),
                measure("Cook County", "IL", "Physical inactivity", "0.20"),
                measure("Cook County", "IL", "Violent crime rate", "400"),
                measure("Cook County", "IL", "Premature death", "8000"),
            ],
        )
        .unwrap();

        let summary = zip_summary(&conn, "60601").unwrap().unwrap();
        assert_eq!(summary.county, "Cook County");
        assert_eq!(summary.default_city.as_deref(), Some("Chicago"));
        assert_eq!(summary.health_rankings.len(), ZIP_SUMMARY_MEASURE_LIMIT);
        assert!(summary
            .health_rankings
            .iter()
            .all(|m| m.measure_name != "Premature death"));

        let details = zip_details(&conn, "60601").unwrap().unwrap();
        assert_eq!(details.health_measures.len(), 6);

        assert!(zip_summary(&conn, "00000").unwrap().is_none());
    }

    #[test]
    fn test_limit_value() {
        assert_eq!(limit_value(None), Value::Integer(-1));
        assert_eq!(limit_value(Some(5)), Value::Integer(5));
        assert_eq!(limit_value(Some(usize::MAX)), Value::Integer(-1));
    }

    #[test]
    fn test_list_cities() {
        let conn = seeded_db();

        let cities = list_cities(&conn, None, None).unwrap();
        assert_eq!(cities[0].city, "Chicago");
        assert_eq!(cities[0].zip_count, 2);

        let springfield = cities.iter().find(|c| c.city == "Springfield").unwrap();
        assert_eq!(springfield.state_count, 2);
        assert_eq!(springfield.states, vec!["IL", "MO"]);

        // The ZIP without a city is not a city
        assert_eq!(cities.iter().map(|c| c.zip_count).sum::<i64>(), 6);
    }

    #[test]
    fn test_list_states() {
        let conn = seeded_db();
        let states = list_states(&conn, None).unwrap();

        assert_eq!(states[0].state, "IL");
        assert_eq!(states[0].county_count, 3);
        assert_eq!(states.len(), 4);
        assert_eq!(list_states(&conn, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_state_details() {
        let conn = seeded_db();

        let il = state_details(&conn, "IL").unwrap().unwrap();
        assert_eq!(il.statistics.zip_count, 4);
        assert_eq!(il.statistics.metro_count, 1);
        assert_eq!(il.metro_areas[0].county_count, 2);

        // State summary row "Illinois" is not ranked
        let ranked: Vec<&str> = il.health_rankings.iter().map(|a| a.county.as_str()).collect();
        assert_eq!(ranked, vec!["Lake County", "Cook County"]);

        assert!(state_details(&conn, "ZZ").unwrap().is_none());
    }

    #[test]
    fn test_metro_details() {
        let conn = seeded_db();

        let metro = metro_details(&conn, "Chicago-Naperville-Elgin").unwrap().unwrap();
        assert_eq!(metro.statistics.county_count, 2);
        assert_eq!(metro.statistics.states, vec!["IL"]);
        assert_eq!(metro.zip_codes.len(), 3);
        assert_eq!(metro.health_rankings.len(), 2);
        assert_eq!(metro.health_rankings[0].county, "Lake County");

        assert!(metro_details(&conn, "Gotham").unwrap().is_none());
    }

    #[test]
    fn test_search_counties_requires_query() {
        let conn = seeded_db();
        assert!(matches!(
            search_counties(&conn, "   "),
            Err(QueryError::MissingParameter("q"))
        ));

        let lake = search_counties(&conn, "lake").unwrap();
        assert_eq!(lake.len(), 2);
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query(" Illinois "), "IL");
        assert_eq!(normalize_query("new york"), "NY");
        assert_eq!(normalize_query("Cook"), "Cook");
    }

    #[test]
    fn test_search_locations_state_name() {
        let conn = seeded_db();
        let search = LocationSearch {
            q: "Missouri".to_string(),
            ..Default::default()
        };

        let results = search_locations(&conn, &search).unwrap();
        assert_eq!(results.query, "MO");
        assert_eq!(results.data[0].kind, MatchKind::State);
        assert_eq!(results.data[0].name, "MO");
    }

    #[test]
    fn test_search_locations_ordering_and_scope() {
        let conn = seeded_db();

        let search = LocationSearch {
            q: "Springfield".to_string(),
            ..Default::default()
        };
        let results = search_locations(&conn, &search).unwrap();
        assert_eq!(results.data.len(), 1);
        assert_eq!(results.data[0].kind, MatchKind::City);
        assert_eq!(results.data[0].county_count, Some(2));

        let search = LocationSearch {
            q: "60".to_string(),
            scope: Some("zip".to_string()),
            state: Some("IL".to_string()),
            limit: Some(2),
        };
        let results = search_locations(&conn, &search).unwrap();
        assert_eq!(results.count, 2);
        assert!(results.data.iter().all(|m| m.kind == MatchKind::Zip));
        assert_eq!(results.data[0].name, "60044");
    }

    #[test]
    fn test_search_locations_exact_match_first() {
        let conn = seeded_db();
        let search = LocationSearch {
            q: "Lake County".to_string(),
            scope: Some("all".to_string()),
            ..Default::default()
        };

        let results = search_locations(&conn, &search).unwrap();
        assert_eq!(results.data.len(), 2);
        assert!(results.data.iter().all(|m| m.name == "Lake County"));
    }

    #[test]
    fn test_search_locations_rejects_bad_input() {
        let conn = seeded_db();

        let blank = LocationSearch::default();
        assert!(matches!(
            search_locations(&conn, &blank),
            Err(QueryError::MissingParameter("q"))
        ));

        let bad_scope = LocationSearch {
            q: "Cook".to_string(),
            scope: Some("planet".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            search_locations(&conn, &bad_scope),
            Err(QueryError::InvalidParameter { name: "type", .. })
        ));
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let conn = seeded_db();
        let search = LocationSearch {
            q: "%".to_string(),
            ..Default::default()
        };
        assert!(search_locations(&conn, &search).unwrap().data.is_empty());
    }

    #[test]
    fn test_stats_and_analytics() {
        let conn = seeded_db();

        let stats = stats(&conn).unwrap();
        assert_eq!(stats.total_zip_codes, 7);
        assert_eq!(stats.total_counties, 6);
        assert_eq!(stats.total_states, 4);
        assert_eq!(stats.total_health_records, 4);

        let analytics = analytics(&conn).unwrap();
        assert_eq!(analytics.top_cities[0].city, "Chicago");
        let il = analytics.health_by_state.iter().find(|h| h.state == "IL").unwrap();
        assert_eq!(il.county_count, 2);
        assert_eq!(il.health_records, 2);
    }
}
