use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::measures::recognized_names;

/// Location Record - one row per ZIP code
/// Immutable after import; zip_code is the unique key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub zip_code: String,
    pub county: String,
    pub state: String,
    pub city: Option<String>,
    pub metro_area: Option<String>,
}

/// Health Measure Record - one row per (county, state, measure, release year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMeasureRecord {
    pub county: String,
    pub state: String,

    /// More precise county identifier than (county, state); often blank
    pub fips_code: Option<String>,

    pub measure_name: String,

    /// String-encoded number. May be empty or garbage upstream.
    pub raw_value: Option<String>,

    pub year_span: Option<String>,
    pub release_year: Option<i64>,
}

impl HealthMeasureRecord {
    /// Non-blank FIPS code, if any
    pub fn fips(&self) -> Option<&str> {
        self.fips_code
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// Optional exact-match filters for ranking queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountyFilter {
    pub county: Option<String>,
    pub state: Option<String>,
}

impl CountyFilter {
    pub fn new(county: Option<String>, state: Option<String>) -> Self {
        // Blank query parameters mean "no filter"
        let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            county: non_blank(county),
            state: non_blank(state),
        }
    }

    pub fn for_state(state: &str) -> Self {
        Self::new(None, Some(state.to_string()))
    }

    pub fn matches(&self, county: &str, state: &str) -> bool {
        self.county.as_deref().map_or(true, |c| c == county)
            && self.state.as_deref().map_or(true, |s| s == state)
    }

    /// Extra `AND` clauses plus their bound values
    fn sql_conditions(&self, county_col: &str, state_col: &str) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut values = Vec::new();

        if let Some(county) = &self.county {
            sql.push_str(&format!(" AND {} = ?", county_col));
            values.push(Value::Text(county.clone()));
        }
        if let Some(state) = &self.state {
            sql.push_str(&format!(" AND {} = ?", state_col));
            values.push(Value::Text(state.clone()));
        }

        (sql, values)
    }
}

/// Import counters for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertCount {
    pub inserted: usize,
    pub skipped: usize,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS zip_county (
            zip_code TEXT PRIMARY KEY,
            county TEXT NOT NULL,
            state TEXT NOT NULL,
            default_city TEXT,
            metro_area TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS county_health_rankings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state TEXT NOT NULL,
            county TEXT NOT NULL,
            fipscode TEXT,
            measure_name TEXT NOT NULL,
            raw_value TEXT,
            year_span TEXT,
            data_release_year INTEGER
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_zip_county_county ON zip_county(county, state)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_zip_county_state ON zip_county(state)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_zip_county_city ON zip_county(default_city)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_zip_county_metro ON zip_county(metro_area)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_health_county ON county_health_rankings(county, state)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_health_measure ON county_health_rankings(measure_name)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// INSERTS (import only - the API never writes)
// ============================================================================

/// Insert location records, skipping ZIP codes that already exist
pub fn insert_locations(conn: &Connection, records: &[LocationRecord]) -> Result<InsertCount> {
    let mut count = InsertCount::default();
    let mut stmt = conn.prepare(
        "INSERT INTO zip_county (zip_code, county, state, default_city, metro_area)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for record in records {
        let result = stmt.execute(params![
            record.zip_code,
            record.county,
            record.state,
            record.city,
            record.metro_area,
        ]);

        match result {
            Ok(_) => count.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                count.skipped += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to insert ZIP {}", record.zip_code))
            }
        }
    }

    Ok(count)
}

pub fn insert_health_measures(
    conn: &Connection,
    records: &[HealthMeasureRecord],
) -> Result<InsertCount> {
    let mut stmt = conn.prepare(
        "INSERT INTO county_health_rankings (
            state, county, fipscode, measure_name, raw_value, year_span, data_release_year
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for record in records {
        stmt.execute(params![
            record.state,
            record.county,
            record.fips_code,
            record.measure_name,
            record.raw_value,
            record.year_span,
            record.release_year,
        ])
        .with_context(|| {
            format!(
                "Failed to insert measure {:?} for {}, {}",
                record.measure_name, record.county, record.state
            )
        })?;
    }

    Ok(InsertCount {
        inserted: records.len(),
        skipped: 0,
    })
}

// ============================================================================
// HEALTH MEASURE QUERIES
// ============================================================================

/// SQL `IN (...)` list of the recognized vocabulary
fn recognized_in_list() -> String {
    recognized_names()
        .iter()
        .map(|name| format!("'{}'", name.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rows that are not real counties never reach a ranking:
/// national summary rows, state summary rows tagged as counties, and names
/// outside the "... County" convention. Case-sensitive, same as
/// `rankings::is_rankable_county`.
pub const RANKABLE_COUNTY_SQL: &str = "county != 'United States'
    AND county != state
    AND instr(county, 'County') > 0";

const MEASURE_COLUMNS: &str =
    "county, state, fipscode, measure_name, raw_value, year_span, data_release_year";

fn measure_from_row(row: &Row) -> rusqlite::Result<HealthMeasureRecord> {
    Ok(HealthMeasureRecord {
        county: row.get(0)?,
        state: row.get(1)?,
        fips_code: row.get(2)?,
        measure_name: row.get(3)?,
        raw_value: row.get(4)?,
        year_span: row.get(5)?,
        release_year: row.get(6)?,
    })
}

/// Recognized measures for one county, newest release first
pub fn get_measures(
    conn: &Connection,
    county: &str,
    state: &str,
) -> Result<Vec<HealthMeasureRecord>> {
    let sql = format!(
        "SELECT {}
         FROM county_health_rankings
         WHERE county = ?1 AND state = ?2
         AND measure_name IN ({})
         ORDER BY data_release_year DESC, measure_name, id",
        MEASURE_COLUMNS,
        recognized_in_list()
    );

    let mut stmt = conn.prepare(&sql)?;
    let measures = stmt
        .query_map(params![county, state], measure_from_row)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to load measures for {}, {}", county, state))?;

    Ok(measures)
}

/// Recognized measures for every rankable county matching `filter`,
/// in storage order
pub fn get_all_measures(conn: &Connection, filter: &CountyFilter) -> Result<Vec<HealthMeasureRecord>> {
    let (conditions, values) = filter.sql_conditions("county", "state");
    let sql = format!(
        "SELECT {}
         FROM county_health_rankings
         WHERE {}
         AND measure_name IN ({}){}
         ORDER BY id",
        MEASURE_COLUMNS,
        RANKABLE_COUNTY_SQL,
        recognized_in_list(),
        conditions
    );

    let mut stmt = conn.prepare(&sql)?;
    let measures = stmt
        .query_map(params_from_iter(values), measure_from_row)?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to load ranking measures")?;

    Ok(measures)
}

/// Recognized measures for every rankable county with a ZIP in `metro_area`
pub fn get_metro_measures(conn: &Connection, metro_area: &str) -> Result<Vec<HealthMeasureRecord>> {
    let sql = format!(
        "SELECT {}
         FROM county_health_rankings h
         WHERE {}
         AND measure_name IN ({})
         AND EXISTS (
             SELECT 1 FROM zip_county z
             WHERE z.metro_area = ?1 AND z.county = h.county AND z.state = h.state
         )
         ORDER BY id",
        MEASURE_COLUMNS,
        RANKABLE_COUNTY_SQL,
        recognized_in_list()
    );

    let mut stmt = conn.prepare(&sql)?;
    let measures = stmt
        .query_map([metro_area], measure_from_row)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to load measures for metro {}", metro_area))?;

    Ok(measures)
}

/// Distinct (county, state) pairs under the ranking exclusion rules.
/// Not restricted to the recognized vocabulary.
pub fn count_distinct_counties(conn: &Connection, filter: &CountyFilter) -> Result<i64> {
    let (conditions, values) = filter.sql_conditions("county", "state");
    let sql = format!(
        "SELECT COUNT(*) FROM (
             SELECT DISTINCT county, state
             FROM county_health_rankings
             WHERE {}{}
         )",
        RANKABLE_COUNTY_SQL, conditions
    );

    let total: i64 = conn
        .query_row(&sql, params_from_iter(values), |row| row.get(0))
        .context("Failed to count counties")?;

    Ok(total)
}

// ============================================================================
// COUNTS
// ============================================================================

pub fn verify_location_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM zip_county", [], |row| row.get(0))?;

    Ok(count)
}

pub fn verify_health_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM county_health_rankings", [], |row| {
        row.get(0)
    })?;

    Ok(count)
}
