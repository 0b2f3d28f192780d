// 📥 Dataset Import - CSV → SQLite
// Recognizes the two reference datasets by their header row and loads them
// into the typed tables created by `db::setup_database`.

use anyhow::{anyhow, bail, Context, Result};
use csv::StringRecord;
use rusqlite::Connection;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::db::{
    insert_health_measures, insert_locations, HealthMeasureRecord, InsertCount, LocationRecord,
};

// ============================================================================
// DATASET DETECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// ZIP → county / city / state / metro mapping
    Locations,

    /// County Health Rankings measure rows
    HealthMeasures,
}

impl DatasetKind {
    pub fn table(&self) -> &'static str {
        match self {
            DatasetKind::Locations => "zip_county",
            DatasetKind::HealthMeasures => "county_health_rankings",
        }
    }
}

// Accepted spellings per column, compared against cleaned, lowercased headers
const ZIP_ALIASES: &[&str] = &["zip_code", "zip", "zipcode", "col__zip", "col_zip"];
const COUNTY_ALIASES: &[&str] = &["county", "county_name"];
const STATE_ALIASES: &[&str] = &["state_abbreviation", "state", "state_code"];
const CITY_ALIASES: &[&str] = &["default_city", "city", "primary_city"];
const METRO_ALIASES: &[&str] = &["metro_area", "metro", "cbsa_name"];
const FIPS_ALIASES: &[&str] = &["fipscode", "fips_code", "fips"];
const MEASURE_ALIASES: &[&str] = &["measure_name"];
const RAW_VALUE_ALIASES: &[&str] = &["raw_value"];
const YEAR_SPAN_ALIASES: &[&str] = &["year_span"];
const RELEASE_YEAR_ALIASES: &[&str] = &["data_release_year", "release_year"];

/// Make a header usable as a SQL identifier:
/// non-alphanumerics become `_`, a leading non-letter gets a `col_` prefix,
/// and an empty header becomes `col_<position>`.
pub fn clean_header(header: &str, position: usize) -> String {
    let cleaned: String = header
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();

    match cleaned.chars().next() {
        None => format!("col_{}", position),
        Some(first) if !first.is_alphabetic() => format!("col_{}", cleaned),
        Some(_) => cleaned,
    }
}

/// Cleaned, lowercased header row
pub fn clean_headers(headers: &StringRecord) -> Vec<String> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| clean_header(h, i).to_lowercase())
        .collect()
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

fn require_column(headers: &[String], aliases: &[&str]) -> Result<usize> {
    find_column(headers, aliases)
        .ok_or_else(|| anyhow!("Missing column (expected one of {:?})", aliases))
}

/// Decide which dataset a header row belongs to
pub fn detect_dataset(headers: &[String]) -> Result<DatasetKind> {
    if find_column(headers, MEASURE_ALIASES).is_some() {
        return Ok(DatasetKind::HealthMeasures);
    }

    if find_column(headers, ZIP_ALIASES).is_some() && find_column(headers, COUNTY_ALIASES).is_some() {
        return Ok(DatasetKind::Locations);
    }

    bail!("Unrecognized CSV layout: {:?}", headers)
}

// ============================================================================
// ROW READERS
// ============================================================================

/// Column positions resolved once per file
struct LocationColumns {
    zip: usize,
    county: usize,
    state: usize,
    city: Option<usize>,
    metro: Option<usize>,
}

struct MeasureColumns {
    county: usize,
    state: usize,
    fips: Option<usize>,
    measure: usize,
    raw_value: usize,
    year_span: Option<usize>,
    release_year: Option<usize>,
}

/// Cell value with short rows padded as empty strings
fn cell(record: &StringRecord, index: usize) -> &str {
    record.get(index).unwrap_or("").trim()
}

fn optional_cell(record: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .map(|i| cell(record, i))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn read_locations<R: Read>(
    rdr: &mut csv::Reader<R>,
    headers: &[String],
) -> Result<(usize, Vec<LocationRecord>)> {
    let cols = LocationColumns {
        zip: require_column(headers, ZIP_ALIASES)?,
        county: require_column(headers, COUNTY_ALIASES)?,
        state: require_column(headers, STATE_ALIASES)?,
        city: find_column(headers, CITY_ALIASES),
        metro: find_column(headers, METRO_ALIASES),
    };

    let mut rows_read = 0;
    let mut records = Vec::new();

    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", line + 2))?;
        rows_read += 1;

        let zip_code = cell(&record, cols.zip);
        if zip_code.is_empty() {
            debug!(row = line + 2, "Skipping location row without ZIP code");
            continue;
        }

        records.push(LocationRecord {
            zip_code: zip_code.to_string(),
            county: cell(&record, cols.county).to_string(),
            state: cell(&record, cols.state).to_string(),
            city: optional_cell(&record, cols.city),
            metro_area: optional_cell(&record, cols.metro),
        });
    }

    Ok((rows_read, records))
}

fn read_measures<R: Read>(
    rdr: &mut csv::Reader<R>,
    headers: &[String],
) -> Result<(usize, Vec<HealthMeasureRecord>)> {
    let cols = MeasureColumns {
        county: require_column(headers, COUNTY_ALIASES)?,
        state: require_column(headers, STATE_ALIASES)?,
        fips: find_column(headers, FIPS_ALIASES),
        measure: require_column(headers, MEASURE_ALIASES)?,
        raw_value: require_column(headers, RAW_VALUE_ALIASES)?,
        year_span: find_column(headers, YEAR_SPAN_ALIASES),
        release_year: find_column(headers, RELEASE_YEAR_ALIASES),
    };

    let mut rows_read = 0;
    let mut records = Vec::new();

    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", line + 2))?;
        rows_read += 1;

        // Raw values are kept verbatim; scoring decides what is usable
        let raw_value = record
            .get(cols.raw_value)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        records.push(HealthMeasureRecord {
            county: cell(&record, cols.county).to_string(),
            state: cell(&record, cols.state).to_string(),
            fips_code: optional_cell(&record, cols.fips),
            measure_name: cell(&record, cols.measure).to_string(),
            raw_value,
            year_span: optional_cell(&record, cols.year_span),
            release_year: optional_cell(&record, cols.release_year)
                .and_then(|y| y.parse::<i64>().ok()),
        });
    }

    Ok((rows_read, records))
}

// ============================================================================
// IMPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub dataset: DatasetKind,
    pub table: &'static str,
    pub rows_read: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Import one CSV stream inside a single transaction
pub fn import_reader<R: Read>(conn: &Connection, reader: R) -> Result<ImportSummary> {
    // Rows may be shorter or longer than the header
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = clean_headers(rdr.headers().context("Failed to read CSV header")?);
    let dataset = detect_dataset(&headers)?;
    info!(?dataset, columns = headers.len(), "Detected dataset");

    let tx = conn.unchecked_transaction()?;
    let (rows_read, count): (usize, InsertCount) = match dataset {
        DatasetKind::Locations => {
            let (rows_read, records) = read_locations(&mut rdr, &headers)?;
            (rows_read, insert_locations(&tx, &records)?)
        }
        DatasetKind::HealthMeasures => {
            let (rows_read, records) = read_measures(&mut rdr, &headers)?;
            (rows_read, insert_health_measures(&tx, &records)?)
        }
    };
    tx.commit()?;

    let skipped = rows_read - count.inserted;
    info!(
        table = dataset.table(),
        rows_read,
        inserted = count.inserted,
        skipped,
        "Import complete"
    );

    Ok(ImportSummary {
        dataset,
        table: dataset.table(),
        rows_read,
        inserted: count.inserted,
        skipped,
    })
}

pub fn import_csv(conn: &Connection, csv_path: &Path) -> Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {:?}", csv_path))?;

    import_reader(conn, file).with_context(|| format!("Failed to import {:?}", csv_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_measures, setup_database, verify_health_count, verify_location_count};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_clean_header() {
        assert_eq!(clean_header("State Abbreviation", 0), "State_Abbreviation");
        assert_eq!(clean_header("_zip", 0), "col__zip");
        assert_eq!(clean_header("2024 value", 3), "col_2024_value");
        assert_eq!(clean_header("   ", 4), "col_4");
        assert_eq!(clean_header("Raw value", 5), "Raw_value");
    }

    #[test]
    fn test_detect_dataset() {
        let zips = vec!["col__zip".to_string(), "county".to_string(), "state_abbreviation".to_string()];
        assert_eq!(detect_dataset(&zips).unwrap(), DatasetKind::Locations);

        let health = vec!["state".to_string(), "county".to_string(), "measure_name".to_string()];
        assert_eq!(detect_dataset(&health).unwrap(), DatasetKind::HealthMeasures);

        let unknown = vec!["date".to_string(), "amount".to_string()];
        assert!(detect_dataset(&unknown).is_err());
    }

    #[test]
    fn test_import_locations_pads_short_rows() {
        let conn = test_db();
        let csv = "\
 zip,county,state_abbreviation,default_city,metro_area
60601,Cook County,IL,Chicago,Chicago-Naperville-Elgin
60602,Cook County,IL
60601,Cook County,IL,Chicago,
,Nowhere County,ZZ,Nowhere,
";

        let summary = import_reader(&conn, csv.as_bytes()).unwrap();

        assert_eq!(summary.dataset, DatasetKind::Locations);
        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(verify_location_count(&conn).unwrap(), 2);

        let city: Option<String> = conn
            .query_row("SELECT default_city FROM zip_county WHERE zip_code = '60602'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(city, None);
    }

    #[test]
    fn test_import_health_measures() {
        let conn = test_db();
        let csv = "\
State,County,fipscode,Measure name,Raw value,Year span,Data Release Year
IL,Cook County,17031,Adult obesity,0.30,2021,2024
IL,Cook County,,Uninsured,,2021,2024
IL,Cook County,17031,Violent crime rate,n/a,2018-2020,2024,extra
";

        let summary = import_reader(&conn, csv.as_bytes()).unwrap();
        assert_eq!(summary.dataset, DatasetKind::HealthMeasures);
        assert_eq!(summary.inserted, 3);
        assert_eq!(verify_health_count(&conn).unwrap(), 3);

        let measures = get_measures(&conn, "Cook County", "IL").unwrap();
        let obesity = measures.iter().find(|m| m.measure_name == "Adult obesity").unwrap();
        assert_eq!(obesity.raw_value.as_deref(), Some("0.30"));
        assert_eq!(obesity.release_year, Some(2024));
        assert_eq!(obesity.fips_code.as_deref(), Some("17031"));

        let uninsured = measures.iter().find(|m| m.measure_name == "Uninsured").unwrap();
        assert_eq!(uninsured.raw_value, None);
        assert_eq!(uninsured.fips_code, None);

        let crime = measures.iter().find(|m| m.measure_name == "Violent crime rate").unwrap();
        assert_eq!(crime.raw_value.as_deref(), Some("n/a"));
    }

    #[test]
    fn test_import_rejects_unknown_layout() {
        let conn = test_db();
        let csv = "Date,Description,Amount\n12/31/2024,COFFEE,4.50\n";
        assert!(import_reader(&conn, csv.as_bytes()).is_err());
    }
}
