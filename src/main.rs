// County Health CLI - import CSVs and inspect scores from the terminal

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use county_health::config::{DB_PATH_VAR, DEFAULT_DB_PATH};
use county_health::{
    compute_county_health_detail, import_csv, list_health_rankings, locations, setup_database,
    verify_health_count, verify_location_count, RankingQuery,
};

#[derive(Parser)]
#[command(name = "county-health", version, about = "County health reference data tools")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = DB_PATH_VAR, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load ZIP/county or health-measure CSV files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ranked counties, best first
    Rankings {
        #[arg(long)]
        county: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        per_page: Option<i64>,
    },

    /// Weighted score and measures for one county
    County { county: String, state: String },

    /// Row counts and per-state distribution
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "county_health=info,warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Import { files } => run_import(&cli.db, &files),
        Command::Rankings {
            county,
            state,
            page,
            per_page,
        } => {
            let conn = open_existing(&cli.db)?;
            let query = RankingQuery {
                county,
                state,
                page,
                per_page,
            };
            print_json(&list_health_rankings(&conn, &query)?)
        }
        Command::County { county, state } => {
            let conn = open_existing(&cli.db)?;
            print_json(&compute_county_health_detail(&conn, &county, &state)?)
        }
        Command::Stats => {
            let conn = open_existing(&cli.db)?;
            print_json(&locations::stats(&conn)?)
        }
    }
}

fn run_import(db_path: &Path, files: &[PathBuf]) -> Result<()> {
    println!("🗄️  Data Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n🔧 Setting up database...");
    let conn = Connection::open(db_path)?;
    setup_database(&conn)?;
    println!("✓ Database initialized at {:?}", db_path);

    for file in files {
        println!("\n📂 Importing {:?}...", file);
        let summary = import_csv(&conn, file)?;
        println!(
            "✓ {} rows → {} ({} inserted, {} skipped)",
            summary.rows_read, summary.table, summary.inserted, summary.skipped
        );
    }

    println!("\n🔍 Verifying database...");
    println!("✓ zip_county: {} rows", verify_location_count(&conn)?);
    println!("✓ county_health_rankings: {} rows", verify_health_count(&conn)?);

    Ok(())
}

fn open_existing(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        bail!(
            "Database not found at {:?}. Run `county-health import <CSV>...` first.",
            db_path
        );
    }
    Ok(Connection::open(db_path)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
