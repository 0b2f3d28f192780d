// County Health Reference API - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod deduplication;
pub mod import;
pub mod locations;
pub mod measures;
pub mod rankings;
pub mod scoring;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    CountyFilter, HealthMeasureRecord, InsertCount, LocationRecord,
    setup_database, insert_locations, insert_health_measures,
    get_measures, get_all_measures, get_metro_measures, count_distinct_counties,
    verify_location_count, verify_health_count,
};
pub use import::{DatasetKind, ImportSummary, detect_dataset, import_csv, import_reader};
pub use measures::{DataFormatError, Measure, PenaltyFamily, weight_for};
pub use scoring::{CountyHealthDetail, compute_county_health_detail, weighted_health_score};
pub use deduplication::{CountyGroup, group_measures, select_representatives};
pub use rankings::{
    CountyAggregate, Pagination, QueryError, RankingPage, RankingQuery,
    aggregate_counties, list_health_rankings,
};

#[cfg(feature = "server")]
pub use api::{AppState, AppError, create_router};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
