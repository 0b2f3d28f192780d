// ⚙️ Configuration - environment driven, with logged defaults

use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

pub const DB_PATH_VAR: &str = "COUNTY_HEALTH_DB";
pub const PORT_VAR: &str = "PORT";
pub const BIND_ADDR_VAR: &str = "BIND_ADDR";

pub const DEFAULT_DB_PATH: &str = "data.db";
pub const DEFAULT_PORT: &str = "5001";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: IpAddr,
    pub port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            database_path: try_load(DB_PATH_VAR, DEFAULT_DB_PATH)?,
            bind_addr: try_load(BIND_ADDR_VAR, DEFAULT_BIND_ADDR)?,
            port: try_load(PORT_VAR, DEFAULT_PORT)?,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse_value(key, &raw)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Environment misconfigured: {key}={raw:?} ({e})")
    })
}
