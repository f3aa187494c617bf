use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::engine::MarketEngine;
use crate::model::PriceModel;
use crate::source::sample::SampleSource;
use crate::source::sheet::SheetSource;
use crate::source::MarketDataSource;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::MarketStore;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// Server settings, read from `KAIROS_*` environment variables.
///
/// Without a database the market lives in memory and is lost on exit. Without a companies URL the
/// built-in sample companies are used.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketConfig {
    pub address: String,
    pub port: u16,
    pub database: Option<PathBuf>,
    pub companies_url: Option<String>,
    pub overrides_url: Option<String>,
    pub seed: Option<u64>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            database: None,
            companies_url: None,
            overrides_url: None,
            seed: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", name, value))
}

impl MarketConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Environment first, then positional `[address] [port]` arguments on top.
    pub fn from_env_and_args(args: &[String]) -> Result<Self> {
        Self::from_env()?.with_args(args)
    }

    pub fn from_vars<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(address) = non_empty(get("KAIROS_ADDRESS")) {
            config.address = address;
        }
        if let Some(port) = non_empty(get("KAIROS_PORT")) {
            config.port = parse("KAIROS_PORT", &port)?;
        }
        config.database = non_empty(get("KAIROS_DATABASE")).map(PathBuf::from);
        config.companies_url = non_empty(get("KAIROS_COMPANIES_URL"));
        config.overrides_url = non_empty(get("KAIROS_OVERRIDES_URL"));
        if let Some(seed) = non_empty(get("KAIROS_SEED")) {
            config.seed = Some(parse("KAIROS_SEED", &seed)?);
        }
        Ok(config)
    }

    /// `args` as returned by `env::args`, so the first entry is the program name.
    pub fn with_args(mut self, args: &[String]) -> Result<Self> {
        if let Some(address) = args.get(1) {
            self.address = address.clone();
        }
        if let Some(port) = args.get(2) {
            self.port = parse("port", port)?;
        }
        Ok(self)
    }

    pub fn build_store(&self) -> Result<Arc<dyn MarketStore>> {
        match &self.database {
            Some(path) => {
                info!("CONFIG: Using SQLite store at {}", path.display());
                Ok(Arc::new(SqliteStore::open(path)?))
            }
            None => {
                info!("CONFIG: No database configured, market will be kept in memory");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    pub fn build_source(&self) -> Result<Box<dyn MarketDataSource>> {
        match &self.companies_url {
            Some(url) => {
                info!("CONFIG: Reading companies from spreadsheet");
                Ok(Box::new(SheetSource::new(url.clone(), self.overrides_url.clone())?))
            }
            None => {
                info!("CONFIG: No spreadsheet configured, using sample companies");
                Ok(Box::new(SampleSource::new()))
            }
        }
    }

    pub fn build_model(&self) -> PriceModel {
        match self.seed {
            Some(seed) => {
                info!("CONFIG: Seeding price model with {}", seed);
                PriceModel::seeded(seed)
            }
            None => PriceModel::from_entropy(),
        }
    }

    pub fn build_engine(&self) -> Result<MarketEngine> {
        Ok(MarketEngine::with_model(
            self.build_store()?,
            self.build_source()?,
            self.build_model(),
        ))
    }
}
