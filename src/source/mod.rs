//! Sources supply company parameters and game master overrides.
//!
//! Both kinds of data are optional from the engine's point of view: a source is allowed to fail
//! and the engine decides how to degrade (keep the previous companies, apply no overrides). Sources
//! therefore just report errors and never try to recover themselves.
use anyhow::Result;

use crate::types::{Company, PriceOverride};

pub mod sample;
pub mod sheet;

pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;
    fn load_companies(&self) -> Result<Vec<Company>>;
    fn load_overrides(&self) -> Result<Vec<PriceOverride>>;
}
