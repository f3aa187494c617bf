use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::MarketError;

pub type Symbol = String;
pub type Step = u64;

/// Wall-clock time in unix seconds, used for every timestamp the market writes.
pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Parameters for a single tradable company. Loaded fresh from the source before every advance so
/// that the game master can change them between steps.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Company {
    pub symbol: Symbol,
    pub name: String,
    pub initial_price: f64,
    pub drift: f64,
    pub volatility: f64,
    #[serde(default)]
    pub description: String,
}

impl Company {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        initial_price: f64,
        drift: f64,
        volatility: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            initial_price,
            drift,
            volatility,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), MarketError> {
        if self.symbol.trim().is_empty() {
            return Err(MarketError::InvalidParameter(
                "company symbol must not be empty".to_string(),
            ));
        }
        if !self.initial_price.is_finite() || self.initial_price <= 0.0 {
            return Err(MarketError::InvalidParameter(format!(
                "{}: initial price must be positive, got {}",
                self.symbol, self.initial_price
            )));
        }
        if !self.drift.is_finite() {
            return Err(MarketError::InvalidParameter(format!(
                "{}: drift must be finite, got {}",
                self.symbol, self.drift
            )));
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(MarketError::InvalidParameter(format!(
                "{}: volatility must be non-negative, got {}",
                self.symbol, self.volatility
            )));
        }
        Ok(())
    }

    pub fn info(&self) -> CompanyInfo {
        CompanyInfo {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CompanyInfo {
    pub symbol: Symbol,
    pub name: String,
    pub description: String,
}

/// A price for one symbol at one step. `(symbol, step)` is the identity of a record, writing the
/// same pair again replaces the earlier value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PriceRecord {
    pub symbol: Symbol,
    pub step: Step,
    pub price: f64,
    pub timestamp: i64,
    pub is_override: bool,
}

impl PriceRecord {
    pub fn generated(symbol: impl Into<String>, step: Step, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            step,
            price,
            timestamp,
            is_override: false,
        }
    }

    pub fn overridden(symbol: impl Into<String>, step: Step, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            step,
            price,
            timestamp,
            is_override: true,
        }
    }
}

/// The market singleton. `is_generating` is the persisted form of the generation lock.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MarketState {
    pub current_step: Step,
    pub last_updated: i64,
    pub is_generating: bool,
}

impl MarketState {
    pub fn new(last_updated: i64) -> Self {
        Self {
            current_step: 0,
            last_updated,
            is_generating: false,
        }
    }
}

/// A price forced by the game master for the next advance only. Once applied it is stored as an
/// ordinary [PriceRecord] with `is_override` set.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PriceOverride {
    pub symbol: Symbol,
    pub price: f64,
    pub timestamp: i64,
}

impl PriceOverride {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp: now(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MarketSnapshot {
    pub step: Step,
    pub last_updated: i64,
    pub prices: BTreeMap<Symbol, f64>,
    pub companies: BTreeMap<Symbol, CompanyInfo>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AdvanceOutcome {
    pub step: Step,
    pub timestamp: i64,
    pub prices: BTreeMap<Symbol, f64>,
    pub overrides_applied: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PricePreview {
    pub symbol: Symbol,
    pub name: String,
    pub current_price: f64,
    pub calculated_price: f64,
    pub change_pct: f64,
}
