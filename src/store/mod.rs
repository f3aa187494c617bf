//! Persistence for price records and the market singleton.
//!
//! Every call is expected to be durable and atomic on its own, the engine does not layer any
//! durability on top. The one operation that must be a true compare-and-set is
//! [MarketStore::try_lock_generation]: two callers racing on it must never both see `true`.
use std::collections::BTreeMap;

use anyhow::Result;

use crate::types::{MarketState, PriceRecord, Step, Symbol};

pub mod memory;
pub mod sqlite;

pub trait MarketStore: Send + Sync {
    /// Record with the highest step for `symbol`.
    fn get_latest_price(&self, symbol: &str) -> Result<Option<PriceRecord>>;
    /// Record with the highest step that is `<= step`.
    fn get_latest_price_as_of(&self, symbol: &str, step: Step) -> Result<Option<PriceRecord>>;
    /// Ascending by step. With `limit`, only the most recent `limit` records, still ascending.
    fn get_price_history(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<PriceRecord>>;
    fn get_all_latest_prices(&self) -> Result<BTreeMap<Symbol, f64>>;
    /// Latest price per symbol ignoring anything written after `step`.
    fn get_prices_as_of(&self, step: Step) -> Result<BTreeMap<Symbol, f64>>;
    fn has_prices(&self) -> Result<bool>;
    /// Upsert keyed by `(symbol, step)`.
    fn save_price(&self, record: &PriceRecord) -> Result<()>;

    fn get_market_state(&self) -> Result<MarketState>;
    /// Writes the step and timestamp. The generation flag is only ever changed by the lock calls.
    fn update_market_state(&self, state: &MarketState) -> Result<()>;
    /// Atomically set the generation flag if it is clear. Returns whether this call set it.
    fn try_lock_generation(&self) -> Result<bool>;
    fn set_generation_lock(&self, locked: bool) -> Result<()>;
    fn is_generation_locked(&self) -> Result<bool>;
}
