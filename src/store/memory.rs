use std::collections::BTreeMap;

use anyhow::Result;
use parking_lot::Mutex;

use super::MarketStore;
use crate::types::{now, MarketState, PriceRecord, Step, Symbol};

#[derive(Debug)]
struct Inner {
    //Keyed by (symbol, step) so a range over one symbol comes back in step order
    prices: BTreeMap<(Symbol, Step), PriceRecord>,
    state: MarketState,
}

/// Store that lives only as long as the process. The generation flag is still held in the store
/// rather than the engine so behaviour matches the durable stores.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                prices: BTreeMap::new(),
                state: MarketState::new(now()),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn symbol_records<'a>(
        &'a self,
        symbol: &str,
    ) -> impl DoubleEndedIterator<Item = &'a PriceRecord> {
        let symbol = symbol.to_string();
        self.prices
            .range((symbol.clone(), 0)..=(symbol, Step::MAX))
            .map(|(_, record)| record)
    }

    fn latest_per_symbol(&self, max_step: Step) -> BTreeMap<Symbol, f64> {
        let mut res = BTreeMap::new();
        //Ascending iteration means the last insert for each symbol is its highest step
        for ((symbol, step), record) in &self.prices {
            if *step <= max_step {
                res.insert(symbol.clone(), record.price);
            }
        }
        res
    }
}

impl MarketStore for MemoryStore {
    fn get_latest_price(&self, symbol: &str) -> Result<Option<PriceRecord>> {
        let inner = self.inner.lock();
        let latest = inner.symbol_records(symbol).next_back().cloned();
        Ok(latest)
    }

    fn get_latest_price_as_of(&self, symbol: &str, step: Step) -> Result<Option<PriceRecord>> {
        let inner = self.inner.lock();
        let latest = inner
            .symbol_records(symbol)
            .rev()
            .find(|record| record.step <= step)
            .cloned();
        Ok(latest)
    }

    fn get_price_history(&self, symbol: &str, limit: Option<usize>) -> Result<Vec<PriceRecord>> {
        let inner = self.inner.lock();
        let mut history: Vec<PriceRecord> = inner.symbol_records(symbol).cloned().collect();
        if let Some(limit) = limit {
            let skip = history.len().saturating_sub(limit);
            history.drain(..skip);
        }
        Ok(history)
    }

    fn get_all_latest_prices(&self) -> Result<BTreeMap<Symbol, f64>> {
        Ok(self.inner.lock().latest_per_symbol(Step::MAX))
    }

    fn get_prices_as_of(&self, step: Step) -> Result<BTreeMap<Symbol, f64>> {
        Ok(self.inner.lock().latest_per_symbol(step))
    }

    fn has_prices(&self) -> Result<bool> {
        Ok(!self.inner.lock().prices.is_empty())
    }

    fn save_price(&self, record: &PriceRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .prices
            .insert((record.symbol.clone(), record.step), record.clone());
        Ok(())
    }

    fn get_market_state(&self) -> Result<MarketState> {
        Ok(self.inner.lock().state.clone())
    }

    fn update_market_state(&self, state: &MarketState) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.state.current_step = state.current_step;
        inner.state.last_updated = state.last_updated;
        Ok(())
    }

    fn try_lock_generation(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state.is_generating {
            return Ok(false);
        }
        inner.state.is_generating = true;
        Ok(true)
    }

    fn set_generation_lock(&self, locked: bool) -> Result<()> {
        self.inner.lock().state.is_generating = locked;
        Ok(())
    }

    fn is_generation_locked(&self) -> Result<bool> {
        Ok(self.inner.lock().state.is_generating)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::MarketStore;
    use crate::types::{MarketState, PriceRecord};

    fn setup() -> MemoryStore {
        let store = MemoryStore::new();
        for step in 0..5 {
            store
                .save_price(&PriceRecord::generated("ABC", step, 100.0 + step as f64, 0))
                .unwrap();
        }
        store
            .save_price(&PriceRecord::generated("BCD", 0, 50.0, 0))
            .unwrap();
        store
    }

    #[test]
    fn test_that_save_overwrites_same_step() {
        let store = setup();
        store
            .save_price(&PriceRecord::overridden("ABC", 4, 1.0, 0))
            .unwrap();

        let history = store.get_price_history("ABC", None).unwrap();
        assert_eq!(history.len(), 5);
        let latest = store.get_latest_price("ABC").unwrap().unwrap();
        assert_eq!(latest.price, 1.0);
        assert!(latest.is_override);
    }

    #[test]
    fn test_that_history_limit_returns_most_recent_ascending() {
        let store = setup();
        let history = store.get_price_history("ABC", Some(3)).unwrap();
        let steps: Vec<u64> = history.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![2, 3, 4]);

        let history = store.get_price_history("ABC", Some(100)).unwrap();
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_that_latest_prices_cover_every_symbol() {
        let store = setup();
        let prices = store.get_all_latest_prices().unwrap();
        assert_eq!(prices.get("ABC"), Some(&104.0));
        assert_eq!(prices.get("BCD"), Some(&50.0));

        let prices = store.get_prices_as_of(2).unwrap();
        assert_eq!(prices.get("ABC"), Some(&102.0));
        assert_eq!(
            store.get_latest_price_as_of("ABC", 2).unwrap().unwrap().step,
            2
        );
    }

    #[test]
    fn test_that_symbols_sharing_a_prefix_do_not_mix() {
        let store = MemoryStore::new();
        store
            .save_price(&PriceRecord::generated("AB", 3, 1.0, 0))
            .unwrap();
        store
            .save_price(&PriceRecord::generated("ABC", 1, 2.0, 0))
            .unwrap();
        assert_eq!(store.get_price_history("AB", None).unwrap().len(), 1);
        assert_eq!(store.get_latest_price("ABC").unwrap().unwrap().price, 2.0);
    }

    #[test]
    fn test_that_lock_is_compare_and_set() {
        let store = MemoryStore::new();
        assert!(store.try_lock_generation().unwrap());
        assert!(!store.try_lock_generation().unwrap());
        assert!(store.is_generation_locked().unwrap());
        store.set_generation_lock(false).unwrap();
        assert!(store.try_lock_generation().unwrap());
    }

    #[test]
    fn test_that_state_update_leaves_lock_alone() {
        let store = MemoryStore::new();
        assert!(store.try_lock_generation().unwrap());
        store
            .update_market_state(&MarketState {
                current_step: 3,
                last_updated: 10,
                is_generating: false,
            })
            .unwrap();
        let state = store.get_market_state().unwrap();
        assert_eq!(state.current_step, 3);
        assert!(state.is_generating);
    }
}
