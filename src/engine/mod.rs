//! The timestep engine and the read-only views over the market.
//!
//! One advance moves through `Idle -> Locked -> Computing -> Persisting -> Unlocked`. The lock is
//! taken with a single compare-and-set against the store and held by a [LockGuard] so that it is
//! released on every exit path. The step counter is written last: until it flips, readers keep
//! seeing the previous step even if some records for the next step are already stored.
//!
//! A failure part-way through persisting leaves the step where it was but may leave records for
//! the next step behind. The next advance targets the same step and overwrites them, and because
//! base prices are read as of the current step those orphans never feed back into the model.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::thread_rng;

use crate::error::{MarketError, MarketResult};
use crate::lock::{GenerationLock, LockGuard};
use crate::model::{self, PriceModel, DEFAULT_DT};
use crate::resolver::{merge_overrides, resolve, Resolution};
use crate::source::MarketDataSource;
use crate::store::MarketStore;
use crate::types::{
    now, AdvanceOutcome, Company, MarketSnapshot, MarketState, PricePreview, PriceOverride,
    PriceRecord, Step, Symbol,
};

pub struct MarketEngine {
    store: Arc<dyn MarketStore>,
    source: Box<dyn MarketDataSource>,
    model: Mutex<PriceModel>,
    //Refreshed from the source before every advance
    companies: RwLock<BTreeMap<Symbol, Company>>,
}

impl MarketEngine {
    pub fn new(store: Arc<dyn MarketStore>, source: Box<dyn MarketDataSource>) -> Self {
        Self::with_model(store, source, PriceModel::from_entropy())
    }

    pub fn with_model(
        store: Arc<dyn MarketStore>,
        source: Box<dyn MarketDataSource>,
        model: PriceModel,
    ) -> Self {
        Self {
            store,
            source,
            model: Mutex::new(model),
            companies: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn store(&self) -> &dyn MarketStore {
        self.store.as_ref()
    }

    pub fn companies(&self) -> BTreeMap<Symbol, Company> {
        self.companies.read().clone()
    }

    fn lock_generation(&self) -> MarketResult<LockGuard<'_>> {
        match GenerationLock::new(self.store.as_ref()).guard()? {
            Some(guard) => Ok(guard),
            None => {
                warn!("ENGINE: Timestep generation already in progress");
                Err(MarketError::ConcurrencyConflict)
            }
        }
    }

    /// Refresh the company set from the source and return how many are loaded. Invalid companies
    /// are dropped. If the source fails or has nothing valid the previous set is kept.
    pub fn load_companies(&self) -> MarketResult<usize> {
        let loaded = match self.source.load_companies() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    "ENGINE: Failed to load companies from {} source, using existing companies: {:#}",
                    self.source.name(),
                    e
                );
                return Ok(self.companies.read().len());
            }
        };

        let mut valid = BTreeMap::new();
        for company in loaded {
            match company.validate() {
                Ok(()) => {
                    valid.insert(company.symbol.clone(), company);
                }
                Err(e) => warn!("ENGINE: Skipping company: {}", e),
            }
        }

        if valid.is_empty() {
            warn!(
                "ENGINE: No valid companies from {} source, using existing companies",
                self.source.name()
            );
            return Ok(self.companies.read().len());
        }

        let count = valid.len();
        *self.companies.write() = valid;
        info!("ENGINE: Loaded {} companies", count);
        Ok(count)
    }

    /// Overrides for the next advance. A failing source means no overrides.
    pub fn load_overrides(&self) -> Vec<PriceOverride> {
        match self.source.load_overrides() {
            Ok(overrides) => overrides,
            Err(e) => {
                error!("ENGINE: Failed to load price overrides: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Write the step 0 price for every company. Does nothing, and returns `false`, once the market
    /// has moved past step 0 or holds any price at all.
    pub fn initialize_market(&self) -> MarketResult<bool> {
        let _guard = self.lock_generation()?;

        self.load_companies()?;
        let companies = self.companies();
        if companies.is_empty() {
            error!("ENGINE: No companies loaded, cannot initialize market");
            return Err(MarketError::NoSymbolsAvailable);
        }

        let state = self.store.get_market_state()?;
        if state.current_step > 0 {
            warn!("ENGINE: Market already initialized at step {}", state.current_step);
            return Ok(false);
        }
        if self.store.has_prices()? {
            warn!("ENGINE: Market already has prices, skipping initialization");
            return Ok(false);
        }

        let timestamp = now();
        for (symbol, company) in &companies {
            let record = PriceRecord::generated(symbol, 0, company.initial_price, timestamp);
            self.store.save_price(&record)?;
            info!("ENGINE: Initialized {} at {:.2}", symbol, company.initial_price);
        }
        info!("ENGINE: Market initialization complete");
        Ok(true)
    }

    pub fn advance(&self) -> MarketResult<AdvanceOutcome> {
        self.advance_with(Vec::new())
    }

    /// Advance by one step. `request_overrides` are layered over the source's overrides.
    pub fn advance_with(&self, request_overrides: Vec<PriceOverride>) -> MarketResult<AdvanceOutcome> {
        let _guard = self.lock_generation()?;
        info!("ENGINE: Acquired timestep generation lock");

        let res = self.generate_step(request_overrides);
        match &res {
            Ok(outcome) => info!(
                "ENGINE: Step {} generation complete with {} prices",
                outcome.step,
                outcome.prices.len()
            ),
            Err(e) => error!("ENGINE: Failed to generate timestep: {}", e),
        }
        res
    }

    fn generate_step(&self, request_overrides: Vec<PriceOverride>) -> MarketResult<AdvanceOutcome> {
        let mut state = self.store.get_market_state()?;
        let current_step = state.current_step;
        let next_step = current_step + 1;
        info!("ENGINE: Generating step {}", next_step);

        self.load_companies()?;
        let overrides = merge_overrides(self.load_overrides(), request_overrides);
        let companies = self.companies();
        if companies.is_empty() {
            return Err(MarketError::NoSymbolsAvailable);
        }

        let resolutions = resolve(companies.keys(), &overrides);
        let timestamp = now();
        let mut prices = BTreeMap::new();
        let mut overrides_applied = 0;

        for (symbol, company) in &companies {
            let resolution = resolutions.get(symbol).copied().unwrap_or(Resolution::Model);

            let record = match resolution {
                Resolution::Override(price) => {
                    overrides_applied += 1;
                    info!("ENGINE: Applied override for {}: {:.2}", symbol, price);
                    PriceRecord::overridden(symbol, next_step, price, timestamp)
                }
                Resolution::Model => {
                    let current_price = self.base_price(company, current_step)?;
                    if !(current_price.is_finite() && current_price > 0.0) {
                        error!(
                            "ENGINE: Stored price for {} is {}, skipping symbol this step",
                            symbol, current_price
                        );
                        continue;
                    }
                    let price = self.model.lock().next_price(
                        current_price,
                        company.drift,
                        company.volatility,
                    );
                    if !price.is_finite() {
                        let e = MarketError::InvalidParameter(format!(
                            "{}: model price overflowed from {} with drift {} and volatility {}",
                            symbol, current_price, company.drift, company.volatility
                        ));
                        error!("ENGINE: {}, skipping symbol this step", e);
                        continue;
                    }
                    debug!(
                        "ENGINE: Generated price for {}: {:.2} ({:+.2}%)",
                        symbol,
                        price,
                        (price - current_price) / current_price * 100.0
                    );
                    PriceRecord::generated(symbol, next_step, price, timestamp)
                }
            };

            self.store.save_price(&record)?;
            prices.insert(symbol.clone(), record.price);
        }

        state.current_step = next_step;
        state.last_updated = timestamp;
        self.store.update_market_state(&state)?;

        Ok(AdvanceOutcome {
            step: next_step,
            timestamp,
            prices,
            overrides_applied,
        })
    }

    fn base_price(&self, company: &Company, step: Step) -> MarketResult<f64> {
        match self.store.get_latest_price_as_of(&company.symbol, step)? {
            Some(record) => Ok(record.price),
            None => {
                warn!(
                    "ENGINE: No price history for {}, using initial price {:.2}",
                    company.symbol, company.initial_price
                );
                Ok(company.initial_price)
            }
        }
    }

    pub fn latest_price(&self, symbol: &str) -> MarketResult<Option<PriceRecord>> {
        Ok(self.store.get_latest_price(symbol)?)
    }

    pub fn history(&self, symbol: &str, limit: Option<usize>) -> MarketResult<Vec<PriceRecord>> {
        Ok(self.store.get_price_history(symbol, limit)?)
    }

    pub fn market_state(&self) -> MarketResult<MarketState> {
        Ok(self.store.get_market_state()?)
    }

    /// Prices at the current step for the companies currently loaded. Symbols dropped from the
    /// source are left out even though their history is still stored.
    pub fn snapshot(&self) -> MarketResult<MarketSnapshot> {
        let state = self.store.get_market_state()?;
        let stored = self.store.get_prices_as_of(state.current_step)?;
        let companies = self.companies.read();

        let prices = stored
            .into_iter()
            .filter(|(symbol, _)| companies.contains_key(symbol))
            .collect();

        let companies = companies
            .iter()
            .map(|(symbol, company)| (symbol.clone(), company.info()))
            .collect();

        Ok(MarketSnapshot {
            step: state.current_step,
            last_updated: state.last_updated,
            prices,
            companies,
        })
    }

    /// What-if run of the price model. Uses a throwaway random source so it can't disturb seeded
    /// runs, and writes nothing.
    pub fn preview_next_price(
        &self,
        symbol: &str,
        drift: f64,
        volatility: f64,
        current_price: f64,
    ) -> MarketResult<f64> {
        if !(current_price.is_finite() && current_price > 0.0) {
            return Err(MarketError::InvalidParameter(format!(
                "{}: current price must be positive, got {}",
                symbol, current_price
            )));
        }
        if !(volatility.is_finite() && volatility >= 0.0) || !drift.is_finite() {
            return Err(MarketError::InvalidParameter(format!(
                "{}: drift must be finite and volatility non-negative, got {} and {}",
                symbol, drift, volatility
            )));
        }
        let price = model::next_price(
            &mut thread_rng(),
            current_price,
            drift,
            volatility,
            DEFAULT_DT,
        );
        if !price.is_finite() {
            return Err(MarketError::InvalidParameter(format!(
                "{}: model price overflowed from {} with drift {} and volatility {}",
                symbol, current_price, drift, volatility
            )));
        }
        Ok(price)
    }

    /// A preview of the next step for every loaded company. Nothing is written.
    pub fn preview_timestep(&self) -> MarketResult<Vec<PricePreview>> {
        let state = self.store.get_market_state()?;
        let mut previews = Vec::new();

        for company in self.companies().values() {
            let current_price = self.base_price(company, state.current_step)?;
            let calculated_price = match self.preview_next_price(
                &company.symbol,
                company.drift,
                company.volatility,
                current_price,
            ) {
                Ok(price) => price,
                Err(MarketError::InvalidParameter(msg)) => {
                    warn!("ENGINE: Leaving {} out of preview: {}", company.symbol, msg);
                    continue;
                }
                Err(e) => return Err(e),
            };
            previews.push(PricePreview {
                symbol: company.symbol.clone(),
                name: company.name.clone(),
                current_price,
                calculated_price,
                change_pct: (calculated_price - current_price) / current_price * 100.0,
            });
        }
        debug!("ENGINE: Generated {} price previews", previews.len());
        Ok(previews)
    }

    /// Force the price of a known symbol at the current step.
    pub fn apply_override(&self, symbol: &str, price: f64) -> MarketResult<PriceRecord> {
        if !self.companies.read().contains_key(symbol) {
            return Err(MarketError::UnknownSymbol(symbol.to_string()));
        }
        if !(price.is_finite() && price > 0.0) {
            return Err(MarketError::InvalidParameter(format!(
                "{}: price must be positive, got {}",
                symbol, price
            )));
        }

        let _guard = self.lock_generation()?;
        let state = self.store.get_market_state()?;
        let record = PriceRecord::overridden(symbol, state.current_step, price, now());
        self.store.save_price(&record)?;
        info!("ENGINE: Applied manual override: {} = {:.2}", symbol, price);
        Ok(record)
    }

    /// Operator recovery for a lock left behind by a process that died mid-advance.
    pub fn clear_generation_lock(&self) -> MarketResult<()> {
        warn!("ENGINE: Clearing generation lock by operator request");
        GenerationLock::new(self.store.as_ref()).release()?;
        Ok(())
    }
}
