//! Stochastic price model. A single step of geometric Brownian motion per call, with no state
//! beyond the random source so that runs can be reproduced by seeding.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// Prices are never allowed to fall below this, extreme draws would otherwise round to zero.
pub const MIN_PRICE: f64 = 0.01;
pub const DEFAULT_DT: f64 = 1.0;

/// Next price from `current_price` using one GBM step:
///
/// `S(t+dt) = S(t) * exp((drift - 0.5 * volatility^2) * dt + volatility * sqrt(dt) * Z)`
///
/// where `Z` is a standard normal draw from `rng`. The result is floored at [MIN_PRICE].
///
/// `current_price` must be positive, callers check this before getting here.
pub fn next_price<R: Rng + ?Sized>(
    rng: &mut R,
    current_price: f64,
    drift: f64,
    volatility: f64,
    dt: f64,
) -> f64 {
    debug_assert!(current_price > 0.0, "price model called with {current_price}");

    let z: f64 = StandardNormal.sample(rng);
    let drift_term = (drift - 0.5 * volatility.powi(2)) * dt;
    let diffusion_term = volatility * dt.sqrt() * z;

    let price = current_price * (drift_term + diffusion_term).exp();
    // NaN compares false against the floor so it has to be caught separately
    if price.is_nan() {
        return MIN_PRICE;
    }
    price.max(MIN_PRICE)
}

/// Owns the random source used for generated prices.
#[derive(Debug)]
pub struct PriceModel {
    rng: StdRng,
    dt: f64,
}

impl PriceModel {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            dt: DEFAULT_DT,
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            dt: DEFAULT_DT,
        }
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn next_price(&mut self, current_price: f64, drift: f64, volatility: f64) -> f64 {
        next_price(&mut self.rng, current_price, drift, volatility, self.dt)
    }
}

impl Default for PriceModel {
    fn default() -> Self {
        Self::from_entropy()
    }
}
