use anyhow::Result;
use log::info;
use parking_lot::Mutex;

use super::MarketDataSource;
use crate::types::{Company, PriceOverride};

/// Fixed source used when no live spreadsheet is configured, and throughout the tests.
///
/// Companies and overrides are behind a mutex so they can be changed between advances the same
/// way a game master would edit the live sheet.
#[derive(Debug)]
pub struct SampleSource {
    companies: Mutex<Vec<Company>>,
    overrides: Mutex<Vec<PriceOverride>>,
}

impl SampleSource {
    pub fn new() -> Self {
        Self::with_companies(Self::default_companies())
    }

    pub fn with_companies(companies: Vec<Company>) -> Self {
        Self {
            companies: Mutex::new(companies),
            overrides: Mutex::new(Vec::new()),
        }
    }

    pub fn default_companies() -> Vec<Company> {
        vec![
            Company::new("APLO", "Apollo ISR", 100.0, 0.001, 0.02),
            Company::new("ELYP", "Elysium Planetary Acquisitions", 75.0, 0.002, 0.025),
            Company::new("NOVA", "Nova Mining Consortium", 50.0, -0.001, 0.03),
            Company::new("ZETA", "Zeta Transport Co.", 120.0, 0.0015, 0.015),
            Company::new("TITA", "Titan Defense Industries", 200.0, 0.0005, 0.01),
        ]
    }

    pub fn set_companies(&self, companies: Vec<Company>) {
        *self.companies.lock() = companies;
    }

    pub fn set_overrides(&self, overrides: Vec<PriceOverride>) {
        *self.overrides.lock() = overrides;
    }
}

impl Default for SampleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataSource for SampleSource {
    fn name(&self) -> &str {
        "sample"
    }

    fn load_companies(&self) -> Result<Vec<Company>> {
        let companies = self.companies.lock().clone();
        info!("SOURCE: Loaded {} sample companies", companies.len());
        Ok(companies)
    }

    fn load_overrides(&self) -> Result<Vec<PriceOverride>> {
        Ok(self.overrides.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::SampleSource;
    use crate::source::MarketDataSource;
    use crate::types::{Company, PriceOverride};

    #[test]
    fn test_that_default_companies_are_valid() {
        let source = SampleSource::new();
        let companies = source.load_companies().unwrap();
        assert_eq!(companies.len(), 5);
        assert!(companies.iter().all(|c| c.validate().is_ok()));
        assert!(source.load_overrides().unwrap().is_empty());
    }

    #[test]
    fn test_that_data_can_change_between_loads() {
        let source = SampleSource::new();
        source.set_companies(vec![Company::new("ABC", "Abc", 10.0, 0.0, 0.0)]);
        source.set_overrides(vec![PriceOverride::new("ABC", 12.0)]);

        assert_eq!(source.load_companies().unwrap().len(), 1);
        assert_eq!(source.load_overrides().unwrap()[0].price, 12.0);
    }
}
