//! Decides, per symbol, whether an advance uses a game master override or the price model.
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::types::{PriceOverride, Symbol};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Resolution {
    Override(f64),
    Model,
}

fn is_well_formed(price_override: &PriceOverride) -> bool {
    !price_override.symbol.trim().is_empty()
        && price_override.price.is_finite()
        && price_override.price > 0.0
}

/// Resolve every known symbol against the supplied overrides.
///
/// An override replaces the model entirely for its symbol. Overrides naming symbols outside
/// `symbols` are dropped, as are malformed ones. When a symbol is overridden more than once the
/// last entry wins.
pub fn resolve<'a>(
    symbols: impl IntoIterator<Item = &'a Symbol>,
    overrides: &[PriceOverride],
) -> BTreeMap<Symbol, Resolution> {
    let mut res: BTreeMap<Symbol, Resolution> = symbols
        .into_iter()
        .map(|symbol| (symbol.clone(), Resolution::Model))
        .collect();

    for price_override in overrides {
        if !is_well_formed(price_override) {
            warn!(
                "RESOLVER: Skipping malformed override {:?} = {:?}",
                price_override.symbol, price_override.price
            );
            continue;
        }

        if let Some(resolution) = res.get_mut(&price_override.symbol) {
            *resolution = Resolution::Override(price_override.price);
        } else {
            debug!(
                "RESOLVER: Ignoring override for unknown symbol {:?}",
                price_override.symbol
            );
        }
    }
    res
}

/// Layer `extra` on top of `base`. Entries in `extra` win for any symbol present in both.
pub fn merge_overrides(base: Vec<PriceOverride>, extra: Vec<PriceOverride>) -> Vec<PriceOverride> {
    let replaced: BTreeSet<Symbol> = extra.iter().map(|o| o.symbol.clone()).collect();

    let mut merged: Vec<PriceOverride> = base
        .into_iter()
        .filter(|o| !replaced.contains(&o.symbol))
        .collect();
    merged.extend(extra);
    merged
}
