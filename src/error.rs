use derive_more::Display;

/// Errors surfaced to callers of the engine.
///
/// `ConcurrencyConflict` is the only recoverable-by-retry kind and must stay distinguishable from
/// the failures: transports report it as a conflict rather than a server error.
#[derive(Debug, Display)]
pub enum MarketError {
    #[display("generation already in progress")]
    ConcurrencyConflict,
    #[display("no symbols available")]
    NoSymbolsAvailable,
    #[display("invalid parameter: {_0}")]
    InvalidParameter(String),
    #[display("unknown symbol: {_0}")]
    UnknownSymbol(String),
    #[display("persistence failure: {_0:#}")]
    Persistence(anyhow::Error),
    #[display("internal error: {_0}")]
    Internal(String),
}

impl std::error::Error for MarketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MarketError::Persistence(err) => {
                let source: &(dyn std::error::Error + 'static) = err.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for MarketError {
    fn from(value: anyhow::Error) -> Self {
        MarketError::Persistence(value)
    }
}

pub type MarketResult<T> = Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::MarketError;

    #[test]
    fn test_that_messages_are_readable() {
        assert_eq!(
            MarketError::ConcurrencyConflict.to_string(),
            "generation already in progress"
        );
        assert_eq!(
            MarketError::UnknownSymbol("XYZ".to_string()).to_string(),
            "unknown symbol: XYZ"
        );
    }

    #[test]
    fn test_that_store_errors_become_persistence_failures() {
        let err: MarketError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, MarketError::Persistence(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
