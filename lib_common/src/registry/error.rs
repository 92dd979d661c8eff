use thiserror::Error;

use super::model::EmailError;

/// Failures the registry surfaces to its callers.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed input, rejected before any store is touched.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] EmailError),

    #[error("subscriber limit of {max} reached")]
    CapacityExceeded { max: usize },

    /// Transport or auth failure from the topic provider or the record store.
    /// Carries the adapter's context chain.
    #[error("backing store unavailable: {0:#}")]
    Unavailable(anyhow::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
