use thiserror::Error;

use crate::data::error::CacheError;

/// Only persistence can abort a reconciliation run; failed lookups are counted, not raised.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reconciliation aborted: {0}")]
    Cache(#[from] CacheError),
}
