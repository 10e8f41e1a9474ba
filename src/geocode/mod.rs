use thiserror::Error;

use crate::data::models::{Coordinate, Pincode};

pub mod google;

/// First candidate returned by the provider for a pincode.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub coordinate: Coordinate,
    pub city: Option<String>,
    pub state: Option<String>,
    pub formatted_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    /// The provider answered with zero candidates.
    #[error("no result")]
    NoResult,
    /// Network or provider fault, worth retrying.
    #[error("transient error: {0}")]
    TransientError(String),
    /// The request itself was rejected.
    #[error("permanent error: {0}")]
    PermanentError(String),
}

impl ResolutionFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolutionFailure::TransientError(_))
    }
}

/// Resolves one pincode within the configured country.
///
/// Implementations make a single attempt; pacing and retries are the caller's policy.
pub trait Geocoder {
    fn resolve(&self, pincode: Pincode) -> Result<ResolvedLocation, ResolutionFailure>;
}

impl<G: Geocoder + ?Sized> Geocoder for &G {
    fn resolve(&self, pincode: Pincode) -> Result<ResolvedLocation, ResolutionFailure> {
        (**self).resolve(pincode)
    }
}
