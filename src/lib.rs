//! Pincode resolution cache and per-pincode customer aggregation.
//!
//! The coordinate cache is an explicit snapshot: load it with
//! [`CoordinateCache::load`], bring it up to date with a [`Reconciler`], and
//! hand it to [`report::summarize`] to build the per-pincode view.

pub mod config;
pub mod data;
pub mod geocode;
pub mod reconcile;
pub mod report;
pub mod utils;


pub use crate::data::cache::CoordinateCache;
pub use crate::data::models::{AddressRecord, Coordinate, Pincode, PincodeLocation, PincodeSummary};
pub use crate::reconcile::{FetchMode, FetchPlan, Reconciler};
