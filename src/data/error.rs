use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::data::models::Pincode;

/// The address source could not be read at all. Individual bad rows never end up here.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not open address source {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("address source unreadable: {0}")]
    Csv(#[from] csv::Error),
    #[error("address source {path} has no {column} column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// Persistence failure on the coordinate snapshot. Always fatal to the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache snapshot {path} unreadable: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("cache snapshot {path} unwritable: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("cache snapshot {path} has no parent directory")]
    NoParent { path: PathBuf },
    #[error("cache snapshot is malformed: {0}")]
    Csv(#[from] csv::Error),
    #[error("cache row for pincode {pincode} has a partial coordinate")]
    PartialCoordinate { pincode: Pincode },
    #[error("cache row for pincode {pincode} has an out of range coordinate")]
    InvalidCoordinate { pincode: Pincode },
    #[error("cache row has an invalid pincode: {value:?}")]
    InvalidPincode { value: String },
}
