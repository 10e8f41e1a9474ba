pub mod cache;
pub mod error;
pub mod loader;
pub mod merge;
pub mod models;
