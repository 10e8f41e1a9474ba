use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;

use crate::reconcile::{Pacing, RetryPolicy};

pub const DEFAULT_CACHE_PATH: &str = "pincode_coordinates_google.csv";
pub const DEFAULT_ADDRESS_PATH: &str = "Address Details.csv";
const DEFAULT_COUNTRY: &str = "India";
const DEFAULT_REGION: &str = "in";
const DEFAULT_BURST_SIZE: usize = 10;
const DEFAULT_BURST_PAUSE_MS: u64 = 1000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Clone)]
pub struct Settings {
    api_key: Option<String>,
    pub cache_path: PathBuf,
    pub address_path: PathBuf,
    pub country: String,
    pub region: String,
    pub pacing: Pacing,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Settings {
    /// Reads settings from the environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        Ok(Settings {
            api_key: lookup("GOOGLE_MAPS_API_KEY").filter(|k| !k.trim().is_empty()),
            cache_path: PathBuf::from(text("PINCODE_CACHE_PATH", DEFAULT_CACHE_PATH)),
            address_path: PathBuf::from(text("ADDRESS_DATA_PATH", DEFAULT_ADDRESS_PATH)),
            country: text("GEOCODE_COUNTRY", DEFAULT_COUNTRY),
            region: text("GEOCODE_REGION", DEFAULT_REGION),
            pacing: Pacing {
                burst_size: parse_var(&lookup, "GEOCODE_BURST_SIZE", DEFAULT_BURST_SIZE)?,
                pause: Duration::from_millis(parse_var(
                    &lookup,
                    "GEOCODE_BURST_PAUSE_MS",
                    DEFAULT_BURST_PAUSE_MS,
                )?),
            },
            retry: RetryPolicy {
                max_retries: parse_var(&lookup, "GEOCODE_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                backoff: Duration::from_millis(parse_var(
                    &lookup,
                    "GEOCODE_RETRY_BACKOFF_MS",
                    DEFAULT_RETRY_BACKOFF_MS,
                )?),
            },
            request_timeout: Duration::from_secs(parse_var(
                &lookup,
                "GEOCODE_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
        })
    }

    /// Only needed when talking to the provider.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::Missing("GOOGLE_MAPS_API_KEY"))
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                name,
                expected: "a non-negative integer",
                value,
            })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();

        assert_eq!(settings.cache_path, PathBuf::from(DEFAULT_CACHE_PATH));
        assert_eq!(settings.address_path, PathBuf::from(DEFAULT_ADDRESS_PATH));
        assert_eq!(settings.country, "India");
        assert_eq!(settings.pacing, Pacing::default());
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(
            settings.api_key(),
            Err(ConfigError::Missing("GOOGLE_MAPS_API_KEY"))
        );
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("GOOGLE_MAPS_API_KEY", "secret"),
            ("PINCODE_CACHE_PATH", "/tmp/cache.csv"),
            ("GEOCODE_BURST_SIZE", " 25 "),
            ("GEOCODE_BURST_PAUSE_MS", "0"),
            ("GEOCODE_MAX_RETRIES", "5"),
        ])
        .unwrap();

        assert_eq!(settings.api_key(), Ok("secret"));
        assert_eq!(settings.cache_path, PathBuf::from("/tmp/cache.csv"));
        assert_eq!(settings.pacing.burst_size, 25);
        assert_eq!(settings.pacing.pause, Duration::ZERO);
        assert_eq!(settings.retry.max_retries, 5);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let result = settings(&[("GEOCODE_BURST_SIZE", "ten")]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "GEOCODE_BURST_SIZE", .. })
        ));
    }
}
