//! Lock configuration.
//!
//! Configuration is resolved once by the caller (typically from the
//! environment via [`LockConfig::from_env`]) and passed to constructors.
//! Nothing in this crate reads the environment on its own.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::ObjectId;

/// Public JSON API endpoint.
pub const DEFAULT_API_URL: &str = "https://www.googleapis.com";

/// Default lease length.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a single named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Bucket holding the lock object.
    pub bucket: String,
    /// Lock object key.
    pub key: String,
    /// Emulator endpoint. `None` targets the public API with credentials.
    pub api_url: Option<String>,
    /// Lease length written on acquire and refresh.
    pub ttl: Duration,
    /// Whether closing the handle without using it is an error.
    pub required: bool,
    /// Per-request timeout for the HTTP transport.
    pub request_timeout: Duration,
}

impl LockConfig {
    /// Creates a config with defaults for everything but the lock location.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            api_url: None,
            ttl: DEFAULT_TTL,
            required: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Targets an emulator at `api_url`. Requests are sent without credentials.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    /// Sets the lease length.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets whether the handle must be used before it is closed.
    #[must_use]
    pub const fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns true when targeting an emulator.
    #[must_use]
    pub fn is_emulator(&self) -> bool {
        self.api_url.is_some()
    }

    /// Returns the API base URL without a trailing slash.
    #[must_use]
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
    }

    /// Returns the lock object location.
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(&self.bucket, &self.key)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a field is empty or zero.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::config("bucket cannot be empty"));
        }
        if self.key.is_empty() {
            return Err(Error::config("key cannot be empty"));
        }
        if self.ttl.is_zero() {
            return Err(Error::config("ttl must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout must be greater than zero"));
        }
        if let Some(url) = &self.api_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::config(format!(
                    "api_url must be an http(s) URL, got {url:?}"
                )));
            }
        }
        Ok(())
    }

    /// Loads configuration for the lock `key` from environment variables.
    ///
    /// Supported env vars:
    /// - `DIMUTEX_BUCKET` (required)
    /// - `DIMUTEX_API_URL`, falling back to `STORAGE_EMULATOR_HOST`
    /// - `DIMUTEX_TTL_SECS` (default: 60)
    /// - `DIMUTEX_REQUIRED` (default: true)
    /// - `DIMUTEX_REQUEST_TIMEOUT_SECS` (default: 10)
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is missing, a variable is present but
    /// cannot be parsed, or the result fails [`validate`](Self::validate).
    pub fn from_env(key: impl Into<String>) -> Result<Self> {
        Self::from_lookup(key, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        key: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bucket =
            var("DIMUTEX_BUCKET").ok_or_else(|| Error::config("DIMUTEX_BUCKET is required"))?;
        let mut config = Self::new(bucket.trim(), key);

        config.api_url = var("DIMUTEX_API_URL")
            .map(|url| url.trim().to_string())
            .or_else(|| var("STORAGE_EMULATOR_HOST").map(|host| emulator_url(host.trim())));

        if let Some(secs) = parse_u64("DIMUTEX_TTL_SECS", var("DIMUTEX_TTL_SECS"))? {
            config.ttl = Duration::from_secs(secs);
        }
        if let Some(required) = parse_bool("DIMUTEX_REQUIRED", var("DIMUTEX_REQUIRED"))? {
            config.required = required;
        }
        if let Some(secs) = parse_u64(
            "DIMUTEX_REQUEST_TIMEOUT_SECS",
            var("DIMUTEX_REQUEST_TIMEOUT_SECS"),
        )? {
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

// Emulators commonly export a bare `host:port`.
fn emulator_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn parse_u64(name: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| Error::config(format!("{name} must be an integer: {e}")))
        })
        .transpose()
}

fn parse_bool(name: &str, value: Option<String>) -> Result<Option<bool>> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::config(format!(
                "{name} must be a boolean, got {other:?}"
            ))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = LockConfig::new("bucket", "locks/a");
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert!(config.required);
        assert!(!config.is_emulator());
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        config.validate().expect("valid");
    }

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let config = LockConfig::new("b", "k").with_api_url("http://localhost:4443/");
        assert!(config.is_emulator());
        assert_eq!(config.api_url(), "http://localhost:4443");
    }

    #[test]
    fn validate_rejects_empty_fields() {
        assert!(LockConfig::new("", "k").validate().is_err());
        assert!(LockConfig::new("b", "").validate().is_err());
        assert!(
            LockConfig::new("b", "k")
                .with_ttl(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            LockConfig::new("b", "k")
                .with_api_url("localhost:4443")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn from_env_reads_all_settings() {
        let config = LockConfig::from_lookup(
            "locks/job",
            lookup(&[
                ("DIMUTEX_BUCKET", "my-bucket"),
                ("DIMUTEX_API_URL", "http://127.0.0.1:9023"),
                ("DIMUTEX_TTL_SECS", "15"),
                ("DIMUTEX_REQUIRED", "false"),
                ("DIMUTEX_REQUEST_TIMEOUT_SECS", "3"),
            ]),
        )
        .expect("config");

        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.key, "locks/job");
        assert_eq!(config.api_url.as_deref(), Some("http://127.0.0.1:9023"));
        assert_eq!(config.ttl, Duration::from_secs(15));
        assert!(!config.required);
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn from_env_falls_back_to_emulator_host() {
        let config = LockConfig::from_lookup(
            "k",
            lookup(&[
                ("DIMUTEX_BUCKET", "b"),
                ("STORAGE_EMULATOR_HOST", "http://localhost:4443"),
            ]),
        )
        .expect("config");
        assert_eq!(config.api_url(), "http://localhost:4443");

        let bare = LockConfig::from_lookup(
            "k",
            lookup(&[("DIMUTEX_BUCKET", "b"), ("STORAGE_EMULATOR_HOST", "0.0.0.0:9023")]),
        )
        .expect("config");
        assert_eq!(bare.api_url(), "http://0.0.0.0:9023");
    }

    #[test]
    fn from_env_requires_bucket() {
        let err = LockConfig::from_lookup("k", lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DIMUTEX_BUCKET"));
    }

    #[test]
    fn from_env_rejects_bad_values() {
        let bad_ttl = LockConfig::from_lookup(
            "k",
            lookup(&[("DIMUTEX_BUCKET", "b"), ("DIMUTEX_TTL_SECS", "soon")]),
        );
        assert!(bad_ttl.is_err());

        let zero_ttl = LockConfig::from_lookup(
            "k",
            lookup(&[("DIMUTEX_BUCKET", "b"), ("DIMUTEX_TTL_SECS", "0")]),
        );
        assert!(zero_ttl.is_err());

        let bad_bool = LockConfig::from_lookup(
            "k",
            lookup(&[("DIMUTEX_BUCKET", "b"), ("DIMUTEX_REQUIRED", "maybe")]),
        );
        assert!(bad_bool.is_err());
    }
}
