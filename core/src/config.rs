//! Client configuration.
//!
//! A `ClientConfig` can be built in code, deserialized (every field except
//! the three connection settings has a default), or read from the
//! environment. Validation happens when a `Shotgun` is constructed.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ApiError, Result};
use crate::query::DEFAULT_RECORDS_PER_PAGE;

pub const ENV_BASE_URL: &str = "SHOTGUN_BASE_URL";
pub const ENV_SCRIPT_NAME: &str = "SHOTGUN_SCRIPT_NAME";
pub const ENV_SCRIPT_KEY: &str = "SHOTGUN_SCRIPT_KEY";
pub const ENV_HTTP_PROXY: &str = "SHOTGUN_HTTP_PROXY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub script_name: String,
    pub script_key: String,
    #[serde(default)]
    pub http_proxy: Option<String>,
    /// Page size used for paginated reads.
    #[serde(default = "default_records_per_page")]
    pub records_per_page: u32,
    /// Log remote faults at `error` level before returning them.
    #[serde(default = "default_log_faults")]
    pub log_faults: bool,
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
}

fn default_records_per_page() -> u32 {
    DEFAULT_RECORDS_PER_PAGE
}

fn default_log_faults() -> bool {
    true
}

impl ClientConfig {
    pub fn new(base_url: &str, script_name: &str, script_key: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            script_name: script_name.to_string(),
            script_key: script_key.to_string(),
            http_proxy: None,
            records_per_page: DEFAULT_RECORDS_PER_PAGE,
            log_faults: true,
            timeout: None,
        }
    }

    /// Read `SHOTGUN_BASE_URL`, `SHOTGUN_SCRIPT_NAME`, `SHOTGUN_SCRIPT_KEY`
    /// and the optional `SHOTGUN_HTTP_PROXY`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| ApiError::Config(format!("environment variable {name} is not set")))
        };
        let mut config = Self::new(&var(ENV_BASE_URL)?, &var(ENV_SCRIPT_NAME)?, &var(ENV_SCRIPT_KEY)?);
        config.http_proxy = std::env::var(ENV_HTTP_PROXY).ok().filter(|p| !p.is_empty());
        Ok(config)
    }

    pub fn with_http_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.http_proxy = Some(proxy.into());
        self
    }

    pub fn with_records_per_page(mut self, records_per_page: u32) -> Self {
        self.records_per_page = records_per_page;
        self
    }

    pub fn with_log_faults(mut self, log_faults: bool) -> Self {
        self.log_faults = log_faults;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the settings and return the normalized base URL.
    pub fn validate(&self) -> Result<String> {
        if self.records_per_page == 0 {
            return Err(ApiError::Config("records_per_page must be greater than zero".to_string()));
        }
        normalize_base_url(&self.base_url)
    }
}

/// Reduce `base_url` to `scheme://host[:port]`, accepting only http(s).
pub fn normalize_base_url(base_url: &str) -> Result<String> {
    let url = Url::parse(base_url)
        .map_err(|e| ApiError::Config(format!("malformed base URL '{base_url}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::Config(format!(
            "URL protocol must be http or https. Value was '{base_url}'"
        )));
    }
    if url.host_str().is_none() {
        return Err(ApiError::Config(format!("base URL '{base_url}' has no host")));
    }
    Ok(url.origin().ascii_serialization())
}

mod optional_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer};

    /// Seconds as a float. Negative, non-finite or overflowing values are rejected.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(|e| D::Error::custom(format!("invalid timeout: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_everything_past_the_host() {
        assert_eq!(
            normalize_base_url("https://studio.example.com/page/123?x=1").unwrap(),
            "https://studio.example.com"
        );
        assert_eq!(normalize_base_url("http://localhost:3000/").unwrap(), "http://localhost:3000");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = normalize_base_url("ftp://studio.example.com").unwrap_err();
        assert!(err.to_string().contains("URL protocol must be http or https"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(normalize_base_url("studio.example.com"), Err(ApiError::Config(_))));
    }

    #[test]
    fn zero_page_size_is_invalid() {
        let config = ClientConfig::new("http://localhost", "script", "key").with_records_per_page(0);
        assert!(matches!(config.validate(), Err(ApiError::Config(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url":"http://localhost","script_name":"s","script_key":"k","timeout":2.5}"#,
        )
        .unwrap();
        assert_eq!(config.records_per_page, 500);
        assert!(config.log_faults);
        assert_eq!(config.http_proxy, None);
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn negative_timeout_is_a_deserialization_error() {
        let result = serde_json::from_str::<ClientConfig>(
            r#"{"base_url":"http://localhost","script_name":"s","script_key":"k","timeout":-1}"#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("invalid timeout"), "{err}");
    }

    // Every SHOTGUN_* variable is touched by this one test only.
    #[test]
    fn from_env_reads_and_requires_variables() {
        std::env::set_var(ENV_BASE_URL, "https://studio.example.com/projects");
        std::env::set_var(ENV_SCRIPT_NAME, "ingest");
        std::env::set_var(ENV_SCRIPT_KEY, "secret");
        std::env::set_var(ENV_HTTP_PROXY, "");
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.base_url, "https://studio.example.com/projects");
        assert_eq!(config.script_name, "ingest");
        assert_eq!(config.script_key, "secret");
        assert_eq!(config.http_proxy, None);
        assert_eq!(config.records_per_page, 500);

        std::env::set_var(ENV_HTTP_PROXY, "http://proxy.local:8080");
        assert_eq!(
            ClientConfig::from_env().unwrap().http_proxy.as_deref(),
            Some("http://proxy.local:8080")
        );

        std::env::remove_var(ENV_SCRIPT_KEY);
        let err = ClientConfig::from_env().unwrap_err();
        assert!(matches!(err, ApiError::Config(ref msg) if msg.contains(ENV_SCRIPT_KEY)));

        for name in [ENV_BASE_URL, ENV_SCRIPT_NAME, ENV_HTTP_PROXY] {
            std::env::remove_var(name);
        }
    }
}
