//! Knowledge base connection settings.
//!
//! The service uses two endpoints: the authoring endpoint (updates,
//! operations, publish, downloads) authenticated with a subscription key,
//! and the runtime endpoint (answer generation) authenticated with an
//! endpoint key.
//!
//! ```rust,no_run
//! use atrium_kb::KbConfig;
//!
//! let config = KbConfig::from_env();
//! config.validate().expect("knowledge base is configured");
//! ```

use std::env;

use atrium_core::{defaults, Error, Result};

/// Knowledge base client configuration.
#[derive(Debug, Clone)]
pub struct KbConfig {
    pub authoring_endpoint: String,
    pub subscription_key: String,
    pub runtime_endpoint: String,
    pub endpoint_key: String,
    /// Knowledge base every workspace shares.
    pub kb_id: String,
    /// Environment (`test` or `prod`) read by entry downloads.
    pub environment: String,
    pub timeout_seconds: u64,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            authoring_endpoint: String::new(),
            subscription_key: String::new(),
            runtime_endpoint: String::new(),
            endpoint_key: String::new(),
            kb_id: String::new(),
            environment: defaults::KB_ENVIRONMENT.to_string(),
            timeout_seconds: defaults::KB_TIMEOUT_SECS,
        }
    }
}

impl KbConfig {
    /// Load from `KB_*` environment variables.
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).unwrap_or_default();
        Self {
            authoring_endpoint: var("KB_AUTHORING_ENDPOINT"),
            subscription_key: var("KB_SUBSCRIPTION_KEY"),
            runtime_endpoint: var("KB_RUNTIME_ENDPOINT"),
            endpoint_key: var("KB_ENDPOINT_KEY"),
            kb_id: var("KB_ID"),
            environment: env::var("KB_ENVIRONMENT")
                .unwrap_or_else(|_| defaults::KB_ENVIRONMENT.to_string()),
            timeout_seconds: env::var("KB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::KB_TIMEOUT_SECS),
        }
    }

    pub fn with_authoring(mut self, endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        self.authoring_endpoint = endpoint.into();
        self.subscription_key = key.into();
        self
    }

    pub fn with_runtime(mut self, endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        self.runtime_endpoint = endpoint.into();
        self.endpoint_key = key.into();
        self
    }

    pub fn with_kb_id(mut self, kb_id: impl Into<String>) -> Self {
        self.kb_id = kb_id.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Check that every endpoint is a URL and the ids are set.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("KB_AUTHORING_ENDPOINT", &self.authoring_endpoint),
            ("KB_RUNTIME_ENDPOINT", &self.runtime_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "{} must start with http:// or https://, got: {:?}",
                    name, url
                )));
            }
        }
        if self.kb_id.is_empty() {
            return Err(Error::Config("KB_ID is not set".to_string()));
        }
        if !matches!(self.environment.as_str(), "test" | "prod") {
            return Err(Error::Config(format!(
                "KB_ENVIRONMENT must be test or prod, got: {}",
                self.environment
            )));
        }
        Ok(())
    }
}
