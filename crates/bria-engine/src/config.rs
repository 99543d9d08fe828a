use std::env;
use std::fmt;
use std::time::Duration;

use crate::non_empty_env;

pub const DEFAULT_API_BASE: &str = "https://engine.prod.bria-api.com/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_PYTHON: &str = "python3";

#[derive(Clone)]
pub struct BriaConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
    pub python: String,
}

impl Default for BriaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            python: DEFAULT_PYTHON.to_string(),
        }
    }
}

impl BriaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: non_empty_env("BRIA_API_KEY").or_else(|| non_empty_env("BRIA_API_TOKEN")),
            api_base: env::var("BRIA_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            timeout: non_empty_env("BRIA_TIMEOUT_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            python: non_empty_env("BRIA_LOCAL_PYTHON").unwrap_or(defaults.python),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        if let Some(key) = api_key
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            self.api_key = Some(key);
        }
        self
    }

    pub fn with_api_base(mut self, api_base: Option<String>) -> Self {
        if let Some(base) = api_base
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
        {
            self.api_base = base;
        }
        self
    }
}

impl fmt::Debug for BriaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BriaConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("python", &self.python)
            .finish()
    }
}
