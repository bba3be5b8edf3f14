//! YAML configuration model.

pub mod reloader;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::params::OptionalParams;
use crate::notification::NotificationFormats;
use crate::utils::duration;
use crate::Result;

pub const DEFAULT_CACHED_CREDENTIALS_FILE: &str = "withny-dl.json";
pub const DEFAULT_CLEAR_CACHE_AFTER: u32 = 10;
pub const DEFAULT_POLLING_PACING: Duration = Duration::from_millis(500);

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub notifier: NotifierConfig,
    pub rate_limit_avoidance: RateLimitAvoidance,
    pub credentials_file: String,
    pub cached_credentials_file: String,
    pub clear_credential_cache_on_failure_after: u32,
    pub default_params: OptionalParams,
    pub channels: BTreeMap<String, OptionalParams>,
}

impl Config {
    pub fn cached_credentials_file(&self) -> &str {
        if self.cached_credentials_file.is_empty() {
            DEFAULT_CACHED_CREDENTIALS_FILE
        } else {
            &self.cached_credentials_file
        }
    }

    pub fn clear_credential_cache_on_failure_after(&self) -> u32 {
        if self.clear_credential_cache_on_failure_after == 0 {
            DEFAULT_CLEAR_CACHE_AFTER
        } else {
            self.clear_credential_cache_on_failure_after
        }
    }

    pub fn polling_pacing(&self) -> Duration {
        self.rate_limit_avoidance
            .polling_pacing
            .unwrap_or(DEFAULT_POLLING_PACING)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotifierConfig {
    pub enabled: bool,
    pub include_title_in_message: bool,
    pub no_priority: bool,
    pub urls: Vec<String>,
    pub notification_formats: NotificationFormats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitAvoidance {
    #[serde(with = "duration::option")]
    pub polling_pacing: Option<Duration>,
}

/// Load and parse the configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}
