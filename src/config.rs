use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::correlator::CorrelatorConfig;
use crate::notification::NotificationConfig;
use crate::server::WebhookServerConfig;
use crate::Result;

pub const DEFAULT_CONFIG_FILE: &str = "metrics-webhook.toml";
const ENV_PREFIX: &str = "METRICS_WEBHOOK_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub log_format: String,
    pub server: WebhookServerConfig,
    pub notification: NotificationConfig,
    pub correlator: CorrelatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            server: WebhookServerConfig::default(),
            notification: NotificationConfig::default(),
            correlator: CorrelatorConfig::default(),
        }
    }
}

impl Config {
    /// Loads `metrics-webhook.toml` from the working directory (when
    /// present) with `METRICS_WEBHOOK_*` environment overrides on top.
    /// Nested keys split on double underscores, e.g.
    /// `METRICS_WEBHOOK_SERVER__PORT=4031`.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }
}
