//! Configuration management for Hubcast
//!
//! Provider credentials are app-level OAuth client settings, not per-account
//! tokens. A provider with no section here is simply not routable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::Provider;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub http: HttpConfig,
    pub facebook: Option<OAuthKeys>,
    pub instagram: Option<OAuthKeys>,
    pub linkedin: Option<OAuthKeys>,
    pub reddit: Option<RedditConfig>,
    pub pinterest: Option<PinterestConfig>,
    pub x: Option<OAuthKeys>,
    pub blog: Option<BlogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-call timeout applied to every outbound provider request.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// OAuth client settings shared by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthKeys {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(flatten)]
    pub keys: OAuthKeys,
    /// Reddit requires a descriptive User-Agent on every call.
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinterestConfig {
    #[serde(flatten)]
    pub keys: OAuthKeys,
    /// When set, the OAuth exchange is skipped entirely and `sandbox_token`
    /// is used against the Pinterest sandbox API.
    #[serde(default)]
    pub sandbox: bool,
    pub sandbox_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogConfig {
    #[serde(flatten)]
    pub keys: OAuthKeys,
    /// Base URL of the CMS REST API.
    pub api_base: String,
}

impl HubConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: HubConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sections that are present but unusable.
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (provider, keys) in self.configured_keys() {
            if keys.client_id.is_empty() {
                return Err(ConfigError::MissingField(format!("{}.client_id", provider)));
            }
            if keys.client_secret.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "{}.client_secret",
                    provider
                )));
            }
            if keys.redirect_url.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "{}.redirect_url",
                    provider
                )));
            }
        }
        if let Some(pinterest) = &self.pinterest {
            if pinterest.sandbox && pinterest.sandbox_token.is_none() {
                return Err(ConfigError::MissingField(
                    "pinterest.sandbox_token".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn configured_keys(&self) -> Vec<(Provider, &OAuthKeys)> {
        let mut keys = Vec::new();
        if let Some(k) = &self.facebook {
            keys.push((Provider::Facebook, k));
        }
        if let Some(k) = &self.instagram {
            keys.push((Provider::Instagram, k));
        }
        if let Some(k) = &self.linkedin {
            keys.push((Provider::LinkedIn, k));
        }
        if let Some(k) = &self.reddit {
            keys.push((Provider::Reddit, &k.keys));
        }
        if let Some(k) = &self.pinterest {
            keys.push((Provider::Pinterest, &k.keys));
        }
        if let Some(k) = &self.x {
            keys.push((Provider::X, k));
        }
        if let Some(k) = &self.blog {
            keys.push((Provider::Blog, &k.keys));
        }
        keys
    }

    /// Providers that can actually be routed to with this configuration.
    pub fn configured_providers(&self) -> Vec<Provider> {
        self.configured_keys().into_iter().map(|(p, _)| p).collect()
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("HUBCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("hubcast").join("config.toml"))
}
