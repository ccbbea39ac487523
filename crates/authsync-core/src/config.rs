//! Client configuration management.
//!
//! Holds the authentication service URL, cookie names and lifetime, the
//! cross-tab channel name, and the routes used for navigation.
//!
//! Configuration is stored at `~/.config/authsync/config.json`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "authsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Cookie jar file name in the cache directory
const COOKIE_JAR_FILE: &str = "cookies.json";

/// Environment variable overriding `base_url`
pub const BASE_URL_ENV: &str = "AUTHSYNC_BASE_URL";

/// 30 days
pub const DEFAULT_COOKIE_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub base_url: String,
    pub access_cookie: String,
    pub refresh_cookie: String,
    pub cookie_max_age_secs: i64,
    pub cookie_path: String,
    pub channel_name: String,
    pub public_route: String,
    pub authenticated_route: String,
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            access_cookie: "ignite-next-auth.token".to_string(),
            refresh_cookie: "ignite-next-auth.refreshToken".to_string(),
            cookie_max_age_secs: DEFAULT_COOKIE_MAX_AGE_SECS,
            cookie_path: "/".to_string(),
            channel_name: "auth".to_string(),
            public_route: "/".to_string(),
            authenticated_route: "/dashboard".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl AuthConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cookie_jar_path(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(COOKIE_JAR_FILE))
    }

    /// File shared by every process open on `channel_name`.
    pub fn channel_path(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir
            .join(APP_NAME)
            .join(format!("{}.channel", self.channel_name)))
    }

    /// Join a path onto `base_url` without doubling or dropping the slash.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cookie_layout() {
        let config = AuthConfig::default();
        assert_eq!(config.access_cookie, "ignite-next-auth.token");
        assert_eq!(config.refresh_cookie, "ignite-next-auth.refreshToken");
        assert_eq!(config.cookie_max_age_secs, 2_592_000);
        assert_eq!(config.cookie_path, "/");
        assert_eq!(config.channel_name, "auth");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AuthConfig =
            serde_json::from_str(r#"{"base_url":"https://auth.example.com"}"#).expect("parse");
        assert_eq!(config.base_url, "https://auth.example.com");
        assert_eq!(config.public_route, "/");
        assert_eq!(config.authenticated_route, "/dashboard");
    }

    #[test]
    fn test_channel_path_follows_channel_name() {
        let mut config = AuthConfig::default();
        config.channel_name = "staging-auth".to_string();
        let Ok(path) = config.channel_path() else {
            return; // no cache directory on this host
        };
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("staging-auth.channel"));
        assert!(path.parent().is_some_and(|dir| dir.ends_with(APP_NAME)));
    }

    #[test]
    fn test_url_joining() {
        let mut config = AuthConfig::default();
        assert_eq!(config.url("/me"), "http://localhost:3333/me");
        assert_eq!(config.url("sessions"), "http://localhost:3333/sessions");

        config.base_url = "http://localhost:3333/".to_string();
        assert_eq!(config.url("/refresh"), "http://localhost:3333/refresh");
    }
}
