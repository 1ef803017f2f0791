pub mod types;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl ControllerConfig {
    /// Load configuration from a file (if it exists), then apply
    /// environment variable overrides — the original nginx-proxy reads
    /// everything from the environment; this keeps that path working for
    /// container deployments while still allowing a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ControllerConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!("config file not found at {}, using environment and defaults", path.display());
            ControllerConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded controller configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NGINX_CONFIG_DIR") {
            self.nginx_config_dir = strip_trailing_slash(&v);
        }
        if let Ok(v) = std::env::var("SSL_DIR") {
            self.ssl_dir = strip_trailing_slash(&v);
        }
        if let Ok(v) = std::env::var("CHALLENGE_DIR") {
            self.challenge_dir = strip_trailing_slash(&v);
        }
        if let Ok(v) = std::env::var("HOSTNAME") {
            self.hostname = Some(v);
        }
        if let Ok(v) = std::env::var("ACME_DIRECTORY_URL") {
            self.acme_directory_url = v;
        }
        if let Ok(v) = std::env::var("ACME_CONTACT_EMAIL") {
            self.acme_contact_email = Some(v);
        }
        if let Ok(v) = std::env::var("ADMIN_LISTEN") {
            self.admin_listen = v;
        }
        if let Ok(v) = std::env::var("DOCKER_HOST") {
            self.docker_host = Some(v);
        }
        if let Ok(v) = std::env::var("RENEWAL_MIN_REMAINING_DAYS") {
            if let Ok(n) = v.parse() {
                self.renewal_min_remaining_days = n;
            }
        }
        if let Ok(v) = std::env::var("RENEWAL_MAX_SLEEP_DAYS") {
            if let Ok(n) = v.parse() {
                self.renewal_max_sleep_days = n;
            }
        }
        if let Ok(v) = std::env::var("FALLBACK_NETWORK") {
            self.fallback_network = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.as_deref().is_some_and(str::is_empty) {
            anyhow::bail!("HOSTNAME must not be empty when set");
        }
        if self.renewal_min_remaining_days <= 0 {
            anyhow::bail!("RENEWAL_MIN_REMAINING_DAYS must be positive");
        }
        Ok(())
    }
}

fn strip_trailing_slash(s: &str) -> String {
    s.strip_suffix('/').unwrap_or(s).to_string()
}
