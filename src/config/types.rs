use serde::{Deserialize, Serialize};

/// Controller configuration: where nginx/SSL artifacts live, how to reach
/// the orchestrator, and the ACME/renewal policy. There is no business
/// config here (spec.md Non-goals: no persistent state between restarts) —
/// everything routing-related comes from the orchestrator at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_nginx_config_dir")]
    pub nginx_config_dir: String,

    #[serde(default = "default_ssl_dir")]
    pub ssl_dir: String,

    #[serde(default = "default_challenge_dir")]
    pub challenge_dir: String,

    /// This controller's own hostname, used to skip self-routing and to
    /// identify itself in logs. No default: required for the controller to
    /// "learn itself" (spec.md §9).
    pub hostname: Option<String>,

    #[serde(default = "default_acme_directory_url")]
    pub acme_directory_url: String,

    #[serde(default)]
    pub acme_contact_email: Option<String>,

    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,

    #[serde(default)]
    pub docker_host: Option<String>,

    #[serde(default = "default_renewal_min_remaining_days")]
    pub renewal_min_remaining_days: i64,

    #[serde(default = "default_renewal_max_sleep_days")]
    pub renewal_max_sleep_days: i64,

    /// Network assumed "known" when the controller can't inspect its own
    /// container to learn its real network attachments (spec.md §4.7 step
    /// 4's fallback).
    #[serde(default = "default_fallback_network")]
    pub fallback_network: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            nginx_config_dir: default_nginx_config_dir(),
            ssl_dir: default_ssl_dir(),
            challenge_dir: default_challenge_dir(),
            hostname: None,
            acme_directory_url: default_acme_directory_url(),
            acme_contact_email: None,
            admin_listen: default_admin_listen(),
            docker_host: None,
            renewal_min_remaining_days: default_renewal_min_remaining_days(),
            renewal_max_sleep_days: default_renewal_max_sleep_days(),
            fallback_network: default_fallback_network(),
        }
    }
}

fn default_nginx_config_dir() -> String {
    "/etc/nginx/".to_string()
}

fn default_ssl_dir() -> String {
    "/etc/ssl/".to_string()
}

fn default_challenge_dir() -> String {
    "/tmp/acme-challenges/".to_string()
}

fn default_acme_directory_url() -> String {
    "https://acme-v02.api.letsencrypt.org/directory".to_string()
}

fn default_admin_listen() -> String {
    "0.0.0.0:9411".to_string()
}

/// Below this many days remaining, a certificate is no longer "usable" and
/// must be reissued (spec.md §4.6's renewal window).
fn default_renewal_min_remaining_days() -> i64 {
    6
}

/// Upper bound on how long the renewal scheduler sleeps between checks,
/// even when every certificate is comfortably within its validity window
/// (spec.md §4.6: `min(remaining, 32) - 2` days).
fn default_renewal_max_sleep_days() -> i64 {
    32
}

fn default_fallback_network() -> String {
    "bridge".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.nginx_config_dir, "/etc/nginx/");
        assert_eq!(cfg.ssl_dir, "/etc/ssl/");
        assert_eq!(cfg.challenge_dir, "/tmp/acme-challenges/");
        assert!(cfg.hostname.is_none());
        assert_eq!(cfg.acme_directory_url, "https://acme-v02.api.letsencrypt.org/directory");
        assert_eq!(cfg.admin_listen, "0.0.0.0:9411");
        assert_eq!(cfg.renewal_min_remaining_days, 6);
        assert_eq!(cfg.renewal_max_sleep_days, 32);
        assert_eq!(cfg.fallback_network, "bridge");
    }

    #[test]
    fn deserializes_partial_toml_with_defaults() {
        let cfg: ControllerConfig = toml::from_str(r#"hostname = "proxy.example.com""#).unwrap();
        assert_eq!(cfg.hostname.as_deref(), Some("proxy.example.com"));
        assert_eq!(cfg.nginx_config_dir, "/etc/nginx/");
    }
}
