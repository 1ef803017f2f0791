//! Proxy driver (spec.md §4.4): manage a child `nginx` process whose
//! configuration is a single file under a configured directory, and the
//! domain-ownership self-check (spec.md "Domain ownership check") that
//! writes into the same challenge directory.
//!
//! Mirrors the original's `Nginx` class (`nginx/nginx.py`): `config_test`,
//! `start`, `force_start`, `update_config`, `reload`, `wait` keep the same
//! shapes and the same rollback-on-failure behavior.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::ControllerError;
use crate::tls::acme::DomainVerifier;

const CONFIG_TEST_ARGS: &[&str] = &["-t"];
const START_ARGS: &[&str] = &[];
const RELOAD_ARGS: &[&str] = &["-s", "reload"];

/// The token written under a random filename for `verify_domain` is this
/// long, matching spec.md §4.4 exactly.
const VERIFY_TOKEN_LEN: usize = 256;
const VERIFY_FILENAME_LEN: usize = 32;

pub struct ProxyDriver {
    binary: String,
    config_file_path: PathBuf,
    challenge_dir: PathBuf,
    last_working_config: Mutex<String>,
    last_error: Mutex<Option<String>>,
    http_client: reqwest::Client,
}

impl ProxyDriver {
    /// `binary` is normally `"nginx"`; overridable so tests can point at a
    /// stub script instead of a real proxy binary.
    pub fn new(binary: impl Into<String>, config_file_path: impl Into<PathBuf>, challenge_dir: impl Into<PathBuf>) -> Result<Self, ControllerError> {
        let config_file_path = config_file_path.into();
        let challenge_dir = challenge_dir.into();

        std::fs::create_dir_all(&challenge_dir)
            .map_err(|e| ControllerError::Internal(format!("failed to create challenge dir: {e}")))?;

        let last_working_config = std::fs::read_to_string(&config_file_path).unwrap_or_default();

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| ControllerError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            binary: binary.into(),
            config_file_path,
            challenge_dir,
            last_working_config: Mutex::new(last_working_config),
            last_error: Mutex::new(None),
            http_client,
        })
    }

    pub fn challenge_dir(&self) -> &Path {
        &self.challenge_dir
    }

    pub async fn last_working_config(&self) -> String {
        self.last_working_config.lock().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    async fn run(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        Command::new(&self.binary).args(args).output().await
    }

    /// `nginx -t`: true iff the configuration currently on disk is valid.
    /// Stashes stderr as `last_error` on failure.
    pub async fn config_test(&self) -> bool {
        match self.run(CONFIG_TEST_ARGS).await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                warn!(stderr = %stderr, "proxy: config test failed");
                *self.last_error.lock().await = Some(stderr);
                false
            }
            Err(e) => {
                *self.last_error.lock().await = Some(e.to_string());
                false
            }
        }
    }

    /// Start the proxy process. True on exit code 0.
    pub async fn start(&self) -> bool {
        match self.run(START_ARGS).await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                error!(stderr = %String::from_utf8_lossy(&output.stderr), "proxy: start failed");
                false
            }
            Err(e) => {
                error!(error = %e, "proxy: failed to spawn start command");
                false
            }
        }
    }

    /// Write `cfg` unconditionally and start, restoring `last_working_config`
    /// to disk on failure (spec.md §4.4/§7: a `force_start` failure is fatal
    /// at startup, but the disk restore still happens so a later manual
    /// `nginx -s reload` doesn't pick up a broken file).
    pub async fn force_start(&self, cfg: &str) -> Result<bool, ControllerError> {
        write_file(&self.config_file_path, cfg).await?;

        if self.start().await {
            *self.last_working_config.lock().await = cfg.to_string();
            Ok(true)
        } else {
            let last_working = self.last_working_config.lock().await.clone();
            write_file(&self.config_file_path, &last_working).await?;
            Ok(false)
        }
    }

    /// `nginx -s reload`.
    pub async fn reload(&self) -> Result<(), String> {
        match self.run(RELOAD_ARGS).await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(String::from_utf8_lossy(&output.stderr).into_owned()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Write `cfg` and reload iff it differs from `last_working_config`,
    /// rolling the on-disk file back byte-for-byte on reload failure.
    /// Returns `false` both when nothing changed and when the reload failed.
    pub async fn update_config(&self, cfg: String) -> Result<bool, ControllerError> {
        {
            let last_working = self.last_working_config.lock().await;
            if *last_working == cfg {
                return Ok(false);
            }
        }

        write_file(&self.config_file_path, &cfg).await?;

        match self.reload().await {
            Ok(()) => {
                info!("proxy: reloaded successfully");
                *self.last_working_config.lock().await = cfg;
                Ok(true)
            }
            Err(stderr) => {
                let last_working = self.last_working_config.lock().await.clone();
                warn!(diff = %unified_diff(&last_working, &cfg), stderr = %stderr, "proxy: reload failed, rolling back");
                write_file(&self.config_file_path, &last_working).await?;
                Ok(false)
            }
        }
    }

    /// Block until a TCP connection to 127.0.0.1:80 succeeds, polling at 1Hz.
    pub async fn wait_ready(&self) {
        loop {
            if TcpStream::connect("127.0.0.1:80").await.is_ok() {
                info!("proxy: is alive");
                return;
            }
            info!("proxy: waiting for process to be ready");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Domain ownership self-check (spec.md §4.4): write a random token at a
    /// random filename under the challenge directory, then fetch
    /// `http://<name>/.well-known/acme-challenge/<filename>` for each name
    /// and keep the ones that echo the token back verbatim with a 200.
    pub async fn verify_domain(&self, names: &[String]) -> Vec<String> {
        let token: String = random_token(VERIFY_TOKEN_LEN);
        let filename: String = random_token(VERIFY_FILENAME_LEN);
        let path = self.challenge_dir.join(&filename);

        if let Err(e) = write_file(&path, &token).await {
            error!(error = %e, "proxy: failed to write domain-ownership token");
            return Vec::new();
        }

        let mut verified = Vec::with_capacity(names.len());
        for name in names {
            let url = format!("http://{name}/.well-known/acme-challenge/{filename}");
            match self.http_client.get(&url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => match resp.text().await {
                    Ok(body) if body == token => verified.push(name.clone()),
                    Ok(_) => warn!(domain = %name, "proxy: domain ownership check returned wrong body"),
                    Err(e) => warn!(domain = %name, error = %e, "proxy: domain ownership check body read failed"),
                },
                Ok(resp) => warn!(domain = %name, status = %resp.status(), "proxy: domain ownership check failed"),
                Err(e) => warn!(domain = %name, error = %e, "proxy: domain ownership check request failed"),
            }
        }

        tokio::fs::remove_file(&path).await.ok();
        verified
    }
}

#[async_trait]
impl DomainVerifier for ProxyDriver {
    async fn verify(&self, names: &[String]) -> Vec<String> {
        self.verify_domain(names).await
    }
}

/// Thread-safe handle shared between the reactor, the SSL processor
/// (as a `DomainVerifier`), and the admin server.
pub type SharedProxyDriver = Arc<ProxyDriver>;

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

async fn write_file(path: &Path, contents: &str) -> Result<(), ControllerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ControllerError::Internal(format!("failed to create {}: {e}", parent.display())))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ControllerError::Internal(format!("failed to open {}: {e}", path.display())))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| ControllerError::Internal(format!("failed to write {}: {e}", path.display())))
}

/// A logging-only line diff (no `difflib` equivalent in the dependency
/// stack): lines present only in `old` are prefixed `-`, only in `new`
/// prefixed `+`, shared lines are omitted. Good enough to see what changed
/// in a reload-failure log line; not a true LCS-based unified diff.
fn unified_diff(old: &str, new: &str) -> String {
    use std::collections::BTreeSet;

    let old_lines: BTreeSet<&str> = old.lines().collect();
    let new_lines: BTreeSet<&str> = new.lines().collect();

    let mut out = String::new();
    for line in old.lines() {
        if !new_lines.contains(line) {
            out.push_str("-");
            out.push_str(line);
            out.push('\n');
        }
    }
    for line in new.lines() {
        if !old_lines.contains(line) {
            out.push_str("+");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
