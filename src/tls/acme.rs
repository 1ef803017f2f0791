//! TLS certificate lifecycle (spec.md §4.5): ACME HTTP-01 issuance, a
//! self-signed fallback, and the filesystem layout nginx reads certs from.
//!
//! Mirrors the original's `SSL` class: certs live under `<ssl_dir>/certs`,
//! private keys under `<ssl_dir>/private`, ACME account keys under
//! `<ssl_dir>/accounts`, keyed by domain name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, Authorization, AuthorizationStatus, ChallengeType, Identifier,
    NewAccount, NewOrder, OrderStatus,
};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::ControllerError;

/// Certificates are issued in batches this large at most, matching the
/// original's `register_certificate_or_self_sign` loop over `domain[i:i+50]`
/// — Let's Encrypt's own order-identifier limit.
const BATCH_SIZE: usize = 50;

/// Domain ownership check (spec.md §4.4's `verify_domain`), consulted before
/// ACME issuance. Implemented by the proxy driver, which owns the challenge
/// directory `verify_domain` writes into — kept as a trait here so `tls`
/// doesn't depend on `proxy`.
#[async_trait]
pub trait DomainVerifier: Send + Sync {
    /// Returns the subset of `names` that proved ownership.
    async fn verify(&self, names: &[String]) -> Vec<String>;
}

pub struct SslManager {
    ssl_dir: PathBuf,
    challenge_dir: PathBuf,
    directory_url: String,
    contact_email: Option<String>,
    verifier: Option<Arc<dyn DomainVerifier>>,
}

impl SslManager {
    pub fn new(ssl_dir: impl Into<PathBuf>, challenge_dir: impl Into<PathBuf>, directory_url: String, contact_email: Option<String>) -> Self {
        Self {
            ssl_dir: ssl_dir.into(),
            challenge_dir: challenge_dir.into(),
            directory_url,
            contact_email,
            verifier: None,
        }
    }

    /// Attach a domain ownership verifier (spec.md §4.4) run before each
    /// ACME order is placed.
    pub fn with_verifier(mut self, verifier: Arc<dyn DomainVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn cert_file(&self, domain: &str) -> PathBuf {
        self.ssl_dir.join("certs").join(format!("{domain}.crt"))
    }

    pub fn private_file(&self, domain: &str) -> PathBuf {
        self.ssl_dir.join("private").join(format!("{domain}.key"))
    }

    pub fn selfsigned_cert_file(&self, domain: &str) -> PathBuf {
        self.ssl_dir.join("certs").join(format!("{domain}.selfsigned.crt"))
    }

    pub fn selfsigned_private_file(&self, domain: &str) -> PathBuf {
        self.ssl_dir.join("private").join(format!("{domain}.selfsigned.key"))
    }

    fn account_key_file(&self, domain: &str) -> PathBuf {
        self.ssl_dir.join("accounts").join(format!("{domain}.account.key"))
    }

    pub fn cert_exists(&self, domain: &str) -> bool {
        self.cert_file(domain).exists() && self.private_file(domain).exists()
    }

    fn cert_exists_self_signed(&self, domain: &str) -> bool {
        self.cert_file(&format!("{domain}.selfsigned")).exists() && self.private_file(&format!("{domain}.selfsigned")).exists()
    }

    /// The `notAfter` of the certificate on disk for `domain`, read straight
    /// from the DER, or `None` if there is no certificate yet.
    pub fn expiry_time(&self, domain: &str) -> Option<OffsetDateTime> {
        let pem = std::fs::read(self.cert_file(domain)).ok()?;
        let mut reader = std::io::BufReader::new(pem.as_slice());
        let der = rustls_pemfile::certs(&mut reader).next()?.ok()?;
        let (_, cert) = x509_parser::parse_x509_certificate(&der).ok()?;
        let not_after = cert.validity().not_after;
        OffsetDateTime::from_unix_timestamp(not_after.timestamp()).ok()
    }

    /// `*.example.com` for `foo.example.com`, `None` for a bare second-level
    /// domain (`example.com` has no useful wildcard to reuse).
    pub fn wildcard_domain_name(domain: &str) -> Option<String> {
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() > 2 {
            Some(format!("*.{}", labels[1..].join(".")))
        } else {
            None
        }
    }

    /// Self-sign a 10-year RSA-1024 certificate for `domain`, matching the
    /// original's pyOpenSSL fallback exactly (including the short key —
    /// this is a "nginx starts even with no ACME access" safety net, not a
    /// production certificate).
    pub fn self_sign(&self, domain: &str) -> Result<(), ControllerError> {
        use openssl::asn1::Asn1Time;
        use openssl::hash::MessageDigest;
        use openssl::pkey::PKey;
        use openssl::rsa::Rsa;
        use openssl::x509::{X509NameBuilder, X509};

        let rsa = Rsa::generate(1024).map_err(|e| ControllerError::Acme(e.to_string()))?;
        let pkey = PKey::from_rsa(rsa).map_err(|e| ControllerError::Acme(e.to_string()))?;

        let mut name_builder = X509NameBuilder::new().map_err(|e| ControllerError::Acme(e.to_string()))?;
        name_builder.append_entry_by_text("C", "US").ok();
        name_builder.append_entry_by_text("ST", "Subject_st").ok();
        name_builder.append_entry_by_text("L", "Subject_l").ok();
        name_builder.append_entry_by_text("O", "ingressd").ok();
        name_builder.append_entry_by_text("CN", domain).ok();
        let name = name_builder.build();

        let mut builder = X509::builder().map_err(|e| ControllerError::Acme(e.to_string()))?;
        builder.set_version(2).ok();
        builder.set_subject_name(&name).ok();
        builder.set_issuer_name(&name).ok();
        builder.set_pubkey(&pkey).ok();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).map_err(|e| ControllerError::Acme(e.to_string()))?)
            .ok();
        builder
            .set_not_after(&Asn1Time::days_from_now(10 * 365).map_err(|e| ControllerError::Acme(e.to_string()))?)
            .ok();
        builder.sign(&pkey, MessageDigest::sha256()).map_err(|e| ControllerError::Acme(e.to_string()))?;
        let cert = builder.build();

        let cert_pem = cert.to_pem().map_err(|e| ControllerError::Acme(e.to_string()))?;
        let key_pem = pkey.private_key_to_pem_pkcs8().map_err(|e| ControllerError::Acme(e.to_string()))?;

        write_file(&self.selfsigned_cert_file(domain), &cert_pem)?;
        write_file(&self.selfsigned_private_file(domain), &key_pem)?;
        write_file(&self.cert_file(domain), &cert_pem)?;
        write_file(&self.private_file(domain), &key_pem)?;
        Ok(())
    }

    /// Copy `domain1`'s cert/key/account-key onto `domain2` — used when one
    /// ACME order covers several domains (wildcard reuse, batch issuance).
    pub fn reuse(&self, domain1: &str, domain2: &str) -> Result<(), ControllerError> {
        std::fs::copy(self.cert_file(domain1), self.cert_file(domain2)).map_err(|e| ControllerError::Acme(e.to_string()))?;
        std::fs::copy(self.private_file(domain1), self.private_file(domain2)).map_err(|e| ControllerError::Acme(e.to_string()))?;
        if self.account_key_file(domain1).exists() {
            std::fs::copy(self.account_key_file(domain1), self.account_key_file(domain2)).map_err(|e| ControllerError::Acme(e.to_string()))?;
        }
        Ok(())
    }

    /// Obtain certificates for as many of `domains` as ACME will grant,
    /// falling back to self-signed for the rest. Returns the domains that
    /// got a real certificate.
    ///
    /// `ignore_existing`: when true, (re)issue even for domains that already
    /// have a certificate on disk — the renewal scheduler and the SSL
    /// processor's issuance batch both pass `true` here since they only ever
    /// select domains they've already decided need a fresh certificate.
    pub async fn register_certificate_or_self_sign(&self, domains: &[String], ignore_existing: bool) -> Vec<String> {
        info!(domains = ?domains, "acme: registering certificates");
        let mut obtained = Vec::new();

        for chunk in domains.chunks(BATCH_SIZE) {
            match self.register_certificate(chunk, ignore_existing).await {
                Ok(issued) if !issued.is_empty() => {
                    let primary = issued[0].clone();
                    for alt in &issued[1..] {
                        if let Err(e) = self.reuse(&primary, alt) {
                            warn!(domain = %alt, error = %e, "acme: failed to reuse certificate within batch");
                        }
                    }
                    obtained.extend(issued);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "acme: batch issuance failed, falling back to self-signed"),
            }
        }

        let obtained_set: std::collections::BTreeSet<&str> = obtained.iter().map(String::as_str).collect();
        let self_signed: Vec<&String> = domains.iter().filter(|d| !obtained_set.contains(d.as_str())).collect();
        if !self_signed.is_empty() {
            info!(domains = ?self_signed, "acme: self-signing remaining domains");
        }
        for domain in self_signed {
            if !self.cert_exists_self_signed(domain) {
                if let Err(e) = self.self_sign(domain) {
                    warn!(domain = %domain, error = %e, "acme: self-sign failed");
                }
            }
        }

        obtained
    }

    /// Run one ACME HTTP-01 order covering `domains` (all in the same
    /// certificate, at most `BATCH_SIZE`). Non-FQDN entries (no `.`) are
    /// dropped; when `ignore_existing` is false, domains that already have a
    /// certificate on disk are skipped too.
    async fn register_certificate(&self, domains: &[String], ignore_existing: bool) -> Result<Vec<String>, ControllerError> {
        let mut pending: Vec<String> = domains
            .iter()
            .filter(|d| d.contains('.') && (ignore_existing || !self.cert_exists(d)))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(verifier) = &self.verifier {
            pending = verifier.verify(&pending).await;
            if pending.is_empty() {
                warn!("acme: domain ownership check failed for all candidates, skipping issuance");
                return Ok(Vec::new());
            }
        }

        let account = self.load_or_create_account(&pending[0]).await?;

        let identifiers: Vec<Identifier> = pending.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| ControllerError::Acme(e.to_string()))?;

        let authorizations = order.authorizations().await.map_err(|e| ControllerError::Acme(e.to_string()))?;
        for authz in &authorizations {
            self.solve_http_01(&mut order, authz).await?;
        }

        let private_key_pem = order
            .finalize()
            .await
            .map_err(|e| ControllerError::Acme(e.to_string()))?;

        let cert_chain_pem = loop {
            match order.poll_certificate().await.map_err(|e| ControllerError::Acme(e.to_string()))? {
                Some(chain) => break chain,
                None => tokio::time::sleep(std::time::Duration::from_secs(2)).await,
            }
        };

        let primary = &pending[0];
        write_file(&self.private_file(primary), private_key_pem.as_bytes())?;
        write_file(&self.cert_file(primary), cert_chain_pem.as_bytes())?;

        Ok(pending)
    }

    async fn solve_http_01(&self, order: &mut instant_acme::Order, authz: &Authorization) -> Result<(), ControllerError> {
        if authz.status == AuthorizationStatus::Valid {
            return Ok(());
        }

        let mut challenge = authz
            .challenges
            .iter()
            .find(|c| c.r#type == ChallengeType::Http01)
            .cloned()
            .ok_or_else(|| ControllerError::Acme("no http-01 challenge offered".to_string()))?;

        let key_authorization = order.key_authorization(&challenge);
        let token = challenge.token.clone();
        write_file(&self.challenge_dir.join(&token), key_authorization.as_str().as_bytes())?;

        order
            .set_challenge_ready(&challenge.url)
            .await
            .map_err(|e| ControllerError::Acme(e.to_string()))?;

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            let state = order.refresh().await.map_err(|e| ControllerError::Acme(e.to_string()))?;
            match state.status {
                OrderStatus::Pending | OrderStatus::Processing => continue,
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(ControllerError::Acme(format!("authorization for challenge {} went invalid", challenge.url)))
                }
            }
        }
    }

    async fn load_or_create_account(&self, primary_domain: &str) -> Result<Account, ControllerError> {
        let key_file = self.account_key_file(primary_domain);

        if let Ok(bytes) = std::fs::read(&key_file) {
            let credentials: AccountCredentials = serde_json::from_slice(&bytes).map_err(|e| ControllerError::Acme(e.to_string()))?;
            return Account::from_credentials(credentials).await.map_err(|e| ControllerError::Acme(e.to_string()));
        }

        let contact: Vec<String> = self.contact_email.iter().map(|e| format!("mailto:{e}")).collect();
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact_refs,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| ControllerError::Acme(e.to_string()))?;

        let serialized = serde_json::to_vec_pretty(&credentials).map_err(|e| ControllerError::Acme(e.to_string()))?;
        write_file(&key_file, &serialized)?;

        Ok(account)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ControllerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ControllerError::Acme(e.to_string()))?;
    }
    std::fs::write(path, contents).map_err(|e| ControllerError::Acme(e.to_string()))
}

/// Thread-safe handle shared between the reactor and the renewal scheduler.
pub type SharedSslManager = Arc<SslManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_name_drops_leftmost_label() {
        assert_eq!(SslManager::wildcard_domain_name("app.example.com").as_deref(), Some("*.example.com"));
        assert_eq!(SslManager::wildcard_domain_name("a.b.example.com").as_deref(), Some("*.b.example.com"));
    }

    #[test]
    fn wildcard_name_none_for_bare_second_level_domain() {
        assert_eq!(SslManager::wildcard_domain_name("example.com"), None);
    }

    #[test]
    fn cert_paths_are_namespaced_under_ssl_dir() {
        let mgr = SslManager::new("/etc/ssl", "/tmp/challenges", "https://example".to_string(), None);
        assert_eq!(mgr.cert_file("a.com"), PathBuf::from("/etc/ssl/certs/a.com.crt"));
        assert_eq!(mgr.private_file("a.com"), PathBuf::from("/etc/ssl/private/a.com.key"));
    }

    #[test]
    fn cert_exists_is_false_with_no_files() {
        let mgr = SslManager::new("/nonexistent-ssl-dir-for-tests", "/tmp/challenges", "https://example".to_string(), None);
        assert!(!mgr.cert_exists("a.com"));
    }

    #[test]
    fn self_sign_writes_cert_and_key_files() {
        let dir = std::env::temp_dir().join(format!("ingressd-selfsign-test-{}", std::process::id()));
        let mgr = SslManager::new(&dir, dir.join("challenges"), "https://example".to_string(), None);
        mgr.self_sign("test.example.com").unwrap();
        assert!(mgr.cert_exists("test.example.com"));
        assert!(mgr.expiry_time("test.example.com").is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
