//! SSL post-processing (spec.md §4.6): decide which secured hosts need a
//! certificate, issue/self-sign them, and keep them renewed.
//!
//! Mirrors `SslCertificateProcessor` from the original — there it only
//! normalized `host.port`/`ssl_redirect` under a lock before nginx reload;
//! that normalization now lives in `Host::new`/`Host::merge`, so this
//! module's job is purely the certificate side: issuance and renewal.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::model::Host;
use crate::tls::acme::SslManager;

/// A cached certificate is still "usable" (spec.md §4.6 step 4) when more
/// than this many days remain until expiry — distinct from the scheduler's
/// own renewal-window constant (`min_remaining_days`, default 6 days).
const USABLE_THRESHOLD_DAYS: i64 = 2;

/// Per-domain expiry bookkeeping shared between the reactor (which learns
/// about new secured hosts) and the renewal scheduler (which reissues
/// certificates coming due). Guarded by a `Mutex` rather than `ArcSwap`
/// since both readers and writers mutate individual entries.
///
/// Only domains with a real ACME-issued certificate are cached here
/// (spec.md §4.6: the wildcard-reuse and self-signed branches explicitly
/// skip caching) — `SslProcessor::self_signed` tracks the self-signed set
/// separately.
#[derive(Default)]
pub struct ExpiryCache {
    entries: Mutex<BTreeMap<String, OffsetDateTime>>,
}

impl ExpiryCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn contains(&self, domain: &str) -> bool {
        self.entries.lock().await.contains_key(domain)
    }

    async fn set(&self, domain: &str, expiry: OffsetDateTime) {
        self.entries.lock().await.insert(domain.to_string(), expiry);
    }

    async fn remove_missing(&self, known_domains: &BTreeSet<String>) {
        self.entries.lock().await.retain(|domain, _| known_domains.contains(domain));
    }

    /// Domains whose certificate is not "usable" — spec.md §4.6's renewal
    /// window: fewer than `min_remaining_days` remain until expiry.
    async fn due_for_renewal(&self, min_remaining_days: i64) -> Vec<String> {
        let cutoff = OffsetDateTime::now_utc() + time::Duration::days(min_remaining_days);
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(_, expiry)| **expiry < cutoff)
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    async fn soonest_expiry(&self) -> Option<OffsetDateTime> {
        self.entries.lock().await.values().min().copied()
    }
}

pub struct SslProcessor {
    ssl: Arc<SslManager>,
    cache: Arc<ExpiryCache>,
    /// Hostnames currently served by a self-signed fallback certificate
    /// rather than a real ACME-issued one (spec.md §4.6's "set of
    /// self-signed hostnames"). Re-attempted on every reload since
    /// `register_certificate_or_self_sign` is called with
    /// `ignore_existing=true` for these.
    self_signed: Mutex<BTreeSet<String>>,
    /// The `next_ssl_expiry` last observed by `maybe_wake_scheduler` — the
    /// scheduler is only woken when this value actually changes (spec.md
    /// §4.6's final step), not on every reload.
    next_expiry: Mutex<Option<OffsetDateTime>>,
    min_remaining_days: i64,
    max_sleep_days: i64,
    wake: Arc<Notify>,
}

impl SslProcessor {
    pub fn new(ssl: Arc<SslManager>, min_remaining_days: i64, max_sleep_days: i64) -> Self {
        Self {
            ssl,
            cache: Arc::new(ExpiryCache::new()),
            self_signed: Mutex::new(BTreeSet::new()),
            next_expiry: Mutex::new(None),
            min_remaining_days,
            max_sleep_days,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Decide a certificate strategy for every secured host in `hosts` and
    /// stamp `ssl_file`/`ssl_expiry` in place, per spec.md §4.6's five-step
    /// algorithm: cached hit, wildcard reuse, still-usable on-disk cert,
    /// batched ACME issuance, then self-signed fallback for the rest.
    pub async fn process_ssl_certificates(&self, hosts: &mut [Host]) {
        let mut to_issue: Vec<String> = Vec::new();

        for host in hosts.iter_mut() {
            if !host.secured {
                continue;
            }

            // Step 2: already cached (a live ACME certificate we've already
            // accounted for in a previous reload).
            if self.cache.contains(&host.hostname).await {
                self.apply_issued(host).await;
                continue;
            }

            // Step 3: wildcard reuse — copied onto the host's own cert/key
            // filenames, but intentionally not cached (spec.md §4.6 step 3:
            // "continue (do not cache)").
            if let Some(wildcard) = SslManager::wildcard_domain_name(&host.hostname) {
                if self.ssl.cert_exists(&wildcard) {
                    match self.ssl.reuse(&wildcard, &host.hostname) {
                        Ok(()) => {
                            host.ssl_file = Some(host.hostname.clone());
                            self.self_signed.lock().await.remove(&host.hostname);
                            continue;
                        }
                        Err(e) => tracing::warn!(domain = %host.hostname, error = %e, "ssl: wildcard reuse failed"),
                    }
                }
            }

            // Step 4: an on-disk cert for this exact hostname that's still
            // comfortably within its validity window.
            if let Some(expiry) = self.ssl.expiry_time(&host.hostname) {
                if expiry > OffsetDateTime::now_utc() + time::Duration::days(USABLE_THRESHOLD_DAYS) {
                    self.cache.set(&host.hostname, expiry).await;
                    self.self_signed.lock().await.remove(&host.hostname);
                    host.ssl_file = Some(host.hostname.clone());
                    host.ssl_expiry = Some(expiry);
                    continue;
                }
            }

            // Step 5: needs a fresh certificate.
            to_issue.push(host.hostname.clone());
        }

        if !to_issue.is_empty() {
            let issued = self.ssl.register_certificate_or_self_sign(&to_issue, true).await;
            metrics::counter!("ingressd_certificates_issued_total").increment(issued.len() as u64);
            metrics::counter!("ingressd_certificates_selfsigned_total").increment((to_issue.len() - issued.len()) as u64);

            let issued_set: BTreeSet<&str> = issued.iter().map(String::as_str).collect();
            let to_issue_set: BTreeSet<&str> = to_issue.iter().map(String::as_str).collect();
            for host in hosts.iter_mut() {
                if !to_issue_set.contains(host.hostname.as_str()) {
                    continue;
                }
                if issued_set.contains(host.hostname.as_str()) {
                    self.apply_issued(host).await;
                } else {
                    self.apply_self_signed(host).await;
                }
            }
        }

        let known: BTreeSet<String> = hosts.iter().filter(|h| h.secured).map(|h| h.hostname.clone()).collect();
        self.cache.remove_missing(&known).await;
        self.self_signed.lock().await.retain(|h| known.contains(h));

        self.maybe_wake_scheduler().await;
    }

    /// Stamp a host whose certificate is the real, cached-or-just-issued
    /// ACME one (spec.md §4.6 step 2 / the issued half of the batch).
    async fn apply_issued(&self, host: &mut Host) {
        host.ssl_file = Some(host.hostname.clone());
        self.self_signed.lock().await.remove(&host.hostname);
        if let Some(expiry) = self.ssl.expiry_time(&host.hostname) {
            host.ssl_expiry = Some(expiry);
            self.cache.set(&host.hostname, expiry).await;
        }
    }

    /// Stamp a host that fell back to a self-signed certificate (spec.md
    /// §4.6: `ssl_file = hostname + ".selfsigned"`, recorded in the
    /// self-signed set, never cached for renewal purposes).
    async fn apply_self_signed(&self, host: &mut Host) {
        host.ssl_file = Some(format!("{}.selfsigned", host.hostname));
        self.self_signed.lock().await.insert(host.hostname.clone());
    }

    /// If the soonest known expiry has moved, wake the renewal scheduler so
    /// it recomputes its sleep against the new value (spec.md §4.6's final
    /// step).
    async fn maybe_wake_scheduler(&self) {
        let soonest = self.cache.soonest_expiry().await;
        let mut last = self.next_expiry.lock().await;
        if *last != soonest {
            *last = soonest;
            self.wake.notify_one();
        }
    }

    /// Long-lived renewal loop (spec.md §5/§4.6): sleeps until the earliest
    /// known expiry enters the renewal window, capped at `max_sleep_days`,
    /// reissues whatever is due, then sleeps again. Woken early by
    /// `wake_handle()` or by `shutdown`.
    pub async fn run_renewal_loop(&self, shutdown: Arc<Notify>) {
        loop {
            let sleep_for = self.next_sleep_duration().await;

            match sleep_for {
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.wake.notified() => {
                            info!("tls: renewal scheduler woken early");
                        }
                        _ = shutdown.notified() => return,
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {
                            info!("tls: renewal scheduler woken (new expiry known)");
                        }
                        _ = shutdown.notified() => return,
                    }
                }
            }

            metrics::counter!("ingressd_renewal_wakeups_total").increment(1);

            let due = self.cache.due_for_renewal(self.min_remaining_days).await;
            if !due.is_empty() {
                info!(domains = ?due, "tls: renewing certificates");
                self.ssl.register_certificate_or_self_sign(&due, true).await;
                for domain in &due {
                    if let Some(expiry) = self.ssl.expiry_time(domain) {
                        self.cache.set(domain, expiry).await;
                    }
                }
            }
        }
    }

    /// `None` means wait indefinitely (no known expiry yet — spec.md §4.6:
    /// "if next_ssl_expiry is null, wait until notified").
    async fn next_sleep_duration(&self) -> Option<Duration> {
        let max_sleep = Duration::from_secs((self.max_sleep_days.max(1) as u64) * 86_400);
        let soonest = self.cache.soonest_expiry().await?;

        let renewal_at = soonest - time::Duration::days(self.min_remaining_days);
        let until_renewal = renewal_at - OffsetDateTime::now_utc();
        Some(if until_renewal.is_negative() {
            Duration::from_secs(0)
        } else {
            std::cmp::min(max_sleep, Duration::from_secs(until_renewal.whole_seconds().max(0) as u64))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> SslProcessor {
        let dir = std::env::temp_dir().join(format!("ingressd-sslproc-test-{}", std::process::id()));
        let ssl = Arc::new(SslManager::new(&dir, dir.join("challenges"), "https://example".to_string(), None));
        SslProcessor::new(ssl, 6, 1)
    }

    #[tokio::test]
    async fn next_sleep_is_none_when_cache_is_empty() {
        let p = processor();
        assert_eq!(p.next_sleep_duration().await, None);
    }

    #[tokio::test]
    async fn due_for_renewal_empty_when_cache_has_no_entries() {
        let p = processor();
        assert!(p.cache.due_for_renewal(6).await.is_empty());
    }

    /// Scenario 6 (spec.md §8): a host whose HTTP-01 verification fails
    /// falls back to a self-signed certificate, named `<hostname>.selfsigned`
    /// and recorded as self-signed, with the `.selfsigned.{crt,key}` files
    /// present on disk.
    #[tokio::test]
    async fn ssl_fallback_self_signs_and_names_ssl_file_selfsigned() {
        use crate::model::{Container, ContainerId};
        use async_trait::async_trait;

        struct RejectAllVerifier;
        #[async_trait]
        impl crate::tls::acme::DomainVerifier for RejectAllVerifier {
            async fn verify(&self, _names: &[String]) -> Vec<String> {
                Vec::new()
            }
        }

        let dir = std::env::temp_dir().join(format!("ingressd-sslproc-fallback-test-{}", std::process::id()));
        let ssl = Arc::new(
            SslManager::new(&dir, dir.join("challenges"), "https://example".to_string(), None)
                .with_verifier(Arc::new(RejectAllVerifier)),
        );
        let processor = SslProcessor::new(ssl.clone(), 6, 32);

        let mut host = Host::new("notowned.example", 443, BTreeSet::from(["https".to_string()]));
        host.add_container(
            "/",
            Container::new(ContainerId::from("c1"), "http".into(), "10.0.0.2".into(), 8080, "/".into()),
            true,
            false,
        );

        let mut hosts = vec![host];
        processor.process_ssl_certificates(&mut hosts).await;

        assert_eq!(hosts[0].ssl_file.as_deref(), Some("notowned.example.selfsigned"));
        assert!(ssl.selfsigned_cert_file("notowned.example").exists());
        assert!(ssl.selfsigned_private_file("notowned.example").exists());
        assert!(processor.self_signed.lock().await.contains("notowned.example"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
