//! Event reactor (spec.md §4.7, "WebServer" in the original): owns the
//! aggregate exclusively, drives it from orchestrator events, and is the
//! only thing that calls `update_config` on the proxy driver.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::extractor::{self, ExtractedEntry};
use crate::model::{ContainerId, Host, ProxyAggregate};
use crate::orchestrator::{ContainerRecord, Orchestrator, OrchestratorEvent};
use crate::proxy::render;
use crate::proxy::ProxyDriver;
use crate::tls::SslProcessor;

/// Read-only per-host summary published after every successful reload, for
/// the admin server's `/hosts` endpoint (spec.md §C's replacement for the
/// original's stdout `print()` dump).
#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub hostname: String,
    pub port: u16,
    pub secured: bool,
    pub locations: usize,
    pub containers: usize,
}

/// How long to wait before reconnecting to a dropped orchestrator event
/// stream, and the cap that backoff grows to (spec.md §C: made explicit
/// here since this crate doesn't get the Python SDK's implicit retry).
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

pub struct Reactor {
    orchestrator: Arc<dyn Orchestrator>,
    driver: Arc<ProxyDriver>,
    ssl: Arc<SslProcessor>,
    config: ControllerConfig,
    aggregate: ProxyAggregate,
    known_networks: BTreeSet<String>,
    self_id: Option<ContainerId>,
    snapshot: Arc<ArcSwap<Vec<HostSnapshot>>>,
}

impl Reactor {
    /// Startup sequence (spec.md §4.7 steps 1-6). Step 7 (spawning the
    /// renewal task) is left to the caller, which owns the task handle.
    pub async fn bootstrap(
        config: ControllerConfig,
        orchestrator: Arc<dyn Orchestrator>,
        driver: Arc<ProxyDriver>,
        ssl: Arc<SslProcessor>,
    ) -> Result<Self, ControllerError> {
        if !driver.config_test().await {
            let default_cfg = render::render_default(&config.challenge_dir);
            if !driver.force_start(&default_cfg).await? {
                return Err(ControllerError::ProxyStartFailure(
                    "default configuration failed to start proxy".to_string(),
                ));
            }
        } else if !driver.start().await {
            return Err(ControllerError::ProxyStartFailure("proxy failed to start with existing configuration".to_string()));
        }

        driver.wait_ready().await;

        let mut reactor = Self {
            orchestrator,
            driver,
            ssl,
            config,
            aggregate: ProxyAggregate::new(),
            known_networks: BTreeSet::new(),
            self_id: None,
            snapshot: Arc::new(ArcSwap::from_pointee(Vec::new())),
        };

        reactor.learn_self().await;
        reactor.rescan_all().await;
        reactor.reload().await;

        Ok(reactor)
    }

    /// Handle cloneable outside the reactor (admin server's `/hosts`).
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<Vec<HostSnapshot>>> {
        self.snapshot.clone()
    }

    /// Learn this controller's own network attachments via `HOSTNAME`
    /// (spec.md §4.7 step 4). Falls back to a single default network when
    /// self-inspection isn't possible.
    async fn learn_self(&mut self) {
        let Some(hostname) = self.config.hostname.clone() else {
            warn!("reactor: no HOSTNAME configured, falling back to default network");
            self.known_networks.insert(self.config.fallback_network.clone());
            return;
        };

        let self_id = ContainerId::from(hostname.as_str());
        match self.orchestrator.inspect_container(&self_id).await {
            Ok(record) => {
                self.known_networks = record.networks.iter().map(|n| n.network_id.clone()).collect();
                self.self_id = Some(record.id);
                info!(networks = ?self.known_networks, "reactor: learned own network attachments");
            }
            Err(e) => {
                warn!(error = %e, "reactor: failed to inspect self, falling back to default network");
                self.known_networks.insert(self.config.fallback_network.clone());
                self.self_id = Some(self_id);
            }
        }
    }

    /// Re-extract and merge every currently running container (spec.md
    /// §4.7 step 5, also used on network connect/disconnect to self).
    async fn rescan_all(&mut self) {
        let records = match self.orchestrator.list_containers().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "reactor: failed to list containers during rescan");
                return;
            }
        };

        self.aggregate = ProxyAggregate::new();
        for record in records {
            self.merge_record(&record);
        }
    }

    /// Extract `record`'s `VIRTUAL_HOST*` entries and merge into the
    /// aggregate. Silently skips containers with no host configuration;
    /// logs anything else.
    fn merge_record(&mut self, record: &ContainerRecord) {
        match extractor::extract(record, &self.known_networks) {
            Ok(entries) => self.merge_entries(entries),
            Err(ControllerError::NoHostConfiguration) => {
                metrics::counter!("ingressd_extraction_errors_total", "kind" => "no_host_configuration").increment(1);
            }
            Err(e) => {
                metrics::counter!("ingressd_extraction_errors_total", "kind" => e.kind_label()).increment(1);
                debug!(container = %record.id, error = %e, "reactor: skipped container during extraction");
            }
        }
    }

    fn merge_entries(&mut self, entries: Vec<ExtractedEntry>) {
        for entry in entries {
            let is_websocket = entry.host.scheme.contains("ws") || entry.host.scheme.contains("wss");
            let is_http = entry.host.scheme.contains("http") || entry.host.scheme.contains("https") || !is_websocket;

            let mut host = entry.host;
            host.add_container(&entry.location, entry.container, is_http, is_websocket);
            if let Some(location) = host.locations.get_mut(&entry.location) {
                location.update_extras(entry.extras);
            }
            self.aggregate.add_host(host);
        }
    }

    /// Inspect and (re-)extract a single container by id (container start,
    /// and the non-self branches of network connect/disconnect).
    async fn ingest_container(&mut self, id: &ContainerId) -> Result<(), ControllerError> {
        let record = self.orchestrator.inspect_container(id).await?;
        match extractor::extract(&record, &self.known_networks) {
            Ok(entries) => {
                self.merge_entries(entries);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Annotate SSL state on a deep-copied snapshot of every host, render,
    /// and install — the only place `update_config` is called (spec.md
    /// §4.7, "reload" in the event table).
    async fn reload(&mut self) {
        let mut hosts: Vec<Host> = self.aggregate.host_list().cloned().collect();
        self.ssl.process_ssl_certificates(&mut hosts).await;

        let rendered = render::render(&hosts, &self.config.challenge_dir, &self.config.ssl_dir);

        match self.driver.update_config(rendered).await {
            Ok(true) => {
                metrics::counter!("ingressd_reloads_total", "outcome" => "applied").increment(1);
            }
            Ok(false) => {
                metrics::counter!("ingressd_reloads_total", "outcome" => "unchanged").increment(1);
            }
            Err(e) => {
                metrics::counter!("ingressd_reloads_total", "outcome" => "failed").increment(1);
                warn!(error = %e, "reactor: reload failed");
            }
        }

        metrics::gauge!("ingressd_hosts_total").set(hosts.iter().filter(|h| !h.is_empty()).count() as f64);
        metrics::gauge!("ingressd_containers_total").set(self.aggregate.container_count() as f64);

        let snapshot: Vec<HostSnapshot> = hosts
            .iter()
            .filter(|h| !h.is_empty())
            .map(|h| HostSnapshot {
                hostname: h.hostname.clone(),
                port: h.port,
                secured: h.secured,
                locations: h.locations.len(),
                containers: h.container_set.len(),
            })
            .collect();
        self.snapshot.store(Arc::new(snapshot));
    }

    fn is_self(&self, id: &ContainerId) -> bool {
        self.self_id.as_ref().is_some_and(|self_id| self_id == id)
    }

    async fn handle_event(&mut self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::ContainerStart(id) => {
                metrics::counter!("ingressd_orchestrator_events_total", "kind" => "container_start").increment(1);
                if !self.aggregate.has_container(&id) {
                    if let Err(e) = self.ingest_container(&id).await {
                        metrics::counter!("ingressd_extraction_errors_total", "kind" => e.kind_label()).increment(1);
                        debug!(container = %id, error = %e, "reactor: container start ignored");
                    }
                    self.reload().await;
                }
            }
            OrchestratorEvent::ContainerDie(id) => {
                metrics::counter!("ingressd_orchestrator_events_total", "kind" => "container_die").increment(1);
                let (changed, _removed_domains) = self.aggregate.remove_container(&id);
                if changed {
                    self.reload().await;
                }
            }
            OrchestratorEvent::NetworkConnect { network_id, container_id } => {
                metrics::counter!("ingressd_orchestrator_events_total", "kind" => "network_connect").increment(1);
                if self.is_self(&container_id) {
                    info!(network = %network_id, "reactor: self attached to new network");
                    self.known_networks.insert(network_id);
                    self.rescan_all().await;
                    self.reload().await;
                } else if self.known_networks.contains(&network_id) {
                    if let Err(e) = self.ingest_container(&container_id).await {
                        metrics::counter!("ingressd_extraction_errors_total", "kind" => e.kind_label()).increment(1);
                        debug!(container = %container_id, error = %e, "reactor: network connect ignored");
                    }
                    self.reload().await;
                }
            }
            OrchestratorEvent::NetworkDisconnect { network_id, container_id } => {
                metrics::counter!("ingressd_orchestrator_events_total", "kind" => "network_disconnect").increment(1);
                if self.is_self(&container_id) {
                    info!(network = %network_id, "reactor: self detached from network");
                    self.known_networks.remove(&network_id);
                    self.rescan_all().await;
                    self.reload().await;
                } else if self.aggregate.has_container(&container_id) && self.known_networks.contains(&network_id) {
                    if let Err(e) = self.ingest_container(&container_id).await {
                        metrics::counter!("ingressd_extraction_errors_total", "kind" => e.kind_label()).increment(1);
                        self.aggregate.remove_container(&container_id);
                    }
                    self.reload().await;
                }
            }
            OrchestratorEvent::Other => {}
        }
    }

    /// Main event loop (spec.md §4.7): processes orchestrator events
    /// serially, reconnecting with backoff if the stream drops, until
    /// `shutdown` is notified.
    pub async fn run(&mut self, shutdown: Arc<Notify>) {
        let mut backoff = RECONNECT_BASE_DELAY;

        loop {
            let mut events = match self.orchestrator.events().await {
                Ok(stream) => {
                    backoff = RECONNECT_BASE_DELAY;
                    stream
                }
                Err(e) => {
                    warn!(error = %e, delay = ?backoff, "reactor: failed to subscribe to orchestrator events, retrying");
                    metrics::counter!("ingressd_orchestrator_reconnects_total").increment(1);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.notified() => return,
                    }
                    backoff = (backoff * 2).min(RECONNECT_MAX_DELAY);
                    continue;
                }
            };

            loop {
                use futures_util::StreamExt;
                tokio::select! {
                    next = events.next() => {
                        match next {
                            Some(Ok(event)) => self.handle_event(event).await,
                            Some(Err(e)) => {
                                warn!(error = %e, "reactor: orchestrator event stream errored, reconnecting");
                                break;
                            }
                            None => {
                                warn!("reactor: orchestrator event stream ended, reconnecting");
                                break;
                            }
                        }
                    }
                    _ = shutdown.notified() => return,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_BASE_DELAY) => {}
                _ = shutdown.notified() => return,
            }
        }
    }
}
