use std::collections::{BTreeMap, BTreeSet};

use crate::model::container::ContainerId;
use crate::model::host::Host;

/// Keyed collection of `Host`s plus an index of every container-id known to
/// it, per spec.md §4.3.
///
/// Invariants (enforced by construction, exercised in the tests below):
/// - a `Host` appears at most once per (hostname, port)
/// - every indexed container-id is referenced by at least one location
/// - `remove_container` prunes empty locations but does *not* delete an
///   emptied `Host` from the map — callers observe `removed_domains` and
///   skip those hosts when rendering (spec.md §9's documented ambiguity;
///   this implementation takes the "caller skips" branch, not eager pruning,
///   so that a `Host` whose containers all die and come back within one
///   reload cycle doesn't need to be reconstructed from scratch).
#[derive(Debug, Default)]
pub struct ProxyAggregate {
    config_map: BTreeMap<String, BTreeMap<u16, Host>>,
    containers: BTreeSet<ContainerId>,
}

impl ProxyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.config_map.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `host`, merging into an existing (hostname, port) entry per
    /// spec.md §3 if one exists.
    pub fn add_host(&mut self, host: Host) {
        for loc in host.locations.values() {
            for container in &loc.containers {
                self.containers.insert(container.id.clone());
            }
        }

        let port_map = self.config_map.entry(host.hostname.clone()).or_default();
        match port_map.get_mut(&host.port) {
            Some(existing) => existing.merge(host),
            None => {
                port_map.insert(host.port, host);
            }
        }
    }

    /// Remove `container_id` from the index and from every `Location` that
    /// references it, pruning locations left empty. Returns whether
    /// anything changed, plus the (hostname, port) pairs whose `Host` was
    /// left empty by this removal.
    pub fn remove_container(&mut self, container_id: &ContainerId) -> (bool, BTreeSet<(String, u16)>) {
        let mut removed_domains = BTreeSet::new();
        let mut changed = false;

        if !self.containers.remove(container_id) {
            return (false, removed_domains);
        }

        for (hostname, port_map) in self.config_map.iter_mut() {
            for (port, host) in port_map.iter_mut() {
                if host.remove_container(container_id) {
                    changed = true;
                    if host.is_empty() {
                        removed_domains.insert((hostname.clone(), *port));
                    }
                }
            }
        }

        (changed, removed_domains)
    }

    pub fn has_container(&self, container_id: &ContainerId) -> bool {
        self.containers.contains(container_id)
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// All `Host`s, any order — callers that render configuration should
    /// skip hosts with an empty location map (see struct docs).
    pub fn host_list(&self) -> impl Iterator<Item = &Host> {
        self.config_map.values().flat_map(|m| m.values())
    }

    pub fn host_list_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.config_map.values_mut().flat_map(|m| m.values_mut())
    }

    pub fn get(&self, hostname: &str, port: u16) -> Option<&Host> {
        self.config_map.get(hostname)?.get(&port)
    }
}

#[cfg(test)]
#[path = "aggregate_tests.rs"]
mod aggregate_tests;
