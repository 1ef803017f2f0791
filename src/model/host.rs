use std::collections::{BTreeMap, BTreeSet};

use crate::model::container::{Container, ContainerId};
use crate::model::location::Location;

/// A (hostname, port) keyed server-block analogue.
///
/// `secured` uses port == 443 as a sufficient condition in addition to the
/// scheme set containing `https`/`wss` — spec.md §3/§9 preserves this from
/// the original even though it conflates a port choice with the TLS
/// decision; documented here rather than "fixed" since the invariant in
/// spec.md §8 (secured + port in {80,443} => port=443, ssl_redirect=true)
/// depends on it.
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    pub port: u16,
    pub scheme: BTreeSet<String>,
    pub secured: bool,
    pub ssl_file: Option<String>,
    pub ssl_redirect: bool,
    pub ssl_expiry: Option<time::OffsetDateTime>,
    pub locations: BTreeMap<String, Location>,
    pub container_set: BTreeSet<ContainerId>,
}

impl Host {
    pub fn new(hostname: impl Into<String>, port: u16, scheme: BTreeSet<String>) -> Self {
        let secured = scheme.contains("https") || scheme.contains("wss") || port == 443;
        let mut host = Self {
            hostname: hostname.into(),
            port,
            scheme,
            secured,
            ssl_file: None,
            ssl_redirect: false,
            ssl_expiry: None,
            locations: BTreeMap::new(),
            container_set: BTreeSet::new(),
        };
        host.normalize_secured_port();
        host
    }

    /// `secured = true` forces port normalization (spec.md §3): a declared
    /// port of 80 or 443 is rewritten to 443 with `ssl_redirect` set. Any
    /// other declared port (e.g. an explicit 8443) is left alone.
    fn normalize_secured_port(&mut self) {
        if self.secured && (self.port == 80 || self.port == 443) {
            self.port = 443;
            self.ssl_redirect = true;
        }
    }

    pub fn add_container(&mut self, location: &str, container: Container, http: bool, websocket: bool) {
        let loc = self
            .locations
            .entry(location.to_string())
            .or_insert_with(|| Location::new(location));
        loc.http = loc.http || http;
        loc.websocket = loc.websocket || websocket;
        self.container_set.insert(container.id.clone());
        loc.add(container);
    }

    /// Remove `container_id` from every location, dropping any location that
    /// becomes empty as a result. Returns `true` iff the container was
    /// referenced by at least one location.
    pub fn remove_container(&mut self, container_id: &ContainerId) -> bool {
        if !self.container_set.contains(container_id) {
            return false;
        }

        let mut removed = false;
        self.locations.retain(|_, loc| {
            removed = loc.remove(container_id) || removed;
            !loc.is_empty()
        });

        if removed {
            self.container_set.remove(container_id);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.container_set.is_empty()
    }

    /// Merge `other` into `self` per spec.md §3: scheme-sets union,
    /// `secured` ORs, per-location container sets union, extras deep-merge.
    pub fn merge(&mut self, other: Host) {
        self.scheme.extend(other.scheme);
        self.secured = self.secured || other.secured;
        self.normalize_secured_port();

        for (path, location) in other.locations {
            for container in location.containers {
                self.container_set.insert(container.id.clone());
                self.add_container(&path, container, location.http, location.websocket);
            }
            if let Some(existing) = self.locations.get_mut(&path) {
                existing.update_extras(location.extras);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::container::ContainerId;

    fn container(id: &str) -> Container {
        Container::new(ContainerId::from(id), "http".into(), "10.0.0.2".into(), 8080, "/".into())
    }

    #[test]
    fn secured_port_80_normalizes_to_443() {
        let host = Host::new("example.com", 80, BTreeSet::from(["https".to_string()]));
        assert_eq!(host.port, 443);
        assert!(host.ssl_redirect);
        assert!(host.secured);
    }

    #[test]
    fn secured_via_port_443_alone() {
        let host = Host::new("example.com", 443, BTreeSet::from(["http".to_string()]));
        assert!(host.secured);
        assert!(host.ssl_redirect);
    }

    #[test]
    fn unsecured_keeps_declared_port() {
        let host = Host::new("example.com", 8080, BTreeSet::from(["http".to_string()]));
        assert!(!host.secured);
        assert_eq!(host.port, 8080);
        assert!(!host.ssl_redirect);
    }

    #[test]
    fn remove_container_prunes_empty_location_but_keeps_host() {
        let mut host = Host::new("a.com", 80, BTreeSet::from(["http".to_string()]));
        host.add_container("/one", container("c1"), true, false);
        host.add_container("/two", container("c2"), true, false);

        assert!(host.remove_container(&ContainerId::from("c1")));
        assert!(!host.locations.contains_key("/one"));
        assert!(host.locations.contains_key("/two"));
        assert!(!host.is_empty());
    }

    #[test]
    fn removing_last_container_empties_host_without_deleting_it() {
        let mut host = Host::new("a.com", 80, BTreeSet::from(["http".to_string()]));
        host.add_container("/", container("c1"), true, false);
        assert!(host.remove_container(&ContainerId::from("c1")));
        assert!(host.is_empty());
        assert!(host.locations.is_empty());
    }

    #[test]
    fn merge_unions_scheme_and_ors_secured() {
        let mut a = Host::new("a.com", 80, BTreeSet::from(["http".to_string()]));
        let b = Host::new("a.com", 443, BTreeSet::from(["https".to_string()]));
        a.merge(b);
        assert!(a.secured);
        assert!(a.scheme.contains("https"));
        assert!(a.scheme.contains("http"));
    }
}
