use std::collections::BTreeSet;

use super::*;
use crate::model::container::Container;

fn backend(id: &str, port: u16) -> Container {
    Container::new(id.into(), "http".into(), "10.0.0.2".into(), port, "/".into())
}

fn host_with_container(hostname: &str, port: u16, location: &str, c: Container) -> Host {
    let mut h = Host::new(hostname, port, BTreeSet::from(["http".to_string()]));
    h.add_container(location, c, true, false);
    h
}

#[test]
fn add_host_tracks_distinct_hostname_port_pairs() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/", backend("c1", 8080)));
    agg.add_host(host_with_container("b.com", 80, "/", backend("c2", 8080)));
    assert_eq!(agg.len(), 2);
}

#[test]
fn add_host_merges_same_hostname_port() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/one", backend("c1", 8080)));
    agg.add_host(host_with_container("a.com", 80, "/two", backend("c2", 8080)));

    assert_eq!(agg.len(), 1, "same (hostname, port) must merge, not duplicate");
    let host = agg.get("a.com", 80).unwrap();
    assert_eq!(host.locations.len(), 2);
    assert!(host.locations.contains_key("/one"));
    assert!(host.locations.contains_key("/two"));
}

#[test]
fn has_container_matches_location_membership() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/", backend("c1", 8080)));
    assert!(agg.has_container(&"c1".into()));
    assert!(!agg.has_container(&"c2".into()));
}

#[test]
fn remove_container_clears_index_and_references() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/", backend("c1", 8080)));

    let (changed, removed_domains) = agg.remove_container(&"c1".into());
    assert!(changed);
    assert!(removed_domains.contains(&("a.com".to_string(), 80)));
    assert!(!agg.has_container(&"c1".into()));
}

#[test]
fn remove_container_not_present_is_a_noop() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/", backend("c1", 8080)));
    let (changed, removed) = agg.remove_container(&"ghost".into());
    assert!(!changed);
    assert!(removed.is_empty());
}

// --- spec.md §8 scenarios ---

#[test]
fn scenario_single_http_backend() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("example.com", 80, "/", backend("c1", 8080)));

    let host = agg.get("example.com", 80).expect("host present");
    assert_eq!(host.locations.len(), 1);
    let loc = host.locations.get("/").unwrap();
    assert_eq!(loc.containers.len(), 1);
    let c = loc.containers.iter().next().unwrap();
    assert_eq!(c.address, "10.0.0.2");
    assert_eq!(c.port, 8080);
}

#[test]
fn scenario_external_to_internal_with_path() {
    let mut h = Host::new("app.example.com", 443, BTreeSet::from(["https".to_string()]));
    let c = Container::new("c1".into(), "http".into(), "10.0.0.5".into(), 3000, "/v1".into());
    h.add_container("/api", c, true, false);

    let mut agg = ProxyAggregate::new();
    agg.add_host(h);

    let host = agg.get("app.example.com", 443).unwrap();
    assert!(host.secured);
    assert!(host.ssl_redirect);
    let loc = host.locations.get("/api").unwrap();
    let c = loc.containers.iter().next().unwrap();
    assert_eq!(c.port, 3000);
    assert_eq!(c.path, "/v1");
}

#[test]
fn scenario_websocket_scheme_set() {
    let host = Host::new(
        "chat.example.com",
        80,
        BTreeSet::from(["ws".to_string(), "wss".to_string()]),
    );
    assert!(host.scheme.contains("ws"));
    assert!(host.scheme.contains("wss"));
    assert!(host.secured, "wss in scheme-set implies secured");
}

#[test]
fn scenario_merge_two_containers_two_locations() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/one", backend("c1", 8080)));
    agg.add_host(host_with_container("a.com", 80, "/two", backend("c2", 8080)));

    assert_eq!(agg.len(), 1);
    let host = agg.get("a.com", 80).unwrap();
    assert_eq!(host.locations.len(), 2);
}

#[test]
fn scenario_die_removes_one_location_keeps_other() {
    let mut agg = ProxyAggregate::new();
    agg.add_host(host_with_container("a.com", 80, "/one", backend("c1", 8080)));
    agg.add_host(host_with_container("a.com", 80, "/two", backend("c2", 8080)));

    agg.remove_container(&"c1".into());

    let host = agg.get("a.com", 80).unwrap();
    assert!(!host.locations.contains_key("/one"));
    assert!(host.locations.contains_key("/two"));
    assert!(!host.is_empty());
}
