//! Virtual-host extractor (spec.md §4.2): turns one inspected container's
//! `VIRTUAL_HOST*` env vars into zero or more `(Host, location, Container,
//! extras)` tuples that the caller folds into a `ProxyAggregate`.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ControllerError;
use crate::model::location::ExtraValue;
use crate::model::url::{self, SplitUrl};
use crate::model::{Container, Host};
use crate::orchestrator::ContainerRecord;

/// One extracted routing entry: the `Host` it belongs to (still unmerged —
/// the caller folds it into the aggregate), the path under that host, the
/// backend `Container`, and any `;`-separated extras tokens to attach to
/// that location.
pub struct ExtractedEntry {
    pub host: Host,
    pub location: String,
    pub container: Container,
    pub extras: BTreeMap<String, ExtraValue>,
}

/// Extract every `VIRTUAL_HOST*` entry declared on `record`.
///
/// `known_networks` is the set of network ids the proxy itself is attached
/// to — a container reachable only through a network the proxy isn't on
/// can't be routed to, which is `UnreachableNetwork` per spec.md §7.
///
/// Returns `Err(NoHostConfiguration)` if the container declares no
/// `VIRTUAL_HOST*` variable at all; callers treat that as "skip this
/// container", not a hard failure.
pub fn extract(record: &ContainerRecord, known_networks: &BTreeSet<String>) -> Result<Vec<ExtractedEntry>, ControllerError> {
    let virtual_hosts: Vec<&str> = record
        .env
        .iter()
        .filter(|(k, _)| k.starts_with("VIRTUAL_HOST"))
        .map(|(_, v)| v.as_str())
        .collect();

    if virtual_hosts.is_empty() {
        return Err(ControllerError::NoHostConfiguration);
    }

    let ip_address = record
        .networks
        .iter()
        .find(|net| known_networks.contains(&net.network_id) && !net.ip_address.is_empty())
        .map(|net| net.ip_address.clone())
        .ok_or(ControllerError::UnreachableNetwork)?;

    let fallback_port = match record.exposed_ports.as_slice() {
        [single] => *single,
        _ => 80,
    };

    let networks: BTreeSet<String> = record.networks.iter().map(|n| n.network_id.clone()).collect();

    let mut out = Vec::with_capacity(virtual_hosts.len());
    for entry in virtual_hosts {
        out.push(parse_entry(entry, &record.id.0, &ip_address, fallback_port, &networks)?);
    }
    Ok(out)
}

fn parse_entry(entry: &str, container_id: &str, ip_address: &str, fallback_port: u16, networks: &BTreeSet<String>) -> Result<ExtractedEntry, ControllerError> {
    let (primary, extras_tokens) = split_extras(entry);

    let sides: Vec<&str> = primary.splitn(2, "->").collect();
    let (external_raw, internal_raw) = match sides.as_slice() {
        [external, internal] => (*external, *internal),
        [external] => (*external, ""),
        _ => unreachable!("splitn(2, ..) yields at most 2 parts"),
    };

    let external = url::split(external_raw.trim());
    let internal = url::split(internal_raw.trim());

    let internal_port = internal
        .port
        .as_deref()
        .map(|p| p.parse::<u16>())
        .transpose()
        .map_err(|_| ControllerError::Config(format!("invalid internal port in VIRTUAL_HOST entry {entry:?}")))?
        .unwrap_or(fallback_port);

    let mut container = Container::new(
        container_id.into(),
        internal.scheme.iter().next().cloned().unwrap_or_else(|| "http".to_string()),
        internal.host.unwrap_or_else(|| ip_address.to_string()),
        internal_port,
        internal.location.unwrap_or_else(|| "/".to_string()),
    );
    if container.address.is_empty() {
        container.address = ip_address.to_string();
    }
    container.networks = networks.clone();

    let hostname = external
        .host
        .ok_or_else(|| ControllerError::Config(format!("VIRTUAL_HOST entry {entry:?} has no hostname")))?;
    let port: u16 = external
        .port
        .as_deref()
        .map(|p| p.parse::<u16>())
        .transpose()
        .map_err(|_| ControllerError::Config(format!("invalid external port in VIRTUAL_HOST entry {entry:?}")))?
        .unwrap_or(80);
    let scheme = if external.scheme.is_empty() {
        BTreeSet::from(["http".to_string()])
    } else {
        external.scheme
    };

    let host = Host::new(hostname, port, scheme);
    let location = external.location.unwrap_or_else(|| "/".to_string());

    let mut extras = BTreeMap::new();
    if !extras_tokens.is_empty() {
        extras.insert("injected".to_string(), ExtraValue::Set(extras_tokens));
    }

    Ok(ExtractedEntry { host, location, container, extras })
}

/// Split `entry_string;extra;extra` into `(entry_string, {extra, extra})`.
fn split_extras(entry: &str) -> (&str, BTreeSet<String>) {
    match entry.split_once(';') {
        None => (entry, BTreeSet::new()),
        Some((primary, rest)) => {
            let tokens = rest
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            (primary, tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerId;
    use crate::orchestrator::NetworkAttachment;
    use std::collections::BTreeMap;

    fn record(env: &[(&str, &str)], network_id: &str, ip: &str) -> ContainerRecord {
        record_with_ports(env, network_id, ip, &[])
    }

    fn record_with_ports(env: &[(&str, &str)], network_id: &str, ip: &str, exposed_ports: &[u16]) -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::from("c1"),
            env: env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>(),
            networks: vec![NetworkAttachment {
                network_id: network_id.to_string(),
                ip_address: ip.to_string(),
            }],
            exposed_ports: exposed_ports.to_vec(),
        }
    }

    #[test]
    fn no_virtual_host_is_an_error() {
        let r = record(&[("PATH", "/usr/bin")], "net1", "10.0.0.2");
        let known = BTreeSet::from(["net1".to_string()]);
        assert!(matches!(extract(&r, &known), Err(ControllerError::NoHostConfiguration)));
    }

    #[test]
    fn unreachable_network_is_an_error() {
        let r = record(&[("VIRTUAL_HOST", "example.com")], "net1", "10.0.0.2");
        let known = BTreeSet::from(["other-net".to_string()]);
        assert!(matches!(extract(&r, &known), Err(ControllerError::UnreachableNetwork)));
    }

    #[test]
    fn known_network_with_empty_address_is_skipped_for_a_later_one() {
        let mut r = record(&[("VIRTUAL_HOST", "example.com")], "net1", "");
        r.networks.push(NetworkAttachment {
            network_id: "net2".to_string(),
            ip_address: "10.0.0.9".to_string(),
        });
        let known = BTreeSet::from(["net1".to_string(), "net2".to_string()]);
        let entries = extract(&r, &known).unwrap();
        assert_eq!(entries[0].container.address, "10.0.0.9");
    }

    #[test]
    fn bare_hostname_defaults_to_http_port_80_root_location() {
        let r = record(&[("VIRTUAL_HOST", "example.com")], "net1", "10.0.0.2");
        let known = BTreeSet::from(["net1".to_string()]);
        let entries = extract(&r, &known).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.host.hostname, "example.com");
        assert_eq!(e.host.port, 80);
        assert_eq!(e.location, "/");
        assert_eq!(e.container.address, "10.0.0.2");
        assert_eq!(e.container.port, 80);
        assert!(e.container.networks.contains("net1"));
    }

    #[test]
    fn external_to_internal_mapping_sets_backend_port_and_path() {
        let r = record(
            &[("VIRTUAL_HOST", "https://app.example.com/api->http://backend:3000/v1")],
            "net1",
            "10.0.0.5",
        );
        let known = BTreeSet::from(["net1".to_string()]);
        let entries = extract(&r, &known).unwrap();
        let e = &entries[0];
        assert!(e.host.secured);
        assert_eq!(e.host.port, 443);
        assert_eq!(e.location, "/api");
        assert_eq!(e.container.port, 3000);
        assert_eq!(e.container.path, "/v1");
    }

    #[test]
    fn multiple_virtual_host_keys_each_produce_an_entry() {
        let r = record(
            &[
                ("VIRTUAL_HOST", "a.example.com"),
                ("VIRTUAL_HOST_2", "b.example.com"),
            ],
            "net1",
            "10.0.0.2",
        );
        let known = BTreeSet::from(["net1".to_string()]);
        let entries = extract(&r, &known).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn single_exposed_port_is_used_when_entry_names_none() {
        let r = record_with_ports(&[("VIRTUAL_HOST", "example.com")], "net1", "10.0.0.2", &[9090]);
        let known = BTreeSet::from(["net1".to_string()]);
        let entries = extract(&r, &known).unwrap();
        assert_eq!(entries[0].container.port, 9090);
    }

    #[test]
    fn ambiguous_exposed_ports_fall_back_to_80() {
        let r = record_with_ports(&[("VIRTUAL_HOST", "example.com")], "net1", "10.0.0.2", &[9090, 9091]);
        let known = BTreeSet::from(["net1".to_string()]);
        let entries = extract(&r, &known).unwrap();
        assert_eq!(entries[0].container.port, 80);
    }

    #[test]
    fn extras_after_semicolon_are_not_part_of_the_url() {
        let r = record(&[("VIRTUAL_HOST", "example.com;proxy_cache off;")], "net1", "10.0.0.2");
        let known = BTreeSet::from(["net1".to_string()]);
        let entries = extract(&r, &known).unwrap();
        assert_eq!(entries[0].host.hostname, "example.com");
    }
}
