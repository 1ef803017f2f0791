//! `Orchestrator` binding for a local Docker (or Docker-compatible) daemon
//! over `bollard`, mirroring how nginx-proxy's original talks to the
//! daemon: connect once at startup, list running containers to seed the
//! aggregate, then stream events for incremental updates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::error::ControllerError;
use crate::model::ContainerId;

use super::{ContainerRecord, NetworkAttachment, Orchestrator, OrchestratorEvent};

pub struct DockerOrchestrator {
    client: Docker,
}

impl DockerOrchestrator {
    /// Connect using `endpoint`: a `unix:///...` socket path, an
    /// `http(s)://`/`tcp://` URL, or empty for the platform default.
    pub fn connect(endpoint: &str) -> Result<Self, ControllerError> {
        let client = if endpoint.starts_with("unix://") {
            Docker::connect_with_unix(endpoint, 120, bollard::API_DEFAULT_VERSION)
        } else if endpoint.starts_with("http") || endpoint.starts_with("tcp://") {
            Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_local_defaults()
        }
        .map_err(|e| ControllerError::OrchestratorUnavailable(e.to_string()))?;

        Ok(Self { client })
    }

    fn translate(id: &str, inspect: bollard::models::ContainerInspectResponse) -> ContainerRecord {
        let env = inspect
            .config
            .as_ref()
            .and_then(|c| c.env.as_ref())
            .map(|vars| {
                vars.iter()
                    .filter_map(|kv| kv.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        let networks = inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.networks.as_ref())
            .map(|networks| {
                networks
                    .values()
                    .filter_map(|endpoint| {
                        let ip_address = endpoint.ip_address.clone().filter(|ip| !ip.is_empty())?;
                        Some(NetworkAttachment {
                            network_id: endpoint.network_id.clone().unwrap_or_default(),
                            ip_address,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let exposed_ports = inspect
            .config
            .as_ref()
            .and_then(|c| c.exposed_ports.as_ref())
            .map(|ports| {
                ports
                    .keys()
                    .filter_map(|spec| spec.split('/').next())
                    .filter_map(|p| p.parse::<u16>().ok())
                    .collect()
            })
            .unwrap_or_default();

        ContainerRecord {
            id: ContainerId::from(id),
            env,
            networks,
            exposed_ports,
        }
    }
}

#[async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, ControllerError> {
        let summaries = self
            .client
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| ControllerError::OrchestratorUnavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            out.push(self.inspect_container(&ContainerId::from(id)).await?);
        }
        Ok(out)
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerRecord, ControllerError> {
        let inspect = self
            .client
            .inspect_container(&id.0, None::<InspectContainerOptions>)
            .await
            .map_err(|e| ControllerError::OrchestratorUnavailable(e.to_string()))?;
        Ok(Self::translate(&id.0, inspect))
    }

    async fn events(&self) -> Result<BoxStream<'static, Result<OrchestratorEvent, ControllerError>>, ControllerError> {
        let stream = self
            .client
            .events(Some(EventsOptions::<String> {
                ..Default::default()
            }))
            .map(|item| {
                item.map(translate_event)
                    .map_err(|e| ControllerError::OrchestratorUnavailable(e.to_string()))
            });
        Ok(stream.boxed())
    }
}

fn translate_event(event: bollard::models::EventMessage) -> OrchestratorEvent {
    use bollard::models::EventMessageTypeEnum as Kind;

    let actor_id = event.actor.as_ref().and_then(|a| a.id.clone());
    let actor_container = event
        .actor
        .as_ref()
        .and_then(|a| a.attributes.as_ref())
        .and_then(|attrs| attrs.get("container"))
        .cloned()
        .map(ContainerId::from);

    let action = event.action.as_deref().unwrap_or_default();

    match (event.typ, actor_id.map(ContainerId::from), actor_container) {
        (Some(Kind::CONTAINER), Some(id), _) if action == "start" => OrchestratorEvent::ContainerStart(id),
        (Some(Kind::CONTAINER), Some(id), _) if action == "die" => OrchestratorEvent::ContainerDie(id),
        (Some(Kind::NETWORK), Some(network_id), Some(container_id)) if action == "connect" => {
            OrchestratorEvent::NetworkConnect { network_id: network_id.0, container_id }
        }
        (Some(Kind::NETWORK), Some(network_id), Some(container_id)) if action == "disconnect" => {
            OrchestratorEvent::NetworkDisconnect { network_id: network_id.0, container_id }
        }
        _ => OrchestratorEvent::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerInspectResponse, ContainerState, EndpointSettings, NetworkSettings};
    use std::collections::HashMap;

    #[test]
    fn translate_extracts_env_and_first_network() {
        let mut networks = HashMap::new();
        networks.insert(
            "bridge".to_string(),
            EndpointSettings {
                ip_address: Some("172.17.0.2".to_string()),
                network_id: Some("net1".to_string()),
                ..Default::default()
            },
        );

        let inspect = ContainerInspectResponse {
            state: Some(ContainerState::default()),
            config: Some(bollard::models::ContainerConfig {
                env: Some(vec!["VIRTUAL_HOST=example.com".to_string()]),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = DockerOrchestrator::translate("c1", inspect);
        assert_eq!(record.id, ContainerId::from("c1"));
        assert_eq!(record.env.get("VIRTUAL_HOST").map(String::as_str), Some("example.com"));
        assert_eq!(record.networks.len(), 1);
        assert_eq!(record.networks[0].ip_address, "172.17.0.2");
    }

    #[test]
    fn translate_skips_networks_without_an_address() {
        let mut networks = HashMap::new();
        networks.insert("none".to_string(), EndpointSettings::default());

        let inspect = ContainerInspectResponse {
            network_settings: Some(NetworkSettings {
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = DockerOrchestrator::translate("c1", inspect);
        assert!(record.networks.is_empty());
    }

    #[test]
    fn translate_event_network_connect_carries_both_ids() {
        let mut attrs = HashMap::new();
        attrs.insert("container".to_string(), "c1".to_string());

        let event = bollard::models::EventMessage {
            typ: Some(bollard::models::EventMessageTypeEnum::NETWORK),
            action: Some("connect".to_string()),
            actor: Some(bollard::models::EventActor {
                id: Some("net1".to_string()),
                attributes: Some(attrs),
            }),
            ..Default::default()
        };

        match translate_event(event) {
            OrchestratorEvent::NetworkConnect { network_id, container_id } => {
                assert_eq!(network_id, "net1");
                assert_eq!(container_id, ContainerId::from("c1"));
            }
            other => panic!("expected NetworkConnect, got {other:?}"),
        }
    }

    #[test]
    fn translate_event_container_die() {
        let event = bollard::models::EventMessage {
            typ: Some(bollard::models::EventMessageTypeEnum::CONTAINER),
            action: Some("die".to_string()),
            actor: Some(bollard::models::EventActor {
                id: Some("c1".to_string()),
                attributes: None,
            }),
            ..Default::default()
        };

        assert!(matches!(translate_event(event), OrchestratorEvent::ContainerDie(id) if id == ContainerId::from("c1")));
    }
}
