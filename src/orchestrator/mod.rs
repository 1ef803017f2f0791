//! Container orchestrator client contract (spec.md §6: out of scope as a
//! concrete daemon integration, but the reactor needs *something* behind
//! this trait to drive events). `docker` below is the one binding this
//! crate ships; other orchestrators implement the same trait.

pub mod docker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ControllerError;
use crate::model::ContainerId;

/// One IP attachment of a container to a network, as seen by the
/// orchestrator at inspection time.
#[derive(Debug, Clone)]
pub struct NetworkAttachment {
    pub network_id: String,
    pub ip_address: String,
}

/// Everything the extractor (spec.md §4.2) needs out of a single
/// container: its env vars (for `VIRTUAL_HOST` et al.), its network
/// attachments (for reaching it), and its exposed ports (for the
/// no-explicit-port fallback).
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub env: BTreeMap<String, String>,
    pub networks: Vec<NetworkAttachment>,
    /// Ports the image declares as `EXPOSE`d. The extractor falls back to
    /// this when a `VIRTUAL_HOST` entry names no explicit internal port and
    /// the container exposes exactly one (spec.md §4.2).
    pub exposed_ports: Vec<u16>,
}

/// A single item off the orchestrator's event stream, already reduced to
/// the four cases the reactor (spec.md §4.7) cares about. Anything else
/// the daemon emits collapses into `Other` so the reactor can log and
/// ignore it without the stream ending.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    ContainerStart(ContainerId),
    ContainerDie(ContainerId),
    /// A container was attached to a network. `network_id` is the network's
    /// own id (the event actor); `container_id` comes from the daemon's
    /// `Actor.Attributes.container` field (spec.md §6).
    NetworkConnect { network_id: String, container_id: ContainerId },
    NetworkDisconnect { network_id: String, container_id: ContainerId },
    Other,
}

/// Abstraction over the container daemon. `docker::DockerOrchestrator` is
/// the only implementation this crate ships; the trait exists so the
/// reactor and its tests don't depend on a live daemon.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List every currently running container, already inspected.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, ControllerError>;

    /// Inspect one container by id.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerRecord, ControllerError>;

    /// Subscribe to the daemon's event stream. Each reconnect (spec.md §5's
    /// reconnect-with-backoff loop lives in the reactor, not here) calls
    /// this again to get a fresh stream.
    async fn events(&self) -> Result<BoxStream<'static, Result<OrchestratorEvent, ControllerError>>, ControllerError>;
}
