use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::ControllerConfig;
use crate::metrics::Metrics;
use crate::reactor::HostSnapshot;

/// State shared with the admin server. The reactor itself (and the
/// aggregate it owns) is never reachable from here — only the read-only
/// snapshot it publishes after each reload (spec.md §5's "aggregate:
/// exclusively owned by the reactor thread").
#[derive(Clone)]
pub struct ControllerState {
    pub config: Arc<ControllerConfig>,
    pub metrics: Metrics,
    pub hosts: Arc<ArcSwap<Vec<HostSnapshot>>>,
}

impl ControllerState {
    pub fn new(config: ControllerConfig, metrics: Metrics, hosts: Arc<ArcSwap<Vec<HostSnapshot>>>) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            hosts,
        }
    }
}
