use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`)
/// can be used anywhere in the codebase. The `PrometheusHandle` is retained
/// solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        describe_gauge!(
            "ingressd_hosts_total",
            Unit::Count,
            "Number of (hostname, port) hosts currently in the aggregate"
        );
        describe_gauge!(
            "ingressd_containers_total",
            Unit::Count,
            "Number of backend containers currently indexed"
        );

        describe_counter!(
            "ingressd_reloads_total",
            Unit::Count,
            "Total proxy reload attempts, labeled by outcome (applied, unchanged, failed)"
        );
        describe_counter!(
            "ingressd_orchestrator_events_total",
            Unit::Count,
            "Total orchestrator events processed, labeled by kind"
        );
        describe_counter!(
            "ingressd_orchestrator_reconnects_total",
            Unit::Count,
            "Total reconnect attempts to the orchestrator event stream"
        );
        describe_counter!(
            "ingressd_extraction_errors_total",
            Unit::Count,
            "Total containers skipped during extraction, labeled by error kind"
        );

        describe_counter!(
            "ingressd_certificates_issued_total",
            Unit::Count,
            "Total domains that obtained an ACME certificate"
        );
        describe_counter!(
            "ingressd_certificates_selfsigned_total",
            Unit::Count,
            "Total domains that fell back to a self-signed certificate"
        );
        describe_counter!(
            "ingressd_renewal_wakeups_total",
            Unit::Count,
            "Total times the renewal scheduler woke up to check for due certificates"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
