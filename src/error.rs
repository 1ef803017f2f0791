use std::fmt;

/// Error kinds per the reactor's failure taxonomy.
///
/// Only `ProxyStartFailure` and `OrchestratorUnavailable` are ever fatal
/// (at startup). Everything else is logged and the offending container,
/// domain, or event is skipped — see each call site.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ControllerError {
    NoHostConfiguration,
    UnreachableNetwork,
    ProxyConfigTestFailure(String),
    ProxyStartFailure(String),
    Acme(String),
    DomainNotOwned(String),
    OrchestratorUnavailable(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::NoHostConfiguration => write!(f, "container has no VIRTUAL_HOST annotation"),
            ControllerError::UnreachableNetwork => write!(f, "container shares no known network with the controller"),
            ControllerError::ProxyConfigTestFailure(msg) => write!(f, "nginx config test failed: {msg}"),
            ControllerError::ProxyStartFailure(msg) => write!(f, "nginx failed to start: {msg}"),
            ControllerError::Acme(msg) => write!(f, "acme error: {msg}"),
            ControllerError::DomainNotOwned(domain) => write!(f, "domain ownership check failed: {domain}"),
            ControllerError::OrchestratorUnavailable(msg) => write!(f, "orchestrator unavailable: {msg}"),
            ControllerError::Config(msg) => write!(f, "config error: {msg}"),
            ControllerError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ControllerError {}

impl ControllerError {
    /// Short, metric-label-safe name for this error kind (spec.md §7's
    /// error taxonomy, used to label `ingressd_extraction_errors_total`).
    pub fn kind_label(&self) -> &'static str {
        match self {
            ControllerError::NoHostConfiguration => "no_host_configuration",
            ControllerError::UnreachableNetwork => "unreachable_network",
            ControllerError::ProxyConfigTestFailure(_) => "proxy_config_test_failure",
            ControllerError::ProxyStartFailure(_) => "proxy_start_failure",
            ControllerError::Acme(_) => "acme",
            ControllerError::DomainNotOwned(_) => "domain_not_owned",
            ControllerError::OrchestratorUnavailable(_) => "orchestrator_unavailable",
            ControllerError::Config(_) => "config",
            ControllerError::Internal(_) => "internal",
        }
    }
}
