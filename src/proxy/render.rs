//! Template renderer bridge (spec.md §4.7 step 6, out-of-scope template
//! engine called in): turns the aggregate into the text the proxy driver
//! writes to disk. The shape of the rendered config is this crate's own
//! choice — only the data handed to the template is specified.

use serde::Serialize;

use crate::model::Host;

const DEFAULT_TEMPLATE_SOURCE: &str = include_str!("../../templates/default.conf.jinja2");
const VHOSTS_TEMPLATE_SOURCE: &str = include_str!("../../templates/vhosts.conf.jinja2");

const DEFAULT_TEMPLATE_NAME: &str = "default.conf.jinja2";
const VHOSTS_TEMPLATE_NAME: &str = "vhosts.conf.jinja2";

#[derive(Debug, Serialize)]
struct ContainerView {
    scheme: String,
    address: String,
    port: u16,
    path: String,
}

#[derive(Debug, Serialize)]
struct LocationView {
    path: String,
    websocket: bool,
    backend: ContainerView,
}

#[derive(Debug, Serialize)]
struct HostView {
    hostname: String,
    port: u16,
    secured: bool,
    ssl_redirect: bool,
    ssl_cert_path: Option<String>,
    ssl_key_path: Option<String>,
    locations: Vec<LocationView>,
}

/// Reconstruct the cert/key paths `tls::acme::SslManager` writes to
/// (spec.md §4.5: `<ssl_dir>/certs/<name>.crt`, `<ssl_dir>/private/<name>.key`)
/// from `host.ssl_file`'s base name, without depending on `SslManager` itself.
fn ssl_paths(ssl_dir: &str, ssl_file: &str) -> (String, String) {
    let root = ssl_dir.trim_end_matches('/');
    (format!("{root}/certs/{ssl_file}.crt"), format!("{root}/private/{ssl_file}.key"))
}

/// Flatten one `Host`'s locations to a single backend container each,
/// warning when a location has more than one candidate (spec.md §33's
/// "flattened to one backend per location" — this crate has no
/// load-balancing Non-goal exception).
fn build_host_view(host: &Host, ssl_dir: &str) -> HostView {
    let mut locations: Vec<LocationView> = Vec::with_capacity(host.locations.len());
    for location in host.locations.values() {
        if location.is_empty() {
            continue;
        }
        if location.containers.len() > 1 {
            tracing::warn!(
                hostname = %host.hostname,
                path = %location.path,
                candidates = location.containers.len(),
                "render: multiple backends for one location, picking one deterministically"
            );
        }
        let Some(container) = location.containers.iter().next() else { continue };
        locations.push(LocationView {
            path: location.path.clone(),
            websocket: location.websocket,
            backend: ContainerView {
                scheme: container.scheme.clone(),
                address: container.address.clone(),
                port: container.port,
                path: container.path.clone(),
            },
        });
    }

    let (ssl_cert_path, ssl_key_path) = match host.ssl_file.as_deref() {
        Some(name) => {
            let (cert, key) = ssl_paths(ssl_dir, name);
            (Some(cert), Some(key))
        }
        None => (None, None),
    };

    HostView {
        hostname: host.hostname.clone(),
        port: host.port,
        secured: host.secured,
        ssl_redirect: host.ssl_redirect,
        ssl_cert_path,
        ssl_key_path,
        locations,
    }
}

fn environment() -> minijinja::Environment<'static> {
    let mut env = minijinja::Environment::new();
    env.add_template(DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE_SOURCE)
        .expect("embedded default template must parse");
    env.add_template(VHOSTS_TEMPLATE_NAME, VHOSTS_TEMPLATE_SOURCE)
        .expect("embedded vhosts template must parse");
    env
}

/// The minimal config installed at bootstrap (spec.md §4.7 step 2) when the
/// on-disk configuration is missing or fails `config_test` — just enough
/// for the proxy to come up and start serving ACME challenges.
pub fn render_default(challenge_dir: &str) -> String {
    let env = environment();
    let tmpl = env.get_template(DEFAULT_TEMPLATE_NAME).expect("template registered above");
    tmpl.render(minijinja::context! { challenge_dir => challenge_dir })
        .expect("embedded default template must render with only a challenge_dir")
}

/// Render the full configuration for every non-empty `Host` in `hosts`
/// (spec.md §4.3's note: an emptied Host stays in the aggregate but is
/// skipped here rather than eagerly pruned — the reactor hands this
/// function a deep-copied, SSL-annotated snapshot, not the live aggregate).
pub fn render(hosts: &[Host], challenge_dir: &str, ssl_dir: &str) -> String {
    let hosts: Vec<HostView> = hosts.iter().filter(|h| !h.is_empty()).map(|h| build_host_view(h, ssl_dir)).collect();

    let env = environment();
    let tmpl = env.get_template(VHOSTS_TEMPLATE_NAME).expect("template registered above");
    tmpl.render(minijinja::context! { hosts => hosts, challenge_dir => challenge_dir })
        .expect("embedded vhosts template must render with a well-formed HostView list")
}
