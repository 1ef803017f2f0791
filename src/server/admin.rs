use super::ControllerState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::Serialize;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

#[derive(Serialize)]
struct HostsResponse<'a> {
    generated_at: String,
    hosts: &'a [crate::reactor::HostSnapshot],
}

pub fn handle_admin(req: Request<Incoming>, state: ControllerState) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder().status(200).body(full_body(r#"{"status":"ok"}"#)).unwrap()),

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        "/hosts" => {
            let hosts = state.hosts.load();
            let response = HostsResponse {
                generated_at: humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string(),
                hosts: &hosts,
            };
            let body = serde_json::to_string_pretty(&response).unwrap_or_default();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder().status(404).body(full_body(r#"{"error":"not found"}"#)).unwrap()),
    }
}
