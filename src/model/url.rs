use std::collections::BTreeSet;

/// Parsed form of `[scheme[+scheme]*://]host[:port][/path]`.
///
/// No validation of scheme tokens happens here — downstream (the extractor)
/// decides which of `http`/`https`/`ws`/`wss` are meaningful; anything else
/// is kept but never acted on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitUrl {
    pub scheme: BTreeSet<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub location: Option<String>,
}

/// Split a single `VIRTUAL_HOST`-style URL fragment into its parts.
///
/// `scheme` is the empty set when no `scheme://` prefix is present — callers
/// apply their own default (the extractor defaults both sides to `{http}`).
pub fn split(raw: &str) -> SplitUrl {
    let mut rest = raw;

    let scheme = match rest.find("://") {
        Some(idx) => {
            let scheme_part = &rest[..idx];
            rest = &rest[idx + 3..];
            scheme_part
                .split('+')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect()
        }
        None => BTreeSet::new(),
    };

    let (host_port, location) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(rest[idx..].to_string())),
        None => (rest, None),
    };

    let (host, port) = match host_port.rfind(':') {
        // Guard against bare IPv6 literals without brackets; we only expect
        // `host:port`, so a lone trailing `:N` is the only case we split on.
        Some(idx) if host_port[idx + 1..].chars().all(|c| c.is_ascii_digit()) && !host_port[idx + 1..].is_empty() => {
            (&host_port[..idx], Some(host_port[idx + 1..].to_string()))
        }
        _ => (host_port, None),
    };

    let host = if host.is_empty() { None } else { Some(host.to_string()) };

    SplitUrl {
        scheme,
        host,
        port,
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host() {
        let u = split("example.com");
        assert!(u.scheme.is_empty());
        assert_eq!(u.host.as_deref(), Some("example.com"));
        assert_eq!(u.port, None);
        assert_eq!(u.location, None);
    }

    #[test]
    fn host_with_port_and_path() {
        let u = split("example.com:8080/api");
        assert_eq!(u.host.as_deref(), Some("example.com"));
        assert_eq!(u.port.as_deref(), Some("8080"));
        assert_eq!(u.location.as_deref(), Some("/api"));
    }

    #[test]
    fn single_scheme() {
        let u = split("https://app.example.com/api");
        assert_eq!(u.scheme, BTreeSet::from(["https".to_string()]));
        assert_eq!(u.host.as_deref(), Some("app.example.com"));
        assert_eq!(u.location.as_deref(), Some("/api"));
    }

    #[test]
    fn multi_scheme_plus_joined() {
        let u = split("ws+wss://chat.example.com");
        assert_eq!(
            u.scheme,
            BTreeSet::from(["ws".to_string(), "wss".to_string()])
        );
        assert_eq!(u.host.as_deref(), Some("chat.example.com"));
    }

    #[test]
    fn scheme_lowercased() {
        let u = split("HTTP+WS://example.com");
        assert_eq!(
            u.scheme,
            BTreeSet::from(["http".to_string(), "ws".to_string()])
        );
    }

    #[test]
    fn path_only_no_port() {
        let u = split("example.com/v1/users");
        assert_eq!(u.host.as_deref(), Some("example.com"));
        assert_eq!(u.port, None);
        assert_eq!(u.location.as_deref(), Some("/v1/users"));
    }

    #[test]
    fn empty_string_has_no_host() {
        let u = split("");
        assert_eq!(u.host, None);
    }

    #[test]
    fn port_without_scheme_or_path() {
        let u = split("backend:3000");
        assert_eq!(u.host.as_deref(), Some("backend"));
        assert_eq!(u.port.as_deref(), Some("3000"));
        assert_eq!(u.location, None);
    }

    #[test]
    fn unrecognized_scheme_token_is_kept_verbatim() {
        let u = split("grpc://svc.internal");
        assert_eq!(u.scheme, BTreeSet::from(["grpc".to_string()]));
    }
}
