use crate::error::ValidateError;
use std::net::IpAddr;
use tokio::net::lookup_host;
use url::Url;

/// Host literals rejected before any DNS lookup happens.
const BLOCKED_HOST_LITERALS: &[&str] = &["localhost", "127.0.0.1", "::1"];

/// Port used purely to satisfy the resolver API; validation never connects.
const RESOLVE_PORT: u16 = 443;

/// Outcome of validating one caller-supplied repository URL.
#[derive(Debug, Clone)]
pub struct Validation {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Validation {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validates an untrusted repository URL against SSRF targets.
///
/// The host is resolved and every address it resolves to must be publicly
/// routable. A hostname that resolves to a mix of public and private
/// addresses is rejected outright — an attacker cannot average out the check
/// with split-horizon DNS. Resolution failure also rejects (fail closed).
///
/// Pure check: no connection is opened and nothing is cached. Must run
/// before any fetch or network-reachable execution that will use this host.
pub async fn validate(url: &str) -> Validation {
    let Some(host) = extract_host(url) else {
        return Validation::rejected("could not determine host");
    };

    if BLOCKED_HOST_LITERALS
        .iter()
        .any(|blocked| blocked.eq_ignore_ascii_case(&host))
    {
        return Validation::rejected(format!("host {host} is a blocked local literal"));
    }

    let addrs: Vec<IpAddr> = match lookup_host((host.as_str(), RESOLVE_PORT)).await {
        Ok(resolved) => resolved.map(|sock| sock.ip()).collect(),
        Err(e) => {
            return Validation::rejected(format!("DNS resolution failed for {host}: {e}"));
        }
    };

    if addrs.is_empty() {
        return Validation::rejected(format!("host {host} resolved to no addresses"));
    }

    for ip in addrs {
        if let Some(kind) = disallowed_kind(ip) {
            tracing::warn!(host = host.as_str(), %ip, kind, "rejected repository source");
            return Validation::rejected(format!("host {host} resolves to {kind} address {ip}"));
        }
    }

    Validation::allowed()
}

/// `validate` as a hard error, for callers on the fetch path.
pub async fn ensure_allowed(url: &str) -> Result<(), ValidateError> {
    let verdict = validate(url).await;
    if verdict.allowed {
        return Ok(());
    }
    match verdict.reason.as_deref() {
        Some("could not determine host") | None => Err(ValidateError::NoHost),
        Some(reason) if reason.starts_with("DNS resolution failed") => {
            Err(ValidateError::Resolution {
                host: extract_host(url).unwrap_or_default(),
                message: reason.to_string(),
            })
        }
        Some(reason) => Err(ValidateError::Disallowed {
            host: extract_host(url).unwrap_or_default(),
            reason: reason.to_string(),
        }),
    }
}

/// Pulls the target host out of a repository reference.
///
/// SCP-style `user@host:path` takes the substring between `@` and the first
/// following `:`. Anything parseable as an absolute URI contributes its
/// authority host. Other shapes yield `None`.
pub fn extract_host(raw: &str) -> Option<String> {
    if !raw.contains("://")
        && let Some(at) = raw.find('@')
    {
        let rest = &raw[at + 1..];
        if let Some(colon) = rest.find(':')
            && colon > 0
        {
            return Some(rest[..colon].to_string());
        }
    }

    let parsed = Url::parse(raw).ok()?;
    match parsed.host() {
        Some(url::Host::Domain(d)) => Some(d.to_string()),
        Some(url::Host::Ipv4(a)) => Some(a.to_string()),
        Some(url::Host::Ipv6(a)) => Some(a.to_string()),
        None => None,
    }
}

/// Names the blocked range an address falls in, or `None` if it is allowed.
fn disallowed_kind(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_loopback() {
                Some("loopback")
            } else if v4.is_private() {
                // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                Some("private")
            } else if v4.is_link_local() {
                // 169.254.0.0/16
                Some("link-local")
            } else {
                None
            }
        }
        IpAddr::V6(v6) => {
            // An IPv4-mapped address reaches the same endpoint a client
            // would dial as plain IPv4; classify the embedded address.
            if let Some(v4) = v6.to_ipv4_mapped() {
                return disallowed_kind(IpAddr::V4(v4));
            }
            if v6.is_loopback() {
                Some("loopback")
            } else if (v6.segments()[0] & 0xfe00) == 0xfc00 {
                // fc00::/7 unique-local
                Some("unique-local")
            } else {
                None
            }
        }
    }
}
