use http::{HeaderMap, header};

use crate::error::PipelineError;

/// Returns the target domain encoded in `host`, or an empty string when `host`
/// is not a subdomain of `own_domain`.
///
/// `host` is expected to be lowercase and without a port.
pub fn resolve<'a>(host: &'a str, own_domain: &str) -> &'a str {
    host.strip_suffix(own_domain)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .map(|prefix| prefix.trim_matches('.'))
        .unwrap_or("")
}

/// Names the proxy answers under and the origin it forwards to, for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyHosts {
    /// Incoming authority as the client sent it (lowercase, port kept).
    pub authority: String,
    /// Incoming hostname without port.
    pub hostname: String,
    pub port: Option<u16>,
    pub target: String,
}

impl ProxyHosts {
    pub fn resolve(authority: &str, own_domain: &str) -> Result<Self, PipelineError> {
        let authority = authority.trim().trim_end_matches('.').to_ascii_lowercase();
        let (hostname, port) = split_port(&authority);
        let hostname = hostname.trim_end_matches('.').to_string();

        let target = resolve(&hostname, own_domain);
        if target.is_empty() || !is_hostname(target) {
            return Err(PipelineError::MissingTarget);
        }
        let target = target.to_string();

        Ok(Self {
            authority,
            hostname,
            port,
            target,
        })
    }
}

pub fn extract_host(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-host")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
    {
        return Some(forwarded.trim().to_ascii_lowercase());
    }

    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_ascii_lowercase())
}

pub fn normalize_host(value: &str) -> String {
    let (host, _) = split_port(&value.to_ascii_lowercase());
    host.trim_end_matches('.').to_string()
}

fn split_port(authority: &str) -> (String, Option<u16>) {
    if let Some(idx) = authority.rfind(':')
        && !authority[idx + 1..].is_empty()
        && authority[idx + 1..].chars().all(|c| c.is_ascii_digit())
    {
        return (authority[..idx].to_string(), authority[idx + 1..].parse().ok());
    }
    (authority.to_string(), None)
}

fn is_hostname(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !value.contains("..")
}
