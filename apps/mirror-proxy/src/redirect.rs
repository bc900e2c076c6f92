use http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION};
use tracing::debug;
use url::Url;

use crate::rewrite::DomainRewriter;

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Points a redirect back through the proxy. Returns the headers unchanged for
/// non-redirect statuses, a missing or unparseable `Location`, and redirects
/// leaving the target domain; the latter are forwarded verbatim.
pub fn rewrite_location(
    status: StatusCode,
    headers: &HeaderMap,
    upstream_url: &Url,
    rewriter: &DomainRewriter,
) -> HeaderMap {
    let mut out = headers.clone();
    if !is_redirect(status) {
        return out;
    }
    let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return out;
    };

    if let Some(rewritten) = rewrite_location_value(location, upstream_url, rewriter)
        && let Ok(value) = HeaderValue::from_str(&rewritten)
    {
        out.insert(LOCATION, value);
    }
    out
}

pub fn rewrite_location_value(
    location: &str,
    upstream_url: &Url,
    rewriter: &DomainRewriter,
) -> Option<String> {
    let mut resolved = upstream_url.join(location.trim()).ok()?;
    let host = resolved.host_str()?.to_ascii_lowercase();

    let Some(proxy_host) = rewriter.map_hostname(&host) else {
        debug!(%location, target = rewriter.target(), "cross-origin redirect passed through");
        return None;
    };

    resolved.set_host(Some(&proxy_host)).ok()?;
    resolved.set_port(rewriter.proxy_port()).ok()?;
    Some(resolved.to_string())
}
