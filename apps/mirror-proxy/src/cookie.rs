use std::borrow::Cow;

use http::{HeaderMap, HeaderValue, header::SET_COOKIE};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::rewrite::DomainRewriter;

static DOMAIN_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(;\s*domain\s*=\s*)(\.?)([^;\s]+)").expect("valid cookie domain regex")
});

/// Rewrites the `Domain=` attribute of every `Set-Cookie` header. Each header
/// instance is one cookie and is rewritten whole, keeping its position.
pub fn rewrite_set_cookies(headers: &HeaderMap, rewriter: &DomainRewriter) -> HeaderMap {
    if !headers.contains_key(SET_COOKIE) {
        return headers.clone();
    }

    let mut out = headers.clone();
    out.remove(SET_COOKIE);
    for value in headers.get_all(SET_COOKIE) {
        let rewritten = value
            .to_str()
            .ok()
            .and_then(|cookie| HeaderValue::from_str(&rewrite_cookie(cookie, rewriter)).ok());
        out.append(SET_COOKIE, rewritten.unwrap_or_else(|| value.clone()));
    }
    out
}

pub fn rewrite_cookie<'c>(cookie: &'c str, rewriter: &DomainRewriter) -> Cow<'c, str> {
    DOMAIN_ATTR.replace_all(cookie, |caps: &Captures| {
        match rewriter.map_hostname(&caps[3]) {
            Some(domain) => format!("{}{}{}", &caps[1], &caps[2], domain),
            None => caps[0].to_string(),
        }
    })
}
