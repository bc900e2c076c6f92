use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex, RegexBuilder};

use crate::{config::SubstitutionMode, domain::ProxyHosts};

static HOSTNAME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9.\-]+").expect("valid hostname token regex"));

/// Maps target-domain references onto the proxy host. One instance per
/// request; every rewriter goes through it so they agree on the mode.
#[derive(Debug)]
pub struct DomainRewriter {
    target: String,
    authority: String,
    hostname: String,
    port: Option<u16>,
    mode: SubstitutionMode,
    literal: Regex,
}

impl DomainRewriter {
    pub fn new(hosts: &ProxyHosts, mode: SubstitutionMode) -> Result<Self, regex::Error> {
        let literal = RegexBuilder::new(&regex::escape(&hosts.target))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            target: hosts.target.clone(),
            authority: hosts.authority.clone(),
            hostname: hosts.hostname.clone(),
            port: hosts.port,
            mode,
            literal,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn proxy_port(&self) -> Option<u16> {
        self.port
    }

    /// Replaces target-domain occurrences in decoded body text with the proxy
    /// authority.
    pub fn rewrite_text<'t>(&self, text: &'t str) -> Cow<'t, str> {
        match self.mode {
            SubstitutionMode::Global => self.literal.replace_all(text, NoExpand(&self.authority)),
            SubstitutionMode::Scoped => HOSTNAME_TOKEN.replace_all(text, |caps: &Captures| {
                let token = &caps[0];
                let core = token.trim_matches('.');
                if core.eq_ignore_ascii_case(&self.target) {
                    let lead = &token[..token.len() - token.trim_start_matches('.').len()];
                    let trail = &token[token.trim_end_matches('.').len()..];
                    format!("{lead}{}{trail}", self.authority)
                } else {
                    token.to_string()
                }
            }),
        }
    }

    /// Proxy-side hostname for `host`, or `None` when `host` does not belong to
    /// the target.
    pub fn map_hostname(&self, host: &str) -> Option<String> {
        let host = host.trim_end_matches('.');
        if host.eq_ignore_ascii_case(&self.target) {
            return Some(self.hostname.clone());
        }
        if self.mode == SubstitutionMode::Global
            && host.len() > self.target.len()
            && host.is_char_boundary(host.len() - self.target.len())
        {
            let split = host.len() - self.target.len();
            let (prefix, suffix) = host.split_at(split);
            if prefix.ends_with('.') && suffix.eq_ignore_ascii_case(&self.target) {
                return Some(format!("{prefix}{}", self.hostname));
            }
        }
        None
    }
}
