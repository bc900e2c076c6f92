use std::{collections::HashSet, net::SocketAddr, time::Duration};

use http::{HeaderValue, header::HeaderName};

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_COUNTRY_HEADER: &str = "cf-ipcountry";

pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/css",
    "application/javascript",
    "application/x-javascript",
    "text/javascript",
    "application/json",
];

/// How occurrences of the target domain are located in text, redirects and
/// cookie domains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubstitutionMode {
    /// Every literal occurrence, case-insensitive. Subdomains of the target
    /// become subdomains of the proxy host.
    #[default]
    Global,
    /// Only whole hostname tokens equal to the target.
    Scoped,
}

impl std::str::FromStr for SubstitutionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "scoped" | "main-domain" => Ok(Self::Scoped),
            other => Err(format!("unknown substitution mode: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    pub own_domain: String,
    pub processable_content_types: Vec<String>,
    pub timeout: Duration,
    pub allowed_countries: Option<HashSet<String>>,
    pub country_header: String,
    pub user_agent: Option<String>,
    pub substitution: SubstitutionMode,
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            own_domain: "b.com".to_string(),
            processable_content_types: DEFAULT_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: DEFAULT_TIMEOUT,
            allowed_countries: None,
            country_header: DEFAULT_COUNTRY_HEADER.to_string(),
            user_agent: None,
            substitution: SubstitutionMode::Global,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ProxyConfig {
    /// Normalises the configuration and rejects values the pipeline cannot
    /// work with.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.own_domain = self
            .own_domain
            .trim()
            .trim_matches('.')
            .to_ascii_lowercase();
        if self.own_domain.is_empty() {
            return Err(ConfigError::EmptyOwnDomain);
        }

        self.processable_content_types = self
            .processable_content_types
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if self.processable_content_types.is_empty() {
            return Err(ConfigError::NoContentTypes);
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        self.country_header = self.country_header.trim().to_ascii_lowercase();
        if HeaderName::from_bytes(self.country_header.as_bytes()).is_err() {
            return Err(ConfigError::InvalidCountryHeader(self.country_header));
        }

        self.allowed_countries = self.allowed_countries.take().map(|countries| {
            countries
                .iter()
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect()
        });

        if let Some(agent) = self.user_agent.as_deref()
            && HeaderValue::from_str(agent).is_err()
        {
            return Err(ConfigError::InvalidUserAgent(agent.to_string()));
        }

        Ok(self)
    }
}

/// Splits a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
