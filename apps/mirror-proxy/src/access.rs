use std::collections::HashSet;

use http::{HeaderMap, header::HeaderName};

use crate::{config::ProxyConfig, error::ConfigError};

/// Country allow-list checked before any proxying. The country code comes from
/// a header set by the edge in front of the proxy.
#[derive(Clone, Debug)]
pub struct CountryGate {
    header: HeaderName,
    allowed: HashSet<String>,
}

impl CountryGate {
    /// `None` when no allow-list is configured.
    pub fn from_config(config: &ProxyConfig) -> Result<Option<Self>, ConfigError> {
        let Some(allowed) = config.allowed_countries.clone() else {
            return Ok(None);
        };
        let header = HeaderName::from_bytes(config.country_header.as_bytes())
            .map_err(|_| ConfigError::InvalidCountryHeader(config.country_header.clone()))?;
        Ok(Some(Self { header, allowed }))
    }

    /// Requests without a country header are denied.
    pub fn permits(&self, headers: &HeaderMap) -> bool {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(|country| self.allowed.contains(&country.trim().to_ascii_uppercase()))
            .unwrap_or(false)
    }
}
