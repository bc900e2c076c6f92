use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use mirror_proxy::{
    ProxyConfig, SubstitutionMode,
    config::{DEFAULT_CONTENT_TYPES, DEFAULT_COUNTRY_HEADER, DEFAULT_MAX_BODY_BYTES, split_list},
    spawn_proxy,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mirror-proxy", version)]
#[command(about = "Reverse proxy that mirrors <target>.<own-domain> onto <target>")]
struct Options {
    /// Address the proxy listens on
    #[arg(long, env = "MIRROR_PROXY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Domain suffix stripped from incoming hosts to find the target
    #[arg(long, env = "MIRROR_PROXY_OWN_DOMAIN")]
    own_domain: String,

    /// Comma-separated content types whose bodies are rewritten
    #[arg(long, env = "MIRROR_PROXY_CONTENT_TYPES")]
    content_types: Option<String>,

    /// Upstream timeout in milliseconds
    #[arg(long, env = "MIRROR_PROXY_TIMEOUT_MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Comma-separated ISO country codes allowed to use the proxy
    #[arg(long, env = "MIRROR_PROXY_ALLOWED_COUNTRIES")]
    allowed_countries: Option<String>,

    /// Header carrying the client's country code
    #[arg(long, env = "MIRROR_PROXY_COUNTRY_HEADER", default_value = DEFAULT_COUNTRY_HEADER)]
    country_header: String,

    /// User-Agent sent to origins instead of the client's
    #[arg(long, env = "MIRROR_PROXY_USER_AGENT")]
    user_agent: Option<String>,

    /// Target-domain substitution: `global` or `scoped`
    #[arg(long, env = "MIRROR_PROXY_SUBSTITUTION", default_value = "global")]
    substitution: SubstitutionMode,

    /// Largest body, in bytes, buffered for rewriting
    #[arg(long, env = "MIRROR_PROXY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,
}

impl Options {
    fn into_config(self) -> ProxyConfig {
        let processable_content_types = match self.content_types.as_deref() {
            Some(list) => split_list(list),
            None => DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
        };
        ProxyConfig {
            bind_addr: self.bind,
            own_domain: self.own_domain,
            processable_content_types,
            timeout: Duration::from_millis(self.timeout_ms),
            allowed_countries: self
                .allowed_countries
                .as_deref()
                .map(|list| split_list(list).into_iter().collect()),
            country_header: self.country_header,
            user_agent: self.user_agent,
            substitution: self.substitution,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();
    let handle = match spawn_proxy(options.into_config()).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(%err, "failed to start mirror proxy");
            std::process::exit(1);
        }
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }
    info!("shutdown signal received");
    handle.shutdown().await;
}
