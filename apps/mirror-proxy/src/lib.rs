use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use chrono::Utc;
use futures_util::FutureExt;
use http::{Request, Response, StatusCode, header};
use hyper::{
    Body,
    server::conn::AddrStream,
    service::{make_service_fn, service_fn},
};
use serde_json::{Value, json};
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};

pub mod access;
pub mod body;
pub mod config;
pub mod cookie;
pub mod domain;
pub mod error;
pub mod headers;
pub mod redirect;
pub mod request;
pub mod rewrite;
pub mod transport;

pub use config::{ProxyConfig, SubstitutionMode};
pub use error::{ConfigError, PipelineError, ProxyError, TransportError};
pub use transport::{HyperTransport, Transport};

use access::CountryGate;
use domain::ProxyHosts;
use error::text_response;
use headers::finalize_response;
use request::OutboundRequest;
use rewrite::DomainRewriter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /";

pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// The request pipeline: resolves the target from the host, forwards the
/// request and rewrites the response back onto the proxy host.
pub struct MirrorProxy {
    config: Arc<ProxyConfig>,
    transport: Arc<dyn Transport>,
    gate: Option<CountryGate>,
}

impl MirrorProxy {
    pub fn new(config: ProxyConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let gate = CountryGate::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            transport,
            gate,
        })
    }

    /// Produces exactly one response for `req`; failures become fixed-text
    /// error responses.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        if req.uri().path() == "/robots.txt" {
            return robots_response();
        }

        if req.uri().path() == "/health" && self.is_apex(&req) {
            return json_response(
                StatusCode::OK,
                json!({
                    "status": "healthy",
                    "version": VERSION,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            );
        }

        match self.proxy(req).await {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    PipelineError::Transport(TransportError::Timeout) => {
                        warn!("upstream timed out")
                    }
                    PipelineError::Transport(TransportError::Unreachable(reason)) => {
                        warn!(%reason, "upstream unreachable")
                    }
                    PipelineError::MissingTarget => debug!("no target domain in host"),
                    PipelineError::PolicyDenied => info!("request denied by country gate"),
                    other => warn!(err = %other, "proxy pipeline failed"),
                }
                err.into_response()
            }
        }
    }

    /// `handle`, with panics downgraded to the generic 502 response.
    pub async fn handle_guarded(&self, req: Request<Body>) -> Response<Body> {
        match AssertUnwindSafe(self.handle(req)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                error!("proxy pipeline panicked");
                PipelineError::Internal.into_response()
            }
        }
    }

    async fn proxy(&self, req: Request<Body>) -> Result<Response<Body>, PipelineError> {
        if let Some(gate) = &self.gate
            && !gate.permits(req.headers())
        {
            return Err(PipelineError::PolicyDenied);
        }

        let authority = domain::extract_host(req.headers()).ok_or(PipelineError::MissingTarget)?;
        let hosts = ProxyHosts::resolve(&authority, &self.config.own_domain)?;

        let span = info_span!(
            "proxy",
            method = %req.method(),
            host = %hosts.authority,
            target = %hosts.target,
        );
        self.forward(req, hosts).instrument(span).await
    }

    async fn forward(
        &self,
        req: Request<Body>,
        hosts: ProxyHosts,
    ) -> Result<Response<Body>, PipelineError> {
        let deadline = Instant::now() + self.config.timeout;
        debug!(path = %req.uri().path(), "forwarding request");

        let outbound =
            OutboundRequest::from_incoming(req, &hosts.target, self.config.user_agent.as_deref())
                .await?;
        let method = outbound.method.clone();
        let upstream_url = outbound.url.clone();
        let response =
            transport::invoke(self.transport.as_ref(), outbound.into_request()?, deadline).await?;

        let rewriter = DomainRewriter::new(&hosts, self.config.substitution)?;
        let (parts, origin_body) = response.into_parts();

        let headers =
            redirect::rewrite_location(parts.status, &parts.headers, &upstream_url, &rewriter);
        let (headers, body) = if body::carries_body(&method, parts.status) {
            body::rewrite_body(headers, origin_body, &self.config, &rewriter, deadline).await?
        } else {
            (headers, origin_body)
        };
        let headers = cookie::rewrite_set_cookies(&headers, &rewriter);

        Ok(finalize_response(parts.status, headers, body))
    }

    fn is_apex(&self, req: &Request<Body>) -> bool {
        domain::extract_host(req.headers())
            .map(|host| domain::normalize_host(&host) == self.config.own_domain)
            .unwrap_or(false)
    }
}

pub async fn spawn_proxy(config: ProxyConfig) -> Result<ProxyHandle, ProxyError> {
    spawn_proxy_with_transport(config, Arc::new(HyperTransport::new())).await
}

pub async fn spawn_proxy_with_transport(
    config: ProxyConfig,
    transport: Arc<dyn Transport>,
) -> Result<ProxyHandle, ProxyError> {
    let bind_addr = config.bind_addr;
    let proxy = Arc::new(MirrorProxy::new(config, transport)?);

    let listener = std::net::TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let make_svc = make_service_fn(move |_conn: &AddrStream| {
        let proxy = proxy.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let proxy = proxy.clone();
                async move { Ok::<_, hyper::Error>(proxy.handle_guarded(req).await) }
            }))
        }
    });

    let server = hyper::Server::from_tcp(listener)?.serve(make_svc);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = graceful.await {
            error!(%err, "proxy server error");
        }
    });

    info!(addr = %local_addr, "mirror proxy listening");

    Ok(ProxyHandle {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

fn robots_response() -> Response<Body> {
    text_response(StatusCode::OK, ROBOTS_TXT)
}

fn json_response(status: StatusCode, value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
