use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response};
use hyper::{Body, Client, client::HttpConnector};
use hyper_rustls::HttpsConnectorBuilder;
use tokio::time::{Instant, timeout_at};

use crate::error::TransportError;

type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// Issues one outbound request. Implementations must not follow redirects.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>>;
}

#[derive(Clone)]
pub struct HyperTransport {
    client: HttpClient,
}

impl HyperTransport {
    pub fn new() -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Self {
            client: Client::builder().build(https),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let client = self.client.clone();
        async move {
            client
                .request(request)
                .await
                .map_err(|err| TransportError::Unreachable(err.to_string()))
        }
        .boxed()
    }
}

/// Runs `transport` until `deadline`. The in-flight request is dropped, and its
/// connection released, when the deadline passes first.
pub async fn invoke(
    transport: &dyn Transport,
    request: Request<Body>,
    deadline: Instant,
) -> Result<Response<Body>, TransportError> {
    match timeout_at(deadline, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}
