use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, header};
use hyper::{Body, body};
use url::Url;

use crate::{error::RequestError, headers::strip_hop_by_hop_headers};

pub const UPSTREAM_SCHEME: &str = "https";

/// Request sent to the origin. Redirects are never followed for it: the
/// transport hands 3xx responses back so their `Location` can be rewritten.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    pub async fn from_incoming(
        request: Request<Body>,
        target: &str,
        user_agent: Option<&str>,
    ) -> Result<Self, RequestError> {
        let (parts, incoming) = request.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("{UPSTREAM_SCHEME}://{target}{path_and_query}"))?;

        let headers = outbound_headers(&parts.headers, target, user_agent)?;

        let body = if matches!(parts.method, Method::GET | Method::HEAD) {
            None
        } else {
            Some(body::to_bytes(incoming).await.map_err(RequestError::Body)?)
        };

        Ok(Self {
            method: parts.method,
            url,
            headers,
            body,
        })
    }

    pub fn into_request(self) -> Result<Request<Body>, RequestError> {
        let body = match self.body {
            Some(bytes) => Body::from(bytes),
            None => Body::empty(),
        };
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.url.as_str())
            .body(body)?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

fn outbound_headers(
    incoming: &HeaderMap,
    target: &str,
    user_agent: Option<&str>,
) -> Result<HeaderMap, RequestError> {
    let mut headers = incoming.clone();
    strip_hop_by_hop_headers(&mut headers);
    headers.remove(header::ACCEPT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove("x-forwarded-host");

    let host = HeaderValue::from_str(target).map_err(|_| RequestError::Header("host"))?;
    headers.insert(header::HOST, host);

    if let Some(agent) = user_agent {
        let agent =
            HeaderValue::from_str(agent).map_err(|_| RequestError::Header("user-agent"))?;
        headers.insert(header::USER_AGENT, agent);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(method: Method, uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "target.example.b.com")
            .header(header::ACCEPT_ENCODING, "gzip, br")
            .header(header::USER_AGENT, "curl/8.0")
            .header(header::COOKIE, "a=1")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn rebuilds_url_and_headers_for_target() {
        let request = incoming(Method::GET, "/path/to?q=1&r=2", "ignored");
        let outbound = OutboundRequest::from_incoming(request, "target.example", None)
            .await
            .unwrap();

        assert_eq!(outbound.method, Method::GET);
        assert_eq!(outbound.url.as_str(), "https://target.example/path/to?q=1&r=2");
        assert_eq!(outbound.headers[header::HOST], "target.example");
        assert_eq!(outbound.headers[header::USER_AGENT], "curl/8.0");
        assert_eq!(outbound.headers[header::COOKIE], "a=1");
        assert!(outbound.headers.get(header::ACCEPT_ENCODING).is_none());
        assert!(outbound.headers.get(header::CONNECTION).is_none());
        assert!(outbound.body.is_none());
    }

    #[tokio::test]
    async fn forwards_body_for_non_get_methods() {
        let request = incoming(Method::POST, "/submit", "name=value");
        let outbound = OutboundRequest::from_incoming(request, "target.example", Some("mirror/1"))
            .await
            .unwrap();

        assert_eq!(outbound.body.as_deref(), Some(&b"name=value"[..]));
        assert_eq!(outbound.headers[header::USER_AGENT], "mirror/1");

        let request = outbound.into_request().unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "https://target.example/submit");
        let body = body::to_bytes(request.into_body()).await.unwrap();
        assert_eq!(&body[..], b"name=value");
    }

    #[tokio::test]
    async fn head_requests_carry_no_body() {
        let request = incoming(Method::HEAD, "/", "");
        let outbound = OutboundRequest::from_incoming(request, "target.example", None)
            .await
            .unwrap();
        assert!(outbound.body.is_none());
    }
}
