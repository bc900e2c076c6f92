use http::{Response, StatusCode, header};
use hyper::Body;

pub const MISSING_TARGET_MESSAGE: &str = "Bad request: no target domain specified in host";
pub const UNREACHABLE_MESSAGE: &str = "Could not reach target server";
pub const ACCESS_DENIED_MESSAGE: &str = "Access denied";

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("own domain must not be empty")]
    EmptyOwnDomain,
    #[error("at least one processable content type is required")]
    NoContentTypes,
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("invalid country header name: {0}")]
    InvalidCountryHeader(String),
    #[error("invalid user agent: {0}")]
    InvalidUserAgent(String),
}

/// Failure of the single outbound attempt. Both kinds surface as 502.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("upstream did not respond before the deadline")]
    Timeout,
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
}

/// Body decoding failure. Never fatal: the caller falls back to the raw bytes.
#[derive(thiserror::Error, Debug)]
pub enum DecodingError {
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),
    #[error("body is not valid {0}")]
    Malformed(&'static str),
    #[error("unsupported content-encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("decompressed body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("content-encoding: {0}")]
    ContentEncoding(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid upstream header value for {0}")]
    Header(&'static str),
    #[error("failed to read client body: {0}")]
    Body(#[source] hyper::Error),
    #[error("failed to build upstream request: {0}")]
    Http(#[from] http::Error),
}

/// Everything that can end the pipeline early for a proxied request.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("no target domain in host")]
    MissingTarget,
    #[error("request denied by country gate")]
    PolicyDenied,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("rewriter setup failed: {0}")]
    Rewrite(#[from] regex::Error),
    #[error("internal pipeline failure")]
    Internal,
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::MissingTarget => StatusCode::BAD_REQUEST,
            PipelineError::PolicyDenied => StatusCode::FORBIDDEN,
            PipelineError::Transport(_)
            | PipelineError::Request(_)
            | PipelineError::Rewrite(_)
            | PipelineError::Internal => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn message(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => MISSING_TARGET_MESSAGE,
            StatusCode::FORBIDDEN => ACCESS_DENIED_MESSAGE,
            _ => UNREACHABLE_MESSAGE,
        }
    }

    pub fn into_response(self) -> Response<Body> {
        text_response(self.status(), self.message())
    }
}

pub(crate) fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
