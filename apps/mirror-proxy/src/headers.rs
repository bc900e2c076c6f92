use http::{
    HeaderMap, HeaderValue, Response, StatusCode,
    header::{self, CONNECTION},
};
use hyper::Body;

const PAYLOAD_HEADERS: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "content-md5",
    "content-digest",
    "etag",
];

pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    const HOP_HEADERS: &[&str] = &[
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
        "proxy-connection",
    ];

    if let Some(listed) = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    {
        for token in listed.split(',') {
            let name = token.trim().to_ascii_lowercase();
            if !name.is_empty() {
                headers.remove(&name);
            }
        }
    }
    headers.remove(CONNECTION);
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Drops the headers that describe the original payload encoding so a
/// rewritten body can carry its own.
pub fn strip_payload_headers(headers: &mut HeaderMap) {
    for name in PAYLOAD_HEADERS {
        headers.remove(*name);
    }
}

pub fn strip_csp_headers(headers: &mut HeaderMap) {
    headers.remove("content-security-policy");
    headers.remove("content-security-policy-report-only");
    headers.remove("x-frame-options");
    headers.remove("frame-options");
}

/// Applies the fixed response policy and assembles what the client receives.
pub fn finalize_response(status: StatusCode, mut headers: HeaderMap, body: Body) -> Response<Body> {
    strip_hop_by_hop_headers(&mut headers);
    strip_csp_headers(&mut headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
