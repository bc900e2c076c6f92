//! Textual response body rewriting.
//!
//! A body is rewritten only when its `Content-Type` matches the configured
//! allow-list. The payload is buffered (bounded by `max_body_bytes` and the
//! request deadline), stripped of any `Content-Encoding`, decoded with the
//! declared charset, rewritten, and encoded back. Any decoding problem falls
//! back to forwarding the original bytes untouched.

use std::io::Read;

use brotli::Decompressor;
use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use flate2::read::{GzDecoder, ZlibDecoder};
use futures_util::{StreamExt, stream};
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use hyper::{Body, body::HttpBody};
use lol_html::{HtmlRewriter, Settings, element};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::{
    config::ProxyConfig,
    error::{DecodingError, TransportError},
    headers::strip_payload_headers,
    rewrite::DomainRewriter,
};

/// Whether `content_type` is one of the configured textual types.
pub fn is_processable(content_type: &str, processable: &[String]) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    processable
        .iter()
        .any(|candidate| content_type.contains(candidate.as_str()))
}

pub async fn rewrite_body(
    headers: HeaderMap,
    body: Body,
    config: &ProxyConfig,
    rewriter: &DomainRewriter,
    deadline: Instant,
) -> Result<(HeaderMap, Body), TransportError> {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    else {
        return Ok((headers, body));
    };
    if !is_processable(&content_type, &config.processable_content_types) {
        return Ok((headers, body));
    }

    if let Some(length) = declared_length(&headers)
        && length > config.max_body_bytes
    {
        debug!(length, "body above rewrite limit; streaming through");
        return Ok((headers, body));
    }

    let raw = match collect_limited(body, config.max_body_bytes, deadline).await? {
        Collected::Complete(bytes) => bytes,
        Collected::Oversized { buffered, rest } => {
            debug!("body grew past rewrite limit; streaming through");
            let chained = stream::once(async move { Ok::<_, hyper::Error>(buffered) }).chain(rest);
            return Ok((headers, Body::wrap_stream(chained)));
        }
    };

    let content_encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    match rewrite_payload(
        &raw,
        &content_type,
        content_encoding,
        rewriter,
        config.max_body_bytes,
    ) {
        Ok((rewritten, new_content_type)) => {
            let mut headers = headers;
            strip_payload_headers(&mut headers);
            if let Some(value) = new_content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
            Ok((headers, Body::from(rewritten)))
        }
        Err(err) => {
            warn!(%err, "failed to decode upstream body; skipping rewrite");
            Ok((headers, Body::from(raw)))
        }
    }
}

/// Decodes, rewrites and re-encodes one buffered payload. Returns the new body
/// and, when the charset had to change, the new `Content-Type` value. `limit`
/// bounds the decompressed size.
pub fn rewrite_payload(
    raw: &[u8],
    content_type: &str,
    content_encoding: Option<&str>,
    rewriter: &DomainRewriter,
    limit: usize,
) -> Result<(Vec<u8>, Option<String>), DecodingError> {
    let decompressed = inflate(raw, content_encoding, limit)?;
    let charset = charset_param(content_type);
    let (text, encoding) = decode_text(&decompressed, charset.as_deref())?;

    let mut rewritten = rewriter.rewrite_text(&text).into_owned();
    if content_type.to_ascii_lowercase().contains("text/html") {
        match strip_meta_csp(&rewritten) {
            Ok(stripped) => rewritten = stripped,
            Err(err) => warn!(%err, "html rewrite failed; keeping meta tags"),
        }
    }

    let (bytes, used) = encode_text(&rewritten, encoding);
    let new_content_type = if used != encoding {
        Some(with_charset(content_type, used.name()))
    } else {
        None
    };
    Ok((bytes, new_content_type))
}

enum Collected {
    Complete(Bytes),
    Oversized { buffered: Bytes, rest: Body },
}

async fn collect_limited(
    mut body: Body,
    limit: usize,
    deadline: Instant,
) -> Result<Collected, TransportError> {
    let mut buffer = BytesMut::new();
    loop {
        let chunk = match timeout_at(deadline, body.data()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => return Err(TransportError::Unreachable(err.to_string())),
            Ok(None) => return Ok(Collected::Complete(buffer.freeze())),
            Err(_) => return Err(TransportError::Timeout),
        };
        buffer.extend_from_slice(&chunk);
        if buffer.len() > limit {
            return Ok(Collected::Oversized {
                buffered: buffer.freeze(),
                rest: body,
            });
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Undoes the origin's `Content-Encoding`. Decompression stops once more than
/// `limit` bytes come out.
pub fn inflate(
    bytes: &[u8],
    content_encoding: Option<&str>,
    limit: usize,
) -> Result<Vec<u8>, DecodingError> {
    let coding = content_encoding
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let decoder: Box<dyn Read + '_> = match coding.as_str() {
        "" | "identity" => return Ok(bytes.to_vec()),
        "gzip" | "x-gzip" => Box::new(GzDecoder::new(bytes)),
        "deflate" => Box::new(ZlibDecoder::new(bytes)),
        "br" => Box::new(Decompressor::new(bytes, 4096)),
        "zstd" => Box::new(ZstdDecoder::new(bytes)?),
        other => return Err(DecodingError::UnsupportedEncoding(other.to_string())),
    };

    let mut inflated = Vec::new();
    decoder
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut inflated)?;
    if inflated.len() > limit {
        return Err(DecodingError::TooLarge(limit));
    }
    Ok(inflated)
}

/// Whether a response to `method` with `status` has a payload to rewrite.
/// Bodiless responses keep the origin's `Content-Length` as-is.
pub fn carries_body(method: &Method, status: StatusCode) -> bool {
    !(*method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Value of the `charset` parameter of a `Content-Type` header, unquoted.
pub fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Decodes `bytes` with the named charset, UTF-8 when none is declared.
/// Malformed input is an error rather than being replaced, so a failed decode
/// never alters the bytes the client receives.
pub fn decode_text(
    bytes: &[u8],
    charset: Option<&str>,
) -> Result<(String, &'static Encoding), DecodingError> {
    let encoding = match charset {
        Some(label) => Encoding::for_label(label.as_bytes())
            .ok_or_else(|| DecodingError::UnsupportedCharset(label.to_string()))?,
        None => UTF_8,
    };
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or(DecodingError::Malformed(encoding.name()))?;
    Ok((text.into_owned(), encoding))
}

/// Encodes `text` back into `encoding`. Encodings that cannot be produced
/// (the UTF-16 family, replacement) and unmappable text fall back to UTF-8; the
/// encoding actually used is returned.
pub fn encode_text(text: &str, encoding: &'static Encoding) -> (Vec<u8>, &'static Encoding) {
    let (bytes, used, unmappable) = encoding.encode(text);
    if unmappable {
        return (text.as_bytes().to_vec(), UTF_8);
    }
    (bytes.into_owned(), used)
}

fn with_charset(content_type: &str, charset: &str) -> String {
    let mut parts = content_type.split(';');
    let mut out = parts.next().unwrap_or("").trim().to_string();
    for part in parts {
        let part = part.trim();
        let is_charset = part
            .split_once('=')
            .map(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
            .unwrap_or(false);
        if !is_charset && !part.is_empty() {
            out.push_str("; ");
            out.push_str(part);
        }
    }
    out.push_str("; charset=");
    out.push_str(&charset.to_ascii_lowercase());
    out
}

/// Removes `<meta http-equiv="Content-Security-Policy">` elements, which would
/// reinstate the policy dropped from the response headers.
fn strip_meta_csp(html: &str) -> Result<String, lol_html::errors::RewritingError> {
    let mut output = Vec::with_capacity(html.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("meta", |el| {
                if let Some(value) = el.get_attribute("http-equiv")
                    && (value.eq_ignore_ascii_case("content-security-policy")
                        || value.eq_ignore_ascii_case("content-security-policy-report-only"))
                {
                    el.remove();
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter.write(html.as_bytes())?;
    rewriter.end()?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}
