//! Durable request records.
//!
//! A [`QueuedRequest`] is the persisted form of an outbound HTTP request. It
//! owns everything needed to rebuild the request later (method, URL, header
//! list and body bytes) and is immutable once created.
//!
//! ## Conversion
//!
//! - [`QueuedRequest::encode`] captures a live [`reqwest::Request`] by
//!   reference, so the caller keeps a usable request afterwards.
//! - [`QueuedRequest::decode`] rebuilds a fresh request that can be handed to
//!   a transport exactly once.
//!
//! ## Example
//!
//! ```rust
//! use courier::QueuedRequest;
//!
//! let client = reqwest::Client::new();
//! let request = client
//!     .put("https://example.com/items/1")
//!     .header("content-type", "text/plain")
//!     .body("x")
//!     .build()
//!     .unwrap();
//!
//! let record = QueuedRequest::encode(&request).unwrap();
//! assert_eq!(record.method(), "PUT");
//! assert_eq!(record.body(), b"x");
//!
//! // The original request is untouched.
//! assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"x"[..]));
//! ```

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tracing_error::SpanTrace;

/// Persisted form of an outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    method: String,
    url: String,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl QueuedRequest {
    pub(crate) fn from_parts(
        method: String,
        url: String,
        headers: Vec<(String, Vec<u8>)>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// Capture a request into an owned record.
    ///
    /// Header values are kept as raw bytes, so values that are not UTF-8
    /// survive unchanged. The body must be buffered: a streaming body cannot
    /// be read without consuming the caller's request and is rejected.
    pub fn encode(request: &reqwest::Request) -> Result<Self, CodecError> {
        let body = match request.body() {
            None => Vec::new(),
            Some(body) => body
                .as_bytes()
                .ok_or_else(CodecError::streaming_body)?
                .to_vec(),
        };

        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect();

        Ok(Self {
            method: request.method().as_str().to_owned(),
            url: request.url().as_str().to_owned(),
            headers,
            body,
        })
    }

    /// Rebuild a one-shot request from this record.
    pub fn decode(&self) -> Result<reqwest::Request, CodecError> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| CodecError::method(&self.method, Box::new(e)))?;
        let url = Url::parse(&self.url).map_err(|e| CodecError::url(&self.url, Box::new(e)))?;

        let mut request = reqwest::Request::new(method, url);
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CodecError::header(name, Box::new(e)))?;
            let header_value = HeaderValue::from_bytes(value)
                .map_err(|e| CodecError::header(name, Box::new(e)))?;
            request.headers_mut().append(header_name, header_value);
        }
        if !self.body.is_empty() {
            *request.body_mut() = Some(self.body.clone().into());
        }

        Ok(request)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Header pairs in their original order, duplicates included.
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether a later request of this kind fully replaces earlier ones for
    /// the same URL (PUT and DELETE).
    pub fn is_idempotent_replace(&self) -> bool {
        is_idempotent_replace(&self.method)
    }
}

pub(crate) fn is_idempotent_replace(method: &str) -> bool {
    method == Method::PUT.as_str() || method == Method::DELETE.as_str()
}

/// Error returned when a request cannot be captured or rebuilt.
#[derive(Debug)]
pub struct CodecError {
    context: SpanTrace,
    kind: CodecErrorKind,
}

/// Codec error kinds.
#[derive(Debug)]
pub enum CodecErrorKind {
    /// The request body is a stream and cannot be copied.
    StreamingBody,
    /// A header name or value is not representable.
    Header { name: String, source: tower::BoxError },
    /// The stored method is not a valid HTTP method token.
    Method { method: String, source: tower::BoxError },
    /// The stored URL does not parse.
    Url { url: String, source: tower::BoxError },
}

impl CodecError {
    fn new(kind: CodecErrorKind) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind,
        }
    }

    fn streaming_body() -> Self {
        Self::new(CodecErrorKind::StreamingBody)
    }

    fn header(name: &str, source: tower::BoxError) -> Self {
        Self::new(CodecErrorKind::Header {
            name: name.to_owned(),
            source,
        })
    }

    fn method(method: &str, source: tower::BoxError) -> Self {
        Self::new(CodecErrorKind::Method {
            method: method.to_owned(),
            source,
        })
    }

    fn url(url: &str, source: tower::BoxError) -> Self {
        Self::new(CodecErrorKind::Url {
            url: url.to_owned(),
            source,
        })
    }

    pub fn kind(&self) -> &CodecErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CodecErrorKind::StreamingBody => writeln!(f, "Request body is not buffered"),
            CodecErrorKind::Header { name, source } => {
                writeln!(f, "Invalid header {name}: {source}")
            }
            CodecErrorKind::Method { method, source } => {
                writeln!(f, "Invalid method {method}: {source}")
            }
            CodecErrorKind::Url { url, source } => writeln!(f, "Invalid url {url}: {source}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CodecErrorKind::StreamingBody => None,
            CodecErrorKind::Header { source, .. }
            | CodecErrorKind::Method { source, .. }
            | CodecErrorKind::Url { source, .. } => Some(source.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(url: &str, body: &'static str) -> reqwest::Request {
        reqwest::Client::new()
            .put(url)
            .header("x-trace", "a")
            .header("accept", "text/plain")
            .header("x-trace", "b")
            .body(body)
            .build()
            .unwrap()
    }

    #[test]
    fn encode_captures_all_parts() {
        let request = put("https://example.com/items/1", "x");
        let record = QueuedRequest::encode(&request).unwrap();

        assert_eq!(record.method(), "PUT");
        assert_eq!(record.url(), "https://example.com/items/1");
        assert_eq!(record.body(), b"x");
        assert_eq!(
            record
                .headers()
                .iter()
                .filter(|(name, _)| name == "x-trace")
                .map(|(_, value)| value.as_slice())
                .collect::<Vec<_>>(),
            vec![&b"a"[..], &b"b"[..]]
        );
    }

    #[test]
    fn encode_leaves_original_usable() {
        let request = put("https://example.com/items/1", "payload");
        let _ = QueuedRequest::encode(&request).unwrap();

        let copy = request.try_clone().expect("body still buffered");
        assert_eq!(
            copy.body().and_then(|b| b.as_bytes()),
            Some(&b"payload"[..])
        );
    }

    #[test]
    fn decode_rebuilds_request() {
        let record = QueuedRequest::encode(&put("https://example.com/items/1", "x")).unwrap();
        let request = record.decode().unwrap();

        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.url().as_str(), "https://example.com/items/1");
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"x"[..]));
        let traces: Vec<_> = request.headers().get_all("x-trace").iter().collect();
        assert_eq!(traces, vec!["a", "b"]);
    }

    #[test]
    fn non_utf8_header_values_round_trip() {
        let mut request = put("https://example.com/items/1", "x");
        request
            .headers_mut()
            .insert("x-label", HeaderValue::from_bytes(b"caf\xe9").unwrap());

        let record = QueuedRequest::encode(&request).unwrap();
        assert!(
            record
                .headers()
                .iter()
                .any(|(name, value)| name == "x-label" && value == b"caf\xe9")
        );

        let rebuilt = record.decode().unwrap();
        assert_eq!(
            rebuilt.headers().get("x-label").map(|v| v.as_bytes()),
            Some(&b"caf\xe9"[..])
        );
    }

    #[test]
    fn decode_rejects_unrepresentable_header_value() {
        let record = QueuedRequest::from_parts(
            "PUT".into(),
            "https://example.com/items/1".into(),
            vec![("x-label".into(), b"line\nbreak".to_vec())],
            Vec::new(),
        );
        let err = record.decode().unwrap_err();
        assert!(matches!(err.kind(), CodecErrorKind::Header { .. }));
    }

    #[test]
    fn empty_body_decodes_to_no_body() {
        let request = reqwest::Client::new()
            .delete("https://example.com/items/1")
            .build()
            .unwrap();
        let record = QueuedRequest::encode(&request).unwrap();

        assert!(record.body().is_empty());
        assert!(record.decode().unwrap().body().is_none());
    }

    #[test]
    fn decode_rejects_corrupt_record() {
        let record = QueuedRequest::from_parts(
            "PUT".into(),
            "not a url".into(),
            Vec::new(),
            Vec::new(),
        );
        let err = record.decode().unwrap_err();
        assert!(matches!(err.kind(), CodecErrorKind::Url { .. }));
    }

    #[test]
    fn classifies_idempotent_replace_methods() {
        assert!(is_idempotent_replace("PUT"));
        assert!(is_idempotent_replace("DELETE"));
        assert!(!is_idempotent_replace("POST"));
        assert!(!is_idempotent_replace("PATCH"));
        assert!(!is_idempotent_replace("GET"));
    }
}
