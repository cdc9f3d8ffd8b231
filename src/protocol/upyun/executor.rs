//! Request executor contract
//!
//! Signing, endpoint resolution and the HTTP transport live behind
//! [`RequestExecutor`]. The client hands over a fully built request (bucket
//! prefixed, escaped URI and protocol headers) and expects the raw response
//! back. Implementations must report transport failures as
//! [`UpyunError::Network`] so that callers can retry them; any response that
//! reached the service is returned as-is and classified by the client.

use super::error::{UpyunError, UpyunResult};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

/// A request ready to be signed and sent
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    /// `/<bucket>/<escaped path>[?query]`
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RestRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set a header, replacing any previous value
    pub fn header(mut self, name: &str, value: &str) -> UpyunResult<Self> {
        insert_header(&mut self.headers, name, value)?;
        Ok(self)
    }

    /// Copy caller supplied headers onto the request
    pub fn headers<'a, I>(mut self, headers: I) -> UpyunResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (name, value) in headers {
            insert_header(&mut self.headers, name, value)?;
        }
        Ok(self)
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Path part of the URI, without the query
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }

    /// Query part of the URI, if any
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q)
    }

    /// Header value as a string
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Raw response from the service
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RestResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> UpyunResult<Self> {
        insert_header(&mut self.headers, name, value)?;
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value as a string
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Turn non-2xx responses into [`UpyunError::Remote`]
    pub fn error_for_status(self) -> UpyunResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(UpyunError::remote(self.status.as_u16(), &self.body))
        }
    }
}

/// Sends requests to the service
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: RestRequest) -> UpyunResult<RestResponse>;
}

/// Insert a header, validating name and value
pub fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> UpyunResult<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| UpyunError::Validation(format!("invalid header name {}: {}", name, e)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| UpyunError::Validation(format!("invalid value for {}: {}", name, e)))?;
    headers.insert(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = RestRequest::new(Method::PUT, "/bucket/a%20b.txt?metadata=merge")
            .header("X-Upyun-Multi-Stage", "initiate")
            .unwrap()
            .body(Bytes::from_static(b"abc"));

        assert_eq!(req.path(), "/bucket/a%20b.txt");
        assert_eq!(req.query(), Some("metadata=merge"));
        assert_eq!(req.header_str("x-upyun-multi-stage"), Some("initiate"));
        assert_eq!(req.body.len(), 3);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let err = RestRequest::new(Method::GET, "/b/")
            .header("bad header", "v")
            .unwrap_err();
        assert!(matches!(err, UpyunError::Validation(_)));

        let err = RestRequest::new(Method::GET, "/b/")
            .header("x-ok", "line\nbreak")
            .unwrap_err();
        assert!(matches!(err, UpyunError::Validation(_)));
    }

    #[test]
    fn test_error_for_status() {
        assert!(RestResponse::ok().error_for_status().is_ok());

        let err = RestResponse::new(StatusCode::FORBIDDEN)
            .with_body("denied")
            .error_for_status()
            .unwrap_err();
        assert!(matches!(err, UpyunError::Remote { status: 403, .. }));
        assert!(err.is_permanent());
    }
}
