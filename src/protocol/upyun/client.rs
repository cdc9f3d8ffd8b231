//! UpYun client implementation

use super::breakpoint::{BreakpointStore, MemoryBreakpointStore};
use super::config::UpyunConfig;
use super::decoder::{JsonListingDecoder, ListingDecoder};
use super::error::UpyunResult;
use super::executor::{RequestExecutor, RestRequest, RestResponse};
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Characters left untouched in path segments
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Client for the UpYun REST API
///
/// Cheap to clone; the executor, decoder and breakpoint store are shared.
#[derive(Clone)]
pub struct UpyunClient {
    config: UpyunConfig,
    executor: Arc<dyn RequestExecutor>,
    decoder: Arc<dyn ListingDecoder>,
    breakpoints: Arc<dyn BreakpointStore>,
}

impl fmt::Debug for UpyunClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpyunClient")
            .field("bucket", &self.config.bucket)
            .finish_non_exhaustive()
    }
}

impl UpyunClient {
    /// Create a client using the JSON listing decoder and an in-memory
    /// breakpoint store
    pub fn new(config: UpyunConfig, executor: Arc<dyn RequestExecutor>) -> UpyunResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            executor,
            decoder: Arc::new(JsonListingDecoder),
            breakpoints: Arc::new(MemoryBreakpointStore::new()),
        })
    }

    /// Replace the listing decoder
    pub fn with_decoder(mut self, decoder: Arc<dyn ListingDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the breakpoint store
    pub fn with_breakpoint_store(mut self, store: Arc<dyn BreakpointStore>) -> Self {
        self.breakpoints = store;
        self
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &UpyunConfig {
        &self.config
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn decoder(&self) -> &dyn ListingDecoder {
        self.decoder.as_ref()
    }

    pub fn breakpoints(&self) -> &dyn BreakpointStore {
        self.breakpoints.as_ref()
    }

    /// Start a request against `path` in this bucket
    pub fn request(&self, method: Method, path: &str) -> RestRequest {
        RestRequest::new(method, bucket_uri(&self.config.bucket, path))
    }

    /// Start a request carrying a query string
    pub fn request_with_query(&self, method: Method, path: &str, query: &str) -> RestRequest {
        let uri = format!("{}?{}", bucket_uri(&self.config.bucket, path), query);
        RestRequest::new(method, uri)
    }

    /// Execute a request and reject non-success responses
    pub async fn send(&self, request: RestRequest) -> UpyunResult<RestResponse> {
        trace!(method = %request.method, uri = %request.uri, "Sending request");
        self.executor.execute(request).await?.error_for_status()
    }

    /// `/<bucket>/<escaped path>` used by move and copy sources
    pub fn source_header(&self, path: &str) -> String {
        let uri = bucket_uri(&self.config.bucket, path);
        uri.trim_end_matches('/').to_string()
    }
}

/// Percent-encode each segment of `path` and prefix it with the bucket
///
/// Empty segments are dropped; a trailing slash on `path` is kept.
pub fn bucket_uri(bucket: &str, path: &str) -> String {
    let mut uri = format!("/{}", bucket);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        uri.push('/');
        uri.extend(utf8_percent_encode(segment, PATH_SEGMENT));
    }
    if path.ends_with('/') {
        uri.push('/');
    }
    uri
}

/// Join remote paths without doubling separators
pub fn join_path(base: &str, name: &str) -> String {
    let rooted = base.starts_with('/');
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        if rooted {
            format!("/{}", name)
        } else {
            name.to_string()
        }
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}
