//! Multipart upload support for UpYun
//!
//! Payloads at or above the resumable threshold are sent as a sequence of
//! fixed-size parts. A part that keeps failing with transient errors
//! suspends the upload: a [`BreakpointState`] is persisted and the upload can
//! later continue from that part with [`UpyunClient::resume_put`].

use super::client::UpyunClient;
use super::error::{UpyunError, UpyunResult};
use super::fragment::SharedSource;
use super::operations::UpyunOperations;
use super::planner::plan_parts;
use super::recovery::{with_retry, RetryPolicy};
use super::types::{
    BreakpointState, ListMultipartUploadResult, ListUploadedPartsResult, PartPlan, UploadSession,
};
use super::MAX_PART_NUM;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http::Method;
use std::collections::HashMap;
use std::io::{Read, Seek};
use tracing::{debug, info, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Per-call upload options
///
/// Unset options fall back to the client's [`UpyunConfig`](super::UpyunConfig).
#[derive(Debug, Clone, Default)]
pub struct PutConfig {
    /// Extra request headers
    pub headers: HashMap<String, String>,

    /// Content type of the object
    pub content_type: Option<String>,

    /// Send payload digests with the upload
    pub use_md5: Option<bool>,

    /// Part size for multipart uploads, 0 selects the default
    pub part_size: Option<u64>,

    /// Attempts per part, 0 = unbounded
    pub max_resume_put_tries: Option<u32>,

    /// Payloads below this size are sent with a single PUT
    pub resumable_threshold: Option<u64>,
}

impl PutConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_md5(mut self, enabled: bool) -> Self {
        self.use_md5 = Some(enabled);
        self
    }

    pub fn with_part_size(mut self, size: u64) -> Self {
        self.part_size = Some(size);
        self
    }

    pub fn with_max_tries(mut self, tries: u32) -> Self {
        self.max_resume_put_tries = Some(tries);
        self
    }

    pub fn with_resumable_threshold(mut self, size: u64) -> Self {
        self.resumable_threshold = Some(size);
        self
    }
}

/// Options for [`UpyunClient::init_multipart_upload`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitMultipartConfig {
    /// `X-Upyun-Multi-Type`
    pub content_type: String,

    /// Declared payload length, 0 if unknown
    pub content_length: u64,

    /// Requested part size, 0 selects the default
    pub part_size: u64,

    /// Parts arrive in id order; otherwise `X-Upyun-Multi-Disorder` is sent
    pub ordered: bool,
}

/// Upload settings resolved against the client configuration
#[derive(Debug, Clone)]
struct ResolvedPut {
    content_type: String,
    use_md5: bool,
    part_size: u64,
    max_tries: u32,
    threshold: u64,
}

impl UpyunClient {
    fn resolve_put(&self, config: &PutConfig) -> ResolvedPut {
        let defaults = self.config();
        let content_type = config
            .content_type
            .clone()
            .or_else(|| {
                config
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                    .map(|(_, v)| v.clone())
            })
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        ResolvedPut {
            content_type,
            use_md5: config.use_md5.unwrap_or(defaults.use_md5),
            part_size: config.part_size.unwrap_or(defaults.part_size),
            max_tries: config
                .max_resume_put_tries
                .unwrap_or(defaults.max_resume_put_tries),
            threshold: config
                .resumable_threshold
                .unwrap_or(defaults.resumable_threshold),
        }
    }

    /// Start a multipart session
    pub async fn init_multipart_upload(
        &self,
        path: &str,
        config: &InitMultipartConfig,
    ) -> UpyunResult<UploadSession> {
        let plan = plan_parts(config.part_size, config.content_length)
            .map_err(|e| e.context("init multipart"))?;

        let mut request = self
            .request(Method::PUT, path)
            .header("X-Upyun-Multi-Stage", "initiate")?
            .header("X-Upyun-Multi-Type", &config.content_type)?
            .header("X-Upyun-Multi-Part-Size", &plan.part_size.to_string())?;
        if config.content_length > 0 {
            request = request.header("X-Upyun-Multi-Length", &config.content_length.to_string())?;
        }
        if !config.ordered {
            request = request.header("X-Upyun-Multi-Disorder", "true")?;
        }

        let response = self
            .send(request)
            .await
            .map_err(|e| e.context("init multipart"))?;
        let upload_id = response
            .header_str("X-Upyun-Multi-Uuid")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                UpyunError::Decode("init multipart: response has no X-Upyun-Multi-Uuid".to_string())
            })?
            .to_string();

        info!(
            path,
            upload_id = %upload_id,
            part_size = plan.part_size,
            part_count = plan.part_count,
            "Multipart upload initiated"
        );

        Ok(UploadSession {
            upload_id,
            path: path.to_string(),
            part_size: plan.part_size,
        })
    }

    /// Upload one part of a session
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        part_id: usize,
        data: Bytes,
    ) -> UpyunResult<()> {
        let request = self
            .request(Method::PUT, &session.path)
            .header("X-Upyun-Multi-Stage", "upload")?
            .header("X-Upyun-Multi-Uuid", &session.upload_id)?
            .header("X-Upyun-Part-Id", &part_id.to_string())?
            .header("Content-Length", &data.len().to_string())?
            .body(data);

        self.send(request)
            .await
            .map_err(|e| e.context(format!("upload part {}", part_id)))?;
        Ok(())
    }

    /// Finish a session, optionally verifying the whole payload MD5
    pub async fn complete_multipart_upload(
        &self,
        session: &UploadSession,
        md5: Option<&str>,
    ) -> UpyunResult<()> {
        let mut request = self
            .request(Method::PUT, &session.path)
            .header("X-Upyun-Multi-Stage", "complete")?
            .header("X-Upyun-Multi-Uuid", &session.upload_id)?;
        if let Some(md5) = md5.filter(|m| !m.is_empty()) {
            request = request.header("X-Upyun-Multi-Md5", md5)?;
        }

        self.send(request)
            .await
            .map_err(|e| e.context("complete multipart"))?;
        Ok(())
    }

    /// List in-progress multipart uploads whose key starts with `prefix`
    pub async fn list_multipart_uploads(
        &self,
        prefix: &str,
        limit: u64,
    ) -> UpyunResult<ListMultipartUploadResult> {
        let mut request = self
            .request(Method::GET, "/")
            .header("X-Upyun-List-Type", "multi")?;
        if !prefix.is_empty() {
            request = request.header("X-Upyun-List-Prefix", &BASE64.encode(prefix))?;
        }
        if limit > 0 {
            request = request.header("X-Upyun-List-Limit", &limit.to_string())?;
        }

        let response = self
            .send(request)
            .await
            .map_err(|e| e.context("list multipart"))?;
        serde_json::from_slice(&response.body)
            .map_err(|e| UpyunError::from(e).context("list multipart read body"))
    }

    /// List the parts already stored for a session, starting at `begin_id`
    pub async fn list_multipart_parts(
        &self,
        session: &UploadSession,
        begin_id: usize,
    ) -> UpyunResult<ListUploadedPartsResult> {
        let mut request = self
            .request(Method::GET, &session.path)
            .header("X-Upyun-Multi-Uuid", &session.upload_id)?;
        if begin_id > 0 {
            request = request.header("X-Upyun-Part-Id", &begin_id.to_string())?;
        }

        let response = self
            .send(request)
            .await
            .map_err(|e| e.context("list multipart parts"))?;
        serde_json::from_slice(&response.body)
            .map_err(|e| UpyunError::from(e).context("list multipart parts read body"))
    }

    /// Upload a local source, switching to a multipart upload for large payloads
    pub async fn put_file<S>(
        &self,
        path: &str,
        source: SharedSource<S>,
        config: &PutConfig,
    ) -> UpyunResult<()>
    where
        S: Read + Seek + Send + 'static,
    {
        self.put_resumable(path, source, None, config).await
    }

    /// Continue a suspended upload whose breakpoint was recorded under `upload_id`
    pub async fn resume_put<S>(
        &self,
        path: &str,
        source: SharedSource<S>,
        upload_id: &str,
        config: &PutConfig,
    ) -> UpyunResult<()>
    where
        S: Read + Seek + Send + 'static,
    {
        let breakpoint = self.breakpoints().get(upload_id).await?.ok_or_else(|| {
            UpyunError::Breakpoint(format!("no breakpoint recorded for upload {}", upload_id))
        })?;
        self.put_resumable(path, source, Some(breakpoint), config)
            .await
    }

    /// Upload with an optional breakpoint to resume from
    ///
    /// Without a breakpoint, payloads below the resumable threshold go out as
    /// one PUT; larger ones start a new ordered multipart session.
    pub async fn put_resumable<S>(
        &self,
        path: &str,
        source: SharedSource<S>,
        breakpoint: Option<BreakpointState>,
        config: &PutConfig,
    ) -> UpyunResult<()>
    where
        S: Read + Seek + Send + 'static,
    {
        let settings = self.resolve_put(config);
        let total = source.len();

        let state = match breakpoint {
            Some(state) => {
                self.validate_breakpoint(&source, &state).await?;
                info!(
                    path,
                    upload_id = %state.upload_id,
                    next_part_id = state.next_part_id,
                    max_part_id = state.max_part_id,
                    "Resuming multipart upload"
                );
                state
            }
            None if total < settings.threshold => {
                debug!(path, size = total, "Payload below resumable threshold");
                let data = read_range(&source, 0, total).await?;
                return self.put(path, data, config).await;
            }
            None => {
                let session = self
                    .init_multipart_upload(
                        path,
                        &InitMultipartConfig {
                            content_type: settings.content_type.clone(),
                            content_length: total,
                            part_size: settings.part_size,
                            ordered: true,
                        },
                    )
                    .await?;
                let plan = plan_parts(session.part_size, total)?;
                BreakpointState {
                    upload_id: session.upload_id,
                    next_part_id: 0,
                    part_size: session.part_size,
                    max_part_id: plan.max_part_id(),
                    checksum_enabled: settings.use_md5,
                    pending_fragment_checksum: String::new(),
                }
            }
        };

        let session = UploadSession {
            upload_id: state.upload_id.clone(),
            path: path.to_string(),
            part_size: state.part_size,
        };
        let plan = PartPlan {
            part_size: state.part_size,
            part_count: state.max_part_id as u64 + 1,
        };

        self.upload_parts(&session, &source, &plan, state.next_part_id, &settings)
            .await?;

        let md5 = if settings.use_md5 {
            Some(source_md5(&source, 0, total).await?)
        } else {
            None
        };
        self.complete_multipart_upload(&session, md5.as_deref())
            .await?;
        if let Err(e) = self.breakpoints().remove(&session.upload_id).await {
            warn!(
                upload_id = %session.upload_id,
                error = %e,
                "Upload completed but its breakpoint could not be removed"
            );
        }

        info!(
            path,
            upload_id = %session.upload_id,
            parts = plan.part_count,
            size = total,
            "Multipart upload completed"
        );
        Ok(())
    }

    /// Upload parts `first..=max_part_id` in order
    async fn upload_parts<S>(
        &self,
        session: &UploadSession,
        source: &SharedSource<S>,
        plan: &PartPlan,
        first: usize,
        settings: &ResolvedPut,
    ) -> UpyunResult<()>
    where
        S: Read + Seek + Send + 'static,
    {
        let policy = RetryPolicy::parts(settings.max_tries);

        for part_id in first..=plan.max_part_id() {
            let offset = plan.offset_of(part_id);
            let data = read_range(source, offset, plan.part_size).await?;
            let size = data.len();
            let operation = format!("upload part {}", part_id);
            let mut failures = 0;

            let result = with_retry(&policy, &mut failures, &operation, move || {
                self.upload_part(session, part_id, data.clone())
            })
            .await;

            match result {
                Ok(()) => {
                    debug!(
                        upload_id = %session.upload_id,
                        part_id,
                        size,
                        retries = failures,
                        "Part uploaded"
                    );
                }
                Err(e @ UpyunError::RetriesExhausted { .. }) => {
                    let not_saved = |err: UpyunError| {
                        err.context(format!("{}; breakpoint for part {} not saved", e, part_id))
                    };
                    let checksum = source_md5(source, offset, plan.part_size)
                        .await
                        .map_err(not_saved)?;
                    let state = BreakpointState {
                        upload_id: session.upload_id.clone(),
                        next_part_id: part_id,
                        part_size: plan.part_size,
                        max_part_id: plan.max_part_id(),
                        checksum_enabled: settings.use_md5,
                        pending_fragment_checksum: checksum,
                    };
                    self.breakpoints().set(&state).await.map_err(not_saved)?;

                    warn!(
                        upload_id = %session.upload_id,
                        part_id,
                        attempts = failures,
                        "Multipart upload suspended"
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Reject breakpoints that no longer describe the source
    async fn validate_breakpoint<S>(
        &self,
        source: &SharedSource<S>,
        state: &BreakpointState,
    ) -> UpyunResult<()>
    where
        S: Read + Seek + Send + 'static,
    {
        let inconsistent = || {
            UpyunError::ResumeState(format!(
                "breakpoint for {} is inconsistent: part {} of {}, part size {}",
                state.upload_id, state.next_part_id, state.max_part_id, state.part_size
            ))
        };
        if !state.is_consistent() || state.max_part_id as u64 >= MAX_PART_NUM {
            return Err(inconsistent());
        }

        let lower = (state.max_part_id as u64)
            .checked_mul(state.part_size)
            .ok_or_else(inconsistent)?;
        let upper = lower
            .checked_add(state.part_size)
            .ok_or_else(inconsistent)?;
        if source.len() <= lower {
            return Err(UpyunError::ResumeState("resume target expired".to_string()));
        }
        if source.len() > upper {
            return Err(UpyunError::ResumeState(
                "source has changed since last attempt".to_string(),
            ));
        }

        if state.checksum_enabled && !state.pending_fragment_checksum.is_empty() {
            let offset = (state.next_part_id as u64)
                .checked_mul(state.part_size)
                .ok_or_else(inconsistent)?;
            let checksum = source_md5(source, offset, state.part_size).await?;
            if checksum != state.pending_fragment_checksum {
                warn!(
                    upload_id = %state.upload_id,
                    part_id = state.next_part_id,
                    expected = %state.pending_fragment_checksum,
                    actual = %checksum,
                    "Fragment checksum mismatch"
                );
                return Err(UpyunError::ResumeState(
                    "source has changed since last attempt".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Read a range of the source off the async runtime
async fn read_range<S>(source: &SharedSource<S>, offset: u64, len: u64) -> UpyunResult<Bytes>
where
    S: Read + Seek + Send + 'static,
{
    let mut view = source.fragment(offset, len);
    tokio::task::spawn_blocking(move || view.to_bytes())
        .await
        .map_err(|e| UpyunError::Io(format!("fragment read task failed: {}", e)))?
        .map_err(UpyunError::from)
}

/// Hex MD5 of a range of the source
async fn source_md5<S>(source: &SharedSource<S>, offset: u64, len: u64) -> UpyunResult<String>
where
    S: Read + Seek + Send + 'static,
{
    let mut view = source.fragment(offset, len);
    tokio::task::spawn_blocking(move || view.md5_hex())
        .await
        .map_err(|e| UpyunError::Io(format!("fragment digest task failed: {}", e)))?
        .map_err(UpyunError::from)
}
