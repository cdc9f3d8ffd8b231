//! In-memory UpYun service for testing
//!
//! [`MockExecutor`] implements [`RequestExecutor`] against an in-memory
//! bucket so the client can be exercised without a network. It understands
//! the REST calls issued by this crate, keeps every request in a log and can
//! inject failures for chosen parts, listing pages or paths.
//!
//! # Example
//!
//! ```rust
//! use upyun::protocol::upyun::{MockExecutor, UpyunClient, UpyunConfig, UpyunOperations};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mock = Arc::new(MockExecutor::new());
//! mock.insert_file("/hello.txt", b"Hello, World!".to_vec());
//!
//! let client = UpyunClient::new(UpyunConfig::new("demo".to_string()), mock.clone())?;
//! let info = client.get_info("/hello.txt").await?;
//! assert_eq!(info.size, 13);
//! # Ok(())
//! # }
//! ```

use super::error::{UpyunError, UpyunResult};
use super::executor::{RequestExecutor, RestRequest, RestResponse};
use super::fragment::md5_hex;
use super::types::{
    ListMultipartUploadResult, ListUploadedPartsResult, MultipartUploadFile, MultipartUploadedPart,
};
use super::TERMINAL_CURSOR;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

const CURSOR_PREFIX: &str = "mock-iter-";
const DEFAULT_PAGE: usize = 50;

/// Failure returned by an injected fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Transport failure, reported as [`UpyunError::Network`]
    Network,
    /// Service response with this status
    Status(u16),
}

/// Requests a fault applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultTarget {
    /// Uploads of this part id, in any session
    Part(usize),
    /// The n-th listing page served (1-based, counted over the mock's lifetime)
    ListingPage(usize),
    /// Any request for this path
    Path(String),
}

#[derive(Debug, Clone)]
struct FaultRule {
    target: FaultTarget,
    fault: Fault,
    remaining: u32,
}

/// A request as received by the mock
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub at: Instant,
    pub request: RestRequest,
}

#[derive(Debug, Clone)]
struct MockEntry {
    data: Bytes,
    is_dir: bool,
    content_type: String,
    metadata: HashMap<String, String>,
    modified: i64,
}

impl MockEntry {
    fn file(data: Bytes, content_type: &str) -> Self {
        Self {
            data,
            is_dir: false,
            content_type: content_type.to_string(),
            metadata: HashMap::new(),
            modified: Utc::now().timestamp(),
        }
    }

    fn dir() -> Self {
        Self {
            data: Bytes::new(),
            is_dir: true,
            content_type: "folder".to_string(),
            metadata: HashMap::new(),
            modified: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone)]
struct MockSession {
    key: String,
    part_size: u64,
    declared_length: Option<u64>,
    content_type: String,
    parts: BTreeMap<usize, Bytes>,
    completed: bool,
    created_at: i64,
}

#[derive(Debug, Default)]
struct MockState {
    entries: BTreeMap<String, MockEntry>,
    sessions: BTreeMap<String, MockSession>,
    faults: Vec<FaultRule>,
    log: Vec<LoggedRequest>,
    part_attempts: HashMap<usize, u32>,
    pages_served: usize,
    uploads_started: u64,
    last_upload_id: Option<String>,
}

/// In-memory UpYun bucket
#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

/// `/a//b/` -> `/a/b`, the root is `/`
fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn parent_of(key: &str) -> Option<String> {
    if key == "/" {
        return None;
    }
    match key.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => None,
    }
}

fn name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Strip the query and the bucket segment, then percent-decode
fn key_from_uri(uri: &str) -> String {
    let path = uri.split('?').next().unwrap_or_default();
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let mut segments = decoded.split('/').filter(|s| !s.is_empty());
    segments.next();
    format!("/{}", segments.collect::<Vec<_>>().join("/"))
}

fn status(code: u16, message: &str) -> RestResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    RestResponse::new(status).with_body(json!({ "code": code, "msg": message }).to_string())
}

fn http_date(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_default()
}

fn flag(request: &RestRequest, name: &str) -> bool {
    request.header_str(name) == Some("true")
}

fn user_metadata(request: &RestRequest) -> Vec<(String, String)> {
    request
        .headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-upyun-meta-")?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

impl MockExecutor {
    /// Create an empty bucket
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a file, creating missing parent directories
    pub fn insert_file(&self, path: &str, data: impl Into<Bytes>) {
        let mut state = self.state();
        state.insert(
            normalize(path),
            MockEntry::file(data.into(), "application/octet-stream"),
        );
    }

    /// Add a directory, creating missing parents
    pub fn insert_dir(&self, path: &str) {
        self.state().insert(normalize(path), MockEntry::dir());
    }

    /// Content of a file
    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.state()
            .entries
            .get(&normalize(path))
            .filter(|e| !e.is_dir)
            .map(|e| e.data.clone())
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state()
            .entries
            .get(&normalize(path))
            .is_some_and(|e| e.is_dir)
    }

    /// Fail the next `times` requests matching `target`
    pub fn inject(&self, target: FaultTarget, fault: Fault, times: u32) {
        self.state().faults.push(FaultRule {
            target,
            fault,
            remaining: times,
        });
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<RestRequest> {
        self.state().log.iter().map(|l| l.request.clone()).collect()
    }

    /// All requests with their arrival time
    pub fn request_log(&self) -> Vec<LoggedRequest> {
        self.state().log.clone()
    }

    /// Forget the request log
    pub fn clear_requests(&self) {
        self.state().log.clear();
    }

    /// Part ids of every part upload request in the log, failed ones included
    pub fn part_requests(&self) -> Vec<usize> {
        self.state()
            .log
            .iter()
            .filter(|l| l.request.header_str("X-Upyun-Multi-Stage") == Some("upload"))
            .filter_map(|l| l.request.header_str("X-Upyun-Part-Id")?.parse().ok())
            .collect()
    }

    /// Upload attempts seen for a part id, across all sessions
    pub fn part_attempts(&self, part_id: usize) -> u32 {
        self.state()
            .part_attempts
            .get(&part_id)
            .copied()
            .unwrap_or(0)
    }

    /// Id of the most recently initiated multipart session
    pub fn last_upload_id(&self) -> Option<String> {
        self.state().last_upload_id.clone()
    }

    /// Parts stored for a session
    pub fn stored_parts(&self, upload_id: &str) -> Vec<usize> {
        self.state()
            .sessions
            .get(upload_id)
            .map(|s| s.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    fn handle(&self, request: RestRequest) -> UpyunResult<RestResponse> {
        let mut state = self.state();
        state.log.push(LoggedRequest {
            at: Instant::now(),
            request: request.clone(),
        });

        let key = key_from_uri(&request.uri);
        if let Some(fault) = state.take_fault(&request, &key) {
            return match fault {
                Fault::Network => Err(UpyunError::Network(format!(
                    "injected failure for {} {}",
                    request.method, request.uri
                ))),
                Fault::Status(code) => Ok(status(code, "injected failure")),
            };
        }

        let stage = request.header_str("X-Upyun-Multi-Stage");
        match request.method {
            Method::GET if request.query() == Some("usage") => Ok(state.usage()),
            Method::GET if request.header_str("X-Upyun-List-Type") == Some("multi") => {
                state.list_sessions(&request)
            }
            Method::GET if request.header_str("X-Upyun-Multi-Uuid").is_some() => {
                state.list_parts(&request)
            }
            Method::GET if flag(&request, "X-UpYun-Folder") => state.list_dir(&key, &request),
            Method::GET => state.get(&key),
            Method::HEAD => state.head(&key),
            Method::POST if flag(&request, "folder") => {
                state.insert(key, MockEntry::dir());
                Ok(RestResponse::ok())
            }
            Method::PUT if stage == Some("initiate") => state.initiate(key, &request),
            Method::PUT if stage == Some("upload") => state.upload_part(&request),
            Method::PUT if stage == Some("complete") => state.complete(&request),
            Method::PUT if request.header_str("X-Upyun-Move-Source").is_some() => {
                state.transfer(&request, "X-Upyun-Move-Source", key, true)
            }
            Method::PUT if request.header_str("X-Upyun-Copy-Source").is_some() => {
                state.transfer(&request, "X-Upyun-Copy-Source", key, false)
            }
            Method::PUT => state.put(key, &request),
            Method::DELETE => state.delete(&key),
            Method::PATCH => state.patch(&key, &request),
            _ => Ok(status(405, "method not allowed")),
        }
    }
}

impl MockState {
    fn insert(&mut self, key: String, entry: MockEntry) {
        let mut parent = parent_of(&key);
        while let Some(dir) = parent {
            parent = parent_of(&dir);
            self.entries.entry(dir).or_insert_with(MockEntry::dir);
        }
        self.entries.insert(key, entry);
    }

    fn take_fault(&mut self, request: &RestRequest, key: &str) -> Option<Fault> {
        let part_id = (request.header_str("X-Upyun-Multi-Stage") == Some("upload"))
            .then(|| request.header_str("X-Upyun-Part-Id"))
            .flatten()
            .and_then(|id| id.parse::<usize>().ok());
        if let Some(id) = part_id {
            *self.part_attempts.entry(id).or_insert(0) += 1;
        }
        let listing_page = (request.method == Method::GET && flag(request, "X-UpYun-Folder"))
            .then_some(self.pages_served + 1);

        let rule = self.faults.iter_mut().find(|rule| {
            rule.remaining > 0
                && match &rule.target {
                    FaultTarget::Part(id) => part_id == Some(*id),
                    FaultTarget::ListingPage(n) => listing_page == Some(*n),
                    FaultTarget::Path(path) => normalize(path) == key,
                }
        })?;
        rule.remaining -= 1;
        Some(rule.fault.clone())
    }

    fn children(&self, dir: &str) -> Vec<(&String, &MockEntry)> {
        self.entries
            .iter()
            .filter(|(key, _)| parent_of(key).as_deref() == Some(dir))
            .collect()
    }

    fn usage(&self) -> RestResponse {
        let used: usize = self.entries.values().map(|e| e.data.len()).sum();
        RestResponse::ok().with_body(used.to_string())
    }

    fn list_dir(&mut self, key: &str, request: &RestRequest) -> UpyunResult<RestResponse> {
        if !self.entries.get(key).is_some_and(|e| e.is_dir) && key != "/" {
            return Ok(status(404, "directory not found"));
        }

        let offset = match request.header_str("x-list-iter") {
            None => 0,
            Some(cursor) => match cursor
                .strip_prefix(CURSOR_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
            {
                Some(offset) => offset,
                None => return Ok(status(400, "invalid iter")),
            },
        };
        let limit = request
            .header_str("X-List-Limit")
            .and_then(|l| l.parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE);

        let mut children = self.children(key);
        if request.header_str("X-List-Order") == Some("desc") {
            children.reverse();
        }

        let total = children.len();
        let files: Vec<_> = children
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(path, entry)| {
                json!({
                    "name": name_of(path),
                    "type": if entry.is_dir { "folder" } else { entry.content_type.as_str() },
                    "length": entry.data.len(),
                    "last_modified": entry.modified,
                    "etag": if entry.is_dir { String::new() } else { md5_hex(&entry.data) },
                })
            })
            .collect();

        let next = offset + limit;
        let iter = if next >= total {
            TERMINAL_CURSOR.to_string()
        } else {
            format!("{}{}", CURSOR_PREFIX, next)
        };

        self.pages_served += 1;
        Ok(RestResponse::ok().with_body(json!({ "files": files, "iter": iter }).to_string()))
    }

    fn get(&self, key: &str) -> UpyunResult<RestResponse> {
        let entry = match self.entries.get(key) {
            Some(entry) if !entry.is_dir => entry,
            _ => return Ok(status(404, "file not found")),
        };

        let mut response = RestResponse::ok()
            .with_header("Content-Length", &entry.data.len().to_string())?
            .with_header("Content-Type", &entry.content_type)?
            .with_header("ETag", &format!("\"{}\"", md5_hex(&entry.data)))?
            .with_header("Last-Modified", &http_date(entry.modified))?;
        for (name, value) in &entry.metadata {
            response = response.with_header(&format!("x-upyun-meta-{}", name), value)?;
        }
        Ok(response.with_body(entry.data.clone()))
    }

    fn head(&self, key: &str) -> UpyunResult<RestResponse> {
        let entry = match self.entries.get(key) {
            Some(entry) => entry,
            None => return Ok(status(404, "file not found")),
        };

        let mut response = RestResponse::ok()
            .with_header("x-upyun-file-type", if entry.is_dir { "folder" } else { "file" })?
            .with_header("x-upyun-file-size", &entry.data.len().to_string())?
            .with_header("x-upyun-file-date", &entry.modified.to_string())?;
        if !entry.is_dir {
            response = response
                .with_header("Content-Type", &entry.content_type)?
                .with_header("Content-Md5", &md5_hex(&entry.data))?;
        }
        for (name, value) in &entry.metadata {
            response = response.with_header(&format!("x-upyun-meta-{}", name), value)?;
        }
        Ok(response)
    }

    fn put(&mut self, key: String, request: &RestRequest) -> UpyunResult<RestResponse> {
        if self.entries.get(&key).is_some_and(|e| e.is_dir) {
            return Ok(status(409, "path is a directory"));
        }
        if let Some(expected) = request.header_str("Content-MD5") {
            if expected != md5_hex(&request.body) {
                return Ok(status(400, "content md5 mismatch"));
            }
        }

        let content_type = request
            .header_str("Content-Type")
            .unwrap_or("application/octet-stream");
        let mut entry = MockEntry::file(request.body.clone(), content_type);
        entry.metadata.extend(user_metadata(request));
        self.insert(key, entry);
        Ok(RestResponse::ok())
    }

    fn transfer(
        &mut self,
        request: &RestRequest,
        header: &str,
        dest: String,
        remove_source: bool,
    ) -> UpyunResult<RestResponse> {
        let source = key_from_uri(request.header_str(header).unwrap_or_default());
        let entry = match self.entries.get(&source) {
            Some(entry) if !entry.is_dir => entry.clone(),
            _ => return Ok(status(404, "source not found")),
        };

        if remove_source {
            self.entries.remove(&source);
        }
        self.insert(dest, entry);
        Ok(RestResponse::ok())
    }

    fn delete(&mut self, key: &str) -> UpyunResult<RestResponse> {
        match self.entries.get(key) {
            None => return Ok(status(404, "file not found")),
            Some(entry) if entry.is_dir && !self.children(key).is_empty() => {
                return Ok(status(403, "directory not empty"))
            }
            Some(_) => {}
        }
        self.entries.remove(key);
        Ok(RestResponse::ok())
    }

    fn patch(&mut self, key: &str, request: &RestRequest) -> UpyunResult<RestResponse> {
        let op = request
            .query()
            .and_then(|q| q.strip_prefix("metadata="))
            .unwrap_or("merge")
            .to_string();
        let updates = user_metadata(request);
        let entry = match self.entries.get_mut(key) {
            Some(entry) => entry,
            None => return Ok(status(404, "file not found")),
        };

        match op.as_str() {
            "merge" => entry.metadata.extend(updates),
            "replace" => entry.metadata = updates.into_iter().collect(),
            "delete" => {
                for (name, _) in updates {
                    entry.metadata.remove(&name);
                }
            }
            _ => return Ok(status(400, "unknown metadata operation")),
        }
        Ok(RestResponse::ok())
    }

    fn initiate(&mut self, key: String, request: &RestRequest) -> UpyunResult<RestResponse> {
        let part_size = match request
            .header_str("X-Upyun-Multi-Part-Size")
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(size) if size > 0 => size,
            _ => return Ok(status(400, "invalid part size")),
        };

        self.uploads_started += 1;
        let upload_id = format!("mock-upload-{}", self.uploads_started);
        self.sessions.insert(
            upload_id.clone(),
            MockSession {
                key,
                part_size,
                declared_length: request
                    .header_str("X-Upyun-Multi-Length")
                    .and_then(|s| s.parse().ok()),
                content_type: request
                    .header_str("X-Upyun-Multi-Type")
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                parts: BTreeMap::new(),
                completed: false,
                created_at: Utc::now().timestamp(),
            },
        );
        self.last_upload_id = Some(upload_id.clone());

        RestResponse::ok().with_header("X-Upyun-Multi-Uuid", &upload_id)
    }

    fn session_mut(&mut self, request: &RestRequest) -> Option<&mut MockSession> {
        let upload_id = request.header_str("X-Upyun-Multi-Uuid")?;
        self.sessions.get_mut(upload_id).filter(|s| !s.completed)
    }

    fn upload_part(&mut self, request: &RestRequest) -> UpyunResult<RestResponse> {
        let part_id = match request
            .header_str("X-Upyun-Part-Id")
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(id) => id,
            None => return Ok(status(400, "invalid part id")),
        };
        if request.header_str("Content-Length") != Some(request.body.len().to_string().as_str()) {
            return Ok(status(400, "content length mismatch"));
        }

        let session = match self.session_mut(request) {
            Some(session) => session,
            None => return Ok(status(404, "upload not found")),
        };
        if request.body.len() as u64 > session.part_size {
            return Ok(status(400, "part too large"));
        }
        session.parts.insert(part_id, request.body.clone());
        Ok(RestResponse::ok())
    }

    fn complete(&mut self, request: &RestRequest) -> UpyunResult<RestResponse> {
        let session = match self.session_mut(request) {
            Some(session) => session,
            None => return Ok(status(404, "upload not found")),
        };

        let contiguous = session.parts.keys().copied().eq(0..session.parts.len());
        if !contiguous {
            return Ok(status(400, "missing parts"));
        }

        let mut body = BytesMut::new();
        for part in session.parts.values() {
            body.extend_from_slice(part);
        }
        let body = body.freeze();

        if session
            .declared_length
            .is_some_and(|len| len != body.len() as u64)
        {
            return Ok(status(400, "length mismatch"));
        }
        if let Some(expected) = request.header_str("X-Upyun-Multi-Md5") {
            if expected != md5_hex(&body) {
                return Ok(status(400, "md5 mismatch"));
            }
        }

        session.completed = true;
        let key = session.key.clone();
        let content_type = session.content_type.clone();
        self.insert(key, MockEntry::file(body, &content_type));
        Ok(RestResponse::ok())
    }

    fn list_sessions(&self, request: &RestRequest) -> UpyunResult<RestResponse> {
        let prefix = match request.header_str("X-Upyun-List-Prefix") {
            Some(encoded) => {
                let raw = BASE64
                    .decode(encoded)
                    .map_err(|e| UpyunError::Decode(e.to_string()))?;
                String::from_utf8_lossy(&raw).into_owned()
            }
            None => String::new(),
        };
        let limit = request
            .header_str("X-Upyun-List-Limit")
            .and_then(|l| l.parse::<usize>().ok())
            .unwrap_or(usize::MAX);

        let files = self
            .sessions
            .iter()
            .filter(|(_, s)| s.key.starts_with(&prefix))
            .take(limit)
            .map(|(uuid, s)| MultipartUploadFile {
                key: s.key.clone(),
                uuid: uuid.clone(),
                completed: s.completed,
                created_at: s.created_at,
            })
            .collect();

        let body = serde_json::to_vec(&ListMultipartUploadResult { files })?;
        Ok(RestResponse::ok().with_body(body))
    }

    fn list_parts(&self, request: &RestRequest) -> UpyunResult<RestResponse> {
        let session = match request
            .header_str("X-Upyun-Multi-Uuid")
            .and_then(|id| self.sessions.get(id))
        {
            Some(session) => session,
            None => return Ok(status(404, "upload not found")),
        };
        let begin = request
            .header_str("X-Upyun-Part-Id")
            .and_then(|id| id.parse::<usize>().ok())
            .unwrap_or(0);

        let parts = session
            .parts
            .range(begin..)
            .map(|(id, data)| MultipartUploadedPart {
                etag: md5_hex(data),
                size: data.len() as u64,
                id: *id,
            })
            .collect();

        let body = serde_json::to_vec(&ListUploadedPartsResult { parts })?;
        Ok(RestResponse::ok().with_body(body))
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    async fn execute(&self, request: RestRequest) -> UpyunResult<RestResponse> {
        tokio::task::yield_now().await;
        self.handle(request)
    }
}
