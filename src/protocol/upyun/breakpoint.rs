//! Breakpoint persistence for suspended multipart uploads
//!
//! The orchestrator only needs `get` and `set`. Callers are expected to
//! serialise access per upload session; neither store below locks across
//! calls beyond what its own storage needs.

use super::error::{UpyunError, UpyunResult};
use super::types::BreakpointState;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Characters kept as-is in breakpoint file names
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Storage for [`BreakpointState`] keyed by upload id
#[async_trait]
pub trait BreakpointStore: Send + Sync {
    /// Load the breakpoint of an upload, `None` if nothing was recorded
    async fn get(&self, upload_id: &str) -> UpyunResult<Option<BreakpointState>>;

    /// Record a breakpoint, replacing any previous one for the same upload
    async fn set(&self, state: &BreakpointState) -> UpyunResult<()>;

    /// Forget a breakpoint once its upload completed
    async fn remove(&self, _upload_id: &str) -> UpyunResult<()> {
        Ok(())
    }
}

/// Process-local breakpoint store
#[derive(Debug, Default)]
pub struct MemoryBreakpointStore {
    states: RwLock<HashMap<String, BreakpointState>>,
}

impl MemoryBreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored breakpoints
    pub fn len(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> UpyunError {
    UpyunError::Breakpoint("breakpoint map lock poisoned".to_string())
}

#[async_trait]
impl BreakpointStore for MemoryBreakpointStore {
    async fn get(&self, upload_id: &str) -> UpyunResult<Option<BreakpointState>> {
        let states = self.states.read().map_err(|_| poisoned())?;
        Ok(states.get(upload_id).cloned())
    }

    async fn set(&self, state: &BreakpointState) -> UpyunResult<()> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        states.insert(state.upload_id.clone(), state.clone());
        Ok(())
    }

    async fn remove(&self, upload_id: &str) -> UpyunResult<()> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        states.remove(upload_id);
        Ok(())
    }
}

/// Breakpoints stored as JSON files, one per upload, in a directory
///
/// Writes go to a temporary file that is renamed over the final path so a
/// crash never leaves a half-written breakpoint behind.
#[derive(Debug, Clone)]
pub struct FileBreakpointStore {
    dir: PathBuf,
}

impl FileBreakpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the breakpoint files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File used for an upload id
    ///
    /// The id is percent-encoded, so distinct ids never share a file.
    pub fn path_for(&self, upload_id: &str) -> PathBuf {
        let name = utf8_percent_encode(upload_id, FILE_NAME);
        self.dir.join(format!("{}.breakpoint.json", name))
    }
}

#[async_trait]
impl BreakpointStore for FileBreakpointStore {
    async fn get(&self, upload_id: &str) -> UpyunResult<Option<BreakpointState>> {
        let path = self.path_for(upload_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(UpyunError::Breakpoint(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let state: BreakpointState = serde_json::from_str(&content).map_err(|e| {
            UpyunError::Breakpoint(format!("parse {}: {}", path.display(), e))
        })?;
        if state.upload_id != upload_id {
            return Err(UpyunError::Breakpoint(format!(
                "{} holds upload {}, expected {}",
                path.display(),
                state.upload_id,
                upload_id
            )));
        }
        Ok(Some(state))
    }

    async fn set(&self, state: &BreakpointState) -> UpyunResult<()> {
        let path = self.path_for(&state.upload_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| UpyunError::Breakpoint(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| UpyunError::Breakpoint(format!("create {}: {}", self.dir.display(), e)))?;
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| UpyunError::Breakpoint(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| UpyunError::Breakpoint(format!("rename {}: {}", path.display(), e)))?;

        debug!(upload_id = %state.upload_id, path = %path.display(), "Breakpoint saved");
        Ok(())
    }

    async fn remove(&self, upload_id: &str) -> UpyunResult<()> {
        match tokio::fs::remove_file(self.path_for(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpyunError::Breakpoint(e.to_string())),
        }
    }
}
