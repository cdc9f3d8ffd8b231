//! Type definitions for UpYun operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Validated part layout for one multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartPlan {
    /// Size of every part except possibly the last one
    pub part_size: u64,

    /// Number of parts needed to cover the payload
    pub part_count: u64,
}

impl PartPlan {
    /// Highest part id (ids are zero based)
    pub fn max_part_id(&self) -> usize {
        self.part_count.saturating_sub(1) as usize
    }

    /// Byte offset of a part
    pub fn offset_of(&self, part_id: usize) -> u64 {
        part_id as u64 * self.part_size
    }
}

/// A multipart session returned by the init call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Session identifier (`X-Upyun-Multi-Uuid`)
    pub upload_id: String,

    /// Remote path being written
    pub path: String,

    /// Part size agreed at init time
    pub part_size: u64,
}

/// Persisted state for a suspended multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointState {
    /// Upload session identifier
    pub upload_id: String,

    /// First part that still has to be uploaded
    pub next_part_id: usize,

    /// Part size of the session
    pub part_size: u64,

    /// Last part id of the session
    pub max_part_id: usize,

    /// Whether the pending fragment checksum must be verified on resume
    pub checksum_enabled: bool,

    /// MD5 of the fragment at `next_part_id` when the upload was suspended
    pub pending_fragment_checksum: String,
}

impl BreakpointState {
    /// Check `0 <= next_part_id <= max_part_id`
    pub fn is_consistent(&self) -> bool {
        self.next_part_id <= self.max_part_id && self.part_size > 0
    }

    /// Number of parts still to upload
    pub fn remaining_parts(&self) -> usize {
        if self.next_part_id > self.max_part_id {
            0
        } else {
            (self.max_part_id - self.next_part_id).saturating_add(1)
        }
    }
}

/// Metadata of a remote file or directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Name, or path relative to the listing root
    pub name: String,

    /// Size in bytes
    pub size: u64,

    /// Content type, `folder` for directories in listings
    pub content_type: String,

    /// Whether the entry is a directory
    pub is_dir: bool,

    /// MD5 / ETag reported by the service
    pub checksum: String,

    /// Last modification time
    pub mod_time: Option<DateTime<Utc>>,

    /// User metadata (`x-upyun-meta-*`)
    pub metadata: HashMap<String, String>,

    /// Set by the traversal when a directory had no descendants
    pub empty_dir: bool,
}

/// One decoded listing page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Continuation cursor returned with the page
    pub cursor: String,

    /// Entries in service order
    pub entries: Vec<ObjectMetadata>,
}

/// Result of a single flat listing call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagedListing {
    /// Entries of this page
    pub entries: Vec<ObjectMetadata>,

    /// Cursor for the next call, `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

impl PagedListing {
    /// Whether more pages are available
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// In-progress multipart upload, as returned by the multi listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUploadFile {
    pub key: String,
    pub uuid: String,
    pub completed: bool,
    pub created_at: i64,
}

/// Body of the multi listing call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMultipartUploadResult {
    #[serde(default)]
    pub files: Vec<MultipartUploadFile>,
}

/// A part already stored for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUploadedPart {
    pub etag: String,
    pub size: u64,
    pub id: usize,
}

/// Body of the part listing call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListUploadedPartsResult {
    #[serde(default)]
    pub parts: Vec<MultipartUploadedPart>,
}
