//! UpYun REST protocol implementation
//!
//! This module drives the two stateful UpYun protocols on top of a pluggable
//! request executor: resumable multipart uploads and cursor-paginated
//! recursive listings. Signing, endpoint resolution and the HTTP transport
//! are supplied by the caller through [`RequestExecutor`].
//!
//! # Features
//!
//! - Multipart uploads with bounded per-part retries and breakpoints
//! - Resume from a persisted [`BreakpointState`] with fragment validation
//! - Depth-bounded recursive listing streamed into a bounded queue
//! - Cooperative cancellation with `tokio_util`'s `CancellationToken`
//! - Single page listings for caller-driven pagination
//!
//! # Examples
//!
//! ## Resumable Upload
//!
//! ```ignore
//! use upyun::protocol::upyun::{PutConfig, SharedSource, UpyunClient, UpyunConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Arc::new(my_signed_http_executor());
//!     let client = UpyunClient::new(UpyunConfig::new("my-bucket".to_string()), executor)?;
//!
//!     let source = SharedSource::open(Path::new("backup.tar"))?;
//!     client
//!         .put_file("/backups/backup.tar", source, &PutConfig::default())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming a Recursive Listing
//!
//! ```ignore
//! use upyun::protocol::upyun::{ListConfig, UpyunClient};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn walk(client: UpyunClient) -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = mpsc::channel(64);
//!     let token = CancellationToken::new();
//!     let config = ListConfig::default().with_max_depth(-1);
//!
//!     let producer = tokio::spawn(async move { client.list("/", config, tx, token).await });
//!     while let Some(entry) = rx.recv().await {
//!         println!("{} {}", entry.name, entry.size);
//!     }
//!     producer.await??;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod listing;
mod multipart;
mod operations;
mod types;

pub mod breakpoint;
pub mod decoder;
pub mod executor;
pub mod fragment;
pub mod mock;
pub mod planner;
pub mod recovery;

#[cfg(test)]
mod tests;

// Re-export main types
pub use client::{bucket_uri, join_path, UpyunClient};
pub use config::{UpyunConfig, UpyunConfigBuilder};
pub use error::{UpyunError, UpyunResult};
pub use types::{
    BreakpointState, ListMultipartUploadResult, ListUploadedPartsResult, ListingPage,
    MultipartUploadFile, MultipartUploadedPart, ObjectMetadata, PagedListing, PartPlan,
    UploadSession,
};

pub use breakpoint::{BreakpointStore, FileBreakpointStore, MemoryBreakpointStore};
pub use decoder::{JsonListingDecoder, ListingDecoder};
pub use executor::{RequestExecutor, RestRequest, RestResponse};
pub use fragment::{FragmentView, SharedSource};
pub use listing::{ListConfig, PagedListConfig};
pub use mock::MockExecutor;
pub use multipart::{InitMultipartConfig, PutConfig};
pub use operations::{DeleteConfig, MetadataOp, UpyunOperations};
pub use planner::plan_parts;

use std::time::Duration;

/// Base unit and default size of a multipart part (1 MiB)
pub const DEFAULT_PART_SIZE: u64 = 1024 * 1024;

/// Maximum number of parts in one multipart session
pub const MAX_PART_NUM: u64 = 10_000;

/// Payloads smaller than this are sent with a single PUT
pub const MIN_RESUME_PUT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default attempts for a listing request
pub const MAX_LIST_TRIES: u32 = 5;

/// Largest page a single listing call may ask for
pub const MAX_LIMIT: usize = 4096;

/// Page size of a single listing call when none (or an invalid one) is given
pub const DEFAULT_LIMIT: usize = 256;

/// Page size hint used by the recursive traversal
pub const DEFAULT_TRAVERSAL_PAGE_SIZE: usize = 50;

/// Fixed delay between listing retries
pub const LIST_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Cursor value meaning "no further pages"
pub const TERMINAL_CURSOR: &str = "g2gCZAAEbmV4dGQAA2VvZg";
