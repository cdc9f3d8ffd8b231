/*!
 * UpYun - resumable transfers and listings for UpYun object storage
 *
 * A client library for the UpYun REST API with:
 * - Multipart uploads that suspend to a breakpoint and resume later
 * - Depth-bounded recursive listings streamed through a bounded queue
 * - Cooperative cancellation of listings
 * - Single page listings for caller-driven pagination
 * - Pluggable request executor, listing decoder and breakpoint store
 */

pub mod logging;
pub mod protocol;

// Re-export commonly used types
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use protocol::upyun::{
    BreakpointState, BreakpointStore, ListConfig, ObjectMetadata, PagedListConfig, PutConfig,
    RequestExecutor, UpyunClient, UpyunConfig, UpyunError, UpyunOperations, UpyunResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
