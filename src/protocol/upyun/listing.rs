//! Directory listings
//!
//! [`UpyunClient::list`] walks a directory tree depth first and streams every
//! entry into a bounded channel, children before their directory.
//! [`UpyunClient::list_objects`] fetches a single page and leaves pagination
//! to the caller.

use super::client::{join_path, UpyunClient};
use super::error::UpyunResult;
use super::recovery::{with_retry, RetryPolicy};
use super::types::{ListingPage, ObjectMetadata, PagedListing};
use super::{DEFAULT_LIMIT, MAX_LIMIT, MAX_LIST_TRIES, TERMINAL_CURSOR};
use futures::future::BoxFuture;
use http::Method;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Options for a recursive listing
#[derive(Debug, Clone)]
pub struct ListConfig {
    /// Entries requested per page; 0 uses the client configuration,
    /// anything above 4096 selects 256
    pub page_size: usize,

    /// Ask the service for descending order
    pub descending: bool,

    /// Levels to visit: 1 lists the root only, -1 is unlimited
    pub max_depth: i32,

    /// Stop after this many entries, 0 = unlimited
    pub max_objects: u64,

    /// Transient failures tolerated over the whole traversal, `None` uses
    /// the client configuration and 0 is unbounded
    pub max_list_tries: Option<u32>,

    /// Extra request headers
    pub headers: HashMap<String, String>,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            page_size: 0,
            descending: false,
            max_depth: 1,
            max_objects: 0,
            max_list_tries: None,
            headers: HashMap::new(),
        }
    }
}

impl ListConfig {
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn with_max_depth(mut self, depth: i32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_objects(mut self, count: u64) -> Self {
        self.max_objects = count;
        self
    }

    pub fn with_max_list_tries(mut self, tries: u32) -> Self {
        self.max_list_tries = Some(tries);
        self
    }

    /// Whether a directory found at `depth` is descended into
    fn descends_from(&self, depth: usize) -> bool {
        self.max_depth == -1 || (depth as i64 + 1) < self.max_depth as i64
    }
}

/// Options for a single page listing
#[derive(Debug, Clone, Default)]
pub struct PagedListConfig {
    /// Cursor returned by the previous page, `None` for the first page
    pub cursor: Option<String>,

    /// Ask the service for descending order
    pub descending: bool,

    /// Page size; 0 uses the client configuration, anything above 4096
    /// selects 256
    pub limit: usize,

    /// Attempts on transient failures, 0 selects 5
    pub max_list_tries: u32,

    /// Extra request headers
    pub headers: HashMap<String, String>,
}

impl PagedListConfig {
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    fn effective_limit(&self, fallback: usize) -> usize {
        clamp_limit(self.limit, fallback)
    }

    fn effective_tries(&self) -> u32 {
        if self.max_list_tries == 0 {
            MAX_LIST_TRIES
        } else {
            self.max_list_tries
        }
    }
}

/// Counters threaded through the recursive walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TraversalState {
    objects_emitted: u64,
    retry_count: u32,
    depth: usize,
    name_prefix: String,
}

impl TraversalState {
    fn child(&self, name: &str) -> Self {
        Self {
            objects_emitted: self.objects_emitted,
            retry_count: self.retry_count,
            depth: self.depth + 1,
            name_prefix: join_path(&self.name_prefix, name),
        }
    }

    fn absorb(&mut self, child: &TraversalState) {
        self.objects_emitted = child.objects_emitted;
        self.retry_count = child.retry_count;
    }
}

/// Whether the walk goes on after a level returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Per-request listing parameters
struct PageRequest<'a> {
    path: &'a str,
    cursor: Option<&'a str>,
    limit: usize,
    descending: bool,
    headers: &'a HashMap<String, String>,
}

/// Page size to request: 0 takes `fallback`, out of range selects 256
fn clamp_limit(limit: usize, fallback: usize) -> usize {
    let limit = if limit == 0 { fallback } else { limit };
    if limit == 0 || limit > MAX_LIMIT {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

fn is_terminal(cursor: &str) -> bool {
    cursor.is_empty() || cursor == TERMINAL_CURSOR
}

impl UpyunClient {
    /// Walk `path` and send every entry to `output`
    ///
    /// Returns once the tree is exhausted, `max_objects` entries were sent,
    /// `cancel` fired or the receiver went away. The sender is dropped on
    /// return, which closes the channel for the consumer.
    pub async fn list(
        &self,
        path: &str,
        config: ListConfig,
        output: Sender<ObjectMetadata>,
        cancel: CancellationToken,
    ) -> UpyunResult<()> {
        let mut config = config;
        config.page_size = clamp_limit(config.page_size, self.config().list_page_size);
        let tries = config
            .max_list_tries
            .unwrap_or(self.config().max_list_tries);
        let policy = RetryPolicy::listing(tries)
            .with_delay(Duration::from_millis(self.config().list_retry_delay_ms));
        let mut state = TraversalState::default();

        let result = self
            .list_level(path.to_string(), &config, &policy, &output, &cancel, &mut state)
            .await;
        drop(output);

        let flow = result?;
        info!(
            path,
            objects = state.objects_emitted,
            retries = state.retry_count,
            stopped = flow == Flow::Stop,
            "Listing finished"
        );
        Ok(())
    }

    fn list_level<'a>(
        &'a self,
        path: String,
        config: &'a ListConfig,
        policy: &'a RetryPolicy,
        output: &'a Sender<ObjectMetadata>,
        cancel: &'a CancellationToken,
        state: &'a mut TraversalState,
    ) -> BoxFuture<'a, UpyunResult<Flow>> {
        Box::pin(async move {
            let mut cursor: Option<String> = None;

            loop {
                let request = PageRequest {
                    path: &path,
                    cursor: cursor.as_deref(),
                    limit: config.page_size,
                    descending: config.descending,
                    headers: &config.headers,
                };
                let page = self
                    .fetch_page(&request, policy, &mut state.retry_count)
                    .await?;
                debug!(
                    path = %path,
                    depth = state.depth,
                    entries = page.entries.len(),
                    "Fetched listing page"
                );

                for mut entry in page.entries {
                    if entry.is_dir && config.descends_from(state.depth) {
                        let before = state.objects_emitted;
                        let mut child = state.child(&entry.name);
                        let flow = self
                            .list_level(
                                join_path(&path, &entry.name),
                                config,
                                policy,
                                output,
                                cancel,
                                &mut child,
                            )
                            .await?;
                        state.absorb(&child);
                        if flow == Flow::Stop {
                            return Ok(Flow::Stop);
                        }
                        entry.empty_dir = before == state.objects_emitted;
                    }

                    if !state.name_prefix.is_empty() {
                        entry.name = join_path(&state.name_prefix, &entry.name);
                    }

                    if cancel.is_cancelled() {
                        debug!(path = %path, "Listing cancelled");
                        return Ok(Flow::Stop);
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(path = %path, "Listing cancelled while waiting on consumer");
                            return Ok(Flow::Stop);
                        }
                        sent = output.send(entry) => {
                            if sent.is_err() {
                                debug!(path = %path, "Listing receiver dropped");
                                return Ok(Flow::Stop);
                            }
                        }
                    }

                    state.objects_emitted += 1;
                    if config.max_objects > 0 && state.objects_emitted >= config.max_objects {
                        return Ok(Flow::Stop);
                    }
                }

                if is_terminal(&page.cursor) {
                    return Ok(Flow::Continue);
                }
                cursor = Some(page.cursor);
            }
        })
    }

    /// Spawn [`UpyunClient::list`] on a queue sized by `queue_capacity`
    pub fn spawn_list(
        &self,
        path: &str,
        config: ListConfig,
        cancel: CancellationToken,
    ) -> (Receiver<ObjectMetadata>, JoinHandle<UpyunResult<()>>) {
        let (tx, rx) = mpsc::channel(self.config().queue_capacity);
        let client = self.clone();
        let path = path.to_string();
        let handle = tokio::spawn(async move { client.list(&path, config, tx, cancel).await });
        (rx, handle)
    }

    /// List one page of `path`
    pub async fn list_objects(
        &self,
        path: &str,
        config: &PagedListConfig,
    ) -> UpyunResult<PagedListing> {
        let policy = RetryPolicy::listing(config.effective_tries())
            .with_delay(Duration::from_millis(self.config().list_retry_delay_ms));
        let request = PageRequest {
            path,
            cursor: config.cursor.as_deref(),
            limit: config.effective_limit(self.config().paged_list_limit),
            descending: config.descending,
            headers: &config.headers,
        };

        let mut failures = 0;
        let page = self.fetch_page(&request, &policy, &mut failures).await?;

        let next_cursor = if is_terminal(&page.cursor) {
            None
        } else {
            Some(page.cursor)
        };
        Ok(PagedListing {
            entries: page.entries,
            next_cursor,
        })
    }

    /// Fetch and decode one listing page, retrying transient failures
    async fn fetch_page(
        &self,
        page: &PageRequest<'_>,
        policy: &RetryPolicy,
        failures: &mut u32,
    ) -> UpyunResult<ListingPage> {
        let operation = format!("list {}", page.path);
        let op = operation.as_str();

        with_retry(policy, failures, op, move || async move {
            let mut request = self
                .request(Method::GET, page.path)
                .headers(page.headers)?
                .header("X-List-Limit", &page.limit.to_string())?
                .header("X-UpYun-Folder", "true")?
                .header("Accept", "application/json")?;
            if page.descending {
                request = request.header("X-List-Order", "desc")?;
            }
            if let Some(cursor) = page.cursor {
                request = request.header("x-list-iter", cursor)?;
            }

            let response = self
                .send(request)
                .await
                .map_err(|e| e.context(op))?;
            self.decoder().decode(&response.body)
        })
        .await
    }
}
