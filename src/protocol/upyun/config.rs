//! Configuration types for the UpYun client

use super::error::{UpyunError, UpyunResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// UpYun client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpyunConfig {
    /// Service (bucket) name
    pub bucket: String,

    /// Part size for resumable uploads, 0 selects the default (1 MiB)
    pub part_size: u64,

    /// Payloads below this size are sent with a single PUT
    pub resumable_threshold: u64,

    /// Attempts per part before the upload is suspended, 0 = unbounded
    pub max_resume_put_tries: u32,

    /// Send Content-MD5 / whole file MD5 and verify fragments on resume
    pub use_md5: bool,

    /// Attempts for listing requests on transient failures, 0 = unbounded
    pub max_list_tries: u32,

    /// Page size hint for recursive listings
    pub list_page_size: usize,

    /// Default page size for single page listings
    pub paged_list_limit: usize,

    /// Capacity of the traversal output queue
    pub queue_capacity: usize,

    /// Fixed delay between listing retries, in milliseconds
    pub list_retry_delay_ms: u64,
}

impl Default for UpyunConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl UpyunConfig {
    /// Create a new config with required parameters
    pub fn new(bucket: String) -> Self {
        Self {
            bucket,
            part_size: super::DEFAULT_PART_SIZE,
            resumable_threshold: super::MIN_RESUME_PUT_FILE_SIZE,
            max_resume_put_tries: 3,
            use_md5: false,
            max_list_tries: super::MAX_LIST_TRIES,
            list_page_size: super::DEFAULT_TRAVERSAL_PAGE_SIZE,
            paged_list_limit: super::DEFAULT_LIMIT,
            queue_capacity: 256,
            list_retry_delay_ms: 10,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> UpyunResult<()> {
        if self.bucket.is_empty() {
            return Err(UpyunError::Validation(
                "Bucket name cannot be empty".to_string(),
            ));
        }

        if self.bucket.contains('/') {
            return Err(UpyunError::Validation(format!(
                "Invalid bucket name: {}",
                self.bucket
            )));
        }

        if self.part_size != 0 && self.part_size % super::DEFAULT_PART_SIZE != 0 {
            return Err(UpyunError::Validation(format!(
                "Part size {} must be a multiple of {}",
                self.part_size,
                super::DEFAULT_PART_SIZE
            )));
        }

        if self.list_page_size == 0 || self.list_page_size > super::MAX_LIMIT {
            return Err(UpyunError::Validation(format!(
                "List page size {} must be between 1 and {}",
                self.list_page_size,
                super::MAX_LIMIT
            )));
        }

        if self.queue_capacity == 0 {
            return Err(UpyunError::Validation(
                "Queue capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> UpyunResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: UpyunConfig = toml::from_str(&contents)
            .map_err(|e| UpyunError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> UpyunResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| UpyunError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Builder for [`UpyunConfig`]
#[derive(Debug, Clone)]
pub struct UpyunConfigBuilder {
    config: UpyunConfig,
}

impl UpyunConfigBuilder {
    /// Create a new builder with the bucket name
    pub fn new(bucket: String) -> Self {
        Self {
            config: UpyunConfig::new(bucket),
        }
    }

    pub fn part_size(mut self, size: u64) -> Self {
        self.config.part_size = size;
        self
    }

    pub fn resumable_threshold(mut self, size: u64) -> Self {
        self.config.resumable_threshold = size;
        self
    }

    pub fn max_resume_put_tries(mut self, tries: u32) -> Self {
        self.config.max_resume_put_tries = tries;
        self
    }

    pub fn use_md5(mut self, enabled: bool) -> Self {
        self.config.use_md5 = enabled;
        self
    }

    pub fn max_list_tries(mut self, tries: u32) -> Self {
        self.config.max_list_tries = tries;
        self
    }

    pub fn list_page_size(mut self, size: usize) -> Self {
        self.config.list_page_size = size;
        self
    }

    pub fn paged_list_limit(mut self, limit: usize) -> Self {
        self.config.paged_list_limit = limit;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn list_retry_delay_ms(mut self, delay: u64) -> Self {
        self.config.list_retry_delay_ms = delay;
        self
    }

    /// Build the configuration
    pub fn build(self) -> UpyunResult<UpyunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
