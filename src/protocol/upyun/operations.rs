//! UpYun operations trait and implementations

use super::client::UpyunClient;
use super::decoder::object_from_headers;
use super::error::{UpyunError, UpyunResult};
use super::fragment::md5_hex;
use super::multipart::PutConfig;
use super::types::ObjectMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Options for [`UpyunOperations::delete`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteConfig {
    /// Let the service delete in the background
    pub async_delete: bool,

    /// The target is a directory
    pub folder: bool,
}

/// How [`UpyunOperations::modify_metadata`] applies the supplied headers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataOp {
    #[default]
    Merge,
    Replace,
    Delete,
}

impl fmt::Display for MetadataOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            MetadataOp::Merge => "merge",
            MetadataOp::Replace => "replace",
            MetadataOp::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// Trait defining the single-request UpYun operations
#[async_trait]
pub trait UpyunOperations {
    /// Bytes used by the bucket
    async fn usage(&self) -> UpyunResult<u64>;

    /// Create a directory
    async fn mkdir(&self, path: &str) -> UpyunResult<()>;

    /// Download an object into `writer`
    async fn get<W>(&self, path: &str, writer: &mut W) -> UpyunResult<ObjectMetadata>
    where
        W: AsyncWrite + Unpin + Send;

    /// Download an object into a local file, truncating it
    async fn get_to_file(&self, path: &str, local_path: &Path) -> UpyunResult<ObjectMetadata>;

    /// Upload a payload with a single request
    async fn put(&self, path: &str, data: Bytes, config: &PutConfig) -> UpyunResult<()>;

    /// Move an object within the bucket
    async fn move_object(
        &self,
        src: &str,
        dest: &str,
        headers: &HashMap<String, String>,
    ) -> UpyunResult<()>;

    /// Copy an object within the bucket
    async fn copy_object(
        &self,
        src: &str,
        dest: &str,
        headers: &HashMap<String, String>,
    ) -> UpyunResult<()>;

    /// Delete a file or an empty directory
    async fn delete(&self, path: &str, config: DeleteConfig) -> UpyunResult<()>;

    /// Metadata of a file or directory
    async fn get_info(&self, path: &str) -> UpyunResult<ObjectMetadata>;

    /// Update user metadata (`x-upyun-meta-*` headers)
    async fn modify_metadata(
        &self,
        path: &str,
        op: MetadataOp,
        headers: &HashMap<String, String>,
    ) -> UpyunResult<()>;
}

#[async_trait]
impl UpyunOperations for UpyunClient {
    async fn usage(&self) -> UpyunResult<u64> {
        let request = self.request_with_query(Method::GET, "/", "usage");
        let response = self.send(request).await.map_err(|e| e.context("usage"))?;

        let body = String::from_utf8_lossy(&response.body);
        body.trim()
            .parse::<u64>()
            .map_err(|e| UpyunError::Decode(format!("usage body {:?}: {}", body.trim(), e)))
    }

    async fn mkdir(&self, path: &str) -> UpyunResult<()> {
        let request = self
            .request(Method::POST, path)
            .header("folder", "true")?
            .header("x-upyun-folder", "true")?;

        self.send(request)
            .await
            .map_err(|e| e.context(format!("mkdir {}", path)))?;
        debug!(path, "Directory created");
        Ok(())
    }

    async fn get<W>(&self, path: &str, writer: &mut W) -> UpyunResult<ObjectMetadata>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let request = self
            .request(Method::GET, path)
            .header("x-upyun-folder", "false")?;
        let response = self
            .send(request)
            .await
            .map_err(|e| e.context(format!("get {}", path)))?;

        let mut info = object_from_headers(&response.headers, false)?;
        info.name = path.to_string();

        writer.write_all(&response.body).await?;
        writer.flush().await?;
        info.size = response.body.len() as u64;

        Ok(info)
    }

    async fn get_to_file(&self, path: &str, local_path: &Path) -> UpyunResult<ObjectMetadata> {
        let mut file = File::create(local_path)
            .await
            .map_err(|e| UpyunError::from(e).context(format!("create {}", local_path.display())))?;
        self.get(path, &mut file).await
    }

    async fn put(&self, path: &str, data: Bytes, config: &PutConfig) -> UpyunResult<()> {
        let mut request = self.request(Method::PUT, path).headers(&config.headers)?;

        if let Some(content_type) = &config.content_type {
            request = request.header("Content-Type", content_type)?;
        }
        if config.use_md5.unwrap_or(self.config().use_md5)
            && request.header_str("Content-MD5").is_none()
        {
            request = request.header("Content-MD5", &md5_hex(&data))?;
        }

        let size = data.len();
        self.send(request.body(data))
            .await
            .map_err(|e| e.context(format!("put {}", path)))?;
        debug!(path, size, "Object uploaded");
        Ok(())
    }

    async fn move_object(
        &self,
        src: &str,
        dest: &str,
        headers: &HashMap<String, String>,
    ) -> UpyunResult<()> {
        let request = self
            .request(Method::PUT, dest)
            .headers(headers)?
            .header("X-Upyun-Move-Source", &self.source_header(src))?;

        self.send(request)
            .await
            .map_err(|e| e.context(format!("move {} to {}", src, dest)))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src: &str,
        dest: &str,
        headers: &HashMap<String, String>,
    ) -> UpyunResult<()> {
        let request = self
            .request(Method::PUT, dest)
            .headers(headers)?
            .header("X-Upyun-Copy-Source", &self.source_header(src))?;

        self.send(request)
            .await
            .map_err(|e| e.context(format!("copy {} to {}", src, dest)))?;
        Ok(())
    }

    async fn delete(&self, path: &str, config: DeleteConfig) -> UpyunResult<()> {
        let mut request = self.request(Method::DELETE, path);
        if config.async_delete {
            request = request.header("x-upyun-async", "true")?;
        }
        if config.folder {
            request = request.header("x-upyun-folder", "true")?;
        }

        self.send(request)
            .await
            .map_err(|e| e.context(format!("delete {}", path)))?;
        Ok(())
    }

    async fn get_info(&self, path: &str) -> UpyunResult<ObjectMetadata> {
        let response = self
            .send(self.request(Method::HEAD, path))
            .await
            .map_err(|e| e.context(format!("get info {}", path)))?;

        let mut info = object_from_headers(&response.headers, true)?;
        info.name = path.to_string();
        Ok(info)
    }

    async fn modify_metadata(
        &self,
        path: &str,
        op: MetadataOp,
        headers: &HashMap<String, String>,
    ) -> UpyunResult<()> {
        let request = self
            .request_with_query(Method::PATCH, path, &format!("metadata={}", op))
            .headers(headers)?;

        self.send(request)
            .await
            .map_err(|e| e.context(format!("modify metadata {}", path)))?;
        Ok(())
    }
}
