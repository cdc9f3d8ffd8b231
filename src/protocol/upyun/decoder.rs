//! Listing body decoding and header parsing

use super::error::{UpyunError, UpyunResult};
use super::types::{ListingPage, ObjectMetadata};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;

pub const X_UPYUN_FILE_TYPE: &str = "x-upyun-file-type";
pub const X_UPYUN_FILE_SIZE: &str = "x-upyun-file-size";
pub const X_UPYUN_FILE_DATE: &str = "x-upyun-file-date";
pub const X_UPYUN_META_PREFIX: &str = "x-upyun-meta-";

/// Decodes a raw listing body into a cursor and ordered entries
pub trait ListingDecoder: Send + Sync {
    fn decode(&self, body: &[u8]) -> UpyunResult<ListingPage>;
}

#[derive(Debug, Deserialize)]
struct ListBody {
    #[serde(default)]
    iter: String,
    #[serde(default)]
    files: Vec<ListFile>,
}

#[derive(Debug, Deserialize)]
struct ListFile {
    name: String,
    #[serde(rename = "type", default)]
    type_field: String,
    #[serde(default)]
    length: u64,
    #[serde(default)]
    last_modified: i64,
    #[serde(default)]
    etag: String,
}

/// Decoder for the JSON body returned with `Accept: application/json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonListingDecoder;

impl ListingDecoder for JsonListingDecoder {
    fn decode(&self, body: &[u8]) -> UpyunResult<ListingPage> {
        let parsed: ListBody = serde_json::from_slice(body)?;

        let entries = parsed
            .files
            .into_iter()
            .map(|f| ObjectMetadata {
                is_dir: f.type_field == "folder",
                name: f.name,
                size: f.length,
                content_type: f.type_field,
                checksum: f.etag,
                mod_time: DateTime::<Utc>::from_timestamp(f.last_modified, 0),
                metadata: HashMap::new(),
                empty_dir: false,
            })
            .collect();

        Ok(ListingPage {
            cursor: parsed.iter,
            entries,
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_u64(headers: &HeaderMap, name: &str) -> UpyunResult<Option<u64>> {
    header(headers, name)
        .map(|v| {
            v.trim().parse::<u64>().map_err(|e| {
                UpyunError::Decode(format!("header {} is not a valid integer: {}", name, e))
            })
        })
        .transpose()
}

/// Build object metadata from response headers
///
/// `from_head` selects the `x-upyun-file-*` headers returned by HEAD; GET
/// responses describe the body through the standard HTTP headers instead.
pub fn object_from_headers(headers: &HeaderMap, from_head: bool) -> UpyunResult<ObjectMetadata> {
    let mut info = ObjectMetadata::default();

    if from_head {
        info.is_dir = header(headers, X_UPYUN_FILE_TYPE) == Some("folder");
        info.size = parse_u64(headers, X_UPYUN_FILE_SIZE)?.unwrap_or(0);
        info.mod_time = parse_u64(headers, X_UPYUN_FILE_DATE)?
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
    } else {
        info.size = parse_u64(headers, http::header::CONTENT_LENGTH.as_str())?.unwrap_or(0);
        info.mod_time = header(headers, http::header::LAST_MODIFIED.as_str())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
    }

    info.content_type = header(headers, http::header::CONTENT_TYPE.as_str())
        .unwrap_or_default()
        .to_string();
    info.checksum = header(headers, "content-md5")
        .or_else(|| header(headers, http::header::ETAG.as_str()))
        .unwrap_or_default()
        .trim_matches('"')
        .to_string();

    for (name, value) in headers {
        if let Some(key) = name.as_str().strip_prefix(X_UPYUN_META_PREFIX) {
            if let Ok(v) = value.to_str() {
                info.metadata.insert(key.to_string(), v.to_string());
            }
        }
    }

    Ok(info)
}
