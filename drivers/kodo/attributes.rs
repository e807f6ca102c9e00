//! Response headers to object attributes / 响应头转换为对象属性

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap};
use std::collections::HashMap;

use super::util::strip_metadata_prefix;
use crate::storage::Attributes;

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn from_headers(headers: &HeaderMap) -> Attributes {
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(-1);

    let mod_time = headers
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|t| t.with_timezone(&Utc));

    // first value wins for repeated headers
    let mut metadata = HashMap::new();
    for (name, value) in headers {
        if let (Some(key), Ok(value)) = (strip_metadata_prefix(name.as_str()), value.to_str()) {
            metadata.entry(key).or_insert_with(|| value.to_string());
        }
    }

    Attributes {
        cache_control: header_str(headers, header::CACHE_CONTROL),
        content_disposition: header_str(headers, header::CONTENT_DISPOSITION),
        content_encoding: header_str(headers, header::CONTENT_ENCODING),
        content_language: header_str(headers, header::CONTENT_LANGUAGE),
        content_type: header_str(headers, header::CONTENT_TYPE),
        etag: header_str(headers, header::ETAG),
        md5: header_str(headers, "content-md5").into_bytes(),
        size,
        mod_time,
        metadata,
    }
}
