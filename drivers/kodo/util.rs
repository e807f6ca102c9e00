//! Kodo utility functions / Kodo工具函数

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Prefix of user metadata headers and form fields / 用户元数据前缀
pub const METADATA_PREFIX: &str = "x-qn-meta-";

/// URL-safe base64 (with padding) / URL安全的base64编码
pub fn urlsafe_base64(data: impl AsRef<[u8]>) -> String {
    URL_SAFE.encode(data)
}

/// Encoded entry `base64("bucket:key")` used by management APIs
pub fn encoded_entry(bucket: &str, key: &str) -> String {
    urlsafe_base64(format!("{}:{}", bucket, key))
}

/// Qualify a bare host with a scheme / 为主机名补全协议
pub fn with_scheme(host: &str, use_https: bool) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else if use_https {
        format!("https://{}", host)
    } else {
        format!("http://{}", host)
    }
}

/// Build the `Range` header value for a ranged read.
///
/// `None` means the whole object is requested.
pub fn byte_range(offset: i64, length: i64) -> Option<String> {
    if offset > 0 && length < 0 {
        Some(format!("bytes={}-", offset))
    } else if length == 0 {
        // read a single byte, the body gets discarded
        Some(format!("bytes={}-{}", offset, offset))
    } else if length > 0 {
        Some(format!("bytes={}-{}", offset, offset.saturating_add(length - 1)))
    } else {
        None
    }
}

/// Kodo reports upload time in units of 100ns.
pub fn put_time_to_datetime(put_time: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(put_time.checked_mul(10)?)
}

/// Prefix user metadata keys for the wire / 给元数据键加上线上前缀
pub fn metadata_to_params(metadata: &HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .iter()
        .map(|(k, v)| (format!("{}{}", METADATA_PREFIX, k), v.clone()))
        .collect()
}

/// Strip the metadata prefix (case-insensitive) / 去掉元数据前缀
pub fn strip_metadata_prefix(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_prefix(METADATA_PREFIX)
        .map(|k| k.to_string())
}

/// Escape an object key for use in a URL path, keeping `/` / 转义对象键
pub fn escape_key(key: &str) -> String {
    urlencoding::encode(key).replace("%2F", "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range() {
        assert_eq!(byte_range(0, -1), None);
        assert_eq!(byte_range(10, -1).as_deref(), Some("bytes=10-"));
        assert_eq!(byte_range(5, 0).as_deref(), Some("bytes=5-5"));
        assert_eq!(byte_range(0, 0).as_deref(), Some("bytes=0-0"));
        assert_eq!(byte_range(1024, 2048).as_deref(), Some("bytes=1024-3071"));
        assert_eq!(byte_range(0, 1).as_deref(), Some("bytes=0-0"));
        let end = i64::MAX.to_string();
        assert_eq!(byte_range(1, i64::MAX), Some(format!("bytes=1-{}", end)));
        assert_eq!(byte_range(i64::MAX, 2), Some(format!("bytes={}-{}", end, end)));
        for offset in [0i64, 1, 7, 4096] {
            for length in [1i64, 2, 100, 1 << 20] {
                assert_eq!(
                    byte_range(offset, length),
                    Some(format!("bytes={}-{}", offset, offset + length - 1))
                );
            }
        }
    }

    #[test]
    fn test_encoded_entry() {
        assert_eq!(encoded_entry("bucket", "key"), "YnVja2V0OmtleQ==");
        assert_eq!(urlsafe_base64([0xfbu8, 0xff]), "-_8=");
    }

    #[test]
    fn test_with_scheme() {
        assert_eq!(with_scheme("cdn.example.com", false), "http://cdn.example.com");
        assert_eq!(with_scheme("cdn.example.com", true), "https://cdn.example.com");
        assert_eq!(with_scheme("http://cdn.example.com", true), "http://cdn.example.com");
    }

    #[test]
    fn test_put_time() {
        let t = put_time_to_datetime(170_000_000_000_000).unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
        assert_eq!(put_time_to_datetime(15).unwrap().timestamp_micros(), 150);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut metadata = HashMap::new();
        metadata.insert("data-a".to_string(), "value-1".to_string());
        let params = metadata_to_params(&metadata);
        assert_eq!(params.get("x-qn-meta-data-a").map(String::as_str), Some("value-1"));
        for name in params.keys() {
            assert_eq!(strip_metadata_prefix(name).as_deref(), Some("data-a"));
        }
        assert_eq!(strip_metadata_prefix("X-Qn-Meta-Data-B").as_deref(), Some("data-b"));
        assert_eq!(strip_metadata_prefix("content-type"), None);
    }

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("dir/a b.txt"), "dir/a%20b.txt");
        assert_eq!(escape_key("plain"), "plain");
    }
}
