//! Credential signer / 凭证签名
//!
//! HMAC-SHA1 over the canonical request, URL-safe base64 encoded.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;
use url::Url;

use super::types::PutPolicy;
use super::util::{escape_key, urlsafe_base64};

type HmacSha1 = Hmac<Sha1>;

const OCTET_STREAM: &str = "application/octet-stream";

/// Access key / secret key pair / 访问密钥对
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    secret_key: Vec<u8>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl AsRef<[u8]>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.as_ref().to_vec(),
        }
    }

    /// `<ak>:<base64(hmac_sha1(sk, data))>`
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(&self.secret_key)
            .expect("HMAC can take key of any size");
        mac.update(data);
        format!("{}:{}", self.access_key, urlsafe_base64(mac.finalize().into_bytes()))
    }

    /// `<ak>:<sign(base64(data))>:<base64(data)>`
    pub fn sign_with_data(&self, data: &[u8]) -> String {
        let encoded = urlsafe_base64(data);
        format!("{}:{}", self.sign(encoded.as_bytes()), encoded)
    }

    /// Upload token scoped to one key / 上传凭证
    pub fn upload_token(&self, bucket: &str, key: &str, deadline: DateTime<Utc>) -> Result<String> {
        let policy = PutPolicy {
            scope: format!("{}:{}", bucket, key),
            deadline: deadline.timestamp(),
        };
        let data = serde_json::to_vec(&policy).map_err(|e| anyhow!("Encode put policy failed: {}", e))?;
        Ok(self.sign_with_data(&data))
    }

    /// `Authorization` header value for management requests / 管理接口鉴权头
    pub fn authorization(
        &self,
        method: &str,
        url: &Url,
        content_type: Option<&str>,
        body: &[u8],
    ) -> String {
        let mut data = format!("{} {}", method.to_ascii_uppercase(), url.path());
        if let Some(query) = url.query() {
            data.push('?');
            data.push_str(query);
        }
        data.push_str("\nHost: ");
        data.push_str(url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            data.push_str(&format!(":{}", port));
        }
        if let Some(ct) = content_type {
            data.push_str("\nContent-Type: ");
            data.push_str(ct);
        }
        data.push_str("\n\n");
        let mut data = data.into_bytes();
        if matches!(content_type, Some(ct) if ct != OCTET_STREAM) {
            data.extend_from_slice(body);
        }
        format!("Qiniu {}", self.sign(&data))
    }

    /// Private download URL valid until `deadline` / 私有下载链接
    pub fn private_url(&self, public_url: &str, deadline: i64) -> String {
        let separator = if public_url.contains('?') { '&' } else { '?' };
        let with_deadline = format!("{}{}e={}", public_url, separator, deadline);
        let token = self.sign(with_deadline.as_bytes());
        format!("{}&token={}", with_deadline, token)
    }
}

/// Public download URL / 公开下载链接
pub fn public_url(domain: &str, key: &str) -> String {
    format!("{}/{}", domain.trim_end_matches('/'), escape_key(key))
}
