//! Download URL signer / 下载链接签名

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use super::auth::{public_url, Credentials};
use super::error::KodoError;
use super::region::RegionResolver;
use super::util::with_scheme;

/// Chooses the download domain and signing mode for a key.
///
/// Explicit download domains are used verbatim and signed only when the
/// bucket asks for it. Without them the region's source host is used, and
/// that host is always signed.
pub struct DownloadUrlSigner {
    credentials: Credentials,
    bucket: String,
    download_domains: Vec<String>,
    sign_download_url: bool,
    use_https: bool,
    resolver: Arc<dyn RegionResolver>,
}

impl DownloadUrlSigner {
    pub fn new(
        credentials: Credentials,
        bucket: impl Into<String>,
        download_domains: Vec<String>,
        sign_download_url: bool,
        use_https: bool,
        resolver: Arc<dyn RegionResolver>,
    ) -> Self {
        Self {
            credentials,
            bucket: bucket.into(),
            download_domains,
            sign_download_url,
            use_https,
            resolver,
        }
    }

    /// Fetch URL for `key`, valid for `expiry` when signed.
    pub async fn resolve(&self, key: &str, expiry: Duration) -> Result<String> {
        self.resolve_at(key, expiry, Utc::now()).await
    }

    pub async fn resolve_at(&self, key: &str, expiry: Duration, now: DateTime<Utc>) -> Result<String> {
        let (domain, sign) = match self.download_domains.first() {
            Some(domain) => (domain.clone(), self.sign_download_url),
            None => {
                let endpoints = self
                    .resolver
                    .resolve(&self.credentials.access_key, &self.bucket, self.use_https)
                    .await?;
                let host = endpoints
                    .io_src_host()
                    .filter(|h| !h.is_empty())
                    .ok_or(KodoError::NoDownloadDomain)?;
                (with_scheme(host, self.use_https), true)
            }
        };

        let url = public_url(&domain, key);
        if !sign {
            return Ok(url);
        }
        let deadline = now
            .checked_add_signed(expiry)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .timestamp();
        debug!("Signing download url for {} until {}", key, deadline);
        Ok(self.credentials.private_url(&url, deadline))
    }
}
