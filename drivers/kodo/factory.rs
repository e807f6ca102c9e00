//! Kodo bucket opener / Kodo存储桶打开器

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::config::{KodoConfig, SCHEME};
use super::driver::KodoBucket;
use crate::storage::{Bucket, BucketOpener};

/// Opens `kodo://` URLs / 打开 `kodo://` 连接
pub struct KodoBucketOpener;

#[async_trait]
impl BucketOpener for KodoBucketOpener {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn open_bucket_url(&self, url: &str) -> Result<Bucket> {
        let config = KodoConfig::from_url(url)?;
        tracing::debug!("Opening kodo bucket {}", config.bucket);
        Ok(Bucket::new(Arc::new(KodoBucket::new(config)?)))
    }
}
