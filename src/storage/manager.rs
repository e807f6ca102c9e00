use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use anyhow::{anyhow, Result};
use url::Url;

use super::Bucket;

/// Bucket opener trait (one per URL scheme) / 存储桶打开器
#[async_trait::async_trait]
pub trait BucketOpener: Send + Sync {
    /// URL scheme handled by this opener / 处理的URL协议
    fn scheme(&self) -> &'static str;

    /// Open a bucket described by the raw connection `url` / 根据URL打开存储桶
    async fn open_bucket_url(&self, url: &str) -> Result<Bucket>;
}

/// Scheme keyed opener registry / 按协议注册的打开器表
///
/// Instances are independent of each other; nothing is registered
/// process-wide.
#[derive(Clone, Default)]
pub struct BucketMux {
    openers: Arc<RwLock<HashMap<String, Arc<dyn BucketOpener>>>>,
}

impl BucketMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register opener / 注册打开器
    pub async fn register_opener(&self, opener: Arc<dyn BucketOpener>) -> Result<()> {
        let scheme = opener.scheme().to_string();
        let mut openers = self.openers.write().await;
        if openers.contains_key(&scheme) {
            return Err(anyhow!("Bucket opener already registered: {}", scheme));
        }
        openers.insert(scheme.clone(), opener);

        tracing::info!("Bucket opener registered: {}", scheme);
        Ok(())
    }

    /// Registered schemes, sorted / 已注册协议
    pub async fn schemes(&self) -> Vec<String> {
        let openers = self.openers.read().await;
        let mut schemes: Vec<String> = openers.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Open a bucket from a connection URL / 通过连接URL打开存储桶
    pub async fn open_bucket(&self, url: &str) -> Result<Bucket> {
        let parsed = Url::parse(url).map_err(|e| anyhow!("Invalid bucket URL: {}", e))?;
        let opener = {
            let openers = self.openers.read().await;
            openers
                .get(parsed.scheme())
                .cloned()
                .ok_or_else(|| anyhow!("No opener registered for scheme: {}", parsed.scheme()))?
        };
        opener.open_bucket_url(url).await
    }
}
