//! Region discovery / 区域发现
//!
//! A bucket's service endpoints are looked up from the UC service and kept
//! until the TTL the service hands back runs out. Explicitly configured
//! hosts win over discovered ones, per service.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::client::check_response;
use super::config::KodoConfig;
use super::types::{RegionHosts, RegionQueryResp};
use super::util::with_scheme;

/// Public region discovery host / 默认区域查询地址
pub const DEFAULT_UC_HOST: &str = "https://uc.qiniuapi.com";

/// Used when the UC response does not carry a TTL
const DEFAULT_REGION_TTL: u64 = 24 * 3600;

/// Scheme qualified endpoints of one region / 区域服务地址
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionEndpoints {
    pub io_src_hosts: Vec<String>,
    pub io_hosts: Vec<String>,
    pub up_hosts: Vec<String>,
    pub rs_hosts: Vec<String>,
    pub rsf_hosts: Vec<String>,
    pub api_hosts: Vec<String>,
}

impl RegionEndpoints {
    fn from_hosts(hosts: &RegionHosts, use_https: bool) -> Self {
        let qualify = |domains: &[String]| -> Vec<String> {
            domains
                .iter()
                .filter(|d| !d.is_empty())
                .map(|d| with_scheme(d, use_https))
                .collect()
        };
        Self {
            io_src_hosts: qualify(&hosts.io_src.domains),
            io_hosts: qualify(&hosts.io.domains),
            up_hosts: qualify(&hosts.up.domains),
            rs_hosts: qualify(&hosts.rs.domains),
            rsf_hosts: qualify(&hosts.rsf.domains),
            api_hosts: qualify(&hosts.api.domains),
        }
    }

    pub fn io_src_host(&self) -> Option<&str> {
        self.io_src_hosts.first().map(String::as_str)
    }

    /// First host of `service` / 取指定服务的第一个地址
    pub fn host(&self, service: ServiceKind) -> Option<&str> {
        let hosts = match service {
            ServiceKind::IoSrc => &self.io_src_hosts,
            ServiceKind::Up => &self.up_hosts,
            ServiceKind::Rs => &self.rs_hosts,
            ServiceKind::Rsf => &self.rsf_hosts,
            ServiceKind::Api => &self.api_hosts,
        };
        hosts.first().map(String::as_str)
    }
}

/// Service a request goes to / 请求的目标服务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    IoSrc,
    Up,
    Rs,
    Rsf,
    Api,
}

impl ServiceKind {
    fn name(self) -> &'static str {
        match self {
            ServiceKind::IoSrc => "io_src",
            ServiceKind::Up => "up",
            ServiceKind::Rs => "rs",
            ServiceKind::Rsf => "rsf",
            ServiceKind::Api => "api",
        }
    }
}

/// Region resolution collaborator / 区域解析接口
#[async_trait]
pub trait RegionResolver: Send + Sync {
    async fn resolve(&self, access_key: &str, bucket: &str, use_https: bool) -> Result<RegionEndpoints>;
}

struct CachedRegion {
    endpoints: RegionEndpoints,
    expires_at: Instant,
}

type CacheKey = (String, String, bool);

/// UC backed resolver with a TTL cache / 基于UC服务的区域解析器
pub struct UcRegionResolver {
    client: Client,
    uc_hosts: Vec<String>,
    user_agent: String,
    cache: RwLock<HashMap<CacheKey, CachedRegion>>,
}

impl UcRegionResolver {
    pub fn new(client: Client, uc_hosts: Vec<String>, user_agent: String) -> Self {
        let uc_hosts = if uc_hosts.is_empty() {
            vec![DEFAULT_UC_HOST.to_string()]
        } else {
            uc_hosts
        };
        Self {
            client,
            uc_hosts,
            user_agent,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<RegionEndpoints> {
        let cache = self.cache.read();
        cache
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.endpoints.clone())
    }

    async fn query(&self, uc_host: &str, access_key: &str, bucket: &str) -> Result<RegionQueryResp> {
        let url = format!("{}/v4/query", with_scheme(uc_host, true).trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .query(&[("ak", access_key), ("bucket", bucket)])
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        let response = check_response(response).await?;
        Ok(response.json::<RegionQueryResp>().await?)
    }
}

#[async_trait]
impl RegionResolver for UcRegionResolver {
    async fn resolve(&self, access_key: &str, bucket: &str, use_https: bool) -> Result<RegionEndpoints> {
        let key = (access_key.to_string(), bucket.to_string(), use_https);
        if let Some(endpoints) = self.cached(&key) {
            return Ok(endpoints);
        }

        let mut last_err = None;
        for uc_host in &self.uc_hosts {
            debug!("Querying region of {} from {}", bucket, uc_host);
            match self.query(uc_host, access_key, bucket).await {
                Ok(resp) => {
                    let Some(hosts) = resp.hosts.into_iter().next() else {
                        debug!("UC host {} knows no region for {}", uc_host, bucket);
                        last_err = Some(anyhow!("No region found for bucket {}", bucket));
                        continue;
                    };
                    let ttl = if hosts.ttl == 0 { DEFAULT_REGION_TTL } else { hosts.ttl };
                    let endpoints = RegionEndpoints::from_hosts(&hosts, use_https);
                    self.cache.write().insert(
                        key,
                        CachedRegion {
                            endpoints: endpoints.clone(),
                            expires_at: Instant::now() + Duration::from_secs(ttl),
                        },
                    );
                    return Ok(endpoints);
                }
                Err(e) => {
                    debug!("Region query via {} failed: {}", uc_host, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("No UC host configured")))
    }
}

/// Explicitly configured service hosts / 显式配置的服务地址
#[derive(Debug, Clone, Default)]
pub struct HostOverrides {
    pub up_hosts: Vec<String>,
    pub rs_host: Option<String>,
    pub rsf_host: Option<String>,
    pub api_host: Option<String>,
}

impl HostOverrides {
    pub fn from_config(config: &KodoConfig) -> Self {
        let mut up_hosts = config.src_up_hosts.clone();
        up_hosts.extend(config.cdn_up_hosts.iter().cloned());
        Self {
            up_hosts,
            rs_host: config.rs_host.clone(),
            rsf_host: config.rsf_host.clone(),
            api_host: config.api_host.clone(),
        }
    }

    fn get(&self, service: ServiceKind) -> Option<&str> {
        match service {
            ServiceKind::Up => self.up_hosts.first().map(String::as_str),
            ServiceKind::Rs => self.rs_host.as_deref(),
            ServiceKind::Rsf => self.rsf_host.as_deref(),
            ServiceKind::Api => self.api_host.as_deref(),
            ServiceKind::IoSrc => None,
        }
    }
}

/// Picks the host for one service of one bucket / 选择服务地址
pub struct ServiceHosts {
    resolver: Arc<dyn RegionResolver>,
    overrides: HostOverrides,
    access_key: String,
    bucket: String,
    use_https: bool,
}

impl ServiceHosts {
    pub fn new(
        resolver: Arc<dyn RegionResolver>,
        overrides: HostOverrides,
        access_key: impl Into<String>,
        bucket: impl Into<String>,
        use_https: bool,
    ) -> Self {
        Self {
            resolver,
            overrides,
            access_key: access_key.into(),
            bucket: bucket.into(),
            use_https,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Override if configured, otherwise the discovered host.
    pub async fn host(&self, service: ServiceKind) -> Result<String> {
        if let Some(host) = self.overrides.get(service) {
            return Ok(with_scheme(host, self.use_https).trim_end_matches('/').to_string());
        }
        let endpoints = self
            .resolver
            .resolve(&self.access_key, &self.bucket, self.use_https)
            .await?;
        endpoints
            .host(service)
            .map(|h| h.trim_end_matches('/').to_string())
            .ok_or_else(|| anyhow!("No {} host found for bucket {}", service.name(), self.bucket))
    }
}
