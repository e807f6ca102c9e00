//! Kodo driver configuration / Kodo驱动配置

use anyhow::Result;
use serde::{Deserialize, Serialize};
use url::Url;

use super::error::KodoError;
use super::util::with_scheme;

/// URL scheme the opener is registered under
pub const SCHEME: &str = "kodo";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Kodo bucket configuration / Kodo存储桶配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KodoConfig {
    /// Bucket name / 存储桶名称
    pub bucket: String,
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Region discovery hosts; empty means the public default
    /// 区域查询服务地址
    #[serde(default)]
    pub uc_hosts: Vec<String>,
    #[serde(default)]
    pub use_https: bool,
    /// Explicit download (CDN) domains, scheme qualified / 下载域名
    #[serde(default)]
    pub download_domains: Vec<String>,
    /// Sign download URLs even on explicit domains / 强制签名下载链接
    #[serde(default)]
    pub sign_download_url: bool,
    #[serde(default)]
    pub src_up_hosts: Vec<String>,
    #[serde(default)]
    pub cdn_up_hosts: Vec<String>,
    #[serde(default)]
    pub rs_host: Option<String>,
    #[serde(default)]
    pub rsf_host: Option<String>,
    #[serde(default)]
    pub api_host: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Multipart part size in bytes / 分片大小
    #[serde(default = "default_part_size")]
    pub part_size: usize,
    /// Chunks buffered between writer and upload task / 写入管道容量
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
    /// Expiry of the URL used by attribute lookups and reads (seconds)
    #[serde(default = "default_attributes_expiry")]
    pub attributes_expiry_secs: i64,
    /// Upload token lifetime (seconds) / 上传凭证有效期
    #[serde(default = "default_upload_token_ttl")]
    pub upload_token_ttl_secs: i64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

pub fn default_user_agent() -> String {
    format!(
        "QiniuRustKodoBlob/{} ({}; {})",
        VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn default_part_size() -> usize {
    4 * 1024 * 1024
}

fn default_pipe_capacity() -> usize {
    2
}

fn default_attributes_expiry() -> i64 {
    180
}

fn default_upload_token_ttl() -> i64 {
    24 * 3600
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for KodoConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            uc_hosts: Vec::new(),
            use_https: false,
            download_domains: Vec::new(),
            sign_download_url: false,
            src_up_hosts: Vec::new(),
            cdn_up_hosts: Vec::new(),
            rs_host: None,
            rsf_host: None,
            api_host: None,
            user_agent: default_user_agent(),
            part_size: default_part_size(),
            pipe_capacity: default_pipe_capacity(),
            attributes_expiry_secs: default_attributes_expiry(),
            upload_token_ttl_secs: default_upload_token_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl KodoConfig {
    /// Parse `kodo://<ak>[:<sk>]@<bucket>?<options>` / 解析连接URL
    ///
    /// Takes the raw string since a parsed `Url` cannot tell `ak:@bucket`
    /// apart from `ak@bucket`.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|_| KodoError::InvalidUrl(raw.to_string()))?;
        let access_key = decode(url.username())?;
        if access_key.is_empty() {
            return Err(KodoError::NoAccessKey.into());
        }
        let secret_key = decode(url.password().unwrap_or_default())?;
        if secret_key.is_empty() && has_password(raw) {
            return Err(KodoError::NoSecretKey.into());
        }
        let bucket = url
            .host_str()
            .map(str::to_string)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| KodoError::InvalidUrl(url.to_string()))?;

        let query = QueryValues::new(&url);
        let use_https = query.has("useHttps");

        let mut uc_hosts = query.all("bucketHost");
        if uc_hosts.is_empty() {
            uc_hosts = query.all("ucHost");
        }

        let download_domains = query
            .all("downloadDomain")
            .iter()
            .map(|domain| qualify_domain(domain, use_https))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bucket,
            access_key,
            secret_key,
            uc_hosts,
            use_https,
            download_domains,
            sign_download_url: query.has("signDownloadUrl"),
            src_up_hosts: query.all("srcUpHost"),
            cdn_up_hosts: query.all("cdnUpHost"),
            rs_host: query.first("rsHost"),
            rsf_host: query.first("rsfHost"),
            api_host: query.first("apiHost"),
            ..Self::default()
        })
    }
}

/// Whether the userinfo of a raw URL carries a `:` separator
fn has_password(raw: &str) -> bool {
    let rest = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    authority
        .rsplit_once('@')
        .map(|(userinfo, _)| userinfo.contains(':'))
        .unwrap_or(false)
}

fn decode(raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| KodoError::InvalidUrl(raw.to_string()).into())
}

/// Qualify and validate one download domain / 规范化下载域名
fn qualify_domain(domain: &str, use_https: bool) -> Result<String> {
    let qualified = with_scheme(domain, use_https);
    let parsed = Url::parse(&qualified).map_err(|_| KodoError::InvalidUrl(domain.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Presence-aware view over URL query pairs
struct QueryValues(Vec<(String, String)>);

impl QueryValues {
    fn new(url: &Url) -> Self {
        Self(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect())
    }

    fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn first(&self, name: &str) -> Option<String> {
        self.all(name).into_iter().next()
    }
}
