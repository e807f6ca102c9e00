//! Kodo management HTTP client / Kodo管理接口客户端
//!
//! Listing goes to rsf, copy and delete go to rs. Both are signed with the
//! `Qiniu` authorization header.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::auth::Credentials;
use super::error::KodoError;
use super::region::{ServiceHosts, ServiceKind};
use super::types::{ErrResp, ListFilesResp, ListItem};
use super::util::encoded_entry;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Parameters of one rsf list call / 列举参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilesInput {
    pub prefix: String,
    pub delimiter: String,
    pub marker: String,
    pub limit: usize,
}

/// One page returned by rsf / 列举结果
#[derive(Debug, Clone, Default)]
pub struct ListFilesOutput {
    pub items: Vec<ListItem>,
    pub common_prefixes: Vec<String>,
    /// Present while more entries remain / 还有更多时返回
    pub next_marker: Option<String>,
}

/// Remote listing collaborator / 远程列举接口
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list_files(&self, bucket: &str, input: &ListFilesInput) -> Result<ListFilesOutput>;
}

/// Remote management collaborator / 远程对象管理接口
#[async_trait]
pub trait ObjectManager: Send + Sync {
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<()>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Turn a non-2xx response into [`KodoError::Api`] / 检查响应状态
pub async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrResp>(&body) {
        Ok(err) if !err.error.is_empty() => err.error,
        _ => body,
    };
    Err(KodoError::Api {
        code: status.as_u16(),
        message,
    }
    .into())
}

/// rs / rsf client / 管理接口客户端
pub struct KodoClient {
    client: Client,
    credentials: Credentials,
    hosts: Arc<ServiceHosts>,
    user_agent: String,
}

impl KodoClient {
    pub fn new(
        client: Client,
        credentials: Credentials,
        hosts: Arc<ServiceHosts>,
        user_agent: String,
    ) -> Self {
        Self {
            client,
            credentials,
            hosts,
            user_agent,
        }
    }

    /// Signed form POST with an empty body / 发送签名请求
    async fn post(&self, url: Url) -> Result<Response> {
        let authorization = self
            .credentials
            .authorization("POST", &url, Some(FORM_CONTENT_TYPE), b"");
        let response = self
            .client
            .request(Method::POST, url)
            .header("Authorization", authorization)
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        check_response(response).await
    }

    async fn rs_url(&self, path: &str) -> Result<Url> {
        let host = self.hosts.host(ServiceKind::Rs).await?;
        Url::parse(&format!("{}{}", host, path)).map_err(|_| KodoError::InvalidUrl(host).into())
    }
}

#[async_trait]
impl ObjectLister for KodoClient {
    async fn list_files(&self, bucket: &str, input: &ListFilesInput) -> Result<ListFilesOutput> {
        let host = self.hosts.host(ServiceKind::Rsf).await?;
        let mut url = Url::parse(&format!("{}/list", host)).map_err(|_| KodoError::InvalidUrl(host))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("bucket", bucket);
            query.append_pair("limit", &input.limit.to_string());
            if !input.prefix.is_empty() {
                query.append_pair("prefix", &input.prefix);
            }
            if !input.delimiter.is_empty() {
                query.append_pair("delimiter", &input.delimiter);
            }
            if !input.marker.is_empty() {
                query.append_pair("marker", &input.marker);
            }
        }

        debug!("Listing {} prefix={:?} marker={:?}", bucket, input.prefix, input.marker);
        let resp: ListFilesResp = self.post(url).await?.json().await?;
        Ok(ListFilesOutput {
            items: resp.items,
            common_prefixes: resp.common_prefixes,
            next_marker: Some(resp.marker).filter(|m| !m.is_empty()),
        })
    }
}

#[async_trait]
impl ObjectManager for KodoClient {
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        force: bool,
    ) -> Result<()> {
        let path = format!(
            "/copy/{}/{}/force/{}",
            encoded_entry(src_bucket, src_key),
            encoded_entry(dst_bucket, dst_key),
            force
        );
        debug!("Copying {}:{} to {}:{}", src_bucket, src_key, dst_bucket, dst_key);
        self.post(self.rs_url(&path).await?).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = format!("/delete/{}", encoded_entry(bucket, key));
        debug!("Deleting {}:{}", bucket, key);
        self.post(self.rs_url(&path).await?).await?;
        Ok(())
    }
}
