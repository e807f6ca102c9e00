//! Kodo bucket driver / Kodo存储桶驱动
//!
//! Only primitives live here (list page, head, range read, writer, copy,
//! delete, signed URL); pagination and whole-object helpers are in
//! [`crate::storage::Bucket`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{Future, TryStreamExt};
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::{Client, Method, Response};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::debug;

use super::attributes::from_headers;
use super::auth::Credentials;
use super::client::{KodoClient, ObjectLister, ObjectManager};
use super::config::KodoConfig;
use super::error::{self, KodoError};
use super::listing::ListingTranslator;
use super::region::{HostOverrides, RegionResolver, ServiceHosts, UcRegionResolver};
use super::signer::DownloadUrlSigner;
use super::upload::{ObjectUploader, ResumableUploader, UploadSession};
use super::util::{byte_range, metadata_to_params};
use super::writer::KodoWriter;
use crate::storage::{
    Attributes, BlobReader, BlobWriter, BucketDriver, ErrorCode, HttpMethod, ListOptions,
    ListPage, OpContext, ReaderAttributes, SignedUrlOptions, WriterOptions,
};

/// Remote services the driver talks to / 驱动依赖的远程服务
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn RegionResolver>,
    pub lister: Arc<dyn ObjectLister>,
    pub manager: Arc<dyn ObjectManager>,
    pub uploader: Arc<dyn ObjectUploader>,
}

impl Collaborators {
    /// HTTP backed collaborators. `api` carries the request timeout and is
    /// used for discovery and management; `transfer` moves object bytes.
    pub fn http(config: &KodoConfig, api: Client, transfer: Client) -> Self {
        let credentials = Credentials::new(&config.access_key, &config.secret_key);
        let resolver: Arc<dyn RegionResolver> = Arc::new(UcRegionResolver::new(
            api.clone(),
            config.uc_hosts.clone(),
            config.user_agent.clone(),
        ));
        let hosts = Arc::new(ServiceHosts::new(
            resolver.clone(),
            HostOverrides::from_config(config),
            &config.access_key,
            &config.bucket,
            config.use_https,
        ));
        let client = Arc::new(KodoClient::new(
            api,
            credentials,
            hosts.clone(),
            config.user_agent.clone(),
        ));
        let uploader = Arc::new(ResumableUploader::new(
            transfer,
            hosts,
            config.part_size,
            config.user_agent.clone(),
        ));
        Self {
            resolver,
            lister: client.clone(),
            manager: client,
            uploader,
        }
    }
}

/// Kodo bucket driver / Kodo存储桶驱动
pub struct KodoBucket {
    config: KodoConfig,
    credentials: Credentials,
    transfer: Client,
    signer: DownloadUrlSigner,
    listing: ListingTranslator,
    manager: Arc<dyn ObjectManager>,
    uploader: Arc<dyn ObjectUploader>,
}

impl KodoBucket {
    pub fn new(config: KodoConfig) -> Result<Self> {
        let api = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let transfer = Client::builder().build()?;
        let collaborators = Collaborators::http(&config, api, transfer.clone());
        Self::with_collaborators(config, transfer, collaborators)
    }

    pub fn with_collaborators(
        config: KodoConfig,
        transfer: Client,
        collaborators: Collaborators,
    ) -> Result<Self> {
        if config.access_key.is_empty() {
            return Err(KodoError::NoAccessKey.into());
        }
        let credentials = Credentials::new(&config.access_key, &config.secret_key);
        let signer = DownloadUrlSigner::new(
            credentials.clone(),
            &config.bucket,
            config.download_domains.clone(),
            config.sign_download_url,
            config.use_https,
            collaborators.resolver,
        );
        let listing = ListingTranslator::new(collaborators.lister, &config.bucket);
        Ok(Self {
            config,
            credentials,
            transfer,
            signer,
            listing,
            manager: collaborators.manager,
            uploader: collaborators.uploader,
        })
    }

    pub fn config(&self) -> &KodoConfig {
        &self.config
    }

    /// GET / HEAD through a freshly signed download URL.
    async fn download(&self, method: Method, key: &str, range: Option<&str>) -> Result<Response> {
        let expiry = chrono::Duration::seconds(self.config.attributes_expiry_secs);
        let url = self.signer.resolve(key, expiry).await?;
        debug!("{} {} range={:?}", method, key, range);

        let mut request = self
            .transfer
            .request(method, &url)
            .header(USER_AGENT, &self.config.user_agent);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        Ok(request.send().await?)
    }

    /// Race a remote call against the caller's context. On cancellation the
    /// call keeps running in the background and its outcome is dropped.
    async fn with_context<F>(&self, ctx: &OpContext, op: &str, call: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(call);
        tokio::select! {
            joined = handle => joined.map_err(|e| anyhow!("{} task failed: {}", op, e))?,
            err = ctx.done() => {
                debug!("{} abandoned: {}", op, err);
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl BucketDriver for KodoBucket {
    fn name(&self) -> &str {
        "kodo"
    }

    async fn list_page(&self, opts: &ListOptions) -> Result<ListPage> {
        self.listing.list_page(opts).await
    }

    async fn attributes(&self, key: &str) -> Result<Attributes> {
        let response = self.download(Method::HEAD, key, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KodoError::StatusCode(status.as_u16()).into());
        }
        Ok(from_headers(response.headers()))
    }

    async fn new_range_reader(
        &self,
        key: &str,
        offset: i64,
        length: i64,
    ) -> Result<Box<dyn BlobReader>> {
        let range = byte_range(offset, length);
        let response = self.download(Method::GET, key, range.as_deref()).await?;
        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Err(KodoError::StatusCode(status).into());
        }
        let attributes = ReaderAttributes::from(&from_headers(response.headers()));

        let body: Box<dyn AsyncRead + Unpin + Send> = if length == 0 {
            drop(response);
            Box::new(tokio::io::empty())
        } else {
            let stream = response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            Box::new(StreamReader::new(stream))
        };
        Ok(Box::new(KodoReader { attributes, body }))
    }

    async fn new_writer(&self, key: &str, opts: &WriterOptions) -> Result<Box<dyn BlobWriter>> {
        let deadline = chrono::Utc::now() + chrono::Duration::seconds(self.config.upload_token_ttl_secs);
        let session = UploadSession {
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            token: self.credentials.upload_token(&self.config.bucket, key, deadline)?,
            mime_type: opts.content_type.clone(),
            params: metadata_to_params(&opts.metadata),
        };
        Ok(Box::new(KodoWriter::new(
            session,
            self.uploader.clone(),
            self.config.pipe_capacity,
        )))
    }

    async fn copy(&self, ctx: &OpContext, src_key: &str, dst_key: &str) -> Result<()> {
        let manager = self.manager.clone();
        let bucket = self.config.bucket.clone();
        let (src_key, dst_key) = (src_key.to_string(), dst_key.to_string());
        self.with_context(ctx, "copy", async move {
            manager.copy(&bucket, &src_key, &bucket, &dst_key, true).await
        })
        .await
    }

    async fn delete(&self, ctx: &OpContext, key: &str) -> Result<()> {
        let manager = self.manager.clone();
        let bucket = self.config.bucket.clone();
        let key = key.to_string();
        self.with_context(ctx, "delete", async move { manager.delete(&bucket, &key).await })
            .await
    }

    async fn signed_url(&self, key: &str, opts: &SignedUrlOptions) -> Result<String> {
        match &opts.method {
            HttpMethod::Get => self.signer.resolve(key, opts.expiry).await,
            HttpMethod::Put => Err(KodoError::NotSupportedSignedPutUrl.into()),
            HttpMethod::Delete => Err(KodoError::NotSupportedSignedDeleteUrl.into()),
            HttpMethod::Other(method) => Err(KodoError::UnsupportedMethod(method.clone()).into()),
        }
    }

    fn error_code(&self, err: &anyhow::Error) -> ErrorCode {
        error::error_code(err)
    }
}

/// Pass-through reader over a download body / 下载读取器
pub struct KodoReader {
    attributes: ReaderAttributes,
    body: Box<dyn AsyncRead + Unpin + Send>,
}

impl AsyncRead for KodoReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.body).poll_read(cx, buf)
    }
}

impl BlobReader for KodoReader {
    fn attributes(&self) -> &ReaderAttributes {
        &self.attributes
    }
}
