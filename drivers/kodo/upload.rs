//! Kodo upload / Kodo上传
//!
//! Small sources go through a single form upload. Anything larger than one
//! part uses the multipart v2 protocol (init, upload parts, complete).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use super::client::check_response;
use super::region::{ServiceHosts, ServiceKind};
use super::types::{CompletePartsReq, InitPartsResp, UploadPartResp, UploadedPart};
use super::util::urlsafe_base64;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Everything an upload needs besides the bytes / 上传会话
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub bucket: String,
    pub key: String,
    pub token: String,
    pub mime_type: String,
    /// Metadata already carrying the wire prefix / 带前缀的元数据
    pub params: HashMap<String, String>,
}

/// Readable upload source of known or unknown length / 上传数据源
pub struct UploadSource {
    reader: Box<dyn AsyncRead + Unpin + Send>,
    size: Option<u64>,
}

impl UploadSource {
    pub fn new(reader: Box<dyn AsyncRead + Unpin + Send>, size: Option<u64>) -> Self {
        Self { reader, size }
    }

    pub fn unknown(reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        Self::new(reader, None)
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Read up to `limit` bytes, stopping early only at end of stream.
    pub async fn read_part(&mut self, limit: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(limit.min(1 << 20));
        (&mut self.reader).take(limit as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSource").field("size", &self.size).finish_non_exhaustive()
    }
}

/// Remote upload collaborator / 远程上传接口
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn put(&self, session: &UploadSession, source: UploadSource) -> Result<()>;
}

/// Form upload for small objects, multipart v2 for the rest / 上传器
pub struct ResumableUploader {
    client: Client,
    hosts: Arc<ServiceHosts>,
    part_size: usize,
    user_agent: String,
}

impl ResumableUploader {
    pub fn new(client: Client, hosts: Arc<ServiceHosts>, part_size: usize, user_agent: String) -> Self {
        Self {
            client,
            hosts,
            part_size: part_size.max(1),
            user_agent,
        }
    }

    async fn form_upload(&self, session: &UploadSession, data: Vec<u8>) -> Result<()> {
        let up_host = self.hosts.host(ServiceKind::Up).await?;
        debug!("Form uploading {} ({} bytes)", session.key, data.len());

        let mime_type = if session.mime_type.is_empty() {
            DEFAULT_MIME_TYPE
        } else {
            session.mime_type.as_str()
        };
        let file = multipart::Part::bytes(data)
            .file_name(session.key.clone())
            .mime_str(mime_type)?;
        let mut form = multipart::Form::new()
            .text("token", session.token.clone())
            .text("key", session.key.clone());
        for (name, value) in &session.params {
            form = form.text(name.clone(), value.clone());
        }
        let form = form.part("file", file);

        let response = self
            .client
            .post(format!("{}/", up_host))
            .header("User-Agent", &self.user_agent)
            .multipart(form)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    fn uploads_url(&self, up_host: &str, session: &UploadSession) -> String {
        format!(
            "{}/buckets/{}/objects/{}/uploads",
            up_host,
            session.bucket,
            urlsafe_base64(&session.key)
        )
    }

    async fn init_parts(&self, base: &str, session: &UploadSession) -> Result<InitPartsResp> {
        let response = self
            .client
            .post(base)
            .header("Authorization", format!("UpToken {}", session.token))
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        Ok(check_response(response).await?.json().await?)
    }

    async fn upload_part(
        &self,
        base: &str,
        session: &UploadSession,
        upload_id: &str,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<UploadedPart> {
        debug!("Uploading part {} of {} ({} bytes)", part_number, session.key, data.len());
        let digest = format!("{:x}", md5::compute(&data));
        let response = self
            .client
            .put(format!("{}/{}/{}", base, upload_id, part_number))
            .header("Authorization", format!("UpToken {}", session.token))
            .header("Content-Type", DEFAULT_MIME_TYPE)
            .header("Content-MD5", digest)
            .header("User-Agent", &self.user_agent)
            .body(data)
            .send()
            .await?;
        let resp: UploadPartResp = check_response(response).await?.json().await?;
        Ok(UploadedPart {
            etag: resp.etag,
            part_number,
        })
    }

    async fn complete_parts(
        &self,
        base: &str,
        session: &UploadSession,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        let req = CompletePartsReq {
            parts,
            mime_type: session.mime_type.clone(),
            metadata: session.params.clone(),
        };
        let response = self
            .client
            .post(format!("{}/{}", base, upload_id))
            .header("Authorization", format!("UpToken {}", session.token))
            .header("User-Agent", &self.user_agent)
            .json(&req)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn abort_parts(&self, base: &str, session: &UploadSession, upload_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", base, upload_id))
            .header("Authorization", format!("UpToken {}", session.token))
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;
        check_response(response).await?;
        Ok(())
    }

    async fn multipart_upload(
        &self,
        session: &UploadSession,
        first: Vec<u8>,
        second: Vec<u8>,
        source: &mut UploadSource,
    ) -> Result<()> {
        let up_host = self.hosts.host(ServiceKind::Up).await?;
        let base = self.uploads_url(&up_host, session);
        let init = self.init_parts(&base, session).await?;
        debug!("Multipart upload {} started for {}", init.upload_id, session.key);

        let result = self
            .upload_all_parts(&base, session, &init.upload_id, [first, second], source)
            .await;
        if result.is_err() {
            if let Err(e) = self.abort_parts(&base, session, &init.upload_id).await {
                warn!("Abort multipart upload {} failed: {}", init.upload_id, e);
            }
        }
        result
    }

    async fn upload_all_parts(
        &self,
        base: &str,
        session: &UploadSession,
        upload_id: &str,
        head: [Vec<u8>; 2],
        source: &mut UploadSource,
    ) -> Result<()> {
        let mut parts = Vec::new();
        for data in head {
            let part_number = parts.len() as u32 + 1;
            parts.push(self.upload_part(base, session, upload_id, part_number, data).await?);
        }
        loop {
            let data = source.read_part(self.part_size).await?;
            if data.is_empty() {
                break;
            }
            let part_number = parts.len() as u32 + 1;
            parts.push(self.upload_part(base, session, upload_id, part_number, data).await?);
        }
        self.complete_parts(base, session, upload_id, parts).await
    }
}

#[async_trait]
impl ObjectUploader for ResumableUploader {
    async fn put(&self, session: &UploadSession, mut source: UploadSource) -> Result<()> {
        if let Some(size) = source.size() {
            debug!("Uploading {} ({} bytes)", session.key, size);
        }
        let first = source
            .read_part(self.part_size)
            .await
            .map_err(|e| anyhow!("Read upload source failed: {}", e))?;
        if first.len() < self.part_size {
            return self.form_upload(session, first).await;
        }
        let second = source
            .read_part(self.part_size)
            .await
            .map_err(|e| anyhow!("Read upload source failed: {}", e))?;
        if second.is_empty() {
            return self.form_upload(session, first).await;
        }
        self.multipart_upload(session, first, second, &mut source).await
    }
}
