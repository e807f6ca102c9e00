//! Generic blob storage abstraction / 通用对象存储抽象
//!
//! Drivers only provide primitives (list page, head, range read, writer,
//! copy, delete, signed URL). Pagination, whole-object reads and URL based
//! opening live in [`Bucket`] and [`BucketMux`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

pub mod bucket;
pub mod manager;

pub use bucket::{Bucket, ListIter};
pub use manager::{BucketMux, BucketOpener};

/// Listing options / 列举选项
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    pub delimiter: String,
    /// Zero means driver default / 0 表示使用驱动默认值
    pub page_size: usize,
    /// Opaque cursor returned by the previous page / 上一页返回的游标
    pub page_token: Vec<u8>,
}

/// One listing entry / 列举条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObject {
    pub key: String,
    pub mod_time: Option<DateTime<Utc>>,
    pub size: i64,
    pub md5: Vec<u8>,
    /// Produced from a delimiter common prefix / 由公共前缀生成的目录条目
    pub is_dir: bool,
}

impl ListObject {
    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mod_time: None,
            size: 0,
            md5: Vec::new(),
            is_dir: true,
        }
    }
}

/// One page of a listing / 一页列举结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListObject>,
    /// Absent when the listing is exhausted / 为空表示已列举完
    pub next_page_token: Option<Vec<u8>>,
}

/// Object attributes / 对象属性
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub cache_control: String,
    pub content_disposition: String,
    pub content_encoding: String,
    pub content_language: String,
    pub content_type: String,
    pub etag: String,
    pub md5: Vec<u8>,
    /// -1 when the size is unknown
    pub size: i64,
    pub mod_time: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

/// Attributes captured from the response that opened a reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderAttributes {
    pub content_type: String,
    pub mod_time: Option<DateTime<Utc>>,
    pub size: i64,
}

impl From<&Attributes> for ReaderAttributes {
    fn from(attrs: &Attributes) -> Self {
        Self {
            content_type: attrs.content_type.clone(),
            mod_time: attrs.mod_time,
            size: attrs.size,
        }
    }
}

/// Writer options / 写入选项
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    pub content_type: String,
    /// User metadata / 用户自定义元数据
    pub metadata: HashMap<String, String>,
}

/// HTTP method a signed URL is requested for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
    Other(String),
}

impl HttpMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            _ => HttpMethod::Other(method.to_string()),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Put => f.write_str("PUT"),
            HttpMethod::Delete => f.write_str("DELETE"),
            HttpMethod::Other(m) => f.write_str(m),
        }
    }
}

/// Signed URL options / 签名URL选项
#[derive(Debug, Clone)]
pub struct SignedUrlOptions {
    pub method: HttpMethod,
    /// May be zero or negative; passed through unchanged
    pub expiry: Duration,
}

impl SignedUrlOptions {
    pub fn get(expiry: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            expiry,
        }
    }
}

/// Portable error classification / 可移植错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unknown,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    PermissionDenied,
    FailedPrecondition,
    Unimplemented,
    Canceled,
    DeadlineExceeded,
}

/// Errors produced by an [`OpContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Caller-supplied cancellation and deadline for one operation
/// 调用方提供的取消信号与超时
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<tokio::time::Instant>,
}

impl OpContext {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(tokio::time::Instant::now() + timeout),
        }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ContextError::Canceled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}

/// Pass-through byte stream over an object body / 对象读取器
pub trait BlobReader: AsyncRead + Unpin + Send {
    fn attributes(&self) -> &ReaderAttributes;
}

/// Push-style object writer / 对象写入器
///
/// Either a sequence of `write` calls followed by exactly one `close`, or a
/// single `upload` call. Not safe for concurrent writes.
#[async_trait]
pub trait BlobWriter: Send {
    /// Write one chunk; may suspend while the upload catches up.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Upload a complete source in one call.
    async fn upload(&mut self, reader: Box<dyn AsyncRead + Unpin + Send>) -> Result<()>;

    /// Finish the upload and report its outcome.
    async fn close(&mut self) -> Result<()>;
}

/// Bucket driver interface (primitive operations only) / 存储桶驱动接口
#[async_trait]
pub trait BucketDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Fetch exactly one page of a listing / 列举一页
    async fn list_page(&self, opts: &ListOptions) -> Result<ListPage>;

    /// Object attributes without the body / 获取对象属性
    async fn attributes(&self, key: &str) -> Result<Attributes>;

    /// Open a reader over `[offset, offset + length)`; a negative length
    /// reads to the end.
    async fn new_range_reader(
        &self,
        key: &str,
        offset: i64,
        length: i64,
    ) -> Result<Box<dyn BlobReader>>;

    /// Open a writer / 打开写入器
    async fn new_writer(&self, key: &str, opts: &WriterOptions) -> Result<Box<dyn BlobWriter>>;

    /// Server side copy / 服务端复制
    async fn copy(&self, ctx: &OpContext, src_key: &str, dst_key: &str) -> Result<()>;

    /// Delete one object / 删除对象
    async fn delete(&self, ctx: &OpContext, key: &str) -> Result<()>;

    /// Pre-signed URL for `key` / 预签名URL
    async fn signed_url(&self, key: &str, opts: &SignedUrlOptions) -> Result<String>;

    /// Classify an error returned by this driver.
    fn error_code(&self, err: &anyhow::Error) -> ErrorCode {
        match err.downcast_ref::<ContextError>() {
            Some(ContextError::Canceled) => ErrorCode::Canceled,
            Some(ContextError::DeadlineExceeded) => ErrorCode::DeadlineExceeded,
            None => ErrorCode::Unknown,
        }
    }
}
