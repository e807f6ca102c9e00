//! User facing bucket handle / 面向调用方的存储桶句柄

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{
    Attributes, BlobReader, BlobWriter, BucketDriver, ErrorCode, ListObject, ListOptions,
    OpContext, SignedUrlOptions, WriterOptions,
};

/// Cloneable handle over any [`BucketDriver`].
#[derive(Clone)]
pub struct Bucket {
    driver: Arc<dyn BucketDriver>,
}

impl Bucket {
    pub fn new(driver: Arc<dyn BucketDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<dyn BucketDriver> {
        &self.driver
    }

    /// Lazily iterate over every entry matching `opts`.
    pub fn list(&self, opts: ListOptions) -> ListIter {
        ListIter {
            driver: self.driver.clone(),
            opts,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn attributes(&self, key: &str) -> Result<Attributes> {
        self.driver.attributes(key).await
    }

    /// Reader over the whole object.
    pub async fn new_reader(&self, key: &str) -> Result<Box<dyn BlobReader>> {
        self.driver.new_range_reader(key, 0, -1).await
    }

    pub async fn new_range_reader(
        &self,
        key: &str,
        offset: i64,
        length: i64,
    ) -> Result<Box<dyn BlobReader>> {
        self.driver.new_range_reader(key, offset, length).await
    }

    /// Read the whole object into memory.
    pub async fn read_all(&self, key: &str) -> Result<Vec<u8>> {
        let mut reader = self.new_reader(key).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn new_writer(&self, key: &str, opts: &WriterOptions) -> Result<Box<dyn BlobWriter>> {
        self.driver.new_writer(key, opts).await
    }

    /// Write `data` as one object.
    pub async fn write_all(&self, key: &str, data: &[u8], opts: &WriterOptions) -> Result<()> {
        let mut writer = self.new_writer(key, opts).await?;
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(std::io::Cursor::new(data.to_vec()));
        writer.upload(reader).await?;
        writer.close().await
    }

    pub async fn copy(&self, ctx: &OpContext, src_key: &str, dst_key: &str) -> Result<()> {
        self.driver.copy(ctx, src_key, dst_key).await
    }

    pub async fn delete(&self, ctx: &OpContext, key: &str) -> Result<()> {
        self.driver.delete(ctx, key).await
    }

    pub async fn signed_url(&self, key: &str, opts: &SignedUrlOptions) -> Result<String> {
        self.driver.signed_url(key, opts).await
    }

    pub fn error_code(&self, err: &anyhow::Error) -> ErrorCode {
        self.driver.error_code(err)
    }
}

/// Cursor driven iterator; requests the next page only when the buffered
/// one is drained.
pub struct ListIter {
    driver: Arc<dyn BucketDriver>,
    opts: ListOptions,
    buffered: VecDeque<ListObject>,
    exhausted: bool,
}

impl ListIter {
    /// Next entry, or `None` once the listing is exhausted.
    pub async fn next(&mut self) -> Result<Option<ListObject>> {
        loop {
            if let Some(object) = self.buffered.pop_front() {
                return Ok(Some(object));
            }
            if self.exhausted {
                return Ok(None);
            }
            let page = self.driver.list_page(&self.opts).await?;
            self.buffered.extend(page.objects);
            match page.next_page_token {
                Some(token) => self.opts.page_token = token,
                None => self.exhausted = true,
            }
        }
    }

    /// Drain the remaining entries.
    pub async fn collect_all(mut self) -> Result<Vec<ListObject>> {
        let mut objects = Vec::new();
        while let Some(object) = self.next().await? {
            objects.push(object);
        }
        Ok(objects)
    }
}
