//! Kodo streaming writer / Kodo流式写入器
//!
//! `write` pushes chunks into a bounded channel; the first write spawns a
//! background task that drives the uploader with the channel's receiving end
//! as an unknown-length source. A full channel suspends `write`, so the
//! caller never outruns the upload.
//!
//! State flow: Unstarted -> Streaming -> (close) -> Closed. When the upload
//! task exits early its receiver is dropped, the next `write` sees the send
//! fail, collects the task's error and moves to Failed until closed.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::error::KodoError;
use super::upload::{ObjectUploader, UploadSession, UploadSource};
use crate::storage::BlobWriter;

/// Buffer size used when copying a source into a started writer
const COPY_BUF_SIZE: usize = 64 * 1024;

enum WriterState {
    Unstarted,
    Streaming {
        tx: mpsc::Sender<Bytes>,
        task: JoinHandle<Result<()>>,
    },
    /// Upload task already exited with this error
    Failed(Arc<anyhow::Error>),
    Closed,
}

/// Streaming upload writer / 流式上传写入器
pub struct KodoWriter {
    session: UploadSession,
    uploader: Arc<dyn ObjectUploader>,
    pipe_capacity: usize,
    state: WriterState,
}

impl KodoWriter {
    pub fn new(session: UploadSession, uploader: Arc<dyn ObjectUploader>, pipe_capacity: usize) -> Self {
        Self {
            session,
            uploader,
            pipe_capacity: pipe_capacity.max(1),
            state: WriterState::Unstarted,
        }
    }

    fn start(&mut self) {
        let (tx, rx) = mpsc::channel::<Bytes>(self.pipe_capacity);
        let reader = StreamReader::new(ReceiverStream::new(rx).map(Ok::<Bytes, std::io::Error>));
        let source = UploadSource::unknown(Box::new(reader));
        let uploader = self.uploader.clone();
        let session = self.session.clone();

        debug!("Starting streaming upload of {}", session.key);
        let task = tokio::spawn(async move { uploader.put(&session, source).await });
        self.state = WriterState::Streaming { tx, task };
    }

    /// Join an upload task that stopped consuming before end of stream.
    async fn collect_failure(&mut self) -> Arc<anyhow::Error> {
        let err = match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Streaming { tx, task } => {
                drop(tx);
                match task.await {
                    Ok(Err(e)) => Arc::new(e),
                    Ok(Ok(())) => Arc::new(anyhow!("upload finished before all data was written")),
                    Err(e) => Arc::new(anyhow!("upload task failed: {}", e)),
                }
            }
            WriterState::Failed(err) => err,
            WriterState::Unstarted | WriterState::Closed => {
                Arc::new(anyhow!("upload task is not running"))
            }
        };
        self.state = WriterState::Failed(err.clone());
        err
    }
}

#[async_trait]
impl BlobWriter for KodoWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if matches!(self.state, WriterState::Unstarted) {
            self.start();
        }
        let tx = match &self.state {
            WriterState::Streaming { tx, .. } => tx.clone(),
            WriterState::Failed(err) => return Err(KodoError::Upload(err.clone()).into()),
            WriterState::Closed => return Err(KodoError::WriterClosed.into()),
            WriterState::Unstarted => return Err(anyhow!("upload task is not running")),
        };
        if tx.send(Bytes::copy_from_slice(buf)).await.is_ok() {
            return Ok(buf.len());
        }
        drop(tx);
        let err = self.collect_failure().await;
        Err(KodoError::Upload(err).into())
    }

    async fn upload(&mut self, mut reader: Box<dyn AsyncRead + Unpin + Send>) -> Result<()> {
        match &self.state {
            WriterState::Failed(err) => return Err(KodoError::Upload(err.clone()).into()),
            WriterState::Closed => return Err(KodoError::WriterClosed.into()),
            WriterState::Unstarted | WriterState::Streaming { .. } => {}
        }

        if matches!(self.state, WriterState::Unstarted) {
            self.state = WriterState::Closed;
            debug!("Uploading {} from a single source", self.session.key);
            return self
                .uploader
                .put(&self.session, UploadSource::unknown(reader))
                .await;
        }

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n]).await?;
        }
        self.close().await
    }

    async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, WriterState::Closed) {
            WriterState::Unstarted | WriterState::Closed => Ok(()),
            WriterState::Failed(err) => Err(KodoError::Upload(err).into()),
            WriterState::Streaming { tx, task } => {
                drop(tx);
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow!("upload task failed: {}", e)),
                }
            }
        }
    }
}
