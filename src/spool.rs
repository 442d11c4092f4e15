//! 上传内容暂存：预算内的数据留在内存，超出部分落盘到匿名临时文件。
//!
//! 暂存后的内容可以多次打开并回绕，供校验和与拷贝两次读取。

use bytes::{Bytes, BytesMut};
use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, AsyncWriteExt, ReadBuf};
use tracing::debug;

/// 单个请求内所有文件分片共享的内存预算。
#[derive(Debug)]
pub struct MemoryBudget {
    remaining: usize,
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    fn try_take(&mut self, len: usize) -> bool {
        if len <= self.remaining {
            self.remaining -= len;
            true
        } else {
            false
        }
    }

    fn release(&mut self, len: usize) {
        self.remaining = self.remaining.saturating_add(len);
    }
}

/// 已完整接收的分片内容。
#[derive(Debug)]
pub enum PartContent {
    Memory(Bytes),
    Disk { file: std::fs::File, len: u64 },
}

impl PartContent {
    pub fn len(&self) -> u64 {
        match self {
            PartContent::Memory(bytes) => bytes.len() as u64,
            PartContent::Disk { len, .. } => *len,
        }
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self, PartContent::Disk { .. })
    }

    /// 打开一个从头读取的句柄。
    pub async fn open(&self) -> io::Result<PartReader> {
        match self {
            PartContent::Memory(bytes) => Ok(PartReader::Memory(Cursor::new(bytes.clone()))),
            PartContent::Disk { file, .. } => {
                let mut file = File::from_std(file.try_clone()?);
                file.seek(SeekFrom::Start(0)).await?;
                Ok(PartReader::Disk(file))
            }
        }
    }
}

/// 可回绕的分片读取句柄。
#[derive(Debug)]
pub enum PartReader {
    Memory(Cursor<Bytes>),
    Disk(File),
}

impl AsyncRead for PartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            PartReader::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
            PartReader::Disk(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

impl AsyncSeek for PartReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        match self.get_mut() {
            PartReader::Memory(cursor) => Pin::new(cursor).start_seek(position),
            PartReader::Disk(file) => Pin::new(file).start_seek(position),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match self.get_mut() {
            PartReader::Memory(cursor) => Pin::new(cursor).poll_complete(cx),
            PartReader::Disk(file) => Pin::new(file).poll_complete(cx),
        }
    }
}

/// 逐块接收分片数据，超出内存预算时整体转存到临时文件。
#[derive(Debug, Default)]
pub struct Spooler {
    buffer: BytesMut,
    file: Option<File>,
    len: u64,
}

impl Spooler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&mut self, chunk: &[u8], budget: &mut MemoryBudget) -> io::Result<()> {
        self.len += chunk.len() as u64;
        if let Some(file) = self.file.as_mut() {
            return file.write_all(chunk).await;
        }
        if budget.try_take(chunk.len()) {
            self.buffer.extend_from_slice(chunk);
            return Ok(());
        }

        let spilled = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(io::Error::other)??;
        let mut file = File::from_std(spilled);
        file.write_all(&self.buffer).await?;
        file.write_all(chunk).await?;
        budget.release(self.buffer.len());
        self.buffer = BytesMut::new();
        self.file = Some(file);
        debug!(bytes = self.len, "part exceeded memory budget, spilled to temp file");
        Ok(())
    }

    pub async fn finish(self) -> io::Result<PartContent> {
        match self.file {
            Some(mut file) => {
                file.flush().await?;
                Ok(PartContent::Disk {
                    file: file.into_std().await,
                    len: self.len,
                })
            }
            None => Ok(PartContent::Memory(self.buffer.freeze())),
        }
    }
}
