// 上传数据源
//
// 数据源只读：按字节范围切片读取，或整体转为字节流，均不修改源

use crate::api::ByteStream;
use bytes::Bytes;
use futures::stream;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// 字节流分块大小（直传时每次交给传输层的数据量）
const STREAM_BLOCK_SIZE: usize = 256 * 1024;

/// 上传数据源
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// 本地文件（长度在创建时确定）
    File { path: PathBuf, len: u64 },
    /// 内存缓冲区
    Memory(Bytes),
}

impl UploadSource {
    /// 从本地文件创建
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("不是普通文件: {:?}", path),
            ));
        }
        Ok(Self::File {
            path,
            len: metadata.len(),
        })
    }

    /// 从内存数据创建
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Memory(data.into())
    }

    /// 数据总长度
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(data) => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取指定字节范围
    pub async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        if range.start > range.end || range.end > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "字节范围越界: {}..{} (总长度 {})",
                    range.start,
                    range.end,
                    self.len()
                ),
            ));
        }

        match self {
            Self::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            Self::File { path, .. } => {
                let path = path.clone();
                let start = range.start;
                let size = (range.end - range.start) as usize;

                let buffer = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
                    let mut file = std::fs::File::open(&path)?;
                    file.seek(SeekFrom::Start(start))?;

                    let mut buffer = vec![0u8; size];
                    file.read_exact(&mut buffer)?;
                    Ok(buffer)
                })
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

                debug!(
                    "读取分片数据: bytes={}-{}, 大小={} bytes",
                    range.start,
                    range.end.saturating_sub(1),
                    size
                );

                Ok(Bytes::from(buffer))
            }
        }
    }

    /// 整体转为字节流
    pub async fn stream(&self) -> io::Result<ByteStream> {
        match self {
            Self::Memory(data) => {
                let data = data.clone();
                let blocks: Vec<io::Result<Bytes>> = (0..data.len())
                    .step_by(STREAM_BLOCK_SIZE)
                    .map(|start| {
                        let end = (start + STREAM_BLOCK_SIZE).min(data.len());
                        Ok(data.slice(start..end))
                    })
                    .collect();
                let stream: ByteStream = Box::pin(stream::iter(blocks));
                Ok(stream)
            }
            Self::File { path, .. } => {
                let file = tokio::fs::File::open(path).await?;
                let stream: ByteStream =
                    Box::pin(ReaderStream::with_capacity(file, STREAM_BLOCK_SIZE));
                Ok(stream)
            }
        }
    }
}
