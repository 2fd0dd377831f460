// 上传请求与结果

use crate::uploader::{TransferStrategy, UploadSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// 上传请求
///
/// 创建后不可修改；克隆只复制数据源句柄
#[derive(Debug, Clone)]
pub struct UploadRequest {
    id: String,
    source: Arc<UploadSource>,
    file_name: String,
    media_type: String,
    total_bytes: u64,
    destination_hint: Option<String>,
}

impl UploadRequest {
    /// 创建上传请求，`total_bytes` 取数据源长度
    pub fn new(
        source: UploadSource,
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        destination_hint: Option<String>,
    ) -> Self {
        let total_bytes = source.len();
        Self {
            id: Uuid::new_v4().to_string(),
            source: Arc::new(source),
            file_name: file_name.into(),
            media_type: media_type.into(),
            total_bytes,
            destination_hint,
        }
    }

    /// 从本地文件创建，文件名取路径最后一段
    pub async fn from_path(
        path: impl AsRef<Path>,
        media_type: impl Into<String>,
        destination_hint: Option<String>,
    ) -> io::Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let source = UploadSource::from_path(path).await?;
        Ok(Self::new(source, file_name, media_type, destination_hint))
    }

    /// 请求 ID（日志关联用）
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &UploadSource {
        &self.source
    }

    pub(crate) fn shared_source(&self) -> Arc<UploadSource> {
        Arc::clone(&self.source)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// 目标位置提示（如课时 ID）
    pub fn destination_hint(&self) -> Option<&str> {
        self.destination_hint.as_deref()
    }
}

/// 上传结果，仅在上传成功时产生一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// 最终对象路径
    pub storage_key: String,
    /// 最终字节数
    pub final_byte_size: u64,
    /// 完成时间
    pub finalized_at: DateTime<Utc>,
    /// 使用的传输策略
    pub strategy: TransferStrategy,
}
