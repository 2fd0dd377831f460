// 对象存储控制端点的请求/响应类型

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::io;
use std::pin::Pin;
use thiserror::Error;

/// 请求体字节流
///
/// reqwest 的 `Body::wrap_stream` 要求 Send + Sync
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// 直传请求体
pub struct DirectUploadBody {
    /// 文件名
    pub file_name: String,
    /// Content-Type
    pub content_type: String,
    /// 内容长度
    pub content_length: u64,
    /// 目标课时 ID
    pub lesson_id: Option<String>,
    /// 文件内容
    pub stream: ByteStream,
}

impl std::fmt::Debug for DirectUploadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectUploadBody")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("lesson_id", &self.lesson_id)
            .finish_non_exhaustive()
    }
}

/// 直传响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadResponse {
    /// 最终对象路径
    pub storage_key: String,
    /// 服务端记录的大小
    pub size: u64,
}

/// 分片上传初始化请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
}

/// 分片上传初始化响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    /// 会话 ID（由存储端分配）
    pub session_id: String,
    /// 最终对象路径
    pub storage_key: String,
    /// 存储端建议的分片大小，0 或缺省表示使用本地配置
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

/// 分片预签名 URL 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlResponse {
    pub upload_url: String,
}

/// 合并请求中的单个分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub integrity_tag: String,
}

/// 合并请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// 按 partNumber 升序排列
    pub parts: Vec<CompletedPart>,
    pub storage_key: String,
    pub file_size: u64,
}

/// 合并响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub storage_key: String,
    pub size: u64,
    pub finalized_at: DateTime<Utc>,
}

/// 控制端点调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络层错误（连接、超时、请求体中断）
    #[error("请求发送失败: {0}")]
    Transport(#[from] reqwest::Error),

    /// 非 2xx 响应
    #[error("服务端返回错误: status={status}, body={body}")]
    Status { status: u16, body: String },

    /// 预签名 URL 已过期
    #[error("预签名 URL 已过期")]
    UrlExpired,

    /// PUT 响应缺少 ETag
    #[error("响应缺少完整性标签 (ETag)")]
    MissingTag,

    /// 响应体无法解析
    #[error("解析响应失败: {0}")]
    Decode(String),

    /// 读取本地数据失败
    #[error("读取源数据失败: {0}")]
    Io(#[from] io::Error),
}

impl ApiError {
    /// 是否可重试
    ///
    /// 网络错误、5xx、429 可重试；其余 4xx、缺少标签不可重试
    pub fn is_retriable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 429,
            ApiError::UrlExpired => true,
            ApiError::MissingTag | ApiError::Decode(_) | ApiError::Io(_) => false,
        }
    }

    /// 是否为限流
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::Status { status: 429, .. })
    }

    /// HTTP 状态码（如有）
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
