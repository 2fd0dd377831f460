// 上传错误类型

use crate::api::ApiError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferErrorKind {
    /// 客户端预检失败（不触网）
    Validation,
    /// 服务端拒绝直传内容（类型或大小）
    Rejected,
    /// 预签名 URL 申请失败
    UrlIssuance,
    /// 分片传输失败
    PartTransfer,
    /// 分片会话初始化失败
    SessionInit,
    /// 合并失败
    Completion,
    /// 直传网络错误
    Network,
    /// 已取消
    Cancelled,
}

impl std::fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferErrorKind::Validation => "VALIDATION",
            TransferErrorKind::Rejected => "REJECTED",
            TransferErrorKind::UrlIssuance => "URL_ISSUANCE",
            TransferErrorKind::PartTransfer => "PART_TRANSFER",
            TransferErrorKind::SessionInit => "SESSION_INIT",
            TransferErrorKind::Completion => "COMPLETION",
            TransferErrorKind::Network => "NETWORK",
            TransferErrorKind::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// 上传错误
///
/// 可序列化，前端据此渲染"上传失败，重试"或"第 N 个分片失败"
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("[{kind}] {message}")]
pub struct TransferError {
    pub kind: TransferErrorKind,
    /// 失败分片序号（仅分片相关错误）
    pub part_number: Option<u32>,
    pub message: String,
    /// 是否已尝试通知存储端释放会话
    #[serde(default)]
    pub abort_attempted: bool,
}

impl TransferError {
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            part_number: None,
            message: message.into(),
            abort_attempted: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Validation, message)
    }

    pub fn cancelled() -> Self {
        Self::new(TransferErrorKind::Cancelled, "上传已取消")
    }

    pub fn session_init(source: &ApiError) -> Self {
        Self::new(
            TransferErrorKind::SessionInit,
            format!("初始化分片会话失败: {}", source),
        )
    }

    pub fn completion(source: &ApiError) -> Self {
        Self::new(
            TransferErrorKind::Completion,
            format!("合并分片失败: {}", source),
        )
    }

    pub fn url_issuance(part_number: u32, source: &ApiError) -> Self {
        Self::new(
            TransferErrorKind::UrlIssuance,
            format!("分片 #{} 获取上传地址失败: {}", part_number, source),
        )
        .with_part(part_number)
    }

    pub fn part_transfer(part_number: u32, message: impl std::fmt::Display) -> Self {
        Self::new(
            TransferErrorKind::PartTransfer,
            format!("分片 #{} 上传失败: {}", part_number, message),
        )
        .with_part(part_number)
    }

    /// 直传错误：4xx 视为服务端拒绝，其余视为网络错误
    ///
    /// 响应体无法解析时服务端已经接收了文件，按拒绝处理，避免重复上传
    pub fn direct(source: &ApiError) -> Self {
        let kind = match source {
            ApiError::Decode(_) => TransferErrorKind::Rejected,
            _ => match source.status() {
                Some(status) if (400..500).contains(&status) && status != 429 => {
                    TransferErrorKind::Rejected
                }
                _ => TransferErrorKind::Network,
            },
        };
        Self::new(kind, format!("直传失败: {}", source))
    }

    pub fn with_part(mut self, part_number: u32) -> Self {
        self.part_number = Some(part_number);
        self
    }

    pub fn with_abort_attempted(mut self) -> Self {
        self.abort_attempted = true;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TransferErrorKind::Cancelled
    }
}
