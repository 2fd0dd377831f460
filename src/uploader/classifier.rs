// 传输策略选择

use serde::{Deserialize, Serialize};

/// 传输策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// 单请求直传
    Direct,
    /// 分片上传
    Multipart,
}

/// 根据文件大小选择传输策略
///
/// 恰好等于阈值时走分片上传
pub fn classify(total_bytes: u64, threshold: u64) -> TransferStrategy {
    if total_bytes >= threshold {
        TransferStrategy::Multipart
    } else {
        TransferStrategy::Direct
    }
}
