// 上传分片规划
//
// 分片规则：
// - 分片序号从 1 开始，连续无空洞
// - 除最后一个分片外，每个分片大小均为 chunk_size
// - 最后一个分片可以更小，但不会更大
// - 所有分片长度之和等于文件大小

use crate::api::CompletedPart;
use crate::config::MIB;
use crate::uploader::TransferError;
use std::ops::Range;
use tracing::info;

/// 默认分片大小: 8MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * MIB;

/// 分片描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 分片序号（从 1 开始）
    pub part_number: u32,
    /// 字节范围 [start, end)
    pub range: Range<u64>,
    /// 预签名上传地址，上传前即时获取，用后清空
    pub upload_url: Option<String>,
    /// 存储端返回的完整性标签，上传成功后才有值
    pub integrity_tag: Option<String>,
}

impl PartDescriptor {
    pub fn new(part_number: u32, range: Range<u64>) -> Self {
        Self {
            part_number,
            range,
            upload_url: None,
            integrity_tag: None,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 是否已拿到非空完整性标签
    pub fn is_tagged(&self) -> bool {
        self.integrity_tag
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// 转为合并请求中的条目（未完成时返回 None）
    pub fn completed(&self) -> Option<CompletedPart> {
        match &self.integrity_tag {
            Some(tag) if !tag.is_empty() => Some(CompletedPart {
                part_number: self.part_number,
                integrity_tag: tag.clone(),
            }),
            _ => None,
        }
    }
}

/// 切分分片
///
/// # 参数
/// * `total_bytes` - 文件总大小
/// * `chunk_size` - 分片大小
pub fn plan(total_bytes: u64, chunk_size: u64) -> Result<Vec<PartDescriptor>, TransferError> {
    if total_bytes == 0 {
        return Err(TransferError::validation("文件为空，无法切分分片"));
    }
    if chunk_size == 0 {
        return Err(TransferError::validation("分片大小必须大于 0"));
    }

    let count = total_bytes.div_ceil(chunk_size);
    if count > u32::MAX as u64 {
        return Err(TransferError::validation(format!(
            "分片数量过多: {} (分片大小 {} bytes)",
            count, chunk_size
        )));
    }

    let mut parts = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    let mut part_number = 1u32;

    while offset < total_bytes {
        let end = std::cmp::min(offset + chunk_size, total_bytes);
        parts.push(PartDescriptor::new(part_number, offset..end));
        offset = end;
        part_number += 1;
    }

    info!(
        "切分分片: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
        total_bytes,
        chunk_size,
        parts.len()
    );

    Ok(parts)
}
