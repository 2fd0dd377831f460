// 单分片上传
//
// 每个分片的上传流程：
// 1. 即时申请该分片的预签名 URL（URL 只用一次，不缓存）
// 2. 从数据源切出分片字节
// 3. PUT 到预签名 URL，携带 Content-MD5，从响应头取完整性标签
//
// 错误处理：
// - 网络错误、5xx、429 按指数退避自动重试，次数有上限
// - URL 过期时重新申请 URL，不计入重试次数
// - 4xx、缺少标签立即失败
// - 每次申请 URL 和 PUT 之前检查取消令牌，进行中的请求随取消一起中止

use crate::api::{ApiError, UploadApi};
use crate::uploader::{retry, PartDescriptor, RetryPolicy, TransferError, UploadSource};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 分片上传器
#[derive(Clone)]
pub struct PartUploader {
    api: Arc<dyn UploadApi>,
    retry: RetryPolicy,
    /// URL 过期后重新申请的次数上限
    url_refresh_attempts: u32,
}

/// 单次尝试失败的阶段
enum AttemptError {
    Issuance(ApiError),
    Transfer(ApiError),
    Cancelled,
}

/// 计算分片的 Content-MD5（base64 编码的 MD5 摘要）
pub fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}

impl PartUploader {
    pub fn new(api: Arc<dyn UploadApi>, retry: RetryPolicy, url_refresh_attempts: u32) -> Self {
        Self {
            api,
            retry,
            url_refresh_attempts,
        }
    }

    /// 上传一个分片，成功时把完整性标签写入描述并返回
    ///
    /// 失败时描述保持未完成状态，调用方可直接重试同一分片
    pub async fn upload_part(
        &self,
        session_id: &str,
        part: &mut PartDescriptor,
        source: &UploadSource,
        cancel: &CancellationToken,
    ) -> Result<String, TransferError> {
        let part_number = part.part_number;

        debug!(
            "[分片#{}] 开始上传 (范围: {}-{}, 大小: {} bytes)",
            part_number,
            part.range.start,
            part.range.end.saturating_sub(1),
            part.size()
        );

        if cancel.is_cancelled() {
            return Err(TransferError::cancelled().with_part(part_number));
        }

        let data = source.read_range(part.range.clone()).await.map_err(|e| {
            TransferError::part_transfer(part_number, format!("读取分片数据失败: {}", e))
        })?;
        let md5 = content_md5(&data);

        let mut retries = 0u32;
        let mut refreshes = 0u32;

        loop {
            let outcome = self
                .attempt(session_id, part, data.clone(), &md5, cancel)
                .await;
            // 预签名 URL 只使用一次
            part.upload_url = None;

            // issuance 为 true 时最终按 URL 申请失败上报
            let (api_error, issuance) = match outcome {
                Ok(tag) => {
                    info!("[分片#{}] ✓ 上传成功, etag={}", part_number, tag);
                    part.integrity_tag = Some(tag.clone());
                    return Ok(tag);
                }
                Err(AttemptError::Cancelled) => {
                    info!("[分片#{}] 上传已取消", part_number);
                    return Err(TransferError::cancelled().with_part(part_number));
                }
                Err(AttemptError::Transfer(ApiError::UrlExpired))
                    if refreshes < self.url_refresh_attempts =>
                {
                    refreshes += 1;
                    warn!(
                        "[分片#{}] 预签名 URL 已过期，重新申请 ({}/{})",
                        part_number, refreshes, self.url_refresh_attempts
                    );
                    continue;
                }
                // URL 反复过期按 URL 申请失败处理
                Err(AttemptError::Transfer(ApiError::UrlExpired)) => (ApiError::UrlExpired, true),
                Err(AttemptError::Issuance(e)) => (e, true),
                Err(AttemptError::Transfer(e)) => (e, false),
            };

            let retriable =
                api_error.is_retriable() && !matches!(api_error, ApiError::UrlExpired);
            if !retriable || retries >= self.retry.max_retries {
                error!(
                    "[分片#{}] 上传失败 (已重试 {} 次, 可重试={}): {}",
                    part_number, retries, retriable, api_error
                );
                return Err(if issuance {
                    TransferError::url_issuance(part_number, &api_error)
                } else {
                    TransferError::part_transfer(part_number, &api_error)
                });
            }

            let delay = self.retry.backoff_delay(retries, &api_error);
            retries += 1;
            warn!(
                "[分片#{}] 上传失败，等待 {}ms 后重试 ({}/{}): {}",
                part_number,
                delay.as_millis(),
                retries,
                self.retry.max_retries,
                api_error
            );

            if !retry::sleep_or_cancel(delay, cancel).await {
                return Err(TransferError::cancelled().with_part(part_number));
            }
        }
    }

    /// 单次尝试：申请 URL + PUT
    async fn attempt(
        &self,
        session_id: &str,
        part: &mut PartDescriptor,
        data: Bytes,
        md5: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        let url = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            result = self.api.part_url(session_id, part.part_number) => {
                result.map_err(AttemptError::Issuance)?
            }
        };
        part.upload_url = Some(url.clone());

        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            result = self.api.put_part(&url, data, md5) => result.map_err(AttemptError::Transfer),
        }
    }
}
