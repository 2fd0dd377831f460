// 上传编排器
//
// 对外唯一入口：
// 1. 同步校验媒体类型与大小，校验失败不触网
// 2. 按文件大小选择直传或分片上传
// 3. 所有进度经 ProgressReporter 节流后发布
// 4. 分片会话建立后出现不可恢复错误时先中止会话，再把错误交给调用方
// 5. onError 对最终错误只调用一次

use crate::api::UploadApi;
use crate::config::UploadConfig;
use crate::uploader::progress::{ErrorCallback, ProgressCallback, ProgressReporter};
use crate::uploader::session::{MultipartSession, SessionOptions};
use crate::uploader::{
    classify, retry, DirectUploader, TransferError, TransferErrorKind, TransferStrategy,
    UploadRequest, UploadResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 上传编排器
///
/// 可克隆，多个请求并发提交时只共享配置和控制端点
#[derive(Clone)]
pub struct UploadOrchestrator {
    api: Arc<dyn UploadApi>,
    config: Arc<UploadConfig>,
}

/// 去掉参数部分并转小写，如 `Video/MP4; codecs=avc1` -> `video/mp4`
fn normalize_media_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl UploadOrchestrator {
    pub fn new(api: Arc<dyn UploadApi>, config: UploadConfig) -> Self {
        Self {
            api,
            config: Arc::new(config),
        }
    }

    /// 预检并返回将使用的传输策略
    pub fn validate(&self, request: &UploadRequest) -> Result<TransferStrategy, TransferError> {
        let media_type = normalize_media_type(request.media_type());
        let allowed = self
            .config
            .allowed_media_types
            .iter()
            .any(|t| normalize_media_type(t) == media_type);
        if !allowed {
            return Err(TransferError::validation(format!(
                "不支持的媒体类型: {} (允许: {})",
                request.media_type(),
                self.config.allowed_media_types.join(", ")
            )));
        }

        let total = request.total_bytes();
        if total == 0 {
            return Err(TransferError::validation("文件为空"));
        }
        if total > self.config.max_file_size {
            return Err(TransferError::validation(format!(
                "文件过大: {} bytes (上限 {} bytes)",
                total, self.config.max_file_size
            )));
        }

        Ok(classify(total, self.config.multipart_threshold))
    }

    /// 提交上传请求
    pub async fn submit(
        &self,
        request: UploadRequest,
        on_progress: Option<ProgressCallback>,
        on_error: Option<ErrorCallback>,
        cancel: CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        let result = self.run(&request, on_progress, &cancel).await;

        match &result {
            Ok(r) => info!(
                "[{}] ✓ 上传完成: key={}, size={}, 策略={:?}",
                request.id(),
                r.storage_key,
                r.final_byte_size,
                r.strategy
            ),
            Err(e) => {
                if e.is_cancelled() {
                    info!("[{}] 上传已取消", request.id());
                } else {
                    error!("[{}] 上传失败: {}", request.id(), e);
                }
                if let Some(on_error) = &on_error {
                    on_error(e);
                }
            }
        }
        result
    }

    async fn run(
        &self,
        request: &UploadRequest,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        let strategy = self.validate(request)?;

        info!(
            "[{}] 开始上传: 文件={}, 类型={}, 大小={} bytes, 策略={:?}",
            request.id(),
            request.file_name(),
            request.media_type(),
            request.total_bytes(),
            strategy
        );

        let reporter = ProgressReporter::new(
            request.total_bytes(),
            Duration::from_millis(self.config.progress_interval_ms),
            on_progress,
        );

        match strategy {
            TransferStrategy::Direct => self.run_direct(request, &reporter, cancel).await,
            TransferStrategy::Multipart => self.run_multipart(request, &reporter, cancel).await,
        }
    }

    /// 直传，网络错误最多重试一次，重试时进度回到 0
    async fn run_direct(
        &self,
        request: &UploadRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        let uploader = DirectUploader::new(self.api.clone());
        let mut retried = false;

        loop {
            match uploader.upload(request, Some(reporter.sink()), cancel).await {
                Ok(result) => return Ok(result),
                Err(e)
                    if e.kind == TransferErrorKind::Network
                        && self.config.retry_direct_once
                        && !retried =>
                {
                    retried = true;
                    let delay = Duration::from_millis(self.config.initial_backoff_ms);
                    warn!(
                        "[{}] 直传失败，{}ms 后重试: {}",
                        request.id(),
                        delay.as_millis(),
                        e
                    );
                    if !retry::sleep_or_cancel(delay, cancel).await {
                        return Err(TransferError::cancelled());
                    }
                    reporter.rewind();
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_multipart(
        &self,
        request: &UploadRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        // 已取消的请求不在存储端创建会话
        if cancel.is_cancelled() {
            return Err(TransferError::cancelled());
        }

        let mut session = MultipartSession::initiate(
            self.api.clone(),
            request,
            SessionOptions::from_config(&self.config),
        )
        .await?;
        session.set_progress(reporter.sink());

        let outcome = match session.run_parts(cancel).await {
            Ok(()) => session.complete(cancel).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                let notified = session.abort().await;
                info!(
                    "[{}] 会话 {} 结束于 {:?} ({}/{} 分片已完成)",
                    request.id(),
                    session.session_id(),
                    session.status(),
                    session.tagged_count(),
                    session.parts().len()
                );
                Err(if notified { e.with_abort_attempted() } else { e })
            }
        }
    }
}
