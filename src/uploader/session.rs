// 分片上传会话
//
// 生命周期：initiate → run_parts → complete（或 abort）
//
// 状态流转：
// INITIATED → IN_PROGRESS → COMPLETING → COMPLETED
//     │            │             │
//     └────────────┴─────────────┴──→ ABORTED
//                  │             │
//                  └──→ FAILED ←─┘
//
// 状态只前进不后退，唯一例外：分片阶段失败的 FAILED 可以重新进入 IN_PROGRESS，
// 重试时只上传尚未拿到完整性标签的分片。合并被拒绝的 FAILED 不可恢复。

use crate::api::{CompleteRequest, CompletedPart, InitiateRequest, UploadApi};
use crate::config::UploadConfig;
use crate::uploader::progress::BytesSink;
use crate::uploader::{
    chunk, PartDescriptor, PartUploader, RetryPolicy, TransferError, TransferErrorKind,
    TransferStrategy, UploadRequest, UploadResult, UploadSource,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// 已初始化
    Initiated,
    /// 分片上传中
    InProgress,
    /// 合并中
    Completing,
    /// 已完成
    Completed,
    /// 已中止
    Aborted,
    /// 失败
    Failed,
}

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// 配置的分片大小（存储端返回非零值时以存储端为准）
    pub chunk_size: u64,
    pub retry: RetryPolicy,
    pub url_refresh_attempts: u32,
    /// 分片并发数，1 为顺序上传
    pub part_concurrency: usize,
}

impl SessionOptions {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            retry: RetryPolicy::from_config(config),
            url_refresh_attempts: config.url_refresh_attempts,
            part_concurrency: config.part_concurrency.max(1),
        }
    }
}

/// 分片上传会话
pub struct MultipartSession {
    api: Arc<dyn UploadApi>,
    uploader: PartUploader,
    source: Arc<UploadSource>,
    session_id: String,
    storage_key: String,
    total_bytes: u64,
    parts: Vec<PartDescriptor>,
    status: SessionStatus,
    /// FAILED 是否由分片阶段导致（可重新进入 IN_PROGRESS）
    resumable: bool,
    part_concurrency: usize,
    progress: Option<BytesSink>,
}

impl MultipartSession {
    /// 初始化会话并切分分片
    pub async fn initiate(
        api: Arc<dyn UploadApi>,
        request: &UploadRequest,
        options: SessionOptions,
    ) -> Result<Self, TransferError> {
        let initiate = InitiateRequest {
            file_name: request.file_name().to_string(),
            file_type: request.media_type().to_string(),
            file_size: request.total_bytes(),
            lesson_id: request.destination_hint().map(str::to_string),
        };

        info!(
            "[{}] 初始化分片会话: 文件={}, 大小={} bytes",
            request.id(),
            initiate.file_name,
            initiate.file_size
        );

        let response = api.initiate_multipart(&initiate).await.map_err(|e| {
            error!("[{}] 初始化分片会话失败: {}", request.id(), e);
            TransferError::session_init(&e)
        })?;

        let chunk_size = match response.chunk_size {
            Some(size) if size > 0 => {
                if size != options.chunk_size {
                    debug!(
                        "存储端指定分片大小 {} bytes (配置为 {} bytes)",
                        size, options.chunk_size
                    );
                }
                size
            }
            _ => options.chunk_size,
        };

        let parts = match chunk::plan(request.total_bytes(), chunk_size) {
            Ok(parts) => parts,
            Err(e) => {
                // 会话已在存储端创建，尽力释放
                if let Err(abort_err) = api.abort_multipart(&response.session_id).await {
                    warn!("释放分片会话失败: {}", abort_err);
                }
                return Err(e.with_abort_attempted());
            }
        };

        info!(
            "[{}] 分片会话已创建: session={}, key={}, 分片数={}",
            request.id(),
            response.session_id,
            response.storage_key,
            parts.len()
        );

        let uploader = PartUploader::new(api.clone(), options.retry, options.url_refresh_attempts);

        Ok(Self {
            api,
            uploader,
            source: request.shared_source(),
            session_id: response.session_id,
            storage_key: response.storage_key,
            total_bytes: request.total_bytes(),
            parts,
            status: SessionStatus::Initiated,
            resumable: false,
            part_concurrency: options.part_concurrency.max(1),
            progress: None,
        })
    }

    /// 设置进度接收端（每个分片成功后上报其字节数）
    pub fn set_progress(&mut self, sink: BytesSink) {
        self.progress = Some(sink);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn parts(&self) -> &[PartDescriptor] {
        &self.parts
    }

    /// 已拿到完整性标签的分片数
    pub fn tagged_count(&self) -> usize {
        self.parts.iter().filter(|p| p.is_tagged()).count()
    }

    /// 上传所有未完成的分片
    ///
    /// 取消时返回 CANCELLED，状态保持 IN_PROGRESS，由调用方决定是否中止会话
    pub async fn run_parts(&mut self, cancel: &CancellationToken) -> Result<(), TransferError> {
        match self.status {
            SessionStatus::Initiated | SessionStatus::InProgress => {}
            SessionStatus::Failed if self.resumable => {
                info!(
                    "[{}] 重新上传未完成的分片 ({}/{} 已完成)",
                    self.session_id,
                    self.tagged_count(),
                    self.parts.len()
                );
            }
            other => {
                return Err(TransferError::validation(format!(
                    "会话状态 {:?} 不允许上传分片",
                    other
                )));
            }
        }
        self.status = SessionStatus::InProgress;
        self.resumable = false;

        let result = if self.part_concurrency > 1 {
            self.run_parts_concurrent(cancel).await
        } else {
            self.run_parts_sequential(cancel).await
        };

        if let Err(e) = &result {
            if !e.is_cancelled() {
                self.status = SessionStatus::Failed;
                self.resumable = true;
            }
        } else {
            info!(
                "[{}] 所有 {} 个分片上传完成",
                self.session_id,
                self.parts.len()
            );
        }
        result
    }

    async fn run_parts_sequential(&mut self, cancel: &CancellationToken) -> Result<(), TransferError> {
        for part in self.parts.iter_mut() {
            if part.is_tagged() {
                continue;
            }
            self.uploader
                .upload_part(&self.session_id, part, &self.source, cancel)
                .await?;
            if let Some(sink) = &self.progress {
                sink(part.size());
            }
        }
        Ok(())
    }

    /// 并发上传
    ///
    /// Semaphore 限制同时进行的分片数，JoinSet 收集结果并按下标写回；
    /// 任一分片失败后停止调度，已在传输的分片随子令牌一起取消
    async fn run_parts_concurrent(&mut self, cancel: &CancellationToken) -> Result<(), TransferError> {
        let pending: Vec<usize> = self
            .parts
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_tagged())
            .map(|(i, _)| i)
            .collect();

        info!(
            "[{}] 并发上传 {} 个分片，并发数: {}",
            self.session_id,
            pending.len(),
            self.part_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.part_concurrency));
        let halt = cancel.child_token();
        let mut join_set = JoinSet::new();

        for index in pending {
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let uploader = self.uploader.clone();
            let session_id = self.session_id.clone();
            let source = self.source.clone();
            let halt = halt.clone();
            let progress = self.progress.clone();
            let mut part = self.parts[index].clone();

            join_set.spawn(async move {
                let result = uploader
                    .upload_part(&session_id, &mut part, &source, &halt)
                    .await;
                match &result {
                    Ok(_) => {
                        if let Some(sink) = &progress {
                            sink(part.size());
                        }
                    }
                    Err(e) if !e.is_cancelled() => halt.cancel(),
                    Err(_) => {}
                }
                drop(permit);
                (index, part, result)
            });
        }

        let mut failure: Option<TransferError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, part, result)) => {
                    self.parts[index] = part;
                    if let Err(e) = result {
                        if e.is_cancelled() {
                            continue;
                        }
                        // 报告序号最小的失败分片
                        let lower = match &failure {
                            Some(current) => e.part_number < current.part_number,
                            None => true,
                        };
                        if lower {
                            failure = Some(e);
                        }
                    }
                }
                Err(e) => {
                    error!("分片任务异常: {}", e);
                    halt.cancel();
                    if failure.is_none() {
                        failure = Some(TransferError::new(
                            TransferErrorKind::PartTransfer,
                            format!("分片任务异常: {}", e),
                        ));
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(TransferError::cancelled());
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 合并分片
    ///
    /// 存在未完成分片时直接返回 VALIDATION，不调用合并端点
    pub async fn complete(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        let completed: Option<Vec<CompletedPart>> =
            self.parts.iter().map(PartDescriptor::completed).collect();
        let parts = match completed {
            Some(parts) => parts,
            None => {
                let missing = self.parts.len() - self.tagged_count();
                return Err(TransferError::validation(format!(
                    "还有 {} 个分片未完成，无法合并",
                    missing
                )));
            }
        };

        if self.status != SessionStatus::InProgress {
            return Err(TransferError::validation(format!(
                "会话状态 {:?} 不能合并",
                self.status
            )));
        }

        self.status = SessionStatus::Completing;
        info!(
            "[{}] 合并 {} 个分片: key={}",
            self.session_id,
            parts.len(),
            self.storage_key
        );

        let request = CompleteRequest {
            parts,
            storage_key: self.storage_key.clone(),
            file_size: self.total_bytes,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] 合并已取消", self.session_id);
                return Err(TransferError::cancelled());
            }
            result = self.api.complete_multipart(&self.session_id, &request) => result,
        };

        match response {
            Ok(response) => {
                self.status = SessionStatus::Completed;
                info!(
                    "[{}] ✓ 合并成功: key={}, size={}",
                    self.session_id, response.storage_key, response.size
                );
                Ok(UploadResult {
                    storage_key: response.storage_key,
                    final_byte_size: response.size,
                    finalized_at: response.finalized_at,
                    strategy: TransferStrategy::Multipart,
                })
            }
            Err(e) => {
                self.status = SessionStatus::Failed;
                self.resumable = false;
                error!("[{}] 合并失败: {}", self.session_id, e);
                Err(TransferError::completion(&e))
            }
        }
    }

    /// 中止会话
    ///
    /// 返回是否通知了存储端。通知失败只记录日志
    pub async fn abort(&mut self) -> bool {
        match self.status {
            SessionStatus::Completed | SessionStatus::Aborted => return false,
            SessionStatus::Failed => {}
            _ => self.status = SessionStatus::Aborted,
        }

        info!("[{}] 中止分片会话", self.session_id);
        if let Err(e) = self.api.abort_multipart(&self.session_id).await {
            warn!("[{}] 中止分片会话失败: {}", self.session_id, e);
        }
        true
    }
}

impl std::fmt::Debug for MultipartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartSession")
            .field("session_id", &self.session_id)
            .field("storage_key", &self.storage_key)
            .field("status", &self.status)
            .field("parts", &self.parts.len())
            .field("tagged", &self.tagged_count())
            .finish()
    }
}
