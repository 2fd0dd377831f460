// 单请求直传
//
// 小文件整体作为请求体流式发送。进度由传输层从请求体流中拉取的字节数驱动，
// 本模块不做重试，NETWORK 错误是否重试由编排器决定。

use crate::api::{ByteStream, DirectUploadBody, UploadApi};
use crate::uploader::progress::BytesSink;
use crate::uploader::{
    TransferError, TransferErrorKind, TransferStrategy, UploadRequest, UploadResult,
};
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 直传上传器
#[derive(Clone)]
pub struct DirectUploader {
    api: Arc<dyn UploadApi>,
}

impl DirectUploader {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self { api }
    }

    /// 上传整个文件
    ///
    /// `sink` 在传输层每拉取一块数据时收到该块长度
    pub async fn upload(
        &self,
        request: &UploadRequest,
        sink: Option<BytesSink>,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::cancelled());
        }

        info!(
            "[{}] 直传: 文件={}, 大小={} bytes",
            request.id(),
            request.file_name(),
            request.total_bytes()
        );

        let stream = request.source().stream().await.map_err(|e| {
            TransferError::new(
                TransferErrorKind::Network,
                format!("读取文件失败: {}", e),
            )
        })?;

        let stream: ByteStream = match sink {
            Some(sink) => Box::pin(stream.inspect_ok(move |chunk| sink(chunk.len() as u64))),
            None => stream,
        };

        let body = DirectUploadBody {
            file_name: request.file_name().to_string(),
            content_type: request.media_type().to_string(),
            content_length: request.total_bytes(),
            lesson_id: request.destination_hint().map(str::to_string),
            stream,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] 直传已取消", request.id());
                return Err(TransferError::cancelled());
            }
            result = self.api.upload_direct(body) => result,
        };

        match response {
            Ok(response) => {
                info!(
                    "[{}] ✓ 直传成功: key={}, size={}",
                    request.id(),
                    response.storage_key,
                    response.size
                );
                Ok(UploadResult {
                    storage_key: response.storage_key,
                    final_byte_size: response.size,
                    finalized_at: Utc::now(),
                    strategy: TransferStrategy::Direct,
                })
            }
            Err(e) => {
                error!("[{}] 直传失败: {}", request.id(), e);
                Err(TransferError::direct(&e))
            }
        }
    }
}
