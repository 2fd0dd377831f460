// 重试与退避
//
// 分片级自动重试有上限，超过上限后把最终错误交给调用方

use crate::api::ApiError;
use crate::config::UploadConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 限流时的最短等待时间（毫秒）
const RATE_LIMIT_BACKOFF_MS: u64 = 10000;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次尝试）
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// 计算指数退避延迟
    ///
    /// # 延迟序列（默认配置）
    /// - retry=0: 100ms
    /// - retry=1: 200ms
    /// - retry=2: 400ms
    /// - 最大: 5000ms
    /// - 限流: 至少 10000ms
    pub fn backoff_delay(&self, retry: u32, error: &ApiError) -> Duration {
        let base = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry));
        let delay = base.min(self.max_backoff_ms);

        if error.is_rate_limited() {
            Duration::from_millis(delay.max(RATE_LIMIT_BACKOFF_MS))
        } else {
            Duration::from_millis(delay)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// 可取消的等待
///
/// 返回 false 表示等待期间被取消
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
