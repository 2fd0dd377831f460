//! 上传进度跟踪
//!
//! 只保留上一次采样的 (字节数, 时间)，内存占用与文件大小、分片数量无关。
//! 吞吐量 = 两次采样间的字节增量 / 时间间隔；首次采样吞吐量为 0。
//! 回调按采样间隔节流，避免进度事件风暴；传输到达总量时强制发布。

use crate::uploader::TransferError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 默认采样间隔（毫秒）
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 200;

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// 错误回调
pub type ErrorCallback = Arc<dyn Fn(&TransferError) + Send + Sync>;

/// 字节增量接收端（传输层每发送一段数据调用一次）
pub type BytesSink = Arc<dyn Fn(u64) + Send + Sync>;

/// 进度快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// 已传输字节数（不截断，重试可能导致回退）
    pub bytes_transferred: u64,
    /// 总字节数
    pub total_bytes: u64,
    /// 百分比，限制在 [0, 100]
    pub percentage: f64,
    /// 瞬时吞吐量 (bytes/s)
    pub throughput: f64,
    /// 预计剩余秒数，吞吐量为 0 时无法估算
    pub eta_secs: Option<f64>,
}

/// 进度跟踪器
#[derive(Debug)]
pub struct ProgressTracker {
    total_bytes: u64,
    /// 已采样的累计字节数
    transferred: u64,
    /// observe() 累积、尚未采样的增量
    pending: u64,
    /// 上一次采样
    last_sample: Option<(u64, Instant)>,
    /// 节流间隔
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, interval: Duration) -> Self {
        Self {
            total_bytes,
            transferred: 0,
            pending: 0,
            last_sample: None,
            interval,
        }
    }

    /// 采样：累加增量并计算快照
    pub fn sample(&mut self, delta: u64, at: Instant) -> ProgressSnapshot {
        self.transferred = self
            .transferred
            .saturating_add(self.pending)
            .saturating_add(delta);
        self.pending = 0;

        let throughput = match self.last_sample {
            None => 0.0,
            Some((last_bytes, last_at)) => {
                let elapsed = at.saturating_duration_since(last_at).as_secs_f64();
                if elapsed > 0.0 {
                    self.transferred.saturating_sub(last_bytes) as f64 / elapsed
                } else {
                    0.0
                }
            }
        };

        self.last_sample = Some((self.transferred, at));
        self.snapshot(throughput)
    }

    /// 节流采样
    ///
    /// 距上次采样超过间隔，或传输已到达总量时返回快照，否则只累积增量
    pub fn observe(&mut self, delta: u64, at: Instant) -> Option<ProgressSnapshot> {
        self.pending = self.pending.saturating_add(delta);

        let reached = self.transferred.saturating_add(self.pending) >= self.total_bytes;
        let due = match self.last_sample {
            None => true,
            Some((_, last_at)) => at.saturating_duration_since(last_at) >= self.interval,
        };

        if due || reached {
            Some(self.sample(0, at))
        } else {
            None
        }
    }

    /// 回退到 0（整体重试时调用），返回回退后的快照
    pub fn rewind(&mut self, at: Instant) -> ProgressSnapshot {
        self.transferred = 0;
        self.pending = 0;
        self.last_sample = Some((0, at));
        self.snapshot(0.0)
    }

    fn snapshot(&self, throughput: f64) -> ProgressSnapshot {
        let percentage = if self.total_bytes == 0 {
            0.0
        } else {
            (self.transferred as f64 * 100.0 / self.total_bytes as f64).clamp(0.0, 100.0)
        };

        let eta_secs = if throughput > 0.0 {
            Some(self.total_bytes.saturating_sub(self.transferred) as f64 / throughput)
        } else {
            None
        };

        ProgressSnapshot {
            bytes_transferred: self.transferred,
            total_bytes: self.total_bytes,
            percentage,
            throughput,
            eta_secs,
        }
    }
}

/// 进度上报器
///
/// 在传输任务与编排器之间共享同一个跟踪器，统一对外发布快照。
/// 并发分片在各自的工作线程上调用 record，采样和回调在同一把发布锁内完成，
/// 回调收到的快照顺序与采样顺序一致
#[derive(Clone)]
pub struct ProgressReporter {
    tracker: Arc<Mutex<ProgressTracker>>,
    /// 发布锁，跨越采样与回调
    emit: Arc<Mutex<()>>,
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(total_bytes: u64, interval: Duration, callback: Option<ProgressCallback>) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(ProgressTracker::new(total_bytes, interval))),
            emit: Arc::new(Mutex::new(())),
            callback,
        }
    }

    /// 记录增量，到达采样点时发布快照
    pub fn record(&self, delta: u64) {
        let _emit = self.emit.lock();
        // 跟踪器锁只覆盖采样，回调期间 Debug 等只读访问不被阻塞
        let snapshot = self.tracker.lock().observe(delta, Instant::now());
        if let (Some(snapshot), Some(callback)) = (snapshot, &self.callback) {
            callback(snapshot);
        }
    }

    /// 回退进度并立即发布
    pub fn rewind(&self) {
        let _emit = self.emit.lock();
        let snapshot = self.tracker.lock().rewind(Instant::now());
        if let Some(callback) = &self.callback {
            callback(snapshot);
        }
    }

    /// 转为字节增量接收端
    pub fn sink(&self) -> BytesSink {
        let reporter = self.clone();
        Arc::new(move |delta| reporter.record(delta))
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("tracker", &*self.tracker.lock())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
