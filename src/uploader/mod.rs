// 上传编排模块
//
// - 按文件大小选择直传或分片上传
// - 分片逐个即时申请预签名 URL，PUT 后收集完整性标签
// - 分片级有界重试（指数退避）
// - 会话状态机：失败后可只重传未完成的分片
// - 进度节流发布

pub mod chunk;
pub mod classifier;
pub mod direct;
pub mod error;
pub mod orchestrator;
pub mod part;
pub mod progress;
pub mod request;
pub mod retry;
pub mod session;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk::{PartDescriptor, DEFAULT_CHUNK_SIZE};
pub use classifier::{classify, TransferStrategy};
pub use direct::DirectUploader;
pub use error::{TransferError, TransferErrorKind};
pub use orchestrator::UploadOrchestrator;
pub use part::PartUploader;
pub use progress::{
    ErrorCallback, ProgressCallback, ProgressReporter, ProgressSnapshot, ProgressTracker,
};
pub use request::{UploadRequest, UploadResult};
pub use retry::RetryPolicy;
pub use session::{MultipartSession, SessionOptions, SessionStatus};
pub use source::UploadSource;
