// Lesson Media Upload Library
// 课时视频上传编排核心库

// 对象存储控制端点
pub mod api;

// 配置管理模块
pub mod config;

// 日志系统
pub mod logging;

// 上传编排模块
pub mod uploader;

// 导出常用类型
pub use api::{ApiError, HttpUploadApi, UploadApi};
pub use config::{ApiConfig, AppConfig, LogConfig, UploadConfig};
pub use uploader::{
    ErrorCallback, MultipartSession, ProgressCallback, ProgressSnapshot, SessionStatus,
    TransferError, TransferErrorKind, TransferStrategy, UploadOrchestrator, UploadRequest,
    UploadResult, UploadSource,
};
