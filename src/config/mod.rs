// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 1 MiB
pub const MIB: u64 = 1024 * 1024;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 控制端点配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 控制端点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 根地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 单个请求超时（秒），需覆盖最大分片或直传文件的传输时间
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bearer 令牌
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("lesson-media-upload/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            auth_token: None,
            user_agent: default_user_agent(),
        }
    }
}

/// 上传配置（大小单位均为字节）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小，默认 8MiB
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 分片上传阈值，文件大小 >= 阈值时走分片上传，默认 100MiB
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
    /// 允许的媒体类型
    #[serde(default = "default_allowed_media_types")]
    pub allowed_media_types: Vec<String>,
    /// 单文件大小上限，默认 5GiB
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// 分片最大自动重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 单个会话内并发上传的分片数，1 表示顺序上传
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,
    /// 进度回调最小间隔（毫秒）
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// 直传网络失败时是否自动重试一次
    #[serde(default = "default_retry_direct_once")]
    pub retry_direct_once: bool,
    /// 预签名 URL 过期后重新申请的次数
    #[serde(default = "default_url_refresh_attempts")]
    pub url_refresh_attempts: u32,
}

fn default_chunk_size() -> u64 {
    crate::uploader::chunk::DEFAULT_CHUNK_SIZE
}

fn default_multipart_threshold() -> u64 {
    100 * MIB
}

fn default_allowed_media_types() -> Vec<String> {
    vec![
        "video/mp4".to_string(),
        "video/webm".to_string(),
        "video/quicktime".to_string(),
        "video/x-matroska".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    5 * 1024 * MIB
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_part_concurrency() -> usize {
    1
}

fn default_progress_interval_ms() -> u64 {
    crate::uploader::progress::DEFAULT_PROGRESS_INTERVAL_MS
}

fn default_retry_direct_once() -> bool {
    true
}

fn default_url_refresh_attempts() -> u32 {
    1
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            multipart_threshold: default_multipart_threshold(),
            allowed_media_types: default_allowed_media_types(),
            max_file_size: default_max_file_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            part_concurrency: default_part_concurrency(),
            progress_interval_ms: default_progress_interval_ms(),
            retry_direct_once: default_retry_direct_once(),
            url_refresh_attempts: default_url_refresh_attempts(),
        }
    }
}

impl UploadConfig {
    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size 必须大于 0");
        }
        if self.multipart_threshold == 0 {
            anyhow::bail!("multipart_threshold 必须大于 0");
        }
        if self.max_file_size == 0 {
            anyhow::bail!("max_file_size 必须大于 0");
        }
        if self.allowed_media_types.is_empty() {
            anyhow::bail!("allowed_media_types 不能为空");
        }
        if self.part_concurrency == 0 {
            anyhow::bail!("part_concurrency 至少为 1");
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            anyhow::bail!(
                "initial_backoff_ms ({}) 不能大于 max_backoff_ms ({})",
                self.initial_backoff_ms,
                self.max_backoff_ms
            );
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .upload
            .validate()
            .context("配置文件中的上传参数无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload
            .validate()
            .context("保存配置失败：上传参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 仅在文件不存在时写出默认配置，避免覆盖用户写错的配置
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
