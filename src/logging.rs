//! 日志系统配置
//!
//! 控制台输出 + 可选的按天滚动日志文件，启动时清理过期日志

use crate::config::LogConfig;
use chrono::{DateTime, Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀，滚动后为 lesson-upload.log.YYYY-MM-DD
const LOG_FILE_PREFIX: &str = "lesson-upload.log";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// RUST_LOG 环境变量优先于配置中的级别
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // 控制台输出层
    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    }

    if let Err(e) = fs::create_dir_all(&config.log_dir) {
        eprintln!("创建日志目录失败: {:?}, 错误: {}", config.log_dir, e);
        // 回退到只使用控制台输出
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return LogGuard { _file_guard: None };
    }

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    // 文件输出层（不带 ANSI 颜色）
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}",
        config.log_dir, config.retention_days, config.level
    );

    cleanup_old_logs(&config.log_dir, config.retention_days);

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理过期日志文件，返回删除数量
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let expired = match expired_logs(log_dir, today, retention_days) {
        Ok(expired) => expired,
        Err(e) => {
            warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let removed = expired
        .iter()
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e);
                false
            }
        })
        .count();

    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }
    removed
}

/// 列出早于 today - retention_days 的滚动日志
fn expired_logs(log_dir: &Path, today: NaiveDate, retention_days: u32) -> io::Result<Vec<PathBuf>> {
    let cutoff = today - chrono::Duration::days(i64::from(retention_days));

    let expired = fs::read_dir(log_dir)?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            if !name.starts_with(LOG_FILE_PREFIX) || !entry.file_type().ok()?.is_file() {
                return None;
            }
            // 文件名不带日期（未滚动的当天文件）按修改日期算
            let date = log_date(&name).or_else(|| modified_date(&entry))?;
            (date < cutoff).then(|| entry.path())
        })
        .collect();
    Ok(expired)
}

/// lesson-upload.log.YYYY-MM-DD -> YYYY-MM-DD
fn log_date(filename: &str) -> Option<NaiveDate> {
    let date = filename.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn modified_date(entry: &fs::DirEntry) -> Option<NaiveDate> {
    let modified: DateTime<Local> = entry.metadata().ok()?.modified().ok()?.into();
    Some(modified.date_naive())
}
