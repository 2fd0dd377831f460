use anyhow::Context;
use clap::Parser;
use lesson_media_upload::{
    logging, AppConfig, HttpUploadApi, ProgressCallback, ProgressSnapshot, UploadOrchestrator,
    UploadRequest,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 上传一个课时视频
#[derive(Debug, Parser)]
#[command(name = "lesson-upload", version, about)]
struct Args {
    /// 要上传的文件
    file: PathBuf,

    /// 目标课时 ID
    #[arg(long, env = "LESSON_ID")]
    lesson: Option<String>,

    /// 媒体类型，不指定时按扩展名推断
    #[arg(long = "type")]
    media_type: Option<String>,

    /// 配置文件路径
    #[arg(long, default_value = "config/app.toml")]
    config: String,
}

/// 按扩展名推断媒体类型
fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_or_default(&args.config).await;

    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&config.log);

    info!("lesson-upload v{} 启动", env!("CARGO_PKG_VERSION"));

    let media_type = args
        .media_type
        .clone()
        .unwrap_or_else(|| guess_media_type(&args.file).to_string());

    let request = UploadRequest::from_path(&args.file, media_type, args.lesson.clone())
        .await
        .with_context(|| format!("无法读取文件: {:?}", args.file))?;

    let api = HttpUploadApi::new(&config.api).context("创建 HTTP 客户端失败")?;
    let orchestrator = UploadOrchestrator::new(Arc::new(api), config.upload.clone());

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl+C，取消上传...");
            cancel_on_signal.cancel();
        }
    });

    let on_progress: ProgressCallback = Arc::new(|snapshot: ProgressSnapshot| {
        info!(
            "进度: {:.1}% ({}/{} bytes), 速度: {:.1} KB/s, 剩余: {}",
            snapshot.percentage,
            snapshot.bytes_transferred,
            snapshot.total_bytes,
            snapshot.throughput / 1024.0,
            snapshot
                .eta_secs
                .map(|s| format!("{:.0}s", s))
                .unwrap_or_else(|| "-".to_string())
        );
    });

    match orchestrator
        .submit(request, Some(on_progress), None, cancel)
        .await
    {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&e)?);
            Err(e.into())
        }
    }
}
