//! ログ初期化
//!
//! 標準出力へはコンパクト形式、ファイルへはJSON形式（日次ローテーション）で出力する。

use anyhow::Result;
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

/// ログ出力先ディレクトリを決定
pub fn resolve_log_dir(config: &LogConfig) -> Option<PathBuf> {
    if let Some(dir) = &config.log_dir {
        return Some(dir.clone());
    }
    ProjectDirs::from("dev", "sifyfy", "livelayer").map(|dirs| dirs.data_dir().join("logs"))
}

/// ログを初期化
///
/// 戻り値のガードはプロセス終了まで保持すること（破棄するとファイル出力が止まる）。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let (file_layer, guard) = match resolve_log_dir(config).filter(|_| config.enable_file_logging)
    {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, "livelayer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
