//! livelayer サーバー
//!
//! 設定を読み込み、外部サービスのクライアントを組み立てて表示サーバーを起動する。

use clap::Parser;
use livelayer::config::{AppConfig, ConfigManager};
use livelayer::gateway::OpenLiveClient;
use livelayer::profile::SqliteProfileStore;
use livelayer::reply::ChatCompletionsClient;
use livelayer::speech::VoicevoxSynthesizer;
use livelayer::{DisplayServer, SessionDeps, SessionSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// ライブ配信のチャットに読み上げとAI返信で反応するコンパニオンサーバー
#[derive(Parser)]
#[command(name = "livelayer", version, about)]
struct Cli {
    /// 設定ファイル（TOML）のパス
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 待ち受けポート（設定ファイルより優先）
    #[arg(short, long)]
    port: Option<u16>,

    /// ログレベル（設定ファイルより優先）
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let mut config = manager.load_config()?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.log.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // tokio-consoleの初期化（プロファイリング用）
    #[cfg(feature = "debug-tokio")]
    console_subscriber::init();

    // ガードはプロセス終了まで保持する
    #[cfg(not(feature = "debug-tokio"))]
    let _log_guard = livelayer::logging::init_logging(&config.log)?;

    tracing::info!("🎬 Starting livelayer v{}", env!("CARGO_PKG_VERSION"));

    let gateway = OpenLiveClient::new(&config.bilibili, &config.policy)?;
    let replies = ChatCompletionsClient::new(&config.reply)?;
    let synthesizer = VoicevoxSynthesizer::new(&config.speech)?;
    match synthesizer.test_connection().await {
        Ok(true) => tracing::info!("🔊 音声合成エンジンに接続しました"),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠️ 音声合成エンジンに接続できません。読み上げは失敗として報告されます")
        }
    }
    let profiles = SqliteProfileStore::open(config.database.path.as_deref())?;

    let deps = SessionDeps {
        gateway: Arc::new(gateway),
        replies: Arc::new(replies),
        synthesizer: Arc::new(synthesizer),
        profiles: Arc::new(profiles),
    };
    let server = Arc::new(DisplayServer::new(
        &config.server,
        deps,
        SessionSettings::from_config(&config),
    ));
    let listener = server.bind().await?;

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("シグナルハンドラーの設定に失敗: {}", e);
            return;
        }
        tracing::info!("🛑 終了シグナルを受信しました");
        signal_shutdown.cancel();
    });

    server.serve(listener, shutdown).await?;

    tracing::info!("👋 livelayer shutting down");
    Ok(())
}
