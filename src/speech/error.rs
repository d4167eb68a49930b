//! 読み上げ用エラー型

use thiserror::Error;

/// 読み上げエラー型
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("接続に失敗しました: {0}")]
    Connection(String),

    #[error("HTTPリクエストに失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    #[error("音声ファイルの書き込みに失敗しました: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONパースエラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("キューが満杯です")]
    QueueFull,

    #[error("キューは既に閉じられています")]
    Closed,

    #[error("音声合成が{0}秒以内に完了しませんでした")]
    Timeout(u64),
}
