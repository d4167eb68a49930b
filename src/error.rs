//! クレート共通のエラー型
//!
//! 各サブシステムのエラー（ゲートウェイ、音声合成、AI返信、プロフィール保存）を
//! 一つにまとめ、クライアントへ返す結果コードへの対応付けを提供する。

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::profile::ProfileError;
use crate::reply::ReplyError;
use crate::speech::SpeechError;

/// 成功
pub const CODE_OK: i32 = 0;
/// クライアント起因のエラー（不正なコマンド、署名不一致など）
pub const CODE_BAD_REQUEST: i32 = 400;
/// サーバー内部・下流サービスのエラー
pub const CODE_INTERNAL_ERROR: i32 = 500;

/// livelayer全体のエラー型
#[derive(Debug, Error)]
pub enum LayerError {
    /// クライアントコマンドの形式・順序が不正
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONパースエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    General(#[from] anyhow::Error),
}

impl LayerError {
    /// プロトコルエラーを作成
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// クライアントに返す安定した結果コード
    pub fn code(&self) -> i32 {
        match self {
            LayerError::Protocol(_) | LayerError::Json(_) => CODE_BAD_REQUEST,
            LayerError::Gateway(GatewayError::InvalidSignature) => CODE_BAD_REQUEST,
            _ => CODE_INTERNAL_ERROR,
        }
    }

    /// セッションを終了させるべきエラーかどうか
    ///
    /// ゲートウェイ層の失敗のみが致命的で、コンテンツ処理の失敗はタスク単位で閉じる。
    pub fn is_fatal(&self) -> bool {
        matches!(self, LayerError::Gateway(err) if err.is_fatal())
    }
}

/// livelayerの結果型
pub type LayerResult<T> = Result<T, LayerError>;
