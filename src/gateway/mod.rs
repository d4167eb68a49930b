//! ライブ配信プラットフォームのイベントゲートウェイ
//!
//! セッション開始・ハートビート・終了のHTTP呼び出しと、イベントを受け取る
//! WebSocketストリームを一つのトレイトにまとめる。

pub mod open_live;
pub mod proto;
pub mod signature;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use open_live::OpenLiveClient;
pub use signature::InitSignature;

use crate::models::RoomData;

/// ゲートウェイエラー型
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTPリクエストに失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    #[error("APIエラー (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("ハンドシェイクに失敗しました: {0}")]
    Handshake(String),

    #[error("ハートビートに失敗しました: {0}")]
    Heartbeat(String),

    #[error("再接続に失敗しました: {0}")]
    Reconnect(String),

    #[error("WebSocketエラー: {0}")]
    WebSocket(String),

    #[error("パケット形式が不正です: {0}")]
    Protocol(String),

    #[error("{0}秒以内に応答がありませんでした")]
    Timeout(u64),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("JSONパースエラー: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl GatewayError {
    /// セッションを終了させるべきか
    ///
    /// 署名不一致はセッション確立前の拒否であり、状態は変わらない。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GatewayError::InvalidSignature)
    }
}

/// 配信者情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnchorInfo {
    pub room_id: i64,
    pub uname: String,
    pub uface: String,
    pub open_id: String,
}

/// セッション開始で得られる接続情報
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionDescriptor {
    /// ゲームID（ハートビート・終了で使用）
    pub game_id: String,
    /// WebSocket認証パケットの本文
    pub auth_body: String,
    /// 接続先WebSocket URL（先頭から順に試行）
    pub websocket_urls: Vec<String>,
    pub anchor: AnchorInfo,
}

impl SessionDescriptor {
    /// クライアントへ返すルーム情報
    pub fn room_data(&self) -> RoomData {
        RoomData {
            room_id: self.anchor.room_id,
            uname: self.anchor.uname.clone(),
            uface: self.anchor.uface.clone(),
        }
    }
}

/// イベントストリームの切断理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// こちらから切断した
    Actively,
    /// 認証に失敗した
    AuthFailed,
    /// プラットフォームから終了通知を受け取った
    ShutdownReceived,
    /// ネットワーク切断
    Network(String),
    /// その他
    Other(String),
}

impl CloseReason {
    /// 再接続せずに終了すべき切断か
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CloseReason::Actively | CloseReason::AuthFailed | CloseReason::ShutdownReceived
        )
    }

    /// 表示名
    pub fn display_name(&self) -> &str {
        match self {
            CloseReason::Actively => "Closed Actively",
            CloseReason::AuthFailed => "Auth Failed",
            CloseReason::ShutdownReceived => "Shutdown Received",
            CloseReason::Network(_) => "Network Error",
            CloseReason::Other(_) => "Unknown",
        }
    }
}

/// イベントストリームから届くメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMessage {
    /// 一件のイベント（JSON本文）
    Event(Vec<u8>),
    /// ストリームが閉じた
    Closed(CloseReason),
}

/// イベントストリーム
pub type EventStream = mpsc::Receiver<GatewayMessage>;

/// ライブイベントゲートウェイ
#[async_trait]
pub trait LiveGateway: Send + Sync {
    /// 認証コードでセッションを開始
    async fn start(&self, code: &str) -> Result<SessionDescriptor, GatewayError>;

    /// セッションを維持するハートビート
    async fn heartbeat(&self, game_id: &str) -> Result<(), GatewayError>;

    /// セッションを終了
    async fn end(&self, game_id: &str) -> Result<(), GatewayError>;

    /// イベントストリームに接続
    ///
    /// 受信側を破棄するとストリームも閉じる。
    async fn connect(&self, descriptor: &SessionDescriptor) -> Result<EventStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_close_reasons() {
        assert!(CloseReason::Actively.is_terminal());
        assert!(CloseReason::AuthFailed.is_terminal());
        assert!(CloseReason::ShutdownReceived.is_terminal());
        assert!(!CloseReason::Network("reset".into()).is_terminal());
        assert!(!CloseReason::Other("eof".into()).is_terminal());
    }

    #[test]
    fn test_room_data_from_descriptor() {
        let descriptor = SessionDescriptor {
            game_id: "g1".to_string(),
            anchor: AnchorInfo {
                room_id: 1234,
                uname: "巫女酱子".to_string(),
                uface: "https://i0.hdslb.com/face.jpg".to_string(),
                open_id: "anchor".to_string(),
            },
            ..Default::default()
        };
        let room = descriptor.room_data();
        assert_eq!(room.room_id, 1234);
        assert_eq!(room.uname, "巫女酱子");
    }
}
