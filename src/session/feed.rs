//! 表示クライアントへの結果フィード
//!
//! すべての結果は `{type, code, msg, data}` の形で送られる。

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{LayerError, CODE_INTERNAL_ERROR, CODE_OK};

/// 成功時のメッセージ
pub const MSG_SUCCESS: &str = "success";

/// 結果の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Room,
    Config,
    Danmu,
    Superchat,
    Gift,
    Guard,
    EnterRoom,
    Llm,
    Tts,
    Heartbeat,
}

/// 一件の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub code: i32,
    pub msg: String,
    pub data: serde_json::Value,
}

impl ResultItem {
    /// 成功結果
    pub fn ok<T: Serialize>(kind: ResultKind, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                kind,
                code: CODE_OK,
                msg: MSG_SUCCESS.to_string(),
                data,
            },
            Err(e) => Self::error(kind, CODE_INTERNAL_ERROR, e.to_string()),
        }
    }

    /// データなしの成功結果
    pub fn ack(kind: ResultKind) -> Self {
        Self {
            kind,
            code: CODE_OK,
            msg: MSG_SUCCESS.to_string(),
            data: serde_json::Value::Null,
        }
    }

    /// エラー結果
    pub fn error(kind: ResultKind, code: i32, msg: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            msg: msg.into(),
            data: serde_json::Value::Null,
        }
    }

    /// エラー型から結果を作る（コードはエラーの種類で決まる）
    pub fn from_error(kind: ResultKind, err: &LayerError) -> Self {
        Self::error(kind, err.code(), err.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// 結果の送り先
pub trait DisplaySink: Send + Sync {
    fn send(&self, item: ResultItem);
}

/// チャネルに流す送り先
#[derive(Debug, Clone)]
pub struct FeedSink {
    sender: mpsc::UnboundedSender<ResultItem>,
}

impl FeedSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResultItem>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DisplaySink for FeedSink {
    fn send(&self, item: ResultItem) {
        if self.sender.send(item).is_err() {
            tracing::debug!("表示クライアントが切断済みのため結果を破棄");
        }
    }
}
