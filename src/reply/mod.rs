//! 会話AIによる返信
//!
//! 直近のチャット履歴を文脈として渡し、一件の返信テキストを受け取る。

pub mod chat_completions;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use chat_completions::ChatCompletionsClient;

/// 会話AIエラー型
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("HTTPリクエストに失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    #[error("APIエラー (ステータス {status}): {message}")]
    Api { status: u16, message: String },

    #[error("返信が空でした")]
    EmptyResponse,

    #[error("文脈となるチャット履歴がありません")]
    EmptyHistory,

    #[error("JSONパースエラー: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// 文脈として渡す一件の発言
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    /// 発言者の表示名
    pub user: String,
    pub message: String,
}

impl ChatTurn {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ChatTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "用户【{}】说：{}", self.user, self.message)
    }
}

/// 会話AIサービス
#[async_trait]
pub trait ReplyService: Send + Sync {
    /// 古い順に並んだ履歴を渡し、最後の発言への返信を得る
    async fn reply(&self, system_prompt: &str, history: &[ChatTurn]) -> Result<String, ReplyError>;
}

/// 履歴をAIに渡す一つのユーザーメッセージへ整形
///
/// 最後の発言が返信対象で、それ以前は文脈として扱う。
pub fn format_history(history: &[ChatTurn]) -> Result<String, ReplyError> {
    let Some((current, earlier)) = history.split_last() else {
        return Err(ReplyError::EmptyHistory);
    };

    let mut content = String::new();
    if !earlier.is_empty() {
        content.push_str("以下是历史用户发言：\n");
        for turn in earlier {
            content.push_str(&turn.to_string());
            content.push('\n');
        }
    }
    content.push_str("以下是当前用户发言：\n");
    content.push_str(&current.to_string());
    Ok(content)
}
