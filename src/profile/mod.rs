//! 視聴者プロフィールの保存
//!
//! チャット・ギフト等で観測したバッジ状態を保存し、入室時の歓迎判定に使う。

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteProfileStore;

use crate::models::UserData;

/// プロフィール保存エラー型
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("データベースエラー: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("データベースパスを解決できません: {0}")]
    Path(String),

    #[error("バックグラウンドタスクが失敗しました: {0}")]
    Task(String),
}

/// 視聴者プロフィール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub open_id: String,
    pub uname: String,
    pub fans_medal_wearing_status: bool,
    pub fans_medal_level: i32,
    pub fans_medal_name: String,
    pub guard_level: i32,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// 観測した視聴者情報から作成
    pub fn from_user(user: &UserData) -> Self {
        Self {
            open_id: user.open_id.clone(),
            uname: user.uname.clone(),
            fans_medal_wearing_status: user.fans_medal_wearing_status,
            fans_medal_level: user.fans_medal_level,
            fans_medal_name: user.fans_medal_name.clone(),
            guard_level: user.guard_level,
            updated_at: Utc::now(),
        }
    }

    /// 入室時に即時歓迎する対象か
    pub fn deserves_welcome(&self, min_medal_level: i32) -> bool {
        (self.fans_medal_wearing_status && self.fans_medal_level >= min_medal_level)
            || self.guard_level > 0
    }
}

/// プロフィールストア
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// 作成または更新
    async fn upsert(&self, profile: UserProfile) -> Result<(), ProfileError>;

    /// 取得（未登録ならNone）
    async fn get(&self, open_id: &str) -> Result<Option<UserProfile>, ProfileError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(wearing: bool, level: i32, guard: i32) -> UserProfile {
        UserProfile {
            open_id: "u1".to_string(),
            uname: "青云".to_string(),
            fans_medal_wearing_status: wearing,
            fans_medal_level: level,
            fans_medal_name: "巫女酱".to_string(),
            guard_level: guard,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_welcome_threshold() {
        assert!(profile(true, 15, 0).deserves_welcome(15));
        assert!(!profile(true, 14, 0).deserves_welcome(15));
        assert!(!profile(false, 20, 0).deserves_welcome(15));
        assert!(profile(false, 0, 3).deserves_welcome(15));
    }
}
