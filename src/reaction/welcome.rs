//! 最後の入室者への歓迎
//!
//! 一定時間なにも起きなければ、最後に入室した視聴者を歓迎する。
//! 入室と読み上げ完了のたびにタイマーは巻き戻る。

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::models::UserData;

/// 歓迎文
pub fn welcome_text(name: &str) -> String {
    format!("欢迎{}酱来到直播间", name)
}

/// 歓迎の読み上げ先
pub type WelcomeEmitter = Arc<dyn Fn(String) + Send + Sync>;

/// 最後の入室者スロットとアイドルタイマー
pub struct WelcomeTimer {
    last_user: Mutex<Option<UserData>>,
    reset: Notify,
}

impl WelcomeTimer {
    /// タイマータスクを開始
    pub fn spawn(idle: Duration, cancel: CancellationToken, emit: WelcomeEmitter) -> Arc<Self> {
        let timer = Arc::new(Self {
            last_user: Mutex::new(None),
            reset: Notify::new(),
        });
        tokio::spawn(Self::run(Arc::clone(&timer), idle, cancel, emit));
        timer
    }

    /// 入室者を記録してタイマーを巻き戻す
    pub fn record(&self, user: UserData) {
        *self.last_user.lock() = Some(user);
        self.rearm();
    }

    /// タイマーを巻き戻す
    pub fn rearm(&self) {
        self.reset.notify_one();
    }

    /// 記録中の入室者
    pub fn last_user(&self) -> Option<UserData> {
        self.last_user.lock().clone()
    }

    async fn run(
        self: Arc<Self>,
        idle: Duration,
        cancel: CancellationToken,
        emit: WelcomeEmitter,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = self.reset.notified() => continue,
                _ = tokio::time::sleep(idle) => {
                    let user = self.last_user.lock().take();
                    if let Some(user) = user {
                        tracing::info!("👋 最後の入室者を歓迎: {}", user.uname);
                        emit(welcome_text(&user.uname));
                    }
                }
            }
        }
    }
}
