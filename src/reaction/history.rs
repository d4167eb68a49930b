//! 直近チャットの履歴
//!
//! 保持期間を過ぎたメッセージと容量を超えた古いメッセージは自動的に捨てる。
//! AI返信の文脈と、発言頻度の集計の両方に使う。

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// 履歴に載る一件のチャット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// 発言者ID
    pub open_id: String,
    /// 表示名
    pub uname: String,
    pub text: String,
    pub received_at: Instant,
}

impl ChatMessage {
    pub fn new(
        open_id: impl Into<String>,
        uname: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            open_id: open_id.into(),
            uname: uname.into(),
            text: text.into(),
            received_at: Instant::now(),
        }
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.received_at)
    }
}

/// 時間と件数で制限されたメッセージ履歴
#[derive(Debug)]
pub struct MessageHistory {
    messages: Mutex<VecDeque<ChatMessage>>,
    retention: Duration,
    capacity: usize,
}

impl MessageHistory {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            retention,
            capacity: capacity.max(1),
        }
    }

    fn evict_expired(&self, messages: &mut VecDeque<ChatMessage>, now: Instant) {
        while messages
            .front()
            .is_some_and(|oldest| oldest.age(now) > self.retention)
        {
            messages.pop_front();
        }
    }

    /// メッセージを追加
    pub fn push(&self, message: ChatMessage) {
        let mut messages = self.messages.lock();
        self.evict_expired(&mut messages, message.received_at);
        while messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
    }

    /// 保持中の全メッセージ（古い順）
    pub fn snapshot(&self, now: Instant) -> Vec<ChatMessage> {
        let mut messages = self.messages.lock();
        self.evict_expired(&mut messages, now);
        messages.iter().cloned().collect()
    }

    /// 指定期間内のメッセージ（古い順）
    pub fn within(&self, window: Duration, now: Instant) -> Vec<ChatMessage> {
        let mut messages = self.messages.lock();
        self.evict_expired(&mut messages, now);
        messages
            .iter()
            .filter(|m| m.age(now) <= window)
            .cloned()
            .collect()
    }

    /// 指定期間内に発言したユーザー数
    pub fn distinct_senders(&self, window: Duration, now: Instant) -> usize {
        let mut messages = self.messages.lock();
        self.evict_expired(&mut messages, now);
        messages
            .iter()
            .filter(|m| m.age(now) <= window)
            .map(|m| m.open_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// 指定期間内のメッセージ数
    pub fn count_within(&self, window: Duration, now: Instant) -> usize {
        let mut messages = self.messages.lock();
        self.evict_expired(&mut messages, now);
        messages.iter().filter(|m| m.age(now) <= window).count()
    }

    /// 最新のメッセージ
    pub fn latest(&self, now: Instant) -> Option<ChatMessage> {
        let mut messages = self.messages.lock();
        self.evict_expired(&mut messages, now);
        messages.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}
