//! ギフト連撃の集約
//!
//! 同じ視聴者が同じギフトを続けて贈った場合、最後のギフトから一定時間
//! 何も来なければ合計数で一度だけ読み上げる。キーごとのタイマーは一つだけで、
//! 追加のギフトは期限を延ばすだけ。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 集約のキー（視聴者, ギフト種別）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComboKey {
    pub open_id: String,
    pub gift_id: i64,
}

/// 集約結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComboSummary {
    pub uname: String,
    pub gift_name: String,
    pub quantity: u32,
}

impl ComboSummary {
    /// 読み上げ文
    pub fn announcement(&self) -> String {
        format!(
            "谢谢{}酱赠送的{}个{} 么么哒",
            self.uname, self.quantity, self.gift_name
        )
    }
}

/// 集約結果の受け取り先
pub type ComboEmitter = Arc<dyn Fn(ComboSummary) + Send + Sync>;

#[derive(Debug)]
struct ComboEntry {
    uname: String,
    gift_name: String,
    quantity: AtomicU32,
    deadline: Mutex<Instant>,
}

type ComboMap = Arc<Mutex<HashMap<ComboKey, Arc<ComboEntry>>>>;

/// ギフト連撃アグリゲーター
pub struct ComboAggregator {
    entries: ComboMap,
    debounce: Duration,
    cancel: CancellationToken,
    emit: ComboEmitter,
}

impl ComboAggregator {
    pub fn new(debounce: Duration, cancel: CancellationToken, emit: ComboEmitter) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            debounce,
            cancel,
            emit,
        }
    }

    /// ギフトを受け取る
    pub fn on_gift(&self, key: ComboKey, uname: &str, gift_name: &str, quantity: u32) {
        let deadline = Instant::now() + self.debounce;

        let (entry, created) = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) => {
                    *entry.deadline.lock() = deadline;
                    (Arc::clone(entry), false)
                }
                None => {
                    let entry = Arc::new(ComboEntry {
                        uname: uname.to_string(),
                        gift_name: gift_name.to_string(),
                        quantity: AtomicU32::new(0),
                        deadline: Mutex::new(deadline),
                    });
                    entries.insert(key.clone(), Arc::clone(&entry));
                    (entry, true)
                }
            }
        };

        let previous = entry
            .quantity
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(quantity))
            })
            .unwrap_or_else(|current| current);
        let total = previous.saturating_add(quantity);
        tracing::debug!(
            "🎁 連撃: {} {} x{} (累計 {})",
            uname,
            gift_name,
            quantity,
            total
        );

        if created {
            tokio::spawn(run_timer(
                key,
                entry,
                Arc::clone(&self.entries),
                self.cancel.clone(),
                Arc::clone(&self.emit),
            ));
        }
    }

    /// 集約待ちのキー数
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }
}

async fn run_timer(
    key: ComboKey,
    entry: Arc<ComboEntry>,
    entries: ComboMap,
    cancel: CancellationToken,
    emit: ComboEmitter,
) {
    loop {
        let deadline = *entry.deadline.lock();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let expired = {
            let mut entries = entries.lock();
            if *entry.deadline.lock() <= Instant::now() {
                entries.remove(&key);
                true
            } else {
                false
            }
        };

        if expired {
            let summary = ComboSummary {
                uname: entry.uname.clone(),
                gift_name: entry.gift_name.clone(),
                quantity: entry.quantity.load(Ordering::SeqCst),
            };
            tracing::info!("🎁 連撃確定: {}", summary.announcement());
            emit(summary);
            return;
        }
    }
}
