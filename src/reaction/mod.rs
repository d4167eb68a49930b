//! 視聴者イベントへの反応に使う部品
//!
//! - `history`: 直近チャットの履歴
//! - `window`: 期間内の回数カウンター
//! - `combo`: ギフト連撃の集約
//! - `trigger`: AI返信の起動判定
//! - `welcome`: 最後の入室者への歓迎タイマー

pub mod combo;
pub mod history;
pub mod trigger;
pub mod welcome;
pub mod window;

pub use combo::{ComboAggregator, ComboEmitter, ComboKey, ComboSummary};
pub use history::{ChatMessage, MessageHistory};
pub use trigger::{ReplyGate, SuppressReason, TriggerRequest, Verdict};
pub use welcome::{welcome_text, WelcomeEmitter, WelcomeTimer};
pub use window::SlidingWindowCounter;
