//! AI返信の起動判定
//!
//! 返信数・発言者数・連続文字・確率の順に判定し、一つでも引っかかれば起動しない。
//! 強制（スーパーチャット）の場合は配信状態と機能設定だけを確認する。

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::time::Instant;

use super::history::MessageHistory;
use super::window::SlidingWindowCounter;
use crate::config::ReactionPolicy;
use crate::reply::ChatTurn;

/// 判定に使うセッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerRequest {
    /// 判定を省略して起動する
    pub force: bool,
    /// 配信中か
    pub live: bool,
    /// AI返信が有効か
    pub replies_enabled: bool,
}

/// 起動しない理由
#[derive(Debug, Clone, PartialEq)]
pub enum SuppressReason {
    Offline,
    Disabled,
    NoHistory,
    /// 期間内の返信数が上限に達した
    ReplyLimit(usize),
    /// 発言者が多すぎる
    BusyChat(usize),
    /// 同じ文字の繰り返し
    RepeatedText,
    Probability { roll: f64, skip: f64, recent: usize },
}

/// 判定結果
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Proceed,
    Suppressed(SuppressReason),
}

impl Verdict {
    pub fn proceeds(&self) -> bool {
        matches!(self, Verdict::Proceed)
    }
}

/// すべて同じ文字からなる文字列か
pub fn is_repeated_chars(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

/// 直近メッセージ数に応じたスキップ確率
pub fn skip_probability(policy: &ReactionPolicy, recent: usize) -> f64 {
    if recent == 0 {
        0.0
    } else if recent <= policy.probability_low_tier_max {
        policy.probability_low_tier_skip
    } else {
        policy.probability_high_tier_skip
    }
}

/// AI返信の起動ゲート
pub struct ReplyGate {
    policy: Arc<ReactionPolicy>,
    rng: Mutex<StdRng>,
}

impl ReplyGate {
    pub fn new(policy: Arc<ReactionPolicy>) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 乱数を固定したゲート（テスト用）
    pub fn with_seed(policy: Arc<ReactionPolicy>, seed: u64) -> Self {
        Self {
            policy,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// 起動するかを判定
    pub fn evaluate(
        &self,
        request: TriggerRequest,
        history: &MessageHistory,
        replies: &SlidingWindowCounter,
        now: Instant,
    ) -> Verdict {
        if !request.live {
            return Verdict::Suppressed(SuppressReason::Offline);
        }
        if !request.replies_enabled {
            return Verdict::Suppressed(SuppressReason::Disabled);
        }
        if request.force {
            return Verdict::Proceed;
        }

        let policy = &self.policy;

        let reply_count = replies.count(now);
        if reply_count >= policy.reply_limit_count {
            tracing::info!("🤫 返信数上限のためAI返信を見送り: {}", reply_count);
            return Verdict::Suppressed(SuppressReason::ReplyLimit(reply_count));
        }

        let senders = history.distinct_senders(policy.active_user_window(), now);
        if senders >= policy.active_user_limit {
            tracing::info!("🤫 発言者が多いためAI返信を見送り: {}", senders);
            return Verdict::Suppressed(SuppressReason::BusyChat(senders));
        }

        let Some(latest) = history.latest(now) else {
            return Verdict::Suppressed(SuppressReason::NoHistory);
        };
        if is_repeated_chars(&latest.text) {
            tracing::info!("🤫 繰り返し文字のためAI返信を見送り: {}", latest.text);
            return Verdict::Suppressed(SuppressReason::RepeatedText);
        }

        // 起動のきっかけになったメッセージ自身は数えない
        let recent = history
            .count_within(policy.probability_window(), now)
            .saturating_sub(1);
        let skip = skip_probability(policy, recent);
        let roll: f64 = self.rng.lock().gen();
        if roll < skip {
            tracing::info!(
                "🎲 確率判定でAI返信を見送り: roll={:.2} skip={:.2} recent={}",
                roll,
                skip,
                recent
            );
            return Verdict::Suppressed(SuppressReason::Probability { roll, skip, recent });
        }

        Verdict::Proceed
    }

    /// AIに渡す文脈（古い順、発言者名付き）
    pub fn context(&self, history: &MessageHistory, now: Instant) -> Vec<ChatTurn> {
        history
            .within(self.policy.reply_context(), now)
            .into_iter()
            .map(|m| ChatTurn::new(m.uname, m.text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::history::ChatMessage;
    use std::time::Duration;

    const LIVE: TriggerRequest = TriggerRequest {
        force: false,
        live: true,
        replies_enabled: true,
    };

    fn fixtures() -> (Arc<ReactionPolicy>, MessageHistory, SlidingWindowCounter) {
        let policy = Arc::new(ReactionPolicy::default());
        let history = MessageHistory::new(policy.message_retention(), policy.history_capacity);
        let replies = SlidingWindowCounter::new(policy.reply_limit_window());
        (policy, history, replies)
    }

    #[test]
    fn test_repeated_chars() {
        assert!(is_repeated_chars("6666"));
        assert!(is_repeated_chars("哈哈哈"));
        assert!(is_repeated_chars("?"));
        assert!(!is_repeated_chars("哈哈哈?"));
        assert!(!is_repeated_chars(""));
    }

    #[test]
    fn test_skip_tiers() {
        let policy = ReactionPolicy::default();
        assert_eq!(skip_probability(&policy, 0), 0.0);
        assert_eq!(skip_probability(&policy, 1), 0.3);
        assert_eq!(skip_probability(&policy, 10), 0.3);
        assert_eq!(skip_probability(&policy, 11), 0.7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_and_disabled_block_even_forced() {
        let (policy, history, replies) = fixtures();
        let gate = ReplyGate::with_seed(policy, 1);
        let now = Instant::now();

        let offline = TriggerRequest { force: true, live: false, replies_enabled: true };
        assert_eq!(
            gate.evaluate(offline, &history, &replies, now),
            Verdict::Suppressed(SuppressReason::Offline)
        );
        let disabled = TriggerRequest { force: true, live: true, replies_enabled: false };
        assert_eq!(
            gate.evaluate(disabled, &history, &replies, now),
            Verdict::Suppressed(SuppressReason::Disabled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gates_in_order() {
        let (policy, history, replies) = fixtures();
        let gate = ReplyGate::with_seed(Arc::clone(&policy), 7);

        history.push(ChatMessage::new("a", "A", "哈哈哈哈"));
        assert_eq!(
            gate.evaluate(LIVE, &history, &replies, Instant::now()),
            Verdict::Suppressed(SuppressReason::RepeatedText)
        );

        for i in 0..5 {
            history.push(ChatMessage::new(format!("u{}", i), "U", "你好呀"));
        }
        assert_eq!(
            gate.evaluate(LIVE, &history, &replies, Instant::now()),
            Verdict::Suppressed(SuppressReason::BusyChat(6))
        );

        for _ in 0..10 {
            replies.record(Instant::now());
        }
        assert_eq!(
            gate.evaluate(LIVE, &history, &replies, Instant::now()),
            Verdict::Suppressed(SuppressReason::ReplyLimit(10))
        );

        let forced = TriggerRequest { force: true, ..LIVE };
        assert!(gate.evaluate(forced, &history, &replies, Instant::now()).proceeds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_chat_always_proceeds() {
        let (policy, history, replies) = fixtures();
        let gate = ReplyGate::with_seed(policy, 42);

        history.push(ChatMessage::new("a", "A", "主人晚上好"));
        for _ in 0..1000 {
            assert!(gate.evaluate(LIVE, &history, &replies, Instant::now()).proceeds());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_tier_proceeds_about_thirty_percent() {
        let (policy, history, replies) = fixtures();
        let gate = ReplyGate::with_seed(policy, 2024);

        // 2人で16件（判定対象を除いて15件）
        for i in 0..16 {
            let sender = if i % 2 == 0 { "a" } else { "b" };
            history.push(ChatMessage::new(sender, sender, format!("第{}条", i)));
        }

        let trials = 10_000;
        let proceeded = (0..trials)
            .filter(|_| gate.evaluate(LIVE, &history, &replies, Instant::now()).proceeds())
            .count();
        let ratio = proceeded as f64 / trials as f64;
        assert!((0.27..0.33).contains(&ratio), "ratio = {}", ratio);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_window() {
        let (policy, history, _) = fixtures();
        let gate = ReplyGate::with_seed(policy, 0);

        history.push(ChatMessage::new("a", "老观众", "十一分钟前"));
        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        history.push(ChatMessage::new("b", "青云", "刚刚"));

        let context = gate.context(&history, Instant::now());
        assert_eq!(context, vec![ChatTurn::new("青云", "刚刚")]);
    }
}
