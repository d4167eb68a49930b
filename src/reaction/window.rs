use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// 一定期間内の発生回数を数えるカウンター
#[derive(Debug)]
pub struct SlidingWindowCounter {
    window: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            hits: Mutex::new(VecDeque::new()),
        }
    }

    fn expire(&self, hits: &mut VecDeque<Instant>, now: Instant) {
        while hits
            .front()
            .is_some_and(|hit| now.saturating_duration_since(*hit) > self.window)
        {
            hits.pop_front();
        }
    }

    /// 発生を記録
    pub fn record(&self, now: Instant) {
        let mut hits = self.hits.lock();
        self.expire(&mut hits, now);
        hits.push_back(now);
    }

    /// 期間内の発生回数
    pub fn count(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock();
        self.expire(&mut hits, now);
        hits.len()
    }
}
