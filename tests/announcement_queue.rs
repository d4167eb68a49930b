//! 読み上げキューのテスト
//!
//! 合成の所要時間がばらついても投入順に結果が出ること、満杯・タイムアウト・失敗の扱いを確認する。

use async_trait::async_trait;
use livelayer::speech::{
    AnnouncementQueue, AnnouncementResults, AudioArtifact, SpeechError, SpeechSynthesizer,
    VoiceParams,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// テキストに応じて遅延・失敗する合成器
#[derive(Default)]
struct ScriptedSynthesizer {
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    fn delay_for(text: &str) -> Duration {
        match text {
            t if t.starts_with("慢") => Duration::from_secs(120),
            t if t.starts_with("长") => Duration::from_secs(5),
            _ => Duration::from_millis(50),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceParams,
    ) -> Result<AudioArtifact, SpeechError> {
        self.started.lock().push(text.to_string());
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(Self::delay_for(text)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if text.starts_with("坏") {
            return Err(SpeechError::Connection("engine crashed".to_string()));
        }
        Ok(AudioArtifact::new(format!("result/{}.wav", text)))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn start(
    synthesizer: Arc<ScriptedSynthesizer>,
    size: usize,
) -> (AnnouncementQueue, AnnouncementResults, CancellationToken) {
    let cancel = CancellationToken::new();
    let (queue, results) = AnnouncementQueue::new(
        synthesizer,
        size,
        Duration::from_secs(60),
        Arc::new(AtomicBool::new(true)),
        cancel.clone(),
    );
    (queue, results, cancel)
}

#[tokio::test(start_paused = true)]
async fn test_results_follow_submission_order() {
    let synthesizer = Arc::new(ScriptedSynthesizer::default());
    let (queue, mut results, _cancel) = start(synthesizer.clone(), 8);

    let texts = ["长的第一句", "第二句", "长的第三句", "第四句"];
    let mut ids = Vec::new();
    for text in texts {
        ids.push(queue.push(text, VoiceParams::default(), false).unwrap().unwrap());
    }

    for (text, id) in texts.iter().zip(&ids) {
        let outcome = results.next().await.unwrap();
        assert_eq!(outcome.id, *id);
        assert_eq!(&outcome.text, text);
        assert!(outcome.result.is_ok());
    }
    assert_eq!(synthesizer.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(*synthesizer.started.lock(), texts.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_push_rejected_when_full() {
    let synthesizer = Arc::new(ScriptedSynthesizer::default());
    let (queue, mut results, _cancel) = start(synthesizer, 2);

    // ワーカーが動き出す前に投入する
    assert!(queue.push("一", VoiceParams::default(), false).is_ok());
    assert!(queue.push("二", VoiceParams::default(), false).is_ok());
    assert!(matches!(
        queue.push("三", VoiceParams::default(), false),
        Err(SpeechError::QueueFull)
    ));

    assert_eq!(results.next().await.unwrap().text, "一");
    assert_eq!(results.next().await.unwrap().text, "二");
    // 空きができれば再び受け付ける
    assert!(queue.push("四", VoiceParams::default(), false).is_ok());
    assert_eq!(results.next().await.unwrap().text, "四");
}

#[tokio::test(start_paused = true)]
async fn test_slow_synthesis_times_out_and_queue_moves_on() {
    let synthesizer = Arc::new(ScriptedSynthesizer::default());
    let (queue, mut results, _cancel) = start(synthesizer, 8);

    queue.push("慢吞吞", VoiceParams::default(), false).unwrap();
    queue.push("下一句", VoiceParams::default(), false).unwrap();

    let started = tokio::time::Instant::now();
    let slow = results.next().await.unwrap();
    assert!(matches!(slow.result, Err(SpeechError::Timeout(60))));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(120));

    let next = results.next().await.unwrap();
    assert_eq!(next.text, "下一句");
    assert_eq!(
        next.result.unwrap(),
        AudioArtifact::new("result/下一句.wav")
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_block_queue() {
    let synthesizer = Arc::new(ScriptedSynthesizer::default());
    let (queue, mut results, cancel) = start(synthesizer, 8);

    queue.push("坏掉的", VoiceParams::default(), false).unwrap();
    queue.push("好的", VoiceParams::default(), false).unwrap();

    let failed = results.next().await.unwrap();
    assert!(matches!(failed.result, Err(SpeechError::Connection(_))));
    assert!(results.next().await.unwrap().result.is_ok());

    cancel.cancel();
    assert!(results.next().await.is_none());
}
