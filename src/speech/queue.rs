//! 読み上げキュー
//!
//! 合成ワーカーは一つだけで、同時に走る合成は常に一件。結果は投入順に流れる。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::SpeechError;
use super::{sanitize_text, AudioArtifact, SpeechSynthesizer, VoiceParams};

/// 読み上げタスク
#[derive(Debug, Clone)]
pub struct AnnouncementTask {
    pub id: Uuid,
    /// 読み上げテキスト
    pub text: String,
    pub voice: VoiceParams,
    /// 配信外でも読み上げる
    pub force: bool,
}

/// 読み上げタスクの結果
#[derive(Debug)]
pub struct AnnouncementOutcome {
    pub id: Uuid,
    pub text: String,
    pub result: Result<AudioArtifact, SpeechError>,
}

/// 結果ストリーム（セッションの存続期間中、投入順に結果を返す）
pub type AnnouncementResults = ReceiverStream<AnnouncementOutcome>;

/// 読み上げキュー
#[derive(Clone)]
pub struct AnnouncementQueue {
    sender: mpsc::Sender<AnnouncementTask>,
    live: Arc<AtomicBool>,
}

impl AnnouncementQueue {
    /// 新しいキューを作成し、処理タスクを開始
    ///
    /// `live` が false の間、強制でないタスクは破棄される。
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        queue_size: usize,
        synthesis_timeout: Duration,
        live: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> (Self, AnnouncementResults) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let (result_sender, result_receiver) = mpsc::channel(queue_size.max(1));

        tokio::spawn(Self::process_queue(
            receiver,
            result_sender,
            synthesizer,
            synthesis_timeout,
            cancel,
        ));

        (Self { sender, live }, ReceiverStream::new(result_receiver))
    }

    /// 読み上げタスクを追加
    ///
    /// 配信外で強制でない場合や、整形後のテキストが空の場合は `Ok(None)` を返す。
    pub fn push(
        &self,
        text: &str,
        voice: VoiceParams,
        force: bool,
    ) -> Result<Option<Uuid>, SpeechError> {
        if !force && !self.live.load(Ordering::SeqCst) {
            tracing::debug!("🔇 配信外のため読み上げをスキップ: {}", text);
            return Ok(None);
        }

        let text = sanitize_text(text);
        if text.is_empty() {
            return Ok(None);
        }

        let task = AnnouncementTask {
            id: Uuid::new_v4(),
            text,
            voice,
            force,
        };
        let id = task.id;

        self.sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SpeechError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SpeechError::Closed,
        })?;
        Ok(Some(id))
    }

    /// ワーカーが停止済みかどうか
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// キュー処理タスク
    async fn process_queue(
        mut receiver: mpsc::Receiver<AnnouncementTask>,
        results: mpsc::Sender<AnnouncementOutcome>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        synthesis_timeout: Duration,
        cancel: CancellationToken,
    ) {
        tracing::info!("🔊 読み上げキュー処理を開始 ({})", synthesizer.name());

        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                task = receiver.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            tracing::debug!(
                "📢 合成開始: {} - {}",
                task.id,
                task.text.chars().take(50).collect::<String>()
            );

            let call = tokio::time::timeout(
                synthesis_timeout,
                synthesizer.synthesize(&task.text, &task.voice),
            );
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = call => result
                    .unwrap_or_else(|_| Err(SpeechError::Timeout(synthesis_timeout.as_secs()))),
            };

            match &result {
                Ok(artifact) => tracing::debug!("✅ 合成完了: {}", artifact.path.display()),
                Err(e) => tracing::error!("❌ 合成エラー: {}", e),
            }

            let outcome = AnnouncementOutcome {
                id: task.id,
                text: task.text,
                result,
            };
            if results.send(outcome).await.is_err() {
                break;
            }
        }

        receiver.close();
        tracing::info!("🔊 読み上げキュー処理を終了");
    }
}
