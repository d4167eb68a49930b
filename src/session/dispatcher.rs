//! イベントディスパッチャー
//!
//! ゲートウェイから届いた一件のイベントを種類ごとに振り分け、表示・履歴・
//! 読み上げ・AI返信・プロフィール保存へ流す。

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::feed::{DisplaySink, ResultItem, ResultKind};
use crate::config::ReactionPolicy;
use crate::error::LayerError;
use crate::events::LiveEvent;
use crate::models::{
    guard_level_name, DanmakuData, FeatureConfig, GiftData, GuardData, LiveStatusData,
    RoomEnterData, SuperChatData, UserData,
};
use crate::profile::{ProfileStore, UserProfile};
use crate::reaction::{
    welcome_text, ChatMessage, ComboAggregator, ComboKey, ComboSummary, MessageHistory,
    ReplyGate, SlidingWindowCounter, TriggerRequest, WelcomeTimer,
};
use crate::reply::{ChatTurn, ReplyService};
use crate::speech::{AnnouncementQueue, AnnouncementResults, VoiceParams};

pub const LIVE_START_ANNOUNCEMENT: &str = "主人开始直播啦，弹幕姬启动！";
pub const LIVE_END_ANNOUNCEMENT: &str = "主人直播结束啦，今天辛苦了！";

/// 読み上げキューへの投入口（失敗は表示クライアントへ報告）
#[derive(Clone)]
pub struct Announcer {
    queue: AnnouncementQueue,
    sink: Arc<dyn DisplaySink>,
    voice: VoiceParams,
}

impl Announcer {
    pub fn new(queue: AnnouncementQueue, sink: Arc<dyn DisplaySink>, voice: VoiceParams) -> Self {
        Self { queue, sink, voice }
    }

    /// 既定の声で読み上げる
    pub fn announce(&self, text: &str, force: bool) {
        self.announce_with(text, self.voice.clone(), force);
    }

    pub fn announce_with(&self, text: &str, voice: VoiceParams, force: bool) {
        if let Err(e) = self.queue.push(text, voice, force) {
            tracing::warn!("⚠️ 読み上げを追加できません: {}", e);
            self.sink
                .send(ResultItem::from_error(ResultKind::Tts, &LayerError::from(e)));
        }
    }

    pub fn voice(&self) -> &VoiceParams {
        &self.voice
    }
}

/// ディスパッチャーが使う協力者
pub struct DispatcherParts {
    pub policy: Arc<ReactionPolicy>,
    pub sink: Arc<dyn DisplaySink>,
    pub live: Arc<AtomicBool>,
    pub features: Arc<RwLock<FeatureConfig>>,
    pub replies: Arc<dyn ReplyService>,
    pub profiles: Arc<dyn ProfileStore>,
    pub announcer: Announcer,
    pub announcement_results: AnnouncementResults,
    pub gate: ReplyGate,
    pub system_prompt: String,
    pub reply_disabled_pitch: f32,
    pub cancel: CancellationToken,
}

/// イベントディスパッチャー
pub struct Dispatcher {
    policy: Arc<ReactionPolicy>,
    sink: Arc<dyn DisplaySink>,
    live: Arc<AtomicBool>,
    features: Arc<RwLock<FeatureConfig>>,
    history: Arc<MessageHistory>,
    replies_sent: Arc<SlidingWindowCounter>,
    gate: Arc<ReplyGate>,
    reply_slot: Arc<Semaphore>,
    replies: Arc<dyn ReplyService>,
    system_prompt: Arc<str>,
    profiles: Arc<dyn ProfileStore>,
    announcer: Announcer,
    reply_disabled_pitch: f32,
    combo: ComboAggregator,
    welcome: Arc<WelcomeTimer>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// ディスパッチャーを作成し、読み上げ結果の転送とタイマーを開始
    pub fn new(parts: DispatcherParts) -> Arc<Self> {
        let DispatcherParts {
            policy,
            sink,
            live,
            features,
            replies,
            profiles,
            announcer,
            announcement_results,
            gate,
            system_prompt,
            reply_disabled_pitch,
            cancel,
        } = parts;

        let combo_announcer = announcer.clone();
        let combo = ComboAggregator::new(
            policy.gift_combo(),
            cancel.clone(),
            Arc::new(move |summary: ComboSummary| {
                combo_announcer.announce(&summary.announcement(), false)
            }),
        );

        let welcome_announcer = announcer.clone();
        let welcome = WelcomeTimer::spawn(
            policy.welcome_idle(),
            cancel.clone(),
            Arc::new(move |text: String| welcome_announcer.announce(&text, false)),
        );

        tokio::spawn(forward_announcements(
            announcement_results,
            Arc::clone(&sink),
            Arc::clone(&welcome),
        ));

        Arc::new(Self {
            history: Arc::new(MessageHistory::new(
                policy.message_retention(),
                policy.history_capacity,
            )),
            replies_sent: Arc::new(SlidingWindowCounter::new(policy.reply_limit_window())),
            gate: Arc::new(gate),
            reply_slot: Arc::new(Semaphore::new(1)),
            system_prompt: Arc::from(system_prompt),
            policy,
            sink,
            live,
            features,
            replies,
            profiles,
            announcer,
            reply_disabled_pitch,
            combo,
            welcome,
            cancel,
        })
    }

    /// 一件のイベントを処理（不正なペイロードはログに残して無視）
    pub fn handle(self: &Arc<Self>, raw: &[u8]) {
        let event = match LiveEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    "⚠️ イベントを解析できません: {} ({})",
                    e,
                    String::from_utf8_lossy(raw)
                );
                return;
            }
        };
        self.dispatch(event);
    }

    /// デコード済みイベントを処理
    pub fn dispatch(self: &Arc<Self>, event: LiveEvent) {
        tracing::debug!("📨 イベント: {}", event.kind());
        match event {
            LiveEvent::Danmaku(data) => self.on_danmaku(data),
            LiveEvent::SuperChat(data) => self.on_super_chat(data),
            LiveEvent::Gift(data) => self.on_gift(data),
            LiveEvent::Guard(data) => self.on_guard(data),
            LiveEvent::RoomEnter(data) => self.on_room_enter(data),
            LiveEvent::LiveStart(data) => self.on_live_status(data, true),
            LiveEvent::LiveEnd(data) => self.on_live_status(data, false),
            LiveEvent::Unrecognized { cmd } => {
                tracing::debug!("未対応のコマンドを無視: {}", cmd);
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// AI返信が処理中か
    pub fn reply_in_flight(&self) -> bool {
        self.reply_slot.available_permits() == 0
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    fn replies_enabled(&self) -> bool {
        !self.features.read().disable_llm
    }

    fn on_danmaku(self: &Arc<Self>, data: DanmakuData) {
        if self.policy.is_ignored_message(&data.msg) {
            tracing::debug!("無視リストのチャット: {}", data.msg);
            return;
        }

        self.sink.send(ResultItem::ok(ResultKind::Danmu, &data));
        self.persist_user(&data.user);
        self.history.push(ChatMessage::new(
            data.user.open_id.as_str(),
            data.user.uname.as_str(),
            data.msg.as_str(),
        ));

        let mut voice = self.announcer.voice().clone();
        if !self.replies_enabled() {
            voice = voice.with_pitch(self.reply_disabled_pitch);
        }
        self.announcer
            .announce_with(&format!("{}说：{}", data.user.uname, data.msg), voice, false);

        if self.reply_in_flight() {
            return;
        }
        if self.may_trigger_reply(&data.user) {
            self.trigger_reply(false);
        }
    }

    /// AI返信を起動できる視聴者か
    fn may_trigger_reply(&self, user: &UserData) -> bool {
        user.wears_medal(&self.policy.fans_medal_name, self.policy.reply_medal_level)
            || user.is_guard()
            || self.policy.privileged_users.contains(&user.uname)
    }

    fn on_super_chat(self: &Arc<Self>, data: SuperChatData) {
        self.sink.send(ResultItem::ok(ResultKind::Superchat, &data));
        self.persist_user(&data.user);
        self.history.push(ChatMessage::new(
            data.user.open_id.as_str(),
            data.user.uname.as_str(),
            data.msg.as_str(),
        ));
        self.announcer.announce(
            &format!("谢谢{}酱的醒目留言：{}", data.user.uname, data.msg),
            false,
        );
        self.trigger_reply(true);
    }

    fn on_gift(self: &Arc<Self>, data: GiftData) {
        self.sink.send(ResultItem::ok(ResultKind::Gift, &data));
        self.persist_user(&data.user);
        self.combo.on_gift(
            ComboKey {
                open_id: data.user.open_id.clone(),
                gift_id: data.gift_id,
            },
            &data.user.uname,
            &data.gift_name,
            data.gift_num,
        );
    }

    fn on_guard(self: &Arc<Self>, data: GuardData) {
        self.sink.send(ResultItem::ok(ResultKind::Guard, &data));
        self.persist_user(&data.user);
        self.announcer.announce(
            &format!(
                "谢谢{}酱赠送的{}个{}{}，么么哒",
                data.user.uname,
                data.guard_num,
                data.guard_unit,
                guard_level_name(data.user.guard_level)
            ),
            false,
        );
    }

    fn on_room_enter(self: &Arc<Self>, data: RoomEnterData) {
        self.sink.send(ResultItem::ok(ResultKind::EnterRoom, &data));
        self.welcome.record(data.user.clone());

        let profiles = Arc::clone(&self.profiles);
        let announcer = self.announcer.clone();
        let cancel = self.cancel.clone();
        let min_level = self.policy.welcome_medal_level;
        let user = data.user;
        tokio::spawn(async move {
            let lookup = tokio::select! {
                _ = cancel.cancelled() => return,
                lookup = profiles.get(&user.open_id) => lookup,
            };
            match lookup {
                Ok(Some(profile)) if profile.deserves_welcome(min_level) => {
                    let name = if profile.guard_level > 0 {
                        format!("{}{}", guard_level_name(profile.guard_level), user.uname)
                    } else {
                        user.uname.clone()
                    };
                    tracing::info!("👋 常連の入室を歓迎: {}", name);
                    announcer.announce(&welcome_text(&name), false);
                }
                Ok(_) => {}
                Err(e) => tracing::error!("❌ プロフィール取得失敗 open_id={}: {}", user.open_id, e),
            }
        });
    }

    fn on_live_status(&self, data: LiveStatusData, started: bool) {
        let text = if started {
            LIVE_START_ANNOUNCEMENT
        } else {
            LIVE_END_ANNOUNCEMENT
        };
        tracing::info!(
            "📺 配信{}: room_id={}",
            if started { "開始" } else { "終了" },
            data.room_id
        );
        self.announcer.announce(text, true);
        self.live.store(started, Ordering::SeqCst);
    }

    /// 視聴者情報を非同期で保存（失敗はログのみ）
    fn persist_user(&self, user: &UserData) {
        if user.open_id.is_empty() {
            return;
        }
        let profiles = Arc::clone(&self.profiles);
        let cancel = self.cancel.clone();
        let profile = UserProfile::from_user(user);
        tokio::spawn(async move {
            let open_id = profile.open_id.clone();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = profiles.upsert(profile) => result,
            };
            if let Err(e) = result {
                tracing::error!("❌ プロフィール保存失敗 open_id={}: {}", open_id, e);
            }
        });
    }

    /// AI返信を判定し、通れば非同期で起動
    ///
    /// 強制でない場合、処理中の返信があれば何もしない。強制の場合は処理中の返信を待つ。
    pub fn trigger_reply(self: &Arc<Self>, force: bool) {
        let request = TriggerRequest {
            force,
            live: self.is_live(),
            replies_enabled: self.replies_enabled(),
        };

        if force {
            if !self
                .gate
                .evaluate(request, &self.history, &self.replies_sent, Instant::now())
                .proceeds()
            {
                return;
            }
            // 待っている間に届いた発言ではなく、起動時点の文脈で返信する
            let context = self.gate.context(&self.history, Instant::now());
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                let permit = tokio::select! {
                    _ = dispatcher.cancel.cancelled() => return,
                    permit = Arc::clone(&dispatcher.reply_slot).acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    return;
                };
                // 待機中に配信終了やAI返信の無効化があれば取りやめる
                if !dispatcher.is_live() || !dispatcher.replies_enabled() {
                    tracing::info!("🤫 待機中に状態が変わったため強制返信を取りやめ");
                    return;
                }
                dispatcher.run_reply(context).await;
                drop(permit);
            });
            return;
        }

        let Ok(permit) = Arc::clone(&self.reply_slot).try_acquire_owned() else {
            tracing::debug!("AI返信が処理中のため見送り");
            return;
        };
        if !self
            .gate
            .evaluate(request, &self.history, &self.replies_sent, Instant::now())
            .proceeds()
        {
            return;
        }

        let context = self.gate.context(&self.history, Instant::now());
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.run_reply(context).await;
            drop(permit);
        });
    }

    /// 返信を一件生成して表示・読み上げる
    async fn run_reply(&self, context: Vec<ChatTurn>) {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.replies.reply(&self.system_prompt, &context) => result,
        };

        match result {
            Ok(text) => {
                self.sink.send(ResultItem::ok(
                    ResultKind::Llm,
                    &serde_json::json!({ "llm_result": text }),
                ));
                self.replies_sent.record(Instant::now());
                self.announcer.announce(&text, false);
            }
            Err(e) => {
                tracing::error!("❌ AI返信に失敗: {}", e);
                let err = LayerError::from(e);
                self.sink.send(ResultItem::from_error(ResultKind::Llm, &err));
            }
        }
    }
}

/// 読み上げ結果を表示クライアントへ転送
async fn forward_announcements(
    mut results: AnnouncementResults,
    sink: Arc<dyn DisplaySink>,
    welcome: Arc<WelcomeTimer>,
) {
    while let Some(outcome) = results.next().await {
        match outcome.result {
            Ok(artifact) => {
                let audio_file_path = artifact.path.display().to_string();
                sink.send(ResultItem::ok(
                    ResultKind::Tts,
                    &serde_json::json!({ "audio_file_path": audio_file_path }),
                ));
                welcome.rearm();
            }
            Err(e) => {
                let err = LayerError::from(e);
                sink.send(ResultItem::from_error(ResultKind::Tts, &err));
            }
        }
    }
}
