//! セッションのライフサイクル
//!
//! 表示クライアントの接続一つにつき一つのセッションを持つ。クライアントの
//! `init` でゲートウェイとのセッションを確立し、ハートビートとイベントの
//! 受信を続け、切断・致命的エラーで後片付けをする。
//!
//! ```text
//! Idle → Initializing → Live ⇄ Reconnecting
//!                         ↓
//!                      Closing → Closed
//! ```
//!
//! 後片付けはどの状態からでも何度呼んでもよい。

pub mod dispatcher;
pub mod feed;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use dispatcher::{
    Announcer, Dispatcher, DispatcherParts, LIVE_END_ANNOUNCEMENT, LIVE_START_ANNOUNCEMENT,
};
pub use feed::{DisplaySink, FeedSink, ResultItem, ResultKind, MSG_SUCCESS};

use crate::config::{AppConfig, ReactionPolicy};
use crate::error::{LayerError, CODE_BAD_REQUEST};
use crate::gateway::{
    CloseReason, EventStream, GatewayError, GatewayMessage, InitSignature, LiveGateway,
    SessionDescriptor,
};
use crate::models::FeatureConfig;
use crate::profile::ProfileStore;
use crate::reaction::ReplyGate;
use crate::reply::ReplyService;
use crate::speech::{AnnouncementQueue, SpeechSynthesizer, VoiceParams};

pub const REQUEST_INIT: &str = "init";
pub const REQUEST_CONFIG: &str = "config";
pub const REQUEST_HEARTBEAT: &str = "heartbeat";

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Live,
    Reconnecting,
    Closing,
    Closed,
}

/// セッションごとの設定値
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub policy: Arc<ReactionPolicy>,
    /// 既定の読み上げ音声
    pub voice: VoiceParams,
    pub reply_disabled_pitch: f32,
    pub queue_size: usize,
    pub synthesis_timeout: Duration,
    pub system_prompt: String,
    /// 初期化パラメータの署名鍵
    pub secret_key: String,
    pub validate_signature: bool,
    /// 確率判定の乱数シード（None ならエントロピーから）
    pub rng_seed: Option<u64>,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: Arc::new(config.policy.clone()),
            voice: VoiceParams::for_speaker(config.speech.speaker_id),
            reply_disabled_pitch: config.speech.reply_disabled_pitch,
            queue_size: config.speech.queue_size_limit,
            synthesis_timeout: config.speech.synthesis_timeout(),
            system_prompt: config.reply.system_prompt.clone(),
            secret_key: config.bilibili.secret_key.clone(),
            validate_signature: !config.bilibili.disable_validate_sign,
            rng_seed: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 全セッションで共有する外部サービス
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn LiveGateway>,
    pub replies: Arc<dyn ReplyService>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub profiles: Arc<dyn ProfileStore>,
}

/// `init` の本文
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitRequest {
    #[serde(flatten)]
    pub signature: InitSignature,
    #[serde(default)]
    pub config: FeatureConfig,
}

/// クライアントから届くコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Init(InitRequest),
    Config(FeatureConfig),
    Heartbeat,
}

#[derive(Debug, Deserialize)]
struct ClientRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ClientCommand {
    /// コマンドを解析（失敗時はクライアントへ返すエラー結果）
    pub fn parse(raw: &str) -> Result<Self, ResultItem> {
        let request: ClientRequest = serde_json::from_str(raw)
            .map_err(|e| ResultItem::error(ResultKind::Room, CODE_BAD_REQUEST, e.to_string()))?;

        match request.kind.as_str() {
            REQUEST_INIT => decode_data(request.data, ResultKind::Room).map(ClientCommand::Init),
            REQUEST_CONFIG => {
                decode_data(request.data, ResultKind::Config).map(ClientCommand::Config)
            }
            REQUEST_HEARTBEAT => Ok(ClientCommand::Heartbeat),
            _ => Err(ResultItem::error(
                ResultKind::Room,
                CODE_BAD_REQUEST,
                "unknown type",
            )),
        }
    }
}

fn decode_data<T: DeserializeOwned>(
    data: Option<serde_json::Value>,
    kind: ResultKind,
) -> Result<T, ResultItem> {
    let Some(data) = data else {
        return Err(ResultItem::error(kind, CODE_BAD_REQUEST, "data is null"));
    };
    serde_json::from_value(data).map_err(|e| ResultItem::error(kind, CODE_BAD_REQUEST, e.to_string()))
}

/// 表示クライアント一接続分のセッション
pub struct Session {
    state: Mutex<SessionState>,
    gateway: Arc<dyn LiveGateway>,
    sink: Arc<dyn DisplaySink>,
    policy: Arc<ReactionPolicy>,
    secret_key: String,
    validate_signature: bool,
    features: Arc<RwLock<FeatureConfig>>,
    descriptor: Mutex<Option<SessionDescriptor>>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl Session {
    /// セッションを作成（読み上げワーカーとタイマーはここで起動する）
    pub fn new(deps: SessionDeps, settings: SessionSettings, sink: Arc<dyn DisplaySink>) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let live = Arc::new(AtomicBool::new(true));
        let features = Arc::new(RwLock::new(FeatureConfig::default()));

        let (queue, announcement_results) = AnnouncementQueue::new(
            deps.synthesizer,
            settings.queue_size,
            settings.synthesis_timeout,
            Arc::clone(&live),
            cancel.clone(),
        );
        let gate = match settings.rng_seed {
            Some(seed) => ReplyGate::with_seed(Arc::clone(&settings.policy), seed),
            None => ReplyGate::new(Arc::clone(&settings.policy)),
        };

        let dispatcher = Dispatcher::new(DispatcherParts {
            policy: Arc::clone(&settings.policy),
            sink: Arc::clone(&sink),
            live,
            features: Arc::clone(&features),
            replies: deps.replies,
            profiles: deps.profiles,
            announcer: Announcer::new(queue, Arc::clone(&sink), settings.voice),
            announcement_results,
            gate,
            system_prompt: settings.system_prompt,
            reply_disabled_pitch: settings.reply_disabled_pitch,
            cancel: cancel.clone(),
        });

        Arc::new(Self {
            state: Mutex::new(SessionState::Idle),
            gateway: deps.gateway,
            sink,
            policy: settings.policy,
            secret_key: settings.secret_key,
            validate_signature: settings.validate_signature,
            features,
            descriptor: Mutex::new(None),
            dispatcher,
            cancel,
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn features(&self) -> FeatureConfig {
        *self.features.read()
    }

    /// 現在の接続情報
    pub fn descriptor(&self) -> Option<SessionDescriptor> {
        self.descriptor.lock().clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// セッション終了で発火するトークン
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 状態を `from` から `to` へ移す（現在の状態が `from` の場合のみ）
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        tracing::debug!("セッション状態: {:?} → {:?}", from, to);
        *state = to;
        true
    }

    /// 生のコマンド文字列を処理
    pub async fn handle_command(self: &Arc<Self>, raw: &str) {
        match ClientCommand::parse(raw) {
            Ok(command) => self.execute(command).await,
            Err(item) => {
                tracing::warn!("⚠️ 不正なコマンド: {} ({})", item.msg, raw);
                self.sink.send(item);
            }
        }
    }

    /// コマンドを実行（どのコマンドも結果を一件だけ返す）
    pub async fn execute(self: &Arc<Self>, command: ClientCommand) {
        match command {
            ClientCommand::Init(request) => self.init(request).await,
            ClientCommand::Config(features) => self.update_config(features),
            ClientCommand::Heartbeat => self.sink.send(ResultItem::ack(ResultKind::Heartbeat)),
        }
    }

    /// 機能設定を置き換え、設定結果を返す
    pub fn update_config(&self, features: FeatureConfig) {
        self.apply_features(features);
        self.sink.send(ResultItem::ok(ResultKind::Config, &features));
    }

    fn apply_features(&self, features: FeatureConfig) {
        *self.features.write() = features;
        tracing::info!("⚙️ 機能設定を更新: disable_llm={}", features.disable_llm);
    }

    /// ゲートウェイとのセッションを確立
    pub async fn init(self: &Arc<Self>, request: InitRequest) {
        if self.state() != SessionState::Idle {
            self.reject_repeated_init();
            return;
        }

        if self.validate_signature {
            if let Err(e) = request.signature.validate(&self.secret_key) {
                tracing::warn!("🔐 署名検証に失敗: caller={}", request.signature.caller);
                self.report_gateway_failure(e).await;
                return;
            }
        }

        if !self.transition(SessionState::Idle, SessionState::Initializing) {
            self.reject_repeated_init();
            return;
        }
        // init の結果は部屋情報の一件のみ
        self.apply_features(request.config);

        tracing::info!("🚀 セッションを開始: code={}", request.signature.code);
        if let Err(e) = self.establish(&request.signature.code).await {
            tracing::error!("❌ セッションの確立に失敗: {}", e);
            self.report_gateway_failure(e).await;
        }
    }

    fn reject_repeated_init(&self) {
        self.sink.send(ResultItem::error(
            ResultKind::Room,
            CODE_BAD_REQUEST,
            "connection already init",
        ));
    }

    async fn establish(self: &Arc<Self>, code: &str) -> Result<(), GatewayError> {
        let descriptor = self.bounded(self.gateway.start(code)).await?;
        *self.descriptor.lock() = Some(descriptor.clone());

        let events = self.bounded(self.gateway.connect(&descriptor)).await?;
        if !self.transition(SessionState::Initializing, SessionState::Live) {
            return Err(GatewayError::Handshake(
                "確立中にセッションが閉じられました".to_string(),
            ));
        }

        tracing::info!(
            "🟢 ライブセッション開始: room_id={} game_id={}",
            descriptor.anchor.room_id,
            descriptor.game_id
        );
        self.sink
            .send(ResultItem::ok(ResultKind::Room, &descriptor.room_data()));

        tokio::spawn(Arc::clone(self).heartbeat_loop());
        tokio::spawn(Arc::clone(self).pump(events));
        Ok(())
    }

    /// ゲートウェイ呼び出しにタイムアウトとキャンセルを付ける
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let limit = self.policy.handshake_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(GatewayError::Handshake("セッションが閉じられました".to_string()))
            }
            result = tokio::time::timeout(limit, call) => match result {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(limit.as_secs())),
            },
        }
    }

    /// ハートビートを送り続ける（一度でも失敗すればセッションを閉じる）
    async fn heartbeat_loop(self: Arc<Self>) {
        let period = self.policy.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            // 再接続で接続情報が変わることがあるため毎回読み直す
            let Some(game_id) = self.descriptor.lock().as_ref().map(|d| d.game_id.clone()) else {
                return;
            };

            tracing::trace!("💓 ハートビート送信: game_id={}", game_id);
            if let Err(e) = self.bounded(self.gateway.heartbeat(&game_id)).await {
                if self.is_closed() {
                    return;
                }
                tracing::error!("💔 ハートビートに失敗: {}", e);
                self.report_gateway_failure(e).await;
                return;
            }
        }
    }

    /// イベントストリームをディスパッチャーへ流す
    async fn pump(self: Arc<Self>, mut events: EventStream) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                message = events.recv() => message,
            };

            let reason = match message {
                Some(GatewayMessage::Event(payload)) => {
                    self.dispatcher.handle(&payload);
                    continue;
                }
                Some(GatewayMessage::Closed(reason)) => reason,
                None => CloseReason::Other("event stream ended".to_string()),
            };

            if self.is_closed() {
                return;
            }
            if reason.is_terminal() {
                tracing::info!("🔚 ゲートウェイが切断されました: {}", reason.display_name());
                self.close().await;
                return;
            }

            match self.reconnect(&reason).await {
                Ok(Some(stream)) => events = stream,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!("❌ 再接続に失敗: {}", e);
                    self.report_gateway_failure(e).await;
                    return;
                }
            }
        }
    }

    /// ゲートウェイ層の失敗を `room` エラーとして報告し、致命的ならセッションを閉じる
    async fn report_gateway_failure(&self, err: GatewayError) {
        let err = LayerError::from(err);
        if !self.is_closed() {
            self.sink.send(ResultItem::from_error(ResultKind::Room, &err));
        }
        if err.is_fatal() {
            self.close().await;
        }
    }

    /// 現在の接続情報で再接続（`room` 結果は再送しない）
    async fn reconnect(&self, reason: &CloseReason) -> Result<Option<EventStream>, GatewayError> {
        if !self.transition(SessionState::Live, SessionState::Reconnecting) {
            return Ok(None);
        }
        tracing::warn!(
            "🔄 ゲートウェイ切断 ({:?})、再接続します",
            reason
        );

        let Some(descriptor) = self.descriptor() else {
            return Err(GatewayError::Reconnect("接続情報がありません".to_string()));
        };
        let events = self
            .bounded(self.gateway.connect(&descriptor))
            .await
            .map_err(|e| GatewayError::Reconnect(e.to_string()))?;

        if !self.transition(SessionState::Reconnecting, SessionState::Live) {
            return Ok(None);
        }
        tracing::info!("🟢 再接続しました: game_id={}", descriptor.game_id);
        Ok(Some(events))
    }

    /// セッションを閉じる
    ///
    /// 全タスクを止め、ゲートウェイのセッションを終了する（失敗はログのみ）。
    pub async fn close(&self) {
        let first = {
            let mut state = self.state.lock();
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                false
            } else {
                tracing::debug!("セッション状態: {:?} → Closing", *state);
                *state = SessionState::Closing;
                true
            }
        };
        if first {
            self.cancel.cancel();
        }

        // 接続情報を取り出した一者だけが終了を送る
        let descriptor = self.descriptor.lock().take();
        if let Some(descriptor) = descriptor {
            let limit = self.policy.handshake_timeout();
            match tokio::time::timeout(limit, self.gateway.end(&descriptor.game_id)).await {
                Ok(Ok(())) => tracing::info!("👋 セッションを終了: game_id={}", descriptor.game_id),
                Ok(Err(e)) => tracing::warn!("⚠️ セッション終了に失敗: {}", e),
                Err(_) => tracing::warn!("⚠️ セッション終了が{}秒以内に完了しませんでした", limit.as_secs()),
            }
        }

        if first {
            *self.state.lock() = SessionState::Closed;
        }
    }
}
