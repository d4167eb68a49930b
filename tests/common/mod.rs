//! テスト用の偽ゲートウェイ・偽サービスとセッションのハーネス
#![allow(dead_code)]

use async_trait::async_trait;
use livelayer::config::ReactionPolicy;
use livelayer::gateway::{
    AnchorInfo, CloseReason, EventStream, GatewayError, GatewayMessage, LiveGateway,
    SessionDescriptor,
};
use livelayer::profile::{ProfileError, ProfileStore, UserProfile};
use livelayer::reply::{ChatTurn, ReplyError, ReplyService};
use livelayer::speech::{AudioArtifact, SpeechError, SpeechSynthesizer, VoiceParams};
use livelayer::{FeedSink, ResultItem, ResultKind, Session, SessionDeps, SessionSettings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const GAME_ID: &str = "game-1";
pub const ROOM_ID: i64 = 4_242;
pub const MEDAL: &str = "巫女酱";

/// 偽ゲートウェイ
#[derive(Default)]
pub struct FakeGateway {
    pub fail_start: AtomicBool,
    pub fail_heartbeat: AtomicBool,
    pub fail_reconnect: AtomicBool,
    pub starts: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub connects: Mutex<Vec<SessionDescriptor>>,
    pub ended: Mutex<Vec<String>>,
    streams: Mutex<Vec<mpsc::Sender<GatewayMessage>>>,
}

impl FakeGateway {
    pub fn descriptor() -> SessionDescriptor {
        SessionDescriptor {
            game_id: GAME_ID.to_string(),
            auth_body: r#"{"key":"k"}"#.to_string(),
            websocket_urls: vec!["wss://example.invalid/sub".to_string()],
            anchor: AnchorInfo {
                room_id: ROOM_ID,
                uname: "主人".to_string(),
                uface: "https://i0.hdslb.com/face.jpg".to_string(),
                open_id: "anchor".to_string(),
            },
        }
    }

    fn latest_stream(&self) -> Option<mpsc::Sender<GatewayMessage>> {
        self.streams.lock().last().cloned()
    }

    /// 最新のストリームへイベントを流す（受信側が閉じていれば false）
    pub async fn emit(&self, payload: serde_json::Value) -> bool {
        self.emit_raw(payload.to_string().into_bytes()).await
    }

    pub async fn emit_raw(&self, payload: Vec<u8>) -> bool {
        match self.latest_stream() {
            Some(stream) => stream.send(GatewayMessage::Event(payload)).await.is_ok(),
            None => false,
        }
    }

    /// 最新のストリームを指定理由で閉じる
    pub async fn close_stream(&self, reason: CloseReason) {
        if let Some(stream) = self.latest_stream() {
            let _ = stream.send(GatewayMessage::Closed(reason)).await;
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().clone()
    }
}

#[async_trait]
impl LiveGateway for FakeGateway {
    async fn start(&self, _code: &str) -> Result<SessionDescriptor, GatewayError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                code: 7002,
                message: "code invalid".to_string(),
            });
        }
        Ok(Self::descriptor())
    }

    async fn heartbeat(&self, _game_id: &str) -> Result<(), GatewayError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(GatewayError::Heartbeat("game not found".to_string()));
        }
        Ok(())
    }

    async fn end(&self, game_id: &str) -> Result<(), GatewayError> {
        self.ended.lock().push(game_id.to_string());
        Ok(())
    }

    async fn connect(&self, descriptor: &SessionDescriptor) -> Result<EventStream, GatewayError> {
        let reconnecting = !self.connects.lock().is_empty();
        if reconnecting && self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(GatewayError::WebSocket("connection refused".to_string()));
        }
        self.connects.lock().push(descriptor.clone());
        let (sender, receiver) = mpsc::channel(64);
        self.streams.lock().push(sender);
        Ok(receiver)
    }
}

/// 偽の会話AI（同時実行数を記録する）
pub struct FakeReplies {
    pub delay: Duration,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub contexts: Mutex<Vec<Vec<ChatTurn>>>,
}

impl FakeReplies {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<Vec<ChatTurn>> {
        self.contexts.lock().clone()
    }
}

impl Default for FakeReplies {
    fn default() -> Self {
        Self::with_delay(Duration::from_millis(100))
    }
}

#[async_trait]
impl ReplyService for FakeReplies {
    async fn reply(&self, _system_prompt: &str, history: &[ChatTurn]) -> Result<String, ReplyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.contexts.lock().push(history.to_vec());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(ReplyError::Api {
                status: 503,
                message: "overloaded".to_string(),
            });
        }
        Ok(format!("回复{}", call))
    }
}

/// 偽の音声合成（合成したテキストと音声を記録する）
#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<(String, VoiceParams)>>,
}

impl FakeSynthesizer {
    pub fn texts(&self) -> Vec<String> {
        self.spoken.lock().iter().map(|(text, _)| text.clone()).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.texts().iter().filter(|t| t.contains(needle)).count()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<AudioArtifact, SpeechError> {
        let mut spoken = self.spoken.lock();
        spoken.push((text.to_string(), voice.clone()));
        Ok(AudioArtifact::new(format!("result/tts-{}.wav", spoken.len())))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// メモリ上のプロフィールストア
#[derive(Default)]
pub struct MemoryProfiles {
    pub profiles: Mutex<HashMap<String, UserProfile>>,
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn upsert(&self, profile: UserProfile) -> Result<(), ProfileError> {
        self.profiles.lock().insert(profile.open_id.clone(), profile);
        Ok(())
    }

    async fn get(&self, open_id: &str) -> Result<Option<UserProfile>, ProfileError> {
        Ok(self.profiles.lock().get(open_id).cloned())
    }
}

/// 署名検証なし・乱数固定の設定
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        validate_signature: false,
        rng_seed: Some(7),
        ..SessionSettings::default()
    }
}

/// 確率判定で見送らない設定
pub fn no_skip_settings() -> SessionSettings {
    let policy = ReactionPolicy {
        probability_low_tier_skip: 0.0,
        probability_high_tier_skip: 0.0,
        ..ReactionPolicy::default()
    };
    SessionSettings {
        policy: Arc::new(policy),
        ..test_settings()
    }
}

/// セッションと偽サービス一式
pub struct Harness {
    pub session: Arc<Session>,
    pub results: mpsc::UnboundedReceiver<ResultItem>,
    pub gateway: Arc<FakeGateway>,
    pub replies: Arc<FakeReplies>,
    pub speech: Arc<FakeSynthesizer>,
    pub profiles: Arc<MemoryProfiles>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(test_settings(), FakeReplies::default())
    }

    pub fn build(settings: SessionSettings, replies: FakeReplies) -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let replies = Arc::new(replies);
        let speech = Arc::new(FakeSynthesizer::default());
        let profiles = Arc::new(MemoryProfiles::default());

        let deps = SessionDeps {
            gateway: gateway.clone(),
            replies: replies.clone(),
            synthesizer: speech.clone(),
            profiles: profiles.clone(),
        };
        let (sink, results) = FeedSink::new();
        let session = Session::new(deps, settings, Arc::new(sink));

        Self {
            session,
            results,
            gateway,
            replies,
            speech,
            profiles,
        }
    }

    /// init を送り、部屋情報の結果を読み捨てる
    pub async fn init(&mut self) {
        self.session.handle_command(&init_command(false)).await;
        let items = self.drain();
        assert!(
            items.iter().any(|i| i.kind == ResultKind::Room && i.is_ok()),
            "init failed: {:?}",
            items
        );
    }

    /// 届いている結果をすべて取り出す
    pub fn drain(&mut self) -> Vec<ResultItem> {
        let mut items = Vec::new();
        while let Ok(item) = self.results.try_recv() {
            items.push(item);
        }
        items
    }
}

/// 後続タスクが進むのを待つ
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn of_kind(items: &[ResultItem], kind: ResultKind) -> Vec<&ResultItem> {
    items.iter().filter(|i| i.kind == kind).collect()
}

pub fn init_command(disable_llm: bool) -> String {
    serde_json::json!({
        "type": "init",
        "data": {
            "timestamp": 1_700_000_000,
            "code": "AUTH-CODE",
            "mid": 1,
            "caller": "bilibili",
            "code_sign": "",
            "config": { "disable_llm": disable_llm }
        }
    })
    .to_string()
}

pub fn danmaku(open_id: &str, uname: &str, msg: &str, medal_level: i32) -> serde_json::Value {
    serde_json::json!({
        "cmd": "LIVE_OPEN_PLATFORM_DM",
        "data": {
            "open_id": open_id,
            "uname": uname,
            "msg": msg,
            "fans_medal_name": MEDAL,
            "fans_medal_level": medal_level,
            "fans_medal_wearing_status": medal_level > 0,
            "guard_level": 0
        }
    })
}

pub fn super_chat(open_id: &str, uname: &str, msg: &str) -> serde_json::Value {
    serde_json::json!({
        "cmd": "LIVE_OPEN_PLATFORM_SUPER_CHAT",
        "data": { "open_id": open_id, "uname": uname, "message": msg, "rmb": 30 }
    })
}

pub fn gift(open_id: &str, uname: &str, gift_id: i64, gift_name: &str, num: u32) -> serde_json::Value {
    serde_json::json!({
        "cmd": "LIVE_OPEN_PLATFORM_SEND_GIFT",
        "data": {
            "open_id": open_id,
            "uname": uname,
            "gift_id": gift_id,
            "gift_name": gift_name,
            "gift_num": num,
            "price": 100,
            "paid": true
        }
    })
}

pub fn room_enter(open_id: &str, uname: &str) -> serde_json::Value {
    serde_json::json!({
        "cmd": "LIVE_OPEN_PLATFORM_LIVE_ROOM_ENTER",
        "data": { "open_id": open_id, "uname": uname, "timestamp": 1_700_000_000 }
    })
}

pub fn live_status(started: bool) -> serde_json::Value {
    let cmd = if started {
        "LIVE_OPEN_PLATFORM_LIVE_START"
    } else {
        "LIVE_OPEN_PLATFORM_LIVE_END"
    };
    serde_json::json!({ "cmd": cmd, "data": { "room_id": ROOM_ID, "title": "杂谈" } })
}

pub fn guard(open_id: &str, uname: &str, guard_level: i32, num: u32, unit: &str) -> serde_json::Value {
    serde_json::json!({
        "cmd": "LIVE_OPEN_PLATFORM_GUARD",
        "data": {
            "user_info": { "open_id": open_id, "uname": uname, "uface": "" },
            "guard_level": guard_level,
            "guard_num": num,
            "guard_unit": unit
        }
    })
}
