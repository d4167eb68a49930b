//! オープンプラットフォームのゲートウェイクライアント
//!
//! HTTP（署名付き）でセッションを管理し、WebSocketでイベントを受け取る。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::proto::{auth_succeeded, Operation, Packet, VERSION_NORMAL};
use super::signature::SignedHeaders;
use super::{
    AnchorInfo, CloseReason, EventStream, GatewayError, GatewayMessage, LiveGateway,
    SessionDescriptor,
};
use crate::config::{BilibiliConfig, ReactionPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// インタラクション終了を知らせるコマンド
const CMD_INTERACTION_END: &str = "LIVE_OPEN_PLATFORM_INTERACTION_END";

/// イベントストリームのバッファサイズ
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StartData {
    game_info: GameInfo,
    websocket_info: WebsocketInfo,
    #[serde(default)]
    anchor_info: AnchorInfo,
}

#[derive(Debug, Deserialize)]
struct GameInfo {
    game_id: String,
}

#[derive(Debug, Deserialize)]
struct WebsocketInfo {
    auth_body: String,
    #[serde(default)]
    wss_link: Vec<String>,
}

impl From<StartData> for SessionDescriptor {
    fn from(data: StartData) -> Self {
        Self {
            game_id: data.game_info.game_id,
            auth_body: data.websocket_info.auth_body,
            websocket_urls: data.websocket_info.wss_link,
            anchor: data.anchor_info,
        }
    }
}

/// オープンプラットフォームクライアント
pub struct OpenLiveClient {
    access_key: String,
    secret_key: String,
    app_id: i64,
    api_base: String,
    http: reqwest::Client,
    heartbeat_interval: Duration,
    auth_timeout: Duration,
}

impl OpenLiveClient {
    pub fn new(config: &BilibiliConfig, policy: &ReactionPolicy) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(policy.handshake_timeout())
            .build()?;

        Ok(Self {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            app_id: config.app_id,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http,
            heartbeat_interval: policy.heartbeat_interval(),
            auth_timeout: policy.handshake_timeout(),
        })
    }

    /// 署名付きPOST
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Option<T>, GatewayError> {
        let body = serde_json::to_string(body)?;
        let nonce = Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let headers =
            SignedHeaders::sign(&self.access_key, &self.secret_key, &body, timestamp, &nonce)?;

        let mut request = self.http.post(format!("{}{}", self.api_base, path));
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        let response: ApiResponse<T> = request.body(body).send().await?.json().await?;
        if response.code != 0 {
            return Err(GatewayError::Api {
                code: response.code,
                message: response.message,
            });
        }
        Ok(response.data)
    }

    /// WebSocketを開いて認証を済ませる
    async fn open_socket(&self, url: &str, auth_body: &str) -> Result<WsStream, GatewayError> {
        let (mut socket, _) = connect_async(url)
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))?;

        socket
            .send(Message::Binary(Packet::auth(auth_body).encode()))
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))?;

        tokio::time::timeout(self.auth_timeout, wait_auth_reply(&mut socket))
            .await
            .map_err(|_| GatewayError::Timeout(self.auth_timeout.as_secs()))??;

        Ok(socket)
    }
}

async fn wait_auth_reply(socket: &mut WsStream) -> Result<(), GatewayError> {
    while let Some(message) = socket.next().await {
        let message = message.map_err(|e| GatewayError::WebSocket(e.to_string()))?;
        let Message::Binary(data) = message else {
            continue;
        };
        for packet in Packet::decode_all(&data)? {
            if packet.operation == Operation::AuthReply {
                if auth_succeeded(&packet.body) {
                    return Ok(());
                }
                return Err(GatewayError::Handshake(format!(
                    "WebSocket認証に失敗しました: {}",
                    String::from_utf8_lossy(&packet.body)
                )));
            }
        }
    }
    Err(GatewayError::WebSocket(
        "認証応答を受け取る前に切断されました".to_string(),
    ))
}

/// 受信フレームを処理し、ストリームを閉じるべき理由があれば返す
async fn handle_frame(
    data: &[u8],
    events: &mpsc::Sender<GatewayMessage>,
) -> Result<Option<CloseReason>, GatewayError> {
    for packet in Packet::decode_frame(data)? {
        match packet.operation {
            Operation::Message if packet.version == VERSION_NORMAL => {
                if is_interaction_end(&packet.body) {
                    return Ok(Some(CloseReason::ShutdownReceived));
                }
                if events.send(GatewayMessage::Event(packet.body)).await.is_err() {
                    return Ok(Some(CloseReason::Actively));
                }
            }
            Operation::Message => {
                tracing::warn!("未対応のパケットバージョンです (version {})", packet.version);
            }
            Operation::HeartbeatReply => {
                tracing::trace!("💓 ハートビート応答");
            }
            Operation::AuthReply if !auth_succeeded(&packet.body) => {
                return Ok(Some(CloseReason::AuthFailed));
            }
            _ => {}
        }
    }
    Ok(None)
}

fn is_interaction_end(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("cmd").and_then(|c| c.as_str()).map(|c| c == CMD_INTERACTION_END))
        .unwrap_or(false)
}

/// 受信ループ（WebSocketハートビートを含む）
async fn run_socket(
    socket: WsStream,
    events: mpsc::Sender<GatewayMessage>,
    heartbeat_interval: Duration,
) {
    let (mut sink, mut stream) = socket.split();
    let mut ticker = tokio::time::interval(heartbeat_interval);

    let reason = loop {
        tokio::select! {
            _ = events.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                tracing::debug!("🔌 受信側が閉じたため切断します");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Binary(Packet::heartbeat().encode())).await {
                    break CloseReason::Network(e.to_string());
                }
            }
            message = stream.next() => match message {
                None => break CloseReason::Network("接続が切断されました".to_string()),
                Some(Err(e)) => break CloseReason::Network(e.to_string()),
                Some(Ok(Message::Binary(data))) => match handle_frame(&data, &events).await {
                    Ok(None) => {}
                    Ok(Some(reason)) => break reason,
                    Err(e) => tracing::warn!("⚠️ パケットを解析できません: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break CloseReason::Other(format!("close frame: {:?}", frame));
                }
                Some(Ok(_)) => {}
            },
        }
    };

    tracing::info!("🔌 イベントストリーム終了: {}", reason.display_name());
    let _ = events.send(GatewayMessage::Closed(reason)).await;
}

#[async_trait]
impl LiveGateway for OpenLiveClient {
    async fn start(&self, code: &str) -> Result<SessionDescriptor, GatewayError> {
        let body = serde_json::json!({ "code": code, "app_id": self.app_id });
        let data: StartData = self
            .post("/v2/app/start", &body)
            .await?
            .ok_or_else(|| GatewayError::Handshake("開始応答にdataがありません".to_string()))?;

        let descriptor = SessionDescriptor::from(data);
        tracing::info!(
            "🎬 セッション開始: game_id={} room_id={}",
            descriptor.game_id,
            descriptor.anchor.room_id
        );
        Ok(descriptor)
    }

    async fn heartbeat(&self, game_id: &str) -> Result<(), GatewayError> {
        let body = serde_json::json!({ "game_id": game_id });
        self.post::<serde_json::Value>("/v2/app/heartbeat", &body)
            .await
            .map_err(|e| GatewayError::Heartbeat(e.to_string()))?;
        Ok(())
    }

    async fn end(&self, game_id: &str) -> Result<(), GatewayError> {
        let body = serde_json::json!({ "game_id": game_id, "app_id": self.app_id });
        self.post::<serde_json::Value>("/v2/app/end", &body).await?;
        tracing::info!("🏁 セッション終了: game_id={}", game_id);
        Ok(())
    }

    async fn connect(&self, descriptor: &SessionDescriptor) -> Result<EventStream, GatewayError> {
        let mut last_error = None;

        for url in &descriptor.websocket_urls {
            match self.open_socket(url, &descriptor.auth_body).await {
                Ok(socket) => {
                    tracing::info!("🔗 イベントストリームに接続: {}", url);
                    let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
                    tokio::spawn(run_socket(socket, sender, self.heartbeat_interval));
                    return Ok(receiver);
                }
                Err(e) => {
                    tracing::warn!("⚠️ 接続失敗 {}: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::WebSocket("接続先のURLがありません".to_string())
        }))
    }
}
