//! 表示クライアント向けWebSocketサーバー
//!
//! 接続一つにつき一つのセッションを作り、クライアントのコマンド（JSONテキスト）を
//! セッションへ渡し、セッションの結果を `{type, code, msg, data}` のJSONで返す。
//!
//! ## 使用方法
//!
//! ```ignore
//! let server = DisplayServer::new(&config.server, deps, settings);
//! let listener = server.bind().await?;
//! server.serve(listener, shutdown).await?;
//! ```
//!
//! セッションが閉じる（ハートビート失敗など）とクライアント接続も閉じる。
//! クライアントが切断するとセッションを後片付けする。

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use crate::session::{FeedSink, ResultItem, Session, SessionDeps, SessionSettings};

/// 希望ポートが使用中の場合に試す追加ポート数
const PORT_FALLBACK_RANGE: u16 = 9;

type ClientId = u64;
type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReader = SplitStream<WebSocketStream<TcpStream>>;

/// 表示クライアント向けサーバー
pub struct DisplayServer {
    bind: String,
    preferred_port: u16,
    deps: SessionDeps,
    settings: SessionSettings,
    next_client_id: AtomicU64,
}

impl DisplayServer {
    pub fn new(config: &ServerConfig, deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            bind: config.bind.clone(),
            preferred_port: config.port,
            deps,
            settings,
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn preferred_port(&self) -> u16 {
        self.preferred_port
    }

    /// 待ち受けソケットを開く
    ///
    /// 希望ポートが使用中の場合、続くポートを順番に試す。ポート0はOSに任せる。
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let end_port = if self.preferred_port == 0 {
            0
        } else {
            self.preferred_port.saturating_add(PORT_FALLBACK_RANGE)
        };
        let mut last_error = None;

        for port in self.preferred_port..=end_port {
            let addr = format!("{}:{}", self.bind, port);
            tracing::debug!("Attempting to bind display server to {}", addr);

            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    let local = listener.local_addr()?;
                    if port != self.preferred_port {
                        tracing::info!(
                            "🌐 表示サーバー待ち受け: ws://{} (希望ポート {} は使用中)",
                            local,
                            self.preferred_port
                        );
                    } else {
                        tracing::info!("🌐 表示サーバー待ち受け: ws://{}", local);
                    }
                    return Ok(listener);
                }
                Err(e) => {
                    tracing::debug!("Port {} unavailable: {}", port, e);
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "No ports available")
        });
        tracing::error!(
            "❌ ポート {}-{} のいずれにもバインドできません: {}",
            self.preferred_port,
            end_port,
            err
        );
        Err(anyhow::anyhow!(
            "Failed to bind to any port in range {}-{}: {}",
            self.preferred_port,
            end_port,
            err
        ))
    }

    /// 接続を受け付け続ける
    ///
    /// `shutdown` が発火すると受け付けを止め、全セッションの後片付けを待って返る。
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                        tracing::info!("📥 新しい接続: {} (client_id: {})", addr, client_id);

                        let server = Arc::clone(&self);
                        let shutdown = shutdown.clone();
                        tracker.spawn(async move {
                            let handled = server
                                .handle_connection(stream, addr, client_id, shutdown)
                                .await;
                            if let Err(e) = handled {
                                tracing::warn!("接続エラー client {}: {}", client_id, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Failed to accept connection: {}", e),
                },
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("🛑 表示サーバーを停止しました");
        Ok(())
    }

    /// 一接続を処理
    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        client_id: ClientId,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, read) = ws_stream.split();

        let (sink, mut results) = FeedSink::new();
        let session = Session::new(self.deps.clone(), self.settings.clone(), Arc::new(sink));
        tracing::info!("✅ Client {} connected from {}", client_id, addr);

        // init はハンドシェイク完了まで待つため、コマンドは別タスクで順に処理する
        let mut reader = tokio::spawn(read_commands(read, Arc::clone(&session), client_id));
        let session_closed = session.cancel_token();

        let forwarded = async {
            loop {
                tokio::select! {
                    item = results.recv() => match item {
                        Some(item) => send_result(&mut write, &item).await?,
                        None => break,
                    },
                    _ = session_closed.cancelled() => {
                        tracing::info!("セッション終了のため client {} を切断", client_id);
                        break;
                    }
                    _ = shutdown.cancelled() => break,
                    _ = &mut reader => {
                        tracing::info!("📤 Client {} disconnected", client_id);
                        break;
                    }
                }
            }
            anyhow::Ok(())
        }
        .await;

        reader.abort();
        session.close().await;

        // 後片付け中に出た結果（最後のエラーなど）を届けてから閉じる
        if forwarded.is_ok() {
            while let Ok(item) = results.try_recv() {
                if send_result(&mut write, &item).await.is_err() {
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        }
        forwarded
    }
}

async fn send_result(write: &mut WsWriter, item: &ResultItem) -> anyhow::Result<()> {
    let json = serde_json::to_string(item)?;
    if item.is_ok() {
        tracing::debug!("write result type: {:?}, data: {}", item.kind, json);
    } else {
        tracing::warn!(
            "write result type: {:?}, code: {}, msg: {}",
            item.kind,
            item.code,
            item.msg
        );
    }
    write.send(Message::Text(json)).await?;
    Ok(())
}

/// クライアントのコマンドを読み、切断まで順にセッションへ渡す
async fn read_commands(mut read: WsReader, session: Arc<Session>, client_id: ClientId) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_command(&text).await,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => session.handle_command(&text).await,
                Err(_) => tracing::warn!("client {} からの不正なバイナリを無視", client_id),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error for client {}: {}", client_id, e);
                break;
            }
        }
    }
}
