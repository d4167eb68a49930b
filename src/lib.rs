//! livelayer: ライブ配信の視聴者イベントに反応するコンパニオン層
//!
//! 配信プラットフォームのイベントゲートウェイに接続し、チャット・ギフト・
//! 入室などのイベントを表示クライアントへ流しつつ、読み上げ（音声合成）と
//! 会話AIによる返信で反応する。表示クライアント一接続が一セッションになる。

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod profile;
pub mod reaction;
pub mod reply;
pub mod server;
pub mod session;
pub mod speech;

// Re-export the main error types for convenience
pub use error::{LayerError, LayerResult};

pub use config::{AppConfig, ConfigManager, ReactionPolicy};
pub use events::LiveEvent;
pub use server::DisplayServer;
pub use session::{
    ClientCommand, DisplaySink, FeedSink, ResultItem, ResultKind, Session, SessionDeps,
    SessionSettings, SessionState,
};
