//! アプリケーション設定管理モジュール
//!
//! TOML設定ファイルの読み込みと、反応ポリシーの調整値を提供します。
//! 設定ファイルのパスを指定しない場合はXDG設定ディレクトリを使用します。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// 表示クライアント向けサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// バインドアドレス
    pub bind: String,
    /// ポート番号
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// ライブ配信プラットフォーム（オープンプラットフォーム）設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BilibiliConfig {
    pub access_key: String,
    pub secret_key: String,
    pub app_id: i64,
    /// APIのベースURL
    pub api_base: String,
    /// 初期化リクエストの署名検証を無効化する
    pub disable_validate_sign: bool,
}

impl Default for BilibiliConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            app_id: 0,
            api_base: "https://live-open.biliapi.com".to_string(),
            disable_validate_sign: false,
        }
    }
}

/// 会話AI設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// chat/completions互換エンドポイントのベースURL
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// システムプロンプト
    pub system_prompt: String,
    pub timeout_secs: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://qianfan.baidubce.com/v2".to_string(),
            api_key: String::new(),
            model: "ernie-4.0-turbo-8k".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.trim().to_string(),
            timeout_secs: 30,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"
你是一个辅助机器人，作为直播间主播的AI助手，参与到与直播间粉丝的互动，并且准确地回答粉丝提出的问题，其中粉丝的互动又称作为弹幕。
回答的内容尽量简短，不要超过20个字。
如果你要称呼主播，那你一般要叫【主人】。
如果你要称呼用户，需要在用户名后加上【酱】。
主要以回复当前用户为主要目的，最近的用户弹幕仅用于理解上下文。
"#;

/// 音声合成設定（VOICEVOX互換エンジン）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// ホスト名
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// 話者ID
    pub speaker_id: i32,
    /// 音声ファイルの出力先
    pub output_dir: PathBuf,
    /// キューサイズ上限
    pub queue_size_limit: usize,
    /// 1件あたりの合成タイムアウト
    pub synthesis_timeout_secs: u64,
    /// AI返信無効時にチャット読み上げへ適用する音高
    pub reply_disabled_pitch: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 50021,
            speaker_id: 1,
            output_dir: PathBuf::from("./result"),
            queue_size_limit: 50,
            synthesis_timeout_secs: 60,
            reply_disabled_pitch: -0.05,
        }
    }
}

impl SpeechConfig {
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

/// 反応ポリシー
///
/// 元の配信で調整された値を既定値とする。値そのものはポリシーであり、
/// 正しさには影響しない。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReactionPolicy {
    /// 対象の粉丝牌（ファンバッジ）名
    pub fans_medal_name: String,
    /// AI返信を起動できる最小バッジレベル
    pub reply_medal_level: i32,
    /// 入室時に即時歓迎するバッジレベル
    pub welcome_medal_level: i32,
    /// バッジに関係なくAI返信を起動できるユーザー名
    pub privileged_users: Vec<String>,
    /// 読み上げ・履歴に載せないチャット本文（ギフト連動の定型文など）
    pub ignored_messages: Vec<String>,

    /// 履歴の保持期間（秒）
    pub message_retention_secs: u64,
    /// 履歴の最大件数
    pub history_capacity: usize,
    /// AIに渡す文脈の期間（秒）
    pub reply_context_secs: u64,

    /// ギフト連撃の待ち時間（秒）
    pub gift_combo_secs: u64,
    /// 最後の入室者を歓迎するまでの待ち時間（秒）
    pub welcome_idle_secs: u64,

    /// 返信数上限の集計期間（秒）
    pub reply_limit_window_secs: u64,
    /// 集計期間内の返信数上限
    pub reply_limit_count: usize,

    /// 発言者数集計の期間（秒）
    pub active_user_window_secs: u64,
    /// この人数以上が発言していればAI返信を止める
    pub active_user_limit: usize,

    /// 確率判定用メッセージ数の集計期間（秒）
    pub probability_window_secs: u64,
    /// 低頻度段階の上限メッセージ数
    pub probability_low_tier_max: usize,
    /// 低頻度段階のスキップ確率
    pub probability_low_tier_skip: f64,
    /// 高頻度段階のスキップ確率
    pub probability_high_tier_skip: f64,

    /// ゲートウェイへのハートビート間隔（秒）
    pub heartbeat_interval_secs: u64,
    /// ゲートウェイとのハンドシェイクのタイムアウト（秒）
    pub handshake_timeout_secs: u64,
}

impl Default for ReactionPolicy {
    fn default() -> Self {
        Self {
            fans_medal_name: "巫女酱".to_string(),
            reply_medal_level: 10,
            welcome_medal_level: 15,
            privileged_users: Vec::new(),
            ignored_messages: vec!["老板大气！点点红包抽礼物".to_string()],
            message_retention_secs: 15 * 60,
            history_capacity: 512,
            reply_context_secs: 10 * 60,
            gift_combo_secs: 4,
            welcome_idle_secs: 10 * 60,
            reply_limit_window_secs: 5 * 60,
            reply_limit_count: 10,
            active_user_window_secs: 60,
            active_user_limit: 5,
            probability_window_secs: 5 * 60,
            probability_low_tier_max: 10,
            probability_low_tier_skip: 0.3,
            probability_high_tier_skip: 0.7,
            heartbeat_interval_secs: 20,
            handshake_timeout_secs: 10,
        }
    }
}

impl ReactionPolicy {
    pub fn message_retention(&self) -> Duration {
        Duration::from_secs(self.message_retention_secs)
    }

    pub fn reply_context(&self) -> Duration {
        Duration::from_secs(self.reply_context_secs)
    }

    pub fn gift_combo(&self) -> Duration {
        Duration::from_secs(self.gift_combo_secs)
    }

    pub fn welcome_idle(&self) -> Duration {
        Duration::from_secs(self.welcome_idle_secs)
    }

    pub fn reply_limit_window(&self) -> Duration {
        Duration::from_secs(self.reply_limit_window_secs)
    }

    pub fn active_user_window(&self) -> Duration {
        Duration::from_secs(self.active_user_window_secs)
    }

    pub fn probability_window(&self) -> Duration {
        Duration::from_secs(self.probability_window_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// チャット本文が無視リストに載っているか
    pub fn is_ignored_message(&self, text: &str) -> bool {
        self.ignored_messages.iter().any(|m| m == text)
    }
}

/// データベース設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLiteファイルのパス（Noneの場合はXDGデータディレクトリ）
    pub path: Option<PathBuf>,
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: true,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub bilibili: BilibiliConfig,
    pub reply: ReplyConfig,
    pub speech: SpeechConfig,
    pub policy: ReactionPolicy,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG設定ディレクトリを使う設定マネージャーを作成
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(Self { config_path })
    }

    /// 指定パスの設定ファイルを使う
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "sifyfy", "livelayer")
            .context("Failed to determine project directories")?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 設定を読み込む。ファイルが無ければ既定値を返す
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            warn!(
                "設定ファイルが見つかりません。既定値を使用します: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;
        let config = parse_config(&content)?;

        info!("📋 設定を読み込みました: {}", self.config_path.display());
        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.config_path, content).with_context(|| {
            format!("Failed to write config file: {}", self.config_path.display())
        })?;
        info!("💾 設定を保存しました: {}", self.config_path.display());
        Ok(())
    }
}

/// TOML文字列から設定を読み込む
pub fn parse_config(content: &str) -> Result<AppConfig> {
    toml::from_str(content).context("Failed to parse config file")
}
