//! 読み上げ（音声合成）
//!
//! 読み上げテキストを一件ずつ合成し、生成された音声ファイルを投入順に返す。

pub mod error;
pub mod queue;
pub mod voicevox;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::OnceLock;

pub use error::SpeechError;
pub use queue::{AnnouncementOutcome, AnnouncementQueue, AnnouncementResults, AnnouncementTask};
pub use voicevox::VoicevoxSynthesizer;

/// 音声パラメータ
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// 話者ID
    pub speaker_id: i32,
    /// 話速
    pub speed_scale: f32,
    /// 音高
    pub pitch_scale: f32,
    /// 音量
    pub volume_scale: f32,
    /// 抑揚
    pub intonation_scale: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            speaker_id: 1,
            speed_scale: 1.0,
            pitch_scale: 0.0,
            volume_scale: 1.0,
            intonation_scale: 1.0,
        }
    }
}

impl VoiceParams {
    pub fn for_speaker(speaker_id: i32) -> Self {
        Self {
            speaker_id,
            ..Default::default()
        }
    }

    pub fn with_pitch(mut self, pitch_scale: f32) -> Self {
        self.pitch_scale = pitch_scale;
        self
    }
}

/// 合成済み音声への参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
}

impl AudioArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// 音声合成バックエンドトレイト
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// テキストを合成し、音声ファイルへの参照を返す
    async fn synthesize(&self, text: &str, voice: &VoiceParams)
        -> Result<AudioArtifact, SpeechError>;

    /// バックエンド名を取得
    fn name(&self) -> &'static str;
}

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"https?://\S+").ok())
        .as_ref()
}

/// 読み上げ用にテキストを整える（URL除去、空白の正規化）
pub fn sanitize_text(text: &str) -> String {
    let text = match url_pattern() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("你好 https://example.com 主人"), "你好 主人");
        assert_eq!(sanitize_text("  你好    主人 "), "你好 主人");
    }

    #[test]
    fn test_voice_params() {
        let voice = VoiceParams::for_speaker(3).with_pitch(-0.05);
        assert_eq!(voice.speaker_id, 3);
        assert_eq!(voice.pitch_scale, -0.05);
        assert_eq!(voice.speed_scale, 1.0);
    }
}
