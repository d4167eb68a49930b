//! VOICEVOX互換エンジンによる音声合成

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::error::SpeechError;
use super::{AudioArtifact, SpeechSynthesizer, VoiceParams};
use crate::config::SpeechConfig;

/// VOICEVOX合成バックエンド
pub struct VoicevoxSynthesizer {
    base_url: String,
    output_dir: PathBuf,
    client: reqwest::Client,
}

impl VoicevoxSynthesizer {
    /// 新しいインスタンスを作成
    pub fn new(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(config.synthesis_timeout() + Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base_url: format!("http://{}:{}", config.host, config.port),
            output_dir: config.output_dir.clone(),
            client,
        })
    }

    /// 接続テスト
    pub async fn test_connection(&self) -> Result<bool, SpeechError> {
        let url = format!("{}/version", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let version = response.text().await.unwrap_or_default();
                tracing::info!("✅ VOICEVOX接続成功 (バージョン: {})", version.trim());
                Ok(true)
            }
            Ok(response) => {
                tracing::warn!("⚠️ VOICEVOX接続失敗: ステータス {}", response.status());
                Ok(false)
            }
            Err(e) => {
                tracing::error!("❌ VOICEVOX接続エラー: {}", e);
                Err(SpeechError::Connection(format!(
                    "VOICEVOXに接続できません: {}",
                    e
                )))
            }
        }
    }

    /// audio_queryを取得
    async fn audio_query(
        &self,
        text: &str,
        speaker_id: i32,
    ) -> Result<serde_json::Value, SpeechError> {
        let url = format!(
            "{}/audio_query?speaker={}&text={}",
            self.base_url,
            speaker_id,
            urlencoding::encode(text),
        );

        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(SpeechError::Connection(format!(
                "audio_queryに失敗: ステータス {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    /// WAVデータを合成
    async fn synthesis(
        &self,
        audio_query: &serde_json::Value,
        speaker_id: i32,
    ) -> Result<Vec<u8>, SpeechError> {
        let url = format!("{}/synthesis?speaker={}", self.base_url, speaker_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(audio_query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SpeechError::Connection(format!(
                "synthesisに失敗: ステータス {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// audio_queryに音声パラメータを適用
pub(crate) fn apply_voice_params(audio_query: &mut serde_json::Value, voice: &VoiceParams) {
    let Some(obj) = audio_query.as_object_mut() else {
        return;
    };

    let params = [
        ("speedScale", voice.speed_scale),
        ("pitchScale", voice.pitch_scale),
        ("volumeScale", voice.volume_scale),
        ("intonationScale", voice.intonation_scale),
    ];
    for (key, value) in params {
        if let Some(number) = serde_json::Number::from_f64(value as f64) {
            obj.insert(key.to_string(), serde_json::Value::Number(number));
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for VoicevoxSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<AudioArtifact, SpeechError> {
        tracing::debug!("🔊 VOICEVOXに送信: {}", text);

        let mut audio_query = self.audio_query(text, voice.speaker_id).await?;
        apply_voice_params(&mut audio_query, voice);
        let wav_bytes = self.synthesis(&audio_query, voice.speaker_id).await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(format!("tts-{}.wav", Uuid::new_v4()));
        tokio::fs::write(&path, wav_bytes).await?;

        Ok(AudioArtifact::new(path))
    }

    fn name(&self) -> &'static str {
        "VOICEVOX"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_voice_params() {
        let mut query = serde_json::json!({
            "accent_phrases": [],
            "speedScale": 1.0,
            "pitchScale": 0.0,
        });
        let voice = VoiceParams::default().with_pitch(-0.05);
        apply_voice_params(&mut query, &voice);

        let pitch = query["pitchScale"].as_f64().unwrap();
        assert!((pitch + 0.05).abs() < 1e-6);
        assert_eq!(query["volumeScale"].as_f64(), Some(1.0));
        assert!(query["accent_phrases"].is_array());
    }

    #[test]
    fn test_base_url_from_config() {
        let config = SpeechConfig {
            host: "127.0.0.1".to_string(),
            port: 50121,
            ..Default::default()
        };
        let synthesizer = VoicevoxSynthesizer::new(&config).unwrap();
        assert_eq!(synthesizer.base_url, "http://127.0.0.1:50121");
        assert_eq!(synthesizer.name(), "VOICEVOX");
    }
}
