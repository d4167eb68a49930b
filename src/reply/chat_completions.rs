//! chat/completions互換APIクライアント

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{format_history, ChatTurn, ReplyError, ReplyService};
use crate::config::ReplyConfig;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionContent,
}

#[derive(Debug, Deserialize)]
struct CompletionContent {
    #[serde(default)]
    content: String,
}

/// chat/completions互換エンドポイントを呼ぶ返信サービス
pub struct ChatCompletionsClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(config: &ReplyConfig) -> Result<Self, ReplyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }
}

/// 応答本文から返信テキストを取り出す
fn extract_reply(body: &str) -> Result<String, ReplyError> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    let reply = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .unwrap_or_default();

    if reply.is_empty() {
        return Err(ReplyError::EmptyResponse);
    }
    Ok(reply)
}

#[async_trait]
impl ReplyService for ChatCompletionsClient {
    async fn reply(&self, system_prompt: &str, history: &[ChatTurn]) -> Result<String, ReplyError> {
        let content = format_history(history)?;
        tracing::info!("🤖 AIへ送信: {}", content);

        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                CompletionMessage {
                    role: "system",
                    content: system_prompt,
                },
                CompletionMessage {
                    role: "user",
                    content: &content,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!("❌ AI APIエラー: {} {}", status, body);
            return Err(ReplyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let reply = extract_reply(&body)?;
        tracing::info!("🤖 AI返信: {}", reply);
        Ok(reply)
    }
}
