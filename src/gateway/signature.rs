//! オープンプラットフォームの署名
//!
//! APIリクエストのヘッダー署名と、表示クライアントから届く初期化パラメータの
//! 署名検証を行う。どちらもHMAC-SHA256（16進表記）。

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::GatewayError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_METHOD: &str = "HMAC-SHA256";
pub const SIGNATURE_VERSION: &str = "1.0";

/// 本文のMD5（16進）
pub fn content_md5(body: &str) -> String {
    hex::encode(Md5::digest(body.as_bytes()))
}

fn hmac_hex(secret: &str, message: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Handshake(format!("HMAC鍵が不正です: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// APIリクエストに付ける署名済みヘッダー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub access_key_id: String,
    pub content_md5: String,
    pub nonce: String,
    pub timestamp: i64,
    pub authorization: String,
}

impl SignedHeaders {
    /// 本文とタイムスタンプ・ノンスからヘッダーを作成
    pub fn sign(
        access_key_id: &str,
        secret: &str,
        body: &str,
        timestamp: i64,
        nonce: &str,
    ) -> Result<Self, GatewayError> {
        let content_md5 = content_md5(body);
        let canonical = format!(
            "x-bili-accesskeyid:{}\nx-bili-content-md5:{}\nx-bili-signature-method:{}\nx-bili-signature-nonce:{}\nx-bili-signature-version:{}\nx-bili-timestamp:{}",
            access_key_id, content_md5, SIGNATURE_METHOD, nonce, SIGNATURE_VERSION, timestamp
        );
        let authorization = hmac_hex(secret, &canonical)?;

        Ok(Self {
            access_key_id: access_key_id.to_string(),
            content_md5,
            nonce: nonce.to_string(),
            timestamp,
            authorization,
        })
    }

    /// HTTPヘッダーの組
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Accept", "application/json".to_string()),
            ("Content-Type", "application/json".to_string()),
            ("x-bili-accesskeyid", self.access_key_id.clone()),
            ("x-bili-content-md5", self.content_md5.clone()),
            ("x-bili-signature-method", SIGNATURE_METHOD.to_string()),
            ("x-bili-signature-nonce", self.nonce.clone()),
            ("x-bili-signature-version", SIGNATURE_VERSION.to_string()),
            ("x-bili-timestamp", self.timestamp.to_string()),
            ("Authorization", self.authorization.clone()),
        ]
    }
}

/// 表示クライアントの初期化パラメータ（署名付き）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InitSignature {
    pub timestamp: i64,
    pub code: String,
    pub mid: i64,
    pub caller: String,
    pub code_sign: String,
}

impl InitSignature {
    /// キー名の昇順に並べた署名対象文字列
    fn canonical(&self) -> String {
        format!(
            "caller={}&code={}&mid={}&timestamp={}",
            self.caller, self.code, self.mid, self.timestamp
        )
    }

    /// 署名を計算（テストや発行側で使用）
    pub fn compute(&self, secret: &str) -> Result<String, GatewayError> {
        hmac_hex(secret, &self.canonical())
    }

    /// 署名を検証
    pub fn validate(&self, secret: &str) -> Result<(), GatewayError> {
        let expected =
            hex::decode(self.code_sign.trim()).map_err(|_| GatewayError::InvalidSignature)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| GatewayError::InvalidSignature)?;
        mac.update(self.canonical().as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| GatewayError::InvalidSignature)
    }
}
