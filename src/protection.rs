use serde::Serialize;
use thiserror::Error;

use crate::{
    base64,
    jwk::{Jwk, JwkError},
    key_pair::KeyPair,
};

/// 定義保護頭產生時可能出現的錯誤。
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 保護頭識別簽名金鑰的方式。
///
/// - `Jwk`：嵌入完整公鑰，用於帳戶 URL 尚未存在時（建立、查詢帳戶）以及金鑰輪替的內層物件。
/// - `Kid`：帶入帳戶 URL，用於所有已認證的請求。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection<'a> {
    Jwk,
    Kid(&'a str),
}

/// JWS 保護頭。`jwk` 與 `kid` 互斥；`nonce` 只有金鑰輪替的內層 JWS 會省略。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    url: String,
}

impl ProtectedHeader {
    /// 依保護方式建立保護頭，`Jwk` 模式會從 `key_pair` 取出公鑰參數。
    pub fn new(
        alg: &str,
        protection: Protection<'_>,
        key_pair: &KeyPair,
        nonce: Option<&str>,
        url: &str,
    ) -> Result<Self> {
        let (jwk, kid) = match protection {
            Protection::Jwk => (Some(Jwk::new(key_pair)?), None),
            Protection::Kid(kid) => (None, Some(kid.to_string())),
        };

        Ok(Self {
            alg: alg.to_string(),
            jwk,
            kid,
            nonce: nonce.map(ToString::to_string),
            url: url.to_string(),
        })
    }

    /// 序列化為 JSON 後再以 URL 安全 Base64 編碼。
    pub fn to_base64(&self) -> Result<String> {
        Ok(base64::encode(serde_json::to_string(self)?))
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}
