use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64,
    problem::Problem,
    status::{Stateful, Status},
};

/// 定義與挑戰（Challenge）查找相關的錯誤類型。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("{} challenge not found in challenge list", .0.label())]
    NotFound(ChallengeType),
}

/// 表示 ACME 挑戰的類型。CA 回傳的其他類型會保留在 `Other` 中。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(s) => s,
        }
    }

    /// 錯誤訊息使用的名稱，例如 `Http`。
    pub fn label(&self) -> &str {
        match self {
            Self::Http01 => "Http",
            Self::Dns01 => "Dns",
            Self::TlsAlpn01 => "TlsAlpn",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ChallengeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(s),
        }
    }
}

impl From<ChallengeType> for String {
    fn from(t: ChallengeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示一個 ACME 驗證挑戰。
///
/// 挑戰的狀態只由 CA 改變，客戶端透過重新取得所屬授權來觀察。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub type_: ChallengeType,
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Challenge {
    pub const WELL_KNOWN_PATH: &'static str = "/.well-known/acme-challenge/";

    /// `token.thumbprint`，HTTP-01 的檔案內容，也是 DNS-01 摘要的輸入。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        format!("{}.{}", self.token, thumbprint)
    }

    /// DNS-01 TXT 記錄的值：key authorization 的 SHA-256 摘要，URL 安全 Base64。
    pub fn dns_digest(&self, thumbprint: &str) -> String {
        base64::thumbprint_digest(self.key_authorization(thumbprint))
    }

    /// HTTP-01 驗證檔案的網址。
    pub fn http_url(&self, domain: &str) -> String {
        format!("http://{}{}{}", domain, Self::WELL_KNOWN_PATH, self.token)
    }
}

impl Stateful for Challenge {
    fn status(&self) -> Status {
        self.status
    }
}
