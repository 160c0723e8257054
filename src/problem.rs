use std::fmt;

use serde::{Deserialize, Serialize};

use crate::authorization::Identifier;

/// CA 以 `application/problem+json` 回傳的錯誤文件（RFC 7807 / RFC 8555 §6.7）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

/// 針對單一識別項的子錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

impl Problem {
    pub const ACME_PREFIX: &'static str = "urn:ietf:params:acme:error:";

    /// 去掉 ACME 命名空間後的錯誤種類，例如 `badNonce`。
    pub fn kind(&self) -> &str {
        self.type_
            .strip_prefix(Self::ACME_PREFIX)
            .unwrap_or(&self.type_)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == "badNonce"
    }

    pub fn is_already_revoked(&self) -> bool {
        self.kind() == "alreadyRevoked"
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == "rateLimited"
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.type_, detail)?,
            None => write!(f, "{}", self.type_)?,
        }
        for sub in &self.subproblems {
            match &sub.identifier {
                Some(identifier) => write!(f, "; {} ({})", sub.type_, identifier.value)?,
                None => write!(f, "; {}", sub.type_)?,
            }
        }
        Ok(())
    }
}
