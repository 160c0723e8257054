//! DNS-01 驗證所需的 TXT 記錄查詢。

use std::{fmt, sync::Arc};

use log::{debug, warn};
use reqwest::{header::ACCEPT, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::transport::{HttpClient, Request, TransportError};

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid query for {0}")]
    InvalidQuery(String),
}

/// 確認 `_acme-challenge.<domain>` 的 TXT 記錄是否已包含指定摘要。
pub trait DnsChecker: Send + Sync + fmt::Debug {
    fn verify(&self, domain: &str, digest: &str) -> Result<bool, DnsError>;
}

/// 透過 Google Public DNS 的 JSON API（DNS-over-HTTPS）查詢 TXT 記錄。
#[derive(Debug, Clone)]
pub struct GooglePublicDns {
    client: Arc<dyn HttpClient>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DohResponse {
    status: u32,
    #[serde(default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    type_: u16,
    data: String,
}

impl GooglePublicDns {
    pub const BASE_URL: &'static str = "https://dns.google.com/resolve";
    const STATUS_OK: u32 = 0;
    const TYPE_TXT: u16 = 16;

    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(client: Arc<dyn HttpClient>, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    pub fn query_url(&self, domain: &str) -> Result<String, DnsError> {
        let name = format!("_acme-challenge.{}", domain);
        let params = [("name", name.as_str()), ("type", "TXT")];
        let url = Url::parse_with_params(&self.base_url, &params)
            .map_err(|e| DnsError::InvalidQuery(format!("{}: {}", domain, e)))?;
        Ok(url.to_string())
    }
}

impl DnsChecker for GooglePublicDns {
    fn verify(&self, domain: &str, digest: &str) -> Result<bool, DnsError> {
        let url = self.query_url(domain)?;
        let response = self
            .client
            .execute(Request::get(&url).header(ACCEPT, "application/dns-json"))?;
        if !response.is_success() {
            warn!("DNS query for {} failed with {}", domain, response.status());
            return Ok(false);
        }

        let data: DohResponse = response.json()?;
        if data.status != Self::STATUS_OK {
            debug!("DNS query for {} returned status {}", domain, data.status);
            return Ok(false);
        }

        let expected = format!("\"{}\"", digest);
        Ok(data
            .answer
            .iter()
            .any(|answer| answer.type_ == Self::TYPE_TXT && answer.data == expected))
    }
}
