//! 證書相關的值型別：申請規格、撤銷原因、PEM 證書鏈拆分與已簽發證書的解析。

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use regex::Regex;
use thiserror::Error;

use crate::key_pair::{EcCurve, KeyAlgorithm, RsaKeyLength};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("No PEM certificate block found")]
    NoCertificate,
    #[error("Invalid certificate pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// 每個證書目錄中的檔案名稱。
pub struct Bundle;

impl Bundle {
    pub const PRIVATE_KEY: &'static str = "private.pem";
    pub const PUBLIC_KEY: &'static str = "public.pem";
    pub const CERTIFICATE: &'static str = "certificate.crt";
    pub const FULL_CHAIN_CERTIFICATE: &'static str = "fullchain.crt";
    pub const ORDER: &'static str = "order";
}

/// 申請證書時的規格：證書金鑰演算法與可選的有效期間。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateSpec {
    pub key: KeyAlgorithm,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl CertificateSpec {
    pub fn with_rsa_key(length: RsaKeyLength) -> Self {
        Self {
            key: KeyAlgorithm::Rsa(length),
            not_before: None,
            not_after: None,
        }
    }

    pub fn with_ec_key(curve: EcCurve) -> Self {
        Self {
            key: KeyAlgorithm::Ec(curve),
            not_before: None,
            not_after: None,
        }
    }

    pub fn validity(
        mut self,
        not_before: Option<DateTime<Utc>>,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// RFC 3339 格式的 `notBefore`。
    pub fn not_before_rfc3339(&self) -> Option<String> {
        self.not_before
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// RFC 3339 格式的 `notAfter`。
    pub fn not_after_rfc3339(&self) -> Option<String> {
        self.not_after
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl Default for CertificateSpec {
    fn default() -> Self {
        Self::with_rsa_key(RsaKeyLength::default())
    }
}

/// RFC 5280 的撤銷原因代碼。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
}

impl RevocationReason {
    pub fn code(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
        }
    }
}

/// 從 CA 下載的 PEM 證書鏈拆分出的葉證書與其餘的中繼證書。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub certificate: String,
    /// 第二個區塊起的所有證書，以換行連接；只有葉證書時為 `None`。
    pub fullchain: Option<String>,
}

const PEM_BLOCK: &str = r"(?i)-----BEGIN\sCERTIFICATE-----[\s\S]+?-----END\sCERTIFICATE-----";

/// 依序取出內容中的所有 PEM 證書區塊。
pub fn pem_blocks(content: &str) -> Result<Vec<&str>> {
    let pattern = Regex::new(PEM_BLOCK)?;
    Ok(pattern.find_iter(content).map(|m| m.as_str()).collect())
}

/// 第一個區塊為葉證書，其餘區塊組成 fullchain。
pub fn split_bundle(content: &str) -> Result<CertificateBundle> {
    let blocks = pem_blocks(content)?;
    let (leaf, rest) = blocks.split_first().ok_or(CertificateError::NoCertificate)?;

    Ok(CertificateBundle {
        certificate: leaf.to_string(),
        fullchain: (!rest.is_empty()).then(|| rest.join("\n")),
    })
}

/// X.509 證書封裝結構，提供基本的證書解析與續約檢查功能
pub struct Certificate {
    pub cert: X509,
}

impl Certificate {
    /// 解析 PEM 內容中的第一張證書。
    pub fn from_pem(pem: &str) -> Result<Self> {
        let blocks = pem_blocks(pem)?;
        let first = blocks.first().ok_or(CertificateError::NoCertificate)?;
        let cert = X509::from_pem(first.as_bytes())?;
        Ok(Certificate { cert })
    }

    /// DER 編碼，撤銷請求使用。
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.cert.to_der()?)
    }

    /// 證書到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let seconds = i64::from(diff.days) * 86400 + i64::from(diff.secs);
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 剩餘有效時間少於 `threshold_days` 天（或已過期）時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let remaining = self.not_after()? - Utc::now();
        Ok(remaining < Duration::days(i64::from(threshold_days)))
    }
}
