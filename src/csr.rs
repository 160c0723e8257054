use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器：設定通用名稱（CN）與主體替代名稱（SAN），並以 SHA-256 簽署。
///
/// ```no_run
/// # use letsacme::{csr::Csr, key_pair::{KeyAlgorithm, KeyPair}};
/// let key_pair = KeyPair::generate(KeyAlgorithm::default()).unwrap();
/// let csr = Csr::new("example.com")
///     .set_san("example.com")
///     .set_san("www.example.com")
///     .build(&key_pair)
///     .unwrap();
/// ```
pub struct Csr {
    common_name: String,
    san_entries: Vec<String>,
}

impl Csr {
    pub fn new(common_name: &str) -> Self {
        Csr {
            common_name: common_name.to_string(),
            san_entries: Vec::new(),
        }
    }

    /// 新增一個 DNS 主體替代名稱。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 根據目前的 CN 與 SAN 建立並簽署 CSR。
    ///
    /// 至少需要一個 SAN，否則回傳 `CsrError::NoSanEntries`。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", &self.common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}
