use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{authorization::Identifier, base64, jwk::Jwk};

/// 載荷驗證失敗時的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(&'static str),
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化、反序列化，並提供自定義的驗證邏輯。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// 將電子郵件轉換為 `mailto:` 聯絡資訊，已包含前綴者不重複補充。
pub fn contacts<S: AsRef<str>>(emails: &[S]) -> Vec<String> {
    emails
        .iter()
        .map(|email| {
            let email = email.as_ref();
            if email.starts_with("mailto:") {
                email.to_string()
            } else {
                format!("mailto:{}", email)
            }
        })
        .collect()
}

/// 表示建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountPayload {
    contact: Vec<String>,
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立新帳號載荷，電子郵件會自動補足 `mailto:` 前綴並同意服務條款。
    pub fn new<S: AsRef<str>>(emails: &[S]) -> Self {
        NewAccountPayload {
            contact: contacts(emails),
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.terms_of_service_agreed {
            return Err(PayloadError::Invalid("Terms of service must be agreed"));
        }
        Ok(())
    }
}

/// 以帳戶金鑰查詢既有帳號（`onlyReturnExisting`）。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingAccountPayload {
    only_return_existing: bool,
}

impl Default for ExistingAccountPayload {
    fn default() -> Self {
        Self {
            only_return_existing: true,
        }
    }
}

impl PayloadT for ExistingAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 更新帳號聯絡資訊。
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    contact: Vec<String>,
}

impl UpdateAccountPayload {
    pub fn new<S: AsRef<str>>(emails: &[S]) -> Self {
        Self {
            contact: contacts(emails),
        }
    }
}

impl PayloadT for UpdateAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.contact.is_empty() {
            return Err(PayloadError::Invalid("Contact information is required"));
        }
        Ok(())
    }
}

/// 停用帳號，送出後無法復原。
#[derive(Debug, Serialize, Deserialize)]
pub struct DeactivateAccountPayload {
    status: String,
}

impl Default for DeactivateAccountPayload {
    fn default() -> Self {
        Self {
            status: "deactivated".to_string(),
        }
    }
}

impl PayloadT for DeactivateAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 表示建立新訂單時所需的載荷資料。
///
/// 識別項依傳入順序送出，不會重新排序；未設定的 `notBefore`/`notAfter` 不會出現在 JSON 中。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
}

impl NewOrderPayload {
    /// 為每個主體建立一個類型為 `"dns"` 的識別項。
    pub fn new<S: AsRef<str>>(subjects: &[S]) -> Self {
        NewOrderPayload {
            identifiers: subjects
                .iter()
                .map(|subject| Identifier::dns(subject.as_ref()))
                .collect(),
            not_before: None,
            not_after: None,
        }
    }

    pub fn validity(mut self, not_before: Option<String>, not_after: Option<String>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }
}

impl PayloadT for NewOrderPayload {
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::Invalid("At least one identifier is required"));
        }
        for identifier in &self.identifiers {
            if identifier.type_ != Identifier::DNS {
                return Err(PayloadError::Invalid("Identifier type must be 'dns'"));
            }
            if identifier.value.is_empty() {
                return Err(PayloadError::Invalid("Identifier value cannot be empty"));
            }
        }
        Ok(())
    }
}

/// 觸發挑戰驗證時送出的 key authorization。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeValidationPayload {
    key_authorization: String,
}

impl ChallengeValidationPayload {
    pub fn new(key_authorization: &str) -> Self {
        Self {
            key_authorization: key_authorization.to_string(),
        }
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.key_authorization.contains('.') {
            return Err(PayloadError::Invalid("Key authorization must be token.thumbprint"));
        }
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料，`csr` 為 DER 的 URL 安全 Base64。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    csr: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr: base64::encode(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr.is_empty() {
            return Err(PayloadError::Invalid("CSR cannot be empty"));
        }
        Ok(())
    }
}

/// 金鑰輪替內層 JWS 的載荷：帳號 URL 與舊公鑰。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChangePayload {
    account: String,
    old_key: Jwk,
}

impl KeyChangePayload {
    pub fn new(account: &str, old_key: Jwk) -> Self {
        Self {
            account: account.to_string(),
            old_key,
        }
    }
}

impl PayloadT for KeyChangePayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.account.is_empty() {
            return Err(PayloadError::Invalid("Account URL is required"));
        }
        Ok(())
    }
}

/// 撤銷證書的載荷：DER 證書的 URL 安全 Base64 與 RFC 5280 撤銷原因代碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct RevocationPayload {
    certificate: String,
    reason: u8,
}

impl RevocationPayload {
    pub fn new(certificate_der: &[u8], reason: u8) -> Self {
        Self {
            certificate: base64::encode(certificate_der),
            reason,
        }
    }
}

impl PayloadT for RevocationPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.certificate.is_empty() {
            return Err(PayloadError::Invalid("Certificate cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_new_account_contacts() {
        let payload = NewAccountPayload::new(&["a@example.org", "mailto:b@example.org"]);
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "contact": ["mailto:a@example.org", "mailto:b@example.org"],
                "termsOfServiceAgreed": true
            })
        );
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_new_order_keeps_subject_order() {
        let payload = NewOrderPayload::new(&["www.example.org", "example.org"]);
        assert_eq!(
            payload.to_json_string().unwrap(),
            r#"{"identifiers":[{"type":"dns","value":"www.example.org"},{"type":"dns","value":"example.org"}]}"#
        );

        let dated = NewOrderPayload::new(&["example.org"]).validity(
            Some("2026-01-01T00:00:00+00:00".to_string()),
            None,
        );
        let value = serde_json::to_value(&dated).unwrap();
        assert_eq!(value["notBefore"], "2026-01-01T00:00:00+00:00");
        assert!(value.get("notAfter").is_none());
    }

    #[test]
    fn test_new_order_validation() {
        let empty: [&str; 0] = [];
        assert_eq!(
            NewOrderPayload::new(&empty).validate(),
            Err(PayloadError::Invalid("At least one identifier is required"))
        );
        assert!(NewOrderPayload::new(&[""]).validate().is_err());
    }

    #[test]
    fn test_small_payloads() {
        assert_eq!(
            serde_json::to_value(ExistingAccountPayload::default()).unwrap(),
            json!({"onlyReturnExisting": true})
        );
        assert_eq!(
            serde_json::to_value(DeactivateAccountPayload::default()).unwrap(),
            json!({"status": "deactivated"})
        );
        assert_eq!(
            serde_json::to_value(RevocationPayload::new(&[0xfb, 0xff], 4)).unwrap(),
            json!({"certificate": "-_8", "reason": 4})
        );
        assert!(ChallengeValidationPayload::new("token").validate().is_err());
    }
}
