//! ACME 風格的 JSON Web Signature（flattened JSON 序列化）。
//!
//! 簽名輸入為 `protected + "." + payload`，三個欄位皆為 URL 安全、無填充的 Base64 字串。

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    base64,
    jwk::{Jwk, JwkError},
    key_pair::{KeyError, KeyPair},
    protection::{ProtectedHeader, Protection, ProtectionError},
    signature::{OpenSslSigner, SignatureError, Signer},
};

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Key pair error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// 一個已簽名的 JWS 物件。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

impl Jws {
    pub fn protected(&self) -> &str {
        &self.protected
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// 序列化為請求主體使用的 JSON 字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 將請求載荷編碼為 JWS 的 `payload` 欄位。
///
/// 空物件（以及 `null`）代表 POST-as-GET，必須編碼為空字串而不是 `"e30"`。
pub fn encode_payload<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    let is_empty = match &value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Ok(String::new());
    }

    // serde_json 不會跳脫 `/`，URL 可以原樣放入載荷。
    Ok(base64::encode(serde_json::to_string(&value)?))
}

/// 產生 `jwk` 與 `kid` 兩種模式的 JWS，並計算帳戶金鑰的 thumbprint。
#[derive(Clone)]
pub struct JwsSigner {
    signer: Arc<dyn Signer>,
}

impl fmt::Debug for JwsSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwsSigner")
            .field("signer", &self.signer)
            .finish()
    }
}

impl Default for JwsSigner {
    fn default() -> Self {
        Self::new(Arc::new(OpenSslSigner))
    }
}

impl JwsSigner {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    /// `jwk` 模式：保護頭嵌入帳戶公鑰。
    pub fn jws<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        url: &str,
        nonce: &str,
        key_pair: &KeyPair,
    ) -> Result<Jws> {
        self.sign(Protection::Jwk, payload, url, Some(nonce), key_pair)
    }

    /// `kid` 模式：保護頭帶入帳戶 URL。
    pub fn kid<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        kid: &str,
        url: &str,
        nonce: &str,
        key_pair: &KeyPair,
    ) -> Result<Jws> {
        self.sign(Protection::Kid(kid), payload, url, Some(nonce), key_pair)
    }

    /// 以任意保護方式簽名；`nonce` 為 `None` 時保護頭不含 nonce（金鑰輪替內層 JWS）。
    pub fn sign<T: Serialize + ?Sized>(
        &self,
        protection: Protection<'_>,
        payload: &T,
        url: &str,
        nonce: Option<&str>,
        key_pair: &KeyPair,
    ) -> Result<Jws> {
        let alg = self.signer.alg(key_pair)?;
        let protected = ProtectedHeader::new(alg, protection, key_pair, nonce, url)?.to_base64()?;
        let payload = encode_payload(payload)?;

        let signing_input = format!("{}.{}", protected, payload);
        let signature = self.signer.sign(signing_input.as_bytes(), key_pair)?;

        Ok(Jws {
            protected,
            payload,
            signature: base64::encode(signature),
        })
    }

    /// 帳戶金鑰的公開 JWK。
    pub fn jwk(&self, key_pair: &KeyPair) -> Result<Jwk> {
        Ok(Jwk::new(key_pair)?)
    }

    /// 帳戶金鑰的 thumbprint，即 key authorization 的後半段。
    pub fn thumbprint(&self, key_pair: &KeyPair) -> Result<String> {
        Ok(key_pair.thumbprint()?)
    }
}
