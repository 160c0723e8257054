use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use openssl::sha::sha256;
use thiserror::Error;

/// 錯誤類型，用於描述 Base64 解碼過程中的各種錯誤情形。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// URL 安全格式的字串長度無法補齊為合法的 Base64 長度（餘數為 1）。
    #[error("Invalid length")]
    InvalidLength,

    /// 底層解碼器回報的錯誤，例如無效字符或填充錯誤。
    #[error("Invalid base64: {0}")]
    Invalid(#[from] base64::DecodeError),
}

/// 持有標準 Base64 編碼結果，並可轉換為 ACME 使用的 URL 安全格式。
///
/// # 示例
///
/// ```
/// # use letsacme::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.as_str(), "SGVsbG8sIFdvcmxkIQ==");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 將任意位元組資料以標準 Base64 編碼。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: STANDARD.encode(input),
        }
    }

    /// 根據已編碼的標準 Base64 字串建立實例，會先確認內容可以被解碼。
    ///
    /// # 錯誤
    ///
    /// 字串含有無效字符或填充錯誤時回傳 [`DecodeError::Invalid`]。
    pub fn from_encoded(encoded: &str) -> Result<Self, DecodeError> {
        STANDARD.decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
        })
    }

    /// 從 URL 安全、無填充的 Base64 字串建立實例。
    ///
    /// 先將 `-` 換回 `+`、`_` 換回 `/`，再以 `=` 補齊至 4 的倍數。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let mut encoded = url_encoded.replace('-', "+").replace('_', "/");
        match encoded.len() % 4 {
            0 => {}
            1 => return Err(DecodeError::InvalidLength),
            rem => encoded.push_str(&"=".repeat(4 - rem)),
        }
        Self::from_encoded(&encoded)
    }

    /// 解碼為原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(STANDARD.decode(&self.encoded)?)
    }

    /// 轉換為 URL 安全的 Base64 字串：`+`→`-`、`/`→`_`，並移除 `=` 填充。
    pub fn base64_url(&self) -> String {
        self.encoded
            .replace('+', "-")
            .replace('/', "_")
            .replace('=', "")
    }

    /// 返回內部存儲的標準 Base64 編碼字符串。
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

/// URL 安全、無填充的 Base64 編碼。
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// [`encode`] 的反向操作，接受無填充的 URL 安全字串。
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    Base64::from_url(input)?.decode()
}

/// 計算 SHA-256 摘要後再以 URL 安全格式編碼。
///
/// JWK thumbprint 與 DNS-01 的 TXT 記錄值都使用此函式；
/// DNS-01 必須對完整的 key authorization 字串做摘要。
pub fn thumbprint_digest<T: AsRef<[u8]>>(payload: T) -> String {
    encode(sha256(payload.as_ref()))
}
