use openssl::{
    bn::{BigNum, BigNumContext},
    pkey::Id,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    base64,
    key_pair::{KeyAlgorithm, KeyPair},
};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的金鑰類型，JWS 僅支援 RSA 與 P-256 / P-384。
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Id),
    /// 無法取得金鑰參數。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// 嵌入在 JWS 保護頭中的公鑰。
///
/// RSA 的欄位順序為 `kty`、`n`、`e`；EC 為 `crv`、`kty`、`x`、`y`，
/// 座標固定補零到曲線的位元組長度。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Jwk {
    Rsa {
        kty: String,
        n: String,
        e: String,
    },
    Ec {
        crv: String,
        kty: String,
        x: String,
        y: String,
    },
}

impl Jwk {
    /// 從金鑰對的公鑰取出 JWK 參數。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let id = key_pair.pub_key.id();
        match id {
            Id::RSA => Self::rsa(key_pair),
            Id::EC => Self::ec(key_pair),
            _ => Err(JwkError::UnsupportedAlgorithm(id)),
        }
    }

    fn rsa(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let rsa = key_pair.pub_key.rsa().map_err(conversion)?;
        Ok(Jwk::Rsa {
            kty: "RSA".to_string(),
            n: base64::encode(rsa.n().to_vec()),
            e: base64::encode(rsa.e().to_vec()),
        })
    }

    fn ec(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let curve = match key_pair.algorithm() {
            Ok(KeyAlgorithm::Ec(curve)) => curve,
            _ => return Err(JwkError::UnsupportedAlgorithm(Id::EC)),
        };

        let ec = key_pair.pub_key.ec_key().map_err(conversion)?;
        let mut ctx = BigNumContext::new().map_err(conversion)?;
        let mut x = BigNum::new().map_err(conversion)?;
        let mut y = BigNum::new().map_err(conversion)?;
        ec.public_key()
            .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
            .map_err(conversion)?;

        let len = curve.coordinate_len() as i32;
        Ok(Jwk::Ec {
            crv: curve.jwk_curve().to_string(),
            kty: "EC".to_string(),
            x: base64::encode(x.to_vec_padded(len).map_err(conversion)?),
            y: base64::encode(y.to_vec_padded(len).map_err(conversion)?),
        })
    }

    pub fn kty(&self) -> &str {
        match self {
            Jwk::Rsa { kty, .. } | Jwk::Ec { kty, .. } => kty.as_str(),
        }
    }

    /// RSA 模數；EC 金鑰回傳 `None`。
    pub fn n(&self) -> Option<&str> {
        match self {
            Jwk::Rsa { n, .. } => Some(n.as_str()),
            Jwk::Ec { .. } => None,
        }
    }

    pub fn e(&self) -> Option<&str> {
        match self {
            Jwk::Rsa { e, .. } => Some(e.as_str()),
            Jwk::Ec { .. } => None,
        }
    }

    /// 產生 thumbprint 用的正規 JSON（RFC 7638）：僅含必要成員並依字典序排列。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let members: Vec<(&str, &str)> = match self {
            Jwk::Rsa { kty, n, e } => {
                vec![("e", e.as_str()), ("kty", kty.as_str()), ("n", n.as_str())]
            }
            Jwk::Ec { crv, kty, x, y } => {
                vec![
                    ("crv", crv.as_str()),
                    ("kty", kty.as_str()),
                    ("x", x.as_str()),
                    ("y", y.as_str()),
                ]
            }
        };

        let map: Map<String, Value> = members
            .into_iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

fn conversion(e: openssl::error::ErrorStack) -> JwkError {
    JwkError::KeyConversionError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::{EcCurve, RsaKeyLength};

    #[test]
    fn test_header_member_order() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa(RsaKeyLength::Bit2048)).unwrap();
        let jwk = Jwk::new(&key).unwrap();
        let json = serde_json::to_string(&jwk).unwrap();
        assert!(json.starts_with("{\"kty\":\"RSA\",\"n\":\""));
        assert!(json.ends_with("\"e\":\"AQAB\"}"));
        assert_eq!(jwk.e(), Some("AQAB"));
    }

    #[test]
    fn test_thumbprint_json_is_canonical() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa(RsaKeyLength::Bit2048)).unwrap();
        let jwk = Jwk::new(&key).unwrap();
        let canonical = jwk.to_acme_json().unwrap();
        assert_eq!(
            canonical,
            format!("{{\"e\":\"AQAB\",\"kty\":\"RSA\",\"n\":\"{}\"}}", jwk.n().unwrap())
        );
    }

    #[test]
    fn test_ec_jwk_members() {
        let key = KeyPair::generate(KeyAlgorithm::Ec(EcCurve::Prime256v1)).unwrap();
        let jwk = Jwk::new(&key).unwrap();
        let value = serde_json::to_value(&jwk).unwrap();
        assert_eq!(
            value.as_object().unwrap().keys().collect::<Vec<_>>(),
            vec!["crv", "kty", "x", "y"]
        );
        assert_eq!(value["crv"], "P-256");
        assert_eq!(value["kty"], "EC");
        let x = base64::decode(value["x"].as_str().unwrap()).unwrap();
        let y = base64::decode(value["y"].as_str().unwrap()).unwrap();
        assert_eq!((x.len(), y.len()), (32, 32));
        assert_eq!(jwk.n(), None);

        let canonical = jwk.to_acme_json().unwrap();
        assert_eq!(canonical, serde_json::to_string(&value).unwrap());
        assert_eq!(serde_json::from_value::<Jwk>(value).unwrap(), jwk);
    }

    #[test]
    fn test_p384_coordinates_are_padded() {
        let key = KeyPair::generate(KeyAlgorithm::Ec(EcCurve::Secp384r1)).unwrap();
        let Jwk::Ec { crv, x, y, .. } = Jwk::new(&key).unwrap() else {
            panic!("expected EC JWK");
        };
        assert_eq!(crv, "P-384");
        assert_eq!(base64::decode(&x).unwrap().len(), 48);
        assert_eq!(base64::decode(&y).unwrap().len(), 48);
    }

    #[test]
    fn test_rsa_json_parses_as_rsa() {
        let jwk: Jwk = serde_json::from_str(r#"{"kty":"RSA","n":"AQAB","e":"AQAB"}"#).unwrap();
        assert_eq!(jwk.kty(), "RSA");
        assert!(matches!(jwk, Jwk::Rsa { .. }));
    }
}
