use std::fmt;

use openssl::{
    ecdsa::EcdsaSig,
    hash::MessageDigest,
    pkey::Id,
    sign,
};
use thiserror::Error;

use crate::key_pair::{EcCurve, KeyAlgorithm, KeyPair};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    SigningError(#[from] openssl::error::ErrorStack),
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Id),
}

/// 原始簽名能力：對位元組資料以私鑰簽名。
pub trait Signer: Send + Sync + fmt::Debug {
    /// JWS `alg` 標頭使用的名稱，由金鑰類型決定。
    fn alg(&self, key_pair: &KeyPair) -> Result<&'static str, SignatureError>;

    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// 以 OpenSSL 實作的 [`Signer`]。
///
/// - RSA：RS256（RSASSA-PKCS1-v1_5 搭配 SHA-256）。
/// - P-256 / P-384：ES256 / ES384，簽名為固定長度的 `r || s` 而非 DER。
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSslSigner;

impl OpenSslSigner {
    fn algorithm(key_pair: &KeyPair) -> Result<KeyAlgorithm, SignatureError> {
        key_pair
            .algorithm()
            .map_err(|_| SignatureError::UnsupportedAlgorithm(key_pair.pri_key.id()))
    }

    fn sign_ecdsa(
        curve: EcCurve,
        data: &[u8],
        key_pair: &KeyPair,
    ) -> Result<Vec<u8>, SignatureError> {
        let mut signer = sign::Signer::new(curve.digest(), &key_pair.pri_key)?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let signature = EcdsaSig::from_der(&der)?;
        let len = curve.coordinate_len() as i32;
        let mut raw = signature.r().to_vec_padded(len)?;
        raw.extend(signature.s().to_vec_padded(len)?);
        Ok(raw)
    }
}

impl Signer for OpenSslSigner {
    fn alg(&self, key_pair: &KeyPair) -> Result<&'static str, SignatureError> {
        match Self::algorithm(key_pair)? {
            KeyAlgorithm::Rsa(_) => Ok("RS256"),
            KeyAlgorithm::Ec(curve) => Ok(curve.jws_alg()),
        }
    }

    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        match Self::algorithm(key_pair)? {
            KeyAlgorithm::Rsa(_) => {
                let mut signer = sign::Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
                signer.update(data)?;
                Ok(signer.sign_to_vec()?)
            }
            KeyAlgorithm::Ec(curve) => Self::sign_ecdsa(curve, data, key_pair),
        }
    }
}
