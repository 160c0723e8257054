//! 與 CA 溝通的核心：取得目錄、維護 Replay-Nonce，並將每個 POST 包裝成 JWS。
//!
//! 每個已簽名請求都會消耗目前的 nonce。回應帶有 `Replay-Nonce` 時直接保存；
//! 沒有的話會立即對 `newNonce` 送出一次 `HEAD` 補充，確保下一個請求有可用的 nonce。

use std::{fmt, sync::Arc};

use log::{debug, trace, warn};
use parking_lot::Mutex;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    StatusCode,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::{
    directory::Directory,
    jws::{JwsError, JwsSigner},
    key_pair::KeyPair,
    protection::Protection,
    transport::{
        HttpClient, Request, Response, TransportError, JOSE_JSON, PEM_CERTIFICATE_CHAIN,
    },
};

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unable to fetch directory {url}: {status}")]
    Directory { url: String, status: StatusCode },
    #[error("No Replay-Nonce header found in response from {0}")]
    NoNonce(String),
}

type Result<T> = std::result::Result<T, ConnectorError>;

pub struct Connector {
    client: Arc<dyn HttpClient>,
    signer: JwsSigner,
    directory_url: String,
    directory: Directory,
    nonce: Mutex<Option<String>>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("directory_url", &self.directory_url)
            .field("directory", &self.directory)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// 收到 `badNonce` 時，以回應附帶的新 nonce 重送的次數上限。
    pub const BAD_NONCE_RETRIES: usize = 2;

    /// 取得目錄並預先取得第一個 nonce。
    pub fn new(directory_url: &str, client: Arc<dyn HttpClient>) -> Result<Self> {
        Self::with_signer(directory_url, client, JwsSigner::default())
    }

    pub fn with_signer(
        directory_url: &str,
        client: Arc<dyn HttpClient>,
        signer: JwsSigner,
    ) -> Result<Self> {
        let response = client.execute(Self::json_get(directory_url))?;
        debug!("GET {} -> {}", directory_url, response.status());
        if !response.is_success() {
            return Err(ConnectorError::Directory {
                url: directory_url.to_string(),
                status: response.status(),
            });
        }
        let directory: Directory = response.json()?;

        let connector = Self {
            client,
            signer,
            directory_url: directory_url.to_string(),
            directory,
            nonce: Mutex::new(None),
        };
        let nonce = connector.fetch_nonce()?;
        *connector.nonce.lock() = Some(nonce);

        Ok(connector)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    pub fn signer(&self) -> &JwsSigner {
        &self.signer
    }

    pub fn client(&self) -> &Arc<dyn HttpClient> {
        &self.client
    }

    /// 目前保存、尚未使用的 nonce。
    pub fn nonce(&self) -> Option<String> {
        self.nonce.lock().clone()
    }

    /// 未簽名的 GET。回應若附帶 nonce 也會順便保存。
    pub fn get(&self, url: &str) -> Result<Response> {
        let response = self.client.execute(Self::json_get(url))?;
        debug!("GET {} -> {}", url, response.status());
        if let Some(nonce) = response.replay_nonce() {
            trace!("stored nonce {} from GET", nonce);
            *self.nonce.lock() = Some(nonce.to_string());
        }
        Ok(response)
    }

    /// 以 `kid` 模式送出已簽名的請求。
    pub fn signed_kid_request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        account_url: &str,
        key: &KeyPair,
    ) -> Result<Response> {
        self.signed_request(url, payload, key, Protection::Kid(account_url))
    }

    /// 以 `jwk` 模式送出已簽名的請求（帳號 URL 尚未存在時）。
    pub fn signed_jwk_request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        key: &KeyPair,
    ) -> Result<Response> {
        self.signed_request(url, payload, key, Protection::Jwk)
    }

    /// POST-as-GET：空載荷的 `kid` 請求。
    pub fn post_as_get(&self, url: &str, account_url: &str, key: &KeyPair) -> Result<Response> {
        self.signed_kid_request(url, &json!({}), account_url, key)
    }

    /// 以 POST-as-GET 下載 PEM 證書鏈。
    pub fn download_certificate(
        &self,
        url: &str,
        account_url: &str,
        key: &KeyPair,
    ) -> Result<Response> {
        self.send_signed(
            url,
            &json!({}),
            key,
            Protection::Kid(account_url),
            PEM_CERTIFICATE_CHAIN,
        )
    }

    pub fn signed_request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        key: &KeyPair,
        protection: Protection<'_>,
    ) -> Result<Response> {
        self.send_signed(url, payload, key, protection, "application/json")
    }

    fn send_signed<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        key: &KeyPair,
        protection: Protection<'_>,
        accept: &'static str,
    ) -> Result<Response> {
        let mut retries = 0;
        loop {
            let nonce = self.take_nonce()?;
            trace!("signing request to {} with nonce {}", url, nonce);
            let jws = match self.signer.sign(protection, payload, url, Some(&nonce), key) {
                Ok(jws) => jws,
                Err(e) => {
                    // 尚未送出，nonce 仍然有效
                    *self.nonce.lock() = Some(nonce);
                    return Err(e.into());
                }
            };

            let request = Request::post(url, serde_json::to_vec(&jws)?)
                .header(CONTENT_TYPE, JOSE_JSON)
                .header(ACCEPT, accept);
            let response = self.client.execute(request)?;
            debug!("POST {} -> {}", url, response.status());

            self.update_nonce(&response);

            let bad_nonce = response.problem().is_some_and(|p| p.is_bad_nonce());
            if bad_nonce && retries < Self::BAD_NONCE_RETRIES {
                retries += 1;
                warn!("CA rejected nonce for {}, retrying ({})", url, retries);
                continue;
            }
            return Ok(response);
        }
    }

    /// 取出目前的 nonce；若沒有可用的則先向 `newNonce` 取得。
    fn take_nonce(&self) -> Result<String> {
        let stored = self.nonce.lock().take();
        match stored {
            Some(nonce) => Ok(nonce),
            None => self.fetch_nonce(),
        }
    }

    fn update_nonce(&self, response: &Response) {
        if let Some(nonce) = response.replay_nonce() {
            trace!("stored nonce {}", nonce);
            *self.nonce.lock() = Some(nonce.to_string());
            return;
        }

        warn!("response without Replay-Nonce, refreshing from {}", self.directory.new_nonce);
        match self.fetch_nonce() {
            Ok(nonce) => *self.nonce.lock() = Some(nonce),
            Err(e) => warn!("unable to refresh nonce: {}", e),
        }
    }

    fn fetch_nonce(&self) -> Result<String> {
        let url = &self.directory.new_nonce;
        let response = self.client.execute(Request::head(url))?;
        debug!("HEAD {} -> {}", url, response.status());
        let nonce = response
            .replay_nonce()
            .map(ToString::to_string)
            .ok_or_else(|| ConnectorError::NoNonce(url.to_string()))?;
        trace!("fetched nonce {}", nonce);
        Ok(nonce)
    }

    fn json_get(url: &str) -> Request {
        Request::get(url).header(ACCEPT, "application/json")
    }
}
