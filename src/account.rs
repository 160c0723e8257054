//! ACME 帳戶管理：註冊、以金鑰查詢既有帳戶、更新聯絡方式、停用與金鑰輪替。
//!
//! 帳戶金鑰固定存放在 `<keys_path>/private.pem` 與 `<keys_path>/public.pem`，
//! 帳戶本身不做任何本地快取，每次都向 CA 查詢。

use std::sync::Arc;

use log::{info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    certificate::Bundle,
    connector::{Connector, ConnectorError},
    jwk::Jwk,
    jws::JwsError,
    key_pair::{KeyAlgorithm, KeyError, KeyPair, KeyProvider, RsaKeyLength},
    payload::{
        DeactivateAccountPayload, ExistingAccountPayload, KeyChangePayload, NewAccountPayload,
        PayloadError, PayloadT, UpdateAccountPayload,
    },
    problem::Problem,
    protection::Protection,
    status::{Stateful, Status},
    storage::{join_key, Storage, StorageError},
    transport::Response,
};

/// 錯誤類型，用於描述在處理 ACME 帳戶相關操作時可能發生的各類錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("Account request rejected with {status}: {}", .problem.as_ref().map(ToString::to_string).unwrap_or_default())]
    Rejected {
        status: StatusCode,
        problem: Option<Problem>,
    },
    #[error("Location header not found in account response")]
    MissingLocation,
    #[error("Account key rollover failed: {0}")]
    KeyRollover(String),
    #[error("Directory does not provide {0}")]
    Unsupported(&'static str),
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AccountError`].
pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResource {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    key: Option<Jwk>,
    #[serde(default)]
    contact: Vec<String>,
    status: Status,
    #[serde(default)]
    initial_ip: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    orders: Option<String>,
}

/// 表示 CA 上的 ACME 帳戶。
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Option<u64>,
    /// CA 核發的帳戶 URL，所有 `kid` 模式請求都以此識別帳戶。
    pub url: String,
    /// CA 記錄的帳戶公鑰。
    pub key: Option<Jwk>,
    pub contact: Vec<String>,
    pub status: Status,
    pub initial_ip: Option<String>,
    pub created_at: Option<String>,
    pub orders: Option<String>,
    pub private_key_path: String,
    /// 用於簽署請求的帳戶金鑰。
    pub key_pair: Arc<KeyPair>,
}

impl Stateful for Account {
    fn status(&self) -> Status {
        self.status
    }
}

#[derive(Debug)]
pub struct AccountService {
    connector: Arc<Connector>,
    storage: Arc<dyn Storage>,
    key_provider: Arc<dyn KeyProvider>,
    keys_path: String,
    key_length: RsaKeyLength,
}

impl AccountService {
    /// 金鑰輪替時新金鑰的暫存副檔名。
    pub const PENDING_SUFFIX: &'static str = ".new";

    /// `keys_path` 必須是已存在的目錄，否則回傳 `StorageError::Environment`。
    pub fn new(
        connector: Arc<Connector>,
        storage: Arc<dyn Storage>,
        key_provider: Arc<dyn KeyProvider>,
        keys_path: &str,
    ) -> Result<Self> {
        storage.require_dir(keys_path)?;
        Ok(Self {
            connector,
            storage,
            key_provider,
            keys_path: keys_path.trim_end_matches('/').to_string(),
            key_length: RsaKeyLength::default(),
        })
    }

    /// 設置新帳戶金鑰的 RSA 長度。
    pub fn key_length(mut self, key_length: RsaKeyLength) -> Self {
        self.key_length = key_length;
        self
    }

    pub fn private_key_path(&self) -> String {
        join_key(&self.keys_path, Bundle::PRIVATE_KEY)
    }

    pub fn public_key_path(&self) -> String {
        join_key(&self.keys_path, Bundle::PUBLIC_KEY)
    }

    /// 產生新的帳戶金鑰（覆寫既有檔案）並向 CA 註冊，同意服務條款。
    pub fn create<S: AsRef<str>>(&self, emails: &[S]) -> Result<Account> {
        let key_pair = self.key_provider.generate_and_store(
            &*self.storage,
            KeyAlgorithm::Rsa(self.key_length),
            &self.private_key_path(),
            &self.public_key_path(),
        )?;

        let payload = NewAccountPayload::new(emails);
        payload.validate()?;
        let response = self.connector.signed_jwk_request(
            &self.connector.directory().new_account,
            &payload,
            &key_pair,
        )?;

        let account = self.account_from_response(&response, Arc::new(key_pair), None)?;
        info!("account created: {}", account.url);
        Ok(account)
    }

    /// 以現有金鑰向 CA 查詢帳戶；金鑰檔案不存在時不會送出任何請求。
    pub fn get(&self) -> Result<Account> {
        self.storage.require_file(&self.private_key_path())?;
        self.storage.require_file(&self.public_key_path())?;
        self.lookup()
    }

    /// 以新的電子郵件清單取代帳戶聯絡方式。
    pub fn update<S: AsRef<str>>(&self, emails: &[S]) -> Result<Account> {
        let account = self.lookup()?;
        let payload = UpdateAccountPayload::new(emails);
        payload.validate()?;

        let response =
            self.connector
                .signed_kid_request(&account.url, &payload, &account.url, &account.key_pair)?;
        self.account_from_response(&response, account.key_pair.clone(), Some(&account.url))
    }

    /// 停用帳戶。此狀態為終態，停用後 CA 不再接受該帳戶的請求。
    pub fn deactivate(&self) -> Result<Account> {
        let account = self.lookup()?;
        let payload = DeactivateAccountPayload::default();
        payload.validate()?;

        let response =
            self.connector
                .signed_kid_request(&account.url, &payload, &account.url, &account.key_pair)?;
        let account =
            self.account_from_response(&response, account.key_pair.clone(), Some(&account.url))?;
        info!("account deactivated: {}", account.url);
        Ok(account)
    }

    /// 以新產生的金鑰取代帳戶金鑰，帳戶 URL 不變。
    ///
    /// 新金鑰先寫入 `*.pem.new`；CA 回應 `200 OK` 後才取代原本的檔案，
    /// 失敗時刪除暫存檔並保留舊金鑰。
    pub fn key_rollover(&self) -> Result<Account> {
        let account = self.lookup()?;
        let key_change = self
            .connector
            .directory()
            .key_change
            .clone()
            .ok_or(AccountError::Unsupported("keyChange"))?;

        let pending_private = self.pending_path(&self.private_key_path());
        let pending_public = self.pending_path(&self.public_key_path());
        let new_key = self.key_provider.generate_and_store(
            &*self.storage,
            KeyAlgorithm::Rsa(self.key_length),
            &pending_private,
            &pending_public,
        )?;

        let result = self.send_key_change(&account, &key_change, &new_key);
        match result {
            Ok(response) if response.is_status_ok() => {}
            Ok(response) => {
                self.discard_pending_keys(&pending_private, &pending_public);
                let reason = match response.problem() {
                    Some(problem) => problem.to_string(),
                    None => response.status().to_string(),
                };
                return Err(AccountError::KeyRollover(reason));
            }
            Err(e) => {
                self.discard_pending_keys(&pending_private, &pending_public);
                return Err(e);
            }
        }

        self.storage.rename(&pending_private, &self.private_key_path())?;
        self.storage.rename(&pending_public, &self.public_key_path())?;
        info!("account key rolled over: {}", account.url);

        Ok(Account {
            key: Some(self.connector.signer().jwk(&new_key)?),
            key_pair: Arc::new(new_key),
            ..account
        })
    }

    /// 內層 JWS 以新金鑰、`jwk` 模式簽署且不帶 nonce；外層以舊金鑰、`kid` 模式送出。
    fn send_key_change(
        &self,
        account: &Account,
        key_change: &str,
        new_key: &KeyPair,
    ) -> Result<Response> {
        let signer = self.connector.signer();
        let payload = KeyChangePayload::new(&account.url, signer.jwk(&account.key_pair)?);
        payload.validate()?;

        let inner = signer.sign(Protection::Jwk, &payload, key_change, None, new_key)?;
        Ok(self
            .connector
            .signed_kid_request(key_change, &inner, &account.url, &account.key_pair)?)
    }

    fn discard_pending_keys(&self, private_key: &str, public_key: &str) {
        for path in [private_key, public_key] {
            if let Err(e) = self.storage.remove(path) {
                warn!("unable to remove {}: {}", path, e);
            }
        }
    }

    fn pending_path(&self, path: &str) -> String {
        format!("{}{}", path, Self::PENDING_SUFFIX)
    }

    /// 以 `onlyReturnExisting` 查詢與目前金鑰對應的帳戶。
    fn lookup(&self) -> Result<Account> {
        let key_pair = KeyPair::from_file(&*self.storage, &self.private_key_path())?;
        let payload = ExistingAccountPayload::default();
        payload.validate()?;

        let response = self.connector.signed_jwk_request(
            &self.connector.directory().new_account,
            &payload,
            &key_pair,
        )?;
        self.account_from_response(&response, Arc::new(key_pair), None)
    }

    /// 更新類請求的回應不帶 `Location`，此時沿用 `known_url`。
    fn account_from_response(
        &self,
        response: &Response,
        key_pair: Arc<KeyPair>,
        known_url: Option<&str>,
    ) -> Result<Account> {
        if !response.is_success() {
            return Err(AccountError::Rejected {
                status: response.status(),
                problem: response.problem(),
            });
        }

        let url = response
            .location()
            .or(known_url)
            .ok_or(AccountError::MissingLocation)?
            .to_string();
        let resource: AccountResource = response.json()?;

        Ok(Account {
            id: resource.id,
            url,
            key: resource.key,
            contact: resource.contact,
            status: resource.status,
            initial_ip: resource.initial_ip,
            created_at: resource.created_at,
            orders: resource.orders,
            private_key_path: self.private_key_path(),
            key_pair,
        })
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        key_pair::OpenSslKeyProvider,
        storage::MemStorage,
        test_support::{self, ACCOUNT_URL, KEY_CHANGE, NEW_ACCOUNT},
        transport::MockTransport,
    };

    const KEYS: &str = "/keys";

    fn account_body(status: &str) -> Value {
        json!({
            "key": {"kty": "RSA", "n": "abc", "e": "AQAB"},
            "contact": ["mailto:admin@example.org"],
            "initialIp": "127.0.0.1",
            "createdAt": "2026-01-01T00:00:00Z",
            "status": status
        })
    }

    fn created() -> Response {
        test_support::ok_json(&account_body("valid"))
            .with_header("Location", ACCOUNT_URL)
    }

    fn setup() -> (Arc<MockTransport>, Arc<MemStorage>, AccountService) {
        let (mock, connector) = test_support::mock_connector();
        let storage = Arc::new(MemStorage::new());
        storage.create_dir_all(KEYS).unwrap();
        let service =
            AccountService::new(connector, storage.clone(), Arc::new(OpenSslKeyProvider), KEYS)
                .unwrap();
        (mock, storage, service)
    }

    fn store_account_key(storage: &MemStorage) {
        let key = test_support::account_key();
        storage
            .write_file("/keys/private.pem", &key.private_key_pem().unwrap())
            .unwrap();
        storage
            .write_file("/keys/public.pem", &key.public_key_pem().unwrap())
            .unwrap();
    }

    #[test]
    fn test_missing_keys_dir_is_environment_error() {
        let (_, connector) = test_support::mock_connector();
        let result = AccountService::new(
            connector,
            Arc::new(MemStorage::new()),
            Arc::new(OpenSslKeyProvider),
            "/nope",
        );
        assert!(matches!(
            result,
            Err(AccountError::Storage(StorageError::Environment(_)))
        ));
    }

    #[test]
    fn test_create_registers_with_jwk() -> Result<()> {
        let (mock, storage, service) = setup();
        mock.on(Method::POST, NEW_ACCOUNT, created());

        let account = service.create(&["admin@example.org"])?;
        assert_eq!(account.url, ACCOUNT_URL);
        assert!(account.is_valid());
        assert_eq!(account.contact, vec!["mailto:admin@example.org"]);
        assert_eq!(account.initial_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(account.private_key_path, "/keys/private.pem");
        assert!(storage.exists("/keys/private.pem")?);
        assert!(storage.exists("/keys/public.pem")?);

        let (protected, payload) = test_support::decode_jws(&mock.requests().pop().unwrap());
        assert!(protected.get("kid").is_none());
        assert_eq!(protected["jwk"]["kty"], "RSA");
        assert_eq!(protected["url"], NEW_ACCOUNT);
        assert_eq!(
            payload,
            json!({"contact": ["mailto:admin@example.org"], "termsOfServiceAgreed": true})
        );
        Ok(())
    }

    #[test]
    fn test_get_requires_key_files() {
        let (mock, _, service) = setup();
        let result = service.get();
        assert!(matches!(
            result,
            Err(AccountError::Storage(StorageError::Environment(_)))
        ));
        assert_eq!(mock.count(&Method::POST, NEW_ACCOUNT), 0);
    }

    #[test]
    fn test_get_looks_up_existing_account() -> Result<()> {
        let (mock, storage, service) = setup();
        store_account_key(&storage);
        mock.on(Method::POST, NEW_ACCOUNT, created());

        let account = service.get()?;
        assert_eq!(account.url, ACCOUNT_URL);

        let (_, payload) = test_support::decode_jws(&mock.requests().pop().unwrap());
        assert_eq!(payload, json!({"onlyReturnExisting": true}));
        Ok(())
    }

    #[test]
    fn test_unknown_account_is_rejected() {
        let (mock, storage, service) = setup();
        store_account_key(&storage);
        mock.on(
            Method::POST,
            NEW_ACCOUNT,
            Response::new(StatusCode::BAD_REQUEST)
                .with_header("Replay-Nonce", "n")
                .with_body(r#"{"type":"urn:ietf:params:acme:error:accountDoesNotExist"}"#),
        );

        match service.get() {
            Err(AccountError::Rejected { status, problem }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(problem.unwrap().kind(), "accountDoesNotExist");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_update_and_deactivate_use_kid() -> Result<()> {
        let (mock, storage, service) = setup();
        store_account_key(&storage);
        mock.on(Method::POST, NEW_ACCOUNT, created());
        mock.on(
            Method::POST,
            ACCOUNT_URL,
            test_support::ok_json(&json!({
                "contact": ["mailto:new@example.org"],
                "status": "valid"
            })),
        )
        .on(
            Method::POST,
            ACCOUNT_URL,
            test_support::ok_json(&json!({"status": "deactivated"})),
        );

        let updated = service.update(&["new@example.org"])?;
        assert_eq!(updated.url, ACCOUNT_URL);
        assert_eq!(updated.contact, vec!["mailto:new@example.org"]);

        let deactivated = service.deactivate()?;
        assert!(deactivated.is_deactivated());

        let to_account: Vec<_> = mock
            .requests()
            .into_iter()
            .filter(|r| r.url == ACCOUNT_URL)
            .map(|r| test_support::decode_jws(&r))
            .collect();
        assert_eq!(to_account[0].0["kid"], ACCOUNT_URL);
        assert_eq!(to_account[0].1, json!({"contact": ["mailto:new@example.org"]}));
        assert_eq!(to_account[1].1, json!({"status": "deactivated"}));
        Ok(())
    }

    #[test]
    fn test_key_rollover_replaces_key_files() -> Result<()> {
        let (mock, storage, service) = setup();
        store_account_key(&storage);
        let old_key = test_support::account_key();
        mock.on(Method::POST, NEW_ACCOUNT, created())
            .on(Method::POST, KEY_CHANGE, test_support::ok_json(&json!({})));

        let account = service.key_rollover()?;
        assert_eq!(account.url, ACCOUNT_URL);
        assert_ne!(
            account.key_pair.private_key_pem()?,
            old_key.private_key_pem()?
        );
        assert_eq!(
            storage.read_file("/keys/private.pem")?,
            account.key_pair.private_key_pem()?
        );
        assert!(!storage.exists("/keys/private.pem.new")?);
        assert!(!storage.exists("/keys/public.pem.new")?);

        let (outer, inner) = test_support::decode_jws(&mock.requests().pop().unwrap());
        assert_eq!(outer["kid"], ACCOUNT_URL);
        let inner_protected: Value = serde_json::from_slice(
            &crate::base64::decode(inner["protected"].as_str().unwrap()).unwrap(),
        )
        .unwrap();
        assert!(inner_protected.get("nonce").is_none());
        assert_eq!(inner_protected["url"], KEY_CHANGE);
        let new_jwk = Jwk::new(&account.key_pair).unwrap();
        assert_eq!(inner_protected["jwk"]["n"], new_jwk.n().unwrap());
        let inner_payload: Value = serde_json::from_slice(
            &crate::base64::decode(inner["payload"].as_str().unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(inner_payload["account"], ACCOUNT_URL);
        let old_jwk = Jwk::new(&old_key).unwrap();
        assert_eq!(inner_payload["oldKey"]["n"], old_jwk.n().unwrap());
        Ok(())
    }

    #[test]
    fn test_failed_key_rollover_keeps_old_key() -> Result<()> {
        let (mock, storage, service) = setup();
        store_account_key(&storage);
        let before = storage.read_file("/keys/private.pem")?;
        mock.on(Method::POST, NEW_ACCOUNT, created()).on(
            Method::POST,
            KEY_CHANGE,
            Response::new(StatusCode::CONFLICT)
                .with_header("Replay-Nonce", "n")
                .with_body(r#"{"type":"urn:ietf:params:acme:error:malformed","detail":"key in use"}"#),
        );

        assert!(matches!(
            service.key_rollover(),
            Err(AccountError::KeyRollover(_))
        ));
        assert_eq!(storage.read_file("/keys/private.pem")?, before);
        assert!(!storage.exists("/keys/private.pem.new")?);
        assert!(!storage.exists("/keys/public.pem.new")?);
        Ok(())
    }
}
