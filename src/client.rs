//! 對外的入口：以 [`ClientBuilder`] 設定目錄、存儲與輪詢策略，建立共用同一個
//! [`Connector`] 的帳戶與訂單服務。

use std::{sync::Arc, time::Duration};

use log::debug;
use thiserror::Error;

use crate::{
    account::{AccountError, AccountService},
    authorization::AuthorizationService,
    connector::{Connector, ConnectorError},
    dns::{DnsChecker, GooglePublicDns},
    key_pair::{KeyProvider, OpenSslKeyProvider, RsaKeyLength},
    order::{OrderError, OrderService},
    poll::PollPolicy,
    storage::{FileStorage, Storage, StorageError},
    transport::{HttpClient, ReqwestClient, TransportError},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Order error: {0}")]
    Order(#[from] OrderError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// ACME 客戶端，持有帳戶與訂單服務。
#[derive(Debug)]
pub struct Client {
    connector: Arc<Connector>,
    account: AccountService,
    order: OrderService,
}

impl Client {
    /// 預設的 ACME 目錄 URL。
    pub const DEFAULT_DIR_URL: &'static str = "https://acme-v02.api.letsencrypt.org/directory";
    /// Let's Encrypt 測試環境的目錄 URL。
    pub const STAGING_DIR_URL: &'static str =
        "https://acme-staging-v02.api.letsencrypt.org/directory";

    pub fn builder(account_keys_path: &str, certificates_path: &str) -> ClientBuilder {
        ClientBuilder::new(account_keys_path, certificates_path)
    }

    pub fn account(&self) -> &AccountService {
        &self.account
    }

    pub fn order(&self) -> &OrderService {
        &self.order
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }
}

/// 用於構建 [`Client`] 實例的構造器，採用 builder 模式。
///
/// 預設值包括：
/// - ACME 目錄 URL：`https://acme-v02.api.letsencrypt.org/directory`
/// - 授權輪詢：每秒一次，最多 120 秒；訂單輪詢：每 5 秒一次，最多 300 秒
/// - HTTP 逾時：30 秒
/// - 帳戶金鑰：RSA 2048
/// - 存儲：以 `/` 為根的 [`FileStorage`]
#[derive(Debug)]
pub struct ClientBuilder {
    account_keys_path: String,
    certificates_path: String,
    directory_url: String,
    http_client: Option<Arc<dyn HttpClient>>,
    storage: Arc<dyn Storage>,
    key_provider: Arc<dyn KeyProvider>,
    dns_checker: Option<Box<dyn DnsChecker>>,
    authorization_poll: PollPolicy,
    order_poll: PollPolicy,
    timeout: Duration,
    account_key_length: RsaKeyLength,
}

impl ClientBuilder {
    /// # Arguments
    ///
    /// * `account_keys_path` - 帳戶金鑰所在目錄，必須已存在。
    /// * `certificates_path` - 各證書目錄的上層目錄，必須已存在。
    pub fn new(account_keys_path: &str, certificates_path: &str) -> Self {
        ClientBuilder {
            account_keys_path: account_keys_path.to_string(),
            certificates_path: certificates_path.to_string(),
            directory_url: Client::DEFAULT_DIR_URL.to_string(),
            http_client: None,
            storage: Arc::new(FileStorage::default()),
            key_provider: Arc::new(OpenSslKeyProvider),
            dns_checker: None,
            authorization_poll: PollPolicy::AUTHORIZATION,
            order_poll: PollPolicy::ORDER,
            timeout: ReqwestClient::DEFAULT_TIMEOUT,
            account_key_length: RsaKeyLength::default(),
        }
    }

    /// 切換至 Let's Encrypt 測試環境，或切回正式環境。
    pub fn staging(mut self, staging: bool) -> Self {
        self.directory_url = if staging {
            Client::STAGING_DIR_URL
        } else {
            Client::DEFAULT_DIR_URL
        }
        .to_string();
        self
    }

    pub fn directory_url(mut self, directory_url: &str) -> Self {
        self.directory_url = directory_url.to_string();
        self
    }

    pub fn http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn key_provider(mut self, key_provider: Arc<dyn KeyProvider>) -> Self {
        self.key_provider = key_provider;
        self
    }

    /// 預設使用 [`GooglePublicDns`]，並共用同一個 HTTP 客戶端。
    pub fn dns_checker(mut self, dns_checker: Box<dyn DnsChecker>) -> Self {
        self.dns_checker = Some(dns_checker);
        self
    }

    pub fn authorization_poll(mut self, poll: PollPolicy) -> Self {
        self.authorization_poll = poll;
        self
    }

    pub fn order_poll(mut self, poll: PollPolicy) -> Self {
        self.order_poll = poll;
        self
    }

    /// 預設 HTTP 客戶端的逾時；自訂 `http_client` 時不使用。
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn account_key_length(mut self, key_length: RsaKeyLength) -> Self {
        self.account_key_length = key_length;
        self
    }

    /// 先確認本地目錄存在，再取得 ACME 目錄與第一個 nonce。
    pub fn build(self) -> Result<Client> {
        self.storage.require_dir(&self.account_keys_path)?;
        self.storage.require_dir(&self.certificates_path)?;

        let http_client: Arc<dyn HttpClient> = match self.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new(self.timeout)?),
        };
        debug!("using ACME directory {}", self.directory_url);
        let connector = Arc::new(Connector::new(&self.directory_url, http_client.clone())?);

        let dns_checker: Box<dyn DnsChecker> = match self.dns_checker {
            Some(checker) => checker,
            None => Box::new(GooglePublicDns::new(http_client)),
        };
        let authorization_service =
            AuthorizationService::new(connector.clone(), dns_checker, self.authorization_poll);

        let account = AccountService::new(
            connector.clone(),
            self.storage.clone(),
            self.key_provider.clone(),
            &self.account_keys_path,
        )?
        .key_length(self.account_key_length);
        let order = OrderService::new(
            connector.clone(),
            authorization_service,
            self.storage,
            self.key_provider,
            &self.certificates_path,
        )?
        .poll_policy(self.order_poll);

        Ok(Client {
            connector,
            account,
            order,
        })
    }
}
