//! 證書訂單：建立、讀回、挑戰委派、最終確認、下載證書與撤銷。
//!
//! 每個證書對應 `<files_path>/<basename>/` 目錄，內含證書金鑰、`order` 指標檔
//! （僅保存訂單 URL）以及下載後的 `certificate.crt` 與 `fullchain.crt`。

use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    account::Account,
    authorization::{
        Authorization, AuthorizationError, AuthorizationService, DnsChallengeRecord,
        HttpChallengeFile, Identifier, ValidationOutcome,
    },
    certificate::{
        split_bundle, Bundle, Certificate, CertificateBundle, CertificateError, CertificateSpec,
        RevocationReason,
    },
    connector::{Connector, ConnectorError},
    jws::JwsError,
    key_pair::{KeyError, KeyPair, KeyProvider},
    payload::{FinalizeOrderPayload, NewOrderPayload, PayloadError, PayloadT, RevocationPayload},
    poll::{PollError, PollPolicy},
    problem::Problem,
    status::{Stateful, Status},
    storage::{join_key, Storage, StorageError},
    transport::Response,
};

/// 定義所有訂單操作可能產生的錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    /// 已保存的訂單無效、識別項不符，或訂單狀態不允許目前的操作。
    #[error("Order state error: {0}")]
    State(String),
    #[error("Unable to create order: {0}")]
    Creation(ConnectorError),
    #[error("Order request rejected with {status}: {}", .problem.as_ref().map(ToString::to_string).unwrap_or_default())]
    Rejected {
        status: StatusCode,
        problem: Option<Problem>,
    },
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Key pair error: {0}")]
    KeyPair(#[from] KeyError),
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Polling error: {0}")]
    Poll(#[from] PollError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Location header not found in order response")]
    MissingLocation,
}

type Result<T> = std::result::Result<T, OrderError>;

/// CA 上的一筆證書訂單。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// 伺服器回傳的訂單 URL（不在回應主體中）
    #[serde(skip)]
    pub url: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifiers: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    /// 授權 URL 列表
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// 依 `authorizations` 順序取得的授權內容。
    #[serde(skip)]
    pub authorization_list: Vec<Authorization>,
}

impl Order {
    pub fn from_response(response: &Response, url: &str) -> serde_json::Result<Self> {
        let mut order: Order = response.json()?;
        order.url = url.to_string();
        Ok(order)
    }

    /// 識別項的值，保留 CA 回傳的順序。
    pub fn identifier_values(&self) -> Vec<String> {
        self.identifiers.iter().map(|i| i.value.clone()).collect()
    }

    /// 排序後逐一比較；重複的值也必須一致。
    pub fn is_identifiers_equal<S: AsRef<str>>(&self, subjects: &[S]) -> bool {
        let mut expected: Vec<&str> = subjects.iter().map(AsRef::as_ref).collect();
        let mut actual: Vec<&str> = self.identifiers.iter().map(|i| i.value.as_str()).collect();
        expected.sort_unstable();
        actual.sort_unstable();
        expected == actual
    }

    pub fn pending_authorizations(&self) -> Vec<Authorization> {
        self.authorization_list
            .iter()
            .filter(|a| a.is_pending())
            .cloned()
            .collect()
    }

    /// 所有授權都已取得且皆為 `valid`。
    pub fn all_authorizations_valid(&self) -> bool {
        !self.authorization_list.is_empty()
            && self.authorization_list.len() == self.authorizations.len()
            && self.authorization_list.iter().all(|a| a.is_valid())
    }
}

impl Stateful for Order {
    fn status(&self) -> Status {
        self.status
    }
}

#[derive(Debug)]
pub struct OrderService {
    connector: Arc<Connector>,
    authorization_service: AuthorizationService,
    storage: Arc<dyn Storage>,
    key_provider: Arc<dyn KeyProvider>,
    files_path: String,
    poll: PollPolicy,
}

impl OrderService {
    /// `files_path` 必須是已存在的目錄，否則回傳 `StorageError::Environment`。
    pub fn new(
        connector: Arc<Connector>,
        authorization_service: AuthorizationService,
        storage: Arc<dyn Storage>,
        key_provider: Arc<dyn KeyProvider>,
        files_path: &str,
    ) -> Result<Self> {
        storage.require_dir(files_path)?;
        Ok(Self {
            connector,
            authorization_service,
            storage,
            key_provider,
            files_path: files_path.trim_end_matches('/').to_string(),
            poll: PollPolicy::ORDER,
        })
    }

    pub fn poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn authorization_service(&self) -> &AuthorizationService {
        &self.authorization_service
    }

    /// 建立新訂單，保存訂單 URL 並產生證書金鑰。
    ///
    /// 授權取得之前的任何失敗都會先清除該證書目錄中的檔案。
    pub fn create<S: AsRef<str>>(
        &self,
        account: &Account,
        basename: &str,
        subjects: &[S],
        spec: &CertificateSpec,
    ) -> Result<Order> {
        self.storage.create_dir_all(&self.certificate_base_path(basename))?;

        let payload = NewOrderPayload::new(subjects)
            .validity(spec.not_before_rfc3339(), spec.not_after_rfc3339());
        payload.validate()?;

        let response = match self.connector.signed_kid_request(
            &self.connector.directory().new_order,
            &payload,
            &account.url,
            &account.key_pair,
        ) {
            Ok(response) => response,
            Err(e) => {
                self.discard_files(basename);
                return Err(OrderError::Creation(e));
            }
        };
        if !response.is_success() {
            self.discard_files(basename);
            return Err(OrderError::Rejected {
                status: response.status(),
                problem: response.problem(),
            });
        }

        let order = match self.store_new_order(basename, spec, &response) {
            Ok(order) => order,
            Err(e) => {
                self.discard_files(basename);
                return Err(e);
            }
        };
        info!("order created: {} ({})", order.url, order.status);
        self.hydrate(account, order)
    }

    /// 保存新訂單的 URL 並產生證書金鑰。
    fn store_new_order(
        &self,
        basename: &str,
        spec: &CertificateSpec,
        response: &Response,
    ) -> Result<Order> {
        let url = response
            .location()
            .ok_or(OrderError::MissingLocation)?
            .to_string();
        self.storage
            .write_file(&self.order_file_path(basename), url.as_bytes())?;

        debug!("generating {} certificate key for {}", spec.key, basename);
        self.key_provider.generate_and_store(
            &*self.storage,
            spec.key,
            &self.private_key_path(basename),
            &self.public_key_path(basename),
        )?;

        Ok(Order::from_response(response, &url)?)
    }

    /// 讀取保存的訂單 URL 並重新取得訂單。
    ///
    /// 訂單為 `invalid` 或識別項與 `subjects` 不符時回傳 `OrderError::State`。
    pub fn get<S: AsRef<str>>(
        &self,
        account: &Account,
        basename: &str,
        subjects: &[S],
    ) -> Result<Order> {
        let order_file = self.order_file_path(basename);
        self.storage.require_file(&order_file)?;
        let url = self.storage.read_to_string(&order_file)?;

        let order = self.fetch(account, url.trim())?;
        if order.is_invalid() {
            return Err(OrderError::State("Order has invalid status".to_string()));
        }
        if !order.is_identifiers_equal(subjects) {
            return Err(OrderError::State(
                "Order data is invalid - subjects are not equal".to_string(),
            ));
        }

        self.hydrate(account, order)
    }

    /// 取得既有訂單；任何錯誤都視為訂單已失效，清除檔案後重新建立。
    pub fn get_or_create<S: AsRef<str>>(
        &self,
        account: &Account,
        basename: &str,
        subjects: &[S],
        spec: &CertificateSpec,
    ) -> Result<Order> {
        match self.get(account, basename, subjects) {
            Ok(order) => Ok(order),
            Err(e) => {
                warn!("recreating order for {}: {}", basename, e);
                self.discard_files(basename);
                self.create(account, basename, subjects, spec)
            }
        }
    }

    /// 重新取得訂單與其所有授權。
    pub fn refresh(&self, account: &Account, order: &Order) -> Result<Order> {
        let fresh = self.fetch(account, &order.url)?;
        self.hydrate(account, fresh)
    }

    pub fn pending_http_challenges(
        &self,
        account: &Account,
        order: &Order,
    ) -> Result<Vec<HttpChallengeFile>> {
        let thumbprint = self.connector.signer().thumbprint(&account.key_pair)?;
        Ok(self
            .authorization_service
            .pending_http_challenges(&order.pending_authorizations(), &thumbprint)?)
    }

    pub fn pending_dns_challenges(
        &self,
        account: &Account,
        order: &Order,
    ) -> Result<Vec<DnsChallengeRecord>> {
        let thumbprint = self.connector.signer().thumbprint(&account.key_pair)?;
        Ok(self
            .authorization_service
            .pending_dns_challenges(&order.pending_authorizations(), &thumbprint)?)
    }

    pub fn verify_pending_http(
        &self,
        account: &Account,
        order: &Order,
        identifier: &str,
    ) -> Result<ValidationOutcome> {
        Ok(self
            .authorization_service
            .verify_pending_http(account, &order.authorization_list, identifier)?)
    }

    pub fn verify_pending_dns(
        &self,
        account: &Account,
        order: &Order,
        identifier: &str,
    ) -> Result<ValidationOutcome> {
        Ok(self
            .authorization_service
            .verify_pending_dns(account, &order.authorization_list, identifier)?)
    }

    /// 以證書金鑰產生 CSR 並送出最終確認，只允許 `pending` 或 `ready` 的訂單。
    pub fn finalize(&self, account: &Account, order: &Order, basename: &str) -> Result<Order> {
        if !(order.is_pending() || order.is_ready()) {
            return Err(OrderError::State(format!(
                "Order cannot be finalized in status {}",
                order.status
            )));
        }

        let subjects = order.identifier_values();
        let common_name = subjects
            .first()
            .ok_or_else(|| OrderError::State("Order has no identifiers".to_string()))?;
        let key = KeyPair::from_file(&*self.storage, &self.private_key_path(basename))?;
        let csr = self.key_provider.create_csr(common_name, &subjects, &key)?;

        let payload = FinalizeOrderPayload::new(&csr);
        payload.validate()?;
        let response = self.connector.signed_kid_request(
            &order.finalize,
            &payload,
            &account.url,
            &account.key_pair,
        )?;
        if !response.is_success() {
            return Err(OrderError::Rejected {
                status: response.status(),
                problem: response.problem(),
            });
        }

        let mut finalized = Order::from_response(&response, &order.url)?;
        finalized.authorization_list = order.authorization_list.clone();
        info!("order finalized: {} ({})", order.url, finalized.status);
        Ok(finalized)
    }

    /// 完成訂單並下載證書，寫入 `certificate.crt` 與 `fullchain.crt`。
    ///
    /// 下載內容沒有中繼證書時會移除既有的 `fullchain.crt`。
    ///
    /// 所有授權必須為 `valid`；訂單尚未最終確認時先確認，接著輪詢直到離開
    /// `processing`，最終狀態必須為 `valid`。
    pub fn get_certificate(
        &self,
        account: &Account,
        order: &Order,
        basename: &str,
    ) -> Result<CertificateBundle> {
        let mut order = if order.all_authorizations_valid() {
            order.clone()
        } else {
            self.hydrate(account, order.clone())?
        };
        if !order.all_authorizations_valid() {
            return Err(OrderError::State(
                "Order authorizations are not valid".to_string(),
            ));
        }

        if order.is_pending() || order.is_ready() {
            order = self.finalize(account, &order, basename)?;
        }

        if order.is_processing() {
            let url = order.url.clone();
            let authorization_list = std::mem::take(&mut order.authorization_list);
            order = self.poll.run(
                || self.fetch(account, &url),
                |o: &Order| !o.is_processing(),
            )?;
            order.authorization_list = authorization_list;
        }

        if !order.is_valid() {
            return Err(OrderError::State(format!(
                "Order status is {}",
                order.status
            )));
        }
        let certificate_url = order
            .certificate
            .as_deref()
            .ok_or_else(|| OrderError::State("Order has no certificate URL".to_string()))?;

        let response =
            self.connector
                .download_certificate(certificate_url, &account.url, &account.key_pair)?;
        if !response.is_success() {
            return Err(OrderError::Rejected {
                status: response.status(),
                problem: response.problem(),
            });
        }

        let bundle = split_bundle(&response.text())?;
        self.storage.write_file(
            &self.certificate_path(basename),
            bundle.certificate.as_bytes(),
        )?;
        let fullchain_path = self.fullchain_certificate_path(basename);
        match &bundle.fullchain {
            Some(fullchain) => self.storage.write_file(&fullchain_path, fullchain.as_bytes())?,
            // 舊的 fullchain.crt 屬於上一張證書
            None => self.storage.remove(&fullchain_path)?,
        }
        info!("certificate stored: {}", self.certificate_path(basename));

        Ok(bundle)
    }

    /// 以帳戶金鑰撤銷已保存的證書。
    ///
    /// 回傳 CA 是否以 `200 OK` 接受；`400`（例如已撤銷）回傳 `false` 而非錯誤。
    pub fn revoke_certificate(
        &self,
        account: &Account,
        basename: &str,
        reason: RevocationReason,
    ) -> Result<bool> {
        let payload = self.revocation_payload(basename, reason)?;
        let response = self.connector.signed_kid_request(
            &self.connector.directory().revoke_cert,
            &payload,
            &account.url,
            &account.key_pair,
        )?;
        Ok(self.revocation_accepted(basename, &response))
    }

    /// 以證書本身的私鑰（`jwk` 模式）撤銷證書，不需要帳戶。
    pub fn revoke_certificate_with_key(
        &self,
        basename: &str,
        reason: RevocationReason,
    ) -> Result<bool> {
        let payload = self.revocation_payload(basename, reason)?;
        let key = KeyPair::from_file(&*self.storage, &self.private_key_path(basename))?;
        let response = self.connector.signed_jwk_request(
            &self.connector.directory().revoke_cert,
            &payload,
            &key,
        )?;
        Ok(self.revocation_accepted(basename, &response))
    }

    fn revocation_payload(
        &self,
        basename: &str,
        reason: RevocationReason,
    ) -> Result<RevocationPayload> {
        let private_key = self.private_key_path(basename);
        let certificate_path = self.certificate_path(basename);
        self.storage.require_file(&private_key)?;
        self.storage.require_file(&certificate_path)?;

        let pem = self.storage.read_to_string(&certificate_path)?;
        let der = Certificate::from_pem(&pem)?.to_der()?;
        let payload = RevocationPayload::new(&der, reason.code());
        payload.validate()?;
        Ok(payload)
    }

    fn revocation_accepted(&self, basename: &str, response: &Response) -> bool {
        if response.is_status_ok() {
            info!("certificate revoked: {}", basename);
            return true;
        }
        match response.problem() {
            Some(problem) => warn!("revocation of {} refused: {}", basename, problem),
            None => warn!("revocation of {} refused: {}", basename, response.status()),
        }
        false
    }

    /// 刪除證書目錄中的所有檔案，目錄本身保留。
    pub fn cleanup_files(&self, basename: &str) -> Result<()> {
        Ok(self
            .storage
            .clear_dir(&self.certificate_base_path(basename))?)
    }

    fn discard_files(&self, basename: &str) {
        if let Err(e) = self.cleanup_files(basename) {
            warn!("unable to clean up files for {}: {}", basename, e);
        }
    }

    fn fetch(&self, account: &Account, url: &str) -> Result<Order> {
        let response = self
            .connector
            .post_as_get(url, &account.url, &account.key_pair)?;
        if !response.is_success() {
            return Err(OrderError::Rejected {
                status: response.status(),
                problem: response.problem(),
            });
        }
        let order = Order::from_response(&response, url)?;
        debug!("order {} is {}", url, order.status);
        Ok(order)
    }

    fn hydrate(&self, account: &Account, mut order: Order) -> Result<Order> {
        order.authorization_list = self
            .authorization_service
            .fetch_authorizations(account, &order.authorizations)?;
        Ok(order)
    }

    fn certificate_base_path(&self, basename: &str) -> String {
        join_key(&self.files_path, basename)
    }

    pub fn order_file_path(&self, basename: &str) -> String {
        join_key(&self.certificate_base_path(basename), Bundle::ORDER)
    }

    pub fn private_key_path(&self, basename: &str) -> String {
        join_key(&self.certificate_base_path(basename), Bundle::PRIVATE_KEY)
    }

    pub fn public_key_path(&self, basename: &str) -> String {
        join_key(&self.certificate_base_path(basename), Bundle::PUBLIC_KEY)
    }

    pub fn certificate_path(&self, basename: &str) -> String {
        join_key(&self.certificate_base_path(basename), Bundle::CERTIFICATE)
    }

    pub fn fullchain_certificate_path(&self, basename: &str) -> String {
        join_key(
            &self.certificate_base_path(basename),
            Bundle::FULL_CHAIN_CERTIFICATE,
        )
    }
}
