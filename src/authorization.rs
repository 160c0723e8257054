//! 授權（Authorization）實體與驗證流程。
//!
//! [`AuthorizationService`] 負責計算 key authorization、列出呼叫端需要發佈的
//! HTTP 檔案或 DNS 記錄、在發佈後自我檢查並通知 CA 開始驗證，然後輪詢授權直到
//! 離開 `pending` 狀態。

use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    account::Account,
    challenge::{Challenge, ChallengeError, ChallengeType},
    connector::{Connector, ConnectorError},
    dns::{DnsChecker, DnsError},
    jws::JwsError,
    payload::ChallengeValidationPayload,
    poll::{PollError, PollPolicy},
    problem::Problem,
    status::{Stateful, Status},
    transport::{Request, Response},
};

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),
    #[error("Polling error: {0}")]
    Poll(#[from] PollError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Unable to fetch authorization {url}: {status}")]
    Fetch {
        url: String,
        status: StatusCode,
        problem: Option<Problem>,
    },
}

type Result<T> = std::result::Result<T, AuthorizationError>;

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub const DNS: &'static str = "dns";

    pub fn dns(value: &str) -> Self {
        Self {
            type_: Self::DNS.to_string(),
            value: value.to_string(),
        }
    }
}

/// 一個識別項的授權，由 CA 在建立訂單時產生。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// 授權 URL，不在回應主體中，而是由取得時的請求位址填入。
    #[serde(skip)]
    pub url: String,
    pub identifier: Identifier,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    pub fn from_response(response: &Response, url: &str) -> serde_json::Result<Self> {
        let mut authorization: Authorization = response.json()?;
        authorization.url = url.to_string();
        Ok(authorization)
    }

    /// 取得指定類型的挑戰，不存在時回傳 `ChallengeError::NotFound`。
    pub fn challenge(
        &self,
        type_: &ChallengeType,
    ) -> std::result::Result<&Challenge, ChallengeError> {
        self.challenges
            .iter()
            .find(|challenge| &challenge.type_ == type_)
            .ok_or_else(|| ChallengeError::NotFound(type_.clone()))
    }

    pub fn http_challenge(&self) -> std::result::Result<&Challenge, ChallengeError> {
        self.challenge(&ChallengeType::Http01)
    }

    pub fn dns_challenge(&self) -> std::result::Result<&Challenge, ChallengeError> {
        self.challenge(&ChallengeType::Dns01)
    }

    pub fn identifier_value(&self) -> &str {
        &self.identifier.value
    }

    pub fn is_identifier_value_equal(&self, identifier: &str) -> bool {
        self.identifier.value == identifier
    }
}

impl Stateful for Authorization {
    fn status(&self) -> Status {
        self.status
    }
}

/// HTTP-01：呼叫端需發佈於 `http://<identifier>/.well-known/acme-challenge/<filename>` 的檔案。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpChallengeFile {
    pub identifier: String,
    pub filename: String,
    pub content: String,
}

/// DNS-01：呼叫端需發佈於 `_acme-challenge.<identifier>` 的 TXT 記錄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallengeRecord {
    pub identifier: String,
    pub dns_digest: String,
}

impl DnsChallengeRecord {
    pub fn record_name(&self) -> String {
        format!("_acme-challenge.{}", self.identifier)
    }
}

/// 驗證流程的結果。
///
/// `triggered` 表示已成功通知 CA 開始驗證；`status` 是輪詢結束時授權的狀態。
/// 授權離開 `pending` 即停止輪詢，因此 `triggered` 為真時狀態也可能是 `invalid`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    triggered: bool,
    status: Option<Status>,
}

impl ValidationOutcome {
    fn not_triggered() -> Self {
        Self {
            triggered: false,
            status: None,
        }
    }

    fn triggered(status: Status) -> Self {
        Self {
            triggered: true,
            status: Some(status),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub fn is_valid(&self) -> bool {
        self.status == Some(Status::Valid)
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }
}

#[derive(Debug)]
pub struct AuthorizationService {
    connector: Arc<Connector>,
    dns_checker: Box<dyn DnsChecker>,
    poll: PollPolicy,
}

impl AuthorizationService {
    pub fn new(
        connector: Arc<Connector>,
        dns_checker: Box<dyn DnsChecker>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            connector,
            dns_checker,
            poll,
        }
    }

    /// 依序以 POST-as-GET 取得每個授權，保留輸入順序。
    pub fn fetch_authorizations(
        &self,
        account: &Account,
        urls: &[String],
    ) -> Result<Vec<Authorization>> {
        urls.iter()
            .map(|url| self.fetch_authorization(account, url))
            .collect()
    }

    pub fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        let response = self
            .connector
            .post_as_get(url, &account.url, &account.key_pair)?;
        if !response.is_success() {
            return Err(AuthorizationError::Fetch {
                url: url.to_string(),
                status: response.status(),
                problem: response.problem(),
            });
        }
        Ok(Authorization::from_response(&response, url)?)
    }

    /// 列出 HTTP-01 挑戰仍為 `pending` 的授權所需發佈的檔案。
    pub fn pending_http_challenges(
        &self,
        authorizations: &[Authorization],
        thumbprint: &str,
    ) -> Result<Vec<HttpChallengeFile>> {
        let mut files = Vec::new();
        for authorization in authorizations {
            let challenge = authorization.http_challenge()?;
            if challenge.is_pending() {
                files.push(HttpChallengeFile {
                    identifier: authorization.identifier_value().to_string(),
                    filename: challenge.token.clone(),
                    content: challenge.key_authorization(thumbprint),
                });
            }
        }
        Ok(files)
    }

    /// 列出 DNS-01 挑戰仍為 `pending` 的授權所需發佈的 TXT 記錄。
    pub fn pending_dns_challenges(
        &self,
        authorizations: &[Authorization],
        thumbprint: &str,
    ) -> Result<Vec<DnsChallengeRecord>> {
        let mut records = Vec::new();
        for authorization in authorizations {
            let challenge = authorization.dns_challenge()?;
            if challenge.is_pending() {
                records.push(DnsChallengeRecord {
                    identifier: authorization.identifier_value().to_string(),
                    dns_digest: challenge.dns_digest(thumbprint),
                });
            }
        }
        Ok(records)
    }

    /// 確認 HTTP-01 檔案已可存取後通知 CA 驗證，並輪詢直到授權離開 `pending`。
    ///
    /// 找不到對應的待驗證授權、或自我檢查未通過時回傳未觸發的結果。
    pub fn verify_pending_http(
        &self,
        account: &Account,
        authorizations: &[Authorization],
        identifier: &str,
    ) -> Result<ValidationOutcome> {
        self.verify_pending(account, authorizations, identifier, ChallengeType::Http01)
    }

    /// 確認 DNS-01 TXT 記錄已生效後通知 CA 驗證，並輪詢直到授權離開 `pending`。
    pub fn verify_pending_dns(
        &self,
        account: &Account,
        authorizations: &[Authorization],
        identifier: &str,
    ) -> Result<ValidationOutcome> {
        self.verify_pending(account, authorizations, identifier, ChallengeType::Dns01)
    }

    fn verify_pending(
        &self,
        account: &Account,
        authorizations: &[Authorization],
        identifier: &str,
        type_: ChallengeType,
    ) -> Result<ValidationOutcome> {
        let thumbprint = self.connector.signer().thumbprint(&account.key_pair)?;

        let candidates = authorizations
            .iter()
            .filter(|a| a.is_pending() && a.is_identifier_value_equal(identifier));
        for authorization in candidates {
            let challenge = authorization.challenge(&type_)?;
            if !challenge.is_pending() {
                continue;
            }

            let key_authorization = challenge.key_authorization(&thumbprint);
            let published = match type_ {
                ChallengeType::Http01 => {
                    self.check_http_file(identifier, challenge, &key_authorization)?
                }
                ChallengeType::Dns01 => self
                    .dns_checker
                    .verify(identifier, &challenge.dns_digest(&thumbprint))?,
                _ => false,
            };
            if !published {
                info!("{} challenge for {} is not published yet", type_, identifier);
                continue;
            }

            let response = self.connector.signed_kid_request(
                &challenge.url,
                &ChallengeValidationPayload::new(&key_authorization),
                &account.url,
                &account.key_pair,
            )?;
            if !response.is_success() {
                warn!(
                    "CA refused to validate {} challenge for {}: {}",
                    type_,
                    identifier,
                    response.status()
                );
                continue;
            }

            let polled = self.poll.run(
                || self.fetch_authorization(account, &authorization.url),
                |a: &Authorization| !a.is_pending(),
            )?;
            info!("authorization for {} is {}", identifier, polled.status);
            return Ok(ValidationOutcome::triggered(polled.status));
        }

        Ok(ValidationOutcome::not_triggered())
    }

    /// 以純 HTTP 取得驗證檔案，去除前後空白後與 key authorization 比對。
    fn check_http_file(
        &self,
        domain: &str,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<bool> {
        let url = challenge.http_url(domain);
        let response = match self.connector.client().execute(Request::get(&url)) {
            Ok(response) => response,
            Err(e) => {
                warn!("unable to fetch {}: {}", url, e);
                return Ok(false);
            }
        };
        debug!("GET {} -> {}", url, response.status());

        Ok(response.is_success() && response.text().trim() == key_authorization)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::{
        base64,
        test_support::{self, StaticDns},
    };

    const AUTHZ_URL: &str = "https://ca/authz/1";
    const HTTP_CHALLENGE_URL: &str = "https://ca/chall/http";
    const DNS_CHALLENGE_URL: &str = "https://ca/chall/dns";
    const WELL_KNOWN: &str = "http://example.org/.well-known/acme-challenge/http-token";

    fn service(connector: Arc<Connector>, dns: StaticDns) -> AuthorizationService {
        AuthorizationService::new(
            connector,
            Box::new(dns),
            PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5)),
        )
    }

    fn authorization(status: &str) -> Authorization {
        let json = test_support::authorization_json("example.org", status);
        let mut authorization: Authorization = serde_json::from_value(json).unwrap();
        authorization.url = AUTHZ_URL.to_string();
        authorization
    }

    #[test]
    fn test_challenge_lookup() {
        let authorization = authorization("pending");
        assert_eq!(authorization.http_challenge().unwrap().url, HTTP_CHALLENGE_URL);
        assert_eq!(authorization.dns_challenge().unwrap().url, DNS_CHALLENGE_URL);

        let mut http_only = authorization.clone();
        http_only.challenges.retain(|c| c.type_ == ChallengeType::Http01);
        assert_eq!(
            http_only.dns_challenge(),
            Err(ChallengeError::NotFound(ChallengeType::Dns01))
        );
        assert!(authorization.is_identifier_value_equal("example.org"));
        assert!(!authorization.is_identifier_value_equal("www.example.org"));
    }

    #[test]
    fn test_fetch_preserves_order() -> Result<()> {
        let (mock, connector) = test_support::mock_connector();
        for name in ["b.example.org", "a.example.org"] {
            mock.on(
                Method::POST,
                &format!("https://ca/authz/{}", name),
                test_support::ok_json(&test_support::authorization_json(name, "pending")),
            );
        }
        let service = service(connector, StaticDns::default());
        let account = test_support::account();

        let urls = vec![
            "https://ca/authz/b.example.org".to_string(),
            "https://ca/authz/a.example.org".to_string(),
        ];
        let authorizations = service.fetch_authorizations(&account, &urls)?;
        assert_eq!(authorizations[0].identifier_value(), "b.example.org");
        assert_eq!(authorizations[1].identifier_value(), "a.example.org");
        assert_eq!(authorizations[0].url, urls[0]);
        Ok(())
    }

    #[test]
    fn test_pending_challenge_listings() -> Result<()> {
        let (_, connector) = test_support::mock_connector();
        let service = service(connector, StaticDns::default());
        let authorizations = vec![authorization("pending")];

        let files = service.pending_http_challenges(&authorizations, "thumb")?;
        assert_eq!(
            files,
            vec![HttpChallengeFile {
                identifier: "example.org".to_string(),
                filename: "http-token".to_string(),
                content: "http-token.thumb".to_string(),
            }]
        );

        let records = service.pending_dns_challenges(&authorizations, "thumb")?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_name(), "_acme-challenge.example.org");
        assert_eq!(
            records[0].dns_digest,
            base64::thumbprint_digest("dns-token.thumb")
        );
        Ok(())
    }

    #[test]
    fn test_verify_http_triggers_and_polls() -> Result<()> {
        let (mock, connector) = test_support::mock_connector();
        let account = test_support::account();
        let thumbprint = account.key_pair.thumbprint().unwrap();

        mock.on(
            Method::GET,
            WELL_KNOWN,
            Response::new(StatusCode::OK).with_body(format!("http-token.{}\n", thumbprint)),
        )
        .on(
            Method::POST,
            HTTP_CHALLENGE_URL,
            test_support::ok_json(&json!({"type": "http-01", "status": "processing"})),
        )
        .on(
            Method::POST,
            AUTHZ_URL,
            test_support::ok_json(&test_support::authorization_json("example.org", "pending")),
        )
        .on(
            Method::POST,
            AUTHZ_URL,
            test_support::ok_json(&test_support::authorization_json("example.org", "valid")),
        );

        let service = service(connector, StaticDns::default());
        let outcome =
            service.verify_pending_http(&account, &[authorization("pending")], "example.org")?;
        assert!(outcome.is_triggered());
        assert!(outcome.is_valid());
        assert_eq!(mock.count(&Method::POST, AUTHZ_URL), 2);

        let trigger = mock
            .requests()
            .into_iter()
            .find(|r| r.url == HTTP_CHALLENGE_URL)
            .unwrap();
        let body: serde_json::Value = trigger.json().unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&base64::decode(body["payload"].as_str().unwrap()).unwrap())
                .unwrap();
        assert_eq!(
            payload["keyAuthorization"],
            format!("http-token.{}", thumbprint)
        );
        Ok(())
    }

    #[test]
    fn test_verify_reports_invalid_terminal_status() -> Result<()> {
        let (mock, connector) = test_support::mock_connector();
        mock.on(
            Method::POST,
            DNS_CHALLENGE_URL,
            test_support::ok_json(&json!({"type": "dns-01", "status": "processing"})),
        )
        .on(
            Method::POST,
            AUTHZ_URL,
            test_support::ok_json(&test_support::authorization_json("example.org", "invalid")),
        );

        let service = service(connector, StaticDns::answering(true));
        let outcome = service.verify_pending_dns(
            &test_support::account(),
            &[authorization("pending")],
            "example.org",
        )?;
        assert!(outcome.is_triggered());
        assert!(!outcome.is_valid());
        assert_eq!(outcome.status(), Some(Status::Invalid));
        Ok(())
    }

    #[test]
    fn test_verify_without_matching_authorization() -> Result<()> {
        let (mock, connector) = test_support::mock_connector();
        let service = service(connector, StaticDns::answering(true));
        let account = test_support::account();

        let outcome =
            service.verify_pending_dns(&account, &[authorization("pending")], "other.org")?;
        assert!(!outcome.is_triggered());
        let outcome =
            service.verify_pending_dns(&account, &[authorization("valid")], "example.org")?;
        assert!(!outcome.is_triggered());
        assert_eq!(mock.count(&Method::POST, DNS_CHALLENGE_URL), 0);
        Ok(())
    }

    #[test]
    fn test_unpublished_http_file_is_not_triggered() -> Result<()> {
        let (mock, connector) = test_support::mock_connector();
        mock.on(
            Method::GET,
            WELL_KNOWN,
            Response::new(StatusCode::OK).with_body("stale-content"),
        );
        let service = service(connector, StaticDns::default());

        let outcome = service.verify_pending_http(
            &test_support::account(),
            &[authorization("pending")],
            "example.org",
        )?;
        assert!(!outcome.is_triggered());
        assert_eq!(mock.count(&Method::POST, HTTP_CHALLENGE_URL), 0);
        Ok(())
    }

    #[test]
    fn test_unreachable_http_file_is_not_triggered() -> Result<()> {
        let (mock, connector) = test_support::mock_connector();
        let service = service(connector, StaticDns::default());
        let outcome = service.verify_pending_http(
            &test_support::account(),
            &[authorization("pending")],
            "example.org",
        )?;
        assert!(!outcome.is_triggered());
        assert_eq!(mock.count(&Method::GET, WELL_KNOWN), 1);
        Ok(())
    }
}
