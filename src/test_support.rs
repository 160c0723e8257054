//! 測試共用的固定資料：腳本化的 CA、帳戶金鑰與常見的回應主體。

use std::sync::{Arc, OnceLock};

use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::BigNum,
    hash::MessageDigest,
    x509::{X509Builder, X509NameBuilder},
};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::{
    account::Account,
    base64,
    certificate::Bundle,
    connector::Connector,
    dns::{DnsChecker, DnsError},
    key_pair::{EcCurve, KeyAlgorithm, KeyPair, RsaKeyLength},
    status::Status,
    transport::{MockTransport, Request, Response},
};

pub const DIRECTORY_URL: &str = "https://ca/directory";
pub const NEW_NONCE: &str = "https://ca/new-nonce";
pub const NEW_ACCOUNT: &str = "https://ca/new-account";
pub const NEW_ORDER: &str = "https://ca/new-order";
pub const REVOKE_CERT: &str = "https://ca/revoke-cert";
pub const KEY_CHANGE: &str = "https://ca/key-change";
pub const ACCOUNT_URL: &str = "https://ca/acct/1";
pub const INITIAL_NONCE: &str = "oFvnlFP1wIhRlYS2jTaXbA";

pub fn directory_json() -> Value {
    json!({
        "keyChange": KEY_CHANGE,
        "meta": {
            "caaIdentities": ["ca"],
            "termsOfService": "https://ca/terms.pdf",
            "website": "https://ca"
        },
        "newAccount": NEW_ACCOUNT,
        "newNonce": NEW_NONCE,
        "newOrder": NEW_ORDER,
        "renewalInfo": "https://ca/renewal-info",
        "revokeCert": REVOKE_CERT,
        "zT1kpLgWqmA": "https://community.ca/t/adding-random-entries-to-the-directory/33417"
    })
}

/// 以 `RUST_LOG` 控制測試輸出；重複初始化會被忽略。
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 已完成目錄與第一個 nonce 交換的 [`Connector`]。
pub fn mock_connector() -> (Arc<MockTransport>, Arc<Connector>) {
    init_logger();
    let mock = Arc::new(MockTransport::new());
    mock.on(
        Method::GET,
        DIRECTORY_URL,
        Response::new(StatusCode::OK).with_json(&directory_json()),
    )
    .on(
        Method::HEAD,
        NEW_NONCE,
        Response::new(StatusCode::OK).with_header("Replay-Nonce", INITIAL_NONCE),
    );
    let connector = Connector::new(DIRECTORY_URL, mock.clone()).unwrap();
    (mock, Arc::new(connector))
}

/// 所有測試共用一把 RSA 帳戶金鑰，避免重複產生。
pub fn account_key() -> KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate(KeyAlgorithm::Rsa(RsaKeyLength::Bit2048)).unwrap())
        .clone()
}

pub fn account() -> Account {
    Account {
        id: None,
        url: ACCOUNT_URL.to_string(),
        key: None,
        contact: vec!["mailto:admin@example.org".to_string()],
        status: Status::Valid,
        initial_ip: None,
        created_at: None,
        orders: None,
        private_key_path: format!("/keys/{}", Bundle::PRIVATE_KEY),
        key_pair: Arc::new(account_key()),
    }
}

/// `200 OK`、JSON 主體並附帶新 nonce 的回應。
pub fn ok_json(body: &Value) -> Response {
    Response::new(StatusCode::OK)
        .with_header("Replay-Nonce", "ok-nonce")
        .with_json(body)
}

/// 授權主體，挑戰的狀態跟隨授權：`http-token` 與 `dns-token`。
pub fn authorization_json(name: &str, status: &str) -> Value {
    let challenge_status = match status {
        "valid" | "invalid" => status,
        _ => "pending",
    };
    json!({
        "identifier": {"type": "dns", "value": name},
        "status": status,
        "expires": "2026-12-01T00:00:00Z",
        "challenges": [
            {"type": "http-01", "url": "https://ca/chall/http", "token": "http-token", "status": challenge_status},
            {"type": "dns-01", "url": "https://ca/chall/dns", "token": "dns-token", "status": challenge_status},
            {"type": "tls-alpn-01", "url": "https://ca/chall/alpn", "token": "alpn-token", "status": challenge_status}
        ]
    })
}

/// 解出請求中 JWS 的保護頭與載荷；空載荷解為 `null`。
pub fn decode_jws(request: &Request) -> (Value, Value) {
    let body: Value = request.json().unwrap();
    let decode = |part: &Value| -> Value {
        match part.as_str().unwrap() {
            "" => Value::Null,
            encoded => serde_json::from_slice(&base64::decode(encoded).unwrap()).unwrap(),
        }
    };
    (decode(&body["protected"]), decode(&body["payload"]))
}

/// 自簽的 PEM 證書，有效期從現在起算 `days` 天。
pub fn self_signed(common_name: &str, days: u32) -> String {
    let key = KeyPair::generate(KeyAlgorithm::Ec(EcCurve::Prime256v1)).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = Asn1Integer::from_bn(&BigNum::from_u32(1).unwrap()).unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key.pub_key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(days).unwrap())
        .unwrap();
    builder.sign(&key.pri_key, MessageDigest::sha256()).unwrap();

    String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}

/// 固定回答的 [`DnsChecker`]。
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticDns {
    answer: bool,
}

impl StaticDns {
    pub fn answering(answer: bool) -> Self {
        Self { answer }
    }
}

impl DnsChecker for StaticDns {
    fn verify(&self, _domain: &str, _digest: &str) -> Result<bool, DnsError> {
        Ok(self.answer)
    }
}
