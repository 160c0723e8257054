//! HTTP 傳輸層：可替換的 [`HttpClient`] 能力、請求與回應的值型別，
//! 以及預設的 reqwest 阻塞式實作與測試用的 [`MockTransport`]。

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::Duration,
};

use log::debug;
use parking_lot::Mutex;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::problem::Problem;

pub const REPLAY_NONCE: &str = "replay-nonce";
pub const JOSE_JSON: &str = "application/jose+json";
pub const PROBLEM_JSON: &str = "application/problem+json";
pub const PEM_CERTIFICATE_CHAIN: &str = "application/pem-certificate-chain";

/// 網路層級的錯誤（連線失敗、逾時等），與 CA 回傳的錯誤回應不同。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Host unreachable: {0}")]
    Unreachable(String),
}

type Result<T> = std::result::Result<T, TransportError>;

/// 一個待送出的 HTTP 請求。
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: &str) -> Self {
        Self::new(Method::HEAD, url)
    }

    pub fn post(url: &str, body: Vec<u8>) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body);
        request
    }

    pub fn header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 請求主體解析成 JSON，主要供測試檢查送出的 JWS。
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_slice(body).ok())
    }
}

/// 完整讀取後的 HTTP 回應。CA 的 4xx/5xx 也會以此型別回傳，由呼叫端判斷狀態。
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// 加入標頭；名稱或值不合法時忽略。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// 狀態碼是否恰為 `200 OK`。
    pub fn is_status_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// 錯誤回應中的 RFC 7807 問題文件；成功回應或無法解析時為 `None`。
    pub fn problem(&self) -> Option<Problem> {
        if self.is_success() {
            return None;
        }
        self.json::<Problem>()
            .ok()
            .filter(|problem| !problem.type_.is_empty())
    }
}

/// 送出 HTTP 請求的能力。
pub trait HttpClient: Send + Sync + fmt::Debug {
    fn execute(&self, request: Request) -> Result<Response>;
}

/// 以 `reqwest` 阻塞式客戶端實作的 [`HttpClient`]。
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub const USER_AGENT: &'static str = concat!("letsacme/", env!("CARGO_PKG_VERSION"));
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: Request) -> Result<Response> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();
        debug!("-> {}", status);

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

type Route = VecDeque<std::result::Result<Response, String>>;

/// 依 (方法, URL) 腳本化回應的 [`HttpClient`]，並記錄所有送出的請求。
///
/// 同一路由的回應依序取出，最後一個會重複使用；沒有對應路由時回傳
/// `TransportError::Unreachable`。
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Route>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 為路由加入一個回應。
    pub fn on(&self, method: Method, url: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(Ok(response));
        self
    }

    /// 以單一回應取代路由上尚未取出的所有回應。
    pub fn set(&self, method: Method, url: &str, response: Response) -> &Self {
        self.routes
            .lock()
            .insert((method, url.to_string()), VecDeque::from([Ok(response)]));
        self
    }

    /// 為路由加入一次網路層級的失敗。
    pub fn fail(&self, method: Method, url: &str, message: &str) -> &Self {
        self.routes
            .lock()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// 指定路由被呼叫的次數。
    pub fn count(&self, method: &Method, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| &r.method == method && r.url == url)
            .count()
    }
}

impl HttpClient for MockTransport {
    fn execute(&self, request: Request) -> Result<Response> {
        let key = (request.method.clone(), request.url.clone());
        self.requests.lock().push(request);

        let mut routes = self.routes.lock();
        let queue = routes
            .get_mut(&key)
            .ok_or_else(|| TransportError::Unreachable(format!("{} {}", key.0, key.1)))?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Unreachable(message)),
            None => Err(TransportError::Unreachable(format!("{} {}", key.0, key.1))),
        }
    }
}
