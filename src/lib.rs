//! # letsacme
//!
//! 實作 ACME 協議（RFC 8555）的同步客戶端，可向 Let's Encrypt 等 CA 申請、續約與撤銷證書。
//!
//! 主要模組：
//!
//! - **client**：以 [`ClientBuilder`] 組合目錄 URL、存儲、HTTP 客戶端與輪詢策略。
//! - **account**：帳戶註冊、查詢、更新聯絡方式、停用與金鑰輪替，金鑰以 PEM 存放於本地。
//! - **order**：訂單建立與恢復、HTTP-01 / DNS-01 挑戰、CSR 提交、證書下載與撤銷。
//! - **authorization**：授權查詢、挑戰自檢與觸發驗證後的輪詢。
//! - **connector**：目錄、Replay-Nonce 與 JWS 簽名請求，遇到 `badNonce` 會自動重試。
//!
//! ## 示例
//!
//! ```no_run
//! use letsacme::{CertificateSpec, Client};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("/etc/acme/account", "/etc/acme/certs")
//!         .staging(true)
//!         .build()?;
//!
//!     // 既有帳戶不存在時才註冊新的
//!     let account = match client.account().get() {
//!         Ok(account) => account,
//!         Err(_) => client.account().create(&["admin@example.org"])?,
//!     };
//!
//!     let domains = ["example.org", "www.example.org"];
//!     let order = client.order().get_or_create(
//!         &account,
//!         "example",
//!         &domains,
//!         &CertificateSpec::default(),
//!     )?;
//!
//!     // 將每個檔案放到 http://<domain>/.well-known/acme-challenge/<filename>
//!     for file in client.order().pending_http_challenges(&account, &order)? {
//!         println!("{} -> {}", file.filename, file.content);
//!     }
//!     for domain in domains {
//!         client.order().verify_pending_http(&account, &order, domain)?;
//!     }
//!
//!     let bundle = client.order().get_certificate(&account, &order, "example")?;
//!     println!("{}", bundle.certificate);
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod connector;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod order;
pub mod payload;
pub mod poll;
pub mod problem;
pub mod protection;
pub mod signature;
pub mod status;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use account::{Account, AccountError, AccountService};
pub use authorization::{Authorization, AuthorizationService, DnsChallengeRecord, HttpChallengeFile};
pub use certificate::{CertificateBundle, CertificateSpec, RevocationReason};
pub use client::{Client, ClientBuilder, ClientError};
pub use key_pair::{EcCurve, KeyAlgorithm, RsaKeyLength};
pub use order::{Order, OrderError, OrderService};
pub use poll::PollPolicy;
pub use status::Status;
pub use storage::{FileStorage, MemStorage, Storage};
