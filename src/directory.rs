use serde::{Deserialize, Serialize};

/// 表示與目錄相關的 API 結構，包含與帳號、nonce、訂單及撤銷憑證相關的 URL。
///
/// 只在建立 [`Connector`](crate::connector::Connector) 時取得一次。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    /// 用於取得新的 nonce 值的 API 路徑。
    pub new_nonce: String,
    /// 用於新帳號註冊的 API 路徑。
    pub new_account: String,
    /// 用於訂單相關操作的 API 路徑。
    pub new_order: String,
    /// 用於撤銷憑證的 API 路徑。
    pub revoke_cert: String,
    /// 帳號金鑰輪替，部分 CA 不提供。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,
    /// 用於取得續期資訊的 API 路徑，可能不存在。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

impl Directory {
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }
}
