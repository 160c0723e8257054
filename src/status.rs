use std::fmt;

use serde::{Deserialize, Serialize};

/// ACME 物件（帳號、訂單、授權、挑戰）共用的狀態詞彙。
///
/// 未知的狀態字串會在反序列化時失敗。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 帶有狀態的 ACME 物件，提供狀態判斷方法。
pub trait Stateful {
    fn status(&self) -> Status;

    fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    fn is_ready(&self) -> bool {
        self.status() == Status::Ready
    }

    fn is_processing(&self) -> bool {
        self.status() == Status::Processing
    }

    fn is_valid(&self) -> bool {
        self.status() == Status::Valid
    }

    fn is_invalid(&self) -> bool {
        self.status() == Status::Invalid
    }

    fn is_deactivated(&self) -> bool {
        self.status() == Status::Deactivated
    }
}

impl Stateful for Status {
    fn status(&self) -> Status {
        *self
    }
}
