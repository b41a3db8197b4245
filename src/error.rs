//! 托管错误分类
//!
//! 所有服务层操作统一返回 [`EscrowError`]，不向调用方泄露底层 RPC / 加密库错误。

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EscrowError>;

#[derive(Debug, Error)]
pub enum EscrowError {
    /// 密文信封格式错误或被篡改（致命，不可重试）
    #[error("crypto error: {0}")]
    Crypto(String),

    /// 唯一键冲突
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// 调用方参数错误
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 无法构造签名账户（钱包不存在或已停用）
    #[error("account unavailable: {0}")]
    AccountUnavailable(String),

    /// 链上执行失败，可使用新的 attempt / nonce 重试
    #[error("transaction reverted: {tx_hash}")]
    TransactionReverted { tx_hash: String },

    /// 结果未知，禁止盲目重试
    #[error("confirmation timeout after {waited:?}: {tx_hash}")]
    ConfirmationTimeout { tx_hash: String, waited: Duration },

    #[error("receipt has no contract address: {tx_hash}")]
    ReceiptMissingAddress { tx_hash: String },

    /// 链上成功但应用层无法还原部署地址，需要人工对账
    #[error("event {event} not found in receipt of {tx_hash}")]
    DeploymentEventNotFound { tx_hash: String, event: String },

    /// topic0 匹配但解码失败
    #[error("failed to decode {event} log in {tx_hash}: {reason}")]
    EventDecode {
        tx_hash: String,
        event: String,
        reason: String,
    },

    #[error("registry not configured: {0}")]
    RegistryNotConfigured(String),

    /// 节点查询失败或明确拒绝广播；交易未进入交易池
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("database error: {0}")]
    Database(String),

    /// 合约已上链但记录写入失败
    #[error("deployed {address} in {tx_hash} but failed to persist record: {reason}")]
    Persistence {
        tx_hash: String,
        address: String,
        reason: String,
    },
}

impl EscrowError {
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::Crypto(_) => "crypto_error",
            EscrowError::Conflict(_) => "conflict",
            EscrowError::NotFound(_) => "not_found",
            EscrowError::InvalidInput(_) => "invalid_input",
            EscrowError::AccountUnavailable(_) => "account_unavailable",
            EscrowError::TransactionReverted { .. } => "transaction_reverted",
            EscrowError::ConfirmationTimeout { .. } => "confirmation_timeout",
            EscrowError::ReceiptMissingAddress { .. } => "receipt_missing_address",
            EscrowError::DeploymentEventNotFound { .. } => "deployment_event_not_found",
            EscrowError::EventDecode { .. } => "event_decode_failed",
            EscrowError::RegistryNotConfigured(_) => "registry_not_configured",
            EscrowError::Rpc(_) => "rpc_error",
            EscrowError::Database(_) => "database_error",
            EscrowError::Persistence { .. } => "persistence_failed",
        }
    }

    /// 是否可以用新的 attempt 安全重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EscrowError::TransactionReverted { .. } | EscrowError::Rpc(_)
        )
    }

    pub fn rpc(err: impl std::fmt::Display) -> Self {
        EscrowError::Rpc(err.to_string())
    }
}

impl From<sqlx::Error> for EscrowError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".into()),
            sqlx::Error::Database(ref db_err) => {
                // PostgreSQL unique_violation
                match db_err.code().as_deref() {
                    Some("23505") => return Self::Conflict("Resource already exists".into()),
                    // PostgreSQL foreign_key_violation
                    Some("23503") => {
                        return Self::Conflict("Resource is still referenced".into())
                    }
                    _ => {}
                }
                Self::Database(db_err.to_string())
            }
            _ => Self::Database(format!("Database operation failed: {}", err)),
        }
    }
}
