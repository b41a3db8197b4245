//! 托管钱包领域模型

use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::Serialize;
use uuid::Uuid;

/// 私钥加密信封（静态存储形态）
///
/// 三部分均为十六进制字符串：密文、完整性标签（keyHash）、随机 nonce。
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub key_hash: String,
    pub nonce: String,
}

impl fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("ciphertext", &"<redacted>")
            .field("key_hash", &"<redacted>")
            .field("nonce", &"<redacted>")
            .finish()
    }
}

/// 余额缓存（非权威，按需刷新）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub network_id: Uuid,
    pub wei: U256,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EscrowWallet {
    pub id: Uuid,
    pub address: Address,
    pub label: Option<String>,
    pub envelope: EncryptedEnvelope,
    pub is_active: bool,
    pub is_default: bool,
    pub balance: Option<BalanceSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for EscrowWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscrowWallet")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("label", &self.label)
            .field("envelope", &self.envelope)
            .field("is_active", &self.is_active)
            .field("is_default", &self.is_default)
            .field("balance", &self.balance)
            .finish()
    }
}

impl EscrowWallet {
    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            id: self.id,
            address: self.address,
            label: self.label.clone(),
            is_active: self.is_active,
            is_default: self.is_default,
            balance: self.balance.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Clone)]
pub struct NewEscrowWallet {
    pub address: Address,
    pub label: Option<String>,
    pub envelope: EncryptedEnvelope,
}

/// 对外暴露的钱包视图，不含任何密文字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub id: Uuid,
    pub address: Address,
    pub label: Option<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub balance: Option<BalanceSnapshot>,
    pub created_at: DateTime<Utc>,
}
