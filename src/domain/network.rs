//! 区块链网络配置
//!
//! `BlockchainNetwork` 为持久化记录，`ChainDescriptor` 是由记录派生的不可变描述，
//! 用于构造 RPC / 签名客户端。

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EscrowError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockchainNetwork {
    pub id: Uuid,
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub native_symbol: String,
    pub is_testnet: bool,
    pub is_active: bool,
    pub multicall_address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建网络参数
#[derive(Debug, Clone, Deserialize)]
pub struct NewNetwork {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub native_symbol: String,
    #[serde(default)]
    pub is_testnet: bool,
    pub multicall_address: Option<Address>,
}

impl NewNetwork {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EscrowError::InvalidInput("network name is empty".into()));
        }
        if self.chain_id == 0 {
            return Err(EscrowError::InvalidInput("chain id must be non-zero".into()));
        }
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(EscrowError::InvalidInput(format!(
                "rpc url must be http(s): {}",
                self.rpc_url
            )));
        }
        if self.native_symbol.trim().is_empty() {
            return Err(EscrowError::InvalidInput("native symbol is empty".into()));
        }
        Ok(())
    }
}

/// 网络更新补丁（None 表示不修改）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkPatch {
    pub name: Option<String>,
    pub rpc_url: Option<String>,
    pub explorer_url: Option<Option<String>>,
    pub native_symbol: Option<String>,
    pub is_testnet: Option<bool>,
    pub multicall_address: Option<Option<Address>>,
}

impl NetworkPatch {
    pub fn apply(&self, network: &mut BlockchainNetwork) {
        if let Some(name) = &self.name {
            network.name = name.clone();
        }
        if let Some(rpc_url) = &self.rpc_url {
            network.rpc_url = rpc_url.clone();
        }
        if let Some(explorer_url) = &self.explorer_url {
            network.explorer_url = explorer_url.clone();
        }
        if let Some(symbol) = &self.native_symbol {
            network.native_symbol = symbol.clone();
        }
        if let Some(is_testnet) = self.is_testnet {
            network.is_testnet = is_testnet;
        }
        if let Some(multicall) = self.multicall_address {
            network.multicall_address = multicall;
        }
        network.updated_at = Utc::now();
    }
}

/// 网络查询键：一次只能使用一个
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLookup {
    Id(Uuid),
    Name(String),
    ChainId(u64),
}

impl NetworkLookup {
    /// 从可选字段构造查询键，零个或多个键都是调用方错误
    pub fn from_parts(id: Option<Uuid>, name: Option<String>, chain_id: Option<u64>) -> Result<Self> {
        match (id, name, chain_id) {
            (Some(id), None, None) => Ok(NetworkLookup::Id(id)),
            (None, Some(name), None) => Ok(NetworkLookup::Name(name)),
            (None, None, Some(chain_id)) => Ok(NetworkLookup::ChainId(chain_id)),
            (None, None, None) => Err(EscrowError::InvalidInput(
                "one of id, name or chain id is required".into(),
            )),
            _ => Err(EscrowError::InvalidInput(
                "exactly one of id, name or chain id may be supplied".into(),
            )),
        }
    }

    pub fn matches(&self, network: &BlockchainNetwork) -> bool {
        match self {
            NetworkLookup::Id(id) => network.id == *id,
            NetworkLookup::Name(name) => network.name == *name,
            NetworkLookup::ChainId(chain_id) => network.chain_id == *chain_id,
        }
    }
}

impl std::fmt::Display for NetworkLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkLookup::Id(id) => write!(f, "id={}", id),
            NetworkLookup::Name(name) => write!(f, "name={}", name),
            NetworkLookup::ChainId(chain_id) => write!(f, "chain_id={}", chain_id),
        }
    }
}

/// 列表过滤条件，字段之间为 AND，缺省字段不约束
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct NetworkFilter {
    pub is_testnet: Option<bool>,
    pub is_active: Option<bool>,
}

impl NetworkFilter {
    pub fn matches(&self, network: &BlockchainNetwork) -> bool {
        self.is_testnet.map_or(true, |t| network.is_testnet == t)
            && self.is_active.map_or(true, |a| network.is_active == a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// 链描述（纯函数派生，可按 network id 缓存整个进程生命周期）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainDescriptor {
    pub network_id: Uuid,
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub native_currency: NativeCurrency,
    pub is_testnet: bool,
    pub multicall_address: Option<Address>,
}

impl From<&BlockchainNetwork> for ChainDescriptor {
    fn from(network: &BlockchainNetwork) -> Self {
        Self {
            network_id: network.id,
            chain_id: network.chain_id,
            name: network.name.clone(),
            rpc_url: network.rpc_url.clone(),
            explorer_url: network.explorer_url.clone(),
            native_currency: NativeCurrency {
                name: network.native_symbol.clone(),
                symbol: network.native_symbol.clone(),
                decimals: 18,
            },
            is_testnet: network.is_testnet,
            multicall_address: network.multicall_address,
        }
    }
}

impl ChainDescriptor {
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}
