//! 已部署合约记录（工厂、NFT 集合、TBA 注册表 / 实现）

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EscrowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    Factory,
    Collection,
    TbaRegistry,
    TbaImplementation,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Factory => "factory",
            ContractType::Collection => "collection",
            ContractType::TbaRegistry => "tba_registry",
            ContractType::TbaImplementation => "tba_implementation",
        }
    }

    /// TBA 合约在每个网络上同类型最多一条激活记录
    pub fn is_tba(&self) -> bool {
        matches!(
            self,
            ContractType::TbaRegistry | ContractType::TbaImplementation
        )
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractType {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "factory" => Ok(ContractType::Factory),
            "collection" => Ok(ContractType::Collection),
            "tba_registry" => Ok(ContractType::TbaRegistry),
            "tba_implementation" => Ok(ContractType::TbaImplementation),
            other => Err(EscrowError::InvalidInput(format!(
                "unknown contract type: {}",
                other
            ))),
        }
    }
}

/// 仅在链上回执确认部署之后创建；之后只允许修改 is_active
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContractRecord {
    pub id: Uuid,
    pub network_id: Uuid,
    pub contract_type: ContractType,
    pub address: Address,
    pub tx_hash: H256,
    pub deployer: Address,
    pub is_active: bool,
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// 集合部署时网络上激活的 TBA 注册表
    pub tba_registry: Option<Address>,
    pub tba_implementation: Option<Address>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContractRecord {
    pub network_id: Uuid,
    pub contract_type: ContractType,
    pub address: Address,
    pub tx_hash: H256,
    pub deployer: Address,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub tba_registry: Option<Address>,
    pub tba_implementation: Option<Address>,
}
