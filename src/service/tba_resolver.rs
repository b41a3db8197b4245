//! TBA（ERC-6551）地址解析
//!
//! 只读调用注册表合约的 `account(...)`，结果由六元组唯一确定。
//! 缓存键为 (网络, 六元组)：同一元组在不同网络上发往不同节点，结果互不复用。
//! 注册表 / 实现地址是键的一部分，重新部署后自然产生新键。

use std::{collections::HashMap, sync::Arc};

use ethers::{
    abi::{self, Function, Token},
    types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::{ContractType, DeployedContractRecord},
    error::{EscrowError, Result},
    infrastructure::log_redact::redact_address,
    repository::ContractRepository,
    service::network_registry::NetworkRegistry,
};

/// 缓存条目上限，写满后整体清空
pub const DEFAULT_CACHE_LIMIT: usize = 10_000;

const REGISTRY_ABI: &[&str] = &[
    "function account(address implementation, uint256 chainId, address tokenContract, uint256 tokenId, uint256 salt) view returns (address)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TbaParams {
    pub registry: Address,
    pub implementation: Address,
    pub chain_id: u64,
    pub token_contract: Address,
    pub token_id: U256,
    pub salt: U256,
}

impl TbaParams {
    /// salt 固定为 0
    pub fn new(
        registry: Address,
        implementation: Address,
        chain_id: u64,
        token_contract: Address,
        token_id: U256,
    ) -> Self {
        Self {
            registry,
            implementation,
            chain_id,
            token_contract,
            token_id,
            salt: U256::zero(),
        }
    }
}

fn account_function() -> Result<Function> {
    let abi = abi::parse_abi(REGISTRY_ABI)
        .map_err(|e| EscrowError::InvalidInput(format!("invalid registry ABI: {}", e)))?;
    abi.function("account")
        .cloned()
        .map_err(|e| EscrowError::InvalidInput(e.to_string()))
}

/// 构造 `account(...)` 只读调用
pub fn account_call(params: &TbaParams) -> Result<TypedTransaction> {
    let data = account_function()?
        .encode_input(&[
            Token::Address(params.implementation),
            Token::Uint(U256::from(params.chain_id)),
            Token::Address(params.token_contract),
            Token::Uint(params.token_id),
            Token::Uint(params.salt),
        ])
        .map_err(|e| EscrowError::InvalidInput(format!("failed to encode account call: {}", e)))?;

    Ok(TransactionRequest::new()
        .to(params.registry)
        .data(data)
        .into())
}

pub struct TbaResolver {
    registry: Arc<NetworkRegistry>,
    contracts: Arc<dyn ContractRepository>,
    cache: RwLock<HashMap<(Uuid, TbaParams), Address>>,
    cache_limit: usize,
}

impl TbaResolver {
    pub fn new(registry: Arc<NetworkRegistry>, contracts: Arc<dyn ContractRepository>) -> Self {
        Self {
            registry,
            contracts,
            cache: RwLock::new(HashMap::new()),
            cache_limit: DEFAULT_CACHE_LIMIT,
        }
    }

    pub fn with_cache_limit(mut self, limit: usize) -> Self {
        self.cache_limit = limit.max(1);
        self
    }

    /// 直接按六元组解析
    pub async fn resolve(&self, network_id: Uuid, params: TbaParams) -> Result<Address> {
        let key = (network_id, params);
        if let Some(address) = self.cache.read().await.get(&key) {
            return Ok(*address);
        }

        let (_, rpc) = self.registry.rpc_for(network_id).await?;
        let output = rpc
            .call(&account_call(&params)?)
            .await
            .map_err(EscrowError::rpc)?;

        let address = account_function()?
            .decode_output(&output)
            .map_err(|e| EscrowError::rpc(format!("invalid account() output: {}", e)))?
            .into_iter()
            .next()
            .and_then(Token::into_address)
            .ok_or_else(|| EscrowError::rpc("account() returned no address"))?;

        tracing::debug!(
            registry = %redact_address(&params.registry),
            token_contract = %redact_address(&params.token_contract),
            token_id = %params.token_id,
            account = %redact_address(&address),
            "TBA address resolved"
        );
        let mut cache = self.cache.write().await;
        if cache.len() >= self.cache_limit && !cache.contains_key(&key) {
            tracing::debug!(entries = cache.len(), "TBA cache full, clearing");
            cache.clear();
        }
        cache.insert(key, address);
        Ok(address)
    }

    /// 使用集合记录上保存的注册表与实现地址
    pub async fn resolve_for_collection(
        &self,
        collection: &DeployedContractRecord,
        token_id: U256,
    ) -> Result<Address> {
        let (Some(registry), Some(implementation)) =
            (collection.tba_registry, collection.tba_implementation)
        else {
            return Err(EscrowError::RegistryNotConfigured(format!(
                "collection {:?} has no TBA registry/implementation",
                collection.address
            )));
        };

        let descriptor = self.registry.chain_descriptor(collection.network_id).await?;
        let params = TbaParams::new(
            registry,
            implementation,
            descriptor.chain_id,
            collection.address,
            token_id,
        );
        self.resolve(collection.network_id, params).await
    }

    /// 按 token 合约地址解析
    ///
    /// 已记录的集合使用其自身的配置；未记录的合约使用网络当前激活的注册表与实现。
    pub async fn resolve_for_token(
        &self,
        network_id: Uuid,
        token_contract: Address,
        token_id: U256,
    ) -> Result<Address> {
        if let Some(record) = self
            .contracts
            .find_by_address(network_id, token_contract)
            .await?
        {
            if record.contract_type == ContractType::Collection {
                return self.resolve_for_collection(&record, token_id).await;
            }
        }

        let registry = self
            .contracts
            .find_active(network_id, ContractType::TbaRegistry)
            .await?;
        let implementation = self
            .contracts
            .find_active(network_id, ContractType::TbaImplementation)
            .await?;
        let (Some(registry), Some(implementation)) = (registry, implementation) else {
            return Err(EscrowError::RegistryNotConfigured(format!(
                "network {} has no active TBA registry/implementation",
                network_id
            )));
        };

        let descriptor = self.registry.chain_descriptor(network_id).await?;
        let params = TbaParams::new(
            registry.address,
            implementation.address,
            descriptor.chain_id,
            token_contract,
            token_id,
        );
        self.resolve(network_id, params).await
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn evict_all(&self) {
        self.cache.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_call_encodes_selector_and_target() {
        let params = TbaParams::new(
            Address::from_low_u64_be(0x6551),
            Address::from_low_u64_be(0x1),
            1315,
            Address::from_low_u64_be(0xc011),
            U256::from(42),
        );
        let tx = account_call(&params).unwrap();
        let data = tx.data().unwrap();

        let selector = account_function().unwrap().short_signature();
        assert_eq!(&data[..4], &selector);
        // 4 字节 selector + 5 个 32 字节参数
        assert_eq!(data.len(), 4 + 5 * 32);
        assert_eq!(
            tx.to().and_then(|to| to.as_address()).copied(),
            Some(params.registry)
        );
    }

    #[test]
    fn test_salt_defaults_to_zero() {
        let params = TbaParams::new(
            Address::zero(),
            Address::zero(),
            1,
            Address::zero(),
            U256::one(),
        );
        assert_eq!(params.salt, U256::zero());
    }
}
