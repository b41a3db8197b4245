//! 网络注册表
//!
//! 网络配置 CRUD + 按 network id 缓存的链描述。缓存归实例所有，
//! 不会自动失效：更新网络配置后由调用方显式调用 [`NetworkRegistry::evict_descriptor`]。

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::{
        BlockchainNetwork, ChainDescriptor, NetworkFilter, NetworkLookup, NetworkPatch, NewNetwork,
    },
    error::{EscrowError, Result},
    infrastructure::rpc::{EvmRpc, RpcConnector},
    repository::NetworkRepository,
};

pub struct NetworkRegistry {
    repo: Arc<dyn NetworkRepository>,
    connector: Arc<dyn RpcConnector>,
    descriptors: RwLock<HashMap<Uuid, Arc<ChainDescriptor>>>,
}

impl NetworkRegistry {
    pub fn new(repo: Arc<dyn NetworkRepository>, connector: Arc<dyn RpcConnector>) -> Self {
        Self {
            repo,
            connector,
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// 注册网络：先查后建，chain id 或名称已存在返回 Conflict
    pub async fn create_network(&self, network: NewNetwork) -> Result<BlockchainNetwork> {
        network.validate()?;

        if let Some(existing) = self
            .repo
            .find(&NetworkLookup::ChainId(network.chain_id))
            .await?
        {
            return Err(EscrowError::Conflict(format!(
                "chain id {} already registered as {}",
                network.chain_id, existing.name
            )));
        }
        if self
            .repo
            .find(&NetworkLookup::Name(network.name.clone()))
            .await?
            .is_some()
        {
            return Err(EscrowError::Conflict(format!(
                "network name {} already registered",
                network.name
            )));
        }

        let created = self.repo.insert(network).await?;
        tracing::info!(
            network_id = %created.id,
            chain_id = created.chain_id,
            name = %created.name,
            "Network registered"
        );
        Ok(created)
    }

    pub async fn get_network(&self, lookup: &NetworkLookup) -> Result<BlockchainNetwork> {
        self.repo
            .find(lookup)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("network {}", lookup)))
    }

    pub async fn list_networks(&self, filter: &NetworkFilter) -> Result<Vec<BlockchainNetwork>> {
        self.repo.list(filter).await
    }

    /// 更新网络配置
    ///
    /// 不会清除描述缓存；若修改了 rpc_url 等字段，调用方需要 evict。
    pub async fn update_network(&self, id: Uuid, patch: &NetworkPatch) -> Result<BlockchainNetwork> {
        if let Some(rpc_url) = &patch.rpc_url {
            if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
                return Err(EscrowError::InvalidInput(format!(
                    "rpc url must be http(s): {}",
                    rpc_url
                )));
            }
        }
        let updated = self.repo.update(id, patch).await?;
        tracing::info!(network_id = %id, "Network updated, cached descriptor left untouched");
        Ok(updated)
    }

    pub async fn set_network_active(&self, id: Uuid, active: bool) -> Result<BlockchainNetwork> {
        let network = self.repo.set_active(id, active).await?;
        tracing::info!(network_id = %id, active, "Network status changed");
        Ok(network)
    }

    pub async fn delete_network(&self, id: Uuid) -> Result<()> {
        self.repo.delete(id).await?;
        // 记录已不存在，缓存项没有保留意义
        self.evict_descriptor(id).await;
        tracing::info!(network_id = %id, "Network deleted");
        Ok(())
    }

    /// 读穿缓存的链描述
    pub async fn chain_descriptor(&self, network_id: Uuid) -> Result<Arc<ChainDescriptor>> {
        if let Some(descriptor) = self.descriptors.read().await.get(&network_id) {
            return Ok(descriptor.clone());
        }

        let network = self.get_network(&NetworkLookup::Id(network_id)).await?;
        let descriptor = Arc::new(ChainDescriptor::from(&network));

        let mut descriptors = self.descriptors.write().await;
        // 并发读取时保留先写入的实例
        let cached = descriptors
            .entry(network_id)
            .or_insert_with(|| descriptor.clone())
            .clone();
        Ok(cached)
    }

    /// 返回描述和对应的 RPC 客户端；已停用的网络不允许发起链上交互
    pub async fn rpc_for(&self, network_id: Uuid) -> Result<(Arc<ChainDescriptor>, Arc<dyn EvmRpc>)> {
        let network = self.get_network(&NetworkLookup::Id(network_id)).await?;
        if !network.is_active {
            return Err(EscrowError::InvalidInput(format!(
                "network {} is inactive",
                network.name
            )));
        }

        let descriptor = self.chain_descriptor(network_id).await?;
        let rpc = self
            .connector
            .connect(&descriptor)
            .map_err(EscrowError::rpc)?;
        Ok((descriptor, rpc))
    }

    pub async fn evict_descriptor(&self, network_id: Uuid) -> bool {
        self.descriptors.write().await.remove(&network_id).is_some()
    }

    pub async fn clear_descriptors(&self) {
        self.descriptors.write().await.clear();
    }
}
