//! 进程内 Repository 实现
//!
//! 每个存储用一把写锁覆盖整个多行更新，与 PostgreSQL 实现的事务语义一致。

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ContractRepository, EscrowWalletRepository, NetworkRepository};
use crate::{
    domain::{
        BalanceSnapshot, BlockchainNetwork, ContractType, DeployedContractRecord, EscrowWallet,
        NetworkFilter, NetworkLookup, NetworkPatch, NewContractRecord, NewEscrowWallet, NewNetwork,
    },
    error::{EscrowError, Result},
};

#[derive(Default)]
pub struct InMemoryEscrowWalletRepository {
    wallets: RwLock<Vec<EscrowWallet>>,
}

impl InMemoryEscrowWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.wallets.read().await.len()
    }
}

#[async_trait]
impl EscrowWalletRepository for InMemoryEscrowWalletRepository {
    async fn find_by_address(&self, address: Address) -> Result<Option<EscrowWallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.iter().find(|w| w.address == address).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<EscrowWallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets
            .iter()
            .filter(|w| !active_only || w.is_active)
            .cloned()
            .collect())
    }

    async fn insert(&self, wallet: NewEscrowWallet) -> Result<EscrowWallet> {
        let mut wallets = self.wallets.write().await;
        if wallets.iter().any(|w| w.address == wallet.address) {
            return Err(EscrowError::Conflict(format!(
                "escrow wallet {:?} already exists",
                wallet.address
            )));
        }

        let now = Utc::now();
        let record = EscrowWallet {
            id: Uuid::new_v4(),
            address: wallet.address,
            label: wallet.label,
            envelope: wallet.envelope,
            is_active: true,
            is_default: false,
            balance: None,
            created_at: now,
            updated_at: now,
        };
        wallets.push(record.clone());
        Ok(record)
    }

    async fn set_active(&self, address: Address, active: bool) -> Result<EscrowWallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .iter_mut()
            .find(|w| w.address == address)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow wallet {:?}", address)))?;
        wallet.is_active = active;
        if !active {
            wallet.is_default = false;
        }
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn set_default(&self, address: Address) -> Result<EscrowWallet> {
        let mut wallets = self.wallets.write().await;
        if !wallets.iter().any(|w| w.address == address && w.is_active) {
            return Err(EscrowError::NotFound(format!(
                "active escrow wallet {:?}",
                address
            )));
        }

        let now = Utc::now();
        let mut selected = None;
        for wallet in wallets.iter_mut() {
            let is_target = wallet.address == address;
            if wallet.is_default != is_target {
                wallet.is_default = is_target;
                wallet.updated_at = now;
            }
            if is_target {
                selected = Some(wallet.clone());
            }
        }
        selected.ok_or_else(|| EscrowError::NotFound(format!("escrow wallet {:?}", address)))
    }

    async fn find_default(&self) -> Result<Option<EscrowWallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.iter().find(|w| w.is_default).cloned())
    }

    async fn update_balance(&self, address: Address, snapshot: &BalanceSnapshot) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .iter_mut()
            .find(|w| w.address == address)
            .ok_or_else(|| EscrowError::NotFound(format!("escrow wallet {:?}", address)))?;
        wallet.balance = Some(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNetworkRepository {
    networks: RwLock<Vec<BlockchainNetwork>>,
}

impl InMemoryNetworkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkRepository for InMemoryNetworkRepository {
    async fn find(&self, lookup: &NetworkLookup) -> Result<Option<BlockchainNetwork>> {
        let networks = self.networks.read().await;
        Ok(networks.iter().find(|n| lookup.matches(n)).cloned())
    }

    async fn list(&self, filter: &NetworkFilter) -> Result<Vec<BlockchainNetwork>> {
        let networks = self.networks.read().await;
        let mut matched: Vec<_> = networks
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        matched.sort_by_key(|n| n.chain_id);
        Ok(matched)
    }

    async fn insert(&self, network: NewNetwork) -> Result<BlockchainNetwork> {
        let mut networks = self.networks.write().await;
        if networks
            .iter()
            .any(|n| n.chain_id == network.chain_id || n.name == network.name)
        {
            return Err(EscrowError::Conflict(format!(
                "network {} (chain id {}) already exists",
                network.name, network.chain_id
            )));
        }

        let now = Utc::now();
        let record = BlockchainNetwork {
            id: Uuid::new_v4(),
            name: network.name,
            chain_id: network.chain_id,
            rpc_url: network.rpc_url,
            explorer_url: network.explorer_url,
            native_symbol: network.native_symbol,
            is_testnet: network.is_testnet,
            is_active: true,
            multicall_address: network.multicall_address,
            created_at: now,
            updated_at: now,
        };
        networks.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, patch: &NetworkPatch) -> Result<BlockchainNetwork> {
        let mut networks = self.networks.write().await;
        if let Some(name) = &patch.name {
            if networks.iter().any(|n| n.id != id && &n.name == name) {
                return Err(EscrowError::Conflict(format!("network {} already exists", name)));
            }
        }
        let network = networks
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| EscrowError::NotFound(format!("network {}", id)))?;
        patch.apply(network);
        Ok(network.clone())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<BlockchainNetwork> {
        let mut networks = self.networks.write().await;
        let network = networks
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| EscrowError::NotFound(format!("network {}", id)))?;
        network.is_active = active;
        network.updated_at = Utc::now();
        Ok(network.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut networks = self.networks.write().await;
        let before = networks.len();
        networks.retain(|n| n.id != id);
        if networks.len() == before {
            return Err(EscrowError::NotFound(format!("network {}", id)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryContractRepository {
    records: RwLock<Vec<DeployedContractRecord>>,
}

impl InMemoryContractRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn deactivate_others(
    records: &mut [DeployedContractRecord],
    network_id: Uuid,
    contract_type: ContractType,
    keep: Option<Uuid>,
) {
    for record in records.iter_mut().filter(|r| {
        r.network_id == network_id
            && r.contract_type == contract_type
            && r.is_active
            && Some(r.id) != keep
    }) {
        record.is_active = false;
    }
}

#[async_trait]
impl ContractRepository for InMemoryContractRepository {
    async fn insert(&self, record: NewContractRecord) -> Result<DeployedContractRecord> {
        let mut records = self.records.write().await;
        if records
            .iter()
            .any(|r| r.network_id == record.network_id && r.address == record.address)
        {
            return Err(EscrowError::Conflict(format!(
                "contract {:?} already recorded",
                record.address
            )));
        }

        if record.contract_type.is_tba() {
            deactivate_others(&mut records, record.network_id, record.contract_type, None);
        }

        let stored = DeployedContractRecord {
            id: Uuid::new_v4(),
            network_id: record.network_id,
            contract_type: record.contract_type,
            address: record.address,
            tx_hash: record.tx_hash,
            deployer: record.deployer,
            is_active: true,
            name: record.name,
            symbol: record.symbol,
            tba_registry: record.tba_registry,
            tba_implementation: record.tba_implementation,
            created_at: Utc::now(),
        };
        records.push(stored.clone());
        Ok(stored)
    }

    async fn activate(&self, id: Uuid) -> Result<DeployedContractRecord> {
        let mut records = self.records.write().await;
        let (network_id, contract_type) = records
            .iter()
            .find(|r| r.id == id)
            .map(|r| (r.network_id, r.contract_type))
            .ok_or_else(|| EscrowError::NotFound(format!("contract record {}", id)))?;

        if !contract_type.is_tba() {
            return Err(EscrowError::InvalidInput(format!(
                "only TBA contracts can be re-activated, got {}",
                contract_type
            )));
        }

        deactivate_others(&mut records, network_id, contract_type, Some(id));
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EscrowError::NotFound(format!("contract record {}", id)))?;
        record.is_active = true;
        Ok(record.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DeployedContractRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_address(
        &self,
        network_id: Uuid,
        address: Address,
    ) -> Result<Option<DeployedContractRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.network_id == network_id && r.address == address)
            .cloned())
    }

    async fn find_active(
        &self,
        network_id: Uuid,
        contract_type: ContractType,
    ) -> Result<Option<DeployedContractRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.network_id == network_id && r.contract_type == contract_type && r.is_active)
            .cloned())
    }

    async fn list(
        &self,
        network_id: Uuid,
        contract_type: Option<ContractType>,
    ) -> Result<Vec<DeployedContractRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| {
                r.network_id == network_id && contract_type.map_or(true, |t| r.contract_type == t)
            })
            .cloned()
            .collect())
    }
}
