//! 对外暴露的托管操作
//!
//! 外部调用方（UI / 查询层）只能通过 [`EscrowService`] 访问本 crate，
//! 返回值中不包含私钥或密文信封。

use std::sync::Arc;

use ethers::types::{Address, Bytes, U256};
use uuid::Uuid;

use crate::{
    config::Config,
    domain::{
        BalanceSnapshot, BlockchainNetwork, ContractType, DeployedContractRecord, NetworkFilter,
        NetworkLookup, NetworkPatch, NewNetwork, WalletSummary,
    },
    error::{EscrowError, Result},
    infrastructure::{
        db,
        encryption::KeyVault,
        rpc::{EthersConnector, RpcConnector},
    },
    repository::{
        ContractRepository, EscrowWalletRepository, NetworkRepository, PgContractRepository,
        PgEscrowWalletRepository, PgNetworkRepository,
    },
    service::{
        contract_deployer::{CollectionParams, ContractDeployer},
        escrow_wallet_service::{BalanceResult, EscrowWalletService},
        network_registry::NetworkRegistry,
        tba_resolver::TbaResolver,
        transaction_submitter::TransactionSubmitter,
        wallet_locks::WalletLocks,
    },
};

/// 仓储集合，便于替换为进程内实现
pub struct Repositories {
    pub wallets: Arc<dyn EscrowWalletRepository>,
    pub networks: Arc<dyn NetworkRepository>,
    pub contracts: Arc<dyn ContractRepository>,
}

pub struct EscrowService {
    wallets: EscrowWalletService,
    registry: Arc<NetworkRegistry>,
    deployer: ContractDeployer,
    resolver: TbaResolver,
}

impl EscrowService {
    pub fn new(
        config: &Config,
        vault: KeyVault,
        repos: Repositories,
        connector: Arc<dyn RpcConnector>,
    ) -> Self {
        let vault = Arc::new(vault);
        let registry = Arc::new(NetworkRegistry::new(repos.networks, connector));
        let locks = Arc::new(WalletLocks::new());

        let submitter = Arc::new(TransactionSubmitter::new(
            repos.wallets.clone(),
            vault.clone(),
            registry.clone(),
            locks,
            &config.chain,
        ));

        Self {
            wallets: EscrowWalletService::new(
                repos.wallets,
                vault,
                registry.clone(),
                config.chain.balance_fan_out,
            ),
            deployer: ContractDeployer::new(submitter, repos.contracts.clone()),
            resolver: TbaResolver::new(registry.clone(), repos.contracts),
            registry,
        }
    }

    /// 生产装配：PostgreSQL 仓储 + ethers RPC + 环境变量中的主密钥
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = db::init_pool(&config.database).await?;
        let vault = KeyVault::from_env(&config.vault.key_env)?;
        let repos = Repositories {
            wallets: Arc::new(PgEscrowWalletRepository::new(pool.clone())),
            networks: Arc::new(PgNetworkRepository::new(pool.clone())),
            contracts: Arc::new(PgContractRepository::new(pool)),
        };
        let connector = Arc::new(EthersConnector::new(config.chain.rpc_timeout()));

        tracing::info!("Escrow service initialized");
        Ok(Self::new(config, vault, repos, connector))
    }

    // ============ 托管钱包 ============

    pub async fn register_wallet(
        &self,
        private_key: &str,
        label: Option<String>,
    ) -> Result<WalletSummary> {
        Ok(self
            .wallets
            .register_wallet(private_key, label)
            .await?
            .summary())
    }

    pub async fn get_wallet(&self, address: Address) -> Result<WalletSummary> {
        Ok(self.wallets.get_wallet(address).await?.summary())
    }

    pub async fn list_wallets(&self, active_only: bool) -> Result<Vec<WalletSummary>> {
        Ok(self
            .wallets
            .list_wallets(active_only)
            .await?
            .iter()
            .map(|w| w.summary())
            .collect())
    }

    pub async fn activate_wallet(&self, address: Address) -> Result<WalletSummary> {
        Ok(self.wallets.activate_wallet(address).await?.summary())
    }

    pub async fn deactivate_wallet(&self, address: Address) -> Result<WalletSummary> {
        Ok(self.wallets.deactivate_wallet(address).await?.summary())
    }

    pub async fn set_default_wallet(&self, address: Address) -> Result<WalletSummary> {
        Ok(self.wallets.set_default_wallet(address).await?.summary())
    }

    pub async fn default_wallet(&self) -> Result<Option<WalletSummary>> {
        Ok(self.wallets.default_wallet().await?.map(|w| w.summary()))
    }

    pub async fn wallet_balance(&self, network_id: Uuid, address: Address) -> Result<BalanceSnapshot> {
        self.wallets.wallet_balance(network_id, address).await
    }

    pub async fn batch_balances(
        &self,
        network_id: Uuid,
        addresses: &[Address],
    ) -> Result<Vec<BalanceResult>> {
        self.wallets.batch_balances(network_id, addresses).await
    }

    pub fn verify_ownership(&self, address: Address, message: &str, signature: &str) -> bool {
        self.wallets.verify_ownership(address, message, signature)
    }

    // ============ 网络 ============

    pub async fn create_network(&self, network: NewNetwork) -> Result<BlockchainNetwork> {
        self.registry.create_network(network).await
    }

    pub async fn get_network(
        &self,
        id: Option<Uuid>,
        name: Option<String>,
        chain_id: Option<u64>,
    ) -> Result<BlockchainNetwork> {
        let lookup = NetworkLookup::from_parts(id, name, chain_id)?;
        self.registry.get_network(&lookup).await
    }

    pub async fn list_networks(&self, filter: &NetworkFilter) -> Result<Vec<BlockchainNetwork>> {
        self.registry.list_networks(filter).await
    }

    /// 更新网络并清除该网络的链描述缓存
    pub async fn update_network(&self, id: Uuid, patch: &NetworkPatch) -> Result<BlockchainNetwork> {
        let network = self.registry.update_network(id, patch).await?;
        self.registry.evict_descriptor(id).await;
        Ok(network)
    }

    pub async fn set_network_active(&self, id: Uuid, active: bool) -> Result<BlockchainNetwork> {
        self.registry.set_network_active(id, active).await
    }

    pub async fn delete_network(&self, id: Uuid) -> Result<()> {
        self.registry.delete_network(id).await
    }

    // ============ 合约部署 ============

    pub async fn deploy_factory(
        &self,
        network_id: Uuid,
        deployer: Option<Address>,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        let deployer = self.deployer_or_default(deployer).await?;
        self.deployer
            .deploy_factory(network_id, deployer, bytecode, attempt)
            .await
    }

    pub async fn deploy_collection(
        &self,
        network_id: Uuid,
        deployer: Option<Address>,
        factory: Address,
        params: CollectionParams,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        let deployer = self.deployer_or_default(deployer).await?;
        self.deployer
            .deploy_collection(network_id, deployer, factory, params, attempt)
            .await
    }

    pub async fn deploy_tba_registry(
        &self,
        network_id: Uuid,
        deployer: Option<Address>,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        let deployer = self.deployer_or_default(deployer).await?;
        let record = self
            .deployer
            .deploy_tba_registry(network_id, deployer, bytecode, attempt)
            .await?;
        self.resolver.evict_all().await;
        Ok(record)
    }

    pub async fn deploy_tba_implementation(
        &self,
        network_id: Uuid,
        deployer: Option<Address>,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        let deployer = self.deployer_or_default(deployer).await?;
        let record = self
            .deployer
            .deploy_tba_implementation(network_id, deployer, bytecode, attempt)
            .await?;
        self.resolver.evict_all().await;
        Ok(record)
    }

    pub async fn activate_tba_contract(&self, record_id: Uuid) -> Result<DeployedContractRecord> {
        let record = self.deployer.activate_tba_contract(record_id).await?;
        self.resolver.evict_all().await;
        Ok(record)
    }

    pub async fn active_tba_contract(
        &self,
        network_id: Uuid,
        contract_type: ContractType,
    ) -> Result<Option<DeployedContractRecord>> {
        self.deployer
            .active_tba_contract(network_id, contract_type)
            .await
    }

    pub async fn list_contracts(
        &self,
        network_id: Uuid,
        contract_type: Option<ContractType>,
    ) -> Result<Vec<DeployedContractRecord>> {
        self.deployer.list_contracts(network_id, contract_type).await
    }

    // ============ TBA ============

    pub async fn resolve_tba(
        &self,
        network_id: Uuid,
        token_contract: Address,
        token_id: U256,
    ) -> Result<Address> {
        self.resolver
            .resolve_for_token(network_id, token_contract, token_id)
            .await
    }

    pub async fn resolve_tba_for_collection(
        &self,
        collection_id: Uuid,
        token_id: U256,
    ) -> Result<Address> {
        let collection = self.deployer.find_contract(collection_id).await?;
        if collection.contract_type != ContractType::Collection {
            return Err(EscrowError::InvalidInput(format!(
                "contract record {} is a {}, not a collection",
                collection_id, collection.contract_type
            )));
        }
        self.resolver
            .resolve_for_collection(&collection, token_id)
            .await
    }

    /// 未指定部署钱包时使用默认托管钱包
    async fn deployer_or_default(&self, deployer: Option<Address>) -> Result<Address> {
        match deployer {
            Some(address) => Ok(address),
            None => self
                .wallets
                .default_wallet()
                .await?
                .map(|w| w.address)
                .ok_or_else(|| {
                    EscrowError::AccountUnavailable("no default escrow wallet configured".into())
                }),
        }
    }
}
