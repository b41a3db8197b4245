//! 测试辅助模块
//! 进程内仓储 + 可编排的 RPC 替身，无需节点或数据库

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    abi::{encode, Token},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Log, TransactionReceipt, H256,
        U256, U64,
    },
    utils::keccak256,
};
use ironescrow::{
    config::{ChainConfig, Config, DatabaseConfig, LoggingConfig, VaultConfig},
    domain::{BlockchainNetwork, ChainDescriptor, NewNetwork},
    infrastructure::{
        encryption::{EncryptionKey, KeyVault},
        rpc::{BroadcastRejected, EvmRpc, RpcConnector},
    },
    repository::{
        ContractRepository, EscrowWalletRepository, InMemoryContractRepository,
        InMemoryEscrowWalletRepository, InMemoryNetworkRepository, NetworkRepository,
    },
    service::{
        ContractDeployer, DeploymentEvent, EscrowService, EscrowWalletService, NetworkRegistry,
        Repositories, TbaResolver, TransactionSubmitter, WalletLocks,
    },
};

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const TEST_KEY_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";
pub const OTHER_KEY: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

/// RPC 替身的可编排状态
#[derive(Debug, Clone)]
pub struct MockState {
    pub chain_id: u64,
    pub gas_estimate: U256,
    pub gas_price: U256,
    /// None 表示 legacy 网络
    pub base_fee: Option<U256>,
    pub fail_fee_queries: bool,
    /// 节点明确拒绝广播
    pub fail_broadcast: bool,
    /// 节点接收了交易但响应丢失
    pub accept_then_error: bool,
    /// 响应丢失且交易也未送达
    pub drop_broadcast: bool,
    /// 广播后永不出块，用于确认超时
    pub withhold_receipts: bool,
    pub receipt_status: u64,
    pub head_block: u64,
    pub contract_address: Option<Address>,
    pub receipt_logs: Vec<Log>,
    pub balances: HashMap<Address, U256>,
    pub failing_balances: HashSet<Address>,
    pub balance_delays: HashMap<Address, Duration>,
    /// transaction_count 内的人为延迟，放大并发竞争窗口
    pub nonce_delay: Duration,
    pub sent: Vec<H256>,
    /// 交易哈希 → 打包区块（广播时的链头）
    pub mined_at: HashMap<H256, u64>,
    pub call_count: usize,
    pub in_flight_nonces: usize,
    pub max_in_flight_nonces: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            chain_id: 1315,
            gas_estimate: U256::from(100_000),
            gas_price: U256::from(10_000_000_000u64),
            base_fee: Some(U256::from(5_000_000_000u64)),
            fail_fee_queries: false,
            fail_broadcast: false,
            accept_then_error: false,
            drop_broadcast: false,
            withhold_receipts: false,
            receipt_status: 1,
            head_block: 100,
            contract_address: None,
            receipt_logs: Vec::new(),
            balances: HashMap::new(),
            failing_balances: HashSet::new(),
            balance_delays: HashMap::new(),
            nonce_delay: Duration::ZERO,
            sent: Vec::new(),
            mined_at: HashMap::new(),
            call_count: 0,
            in_flight_nonces: 0,
            max_in_flight_nonces: 0,
        }
    }
}

#[derive(Default)]
pub struct MockRpc {
    state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn configure(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn snapshot(&self) -> MockState {
        self.state.lock().unwrap().clone()
    }

    fn fee_query(&self) -> Result<MockState> {
        let state = self.snapshot();
        if state.fail_fee_queries {
            return Err(anyhow!("connection refused"));
        }
        Ok(state)
    }
}

/// 由调用数据确定性派生的账户地址
pub fn derived_account(to: Address, data: &[u8]) -> Address {
    let mut input = to.as_bytes().to_vec();
    input.extend_from_slice(data);
    Address::from_slice(&keccak256(input)[12..])
}

#[async_trait]
impl EvmRpc for MockRpc {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.snapshot().chain_id)
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256> {
        Ok(self.fee_query()?.gas_estimate)
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.fee_query()?.gas_price)
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>> {
        Ok(self.fee_query()?.base_fee)
    }

    async fn transaction_count(&self, _address: Address) -> Result<U256> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.in_flight_nonces += 1;
            state.max_in_flight_nonces = state.max_in_flight_nonces.max(state.in_flight_nonces);
            state.nonce_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(U256::from(self.snapshot().sent.len()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        state.in_flight_nonces = state.in_flight_nonces.saturating_sub(1);
        if state.fail_broadcast {
            return Err(BroadcastRejected {
                code: -32000,
                message: "nonce too low".into(),
            }
            .into());
        }
        if state.drop_broadcast {
            return Err(anyhow!("eth_sendRawTransaction timed out"));
        }
        let hash = H256::from(keccak256(raw.as_ref()));
        let head = state.head_block;
        state.sent.push(hash);
        state.mined_at.insert(hash, head);
        if state.accept_then_error {
            return Err(anyhow!("eth_sendRawTransaction timed out"));
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let state = self.snapshot();
        if state.withhold_receipts {
            return Ok(None);
        }
        let Some(mined_at) = state.mined_at.get(&tx_hash).copied() else {
            return Ok(None);
        };

        let logs = state
            .receipt_logs
            .iter()
            .cloned()
            .map(|mut log| {
                log.transaction_hash = Some(tx_hash);
                log
            })
            .collect();

        Ok(Some(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(mined_at)),
            status: Some(U64::from(state.receipt_status)),
            contract_address: state.contract_address,
            logs,
            ..Default::default()
        }))
    }

    async fn block_number(&self) -> Result<U64> {
        Ok(U64::from(self.snapshot().head_block))
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        let to = tx
            .to()
            .and_then(|to| to.as_address())
            .copied()
            .ok_or_else(|| anyhow!("call without target"))?;
        let data = tx.data().cloned().unwrap_or_default();

        self.state.lock().unwrap().call_count += 1;
        Ok(encode(&[Token::Address(derived_account(to, &data))]).into())
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let state = self.snapshot();
        if let Some(delay) = state.balance_delays.get(&address) {
            tokio::time::sleep(*delay).await;
        }
        if state.failing_balances.contains(&address) {
            return Err(anyhow!("balance query timed out"));
        }
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }
}

pub struct MockConnector {
    rpc: Arc<MockRpc>,
}

impl RpcConnector for MockConnector {
    fn connect(&self, _descriptor: &ChainDescriptor) -> Result<Arc<dyn EvmRpc>> {
        Ok(self.rpc.clone())
    }
}

pub fn test_config() -> Config {
    Config {
        database: DatabaseConfig::default(),
        logging: LoggingConfig::default(),
        vault: VaultConfig::default(),
        chain: ChainConfig {
            rpc_timeout_secs: 5,
            confirmation_timeout_secs: 1,
            receipt_poll_interval_ms: 10,
            default_confirmations: 1,
            balance_fan_out: 4,
            per_item_gas_floor: 200_000,
            fallback_gas_price_gwei: 20,
        },
    }
}

pub fn test_vault() -> KeyVault {
    KeyVault::new(EncryptionKey::new([7u8; 32]))
}

pub fn aeneid() -> NewNetwork {
    NewNetwork {
        name: "Story Aeneid".into(),
        chain_id: 1315,
        rpc_url: "https://aeneid.storyrpc.io".into(),
        explorer_url: Some("https://aeneid.storyscan.io".into()),
        native_symbol: "IP".into(),
        is_testnet: true,
        multicall_address: None,
    }
}

/// 组件级测试夹具，所有组件共享同一组仓储与 RPC 替身
pub struct Harness {
    pub rpc: Arc<MockRpc>,
    pub wallets_repo: Arc<InMemoryEscrowWalletRepository>,
    pub networks_repo: Arc<InMemoryNetworkRepository>,
    pub contracts_repo: Arc<InMemoryContractRepository>,
    pub registry: Arc<NetworkRegistry>,
    pub wallets: EscrowWalletService,
    pub submitter: Arc<TransactionSubmitter>,
    pub deployer: ContractDeployer,
    pub resolver: TbaResolver,
    pub network: BlockchainNetwork,
}

impl Harness {
    pub async fn new() -> Self {
        let config = test_config();
        let rpc = MockRpc::new();
        let wallets_repo = Arc::new(InMemoryEscrowWalletRepository::new());
        let networks_repo = Arc::new(InMemoryNetworkRepository::new());
        let contracts_repo = Arc::new(InMemoryContractRepository::new());
        let vault = Arc::new(test_vault());

        let registry = Arc::new(NetworkRegistry::new(
            networks_repo.clone() as Arc<dyn NetworkRepository>,
            Arc::new(MockConnector { rpc: rpc.clone() }),
        ));
        let network = registry.create_network(aeneid()).await.unwrap();

        let wallets = EscrowWalletService::new(
            wallets_repo.clone() as Arc<dyn EscrowWalletRepository>,
            vault.clone(),
            registry.clone(),
            config.chain.balance_fan_out,
        );
        let submitter = Arc::new(TransactionSubmitter::new(
            wallets_repo.clone() as Arc<dyn EscrowWalletRepository>,
            vault,
            registry.clone(),
            Arc::new(WalletLocks::new()),
            &config.chain,
        ));
        let deployer = ContractDeployer::new(
            submitter.clone(),
            contracts_repo.clone() as Arc<dyn ContractRepository>,
        );
        let resolver = TbaResolver::new(
            registry.clone(),
            contracts_repo.clone() as Arc<dyn ContractRepository>,
        );

        Self {
            rpc,
            wallets_repo,
            networks_repo,
            contracts_repo,
            registry,
            wallets,
            submitter,
            deployer,
            resolver,
            network,
        }
    }

    /// 注册测试钱包并返回地址
    pub async fn funded_wallet(&self) -> Address {
        self.wallets
            .register_wallet(TEST_KEY, Some("ops".into()))
            .await
            .unwrap()
            .address
    }
}

/// 通过门面组装的服务，与 RPC 替身共享
pub async fn escrow_service() -> (EscrowService, Arc<MockRpc>) {
    let rpc = MockRpc::new();
    let repos = Repositories {
        wallets: Arc::new(InMemoryEscrowWalletRepository::new()),
        networks: Arc::new(InMemoryNetworkRepository::new()),
        contracts: Arc::new(InMemoryContractRepository::new()),
    };
    let service = EscrowService::new(
        &test_config(),
        test_vault(),
        repos,
        Arc::new(MockConnector { rpc: rpc.clone() }),
    );
    (service, rpc)
}

/// 工厂发出的 CollectionDeployed 日志
pub fn collection_deployed_log(factory: Address, collection: Address, owner: Address) -> Log {
    let event = DeploymentEvent::collection_deployed().unwrap();
    Log {
        address: factory,
        topics: vec![event.topic0(), H256::from(collection), H256::from(owner)],
        data: encode(&[Token::String("Genesis".into()), Token::String("GEN".into())]).into(),
        ..Default::default()
    }
}
