//! 合约部署
//!
//! 直接 CREATE 部署以回执中的 contractAddress 为准；经工厂合约部署时，
//! 从回执日志中按 (工厂地址, topic0) 过滤出目标事件再解码。

use std::sync::Arc;

use ethers::{
    abi::{self, Abi, Event, RawLog, Token},
    types::{Address, Bytes, TransactionReceipt, H256},
};
use uuid::Uuid;

use crate::{
    domain::{ContractType, DeployedContractRecord, NewContractRecord},
    error::{EscrowError, Result},
    infrastructure::log_redact::redact_address,
    metrics,
    repository::ContractRepository,
    service::transaction_submitter::{SubmitRequest, SubmittedTransaction, TransactionSubmitter},
};

const COLLECTION_FACTORY_ABI: &[&str] = &[
    "event CollectionDeployed(address indexed collection, address indexed owner, string name, string symbol)",
    "function deployCollection(string name, string symbol, string contractURI, address owner) returns (address)",
];

fn collection_factory_abi() -> Result<Abi> {
    abi::parse_abi(COLLECTION_FACTORY_ABI)
        .map_err(|e| EscrowError::InvalidInput(format!("invalid factory ABI: {}", e)))
}

/// 工厂部署后用于还原地址的事件
#[derive(Debug, Clone)]
pub struct DeploymentEvent {
    pub event: Event,
    /// 事件中承载新合约地址的参数名
    pub address_param: String,
}

impl DeploymentEvent {
    pub fn new(event: Event, address_param: impl Into<String>) -> Self {
        Self {
            event,
            address_param: address_param.into(),
        }
    }

    pub fn collection_deployed() -> Result<Self> {
        let abi = collection_factory_abi()?;
        let event = abi
            .event("CollectionDeployed")
            .map_err(|e| EscrowError::InvalidInput(e.to_string()))?
            .clone();
        Ok(Self::new(event, "collection"))
    }

    pub fn topic0(&self) -> H256 {
        self.event.signature()
    }
}

/// 从回执日志还原部署地址
///
/// 只考虑 `emitter` 发出且 topic0 匹配的日志；匹配日志解码失败直接报错，不跳过。
pub fn extract_event_address(
    receipt: &TransactionReceipt,
    emitter: Address,
    target: &DeploymentEvent,
) -> Result<Address> {
    let tx_hash = format!("{:?}", receipt.transaction_hash);
    let topic0 = target.topic0();

    let Some(log) = receipt
        .logs
        .iter()
        .find(|log| log.address == emitter && log.topics.first() == Some(&topic0))
    else {
        return Err(EscrowError::DeploymentEventNotFound {
            tx_hash,
            event: target.event.name.clone(),
        });
    };

    let decode_error = |reason: String| EscrowError::EventDecode {
        tx_hash: tx_hash.clone(),
        event: target.event.name.clone(),
        reason,
    };

    let parsed = target
        .event
        .parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })
        .map_err(|e| decode_error(e.to_string()))?;

    parsed
        .params
        .into_iter()
        .find(|param| param.name == target.address_param)
        .and_then(|param| param.value.into_address())
        .ok_or_else(|| decode_error(format!("missing address parameter {}", target.address_param)))
}

/// NFT 集合部署参数
#[derive(Debug, Clone)]
pub struct CollectionParams {
    pub name: String,
    pub symbol: String,
    pub contract_uri: String,
    pub owner: Address,
}

/// 经工厂调用部署
#[derive(Debug, Clone)]
pub struct FactoryDeployment {
    pub network_id: Uuid,
    pub deployer: Address,
    pub factory: Address,
    pub calldata: Bytes,
    pub event: DeploymentEvent,
    pub contract_type: ContractType,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub attempt: u32,
}

pub struct ContractDeployer {
    submitter: Arc<TransactionSubmitter>,
    contracts: Arc<dyn ContractRepository>,
}

impl ContractDeployer {
    pub fn new(submitter: Arc<TransactionSubmitter>, contracts: Arc<dyn ContractRepository>) -> Self {
        Self {
            submitter,
            contracts,
        }
    }

    /// 直接 CREATE 部署并记录
    pub async fn deploy_contract(
        &self,
        network_id: Uuid,
        deployer: Address,
        contract_type: ContractType,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        let request = SubmitRequest::deploy(network_id, deployer, bytecode).with_attempt(attempt);
        let submitted = self.submitter.submit(request).await?;

        let address = submitted
            .contract_address()
            .ok_or_else(|| EscrowError::ReceiptMissingAddress {
                tx_hash: format!("{:?}", submitted.tx_hash),
            })?;

        let record = NewContractRecord {
            network_id,
            contract_type,
            address,
            tx_hash: submitted.tx_hash,
            deployer,
            name: None,
            symbol: None,
            tba_registry: None,
            tba_implementation: None,
        };
        self.persist(record, &submitted).await
    }

    pub async fn deploy_factory(
        &self,
        network_id: Uuid,
        deployer: Address,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        self.deploy_contract(network_id, deployer, ContractType::Factory, bytecode, attempt)
            .await
    }

    /// 部署 TBA 注册表，新记录成为该网络唯一激活的注册表
    pub async fn deploy_tba_registry(
        &self,
        network_id: Uuid,
        deployer: Address,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        self.deploy_contract(
            network_id,
            deployer,
            ContractType::TbaRegistry,
            bytecode,
            attempt,
        )
        .await
    }

    pub async fn deploy_tba_implementation(
        &self,
        network_id: Uuid,
        deployer: Address,
        bytecode: Bytes,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        self.deploy_contract(
            network_id,
            deployer,
            ContractType::TbaImplementation,
            bytecode,
            attempt,
        )
        .await
    }

    /// 调用工厂合约部署，并从事件日志还原地址
    pub async fn deploy_via_factory(
        &self,
        deployment: FactoryDeployment,
    ) -> Result<DeployedContractRecord> {
        let request = SubmitRequest::call(
            deployment.network_id,
            deployment.deployer,
            deployment.factory,
            deployment.calldata.clone(),
        )
        .with_attempt(deployment.attempt);
        let submitted = self.submitter.submit(request).await?;

        let address = match extract_event_address(
            &submitted.receipt,
            deployment.factory,
            &deployment.event,
        ) {
            Ok(address) => address,
            Err(err) => {
                if matches!(err, EscrowError::DeploymentEventNotFound { .. }) {
                    metrics::inc_deployment_divergence();
                }
                let chain_id = self.chain_id(deployment.network_id).await;
                tracing::error!(
                    chain_id = ?chain_id,
                    tx_hash = ?submitted.tx_hash,
                    factory = %redact_address(&deployment.factory),
                    event = %deployment.event.event.name,
                    error = %err,
                    "Factory deployment confirmed on-chain but address could not be recovered, manual reconciliation required"
                );
                return Err(err);
            }
        };

        let (tba_registry, tba_implementation) = if deployment.contract_type
            == ContractType::Collection
        {
            self.active_tba_pair(deployment.network_id).await?
        } else {
            (None, None)
        };

        let record = NewContractRecord {
            network_id: deployment.network_id,
            contract_type: deployment.contract_type,
            address,
            tx_hash: submitted.tx_hash,
            deployer: deployment.deployer,
            name: deployment.name,
            symbol: deployment.symbol,
            tba_registry,
            tba_implementation,
        };
        self.persist(record, &submitted).await
    }

    /// 通过工厂的 deployCollection 部署 NFT 集合
    pub async fn deploy_collection(
        &self,
        network_id: Uuid,
        deployer: Address,
        factory: Address,
        params: CollectionParams,
        attempt: u32,
    ) -> Result<DeployedContractRecord> {
        if params.name.trim().is_empty() || params.symbol.trim().is_empty() {
            return Err(EscrowError::InvalidInput(
                "collection name and symbol are required".into(),
            ));
        }

        let abi = collection_factory_abi()?;
        let function = abi
            .function("deployCollection")
            .map_err(|e| EscrowError::InvalidInput(e.to_string()))?;
        let calldata = function
            .encode_input(&[
                Token::String(params.name.clone()),
                Token::String(params.symbol.clone()),
                Token::String(params.contract_uri.clone()),
                Token::Address(params.owner),
            ])
            .map_err(|e| EscrowError::InvalidInput(format!("failed to encode call: {}", e)))?;

        self.deploy_via_factory(FactoryDeployment {
            network_id,
            deployer,
            factory,
            calldata: calldata.into(),
            event: DeploymentEvent::collection_deployed()?,
            contract_type: ContractType::Collection,
            name: Some(params.name),
            symbol: Some(params.symbol),
            attempt,
        })
        .await
    }

    /// 重新激活历史 TBA 记录
    pub async fn activate_tba_contract(&self, record_id: Uuid) -> Result<DeployedContractRecord> {
        let record = self.contracts.activate(record_id).await?;
        tracing::info!(
            network_id = %record.network_id,
            contract_type = %record.contract_type,
            address = %redact_address(&record.address),
            "TBA contract activated"
        );
        Ok(record)
    }

    pub async fn active_tba_contract(
        &self,
        network_id: Uuid,
        contract_type: ContractType,
    ) -> Result<Option<DeployedContractRecord>> {
        if !contract_type.is_tba() {
            return Err(EscrowError::InvalidInput(format!(
                "{} is not a TBA contract type",
                contract_type
            )));
        }
        self.contracts.find_active(network_id, contract_type).await
    }

    pub async fn list_contracts(
        &self,
        network_id: Uuid,
        contract_type: Option<ContractType>,
    ) -> Result<Vec<DeployedContractRecord>> {
        self.contracts.list(network_id, contract_type).await
    }

    pub async fn find_contract(&self, record_id: Uuid) -> Result<DeployedContractRecord> {
        self.contracts
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("contract record {}", record_id)))
    }

    async fn active_tba_pair(&self, network_id: Uuid) -> Result<(Option<Address>, Option<Address>)> {
        let registry = self
            .contracts
            .find_active(network_id, ContractType::TbaRegistry)
            .await?;
        let implementation = self
            .contracts
            .find_active(network_id, ContractType::TbaImplementation)
            .await?;
        Ok((
            registry.map(|r| r.address),
            implementation.map(|r| r.address),
        ))
    }

    /// 写入记录；失败时链上状态已确定，错误携带交易哈希与地址便于人工补录
    async fn persist(
        &self,
        record: NewContractRecord,
        submitted: &SubmittedTransaction,
    ) -> Result<DeployedContractRecord> {
        let network_id = record.network_id;
        let address = record.address;
        let contract_type = record.contract_type;

        match self.contracts.insert(record).await {
            Ok(stored) => {
                metrics::inc_deployment();
                tracing::info!(
                    network_id = %network_id,
                    contract_type = %contract_type,
                    address = %redact_address(&address),
                    tx_hash = ?submitted.tx_hash,
                    "Contract deployed"
                );
                Ok(stored)
            }
            Err(e) => {
                let chain_id = self.chain_id(network_id).await;
                tracing::error!(
                    chain_id = ?chain_id,
                    tx_hash = ?submitted.tx_hash,
                    address = ?address,
                    contract_type = %contract_type,
                    error = %e,
                    "Contract deployed but record could not be persisted"
                );
                Err(EscrowError::Persistence {
                    tx_hash: format!("{:?}", submitted.tx_hash),
                    address: format!("{:?}", address),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn chain_id(&self, network_id: Uuid) -> Option<u64> {
        self.submitter
            .registry()
            .chain_descriptor(network_id)
            .await
            .ok()
            .map(|d| d.chain_id)
    }
}
