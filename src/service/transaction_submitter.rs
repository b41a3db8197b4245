//! 交易提交
//!
//! 每次调用恰好广播一笔交易，本身不重试。流程：
//! 1. 校验托管钱包存在且激活
//! 2. 估算费用（按 attempt 递增）
//! 3. 持钱包锁：取 pending nonce → 解密签名 → 广播，广播后立即释放锁和签名账户
//!    节点明确拒绝时返回可重试的 `Rpc`；超时等结果未知的错误按本地哈希继续等待回执，
//!    等不到则为 `ConfirmationTimeout`，不可盲目重试
//! 4. 在整体超时内轮询回执并等待确认深度，按结果分类错误

use std::{sync::Arc, time::Duration};

use ethers::{
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
        TransactionReceipt, TransactionRequest, H256, U256, U64,
    },
    utils::keccak256,
};
use uuid::Uuid;

use crate::{
    config::ChainConfig,
    error::{EscrowError, Result},
    infrastructure::{
        encryption::KeyVault,
        log_redact::redact_address,
        rpc::{BroadcastRejected, EvmRpc},
    },
    metrics,
    repository::EscrowWalletRepository,
    service::{
        fee_estimator::{FeeEstimate, FeeEstimator},
        network_registry::NetworkRegistry,
        wallet_locks::WalletLocks,
    },
};

/// 交易内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    /// 合约调用或转账
    Call {
        to: Address,
        data: Bytes,
        value: U256,
    },
    /// 直接 CREATE 部署（data 为 bytecode + 构造参数）
    Deploy { bytecode: Bytes },
}

impl TxPayload {
    pub fn is_deployment(&self) -> bool {
        matches!(self, TxPayload::Deploy { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub network_id: Uuid,
    pub wallet: Address,
    pub payload: TxPayload,
    /// 重试序号，从 0 开始
    pub attempt: u32,
    /// None 时使用配置的默认确认数
    pub confirmations: Option<u64>,
    /// 批量操作的件数，用于 gas 下限
    pub item_count: Option<u64>,
}

impl SubmitRequest {
    pub fn call(network_id: Uuid, wallet: Address, to: Address, data: Bytes) -> Self {
        Self {
            network_id,
            wallet,
            payload: TxPayload::Call {
                to,
                data,
                value: U256::zero(),
            },
            attempt: 0,
            confirmations: None,
            item_count: None,
        }
    }

    pub fn deploy(network_id: Uuid, wallet: Address, bytecode: Bytes) -> Self {
        Self {
            network_id,
            wallet,
            payload: TxPayload::Deploy { bytecode },
            attempt: 0,
            confirmations: None,
            item_count: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn with_item_count(mut self, items: u64) -> Self {
        self.item_count = Some(items);
        self
    }

    pub fn with_value(mut self, amount: U256) -> Self {
        if let TxPayload::Call { value, .. } = &mut self.payload {
            *value = amount;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct SubmittedTransaction {
    pub tx_hash: H256,
    pub nonce: U256,
    pub fee: FeeEstimate,
    pub receipt: TransactionReceipt,
}

impl SubmittedTransaction {
    pub fn contract_address(&self) -> Option<Address> {
        self.receipt.contract_address
    }
}

pub struct TransactionSubmitter {
    wallets: Arc<dyn EscrowWalletRepository>,
    vault: Arc<KeyVault>,
    registry: Arc<NetworkRegistry>,
    estimator: FeeEstimator,
    locks: Arc<WalletLocks>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    default_confirmations: u64,
}

impl TransactionSubmitter {
    pub fn new(
        wallets: Arc<dyn EscrowWalletRepository>,
        vault: Arc<KeyVault>,
        registry: Arc<NetworkRegistry>,
        locks: Arc<WalletLocks>,
        config: &ChainConfig,
    ) -> Self {
        Self {
            wallets,
            vault,
            registry,
            estimator: FeeEstimator::from_config(config),
            locks,
            confirmation_timeout: config.confirmation_timeout(),
            poll_interval: config.receipt_poll_interval(),
            default_confirmations: config.default_confirmations,
        }
    }

    pub fn estimator(&self) -> &FeeEstimator {
        &self.estimator
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    /// 签名、广播并等待确认
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmittedTransaction> {
        let wallet = self
            .wallets
            .find_by_address(request.wallet)
            .await?
            .ok_or_else(|| {
                EscrowError::AccountUnavailable(format!(
                    "escrow wallet {} not found",
                    redact_address(&request.wallet)
                ))
            })?;
        if !wallet.is_active {
            return Err(EscrowError::AccountUnavailable(format!(
                "escrow wallet {} is inactive",
                redact_address(&wallet.address)
            )));
        }

        let (descriptor, rpc) = self.registry.rpc_for(request.network_id).await?;
        let chain_id = descriptor.chain_id;

        let draft = build_transaction(&request.payload, wallet.address, chain_id, None, None);
        let fee = self
            .estimator
            .estimate(rpc.as_ref(), &draft, request.attempt, request.item_count)
            .await;

        let (tx_hash, nonce) = {
            let _guard = self.locks.acquire(wallet.address).await;

            // 签名账户仅在锁内存活
            let signer = self.vault.signer(&wallet.envelope, chain_id)?;
            if signer.address() != wallet.address {
                return Err(EscrowError::AccountUnavailable(format!(
                    "envelope of {} does not match its address",
                    redact_address(&wallet.address)
                )));
            }

            let nonce = rpc
                .transaction_count(wallet.address)
                .await
                .map_err(EscrowError::rpc)?;
            let tx = build_transaction(
                &request.payload,
                wallet.address,
                chain_id,
                Some(&fee),
                Some(nonce),
            );
            let raw = sign(&signer, &tx)?;
            drop(signer);
            let local_hash = H256::from(keccak256(raw.as_ref()));

            match rpc.send_raw_transaction(raw).await {
                Ok(hash) => {
                    metrics::inc_broadcast_ok();
                    (hash, nonce)
                }
                Err(e) if e.downcast_ref::<BroadcastRejected>().is_some() => {
                    metrics::inc_broadcast_err();
                    tracing::warn!(
                        chain_id,
                        wallet = %redact_address(&wallet.address),
                        %nonce,
                        attempt = request.attempt,
                        error = %e,
                        "Broadcast rejected by node"
                    );
                    return Err(EscrowError::rpc(e));
                }
                Err(e) => {
                    // 节点可能已接收，不能当作失败
                    metrics::inc_broadcast_err();
                    tracing::warn!(
                        chain_id,
                        tx_hash = ?local_hash,
                        wallet = %redact_address(&wallet.address),
                        %nonce,
                        attempt = request.attempt,
                        error = %e,
                        "Broadcast outcome unknown, waiting for receipt"
                    );
                    (local_hash, nonce)
                }
            }
        };

        tracing::info!(
            chain_id,
            tx_hash = ?tx_hash,
            wallet = %redact_address(&wallet.address),
            %nonce,
            attempt = request.attempt,
            mode = ?fee.mode,
            "Transaction broadcast"
        );

        let confirmations = request
            .confirmations
            .unwrap_or(self.default_confirmations)
            .max(1);
        let receipt = self
            .wait_for_receipt(rpc.as_ref(), tx_hash, confirmations)
            .await?;

        if receipt.status == Some(U64::zero()) {
            metrics::inc_reverted();
            tracing::warn!(chain_id, tx_hash = ?tx_hash, "Transaction reverted");
            return Err(EscrowError::TransactionReverted {
                tx_hash: format!("{:?}", tx_hash),
            });
        }

        if request.payload.is_deployment() && receipt.contract_address.is_none() {
            return Err(EscrowError::ReceiptMissingAddress {
                tx_hash: format!("{:?}", tx_hash),
            });
        }

        Ok(SubmittedTransaction {
            tx_hash,
            nonce,
            fee,
            receipt,
        })
    }

    async fn wait_for_receipt(
        &self,
        rpc: &dyn EvmRpc,
        tx_hash: H256,
        confirmations: u64,
    ) -> Result<TransactionReceipt> {
        let waited = self.confirmation_timeout;
        match tokio::time::timeout(waited, self.poll_receipt(rpc, tx_hash, confirmations)).await {
            Ok(receipt) => Ok(receipt),
            Err(_) => {
                metrics::inc_confirmation_timeout();
                tracing::warn!(
                    tx_hash = ?tx_hash,
                    waited_secs = waited.as_secs(),
                    "Confirmation timed out, outcome unknown"
                );
                Err(EscrowError::ConfirmationTimeout {
                    tx_hash: format!("{:?}", tx_hash),
                    waited,
                })
            }
        }
    }

    /// 轮询直到回执达到确认深度；单次 RPC 失败视为暂时性错误继续轮询
    async fn poll_receipt(
        &self,
        rpc: &dyn EvmRpc,
        tx_hash: H256,
        confirmations: u64,
    ) -> TransactionReceipt {
        loop {
            match rpc.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if let Some(mined_at) = receipt.block_number {
                        if confirmations <= 1 {
                            return receipt;
                        }
                        match rpc.block_number().await {
                            Ok(head)
                                if head.as_u64().saturating_add(1)
                                    >= mined_at.as_u64().saturating_add(confirmations) =>
                            {
                                return receipt;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::debug!(tx_hash = ?tx_hash, error = %e, "Block number poll failed");
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(tx_hash = ?tx_hash, error = %e, "Receipt poll failed");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// 按费用模式构造交易；fee 为 None 时用于 gas 估算
pub(crate) fn build_transaction(
    payload: &TxPayload,
    from: Address,
    chain_id: u64,
    fee: Option<&FeeEstimate>,
    nonce: Option<U256>,
) -> TypedTransaction {
    let (to, data, value) = match payload {
        TxPayload::Call { to, data, value } => (Some(*to), data.clone(), *value),
        TxPayload::Deploy { bytecode } => (None, bytecode.clone(), U256::zero()),
    };

    match fee {
        Some(fee) if fee.is_eip1559() => {
            let mut tx = Eip1559TransactionRequest::new()
                .from(from)
                .chain_id(chain_id)
                .data(data)
                .value(value)
                .gas(fee.gas)
                .max_fee_per_gas(fee.max_fee_per_gas)
                .max_priority_fee_per_gas(fee.max_priority_fee_per_gas);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            if let Some(nonce) = nonce {
                tx = tx.nonce(nonce);
            }
            tx.into()
        }
        _ => {
            let mut tx = TransactionRequest::new()
                .from(from)
                .chain_id(chain_id)
                .data(data)
                .value(value);
            if let Some(fee) = fee {
                tx = tx.gas(fee.gas).gas_price(fee.gas_price);
            }
            if let Some(to) = to {
                tx = tx.to(to);
            }
            if let Some(nonce) = nonce {
                tx = tx.nonce(nonce);
            }
            tx.into()
        }
    }
}

fn sign(signer: &LocalWallet, tx: &TypedTransaction) -> Result<Bytes> {
    let signature = signer
        .sign_transaction_sync(tx)
        .map_err(|e| EscrowError::Crypto(format!("failed to sign transaction: {}", e)))?;
    Ok(tx.rlp_signed(&signature))
}
