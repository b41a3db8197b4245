//! 区块链 RPC 边界
//!
//! 服务层只依赖 [`EvmRpc`] trait；生产实现基于 ethers `Provider<Http>`，
//! 每次调用都有独立超时，避免无响应的节点挂起整个流程。

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Signature,
        TransactionReceipt, H256, U256, U64,
    },
};

use crate::domain::ChainDescriptor;

/// 节点以 JSON-RPC 错误响应明确拒绝了交易，交易未进入交易池
///
/// `send_raw_transaction` 的其他错误（超时、连接中断）结果未知。
#[derive(Debug, Clone, thiserror::Error)]
#[error("node rejected transaction ({code}): {message}")]
pub struct BroadcastRejected {
    pub code: i64,
    pub message: String,
}

#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256>;

    async fn gas_price(&self) -> Result<U256>;

    /// 最新区块的 base fee；非 EIP-1559 网络返回 None
    async fn latest_base_fee(&self) -> Result<Option<U256>>;

    /// pending 状态下的 nonce
    async fn transaction_count(&self, address: Address) -> Result<U256>;

    /// 明确拒绝时返回 [`BroadcastRejected`]，其余错误视为结果未知
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256>;

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;

    async fn block_number(&self) -> Result<U64>;

    /// 只读合约调用
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes>;

    async fn balance(&self, address: Address) -> Result<U256>;
}

/// 根据链描述构造 RPC 客户端
pub trait RpcConnector: Send + Sync {
    fn connect(&self, descriptor: &ChainDescriptor) -> Result<Arc<dyn EvmRpc>>;
}

pub struct EthersRpc {
    provider: Provider<Http>,
    timeout: Duration,
}

impl EthersRpc {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(rpc_url)
            .with_context(|| format!("Invalid RPC url: {}", rpc_url))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build RPC http client")?;

        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, client)),
            timeout,
        })
    }

    async fn timed<T, E, F>(&self, method: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.with_context(|| format!("{} failed", method)),
            Err(_) => Err(anyhow!("{} timed out after {:?}", method, self.timeout)),
        }
    }
}

#[async_trait]
impl EvmRpc for EthersRpc {
    async fn chain_id(&self) -> Result<u64> {
        let id = self.timed("eth_chainId", self.provider.get_chainid()).await?;
        Ok(id.as_u64())
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256> {
        self.timed("eth_estimateGas", self.provider.estimate_gas(tx, None))
            .await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.timed("eth_gasPrice", self.provider.get_gas_price()).await
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>> {
        let block = self
            .timed(
                "eth_getBlockByNumber",
                self.provider.get_block(BlockNumber::Latest),
            )
            .await?
            .ok_or_else(|| anyhow!("latest block not available"))?;
        Ok(block.base_fee_per_gas)
    }

    async fn transaction_count(&self, address: Address) -> Result<U256> {
        self.timed(
            "eth_getTransactionCount",
            self.provider
                .get_transaction_count(address, Some(BlockNumber::Pending.into())),
        )
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let sent = tokio::time::timeout(self.timeout, self.provider.send_raw_transaction(raw)).await;
        match sent {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => match e.as_error_response() {
                Some(response) => Err(BroadcastRejected {
                    code: response.code,
                    message: response.message.clone(),
                }
                .into()),
                None => Err(anyhow::Error::new(e).context("eth_sendRawTransaction failed")),
            },
            Err(_) => Err(anyhow!(
                "eth_sendRawTransaction timed out after {:?}",
                self.timeout
            )),
        }
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.timed(
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(tx_hash),
        )
        .await
    }

    async fn block_number(&self) -> Result<U64> {
        self.timed("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes> {
        self.timed("eth_call", self.provider.call(tx, None)).await
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.timed("eth_getBalance", self.provider.get_balance(address, None))
            .await
    }
}

/// 生产环境连接器
pub struct EthersConnector {
    timeout: Duration,
}

impl EthersConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RpcConnector for EthersConnector {
    fn connect(&self, descriptor: &ChainDescriptor) -> Result<Arc<dyn EvmRpc>> {
        let rpc = EthersRpc::new(&descriptor.rpc_url, self.timeout)?;
        Ok(Arc::new(rpc))
    }
}

/// EIP-191 personal_sign 签名校验（本地完成，不需要 RPC）
pub fn verify_message(address: Address, message: &str, signature: &str) -> bool {
    let Ok(signature) = signature.parse::<Signature>() else {
        return false;
    };
    signature.verify(message, address).is_ok()
}

#[cfg(test)]
mod tests {
    use ethers::signers::{LocalWallet, Signer};

    use super::*;

    #[tokio::test]
    async fn test_verify_message() {
        let wallet: LocalWallet =
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let signature = wallet.sign_message("escrow ownership").await.unwrap();
        let encoded = signature.to_string();

        assert!(verify_message(wallet.address(), "escrow ownership", &encoded));
        assert!(!verify_message(wallet.address(), "other message", &encoded));
        assert!(!verify_message(Address::zero(), "escrow ownership", &encoded));
        assert!(!verify_message(wallet.address(), "escrow ownership", "0xnothex"));
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(EthersRpc::new("not a url", Duration::from_secs(1)).is_err());
    }
}
