//! 托管钱包服务：注册、状态切换、默认钱包与余额查询

use std::sync::Arc;

use chrono::Utc;
use ethers::types::{Address, U256};
use futures::{stream, StreamExt};
use uuid::Uuid;

use crate::{
    domain::{BalanceSnapshot, EscrowWallet, NewEscrowWallet},
    error::{EscrowError, Result},
    infrastructure::{
        encryption::{derive_address, KeyVault},
        log_redact::redact_address,
        rpc::{self, EvmRpc},
    },
    repository::EscrowWalletRepository,
    service::network_registry::NetworkRegistry,
};

/// 批量余额查询中单个地址的结果
#[derive(Debug)]
pub struct BalanceResult {
    pub address: Address,
    pub balance: Result<U256>,
}

pub struct EscrowWalletService {
    wallets: Arc<dyn EscrowWalletRepository>,
    vault: Arc<KeyVault>,
    registry: Arc<NetworkRegistry>,
    fan_out: usize,
}

impl EscrowWalletService {
    pub fn new(
        wallets: Arc<dyn EscrowWalletRepository>,
        vault: Arc<KeyVault>,
        registry: Arc<NetworkRegistry>,
        fan_out: usize,
    ) -> Self {
        Self {
            wallets,
            vault,
            registry,
            fan_out: fan_out.max(1),
        }
    }

    /// 注册托管钱包（幂等）
    ///
    /// 地址由私钥推导；已存在时原样返回已有记录，不重新加密。
    pub async fn register_wallet(
        &self,
        private_key: &str,
        label: Option<String>,
    ) -> Result<EscrowWallet> {
        let address = derive_address(private_key)?;

        if let Some(existing) = self.wallets.find_by_address(address).await? {
            tracing::info!(
                address = %redact_address(&address),
                "Escrow wallet already registered, returning existing record"
            );
            return Ok(existing);
        }

        let envelope = self.vault.encrypt(private_key)?;
        let new_wallet = NewEscrowWallet {
            address,
            label,
            envelope,
        };

        match self.wallets.insert(new_wallet).await {
            Ok(wallet) => {
                tracing::info!(
                    wallet_id = %wallet.id,
                    address = %redact_address(&address),
                    "Escrow wallet registered"
                );
                Ok(wallet)
            }
            // 并发注册同一地址：以先写入者为准
            Err(EscrowError::Conflict(_)) => self
                .wallets
                .find_by_address(address)
                .await?
                .ok_or_else(|| EscrowError::NotFound(format!("escrow wallet {:?}", address))),
            Err(e) => Err(e),
        }
    }

    pub async fn get_wallet(&self, address: Address) -> Result<EscrowWallet> {
        self.wallets
            .find_by_address(address)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("escrow wallet {:?}", address)))
    }

    pub async fn list_wallets(&self, active_only: bool) -> Result<Vec<EscrowWallet>> {
        self.wallets.list(active_only).await
    }

    pub async fn activate_wallet(&self, address: Address) -> Result<EscrowWallet> {
        let wallet = self.wallets.set_active(address, true).await?;
        tracing::info!(address = %redact_address(&address), "Escrow wallet activated");
        Ok(wallet)
    }

    /// 停用（不删除）；停用的默认钱包同时失去默认标记
    pub async fn deactivate_wallet(&self, address: Address) -> Result<EscrowWallet> {
        let wallet = self.wallets.set_active(address, false).await?;
        tracing::info!(address = %redact_address(&address), "Escrow wallet deactivated");
        Ok(wallet)
    }

    pub async fn set_default_wallet(&self, address: Address) -> Result<EscrowWallet> {
        let wallet = self.wallets.set_default(address).await?;
        tracing::info!(address = %redact_address(&address), "Default escrow wallet changed");
        Ok(wallet)
    }

    pub async fn default_wallet(&self) -> Result<Option<EscrowWallet>> {
        self.wallets.find_default().await
    }

    /// 查询链上余额并刷新缓存快照
    pub async fn wallet_balance(&self, network_id: Uuid, address: Address) -> Result<BalanceSnapshot> {
        self.get_wallet(address).await?;
        let (_, rpc) = self.registry.rpc_for(network_id).await?;

        let wei = rpc.balance(address).await.map_err(EscrowError::rpc)?;
        let snapshot = BalanceSnapshot {
            network_id,
            wei,
            refreshed_at: Utc::now(),
        };
        self.wallets.update_balance(address, &snapshot).await?;
        Ok(snapshot)
    }

    /// 批量余额：有界并发，结果顺序与输入一致，单个地址失败不影响其他地址
    pub async fn batch_balances(
        &self,
        network_id: Uuid,
        addresses: &[Address],
    ) -> Result<Vec<BalanceResult>> {
        let (_, rpc) = self.registry.rpc_for(network_id).await?;

        let results = stream::iter(addresses.iter().copied())
            .map(|address| {
                let rpc = rpc.clone();
                async move { self.fetch_balance(rpc.as_ref(), network_id, address).await }
            })
            .buffered(self.fan_out)
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn fetch_balance(
        &self,
        rpc: &dyn EvmRpc,
        network_id: Uuid,
        address: Address,
    ) -> BalanceResult {
        let balance = rpc.balance(address).await.map_err(EscrowError::rpc);

        if let Ok(wei) = &balance {
            let snapshot = BalanceSnapshot {
                network_id,
                wei: *wei,
                refreshed_at: Utc::now(),
            };
            match self.wallets.update_balance(address, &snapshot).await {
                Ok(()) | Err(EscrowError::NotFound(_)) => {}
                Err(e) => tracing::warn!(
                    address = %redact_address(&address),
                    error = %e,
                    "Failed to refresh balance snapshot"
                ),
            }
        }

        BalanceResult { address, balance }
    }

    /// 校验调用方持有该地址的私钥（EIP-191 签名）
    pub fn verify_ownership(&self, address: Address, message: &str, signature: &str) -> bool {
        rpc::verify_message(address, message, signature)
    }
}
