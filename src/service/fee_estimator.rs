//! Gas 费预估（按重试次数递增）
//!
//! 所有倍数用千分比整数在 U256 上计算，保证随 attempt 单调不减。
//! 任何 RPC 失败都降级为固定默认值，本模块从不向调用方返回错误。

use ethers::types::{transaction::eip2718::TypedTransaction, U256};
use serde::Serialize;

use crate::{config::ChainConfig, infrastructure::rpc::EvmRpc, metrics};

const PER_MILLE: u64 = 1000;
const GWEI: u64 = 1_000_000_000;

/// 估算路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    Eip1559,
    Legacy,
    /// RPC 失败后的固定默认值，按 legacy 交易发送
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    /// gas limit
    pub gas: U256,
    pub gas_price: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// gas * max_fee_per_gas
    pub estimated_cost: U256,
    pub mode: FeeMode,
}

impl FeeEstimate {
    pub fn is_eip1559(&self) -> bool {
        self.mode == FeeMode::Eip1559
    }
}

#[derive(Debug, Clone)]
pub struct FeeEstimator {
    per_item_gas_floor: U256,
    fallback_gas_price: U256,
}

impl FeeEstimator {
    pub fn new(per_item_gas_floor: u64, fallback_gas_price_gwei: u64) -> Self {
        Self {
            per_item_gas_floor: U256::from(per_item_gas_floor),
            fallback_gas_price: U256::from(fallback_gas_price_gwei) * U256::from(GWEI),
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self::new(config.per_item_gas_floor, config.fallback_gas_price_gwei)
    }

    /// 估算一次提交的 gas 与费用参数
    ///
    /// `item_count` 为 Some 时启用按件计费下限（如批量 mint）。
    pub async fn estimate(
        &self,
        rpc: &dyn EvmRpc,
        tx: &TypedTransaction,
        attempt: u32,
        item_count: Option<u64>,
    ) -> FeeEstimate {
        match self.query(rpc, tx, attempt, item_count).await {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!(
                    attempt,
                    error = %e,
                    "Fee estimation failed, using fallback defaults"
                );
                metrics::inc_fee_fallback();
                self.fallback(attempt, item_count)
            }
        }
    }

    async fn query(
        &self,
        rpc: &dyn EvmRpc,
        tx: &TypedTransaction,
        attempt: u32,
        item_count: Option<u64>,
    ) -> anyhow::Result<FeeEstimate> {
        let estimated_gas = rpc.estimate_gas(tx).await?;
        let base_gas = match item_count {
            Some(items) => estimated_gas.max(self.per_item_gas_floor * U256::from(items)),
            None => estimated_gas,
        };

        let gas_price = rpc.gas_price().await?;
        let base_fee = rpc.latest_base_fee().await?;

        // 30% 安全余量
        let gas = base_gas * U256::from(130) / U256::from(100);
        let attempt = u64::from(attempt);

        let estimate = match base_fee {
            Some(base_fee) => {
                let multiplier = PER_MILLE + 100 * (attempt + 1);
                let priority_fee = gas_price / U256::from(10);
                let max_priority = priority_fee * U256::from(multiplier) / U256::from(PER_MILLE);
                let max_fee = base_fee * U256::from(2) + max_priority;
                FeeEstimate {
                    gas,
                    gas_price,
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: max_priority,
                    estimated_cost: gas * max_fee,
                    mode: FeeMode::Eip1559,
                }
            }
            None => {
                let multiplier = PER_MILLE + 150 * attempt;
                let price = gas_price * U256::from(multiplier) / U256::from(PER_MILLE);
                FeeEstimate {
                    gas,
                    gas_price: price,
                    max_fee_per_gas: price,
                    max_priority_fee_per_gas: price,
                    estimated_cost: gas * price,
                    mode: FeeMode::Legacy,
                }
            }
        };

        tracing::debug!(
            mode = ?estimate.mode,
            gas = %estimate.gas,
            max_fee_per_gas = %estimate.max_fee_per_gas,
            attempt,
            "Fee estimated"
        );
        Ok(estimate)
    }

    /// 降级路径：gas 直接取按件下限，不加 30% 余量
    pub fn fallback(&self, attempt: u32, item_count: Option<u64>) -> FeeEstimate {
        let items = item_count.unwrap_or(1).max(1);
        let gas = self.per_item_gas_floor * U256::from(items);
        let multiplier = PER_MILLE + 200 * u64::from(attempt);
        let price = self.fallback_gas_price * U256::from(multiplier) / U256::from(PER_MILLE);

        FeeEstimate {
            gas,
            gas_price: price,
            max_fee_per_gas: price,
            max_priority_fee_per_gas: price,
            estimated_cost: gas * price,
            mode: FeeMode::Fallback,
        }
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new(200_000, 20)
    }
}
