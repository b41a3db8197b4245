//! 按钱包地址串行化签名与广播
//!
//! 同一钱包的 取 nonce → 签名 → 广播 必须在同一把锁内完成，
//! 否则并发提交会拿到同一个 pending nonce。不同钱包之间互不阻塞。

use std::{collections::HashMap, sync::Arc};

use ethers::types::Address;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::infrastructure::log_redact::redact_address;

#[derive(Default)]
pub struct WalletLocks {
    locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取钱包锁，guard drop 时释放
    pub async fn acquire(&self, address: Address) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        tracing::debug!(address = %redact_address(&address), "Waiting for wallet lock");
        lock.lock_owned().await
    }

    pub async fn tracked_wallets(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn test_same_wallet_is_serialized() {
        let locks = Arc::new(WalletLocks::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let address = Address::from_low_u64_be(7);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(address).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked_wallets().await, 1);
    }

    #[tokio::test]
    async fn test_different_wallets_do_not_block() {
        let locks = WalletLocks::new();
        let _a = locks.acquire(Address::from_low_u64_be(1)).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(Address::from_low_u64_be(2)),
        )
        .await;
        assert!(b.is_ok());
    }
}
