//! 持久化边界
//!
//! 每个实体一个 trait + PostgreSQL 实现；`memory` 提供进程内实现，
//! 多行不变量（默认钱包、TBA 激活记录）在单个数据库事务内完成。

pub mod contract_repository;
pub mod escrow_wallet_repository;
pub mod memory;
pub mod network_repository;

use ethers::types::{Address, H256};

use crate::error::{EscrowError, Result};

pub use contract_repository::{ContractRepository, PgContractRepository};
pub use escrow_wallet_repository::{EscrowWalletRepository, PgEscrowWalletRepository};
pub use memory::{
    InMemoryContractRepository, InMemoryEscrowWalletRepository, InMemoryNetworkRepository,
};
pub use network_repository::{NetworkRepository, PgNetworkRepository};

/// 地址统一以小写 0x 十六进制存储
pub(crate) fn address_to_db(address: &Address) -> String {
    format!("{:?}", address)
}

pub(crate) fn address_from_db(value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|_| EscrowError::Database(format!("corrupt address column: {}", value)))
}

pub(crate) fn optional_address_from_db(value: Option<String>) -> Result<Option<Address>> {
    value.as_deref().map(address_from_db).transpose()
}

pub(crate) fn hash_from_db(value: &str) -> Result<H256> {
    value
        .parse()
        .map_err(|_| EscrowError::Database(format!("corrupt hash column: {}", value)))
}
