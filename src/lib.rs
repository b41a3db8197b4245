//! IronEscrow - 托管钱包私钥保管与链上交易编排
//!
//! 私钥仅以 AES-256-GCM 信封形式落库，只在签名瞬间解密。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod repository;
pub mod service;

// 重新导出常用类型
pub use error::{EscrowError, Result};
pub use service::EscrowService;

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{
            BlockchainNetwork, ContractType, DeployedContractRecord, NetworkFilter, NetworkPatch,
            NewNetwork, WalletSummary,
        },
        error::{EscrowError, Result},
        service::{CollectionParams, EscrowService, FeeEstimate, Repositories},
    };
}
