//! Domain 模块
//!
//! 托管钱包、网络配置与已部署合约的领域模型

pub mod contract;
pub mod network;
pub mod wallet;

// 重新导出常用类型
pub use contract::{ContractType, DeployedContractRecord, NewContractRecord};
pub use network::{
    BlockchainNetwork, ChainDescriptor, NativeCurrency, NetworkFilter, NetworkLookup, NetworkPatch,
    NewNetwork,
};
pub use wallet::{BalanceSnapshot, EncryptedEnvelope, EscrowWallet, NewEscrowWallet, WalletSummary};
