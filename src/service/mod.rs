//! 业务服务层
//!
//! 依赖方向：network_registry ← fee_estimator / transaction_submitter ← contract_deployer，
//! tba_resolver 只依赖 network_registry。

pub mod contract_deployer;
pub mod escrow;
pub mod escrow_wallet_service;
pub mod fee_estimator;
pub mod network_registry;
pub mod tba_resolver;
pub mod transaction_submitter;
pub mod wallet_locks;

pub use contract_deployer::{CollectionParams, ContractDeployer, DeploymentEvent, FactoryDeployment};
pub use escrow::{EscrowService, Repositories};
pub use escrow_wallet_service::{BalanceResult, EscrowWalletService};
pub use fee_estimator::{FeeEstimate, FeeEstimator, FeeMode};
pub use network_registry::NetworkRegistry;
pub use tba_resolver::{TbaParams, TbaResolver};
pub use transaction_submitter::{
    SubmitRequest, SubmittedTransaction, TransactionSubmitter, TxPayload,
};
pub use wallet_locks::WalletLocks;
