//! 合约部署集成测试

mod common;

use common::{collection_deployed_log, Harness};
use ethers::types::{Address, Bytes};
use ironescrow::{
    domain::ContractType, metrics, service::CollectionParams, EscrowError,
};

fn bytecode() -> Bytes {
    Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52])
}

fn genesis(owner: Address) -> CollectionParams {
    CollectionParams {
        name: "Genesis".into(),
        symbol: "GEN".into(),
        contract_uri: "ipfs://genesis".into(),
        owner,
    }
}

#[tokio::test]
async fn test_direct_deployment_uses_receipt_address() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    let factory = Address::from_low_u64_be(0xfac);
    harness.rpc.configure(|s| s.contract_address = Some(factory));

    let record = harness
        .deployer
        .deploy_factory(harness.network.id, wallet, bytecode(), 0)
        .await
        .unwrap();

    assert_eq!(record.address, factory);
    assert_eq!(record.contract_type, ContractType::Factory);
    assert_eq!(record.deployer, wallet);
    assert!(record.is_active);
    assert_eq!(harness.rpc.snapshot().sent, vec![record.tx_hash]);
}

#[tokio::test]
async fn test_deploy_collection_decodes_event_address() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    let factory = Address::from_low_u64_be(0xfac);
    let collection = Address::from_low_u64_be(0xc011);

    // 先部署 TBA 注册表与实现，集合记录应引用它们
    harness
        .rpc
        .configure(|s| s.contract_address = Some(Address::from_low_u64_be(0x6551)));
    let registry = harness
        .deployer
        .deploy_tba_registry(harness.network.id, wallet, bytecode(), 0)
        .await
        .unwrap();
    harness
        .rpc
        .configure(|s| s.contract_address = Some(Address::from_low_u64_be(0x1111)));
    let implementation = harness
        .deployer
        .deploy_tba_implementation(harness.network.id, wallet, bytecode(), 0)
        .await
        .unwrap();

    harness.rpc.configure(|s| {
        s.contract_address = None;
        s.receipt_logs = vec![collection_deployed_log(factory, collection, wallet)];
    });
    let record = harness
        .deployer
        .deploy_collection(harness.network.id, wallet, factory, genesis(wallet), 0)
        .await
        .unwrap();

    assert_eq!(record.address, collection);
    assert_eq!(record.contract_type, ContractType::Collection);
    assert_eq!(record.name.as_deref(), Some("Genesis"));
    assert_eq!(record.symbol.as_deref(), Some("GEN"));
    assert_eq!(record.tba_registry, Some(registry.address));
    assert_eq!(record.tba_implementation, Some(implementation.address));
}

#[tokio::test]
async fn test_missing_event_is_divergence_not_revert() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    let factory = Address::from_low_u64_be(0xfac);
    // 事件来自其他合约，不能被采信
    harness.rpc.configure(|s| {
        s.receipt_logs = vec![collection_deployed_log(
            Address::from_low_u64_be(0xbad),
            Address::from_low_u64_be(0xc011),
            wallet,
        )];
    });

    let before = metrics::snapshot().deployment_divergence;
    let err = harness
        .deployer
        .deploy_collection(harness.network.id, wallet, factory, genesis(wallet), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::DeploymentEventNotFound { .. }));
    assert!(!err.is_retryable());
    assert!(metrics::snapshot().deployment_divergence > before);
    assert!(harness
        .deployer
        .list_contracts(harness.network.id, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_single_active_tba_implementation() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;

    let mut deployed = Vec::new();
    for address in [0x1001u64, 0x1002] {
        harness
            .rpc
            .configure(|s| s.contract_address = Some(Address::from_low_u64_be(address)));
        deployed.push(
            harness
                .deployer
                .deploy_tba_implementation(harness.network.id, wallet, bytecode(), 0)
                .await
                .unwrap(),
        );
    }

    let records = harness
        .deployer
        .list_contracts(harness.network.id, Some(ContractType::TbaImplementation))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records.iter().filter(|r| r.is_active).count(), 1);
    let active = harness
        .deployer
        .active_tba_contract(harness.network.id, ContractType::TbaImplementation)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, deployed[1].id);

    harness
        .deployer
        .activate_tba_contract(deployed[0].id)
        .await
        .unwrap();
    let records = harness
        .deployer
        .list_contracts(harness.network.id, Some(ContractType::TbaImplementation))
        .await
        .unwrap();
    assert_eq!(records.iter().filter(|r| r.is_active).count(), 1);
    assert!(records.iter().any(|r| r.id == deployed[0].id && r.is_active));
}

#[tokio::test]
async fn test_factory_cannot_be_reactivated_as_tba() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness
        .rpc
        .configure(|s| s.contract_address = Some(Address::from_low_u64_be(0xfac)));
    let factory = harness
        .deployer
        .deploy_factory(harness.network.id, wallet, bytecode(), 0)
        .await
        .unwrap();

    let err = harness
        .deployer
        .activate_tba_contract(factory.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidInput(_)));
    assert!(harness
        .deployer
        .active_tba_contract(harness.network.id, ContractType::Factory)
        .await
        .is_err());
}

#[tokio::test]
async fn test_duplicate_address_reports_persistence_failure() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness
        .rpc
        .configure(|s| s.contract_address = Some(Address::from_low_u64_be(0xfac)));

    let first = harness
        .deployer
        .deploy_factory(harness.network.id, wallet, bytecode(), 0)
        .await
        .unwrap();
    // 节点返回同一地址：链上已确认但记录写入冲突
    let err = harness
        .deployer
        .deploy_factory(harness.network.id, wallet, bytecode(), 1)
        .await
        .unwrap_err();

    match err {
        EscrowError::Persistence { tx_hash, address, .. } => {
            assert_ne!(tx_hash, format!("{:?}", first.tx_hash));
            assert_eq!(address, format!("{:?}", first.address));
        }
        other => panic!("expected persistence error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reverted_deployment_records_nothing() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness.rpc.configure(|s| {
        s.receipt_status = 0;
        s.contract_address = Some(Address::from_low_u64_be(0xfac));
    });

    let err = harness
        .deployer
        .deploy_factory(harness.network.id, wallet, bytecode(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::TransactionReverted { .. }));
    assert!(harness
        .deployer
        .list_contracts(harness.network.id, None)
        .await
        .unwrap()
        .is_empty());
}
