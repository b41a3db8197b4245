//! 交易提交集成测试

mod common;

use std::{sync::Arc, time::Duration};

use common::{Harness, OTHER_KEY};
use ethers::types::{Address, Bytes, U256, U64};
use ironescrow::{
    metrics,
    service::{FeeMode, SubmitRequest},
    EscrowError,
};

fn transfer(harness: &Harness, wallet: Address) -> SubmitRequest {
    SubmitRequest::call(
        harness.network.id,
        wallet,
        Address::from_low_u64_be(0xbeef),
        Bytes::default(),
    )
    .with_value(U256::from(1_000))
}

#[tokio::test]
async fn test_successful_submission_returns_receipt() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;

    let submitted = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap();

    assert_eq!(submitted.nonce, U256::zero());
    assert_eq!(submitted.receipt.transaction_hash, submitted.tx_hash);
    assert_eq!(submitted.receipt.status, Some(U64::one()));
    assert_eq!(submitted.fee.mode, FeeMode::Eip1559);
    assert_eq!(harness.rpc.snapshot().sent, vec![submitted.tx_hash]);
}

#[tokio::test]
async fn test_missing_or_inactive_wallet_is_account_unavailable() {
    let harness = Harness::new().await;

    let err = harness
        .submitter
        .submit(transfer(&harness, Address::from_low_u64_be(42)))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::AccountUnavailable(_)));

    let wallet = harness.funded_wallet().await;
    harness.wallets.deactivate_wallet(wallet).await.unwrap();
    let err = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::AccountUnavailable(_)));
    assert!(harness.rpc.snapshot().sent.is_empty());
}

#[tokio::test]
async fn test_reverted_receipt_is_retryable_error() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness.rpc.configure(|s| s.receipt_status = 0);

    let before = metrics::snapshot().reverted;
    let err = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::TransactionReverted { .. }));
    assert!(err.is_retryable());
    assert!(metrics::snapshot().reverted > before);
    // 恰好广播一次
    assert_eq!(harness.rpc.snapshot().sent.len(), 1);
}

#[tokio::test]
async fn test_unmined_transaction_times_out() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness.rpc.configure(|s| s.withhold_receipts = true);

    let err = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap_err();

    match err {
        EscrowError::ConfirmationTimeout { waited, .. } => {
            assert_eq!(waited, Duration::from_secs(1));
        }
        other => panic!("expected confirmation timeout, got {:?}", other),
    }
    assert!(!EscrowError::ConfirmationTimeout {
        tx_hash: String::new(),
        waited: Duration::ZERO
    }
    .is_retryable());
}

#[tokio::test]
async fn test_broadcast_failure_is_rpc_error() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness.rpc.configure(|s| s.fail_broadcast = true);

    let err = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Rpc(_)));
    assert!(err.is_retryable());
    assert!(harness.rpc.snapshot().sent.is_empty());
}

#[tokio::test]
async fn test_lost_broadcast_response_follows_local_hash() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    // 节点已接收交易，但响应在返回途中丢失
    harness.rpc.configure(|s| s.accept_then_error = true);

    let submitted = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap();

    let state = harness.rpc.snapshot();
    assert_eq!(state.sent, vec![submitted.tx_hash]);
    assert_eq!(submitted.receipt.status, Some(U64::one()));
}

#[tokio::test]
async fn test_unknown_broadcast_outcome_is_not_retryable() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness.rpc.configure(|s| s.drop_broadcast = true);

    let err = harness
        .submitter
        .submit(transfer(&harness, wallet))
        .await
        .unwrap_err();

    assert!(matches!(err, EscrowError::ConfirmationTimeout { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_huge_confirmation_depth_times_out() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;

    let err = harness
        .submitter
        .submit(transfer(&harness, wallet).with_confirmations(u64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::ConfirmationTimeout { .. }));
    assert_eq!(harness.rpc.snapshot().sent.len(), 1);
}

#[tokio::test]
async fn test_fallback_fee_still_submits() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;
    harness.rpc.configure(|s| s.fail_fee_queries = true);

    let submitted = harness
        .submitter
        .submit(transfer(&harness, wallet).with_attempt(2))
        .await
        .unwrap();
    assert_eq!(submitted.fee.mode, FeeMode::Fallback);
    assert_eq!(submitted.fee.gas_price, U256::from(28_000_000_000u64));
}

#[tokio::test]
async fn test_deployment_receipt_without_address_fails() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;

    let request = SubmitRequest::deploy(harness.network.id, wallet, Bytes::from(vec![0x60, 0x80]));
    let err = harness.submitter.submit(request).await.unwrap_err();
    assert!(matches!(err, EscrowError::ReceiptMissingAddress { .. }));
}

#[tokio::test]
async fn test_waits_for_confirmation_depth() {
    let harness = Harness::new().await;
    let wallet = harness.funded_wallet().await;

    // 回执所在区块即链头，要求 3 个确认时必须等待链头前进
    let rpc = harness.rpc.clone();
    let advance = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        rpc.configure(|s| s.head_block += 2);
    });

    let submitted = harness
        .submitter
        .submit(transfer(&harness, wallet).with_confirmations(3))
        .await;
    advance.await.unwrap();
    assert!(submitted.is_ok());
}

#[tokio::test]
async fn test_same_wallet_submissions_are_serialized() {
    let harness = Arc::new(Harness::new().await);
    let wallet = harness.funded_wallet().await;
    let other = harness
        .wallets
        .register_wallet(OTHER_KEY, None)
        .await
        .unwrap()
        .address;
    harness
        .rpc
        .configure(|s| s.nonce_delay = Duration::from_millis(20));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness.submitter.submit(transfer(&harness, wallet)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = harness.rpc.snapshot();
    assert_eq!(state.max_in_flight_nonces, 1);
    assert_eq!(state.sent.len(), 4);

    // 不同钱包可以交错
    let a = harness.submitter.submit(transfer(&harness, wallet));
    let b = harness.submitter.submit(transfer(&harness, other));
    let (a, b) = tokio::join!(a, b);
    assert!(a.is_ok() && b.is_ok());
}
