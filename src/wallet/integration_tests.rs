//! Integration Tests for the Transfer Engine
//!
//! End-to-end engine scenarios against the in-memory store: money movement,
//! idempotency, conservation and behavior under contention.

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::future::join_all;

    use crate::retry::RetryPolicy;
    use crate::wallet::engine::{EngineConfig, TransferEngine};
    use crate::wallet::error::TransferError;
    use crate::wallet::memory::InMemoryWalletStore;
    use crate::wallet::state::{EntryDirection, TransferStatus};
    use crate::wallet::store::{LedgerStore, PageCursor, UnitOfWork};
    use crate::wallet::types::{
        Account, LedgerEntry, OperationKind, TransactionId, Transfer, TransferOptions,
        TransferRequest,
    };

    const HOLDING: &str = "1000000001";
    const ALICE: &str = "1000000002";
    const BOB: &str = "1000000003";

    /// Engine wired to one in-memory store for both seams
    struct TestHarness {
        engine: Arc<TransferEngine>,
        store: InMemoryWalletStore,
    }

    impl TestHarness {
        async fn new(accounts: Vec<Account>, retry: RetryPolicy) -> Self {
            let store = InMemoryWalletStore::with_accounts(accounts).await;
            let config = EngineConfig {
                retry,
                ..EngineConfig::default()
            };
            let engine = TransferEngine::new(Arc::new(store.clone()), Arc::new(store.clone()), config);
            Self {
                engine: Arc::new(engine),
                store,
            }
        }

        async fn standard(alice: i64, bob: i64) -> Self {
            Self::new(
                vec![
                    Account::system(HOLDING, "MYR"),
                    Account::new(ALICE, "Alice", "MYR", alice),
                    Account::new(BOB, "Bob", "MYR", bob),
                ],
                RetryPolicy::new(3, Duration::from_millis(1)),
            )
            .await
        }
    }

    /// Ledger whose first reference lookup misses, as for a request that
    /// checked its key just before a same-key request committed.
    struct LateLookupLedger {
        inner: InMemoryWalletStore,
        missed: AtomicBool,
    }

    impl LateLookupLedger {
        fn new(inner: InMemoryWalletStore) -> Self {
            Self {
                inner,
                missed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for LateLookupLedger {
        async fn find_by_reference(
            &self,
            reference_id: &str,
        ) -> Result<Option<Transfer>, TransferError> {
            if !self.missed.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_by_reference(reference_id).await
        }

        async fn run_atomic(&self, unit: UnitOfWork) -> Result<(), TransferError> {
            self.inner.run_atomic(unit).await
        }

        async fn find_entries(
            &self,
            transaction_id: TransactionId,
        ) -> Result<Vec<LedgerEntry>, TransferError> {
            self.inner.find_entries(transaction_id).await
        }

        async fn list_by_account(
            &self,
            account_id: &str,
            limit: usize,
            before: Option<&PageCursor>,
        ) -> Result<Vec<Transfer>, TransferError> {
            self.inner.list_by_account(account_id, limit, before).await
        }
    }

    fn p2p(key: &str, amount: i64) -> TransferRequest {
        TransferRequest::new(key, "MYR", amount)
            .from_account(ALICE)
            .to_account(BOB)
    }

    fn opts(kind: OperationKind) -> TransferOptions {
        TransferOptions::new(kind)
    }

    // ========================================================================
    // Money Movement
    // ========================================================================

    #[tokio::test]
    async fn test_p2p_transfer_writes_double_entry() {
        let h = TestHarness::standard(2000, 0).await;

        let view = h
            .engine
            .create_transfer(&p2p("p2p-1", 1000), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();

        assert_eq!(view.status, TransferStatus::Completed);
        assert_eq!(view.amount, 1000);
        assert_eq!(h.store.balance(ALICE).await, Some(1000));
        assert_eq!(h.store.balance(BOB).await, Some(1000));

        let transfer = h.store.find_by_reference("p2p-1").await.unwrap().unwrap();
        assert_eq!(transfer.transaction_id.to_string(), view.transaction_id);

        let entries = h.store.find_entries(transfer.transaction_id).await.unwrap();
        assert_eq!(entries.len(), 2);
        let debit = entries
            .iter()
            .find(|e| e.direction == EntryDirection::Debit)
            .unwrap();
        let credit = entries
            .iter()
            .find(|e| e.direction == EntryDirection::Credit)
            .unwrap();
        assert_eq!(debit.account_id, ALICE);
        assert_eq!(credit.account_id, BOB);
        assert_eq!(debit.amount, 1000);
        assert_eq!(credit.amount, 1000);
        assert_eq!(debit.note, format!("Transfer to {}", BOB));
        assert_eq!(credit.note, format!("Transfer from {}", ALICE));
        assert_eq!(debit.timestamp, transfer.created_at);
    }

    #[tokio::test]
    async fn test_insufficient_balance_has_no_side_effects() {
        let h = TestHarness::standard(500, 0).await;

        let err = h
            .engine
            .create_transfer(&p2p("p2p-poor", 1000), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::InsufficientBalance);
        assert_eq!(h.store.balance(ALICE).await, Some(500));
        assert_eq!(h.store.balance(BOB).await, Some(0));
        assert_eq!(h.store.transfer_count().await, 0);
        assert_eq!(h.store.entry_count().await, 0);
        // Business failures are not retried
        assert_eq!(h.store.account_reads(), 1);
        assert_eq!(h.store.atomic_calls(), 0);
    }

    #[tokio::test]
    async fn test_deposit_from_holding_account() {
        let h = TestHarness::new(
            vec![
                Account::new(HOLDING, "Holding", "MYR", 10000),
                Account::new(ALICE, "Alice", "MYR", 0),
            ],
            RetryPolicy::default(),
        )
        .await;

        let req = TransferRequest::new("dep-1", "MYR", 1000).to_account(ALICE);
        h.engine
            .create_transfer(&req, &opts(OperationKind::Deposit))
            .await
            .unwrap();

        assert_eq!(h.store.balance(HOLDING).await, Some(9000));
        assert_eq!(h.store.balance(ALICE).await, Some(1000));

        let transfer = h.store.find_by_reference("dep-1").await.unwrap().unwrap();
        assert_eq!(transfer.kind, OperationKind::Deposit);
        assert_eq!(transfer.source_account_id, HOLDING);
        assert_eq!(transfer.source_account["number"], HOLDING);
        assert_eq!(transfer.destination_account["number"], ALICE);
    }

    #[tokio::test]
    async fn test_withdrawal_from_holding_account_rejected() {
        let h = TestHarness::standard(0, 0).await;

        let req = TransferRequest::new("w-holding", "MYR", 100).from_account(HOLDING);
        let err = h
            .engine
            .create_transfer(&req, &opts(OperationKind::Withdrawal))
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::InvalidSourceAccount);
        assert_eq!(h.store.account_reads(), 0);
        assert_eq!(h.store.atomic_calls(), 0);
        assert_eq!(h.store.balance(HOLDING).await, Some(0));
    }

    #[tokio::test]
    async fn test_underfunded_wallet_holding_fails_fast() {
        // Holding seeded as a plain wallet account: the balance check applies
        let h = TestHarness::new(
            vec![
                Account::new(HOLDING, "Holding", "MYR", 50),
                Account::new(ALICE, "Alice", "MYR", 0),
            ],
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
        .await;

        let req = TransferRequest::new("dep-big", "MYR", 100).to_account(ALICE);
        let err = h
            .engine
            .create_transfer(&req, &opts(OperationKind::Deposit))
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::BalanceCheckViolated(HOLDING.into()));
        assert_eq!(h.store.atomic_calls(), 1);
        assert_eq!(h.store.balance(HOLDING).await, Some(50));
        assert_eq!(h.store.balance(ALICE).await, Some(0));
        assert_eq!(h.store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_accounts() {
        let h = TestHarness::standard(100, 0).await;

        let req = TransferRequest::new("w-ghost", "MYR", 10).from_account("ghost");
        let err = h
            .engine
            .create_transfer(&req, &opts(OperationKind::Withdrawal))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidSourceAccount);

        let req = TransferRequest::new("d-ghost", "MYR", 10).to_account("ghost");
        let err = h
            .engine
            .create_transfer(&req, &opts(OperationKind::Deposit))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidDestinationAccount);

        // P2P without a destination at all
        let req = TransferRequest::new("p-ghost", "MYR", 10).from_account(ALICE);
        let err = h
            .engine
            .create_transfer(&req, &opts(OperationKind::P2pTransfer))
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidDestinationAccount);

        assert_eq!(h.store.transfer_count().await, 0);
    }

    // ========================================================================
    // Idempotency
    // ========================================================================

    #[tokio::test]
    async fn test_same_key_applies_once() {
        let h = TestHarness::standard(2000, 0).await;
        let req = p2p("same-key", 300);

        let first = h
            .engine
            .create_transfer(&req, &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();
        let second = h
            .engine
            .create_transfer(&req, &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(h.store.balance(ALICE).await, Some(1700));
        assert_eq!(h.store.transfer_count().await, 1);
        assert_eq!(h.store.entry_count().await, 2);
        assert_eq!(h.store.atomic_calls(), 1);
    }

    #[tokio::test]
    async fn test_replay_ignores_changed_payload() {
        let h = TestHarness::standard(2000, 0).await;

        let first = h
            .engine
            .create_transfer(&p2p("key", 300), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();
        // Same key, different amount: the stored transfer wins
        let replay = h
            .engine
            .create_transfer(&p2p("key", 999), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();

        assert_eq!(replay.amount, 300);
        assert_eq!(replay.transaction_id, first.transaction_id);
        assert_eq!(h.store.balance(BOB).await, Some(300));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key_applies_once() {
        let h = TestHarness::new(
            vec![
                Account::system(HOLDING, "MYR"),
                Account::new(ALICE, "Alice", "MYR", 10_000),
                Account::new(BOB, "Bob", "MYR", 0),
            ],
            RetryPolicy::new(50, Duration::from_millis(1)),
        )
        .await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .create_transfer(&p2p("race", 100), &opts(OperationKind::P2pTransfer))
                    .await
            }));
        }

        let mut ids: Vec<String> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().transaction_id)
            .collect();
        ids.dedup();

        assert_eq!(ids.len(), 1, "every caller sees the same transfer");
        assert_eq!(h.store.transfer_count().await, 1);
        assert_eq!(h.store.entry_count().await, 2);
        assert_eq!(h.store.balance(ALICE).await, Some(9_900));
        assert_eq!(h.store.balance(BOB).await, Some(100));
    }

    #[tokio::test]
    async fn test_same_key_after_drained_balance_replays_winner() {
        let h = TestHarness::standard(100, 0).await;
        let winner = h
            .engine
            .create_transfer(&p2p("k", 100), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();

        // Second request saw no record, then read Alice at 0
        let late = TransferEngine::new(
            Arc::new(h.store.clone()),
            Arc::new(LateLookupLedger::new(h.store.clone())),
            h.engine.config().clone(),
        );
        let replay = late
            .create_transfer(&p2p("k", 100), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();

        assert_eq!(replay, winner);
        assert_eq!(h.store.atomic_calls(), 1);
        assert_eq!(h.store.transfer_count().await, 1);
        assert_eq!(h.store.balance(ALICE).await, Some(0));
        assert_eq!(h.store.balance(BOB).await, Some(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key_with_exact_balance() {
        let h = TestHarness::new(
            vec![
                Account::system(HOLDING, "MYR"),
                Account::new(ALICE, "Alice", "MYR", 100),
                Account::new(BOB, "Bob", "MYR", 0),
            ],
            RetryPolicy::new(50, Duration::from_millis(1)),
        )
        .await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .create_transfer(&p2p("exact", 100), &opts(OperationKind::P2pTransfer))
                    .await
            }));
        }

        let mut ids: Vec<String> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().transaction_id)
            .collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 1);
        assert_eq!(h.store.transfer_count().await, 1);
        assert_eq!(h.store.balance(ALICE).await, Some(0));
        assert_eq!(h.store.balance(BOB).await, Some(100));
    }

    // ========================================================================
    // Conservation & Contention
    // ========================================================================

    #[tokio::test]
    async fn test_total_balance_is_conserved() {
        let h = TestHarness::standard(5000, 5000).await;
        let before = h.store.total_balance().await;

        h.engine
            .create_transfer(&p2p("c1", 700), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap();
        let req = TransferRequest::new("c2", "MYR", 2500).to_account(BOB);
        h.engine
            .create_transfer(&req, &opts(OperationKind::Deposit))
            .await
            .unwrap();
        let req = TransferRequest::new("c3", "MYR", 1200).from_account(BOB);
        h.engine
            .create_transfer(&req, &opts(OperationKind::Withdrawal))
            .await
            .unwrap();
        // Rejected operations must not leak either
        let _ = h
            .engine
            .create_transfer(&p2p("c4", 1_000_000), &opts(OperationKind::P2pTransfer))
            .await;

        assert_eq!(h.store.total_balance().await, before);
        assert_eq!(h.store.balance(HOLDING).await, Some(-2500 + 1200));
        assert_eq!(h.store.entry_count().await, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let h = TestHarness::new(
            vec![
                Account::system(HOLDING, "MYR"),
                Account::new(ALICE, "Alice", "MYR", 1000),
            ],
            RetryPolicy::new(100, Duration::from_millis(1)),
        )
        .await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                let req = TransferRequest::new(format!("w-{}", i), "MYR", 300).from_account(ALICE);
                engine
                    .create_transfer(&req, &opts(OperationKind::Withdrawal))
                    .await
            }));
        }

        let mut successes = 0i64;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(TransferError::InsufficientBalance) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        let balance = h.store.balance(ALICE).await.unwrap();
        assert!(successes >= 1);
        assert!(balance >= 0);
        assert_eq!(balance, 1000 - 300 * successes);
        assert_eq!(h.store.entry_count().await as i64, 2 * successes);
        assert_eq!(h.store.balance(HOLDING).await, Some(300 * successes));
    }

    // ========================================================================
    // Retry Limits
    // ========================================================================

    #[tokio::test]
    async fn test_persistent_transient_failure_exhausts_retries() {
        let h = TestHarness::standard(1000, 0).await;
        h.store.fail_next_commits(u32::MAX);

        let err = h
            .engine
            .create_transfer(&p2p("flaky", 10), &opts(OperationKind::P2pTransfer))
            .await
            .unwrap_err();

        match err {
            TransferError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.is_retryable());
            }
            other => panic!("expected RetriesExhausted, got {}", other),
        }
        assert_eq!(h.store.atomic_calls(), 4);
        assert_eq!(h.store.transfer_count().await, 0);
        assert_eq!(h.store.balance(ALICE).await, Some(1000));
    }

    #[tokio::test]
    async fn test_deadline_stops_retrying() {
        let h = TestHarness::new(
            vec![
                Account::new(ALICE, "Alice", "MYR", 1000),
                Account::new(BOB, "Bob", "MYR", 0),
            ],
            RetryPolicy::new(1000, Duration::from_millis(20)),
        )
        .await;
        h.store.fail_next_commits(u32::MAX);

        let err = h
            .engine
            .create_transfer(
                &p2p("slow", 10),
                &opts(OperationKind::P2pTransfer).with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        match err {
            TransferError::DeadlineExceeded { attempts, last } => {
                assert!(attempts < 1000);
                assert!(last.is_some());
            }
            other => panic!("expected DeadlineExceeded, got {}", other),
        }
        assert_eq!(h.store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_deadline_does_not_mask_business_error() {
        let h = TestHarness::standard(10, 0).await;

        let err = h
            .engine
            .create_transfer(
                &p2p("poor", 100),
                &opts(OperationKind::P2pTransfer).with_timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InsufficientBalance);
    }
}
