//! # End-to-End Reward Cycle
//!
//! Blocks flow through the commit synchronizer into the data log, periods are
//! sealed into snapshots, the simulated engine is asked to calculate them and
//! the node removes each snapshot once CALCULATE_DONE arrives.
//!
//! ```text
//! block h ──► CommitSynchronizer ──► DataLog (current_db)
//!                  │                     │ h == next_calc_height
//!                  │                     ▼
//!                  │               iiss_rc_db_<h> ──► CALCULATE ──► engine
//!                  ▼                                                  │
//!             COMMIT_BLOCK                          CALCULATE_DONE ◄──┘
//!                                                         │
//!                                              snapshot removed
//! ```

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use node_runtime::{NodeConfig, NodeRuntime, StorageBackend, StorageConfig};
    use qc_18_reward_calc::service::snapshot_path;
    use qc_18_reward_calc::test_utils::{MockLauncher, RecordingHandler};
    use qc_18_reward_calc::{
        BlockData, BlockProduceInfo, CommitSynchronizer, DataLog, DataRecord, DelegationEntry,
        FileStoreOpener, GovernanceVariables, Header, MessageKind, PRepDelegation, PRepSnapshot,
        RecordKey, Request, RewardCalcConfig, RewardCalcProxy, StoreOpener, TxData, TxRecord,
    };
    use shared_types::{Address, BlockRef, U256};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(2);
    const PERIOD: u64 = 3;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn block_ref(height: u64) -> BlockRef {
        BlockRef::new(height, [height as u8 + 1; 32])
    }

    fn governance() -> GovernanceVariables {
        GovernanceVariables {
            block_height: 0,
            calculated_irep: U256::from(50_000u64),
            reward_rep: U256::from(1_200u64),
            main_prep_count: 22,
            sub_prep_count: 78,
        }
    }

    fn preps(height: u64) -> PRepSnapshot {
        PRepSnapshot {
            block_height: height,
            total_delegation: U256::from(3_000u64),
            preps: vec![
                PRepDelegation {
                    address: Address::eoa([0xa1; 20]),
                    delegated: U256::from(2_000u64),
                },
                PRepDelegation {
                    address: Address::eoa([0xa2; 20]),
                    delegated: U256::from(1_000u64),
                },
            ],
        }
    }

    fn delegation(seed: u8, height: u64) -> TxRecord {
        TxRecord {
            address: Address::eoa([seed; 20]),
            block_height: height,
            data: TxData::Delegation(vec![DelegationEntry {
                address: Address::eoa([0xa1; 20]),
                amount: U256::from(seed as u64),
            }]),
        }
    }

    /// Block `height` with `txs` delegations; P-Reps are reported every block
    /// but only change at genesis.
    fn block(height: u64, txs: u8) -> BlockData {
        BlockData {
            block: block_ref(height),
            revision: 9,
            produce_info: Some(BlockProduceInfo {
                block_height: height,
                generator: Address::eoa([0xa1; 20]),
                validators: vec![Address::eoa([0xa2; 20])],
            }),
            preps: Some(preps(height)),
            transactions: (0..txs).map(|s| delegation(s + 1, height)).collect(),
            governance: governance(),
        }
    }

    fn node_config(dir: &TempDir) -> NodeConfig {
        let mut reward_calc = RewardCalcConfig::for_testing(dir.path());
        reward_calc.calculation_period = PERIOD;
        NodeConfig {
            reward_calc,
            storage: StorageConfig {
                backend: StorageBackend::File,
                metadata_dir: dir.path().join("meta"),
            },
            ready_timeout: WAIT,
            notification_capacity: 8,
        }
    }

    async fn wait_until_gone(path: &Path) -> bool {
        tokio::time::timeout(WAIT, async {
            while path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    fn tx_indices(records: &[(RecordKey, DataRecord)]) -> Vec<u64> {
        records
            .iter()
            .filter_map(|(key, _)| match key {
                RecordKey::Transaction(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    // =============================================================================
    // SYNCHRONIZER OVER THE REAL PROXY
    // =============================================================================

    #[tokio::test]
    async fn test_two_periods_are_sealed_calculated_and_committed() {
        let dir = TempDir::new().unwrap();
        let config = RewardCalcConfig::for_testing(dir.path());
        let launcher = MockLauncher::default();
        let proxy = Arc::new(
            RewardCalcProxy::new(
                config.clone(),
                Arc::new(RecordingHandler::default()),
                Arc::new(launcher.clone()),
            )
            .unwrap(),
        );
        proxy.start().await.unwrap();
        proxy.wait_until_ready(WAIT).await.unwrap();

        let opener: Arc<dyn StoreOpener> = Arc::new(FileStoreOpener);
        let data_log = DataLog::open(&config.data_root, opener.clone()).unwrap();
        let metadata = opener.open(&dir.path().join("meta")).unwrap();
        let mut sync =
            CommitSynchronizer::new(proxy.clone(), data_log, metadata, PERIOD, 2).unwrap();
        sync.init().await.unwrap();

        let genesis = sync.genesis(block(0, 1)).await.unwrap();
        assert_eq!(
            genesis.sealed.as_ref().unwrap().snapshot_path,
            snapshot_path(&config.data_root, 0)
        );
        assert_eq!(sync.next_calc_height(), PERIOD);

        for height in 1..PERIOD {
            let outcome = sync.process_block(block(height, 2)).await.unwrap();
            assert!(outcome.sealed.is_none());
        }
        let sealed = sync
            .process_block(block(PERIOD, 1))
            .await
            .unwrap()
            .sealed
            .unwrap();
        assert_eq!(sealed.ack.block_height, PERIOD);
        assert_eq!(sync.next_calc_height(), 2 * PERIOD);
        assert_eq!(proxy.last_commit_point(), Some(block_ref(PERIOD)));

        // Blocks 1..=3 landed in the second snapshot with indices from zero.
        let records = sync.data_log().read_records(&sealed.snapshot_path).unwrap();
        assert_eq!(tx_indices(&records), vec![0, 1, 2, 3, 4]);
        assert!(records.iter().any(|(_, record)| *record
            == DataRecord::Header(Header {
                version: 2,
                block_height: PERIOD,
                revision: 9,
            })));
        assert!(records
            .iter()
            .any(|(key, _)| *key == RecordKey::GovernanceVariables(PERIOD)));
        // P-Reps did not change after genesis.
        assert!(!records
            .iter()
            .any(|(key, _)| matches!(key, RecordKey::PReps(_))));
        assert!(sync.data_log().records().unwrap().is_empty());

        proxy.close().await.unwrap();
        assert_eq!(
            launcher.request_kinds(),
            vec![
                MessageKind::Init,
                MessageKind::Calculate,
                MessageKind::CommitBlock,
                MessageKind::CommitBlock,
                MessageKind::CommitBlock,
                MessageKind::Calculate,
                MessageKind::CommitBlock,
            ]
        );
    }

    // =============================================================================
    // NODE RUNTIME
    // =============================================================================

    #[tokio::test]
    async fn test_calculate_done_removes_sealed_snapshot() {
        let dir = TempDir::new().unwrap();
        let config = node_config(&dir);
        let data_root = config.reward_calc.data_root.clone();
        let runtime = NodeRuntime::new(config, Arc::new(MockLauncher::default())).unwrap();
        runtime.start().await.unwrap();

        let outcome = runtime.process_block(block(0, 2)).await.unwrap();
        let snapshot = outcome.sealed.unwrap().snapshot_path;
        assert_eq!(snapshot, snapshot_path(&data_root, 0));
        assert!(wait_until_gone(&snapshot).await, "snapshot not removed");

        // The live log is untouched.
        assert!(data_root.join("current_db").is_dir());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_resumes_after_last_committed_block() {
        let dir = TempDir::new().unwrap();
        {
            let runtime =
                NodeRuntime::new(node_config(&dir), Arc::new(MockLauncher::default())).unwrap();
            runtime.start().await.unwrap();
            for height in 0..=4 {
                runtime.process_block(block(height, 1)).await.unwrap();
            }
            assert_eq!(runtime.last_committed().await, Some(block_ref(4)));
            runtime.shutdown().await;
        }

        let launcher = MockLauncher::default();
        let runtime = NodeRuntime::new(node_config(&dir), Arc::new(launcher.clone())).unwrap();
        assert_eq!(runtime.last_committed().await, Some(block_ref(4)));
        runtime.start().await.unwrap();

        // Block 5 is next; 6 closes the second period.
        assert!(runtime.process_block(block(4, 0)).await.is_err());
        assert!(runtime.process_block(block(5, 1)).await.unwrap().sealed.is_none());
        assert!(runtime.process_block(block(6, 1)).await.unwrap().sealed.is_some());
        runtime.shutdown().await;

        let requests = launcher.requests.lock().clone();
        assert_eq!(requests[0], Request::Init { block_height: 4 });
    }

    #[tokio::test]
    async fn test_rollback_within_period_then_continue() {
        let dir = TempDir::new().unwrap();
        let launcher = MockLauncher::default();
        let runtime = NodeRuntime::new(node_config(&dir), Arc::new(launcher.clone())).unwrap();
        runtime.start().await.unwrap();
        for height in 0..=4 {
            runtime.process_block(block(height, 1)).await.unwrap();
        }

        // Period 3 is sealed; rewinding past it is refused.
        assert!(runtime.rollback(block_ref(2)).await.is_err());

        assert_eq!(tx_indices(&runtime.live_records().await.unwrap()), vec![0]);
        runtime.rollback(block_ref(3)).await.unwrap();
        assert_eq!(runtime.last_committed().await, Some(block_ref(3)));
        assert_eq!(runtime.proxy().last_commit_point(), Some(block_ref(3)));
        // Block 4 of the abandoned chain is gone from the live log.
        assert!(runtime.live_records().await.unwrap().is_empty());

        let mut fork = block(4, 2);
        fork.block = BlockRef::new(4, [0xf4; 32]);
        runtime.process_block(fork).await.unwrap();
        assert_eq!(
            runtime.last_committed().await,
            Some(BlockRef::new(4, [0xf4; 32]))
        );
        let records = runtime.live_records().await.unwrap();
        assert_eq!(tx_indices(&records), vec![0, 1]);
        assert!(records.iter().all(|(_, record)| record.block_height() == 4));
        runtime.shutdown().await;

        assert!(launcher.request_kinds().contains(&MessageKind::Rollback));
    }
}
