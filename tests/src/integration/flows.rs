//! # IPC Integration Flows
//!
//! The node-side event loop talks to a simulated engine over a real Unix
//! socket.
//!
//! ## Flows Tested:
//!
//! 1. **Correlation**: concurrent calls answered out of order reach their callers
//! 2. **Unmatched / mismatched responses**: dropped or failed without closing the connection
//! 3. **Timeouts**: a silent engine fails the call and frees its slot
//! 4. **Notifications**: READY and CALCULATE_DONE reach the handler
//! 5. **Proxy round trip**: every typed operation through a launched engine

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use qc_18_reward_calc::ipc::{IpcEventLoop, IpcHandle, Lane, Notification, Request, Response};
    use qc_18_reward_calc::test_utils::{
        MockEngine, MockEngineConfig, MockLauncher, RecordingHandler,
    };
    use qc_18_reward_calc::{
        CalculateDoneInfo, CalculateStatus, ClaimRef, IScoreInfo, InitAck, MessageKind,
        RewardCalcApi, RewardCalcConfig, RewardCalcError, RewardCalcProxy, VersionInfo,
    };
    use shared_types::{Address, U256};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(2);

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn bind(dir: &TempDir) -> (IpcHandle, Arc<RecordingHandler>, PathBuf) {
        let handler = Arc::new(RecordingHandler::default());
        let path = dir.path().join("rc.sock");
        let (event_loop, ipc) = IpcEventLoop::bind(&path, 16, handler.clone()).unwrap();
        tokio::spawn(event_loop.run());
        (ipc, handler, path)
    }

    async fn connected(dir: &TempDir) -> (IpcHandle, Arc<RecordingHandler>, MockEngine) {
        let (ipc, handler, path) = bind(dir);
        let engine = MockEngine::connect_ready(&path, 0).await.unwrap();
        ipc.wait_until_ready(WAIT).await.unwrap();
        (ipc, handler, engine)
    }

    fn version(block_height: u64) -> Response {
        Response::Version(VersionInfo {
            version: 3,
            block_height,
        })
    }

    // =============================================================================
    // CORRELATION
    // =============================================================================

    #[tokio::test]
    async fn test_concurrent_calls_answered_out_of_order_are_correlated() {
        let dir = TempDir::new().unwrap();
        let (ipc, _handler, mut engine) = connected(&dir).await;

        let calls: Vec<_> = (1..=3u8)
            .map(|seed| {
                let ipc = ipc.clone();
                let address = Address::eoa([seed; 20]);
                let call = tokio::spawn(async move {
                    ipc.call(Lane::Query, Request::Query { address }, WAIT).await
                });
                (address, call)
            })
            .collect();

        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(engine.expect_request(WAIT).await);
        }
        let mut ids: Vec<_> = frames.iter().map(|f| f.msg_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3, "msg_ids must be distinct");

        // Newest first.
        for frame in frames.iter().rev() {
            let Request::Query { address } = frame.body else {
                panic!("expected QUERY, got {:?}", frame.body);
            };
            let response = Response::Query(IScoreInfo {
                address,
                iscore: U256::from(address.body()[0] as u64 * 10),
                block_height: 5,
            });
            engine.respond(frame.msg_id, response).await.unwrap();
        }

        for (address, call) in calls {
            let Response::Query(info) = call.await.unwrap().unwrap() else {
                panic!("expected QUERY response");
            };
            assert_eq!(info.address, address);
            assert_eq!(info.iscore, U256::from(address.body()[0] as u64 * 10));
        }
        assert_eq!(ipc.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped_and_connection_survives() {
        let dir = TempDir::new().unwrap();
        let (ipc, _handler, mut engine) = connected(&dir).await;

        engine.respond(999, version(1)).await.unwrap();

        let call = {
            let ipc = ipc.clone();
            tokio::spawn(async move { ipc.call(Lane::Invoke, Request::Version, WAIT).await })
        };
        let frame = engine.expect_request(WAIT).await;
        assert_ne!(frame.msg_id, 999);
        engine.respond(frame.msg_id, version(8)).await.unwrap();

        assert_eq!(call.await.unwrap().unwrap(), version(8));
        assert!(ipc.is_ready());
    }

    #[tokio::test]
    async fn test_mismatched_response_kind_fails_only_that_call() {
        let dir = TempDir::new().unwrap();
        let (ipc, _handler, mut engine) = connected(&dir).await;

        let call = {
            let ipc = ipc.clone();
            tokio::spawn(async move { ipc.call(Lane::Invoke, Request::Version, WAIT).await })
        };
        let frame = engine.expect_request(WAIT).await;
        engine
            .respond(
                frame.msg_id,
                Response::Init(InitAck {
                    success: true,
                    block_height: 0,
                }),
            )
            .await
            .unwrap();
        assert!(matches!(
            call.await.unwrap(),
            Err(RewardCalcError::Protocol(_))
        ));

        // The connection is still usable.
        let call = {
            let ipc = ipc.clone();
            tokio::spawn(async move { ipc.call(Lane::Invoke, Request::Version, WAIT).await })
        };
        let frame = engine.expect_request(WAIT).await;
        engine.respond(frame.msg_id, version(2)).await.unwrap();
        assert_eq!(call.await.unwrap().unwrap(), version(2));
    }

    // =============================================================================
    // TIMEOUTS
    // =============================================================================

    #[tokio::test]
    async fn test_calculate_times_out_after_50ms_and_late_answer_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (ipc, _handler, mut engine) = connected(&dir).await;

        let started = Instant::now();
        let err = ipc
            .call(
                Lane::Invoke,
                Request::Calculate {
                    snapshot_path: "/data/iiss_rc_db_100".to_string(),
                    block_height: 100,
                },
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RewardCalcError::Timeout {
                operation: "CALCULATE",
                timeout_ms: 50
            }
        );
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(ipc.pending_count().await.unwrap(), 0);

        let frame = engine.expect_request(WAIT).await;
        assert_eq!(frame.body.kind(), MessageKind::Calculate);
        assert!(!ipc.contains(frame.msg_id).await.unwrap());

        // The engine answers late; nothing is waiting for it.
        engine
            .respond(
                frame.msg_id,
                Response::Calculate(qc_18_reward_calc::CalculateAck {
                    status: CalculateStatus::Accepted,
                    block_height: 100,
                }),
            )
            .await
            .unwrap();

        let call = {
            let ipc = ipc.clone();
            tokio::spawn(async move { ipc.call(Lane::Invoke, Request::Version, WAIT).await })
        };
        let frame = engine.expect_request(WAIT).await;
        engine.respond(frame.msg_id, version(100)).await.unwrap();
        assert_eq!(call.await.unwrap().unwrap(), version(100));
    }

    #[tokio::test]
    async fn test_calls_before_engine_connects_are_not_ready() {
        let dir = TempDir::new().unwrap();
        let (ipc, _handler, path) = bind(&dir);

        assert_eq!(
            ipc.call(Lane::Invoke, Request::Version, WAIT).await,
            Err(RewardCalcError::EngineNotReady)
        );
        assert!(ipc.wait_until_ready(Duration::from_millis(20)).await.is_err());

        let mut engine = MockEngine::connect_ready(&path, 0).await.unwrap();
        ipc.wait_until_ready(WAIT).await.unwrap();
        let call = {
            let ipc = ipc.clone();
            tokio::spawn(async move { ipc.call(Lane::Invoke, Request::Version, WAIT).await })
        };
        let frame = engine.expect_request(WAIT).await;
        engine.respond(frame.msg_id, version(0)).await.unwrap();
        assert!(call.await.unwrap().is_ok());
    }

    // =============================================================================
    // NOTIFICATIONS
    // =============================================================================

    #[tokio::test]
    async fn test_ready_and_calculate_done_reach_handler() {
        let dir = TempDir::new().unwrap();
        let (ipc, handler, path) = bind(&dir);

        let mut engine = MockEngine::connect_ready(&path, 42).await.unwrap();
        assert!(handler.wait_for_total(1, WAIT).await);
        assert_eq!(handler.last_ready().unwrap().block_height, 42);
        assert!(ipc.is_ready());

        let done = CalculateDoneInfo {
            success: true,
            block_height: 40,
            iscore: U256::from(123_456u64),
            state_hash: vec![0x5a; 32],
        };
        engine
            .send_notification(Notification::CalculateDone(done.clone()))
            .await
            .unwrap();
        assert!(handler.wait_for_total(2, WAIT).await);
        assert_eq!(handler.last_calculate_done(), Some(done));
    }

    // =============================================================================
    // PROXY ROUND TRIP
    // =============================================================================

    #[tokio::test]
    async fn test_proxy_round_trip_through_launched_engine() {
        let dir = TempDir::new().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let launcher = MockLauncher::new(MockEngineConfig {
            ready_block_height: 9,
            iscore: U256::from(5_000u64),
            ..MockEngineConfig::default()
        });
        let proxy = RewardCalcProxy::new(
            RewardCalcConfig::for_testing(dir.path()),
            handler.clone(),
            Arc::new(launcher.clone()),
        )
        .unwrap();

        proxy.start().await.unwrap();
        proxy.wait_until_ready(WAIT).await.unwrap();
        assert_eq!(handler.last_ready().unwrap().block_height, 9);

        let address = Address::contract([3; 20]);
        assert_eq!(
            proxy.query_iscore(address).await.unwrap().iscore,
            U256::from(5_000u64)
        );

        let claim = ClaimRef {
            address,
            block_height: 10,
            block_hash: [1u8; 32],
            tx_index: 0,
            tx_hash: [2u8; 32],
        };
        assert_eq!(proxy.claim_iscore(claim).await.unwrap().claim, claim);
        proxy.commit_claim(true, claim).await.unwrap();

        let ack = proxy
            .calculate(Path::new("/data/iiss_rc_db_10"), 10)
            .await
            .unwrap();
        assert_eq!(ack.block_height, 10);
        assert!(handler.wait_for_total(2, WAIT).await);
        assert_eq!(handler.last_calculate_done().unwrap().block_height, 10);

        proxy.close().await.unwrap();
        assert_eq!(
            launcher.request_kinds(),
            vec![
                MessageKind::Query,
                MessageKind::Claim,
                MessageKind::CommitClaim,
                MessageKind::Calculate,
            ]
        );
    }
}
