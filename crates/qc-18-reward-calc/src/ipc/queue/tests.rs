use super::*;
use crate::domain::entities::*;
use crate::test_utils::RecordingHandler;
use shared_types::{Address, U256};

fn queue() -> (CorrelationQueue, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    (CorrelationQueue::new(handler.clone()), handler)
}

fn ready_message() -> IncomingMessage {
    IncomingMessage::notification(Notification::Ready(ReadyInfo {
        version: 3,
        block_height: 10,
        block_hash: [1; 32],
    }))
}

fn ready_queue() -> (CorrelationQueue, Arc<RecordingHandler>) {
    let (mut queue, handler) = queue();
    queue.on_incoming(ready_message()).unwrap();
    (queue, handler)
}

fn query_response(msg_id: u32, seed: u8) -> IncomingMessage {
    IncomingMessage::response(
        msg_id,
        Response::Query(IScoreInfo {
            address: Address::eoa([seed; 20]),
            iscore: U256::from(seed),
            block_height: 10,
        }),
    )
}

#[test]
fn test_enqueue_before_ready_is_rejected() {
    let (mut queue, _) = queue();
    let err = queue.enqueue_send(Request::Version).unwrap_err();
    assert_eq!(err, RewardCalcError::EngineNotReady);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn test_ready_notification_flips_liveness_and_reaches_handler() {
    let (mut queue, handler) = queue();
    let mut rx = queue.subscribe();
    assert_eq!(queue.liveness(), EngineLiveness::NotReady);

    queue.on_incoming(ready_message()).unwrap();

    assert_eq!(queue.liveness(), EngineLiveness::Ready);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), EngineLiveness::Ready);
    assert_eq!(handler.ready_count(), 1);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn test_message_before_ready_is_protocol_violation() {
    let (mut queue, handler) = queue();
    let err = queue.on_incoming(query_response(1, 1)).unwrap_err();
    assert_eq!(err, RewardCalcError::EngineNotReady);

    let done = IncomingMessage::notification(Notification::CalculateDone(CalculateDoneInfo {
        success: true,
        block_height: 100,
        iscore: U256::zero(),
        state_hash: vec![],
    }));
    assert!(queue.on_incoming(done).is_err());
    assert_eq!(handler.calculate_done_count(), 0);
}

#[tokio::test]
async fn test_out_of_order_responses_complete_their_own_calls() {
    let (mut queue, _) = ready_queue();
    let mut handles = Vec::new();
    for seed in 0..5u8 {
        let (frame, handle) = queue
            .enqueue_send(Request::Query {
                address: Address::eoa([seed; 20]),
            })
            .unwrap();
        handles.push((seed, frame.msg_id, handle.unwrap()));
    }
    assert_eq!(queue.pending_count(), 5);

    for (seed, msg_id, _) in handles.iter().rev() {
        queue.on_incoming(query_response(*msg_id, *seed)).unwrap();
    }
    assert_eq!(queue.pending_count(), 0);

    for (seed, _, handle) in handles {
        match handle.await.unwrap() {
            Response::Query(info) => assert_eq!(info.address, Address::eoa([seed; 20])),
            other => panic!("unexpected response {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unmatched_response_is_discarded() {
    let (mut queue, _) = ready_queue();
    let (frame, handle) = queue.enqueue_send(Request::Version).unwrap();
    let handle = handle.unwrap();

    queue.on_incoming(query_response(frame.msg_id + 100, 1)).unwrap();
    assert!(queue.contains(frame.msg_id));
    assert_eq!(queue.pending_count(), 1);

    queue
        .on_incoming(IncomingMessage::response(
            frame.msg_id,
            Response::Version(VersionInfo {
                version: 3,
                block_height: 10,
            }),
        ))
        .unwrap();
    assert!(matches!(handle.await, Ok(Response::Version(_))));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let (mut queue, _) = ready_queue();
    let _first = queue.register(7, MessageKind::Version).unwrap();
    assert_eq!(
        queue.register(7, MessageKind::Query).unwrap_err(),
        RewardCalcError::DuplicateMsgId(7)
    );
    assert_eq!(queue.pending_count(), 1);
}

#[test]
fn test_msg_ids_increase() {
    let (mut queue, _) = ready_queue();
    let (a, _) = queue.enqueue_send(Request::Version).unwrap();
    let (b, _) = queue.enqueue_send(Request::Version).unwrap();
    assert_eq!(b.msg_id, a.msg_id + 1);
}

#[test]
fn test_allocation_skips_ids_still_in_flight() {
    let (mut queue, _) = ready_queue();
    let _held_5 = queue.register(5, MessageKind::Calculate).unwrap();
    let _held_6 = queue.register(6, MessageKind::Calculate).unwrap();
    queue.last_msg_id = 4;

    let ids: Vec<_> = (0..3)
        .map(|_| queue.enqueue_send(Request::Version).unwrap().0.msg_id)
        .collect();
    assert_eq!(ids, vec![7, 8, 9]);
    assert_eq!(queue.pending_count(), 5);
}

#[test]
fn test_allocation_skips_held_id_across_wrap() {
    let (mut queue, _) = ready_queue();
    let _held = queue.register(0, MessageKind::Calculate).unwrap();
    queue.last_msg_id = MSG_ID_MODULUS - 1;

    let (frame, _) = queue.enqueue_send(Request::Version).unwrap();
    assert_eq!(frame.msg_id, 1);
}

#[test]
fn test_commit_claim_creates_no_pending_call() {
    let (mut queue, _) = ready_queue();
    let claim = ClaimRef {
        address: Address::eoa([2; 20]),
        block_height: 5,
        block_hash: [0; 32],
        tx_index: 0,
        tx_hash: [0; 32],
    };
    let (frame, handle) = queue
        .enqueue_send(Request::CommitClaim {
            success: true,
            claim,
        })
        .unwrap();
    assert!(handle.is_none());
    assert!(!queue.contains(frame.msg_id));
}

#[tokio::test]
async fn test_cancelled_call_ignores_late_response() {
    let (mut queue, _) = ready_queue();
    let (frame, handle) = queue.enqueue_send(Request::Version).unwrap();
    assert!(queue.cancel(frame.msg_id));
    assert!(!queue.cancel(frame.msg_id));

    queue
        .on_incoming(IncomingMessage::response(
            frame.msg_id,
            Response::Version(VersionInfo {
                version: 1,
                block_height: 1,
            }),
        ))
        .unwrap();
    assert_eq!(
        handle.unwrap().await.unwrap_err(),
        RewardCalcError::ConnectionClosed
    );
}

#[tokio::test]
async fn test_fail_all_completes_everything_and_resets_liveness() {
    let (mut queue, _) = ready_queue();
    let (_, a) = queue.enqueue_send(Request::Version).unwrap();
    let (_, b) = queue.enqueue_send(Request::QueryCalculateStatus).unwrap();

    queue.fail_all(RewardCalcError::ConnectionClosed);

    assert_eq!(queue.pending_count(), 0);
    assert_eq!(queue.liveness(), EngineLiveness::NotReady);
    assert_eq!(a.unwrap().await.unwrap_err(), RewardCalcError::ConnectionClosed);
    assert_eq!(b.unwrap().await.unwrap_err(), RewardCalcError::ConnectionClosed);
    assert_eq!(
        queue.enqueue_send(Request::Version).unwrap_err(),
        RewardCalcError::EngineNotReady
    );
}

#[tokio::test]
async fn test_mismatched_response_kind_fails_the_call() {
    let (mut queue, _) = ready_queue();
    let (frame, handle) = queue.enqueue_send(Request::Version).unwrap();
    queue.on_incoming(query_response(frame.msg_id, 1)).unwrap();
    assert!(matches!(
        handle.unwrap().await,
        Err(RewardCalcError::Protocol(_))
    ));
}

#[test]
fn test_calculate_done_goes_to_handler_only() {
    let (mut queue, handler) = ready_queue();
    queue
        .on_incoming(IncomingMessage::notification(Notification::CalculateDone(
            CalculateDoneInfo {
                success: true,
                block_height: 100,
                iscore: U256::from(77u64),
                state_hash: vec![9; 32],
            },
        )))
        .unwrap();
    assert_eq!(handler.calculate_done_count(), 1);
    assert_eq!(handler.last_calculate_done().unwrap().block_height, 100);
    assert_eq!(queue.pending_count(), 0);
}
