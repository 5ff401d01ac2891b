use super::*;
use proptest::prelude::*;
use shared_types::ZERO_HASH;

fn read(bytes: &[u8]) -> Value {
    rmpv::decode::read_value(&mut &bytes[..]).unwrap()
}

fn addr(seed: u8) -> Address {
    Address::eoa([seed; 20])
}

fn claim() -> ClaimRef {
    ClaimRef {
        address: addr(7),
        block_height: 120,
        block_hash: [0xab; 32],
        tx_index: 3,
        tx_hash: [0xcd; 32],
    }
}

fn all_requests() -> Vec<Request> {
    vec![
        Request::Version,
        Request::Calculate {
            snapshot_path: "/data/iiss_rc_db_100".to_string(),
            block_height: 100,
        },
        Request::Query { address: addr(1) },
        Request::Claim(claim()),
        Request::CommitBlock {
            success: true,
            block_height: 101,
            block_hash: [0x11; 32],
        },
        Request::CommitClaim {
            success: false,
            claim: claim(),
        },
        Request::QueryCalculateStatus,
        Request::QueryCalculateResult { block_height: 100 },
        Request::Rollback {
            block_height: 99,
            block_hash: [0x22; 32],
        },
        Request::Init { block_height: 50 },
    ]
}

fn all_incoming() -> Vec<IncomingMessage> {
    vec![
        IncomingMessage::response(
            1,
            Response::Version(VersionInfo {
                version: 2,
                block_height: 10,
            }),
        ),
        IncomingMessage::response(
            2,
            Response::Calculate(CalculateAck {
                status: CalculateStatus::AlreadyRunning,
                block_height: 100,
            }),
        ),
        IncomingMessage::response(
            3,
            Response::Query(IScoreInfo {
                address: Address::contract([9; 20]),
                iscore: U256::from(1_000_000u64),
                block_height: 100,
            }),
        ),
        IncomingMessage::response(
            4,
            Response::Claim(ClaimResult {
                claim: claim(),
                iscore: U256::from(5000u64),
            }),
        ),
        IncomingMessage::response(
            5,
            Response::CommitBlock(BlockAck {
                success: true,
                block_height: 101,
                block_hash: [0x11; 32],
            }),
        ),
        IncomingMessage::response(
            6,
            Response::QueryCalculateStatus(CalculateStatusReport {
                status: CalculationProgress::InProgress,
                block_height: 100,
            }),
        ),
        IncomingMessage::response(
            7,
            Response::QueryCalculateResult(CalculateResultReport {
                status: CalculationProgress::Done,
                block_height: 100,
                iscore: U256::from(42u64),
                state_hash: vec![0xee; 32],
            }),
        ),
        IncomingMessage::response(
            8,
            Response::Rollback(BlockAck {
                success: false,
                block_height: 99,
                block_hash: ZERO_HASH,
            }),
        ),
        IncomingMessage::response(
            9,
            Response::Init(InitAck {
                success: true,
                block_height: 50,
            }),
        ),
        IncomingMessage::notification(Notification::Ready(ReadyInfo {
            version: 2,
            block_height: 49,
            block_hash: [0x33; 32],
        })),
        IncomingMessage::notification(Notification::CalculateDone(CalculateDoneInfo {
            success: true,
            block_height: 100,
            iscore: U256::MAX,
            state_hash: vec![0x44; 32],
        })),
    ]
}

#[test]
fn test_every_request_kind_round_trips() {
    for (i, request) in all_requests().into_iter().enumerate() {
        let envelope = Envelope::new(i as u32 + 100, request);
        let bytes = encode_request(&envelope).unwrap();
        assert_eq!(decode_request(read(&bytes)).unwrap(), envelope);
    }
}

#[test]
fn test_every_incoming_kind_round_trips() {
    for message in all_incoming() {
        let bytes = encode_incoming(&message).unwrap();
        assert_eq!(decode_incoming(read(&bytes)).unwrap(), message);
    }
}

#[test]
fn test_frame_layout_is_kind_id_payload() {
    let bytes = encode_request(&Envelope::new(
        7,
        Request::Init { block_height: 50 },
    ))
    .unwrap();
    let value = read(&bytes);
    let items = value.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_i64(), Some(9));
    assert_eq!(items[1].as_u64(), Some(7));
    assert_eq!(items[2].as_array().unwrap()[0].as_u64(), Some(50));
}

#[test]
fn test_version_request_has_nil_payload() {
    let bytes = encode_request(&Envelope::new(1, Request::Version)).unwrap();
    let value = read(&bytes);
    assert!(value.as_array().unwrap()[2].is_nil());
}

#[test]
fn test_address_is_21_bytes_on_the_wire() {
    let bytes = encode_request(&Envelope::new(1, Request::Query { address: addr(5) })).unwrap();
    let value = read(&bytes);
    let payload = value.as_array().unwrap()[2].as_array().unwrap();
    let wire = payload[0].as_slice().unwrap();
    assert_eq!(wire.len(), 21);
    assert_eq!(wire[0], 0x00);
}

#[test]
fn test_none_is_not_encodable() {
    let err = encode_request(&Envelope::new(1, Request::None)).unwrap_err();
    assert!(matches!(err, RewardCalcError::Protocol(_)));
}

#[test]
fn test_unknown_kind_is_protocol_error() {
    let frame = Value::Array(vec![Value::from(42), Value::from(1u32), Value::Nil]);
    assert!(matches!(
        decode_incoming(frame),
        Err(RewardCalcError::Protocol(_))
    ));
}

#[test]
fn test_unknown_status_code_is_protocol_error() {
    let frame = Value::Array(vec![
        Value::from(MessageKind::Calculate.code()),
        Value::from(1u32),
        Value::Array(vec![Value::from(9), Value::from(100u64)]),
    ]);
    assert!(matches!(
        decode_incoming(frame),
        Err(RewardCalcError::Protocol(_))
    ));
}

#[test]
fn test_request_kinds_are_rejected_in_incoming_direction() {
    let bytes = encode_request(&Envelope::new(
        3,
        Request::CommitClaim {
            success: true,
            claim: claim(),
        },
    ))
    .unwrap();
    assert!(decode_incoming(read(&bytes)).is_err());
}

#[test]
fn test_notifications_are_rejected_in_request_direction() {
    let bytes = encode_incoming(&IncomingMessage::notification(Notification::Ready(
        ReadyInfo {
            version: 1,
            block_height: 0,
            block_hash: ZERO_HASH,
        },
    )))
    .unwrap();
    assert!(decode_request(read(&bytes)).is_err());
}

#[test]
fn test_short_hash_is_protocol_error() {
    let frame = Value::Array(vec![
        Value::from(MessageKind::Rollback.code()),
        Value::from(1u32),
        Value::Array(vec![
            Value::from(true),
            Value::from(5u64),
            Value::Binary(vec![0u8; 31]),
        ]),
    ]);
    assert!(matches!(
        decode_incoming(frame),
        Err(RewardCalcError::Protocol(_))
    ));
}

#[test]
fn test_missing_field_is_protocol_error() {
    let frame = Value::Array(vec![
        Value::from(MessageKind::Version.code()),
        Value::from(1u32),
        Value::Array(vec![Value::from(1u64)]),
    ]);
    assert!(matches!(
        decode_incoming(frame),
        Err(RewardCalcError::Protocol(_))
    ));
}

#[test]
fn test_non_array_frame_is_protocol_error() {
    assert!(decode_incoming(Value::from(5)).is_err());
    assert!(decode_incoming(Value::Array(vec![Value::from(0)])).is_err());
}

fn u256_strategy() -> impl Strategy<Value = U256> {
    proptest::array::uniform32(any::<u8>()).prop_map(|bytes| U256::from_big_endian(&bytes))
}

proptest! {
    #[test]
    fn query_response_round_trips(
        msg_id in 0u32..MSG_ID_MODULUS,
        body in proptest::array::uniform20(any::<u8>()),
        iscore in u256_strategy(),
        block_height in any::<u64>(),
    ) {
        let message = IncomingMessage::response(msg_id, Response::Query(IScoreInfo {
            address: Address::eoa(body),
            iscore,
            block_height,
        }));
        let bytes = encode_incoming(&message).unwrap();
        prop_assert_eq!(decode_incoming(read(&bytes)).unwrap(), message);
    }

    #[test]
    fn calculate_request_round_trips(
        msg_id in any::<u32>(),
        path in "[a-z0-9_/]{0,64}",
        block_height in any::<u64>(),
    ) {
        let envelope = Envelope::new(msg_id, Request::Calculate {
            snapshot_path: path,
            block_height,
        });
        let bytes = encode_request(&envelope).unwrap();
        prop_assert_eq!(decode_request(read(&bytes)).unwrap(), envelope);
    }
}
