//! # QC-18 Reward Calculator Benchmarks
//!
//! Hot paths on the node side of the engine socket:
//! - Request encoding: one frame per block (COMMIT_BLOCK)
//! - Stream decoding: responses arriving split across reads
//! - Data log flush: one atomic batch per block

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use qc_18_reward_calc::ipc::codec::{encode_incoming, encode_request};
use qc_18_reward_calc::ipc::{Envelope, IncomingMessage, IncomingUnpacker, Request, Response};
use qc_18_reward_calc::{
    DataLog, DataRecord, DelegationEntry, FileStoreOpener, IScoreInfo, TxData, TxRecord,
};
use shared_types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn query_response(msg_id: u32) -> Vec<u8> {
    let message = IncomingMessage::response(
        msg_id,
        Response::Query(IScoreInfo {
            address: Address::eoa([msg_id as u8; 20]),
            iscore: U256::from(msg_id as u64 * 1_000_000_007),
            block_height: 1_000_000 + msg_id as u64,
        }),
    );
    encode_incoming(&message).unwrap()
}

pub fn bench_request_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-codec");
    group.measurement_time(Duration::from_secs(5));

    let frame = Envelope::new(
        42,
        Request::CommitBlock {
            success: true,
            block_height: 1_234_567,
            block_hash: [0xab; 32],
        },
    );
    group.bench_function("encode_commit_block", |b| {
        b.iter(|| black_box(encode_request(black_box(&frame)).unwrap()))
    });

    group.finish();
}

pub fn bench_stream_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-unpacker");
    group.measurement_time(Duration::from_secs(5));

    for count in [1u32, 16, 256] {
        let stream: Vec<u8> = (1..=count).flat_map(query_response).collect();
        group.throughput(Throughput::Bytes(stream.len() as u64));

        for chunk in [7usize, 4096] {
            group.bench_with_input(
                BenchmarkId::new(format!("decode_chunk_{}", chunk), count),
                &stream,
                |b, stream| {
                    b.iter(|| {
                        let mut unpacker = IncomingUnpacker::new();
                        let mut decoded = 0u32;
                        for piece in stream.chunks(chunk) {
                            unpacker.feed(piece);
                            while let Ok(Some(_)) = unpacker.next_message() {
                                decoded += 1;
                            }
                        }
                        assert_eq!(decoded, count);
                        black_box(decoded)
                    })
                },
            );
        }
    }

    group.finish();
}

pub fn bench_data_log_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-18-data-log");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for txs in [1usize, 50, 500] {
        let records: Vec<DataRecord> = (0..txs)
            .map(|i| {
                DataRecord::Transaction(TxRecord {
                    address: Address::eoa([(i % 251) as u8; 20]),
                    block_height: 10,
                    data: TxData::Delegation(vec![DelegationEntry {
                        address: Address::eoa([0xa1; 20]),
                        amount: U256::from(i as u64),
                    }]),
                })
            })
            .collect();

        group.throughput(Throughput::Elements(txs as u64));
        group.bench_with_input(BenchmarkId::new("append_flush", txs), &records, |b, records| {
            let dir = TempDir::new().unwrap();
            let mut log = DataLog::open(dir.path(), Arc::new(FileStoreOpener)).unwrap();
            b.iter(|| {
                for record in records {
                    log.append(record).unwrap();
                }
                log.flush().unwrap();
            })
        });
    }

    group.finish();
}
