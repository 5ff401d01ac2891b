//! # Quantum-Chain Subsystem Benchmarks
//!
//! | Subsystem | Path | Target |
//! |-----------|------|--------|
//! | qc-18 Reward Calculator | COMMIT_BLOCK encode | < 10μs |
//! | qc-18 Reward Calculator | Response stream decode | < 10μs per frame |
//! | qc-18 Reward Calculator | Data log flush, 50 txs | < 10ms |

use criterion::{criterion_group, criterion_main};
use qc_tests::benchmarks::qc_18_reward_calc::{
    bench_data_log_flush, bench_request_encoding, bench_stream_decoding,
};

criterion_group!(
    reward_calc,
    bench_request_encoding,
    bench_stream_decoding,
    bench_data_log_flush
);
criterion_main!(reward_calc);
