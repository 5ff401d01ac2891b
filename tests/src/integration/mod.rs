//! # Integration Tests
//!
//! The node side runs for real; the engine is the simulated one from
//! `qc_18_reward_calc::test_utils`, connected over a Unix socket.

pub mod e2e_reward_cycle;
pub mod flows;
