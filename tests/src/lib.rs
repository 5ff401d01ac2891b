//! # Quantum-Chain Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Performance tests per subsystem
//! │   └── qc_18_reward_calc.rs
//! │
//! └── integration/      # Node <-> reward engine flows over the real socket
//!     ├── flows.rs              # IPC correlation, timeouts, notifications
//!     └── e2e_reward_cycle.rs   # Data log, synchronizer and node runtime
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::flows::
//! cargo test -p qc-tests integration::e2e_reward_cycle::
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

pub mod benchmarks;
pub mod integration;
