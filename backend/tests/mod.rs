//! Test module organization
//!
//! Re-exports the shared fixtures for the integration test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    FakeChain, FixedGenerator, TestEnv, YieldingLedger, BASE_URL, PRICE_LAMPORTS, TREE_CAPACITY,
};
