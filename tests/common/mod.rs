//! Common test infrastructure shared across integration tests.
//!
//! ```ignore
//! mod common;
//! use common::{handshake, TestConfig, MAX_HANDSHAKE_POLLS};
//! ```

pub mod test_utils;

#[allow(unused_imports)]
pub use test_utils::{
    handshake, handshake_pair, lossy_pair, play_round, TestConfig, TestLink, MAX_HANDSHAKE_POLLS,
};
