//! Test fixtures.

mod two_node;

pub use two_node::{RelayHandle, TwoNodeFixture, wait_until};
