//! Testing utilities and mock implementations
//!
//! Mocks for exercising the dispatch loop without a broker.

pub mod mocks;

pub use mocks::*;
