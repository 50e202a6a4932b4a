//! Testing utilities and mock implementations
//!
//! Mocks for the transport and resolver seams, so sessions can be driven
//! through every lifecycle state without a broker or DNS.

pub mod mocks;

pub use mocks::*;
