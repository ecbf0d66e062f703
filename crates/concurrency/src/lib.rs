//! Transaction coordination for the reference store
//!
//! This crate provides the pieces of a distributed transaction layer that
//! change capture consumes:
//! - HybridClock: strictly increasing hybrid timestamps
//! - TransactionManager: transaction ids, participant tracking, and the
//!   status authority that decides commit or abort exactly once

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod manager;

pub use clock::HybridClock;
pub use manager::{TransactionManager, TxnState};
