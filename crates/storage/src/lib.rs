//! Reference storage engine for change capture
//!
//! This crate implements a sharded, replicated-log store that satisfies
//! every interface change capture consumes:
//! - ShardedLogStore: per-shard append-only logs in a DashMap
//! - Key-range routing with shard splits
//! - Distributed transactions (provisional writes, commit/abort apply)
//! - Leader terms and epochs
//! - Commit observers on the commit-apply path

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod routing;
pub mod sharded;
pub mod transaction;

pub use routing::{key_hash, KeyRange};
pub use sharded::{ShardInfo, ShardedLogStore};
pub use transaction::WriteTxn;
