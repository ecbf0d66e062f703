//! # Strata CDC
//!
//! Transactionally consistent change-capture streams over a sharded,
//! replicated Strata store.
//!
//! A stream turns each shard's write log (provisional writes plus their
//! commit and abort decisions) into an ordered sequence of change records:
//! every committed transaction appears once, bracketed by BEGIN and COMMIT,
//! and aborted transactions never appear. Progress is kept in durable
//! per-shard checkpoints that survive restarts, leader changes, and shard
//! splits.
//!
//! ## Quick Start
//!
//! ```ignore
//! use strata_cdc::prelude::*;
//!
//! let store = Arc::new(ShardedLogStore::new());
//! let shard = store.create_table("orders", &["id", "amount"])?;
//!
//! let cdc = CdcService::builder().path("./cdc").open(store.clone())?;
//! let stream = cdc.create_stream(&[shard])?;
//!
//! let txn = store.begin();
//! txn.insert("orders", Value::Int(1), vec![Value::Int(1), Value::Int(250)])?;
//! txn.commit()?;
//!
//! let batch = cdc.poll(stream, shard)?;
//! for record in &batch.records {
//!     println!("{}", record.to_json());
//! }
//! ```
//!
//! ## Crates
//!
//! - [`core`]: positions, timestamps, records, checkpoints, errors, and the
//!   storage-engine traits
//! - [`engine`]: the streaming engine and [`CdcService`]
//! - [`durability`]: the metadata log
//! - [`storage`] / [`concurrency`]: an in-process sharded store
//!   implementing the storage-engine traits

#![warn(missing_docs)]

pub mod prelude;

pub use strata_concurrency as concurrency;
pub use strata_core as core;
pub use strata_durability as durability;
pub use strata_engine as engine;
pub use strata_storage as storage;

pub use strata_core::{
    ChangeRecord, Checkpoint, Error, LogPosition, LogicalTimestamp, RecordKind, Result, ShardId,
    StreamId, TxnId, Value,
};
pub use strata_engine::{
    CdcConfig, CdcService, CdcServiceBuilder, DurabilityMode, PollResponse, PollableShard,
    StreamOptions,
};
pub use strata_storage::ShardedLogStore;
