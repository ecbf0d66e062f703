//! Transaction resolver adapter
//!
//! Wraps the storage engine's status authority with bounded retries and a
//! per-poll cache. A lookup that keeps failing surfaces as
//! `Error::TransactionUnresolved` so the caller retries the whole poll with
//! its unchanged checkpoint.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use strata_core::traits::{TransactionResolver, TxnOutcome};
use strata_core::{Error, Result, TxnId};
use tracing::warn;

use crate::config::CdcConfig;

/// Retry policy for status lookups
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff
    pub backoff: Duration,
    /// Backoff cap
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Policy from config
    pub fn from_config(config: &CdcConfig) -> Self {
        Self {
            max_retries: config.resolver_max_retries,
            backoff: Duration::from_millis(config.resolver_backoff_ms),
            backoff_max: Duration::from_millis(config.resolver_backoff_max_ms),
        }
    }

    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Retrying front end to a [`TransactionResolver`]
#[derive(Clone)]
pub struct ResolverAdapter {
    resolver: Arc<dyn TransactionResolver>,
    policy: RetryPolicy,
}

impl ResolverAdapter {
    /// Wrap `resolver`
    pub fn new(resolver: Arc<dyn TransactionResolver>, policy: RetryPolicy) -> Self {
        Self { resolver, policy }
    }

    /// Outcome of `txn`, retrying failed lookups with exponential backoff
    pub fn resolve(&self, txn: TxnId) -> Result<TxnOutcome> {
        let mut attempt = 0;
        loop {
            match self.resolver.resolve_transaction(txn) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        txn = %txn,
                        attempt,
                        error = %e,
                        ?delay,
                        "transaction status lookup failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(txn = %txn, error = %e, "transaction status unavailable");
                    return Err(Error::TransactionUnresolved(txn));
                }
            }
        }
    }

    /// Cache of outcomes scoped to one poll
    pub fn session(&self) -> ResolverSession<'_> {
        ResolverSession {
            adapter: self,
            cache: FxHashMap::default(),
        }
    }
}

impl std::fmt::Debug for ResolverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverAdapter")
            .field("policy", &self.policy)
            .finish()
    }
}

/// Per-poll resolution cache
///
/// Outcomes are only cached once terminal; a pending transaction is looked
/// up again on the next call.
pub struct ResolverSession<'a> {
    adapter: &'a ResolverAdapter,
    cache: FxHashMap<TxnId, TxnOutcome>,
}

impl ResolverSession<'_> {
    /// Outcome of `txn`
    pub fn resolve(&mut self, txn: TxnId) -> Result<TxnOutcome> {
        if let Some(outcome) = self.cache.get(&txn) {
            return Ok(*outcome);
        }
        let outcome = self.adapter.resolve(txn)?;
        if outcome.is_resolved() {
            self.cache.insert(txn, outcome);
        }
        Ok(outcome)
    }
}
