// Copyright (c) 2024 The Botho Foundation

//! Sources of new deposits.
//!
//! This module provides different ways to discover deposits:
//! - Live (ledger indexer queries)
//! - Fixture (static JSON file, for offline testing)

mod fixture;
mod live;

pub use fixture::FixtureSource;
pub use live::LiveSource;

use async_trait::async_trait;
use bth_mint_core::Deposit;

use crate::error::SourceError;

/// Trait for deposit sources.
///
/// Results are computed fresh on every call and exclude deposits that are
/// already processed. A failure yields no deposits at all, never a partial
/// list.
#[async_trait]
pub trait DepositSource: Send + Sync {
    /// Deposits into the watched address of exactly `target_amount`.
    async fn fetch_new_deposits(&self, target_amount: u64) -> Result<Vec<Deposit>, SourceError>;
}
