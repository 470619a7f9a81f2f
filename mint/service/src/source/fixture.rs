// Copyright (c) 2024 The Botho Foundation

//! Deposit source backed by a static JSON file.

use async_trait::async_trait;
use bth_mint_core::{Deposit, DepositId, StateStore};
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};
use tracing::debug;

use super::DepositSource;
use crate::error::SourceError;

/// One record of the fixture file.
#[derive(Debug, Deserialize)]
struct FixtureDeposit {
    #[serde(alias = "monitor")]
    watched_address: String,
    sender: String,
    amount: u64,
    #[serde(alias = "tx")]
    id: String,
}

/// Reads deposits from a file for offline runs.
///
/// A missing file means no deposits.
pub struct FixtureSource {
    path: PathBuf,
    store: Arc<StateStore>,
    address: String,
}

impl FixtureSource {
    pub fn new(
        path: impl Into<PathBuf>,
        store: Arc<StateStore>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            store,
            address: address.into(),
        }
    }
}

#[async_trait]
impl DepositSource for FixtureSource {
    async fn fetch_new_deposits(&self, target_amount: u64) -> Result<Vec<Deposit>, SourceError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No fixture file at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SourceError::Fixture {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        let records: Vec<FixtureDeposit> =
            serde_json::from_slice(&data).map_err(|e| SourceError::Fixture {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        Ok(records
            .into_iter()
            .filter(|r| r.watched_address == self.address && r.amount == target_amount)
            .map(|r| Deposit {
                id: DepositId::new(r.id),
                sender: r.sender,
                amount: r.amount,
            })
            .filter(|d| !self.store.is_processed(&d.id))
            .collect())
    }
}
