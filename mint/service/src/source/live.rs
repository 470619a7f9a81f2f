// Copyright (c) 2024 The Botho Foundation

//! Deposit source backed by the ledger indexer.

use async_trait::async_trait;
use bth_mint_core::{Deposit, DepositId, StateStore, UNKNOWN_SENDER};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

use super::DepositSource;
use crate::{error::SourceError, indexer::LedgerIndex};

/// Finds deposits by listing the outputs held at the watched address.
pub struct LiveSource {
    index: Arc<dyn LedgerIndex>,
    store: Arc<StateStore>,
    address: String,
}

impl LiveSource {
    pub fn new(
        index: Arc<dyn LedgerIndex>,
        store: Arc<StateStore>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            index,
            store,
            address: address.into(),
        }
    }

    /// Resolve the sender, falling back to the unknown marker so the
    /// deposit is still surfaced.
    async fn resolve_sender(&self, tx_hash: &str) -> String {
        match self.index.transaction_sender(tx_hash).await {
            Ok(sender) => sender,
            Err(e) => {
                warn!("Failed to resolve sender for {}: {}", tx_hash, e);
                UNKNOWN_SENDER.to_string()
            }
        }
    }
}

#[async_trait]
impl DepositSource for LiveSource {
    async fn fetch_new_deposits(&self, target_amount: u64) -> Result<Vec<Deposit>, SourceError> {
        let outputs = self.index.address_outputs(&self.address).await?;
        debug!("Indexer reports {} outputs at {}", outputs.len(), self.address);

        let mut seen = HashSet::new();
        let mut deposits = Vec::new();

        for output in outputs {
            if output.value != target_amount {
                continue;
            }
            let id = DepositId::new(output.tx_hash.clone());
            if self.store.is_processed(&id) || !seen.insert(id.clone()) {
                continue;
            }

            let sender = self.resolve_sender(&output.tx_hash).await;
            deposits.push(Deposit {
                id,
                sender,
                amount: output.value,
            });
        }

        Ok(deposits)
    }
}
