// Copyright (c) 2024 The Botho Foundation

//! The per-deposit mint workflow.
//!
//! Each deposit moves through `discovered -> reserved -> delegated ->
//! finalized`. Only the reservation and the finalization touch the state
//! file. A failure anywhere in between leaves the reservation in place, and
//! the next tick retries with the same sequence.

use bth_mint_core::{
    select_inputs, AssetName, Deposit, DepositId, MintConfig, ReconcileReport, StateStore,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, error, info, warn};

use crate::{
    delegate::{ChainNode, MintDelegate, MintReceipt, MintRequest},
    error::MintError,
    indexer::MintHistory,
    notify::{MintNotice, Notifier},
    source::DepositSource,
};

/// Parameters of the workflow taken from the service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Watched address; also receives change
    pub address: String,

    /// Exact deposit amount that triggers a mint
    pub target_amount: u64,

    /// Value the selected inputs must cover
    pub required_input_value: u64,

    pub name_prefix: String,

    /// Slots added to the current tip for the validity deadline
    pub validity_horizon: u64,
}

impl WorkflowSettings {
    pub fn from_config(config: &MintConfig) -> Self {
        Self {
            address: config.watch.address.clone(),
            target_amount: config.watch.target_amount,
            required_input_value: config.required_input_value(),
            name_prefix: config.mint.name_prefix.clone(),
            validity_horizon: config.mint.validity_horizon,
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Deposits returned by the source
    pub seen: usize,
    pub minted: usize,
    pub failed: usize,
    /// Deposits left for a later tick without an attempt
    pub skipped: usize,
}

/// A deposit that reached the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintOutcome {
    pub sequence: u64,
    pub asset: AssetName,
    pub receipt: MintReceipt,

    /// False when the submission went through but recording it failed; the
    /// record is retried on later ticks without minting again.
    pub settled: bool,
}

/// Drives deposits from discovery to a finalized mint.
pub struct MintWorkflow {
    settings: WorkflowSettings,
    store: Arc<StateStore>,
    source: Box<dyn DepositSource>,
    node: Arc<dyn ChainNode>,
    delegate: Arc<dyn MintDelegate>,
    notifier: Box<dyn Notifier>,

    /// Submitted deposits whose reservation could not be cleared yet
    unsettled: HashSet<DepositId>,
}

impl MintWorkflow {
    pub fn new(
        settings: WorkflowSettings,
        store: Arc<StateStore>,
        source: Box<dyn DepositSource>,
        node: Arc<dyn ChainNode>,
        delegate: Arc<dyn MintDelegate>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            store,
            source,
            node,
            delegate,
            notifier,
            unsettled: HashSet::new(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Catch local bookkeeping up with the chain. Run once before the first
    /// tick.
    pub async fn reconcile(&self, history: &dyn MintHistory) -> Result<ReconcileReport, MintError> {
        let max_on_chain = history.max_minted_sequence().await?;
        info!("Highest sequence minted on chain: {}", max_on_chain);

        let report = self.store.reconcile(max_on_chain)?;
        if let Some(next) = report.fast_forwarded_to {
            warn!("Fast-forwarded next sequence to {}", next);
        }
        for (id, sequence) in &report.recovered {
            info!(deposit = %id, sequence, "Recovered reservation already minted on chain");
        }
        Ok(report)
    }

    /// Run one polling pass.
    ///
    /// Only a failed fetch aborts the tick. Per-deposit failures are logged
    /// and counted.
    pub async fn tick(&mut self) -> Result<TickReport, MintError> {
        self.settle();

        let deposits = self
            .source
            .fetch_new_deposits(self.settings.target_amount)
            .await?;

        let mut report = TickReport {
            seen: deposits.len(),
            ..Default::default()
        };

        // One at a time: every mint spends from the same address.
        for deposit in deposits {
            if self.store.is_processed(&deposit.id) || self.unsettled.contains(&deposit.id) {
                report.skipped += 1;
                continue;
            }

            match self.process_deposit(&deposit).await {
                Ok(_) => report.minted += 1,
                Err(MintError::UnresolvedSender(id)) => {
                    warn!(deposit = %id, stage = "discover", "Sender unknown, retrying next tick");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(deposit = %deposit.id, stage = e.stage(), "Mint attempt failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.seen > 0 {
            info!(
                "Tick done: {} seen, {} minted, {} failed, {} skipped",
                report.seen, report.minted, report.failed, report.skipped
            );
        } else {
            debug!("Tick done: no new deposits");
        }

        Ok(report)
    }

    /// Take one deposit from discovery to a submitted mint.
    pub async fn process_deposit(&mut self, deposit: &Deposit) -> Result<MintOutcome, MintError> {
        if !deposit.has_known_sender() {
            return Err(MintError::UnresolvedSender(deposit.id.clone()));
        }

        let sequence = self.store.reserve_sequence(&deposit.id)?;
        let asset = AssetName::for_sequence(&self.settings.name_prefix, sequence);
        info!(deposit = %deposit.id, sequence, "Reserved {} for {}", asset.display, deposit.sender);

        let slot = self.node.current_slot().await?;
        let invalid_hereafter = slot.saturating_add(self.settings.validity_horizon);

        let units = self.node.fund_units(&self.settings.address).await?;
        let selection = select_inputs(&units, self.settings.required_input_value)?;
        debug!(
            deposit = %deposit.id,
            "Selected {} inputs totalling {}",
            selection.inputs.len(),
            selection.total
        );

        let request = MintRequest {
            sequence,
            inputs: selection.locators(),
            recipient: deposit.sender.clone(),
            change_address: self.settings.address.clone(),
            asset: asset.clone(),
            invalid_hereafter,
            quantity: 1,
        };
        let receipt = self.delegate.mint(&request).await?;
        info!(
            deposit = %deposit.id,
            sequence,
            "Submitted mint of {}: {}",
            asset.display,
            receipt.tx_id.as_deref().unwrap_or(&receipt.output)
        );

        let settled = match self.store.clear_reservation(&deposit.id) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    deposit = %deposit.id,
                    stage = "persist",
                    "Mint submitted but could not be recorded: {}",
                    e
                );
                self.unsettled.insert(deposit.id.clone());
                false
            }
        };

        let notice = MintNotice {
            deposit_id: deposit.id.to_string(),
            sequence,
            asset_name: asset.display.clone(),
            recipient: deposit.sender.clone(),
            tx_id: receipt.tx_id.clone(),
        };
        if let Err(e) = self.notifier.notify(&notice).await {
            warn!(deposit = %deposit.id, "Failed to deliver mint notification: {}", e);
        }

        Ok(MintOutcome {
            sequence,
            asset,
            receipt,
            settled,
        })
    }

    /// Retry recording mints that were submitted but not cleared.
    fn settle(&mut self) {
        let store = &self.store;
        self.unsettled.retain(|id| match store.clear_reservation(id) {
            Ok(()) => {
                info!(deposit = %id, "Recorded previously submitted mint");
                false
            }
            Err(e) => {
                error!(deposit = %id, stage = "persist", "Still cannot record mint: {}", e);
                true
            }
        });
    }
}
