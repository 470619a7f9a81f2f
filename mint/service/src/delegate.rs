// Copyright (c) 2024 The Botho Foundation

//! Hand-off to the external transaction builder/signer/submitter.

use async_trait::async_trait;
use bth_mint_core::{AssetName, FundUnit};

use crate::error::{DelegationError, SourceError};

/// Everything the builder needs to mint one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Sequence the asset is minted for
    pub sequence: u64,

    /// Input locators to spend
    pub inputs: Vec<String>,

    /// Receives the minted asset
    pub recipient: String,

    /// Receives the change
    pub change_address: String,

    pub asset: AssetName,

    /// Slot after which the transaction is invalid
    pub invalid_hereafter: u64,

    /// Always 1 for this service
    pub quantity: u64,
}

/// Proof that the transaction was handed to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    /// Transaction id, when the builder could report one
    pub tx_id: Option<String>,

    /// Raw submitter output
    pub output: String,
}

/// Builds, signs and submits a mint transaction.
#[async_trait]
pub trait MintDelegate: Send + Sync {
    async fn mint(&self, request: &MintRequest) -> Result<MintReceipt, DelegationError>;
}

/// Chain queries needed while preparing a mint.
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Current tip slot.
    async fn current_slot(&self) -> Result<u64, SourceError>;

    /// Spendable units at `address`.
    async fn fund_units(&self, address: &str) -> Result<Vec<FundUnit>, SourceError>;
}
