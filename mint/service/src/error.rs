// Copyright (c) 2024 The Botho Foundation

//! Error taxonomy for the mint service.

use bth_mint_core::{DepositId, SelectionError, StateError};
use std::path::PathBuf;
use thiserror::Error;

/// A deposit or ledger query failed. Nothing was mutated, so the caller can
/// simply try again on the next tick.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The request could not be sent or its body could not be read.
    #[error("request to {target} failed: {message}")]
    Request { target: String, message: String },

    /// The service answered with something we cannot use.
    #[error("unexpected response from {target}: {message}")]
    Response { target: String, message: String },

    /// A node CLI query failed.
    #[error("node query `{command}` failed: {message}")]
    Node { command: String, message: String },

    /// The fixture file could not be read or parsed.
    #[error("fixture {path}: {message}")]
    Fixture { path: PathBuf, message: String },
}

/// The external build/sign/submit step failed.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("failed to build transaction: {0}")]
    Build(String),

    #[error("failed to sign transaction: {0}")]
    Sign(String),

    #[error("failed to submit transaction: {0}")]
    Submit(String),
}

/// Failure of one deposit's mint attempt.
///
/// None of these abort the tick; the deposit keeps its reservation and is
/// retried on the next tick with the same sequence.
#[derive(Debug, Error)]
pub enum MintError {
    /// Reading or writing the state file failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] StateError),

    #[error(transparent)]
    InsufficientFunds(#[from] SelectionError),

    #[error("delegation error: {0}")]
    Delegation(#[from] DelegationError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// The deposit's sender could not be resolved, so there is no recipient.
    #[error("sender of deposit {0} is unknown")]
    UnresolvedSender(DepositId),
}

impl MintError {
    /// Short stage label for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            MintError::Persistence(_) => "persist",
            MintError::InsufficientFunds(_) => "select",
            MintError::Delegation(_) => "delegate",
            MintError::Source(_) => "query",
            MintError::UnresolvedSender(_) => "discover",
        }
    }
}
