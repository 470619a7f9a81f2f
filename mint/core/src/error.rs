// Copyright (c) 2024 The Botho Foundation

//! Error types shared by the mint crates.

use std::{io, path::PathBuf};
use thiserror::Error;

use crate::deposit::DepositId;

/// Errors raised at the state store boundary.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the state file failed.
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state file exists but is not a valid snapshot.
    #[error("state file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Encoding the snapshot failed.
    #[error("failed to encode state snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    /// The deposit is already processed and can never be reserved again.
    #[error("deposit {0} is already processed")]
    AlreadyProcessed(DepositId),

    /// No sequence number exists after `0`.
    #[error("sequence counter exhausted after {0}")]
    SequenceExhausted(u64),
}

/// Errors raised by coin selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The foreign-value-free units do not cover the required amount.
    #[error("insufficient funds in plain fund units: have={have} required={required}")]
    InsufficientFunds { have: u64, required: u64 },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
