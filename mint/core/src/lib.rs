// Copyright (c) 2024 The Botho Foundation

//! Core types and logic for the deposit-driven mint service.
//!
//! This crate provides the pieces that do not talk to the outside world:
//!
//! - The durable mint state (sequence counter, processed deposits and
//!   in-flight reservations)
//! - Fee-safe coin selection over spendable fund units
//! - Asset name derivation from a mint sequence
//! - Configuration structures

pub mod asset;
pub mod config;
pub mod deposit;
pub mod error;
pub mod selection;
pub mod state;

pub use asset::AssetName;
pub use config::{
    IndexerConfig, MintConfig, MintSettings, Network, NodeConfig, NotifyConfig, ServiceSettings,
    SourceKind, WatchConfig,
};
pub use deposit::{Deposit, DepositId, UNKNOWN_SENDER};
pub use error::{ConfigError, SelectionError, StateError};
pub use selection::{select_inputs, FundUnit, Selection};
pub use state::{ReconcileReport, StateStore};
