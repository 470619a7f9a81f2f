// Copyright (c) 2024 The Botho Foundation

//! BTH Mint Service
//!
//! Watches a funding address for deposits of an exact amount and mints one
//! sequenced asset to each depositor, at most once per deposit.
//!
//! # Architecture
//!
//! A [`scheduler::Scheduler`] drives the [`workflow::MintWorkflow`] on a
//! fixed interval. Each tick asks a [`source::DepositSource`] for new
//! deposits and processes them one at a time:
//!
//! 1. reserve a sequence in the durable [`bth_mint_core::StateStore`]
//! 2. select inputs from the watched address
//! 3. hand build/sign/submit to a [`delegate::MintDelegate`]
//! 4. record the deposit as processed and notify
//!
//! On startup the service reconciles its state against the assets already
//! minted under the policy, see [`indexer::MintHistory`].

pub mod delegate;
pub mod error;
pub mod indexer;
pub mod node;
pub mod notify;
pub mod scheduler;
pub mod source;
pub mod wire;
pub mod workflow;

pub use error::{DelegationError, MintError, SourceError};
pub use scheduler::Scheduler;
pub use workflow::{MintWorkflow, TickReport, WorkflowSettings};
