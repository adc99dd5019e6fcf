//! Payment custody engine for marketplace transactions
//!
//! This crate holds a buyer's funds in escrow until delivery is confirmed,
//! then releases them to the seller: explicitly, automatically after a
//! configured grace period, or through a dispute-resolution outcome. It
//! provides:
//! - An explicit state machine as the single authority over legal transitions
//! - Pure time-gate predicates for auto-release and dispute eligibility
//! - A dispute sub-workflow kept in sync with the parent record
//! - A periodic auto-release scheduler safe under overlapping sweeps
//! - A service facade with optimistic concurrency and an append-only audit trail
//!
//! Capturing real money, notification transport, and any UI live outside this
//! crate behind the `EscrowStore` and `EscrowNotifier` seams.

pub mod config;
pub mod dispute_manager;
pub mod error;
pub mod models;
pub mod notifier;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod time_gate;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
