//! PadiSave Core Library
//!
//! Ledger for rotating savings circles (ajo / esusu): membership, cycle
//! contributions, payout rotation, and member trust scores, persisted in
//! `SQLite`. Transport and authentication live outside this crate.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod circle;
pub mod config;

pub use circle::{CircleCoordinator, CircleError, Result};
pub use config::LedgerConfig;
