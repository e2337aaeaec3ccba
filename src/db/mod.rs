//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row structs and insert payloads returned/consumed by repositories.
//! - `repo`: SQL-only functions that map rows into domain entities.
//!
//! External modules should import from `donation_ledger::db` — we re-export
//! the repository API and commonly used row models for convenience.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{InventoryRow, NewDonation, OutboxTask};
