//! Donation ledger and inventory reconciliation engine.
//!
//! The engine owns donation intake across its origin paths, checkout
//! reference issuance and reconciliation against the external payment
//! gateway, the goods-to-stock adjustment ledger, and campaign funding
//! aggregation. Controllers, authentication and rendering live outside.

pub mod campaign;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod inventory;
pub mod model;
pub mod outbox;
pub mod receipt;
pub mod reconcile;
pub mod reference;

pub use error::CoreError;
