//! Row and insert payload structs used by repositories.
//!
//! Keep these focused on the data crossing the SQL boundary. Business logic
//! lives in the service layer.

use chrono::{DateTime, Utc};

use crate::model::{DonationStatus, DonationType, DonorOrigin, NewItem};

/// Insert payload for a donation plus its line items. The repository writes
/// parent and children in one transaction.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub checkout_ref: Option<String>,
    pub donation_type: DonationType,
    pub amount_minor: Option<i64>,
    pub status: DonationStatus,
    pub message: Option<String>,
    pub origin: DonorOrigin,
    pub child_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<NewItem>,
}

/// Stock row slice used by the inventory service while adjusting.
#[derive(Debug, Clone, Copy)]
pub struct InventoryRow {
    pub id: i64,
    pub quantity: i64,
    pub low_stock_threshold: Option<i64>,
}

/// One due outbox task, as picked up by the dispatch worker.
#[derive(Debug, Clone)]
pub struct OutboxTask {
    pub id: i64,
    pub kind: String,
    pub ref_id: i64,
    pub attempt: i32,
}
