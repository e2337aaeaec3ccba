use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DonationType {
    Cash,
    Goods,
}

impl DonationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationType::Cash => "cash",
            DonationType::Goods => "goods",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(DonationType::Cash),
            "goods" => Some(DonationType::Goods),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Received,
    Failed,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Received => "received",
            DonationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DonationStatus::Pending),
            "received" => Some(DonationStatus::Received),
            "failed" => Some(DonationStatus::Failed),
            _ => None,
        }
    }

    /// Received and Failed admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DonationStatus::Received | DonationStatus::Failed)
    }
}

/// Who the donation came from. Exactly one identity shape per path, so a
/// registered donation can never carry a free-text name and an anonymous one
/// can never claim a user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DonorOrigin {
    Registered { user_id: i64 },
    Anonymous { name: String, email: String },
    Guest { name: String, email: String },
}

impl DonorOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonorOrigin::Registered { .. } => "registered",
            DonorOrigin::Anonymous { .. } => "anonymous",
            DonorOrigin::Guest { .. } => "guest",
        }
    }

    /// Prefix baked into checkout references so a reference alone tells
    /// support staff which entry path produced it.
    pub fn ref_prefix(&self) -> &'static str {
        match self {
            DonorOrigin::Registered { .. } => "dnr",
            DonorOrigin::Anonymous { .. } => "anon",
            DonorOrigin::Guest { .. } => "gst",
        }
    }
}

/// A goods line item as submitted by the donor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
    pub quantity: i64,
    pub description: Option<String>,
    pub estimated_value_minor: Option<i64>,
}

/// Donation submission, discriminated by type. Amounts are integer minor
/// units of the configured currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "donation_type", rename_all = "snake_case")]
pub enum DonationRequest {
    Cash {
        amount_minor: i64,
        origin: DonorOrigin,
        #[serde(default)]
        child_id: Option<i64>,
        #[serde(default)]
        campaign_id: Option<i64>,
        #[serde(default)]
        message: Option<String>,
    },
    Goods {
        items: Vec<NewItem>,
        origin: DonorOrigin,
        #[serde(default)]
        child_id: Option<i64>,
        #[serde(default)]
        campaign_id: Option<i64>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl DonationRequest {
    pub fn origin(&self) -> &DonorOrigin {
        match self {
            DonationRequest::Cash { origin, .. } => origin,
            DonationRequest::Goods { origin, .. } => origin,
        }
    }

    pub fn donation_type(&self) -> DonationType {
        match self {
            DonationRequest::Cash { .. } => DonationType::Cash,
            DonationRequest::Goods { .. } => DonationType::Goods,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: i64,
    pub checkout_ref: Option<String>,
    pub donation_type: DonationType,
    pub amount_minor: Option<i64>,
    pub status: DonationStatus,
    pub message: Option<String>,
    pub origin: DonorOrigin,
    pub child_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonatedItem {
    pub id: i64,
    pub donation_id: i64,
    pub name: String,
    pub quantity: i64,
    pub description: Option<String>,
    pub estimated_value_minor: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub message: String,
    pub target_amount_minor: Option<i64>,
    pub is_completed: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub images: Vec<String>,
}

/// Key identifying one stock row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub name: String,
    pub category: String,
    pub location: String,
}

impl ItemKey {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            location: location.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: i64,
    pub key: ItemKey,
    pub quantity: i64,
    pub low_stock_threshold: Option<i64>,
}

impl InventoryItem {
    pub fn stock_status(&self) -> StockStatus {
        StockStatus::derive(self.quantity, self.low_stock_threshold)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Critical,
    Low,
    Good,
}

pub const CRITICAL_STOCK_QUANTITY: i64 = 5;
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 20;

impl StockStatus {
    /// Derived on read, never stored. One authority for every view.
    pub fn derive(quantity: i64, threshold: Option<i64>) -> Self {
        let threshold = threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
        if quantity <= CRITICAL_STOCK_QUANTITY {
            StockStatus::Critical
        } else if quantity <= threshold {
            StockStatus::Low
        } else {
            StockStatus::Good
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Increase,
    Decrease,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::Increase => "increase",
            AdjustmentType::Decrease => "decrease",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increase" => Some(AdjustmentType::Increase),
            "decrease" => Some(AdjustmentType::Decrease),
            _ => None,
        }
    }

    pub fn from_change(quantity_change: i64) -> Self {
        if quantity_change < 0 {
            AdjustmentType::Decrease
        } else {
            AdjustmentType::Increase
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub id: i64,
    pub inventory_item_id: i64,
    pub adjustment_type: AdjustmentType,
    pub quantity_change: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    pub reason: String,
    pub notes: Option<String>,
    pub actor_id: i64,
    pub source_donation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxKind {
    SendReceipt,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::SendReceipt => "send_receipt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_receipt" => Some(OutboxKind::SendReceipt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            DonationStatus::Pending,
            DonationStatus::Received,
            DonationStatus::Failed,
        ] {
            assert_eq!(DonationStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DonationStatus::parse("refunded"), None);
        assert!(!DonationStatus::Pending.is_terminal());
        assert!(DonationStatus::Received.is_terminal());
        assert!(DonationStatus::Failed.is_terminal());
    }

    #[test]
    fn stock_status_boundaries() {
        assert_eq!(StockStatus::derive(0, None), StockStatus::Critical);
        assert_eq!(StockStatus::derive(5, None), StockStatus::Critical);
        assert_eq!(StockStatus::derive(6, None), StockStatus::Low);
        assert_eq!(StockStatus::derive(20, None), StockStatus::Low);
        assert_eq!(StockStatus::derive(21, None), StockStatus::Good);
        // Explicit threshold wins over the default.
        assert_eq!(StockStatus::derive(9, Some(8)), StockStatus::Good);
        assert_eq!(StockStatus::derive(8, Some(8)), StockStatus::Low);
    }

    #[test]
    fn adjustment_type_from_sign() {
        assert_eq!(AdjustmentType::from_change(-1), AdjustmentType::Decrease);
        assert_eq!(AdjustmentType::from_change(0), AdjustmentType::Increase);
        assert_eq!(AdjustmentType::from_change(3), AdjustmentType::Increase);
    }
}
