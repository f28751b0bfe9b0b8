use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::agent::GeoPoint;
use crate::models::handoff::HandoffCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    Prepared,
    OnTheWay,
    Delivered,
}

impl OrderStatus {
    /// In-flight work already committed to an agent; the poller must not
    /// request a new group while any of these exist.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted
                | OrderStatus::Preparing
                | OrderStatus::Prepared
                | OrderStatus::OnTheWay
        )
    }
}

/// Order row. `agent_id` is None until the assignment procedure binds the
/// order's group to an agent; `group_seq` is dense 1..N within a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub group_id: Option<Uuid>,
    pub group_seq: Option<u32>,
    pub agent_id: Option<Uuid>,
    pub status: OrderStatus,
    pub agent_code: HandoffCode,
    pub customer_code: HandoffCode,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub line: String,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

/// Full-order fetch result: the order row joined with vendor, customer,
/// address and item details. Change-feed payloads are partial rows; the
/// synchronizer refetches this shape before upserting into the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: Order,
    pub vendor: Vendor,
    pub customer: Customer,
    pub address: Address,
    pub items: Vec<OrderItem>,
}
