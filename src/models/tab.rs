use serde::{Deserialize, Serialize};

use crate::models::order::OrderStatus;

/// UI-selected order view. The synchronizer reads the live value at
/// notification-handling time, never a snapshot taken at subscribe time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusTab {
    PickUp,
    WithYou,
    Delivered,
}

impl StatusTab {
    pub fn matches(&self, status: &OrderStatus) -> bool {
        match self {
            StatusTab::PickUp => matches!(
                status,
                OrderStatus::Pending
                    | OrderStatus::Accepted
                    | OrderStatus::Preparing
                    | OrderStatus::Prepared
            ),
            StatusTab::WithYou => matches!(status, OrderStatus::OnTheWay),
            StatusTab::Delivered => matches!(status, OrderStatus::Delivered),
        }
    }
}
