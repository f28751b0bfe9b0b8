pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::agent::{Agent, GeoPoint};
use crate::models::handoff::HandoffCode;
use crate::models::order::{OrderDetail, OrderStatus};
use crate::models::rating::{Rating, RatingStats};
use crate::models::tab::StatusTab;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row snapshot delivered with a change notification. Snapshots carry only
/// identity, ownership and status columns; consumers needing the joined
/// record must refetch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone)]
pub struct OrderChange {
    pub kind: ChangeKind,
    pub old: Option<OrderSnapshot>,
    pub new: Option<OrderSnapshot>,
}

/// Row-level filter for a change-feed subscription. `OwnedBy` matches the
/// new row for inserts/updates and the old row for deletes, mirroring how
/// column-equality filters behave on a relational change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFilter {
    All,
    OwnedBy(Uuid),
}

impl ChangeFilter {
    fn matches(&self, change: &OrderChange) -> bool {
        match self {
            ChangeFilter::All => true,
            ChangeFilter::OwnedBy(agent_id) => {
                let row = match change.kind {
                    ChangeKind::Insert | ChangeKind::Update => change.new.as_ref(),
                    ChangeKind::Delete => change.old.as_ref(),
                };
                row.is_some_and(|snapshot| snapshot.agent_id == Some(*agent_id))
            }
        }
    }
}

pub struct ChangeSubscription {
    filter: ChangeFilter,
    rx: broadcast::Receiver<OrderChange>,
}

impl ChangeSubscription {
    pub fn new(filter: ChangeFilter, rx: broadcast::Receiver<OrderChange>) -> Self {
        Self { filter, rx }
    }

    /// Next change matching this subscription's filter, or None once the
    /// feed is closed. Lagged receivers skip ahead rather than failing.
    pub async fn recv(&mut self) -> Option<OrderChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.filter.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Delivered-order marker used by the poller's completion gate.
#[derive(Debug, Clone, Copy)]
pub struct DeliveredMarker {
    pub group_id: Option<Uuid>,
    pub group_seq: Option<u32>,
}

/// The hosted backend as consumed by this client: row-level reads, the
/// opaque assignment procedure, and the change feed. The assignment
/// procedure is a black box with an at-most-one-group-per-call contract.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn agent(&self, agent_id: Uuid) -> Result<Option<Agent>, AppError>;

    /// Count of this agent's orders in the active status set.
    async fn active_order_count(&self, agent_id: Uuid) -> Result<usize, AppError>;

    /// Count of orders ever bound to this agent, delivered or not.
    async fn assigned_order_count(&self, agent_id: Uuid) -> Result<usize, AppError>;

    async fn undelivered_order_count(&self, agent_id: Uuid) -> Result<usize, AppError>;

    /// Most recently delivered order's group id and sequence number,
    /// highest sequence first.
    async fn last_delivered(&self, agent_id: Uuid) -> Result<Option<DeliveredMarker>, AppError>;

    async fn group_size(&self, group_id: Uuid) -> Result<usize, AppError>;

    /// Atomically attempts to bind one eligible group within `radius_m`
    /// meters of the agent. Returns the bound group id, or None on no match.
    async fn assign_group(&self, agent_id: Uuid, radius_m: u32) -> Result<Option<Uuid>, AppError>;

    async fn group_vendor_location(&self, group_id: Uuid) -> Result<Option<GeoPoint>, AppError>;

    /// Full-order fetch. When `owner` is given, returns None unless the
    /// order is currently bound to that agent.
    async fn order_detail(
        &self,
        order_id: Uuid,
        owner: Option<Uuid>,
    ) -> Result<Option<OrderDetail>, AppError>;

    /// View query backing a status tab: Delivered reads the agent's history
    /// newest-first; the other tabs read the current group in sequence order.
    async fn orders_for_view(
        &self,
        agent_id: Uuid,
        tab: StatusTab,
    ) -> Result<Vec<OrderDetail>, AppError>;

    /// Persists a status transition. The Delivered transition is reserved
    /// for `confirm_handoff`.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), AppError>;

    /// Verifies the customer code and transitions the order to Delivered,
    /// stamping the delivery timestamp.
    async fn confirm_handoff(&self, order_id: Uuid, code: &HandoffCode) -> Result<(), AppError>;

    async fn add_rating(&self, rating: Rating) -> Result<(), AppError>;

    async fn rating_stats(&self, agent_id: Uuid) -> Result<RatingStats, AppError>;

    fn subscribe_orders(&self, filter: ChangeFilter) -> ChangeSubscription;
}
