use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    Backend, ChangeFilter, ChangeKind, ChangeSubscription, DeliveredMarker, OrderChange,
    OrderSnapshot,
};
use crate::error::AppError;
use crate::geo::haversine_m;
use crate::models::agent::{Agent, GeoPoint};
use crate::models::handoff::HandoffCode;
use crate::models::order::{Address, Customer, Order, OrderDetail, OrderItem, OrderStatus, Vendor};
use crate::models::rating::{Rating, RatingStats};
use crate::models::tab::StatusTab;

/// In-memory stand-in for the hosted relational backend. Holds the row
/// tables, the change feed, and the assignment procedure.
pub struct MemoryBackend {
    agents: DashMap<Uuid, Agent>,
    orders: DashMap<Uuid, Order>,
    vendors: DashMap<Uuid, Vendor>,
    customers: DashMap<Uuid, Customer>,
    addresses: DashMap<Uuid, Address>,
    items: DashMap<Uuid, Vec<OrderItem>>,
    ratings: DashMap<Uuid, Vec<Rating>>,
    changes_tx: broadcast::Sender<OrderChange>,
    // serializes assignment calls so two agents cannot bind the same group
    assign_lock: Mutex<()>,
}

impl MemoryBackend {
    pub fn new(event_buffer_size: usize) -> Self {
        let (changes_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            agents: DashMap::new(),
            orders: DashMap::new(),
            vendors: DashMap::new(),
            customers: DashMap::new(),
            addresses: DashMap::new(),
            items: DashMap::new(),
            ratings: DashMap::new(),
            changes_tx,
            assign_lock: Mutex::new(()),
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn insert_agent(&self, agent: Agent) {
        self.agents.insert(agent.id, agent);
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.agents.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn set_availability(&self, agent_id: Uuid, available: bool) -> Result<Agent, AppError> {
        let mut agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {} not found", agent_id)))?;

        agent.available = available;
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    pub fn set_location(&self, agent_id: Uuid, location: GeoPoint) -> Result<Agent, AppError> {
        let mut agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {} not found", agent_id)))?;

        agent.location = Some(location);
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    /// Upstream order creation: stores the joined rows and emits an insert
    /// on the change feed.
    pub fn insert_order(&self, detail: OrderDetail) {
        self.vendors
            .insert(detail.vendor.id, detail.vendor.clone());
        self.customers
            .insert(detail.customer.id, detail.customer.clone());
        self.addresses
            .insert(detail.address.id, detail.address.clone());
        self.items.insert(detail.order.id, detail.items.clone());

        let new = snapshot(&detail.order);
        self.orders.insert(detail.order.id, detail.order);
        self.emit(ChangeKind::Insert, None, Some(new));
    }

    fn emit(&self, kind: ChangeKind, old: Option<OrderSnapshot>, new: Option<OrderSnapshot>) {
        let _ = self.changes_tx.send(OrderChange { kind, old, new });
    }

    fn join(&self, order: Order) -> Option<OrderDetail> {
        let vendor = self.vendors.get(&order.vendor_id)?.clone();
        let customer = self.customers.get(&order.customer_id)?.clone();
        let address = self.addresses.get(&order.address_id)?.clone();
        let items = self
            .items
            .get(&order.id)
            .map(|entry| entry.clone())
            .unwrap_or_default();

        Some(OrderDetail {
            order,
            vendor,
            customer,
            address,
            items,
        })
    }

    fn orders_where<F>(&self, predicate: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        self.orders
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn snapshot(order: &Order) -> OrderSnapshot {
    OrderSnapshot {
        order_id: order.id,
        agent_id: order.agent_id,
        group_id: order.group_id,
        status: Some(order.status),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn agent(&self, agent_id: Uuid) -> Result<Option<Agent>, AppError> {
        Ok(self.agents.get(&agent_id).map(|entry| entry.clone()))
    }

    async fn active_order_count(&self, agent_id: Uuid) -> Result<usize, AppError> {
        Ok(self
            .orders_where(|o| o.agent_id == Some(agent_id) && o.status.is_active())
            .len())
    }

    async fn assigned_order_count(&self, agent_id: Uuid) -> Result<usize, AppError> {
        Ok(self.orders_where(|o| o.agent_id == Some(agent_id)).len())
    }

    async fn undelivered_order_count(&self, agent_id: Uuid) -> Result<usize, AppError> {
        Ok(self
            .orders_where(|o| o.agent_id == Some(agent_id) && o.status != OrderStatus::Delivered)
            .len())
    }

    async fn last_delivered(&self, agent_id: Uuid) -> Result<Option<DeliveredMarker>, AppError> {
        let marker = self
            .orders_where(|o| o.agent_id == Some(agent_id) && o.status == OrderStatus::Delivered)
            .into_iter()
            .max_by_key(|o| o.group_seq)
            .map(|o| DeliveredMarker {
                group_id: o.group_id,
                group_seq: o.group_seq,
            });

        Ok(marker)
    }

    async fn group_size(&self, group_id: Uuid) -> Result<usize, AppError> {
        Ok(self.orders_where(|o| o.group_id == Some(group_id)).len())
    }

    async fn assign_group(
        &self,
        agent_id: Uuid,
        radius_m: u32,
    ) -> Result<Option<Uuid>, AppError> {
        let _guard = self.assign_lock.lock().await;

        let Some(agent) = self.agents.get(&agent_id).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        let Some(agent_location) = agent.location else {
            return Ok(None);
        };

        let mut groups: HashMap<Uuid, Vec<Order>> = HashMap::new();
        for entry in self.orders.iter() {
            if let Some(group_id) = entry.group_id {
                groups.entry(group_id).or_default().push(entry.value().clone());
            }
        }

        // nearest eligible group wins; eligible means every member is still
        // unbound and undelivered, and the vendor is inside the radius
        let mut best: Option<(Uuid, f64)> = None;
        for (group_id, members) in &groups {
            let unbound = members
                .iter()
                .all(|o| o.agent_id.is_none() && o.status != OrderStatus::Delivered);
            if !unbound {
                continue;
            }

            let Some(vendor_location) = members
                .first()
                .and_then(|o| self.vendors.get(&o.vendor_id).map(|v| v.location))
            else {
                continue;
            };

            let distance = haversine_m(&agent_location, &vendor_location);
            if distance <= f64::from(radius_m)
                && best.is_none_or(|(_, nearest)| distance < nearest)
            {
                best = Some((*group_id, distance));
            }
        }

        let Some((group_id, distance)) = best else {
            return Ok(None);
        };

        let member_ids: Vec<Uuid> = groups
            .get(&group_id)
            .map(|members| members.iter().map(|o| o.id).collect())
            .unwrap_or_default();

        for order_id in member_ids {
            let change = {
                let mut order = match self.orders.get_mut(&order_id) {
                    Some(order) => order,
                    None => continue,
                };
                let old = snapshot(&order);
                order.agent_id = Some(agent_id);
                let new = snapshot(&order);
                (old, new)
            };
            self.emit(ChangeKind::Update, Some(change.0), Some(change.1));
        }

        if let Some(mut agent) = self.agents.get_mut(&agent_id) {
            agent.current_group = Some(group_id);
            agent.updated_at = Utc::now();
        }

        debug!(
            agent_id = %agent_id,
            group_id = %group_id,
            distance_m = distance,
            radius_m,
            "group bound to agent"
        );

        Ok(Some(group_id))
    }

    async fn group_vendor_location(&self, group_id: Uuid) -> Result<Option<GeoPoint>, AppError> {
        let vendor_id = self
            .orders
            .iter()
            .find(|entry| entry.group_id == Some(group_id))
            .map(|entry| entry.vendor_id);

        Ok(vendor_id.and_then(|id| self.vendors.get(&id).map(|v| v.location)))
    }

    async fn order_detail(
        &self,
        order_id: Uuid,
        owner: Option<Uuid>,
    ) -> Result<Option<OrderDetail>, AppError> {
        let Some(order) = self.orders.get(&order_id).map(|entry| entry.clone()) else {
            return Ok(None);
        };

        if let Some(owner) = owner {
            if order.agent_id != Some(owner) {
                return Ok(None);
            }
        }

        Ok(self.join(order))
    }

    async fn orders_for_view(
        &self,
        agent_id: Uuid,
        tab: StatusTab,
    ) -> Result<Vec<OrderDetail>, AppError> {
        let mut rows = match tab {
            StatusTab::Delivered => {
                let mut delivered = self.orders_where(|o| {
                    o.agent_id == Some(agent_id) && o.status == OrderStatus::Delivered
                });
                delivered.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
                delivered
            }
            StatusTab::PickUp | StatusTab::WithYou => {
                let current_group = self
                    .agents
                    .get(&agent_id)
                    .and_then(|agent| agent.current_group);
                let Some(group_id) = current_group else {
                    return Ok(Vec::new());
                };

                let mut members = self
                    .orders_where(|o| o.group_id == Some(group_id) && tab.matches(&o.status));
                members.sort_by_key(|o| o.group_seq);
                members
            }
        };

        Ok(rows
            .drain(..)
            .filter_map(|order| self.join(order))
            .collect())
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), AppError> {
        if status == OrderStatus::Delivered {
            return Err(AppError::BadRequest(
                "delivered requires handoff confirmation".to_string(),
            ));
        }

        let change = {
            let mut order = self
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

            let old = snapshot(&order);
            order.status = status;
            let new = snapshot(&order);
            (old, new)
        };

        self.emit(ChangeKind::Update, Some(change.0), Some(change.1));
        Ok(())
    }

    async fn confirm_handoff(&self, order_id: Uuid, code: &HandoffCode) -> Result<(), AppError> {
        let change = {
            let mut order = self
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| AppError::NotFound(format!("order {} not found", order_id)))?;

            if order.status == OrderStatus::Delivered {
                return Err(AppError::Conflict(format!(
                    "order {} already delivered",
                    order_id
                )));
            }
            if order.customer_code != *code {
                return Err(AppError::HandoffMismatch);
            }

            let old = snapshot(&order);
            order.status = OrderStatus::Delivered;
            order.delivered_at = Some(Utc::now());
            let new = snapshot(&order);
            (old, new)
        };

        self.emit(ChangeKind::Update, Some(change.0), Some(change.1));
        Ok(())
    }

    async fn add_rating(&self, rating: Rating) -> Result<(), AppError> {
        if !(1..=5).contains(&rating.stars) {
            return Err(AppError::BadRequest(
                "rating must be between 1 and 5 stars".to_string(),
            ));
        }

        self.ratings
            .entry(rating.agent_id)
            .or_default()
            .push(rating);
        Ok(())
    }

    async fn rating_stats(&self, agent_id: Uuid) -> Result<RatingStats, AppError> {
        let stats = self
            .ratings
            .get(&agent_id)
            .map(|entry| RatingStats::from_ratings(&entry))
            .unwrap_or(RatingStats {
                average: 0.0,
                count: 0,
            });

        Ok(stats)
    }

    fn subscribe_orders(&self, filter: ChangeFilter) -> ChangeSubscription {
        ChangeSubscription::new(filter, self.changes_tx.subscribe())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::agent::{Agent, AgentStatus, GeoPoint};
    use crate::models::handoff::HandoffCode;
    use crate::models::order::{
        Address, Customer, Order, OrderDetail, OrderItem, OrderStatus, Vendor,
    };

    pub fn agent_at(id: Uuid, lat: f64, lng: f64) -> Agent {
        Agent {
            id,
            name: "test-agent".to_string(),
            available: true,
            location: Some(GeoPoint { lat, lng }),
            status: AgentStatus::Verified,
            current_group: None,
            updated_at: Utc::now(),
        }
    }

    pub fn order_detail(
        order_id: Uuid,
        group_id: Uuid,
        group_seq: u32,
        status: OrderStatus,
        vendor_at: GeoPoint,
    ) -> OrderDetail {
        let vendor = Vendor {
            id: Uuid::new_v4(),
            name: "test-vendor".to_string(),
            location: vendor_at,
        };
        let customer = Customer {
            id: Uuid::new_v4(),
            name: "test-customer".to_string(),
            phone: "9999999999".to_string(),
        };
        let address = Address {
            id: Uuid::new_v4(),
            line: "12 Test Lane".to_string(),
            location: None,
        };

        OrderDetail {
            order: Order {
                id: order_id,
                vendor_id: vendor.id,
                customer_id: customer.id,
                address_id: address.id,
                group_id: Some(group_id),
                group_seq: Some(group_seq),
                agent_id: None,
                status,
                agent_code: HandoffCode::generate(),
                customer_code: HandoffCode::generate(),
                created_at: Utc::now(),
                delivered_at: None,
            },
            vendor,
            customer,
            address,
            items: vec![OrderItem {
                id: Uuid::new_v4(),
                name: "test-item".to_string(),
                quantity: 1,
                price: 120.0,
            }],
        }
    }
}
