use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, ChangeFilter, ChangeKind, OrderChange, OrderSnapshot};
use crate::models::order::OrderDetail;
use crate::models::tab::StatusTab;
use crate::observability::metrics::Metrics;

/// Published whenever the local list changes, for UI consumers on `/ws`.
#[derive(Debug, Clone, Serialize)]
pub struct ListEvent {
    pub agent_id: Uuid,
    #[serde(flatten)]
    pub change: ListChange,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListChange {
    Upserted { order: Box<OrderDetail> },
    Evicted { order_id: Uuid },
    Reset { count: usize },
}

/// Local order list, keyed by order id. Every mutation stamps a per-order
/// event sequence; a refetch result is only accepted while its stamp is
/// still the latest, so a slow refetch cannot resurrect an evicted order.
#[derive(Default)]
pub struct OrderList {
    entries: Vec<OrderDetail>,
    event_seq: HashMap<Uuid, u64>,
    next_seq: u64,
}

impl OrderList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<OrderDetail> {
        self.entries.clone()
    }

    /// Records a new event for this order and returns the sequence the
    /// caller must present when applying the refetch result.
    pub fn stamp(&mut self, order_id: Uuid) -> u64 {
        self.next_seq += 1;
        self.event_seq.insert(order_id, self.next_seq);
        self.next_seq
    }

    /// Replaces the entry in place (stable position) or appends if absent.
    /// Returns false when a newer event for this order has been stamped
    /// since `seq`, in which case the payload is discarded.
    pub fn upsert_if_current(&mut self, detail: OrderDetail, seq: u64) -> bool {
        if self.event_seq.get(&detail.order.id) != Some(&seq) {
            return false;
        }

        let order_id = detail.order.id;
        match self.entries.iter_mut().find(|e| e.order.id == order_id) {
            Some(existing) => *existing = detail,
            None => self.entries.push(detail),
        }
        true
    }

    /// Removes by id. Stamps regardless of membership so an in-flight
    /// refetch for this order is discarded when it lands.
    pub fn evict(&mut self, order_id: Uuid) -> bool {
        self.stamp(order_id);
        let before = self.entries.len();
        self.entries.retain(|e| e.order.id != order_id);
        self.entries.len() != before
    }

    /// Replaces the whole list (tab switch, resubscribe). Clearing the
    /// sequence table invalidates every refetch issued before the reset.
    pub fn reset(&mut self, entries: Vec<OrderDetail>) {
        self.entries = entries;
        self.event_seq.clear();
    }
}

/// Shared context for the two channel tasks; cheap to clone.
#[derive(Clone)]
struct SyncCore {
    agent_id: Uuid,
    backend: Arc<dyn Backend>,
    tab: watch::Receiver<StatusTab>,
    list: Arc<RwLock<OrderList>>,
    events_tx: broadcast::Sender<ListEvent>,
    metrics: Metrics,
}

impl SyncCore {
    /// Owned channel: changes to orders already bound to this agent.
    async fn handle_owned(&self, change: OrderChange) {
        match change.kind {
            ChangeKind::Delete => {
                if let Some(old) = change.old {
                    self.evict(old.order_id).await;
                }
            }
            ChangeKind::Insert | ChangeKind::Update => {
                if let Some(new) = change.new {
                    self.apply_owned_row(new).await;
                }
            }
        }
    }

    /// Broad channel: watches ownership transitions across all orders.
    async fn handle_broad(&self, change: OrderChange) {
        let old_owner = change.old.as_ref().and_then(|s| s.agent_id);
        let new_owner = change.new.as_ref().and_then(|s| s.agent_id);
        let me = Some(self.agent_id);

        if old_owner != me && new_owner == me {
            // newly bound to this agent
            if let Some(new) = change.new {
                self.apply_owned_row(new).await;
            }
        } else if old_owner == me && new_owner != me {
            // unbound: deletion-equivalent on this client
            let order_id = change
                .old
                .as_ref()
                .or(change.new.as_ref())
                .map(|s| s.order_id);
            if let Some(order_id) = order_id {
                self.evict(order_id).await;
            }
        }
    }

    /// Insert/update path: evaluate the live filter, then refetch the full
    /// record (change payloads are partial rows) and upsert it.
    async fn apply_owned_row(&self, snapshot: OrderSnapshot) {
        let order_id = snapshot.order_id;

        // read the filter fresh on every event; it may have changed since
        // the subscription was created
        let tab = *self.tab.borrow();
        if let Some(status) = snapshot.status {
            if !tab.matches(&status) {
                self.evict(order_id).await;
                return;
            }
        }

        let seq = self.list.write().await.stamp(order_id);

        match self
            .backend
            .order_detail(order_id, Some(self.agent_id))
            .await
        {
            Ok(Some(detail)) => {
                let tab_now = *self.tab.borrow();
                if !tab_now.matches(&detail.order.status) {
                    self.evict(order_id).await;
                    return;
                }

                let size = {
                    let mut list = self.list.write().await;
                    if !list.upsert_if_current(detail.clone(), seq) {
                        drop(list);
                        self.metrics
                            .list_mutations_total
                            .with_label_values(&["stale_discard"])
                            .inc();
                        debug!(order_id = %order_id, "stale refetch discarded");
                        return;
                    }
                    list.len()
                };

                self.metrics
                    .list_mutations_total
                    .with_label_values(&["upsert"])
                    .inc();
                self.set_list_size(size);
                let _ = self.events_tx.send(ListEvent {
                    agent_id: self.agent_id,
                    change: ListChange::Upserted {
                        order: Box::new(detail),
                    },
                });
            }
            // gone before we could refetch it; the event is a no-op
            Ok(None) => debug!(order_id = %order_id, "order not refetchable; skipping"),
            Err(err) => warn!(order_id = %order_id, error = %err, "order refetch failed"),
        }
    }

    async fn evict(&self, order_id: Uuid) {
        let (removed, size) = {
            let mut list = self.list.write().await;
            let removed = list.evict(order_id);
            (removed, list.len())
        };

        if removed {
            self.metrics
                .list_mutations_total
                .with_label_values(&["evict"])
                .inc();
            self.set_list_size(size);
            let _ = self.events_tx.send(ListEvent {
                agent_id: self.agent_id,
                change: ListChange::Evicted { order_id },
            });
        }
    }

    /// Repopulates the list from the backend view for the live tab.
    async fn refresh(&self) {
        let tab = *self.tab.borrow();
        match self.backend.orders_for_view(self.agent_id, tab).await {
            Ok(entries) => {
                let count = entries.len();
                self.list.write().await.reset(entries);
                self.metrics
                    .list_mutations_total
                    .with_label_values(&["reset"])
                    .inc();
                self.set_list_size(count);
                let _ = self.events_tx.send(ListEvent {
                    agent_id: self.agent_id,
                    change: ListChange::Reset { count },
                });
            }
            Err(err) => warn!(agent_id = %self.agent_id, error = %err, "view refresh failed"),
        }
    }

    fn set_list_size(&self, size: usize) {
        self.metrics
            .order_list_size
            .with_label_values(&[&self.agent_id.to_string()])
            .set(size as i64);
    }
}

/// Keeps the local order list consistent with server state for one agent by
/// consuming two change-feed channels instead of polling.
pub struct OrderSynchronizer {
    core: SyncCore,
    channels: Vec<JoinHandle<()>>,
}

impl OrderSynchronizer {
    pub fn start(
        agent_id: Uuid,
        backend: Arc<dyn Backend>,
        tab: watch::Receiver<StatusTab>,
        events_tx: broadcast::Sender<ListEvent>,
        metrics: Metrics,
    ) -> Self {
        let core = SyncCore {
            agent_id,
            backend,
            tab,
            list: Arc::new(RwLock::new(OrderList::default())),
            events_tx,
            metrics,
        };

        let mut sync = Self {
            core,
            channels: Vec::new(),
        };
        sync.spawn_channels();
        sync
    }

    fn spawn_channels(&mut self) {
        let owned = {
            let core = self.core.clone();
            let mut sub = core
                .backend
                .subscribe_orders(ChangeFilter::OwnedBy(core.agent_id));
            tokio::spawn(async move {
                while let Some(change) = sub.recv().await {
                    core.metrics
                        .sync_events_total
                        .with_label_values(&["owned"])
                        .inc();
                    core.handle_owned(change).await;
                }
            })
        };

        let broad = {
            let core = self.core.clone();
            let mut sub = core.backend.subscribe_orders(ChangeFilter::All);
            tokio::spawn(async move {
                while let Some(change) = sub.recv().await {
                    core.metrics
                        .sync_events_total
                        .with_label_values(&["broad"])
                        .inc();
                    core.handle_broad(change).await;
                }
            })
        };

        self.channels = vec![owned, broad];
        info!(agent_id = %self.core.agent_id, "realtime channels subscribed");
    }

    pub async fn snapshot(&self) -> Vec<OrderDetail> {
        self.core.list.read().await.snapshot()
    }

    pub async fn refresh(&self) {
        self.core.refresh().await;
    }

    /// Tears down and recreates both channels. Used when the hosting page
    /// regains visibility: a fresh subscription beats trusting a connection
    /// that may have gone stale while backgrounded.
    pub fn resubscribe(&mut self) {
        self.teardown();
        self.spawn_channels();
    }

    pub fn shutdown(&mut self) {
        self.teardown();
        info!(agent_id = %self.core.agent_id, "realtime channels closed");
    }

    fn teardown(&mut self) {
        for handle in self.channels.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for OrderSynchronizer {
    fn drop(&mut self) {
        self.teardown();
    }
}
