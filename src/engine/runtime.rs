use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::Backend;
use crate::engine::poller::{AssignmentPoller, PollerConfig};
use crate::engine::sync::{ListEvent, OrderSynchronizer};
use crate::models::order::OrderDetail;
use crate::models::tab::StatusTab;
use crate::observability::metrics::Metrics;

/// One registered agent's background machinery: the assignment poller and
/// the realtime synchronizer. The two never call each other; they are
/// coupled only through the backend state they both observe.
pub struct AgentRuntime {
    tab_tx: watch::Sender<StatusTab>,
    shutdown_tx: watch::Sender<bool>,
    poller_handle: JoinHandle<()>,
    sync: OrderSynchronizer,
}

impl AgentRuntime {
    pub fn spawn(
        agent_id: Uuid,
        backend: Arc<dyn Backend>,
        poller_config: PollerConfig,
        events_tx: broadcast::Sender<ListEvent>,
        metrics: Metrics,
    ) -> Self {
        let (tab_tx, tab_rx) = watch::channel(StatusTab::PickUp);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = AssignmentPoller::new(
            agent_id,
            backend.clone(),
            poller_config,
            metrics.clone(),
        );
        let poller_handle = tokio::spawn(poller.run(shutdown_rx));

        let sync = OrderSynchronizer::start(agent_id, backend, tab_rx, events_tx, metrics);

        Self {
            tab_tx,
            shutdown_tx,
            poller_handle,
            sync,
        }
    }

    pub fn tab(&self) -> StatusTab {
        *self.tab_tx.borrow()
    }

    /// Switches the live tab and repopulates the list from the backend view.
    /// Events already in flight will read the new value.
    pub async fn set_tab(&self, tab: StatusTab) {
        self.tab_tx.send_replace(tab);
        self.sync.refresh().await;
    }

    pub async fn orders(&self) -> Vec<OrderDetail> {
        self.sync.snapshot().await
    }

    /// Fresh channels plus a view refresh to cover anything missed while
    /// the old subscription was stale.
    pub async fn resubscribe(&mut self) {
        self.sync.resubscribe();
        self.sync.refresh().await;
    }

    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.sync.shutdown();
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.poller_handle.abort();
    }
}
