use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::backend::memory::MemoryBackend;
use crate::backend::Backend;
use crate::config::Config;
use crate::engine::poller::PollerConfig;
use crate::engine::runtime::AgentRuntime;
use crate::engine::sync::ListEvent;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub config: Config,
    pub backend: Arc<MemoryBackend>,
    pub runtimes: DashMap<Uuid, Arc<Mutex<AgentRuntime>>>,
    pub list_events_tx: broadcast::Sender<ListEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.event_buffer_size));
        let (list_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        Self {
            config,
            backend,
            runtimes: DashMap::new(),
            list_events_tx,
            metrics: Metrics::new(),
        }
    }

    /// Starts the poller + synchronizer pair for a newly registered agent.
    pub fn spawn_runtime(&self, agent_id: Uuid) {
        let backend: Arc<dyn Backend> = self.backend.clone();
        let runtime = AgentRuntime::spawn(
            agent_id,
            backend,
            PollerConfig::from(&self.config),
            self.list_events_tx.clone(),
            self.metrics.clone(),
        );

        self.runtimes.insert(agent_id, Arc::new(Mutex::new(runtime)));
        self.metrics.active_runtimes.set(self.runtimes.len() as i64);
    }

    pub fn runtime(&self, agent_id: Uuid) -> Option<Arc<Mutex<AgentRuntime>>> {
        self.runtimes
            .get(&agent_id)
            .map(|entry| entry.value().clone())
    }

    /// Tears down an agent's runtime. The agent row stays in the backend;
    /// only the client-side machinery stops.
    pub fn remove_runtime(&self, agent_id: Uuid) -> Option<Arc<Mutex<AgentRuntime>>> {
        let removed = self.runtimes.remove(&agent_id).map(|(_, runtime)| runtime);
        if removed.is_some() {
            self.metrics.active_runtimes.set(self.runtimes.len() as i64);
        }
        removed
    }
}
