use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::Config;
use crate::error::AppError;
use crate::geo::haversine_m;
use crate::models::agent::GeoPoint;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub radius_start_m: u32,
    pub radius_step_m: u32,
    pub radius_max_m: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            radius_start_m: 1_500,
            radius_step_m: 1_000,
            radius_max_m: 5_000,
        }
    }
}

impl From<&Config> for PollerConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            radius_start_m: config.radius_start_m,
            radius_step_m: config.radius_step_m,
            radius_max_m: config.radius_max_m,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    AgentMissing,
    Unavailable,
    NoLocation,
    ActiveOrders,
    GroupIncomplete,
}

/// Outcome of one poll cycle. Every failure mode is a no-op; the next tick
/// retries from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Ineligible(IneligibleReason),
    Assigned(Uuid),
    Exhausted,
    Failed,
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Ineligible(_) => "ineligible",
            CycleOutcome::Assigned(_) => "assigned",
            CycleOutcome::Exhausted => "exhausted",
            CycleOutcome::Failed => "error",
        }
    }
}

/// Periodically checks one agent's eligibility and asks the backend to bind
/// a group, widening the search radius until the ladder is exhausted.
pub struct AssignmentPoller {
    agent_id: Uuid,
    backend: Arc<dyn Backend>,
    config: PollerConfig,
    metrics: Metrics,
}

impl AssignmentPoller {
    pub fn new(
        agent_id: Uuid,
        backend: Arc<dyn Backend>,
        config: PollerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            agent_id,
            backend,
            config,
            metrics,
        }
    }

    /// Runs immediately, then on every interval tick, until the shutdown
    /// signal flips. The cycle is awaited inside the loop, so a slow cycle
    /// delays the next tick instead of overlapping it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(agent_id = %self.agent_id, "assignment poller started");

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let start = Instant::now();
            let outcome = self.run_cycle().await;
            let elapsed = start.elapsed().as_secs_f64();

            self.metrics
                .poll_cycle_seconds
                .with_label_values(&[outcome.label()])
                .observe(elapsed);
            self.metrics
                .poll_cycles_total
                .with_label_values(&[outcome.label()])
                .inc();
        }

        info!(agent_id = %self.agent_id, "assignment poller stopped");
    }

    /// One full cycle: eligibility gates, completion gate, radius ladder.
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.try_cycle().await {
            Ok(outcome) => {
                debug!(agent_id = %self.agent_id, ?outcome, "poll cycle finished");
                outcome
            }
            Err(err) => {
                error!(agent_id = %self.agent_id, error = %err, "poll cycle aborted");
                CycleOutcome::Failed
            }
        }
    }

    async fn try_cycle(&self) -> Result<CycleOutcome, AppError> {
        let Some(agent) = self.backend.agent(self.agent_id).await? else {
            return Ok(CycleOutcome::Ineligible(IneligibleReason::AgentMissing));
        };
        if !agent.available {
            return Ok(CycleOutcome::Ineligible(IneligibleReason::Unavailable));
        }
        let Some(location) = agent.location else {
            return Ok(CycleOutcome::Ineligible(IneligibleReason::NoLocation));
        };

        if self.backend.active_order_count(self.agent_id).await? > 0 {
            return Ok(CycleOutcome::Ineligible(IneligibleReason::ActiveOrders));
        }

        if self.backend.assigned_order_count(self.agent_id).await? > 0 {
            if let Some(outcome) = self.completion_gate().await? {
                return Ok(outcome);
            }
        }

        self.radius_search(&location).await
    }

    /// An agent with assignment history may only take a new group once the
    /// previous one is fully delivered.
    async fn completion_gate(&self) -> Result<Option<CycleOutcome>, AppError> {
        let Some(marker) = self.backend.last_delivered(self.agent_id).await? else {
            // assigned but nothing ever delivered: stale work still open
            if self.backend.undelivered_order_count(self.agent_id).await? > 0 {
                return Ok(Some(CycleOutcome::Ineligible(
                    IneligibleReason::GroupIncomplete,
                )));
            }
            return Ok(None);
        };

        let (Some(group_id), Some(group_seq)) = (marker.group_id, marker.group_seq) else {
            return Ok(Some(CycleOutcome::Ineligible(
                IneligibleReason::GroupIncomplete,
            )));
        };

        let total = self.backend.group_size(group_id).await?;
        if group_seq as usize != total {
            return Ok(Some(CycleOutcome::Ineligible(
                IneligibleReason::GroupIncomplete,
            )));
        }

        Ok(None)
    }

    async fn radius_search(&self, agent_location: &GeoPoint) -> Result<CycleOutcome, AppError> {
        let mut radius = self.config.radius_start_m;

        while radius <= self.config.radius_max_m {
            debug!(agent_id = %self.agent_id, radius_m = radius, "requesting assignment");

            if let Some(group_id) = self.backend.assign_group(self.agent_id, radius).await? {
                self.verify_vendor_distance(group_id, agent_location).await;
                info!(
                    agent_id = %self.agent_id,
                    group_id = %group_id,
                    radius_m = radius,
                    "group assigned"
                );
                return Ok(CycleOutcome::Assigned(group_id));
            }

            radius += self.config.radius_step_m;
        }

        info!(
            agent_id = %self.agent_id,
            radius_max_m = self.config.radius_max_m,
            "no group assigned within radius ceiling"
        );
        Ok(CycleOutcome::Exhausted)
    }

    /// The group is already bound server-side; this only sanity-checks the
    /// vendor distance and logs when it exceeds the radius ceiling.
    async fn verify_vendor_distance(&self, group_id: Uuid, agent_location: &GeoPoint) {
        match self.backend.group_vendor_location(group_id).await {
            Ok(Some(vendor_location)) => {
                let distance = haversine_m(agent_location, &vendor_location);
                if distance > f64::from(self.config.radius_max_m) {
                    warn!(
                        group_id = %group_id,
                        distance_m = distance,
                        "assigned group's vendor is beyond the radius ceiling"
                    );
                } else {
                    debug!(group_id = %group_id, distance_m = distance, "vendor distance ok");
                }
            }
            Ok(None) => warn!(group_id = %group_id, "vendor location missing for assigned group"),
            Err(err) => warn!(group_id = %group_id, error = %err, "vendor distance check failed"),
        }
    }
}
