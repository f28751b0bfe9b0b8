use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub poll_cycles_total: IntCounterVec,
    pub poll_cycle_seconds: HistogramVec,
    pub sync_events_total: IntCounterVec,
    pub list_mutations_total: IntCounterVec,
    pub active_runtimes: IntGauge,
    pub order_list_size: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let poll_cycles_total = IntCounterVec::new(
            Opts::new("poll_cycles_total", "Total poll cycles by outcome"),
            &["outcome"],
        )
        .expect("valid poll_cycles_total metric");

        let poll_cycle_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "poll_cycle_seconds",
                "Latency of a full poll cycle in seconds",
            ),
            &["outcome"],
        )
        .expect("valid poll_cycle_seconds metric");

        let sync_events_total = IntCounterVec::new(
            Opts::new(
                "sync_events_total",
                "Change-feed events processed by channel",
            ),
            &["channel"],
        )
        .expect("valid sync_events_total metric");

        let list_mutations_total = IntCounterVec::new(
            Opts::new(
                "list_mutations_total",
                "Local order list mutations by action",
            ),
            &["action"],
        )
        .expect("valid list_mutations_total metric");

        let active_runtimes = IntGauge::new(
            "active_runtimes",
            "Number of agent runtimes currently running",
        )
        .expect("valid active_runtimes metric");

        let order_list_size = IntGaugeVec::new(
            Opts::new("order_list_size", "Current local order list size"),
            &["agent_id"],
        )
        .expect("valid order_list_size metric");

        registry
            .register(Box::new(poll_cycles_total.clone()))
            .expect("register poll_cycles_total");
        registry
            .register(Box::new(poll_cycle_seconds.clone()))
            .expect("register poll_cycle_seconds");
        registry
            .register(Box::new(sync_events_total.clone()))
            .expect("register sync_events_total");
        registry
            .register(Box::new(list_mutations_total.clone()))
            .expect("register list_mutations_total");
        registry
            .register(Box::new(active_runtimes.clone()))
            .expect("register active_runtimes");
        registry
            .register(Box::new(order_list_size.clone()))
            .expect("register order_list_size");

        Self {
            registry,
            poll_cycles_total,
            poll_cycle_seconds,
            sync_events_total,
            list_mutations_total,
            active_runtimes,
            order_list_size,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
