use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub eta_recalculations_total: IntCounterVec,
    pub alerts_sent_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub courier_active_orders: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Total dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of scoring plus assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let eta_recalculations_total = IntCounterVec::new(
            Opts::new(
                "eta_recalculations_total",
                "ETA recalculations per order by outcome",
            ),
            &["outcome"],
        )
        .expect("valid eta_recalculations_total metric");

        let alerts_sent_total = IntCounterVec::new(
            Opts::new("alerts_sent_total", "Customer alerts sent by kind"),
            &["kind"],
        )
        .expect("valid alerts_sent_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification attempts by status"),
            &["status"],
        )
        .expect("valid notifications_total metric");

        let courier_active_orders = IntGaugeVec::new(
            Opts::new("courier_active_orders", "Active orders held per courier"),
            &["courier_id"],
        )
        .expect("valid courier_active_orders metric");

        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(eta_recalculations_total.clone()))
            .expect("register eta_recalculations_total");
        registry
            .register(Box::new(alerts_sent_total.clone()))
            .expect("register alerts_sent_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(courier_active_orders.clone()))
            .expect("register courier_active_orders");

        Self {
            registry,
            dispatch_total,
            dispatch_latency_seconds,
            eta_recalculations_total,
            alerts_sent_total,
            notifications_total,
            courier_active_orders,
        }
    }

    pub fn record_courier_load(&self, courier_id: &uuid::Uuid, active_orders: u32) {
        self.courier_active_orders
            .with_label_values(&[&courier_id.to_string()])
            .set(i64::from(active_orders));
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
