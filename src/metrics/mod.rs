// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::utils::CircuitState;

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for the order workflow
// ============================================================================
//
// Covers:
// - Order creation, rejection and cancellation counts
// - Status transitions
// - Stock compensation outcomes
// - Best-effort event publication failures
// - Event broker circuit breaker state
//
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub orders_created: IntCounter,
    pub orders_rejected: IntCounterVec,
    pub orders_cancelled: IntCounter,
    pub status_transitions: IntCounterVec,
    pub workflow_duration: HistogramVec,

    pub stock_compensations: IntCounterVec,
    pub event_publish_failures: IntCounterVec,

    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Total orders successfully created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let orders_rejected = IntCounterVec::new(
            Opts::new("orders_rejected_total", "Total workflow operations rejected"),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(orders_rejected.clone()))?;

        let orders_cancelled = IntCounter::new("orders_cancelled_total", "Total orders cancelled")?;
        registry.register(Box::new(orders_cancelled.clone()))?;

        let status_transitions = IntCounterVec::new(
            Opts::new("order_status_transitions_total", "Order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        let workflow_duration = HistogramVec::new(
            HistogramOpts::new("workflow_duration_seconds", "Order workflow operation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(workflow_duration.clone()))?;

        let stock_compensations = IntCounterVec::new(
            Opts::new("stock_compensations_total", "Stock restoration attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(stock_compensations.clone()))?;

        let event_publish_failures = IntCounterVec::new(
            Opts::new("event_publish_failures_total", "Events that could not be published"),
            &["event_type"],
        )?;
        registry.register(Box::new(event_publish_failures.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Event broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            orders_rejected,
            orders_cancelled,
            status_transitions,
            workflow_duration,
            stock_compensations,
            event_publish_failures,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_operation(&self, operation: &str, duration_secs: f64, rejection: Option<&str>) {
        if let Some(reason) = rejection {
            self.orders_rejected.with_label_values(&[operation, reason]).inc();
        }
        self.workflow_duration.with_label_values(&[operation]).observe(duration_secs);
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.status_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn record_compensation(&self, restored: bool) {
        let outcome = if restored { "restored" } else { "failed" };
        self.stock_compensations.with_label_values(&[outcome]).inc();
    }

    pub fn record_publish_failure(&self, event_type: &str) {
        self.event_publish_failures.with_label_values(&[event_type]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_rejection() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation("create_order", 0.01, Some("insufficient_stock"));
        metrics.record_operation("create_order", 0.01, None);

        let gathered = metrics.registry.gather();
        let rejected = gathered.iter().find(|m| m.name() == "orders_rejected_total").unwrap();
        assert_eq!(rejected.metric[0].counter.value, Some(1.0));
    }

    #[test]
    fn test_record_compensation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_compensation(true);
        metrics.record_compensation(false);
        metrics.record_compensation(true);

        let gathered = metrics.registry.gather();
        let compensations = gathered.iter().find(|m| m.name() == "stock_compensations_total").unwrap();
        assert_eq!(compensations.metric.len(), 2); // restored + failed labels
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state(CircuitState::Open);

        let gathered = metrics.registry.gather();
        let state = gathered.iter().find(|m| m.name() == "circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
