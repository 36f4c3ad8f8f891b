use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder,
    histogram_opts, opts,
};
use std::time::Duration;

/// Prometheus registry and collectors for the pool manager
pub struct PoolManagerMetrics {
    registry: Registry,

    // Backend dispatch
    backend_calls: CounterVec,

    // DNS wire traffic
    wire_requests: CounterVec,
    verification_duration: HistogramVec,

    // Consensus and reporting
    consensus_total: CounterVec,
    report_failures: IntCounter,
    in_flight_verifications: IntGauge,

    // Periodic timers
    reconciler_zones: CounterVec,
}

impl PoolManagerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let backend_calls = CounterVec::new(
            opts!(
                "zonepool_backend_calls_total",
                "Backend driver calls by backend type, action and result"
            ),
            &["backend", "action", "result"],
        )?;

        let wire_requests = CounterVec::new(
            opts!(
                "zonepool_wire_requests_total",
                "DNS probes by kind (notify/soa) and final outcome"
            ),
            &["kind", "outcome"],
        )?;

        let verification_duration = HistogramVec::new(
            histogram_opts!(
                "zonepool_verification_duration_seconds",
                "Time to verify one nameserver, including delays and retries",
                vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
            ),
            &["action", "status"],
        )?;

        let consensus_total = CounterVec::new(
            opts!(
                "zonepool_consensus_total",
                "Consensus decisions by action and status"
            ),
            &["action", "status"],
        )?;

        let report_failures = IntCounter::with_opts(opts!(
            "zonepool_report_failures_total",
            "Consensus reports that could not be delivered to the central store"
        ))?;

        let in_flight_verifications = IntGauge::with_opts(opts!(
            "zonepool_verifications_in_flight",
            "Nameserver verifications currently running"
        ))?;

        let reconciler_zones = CounterVec::new(
            opts!(
                "zonepool_reconciler_zones_total",
                "Zones processed by the periodic timers"
            ),
            &["timer", "result"],
        )?;

        registry.register(Box::new(backend_calls.clone()))?;
        registry.register(Box::new(wire_requests.clone()))?;
        registry.register(Box::new(verification_duration.clone()))?;
        registry.register(Box::new(consensus_total.clone()))?;
        registry.register(Box::new(report_failures.clone()))?;
        registry.register(Box::new(in_flight_verifications.clone()))?;
        registry.register(Box::new(reconciler_zones.clone()))?;

        Ok(Self {
            registry,
            backend_calls,
            wire_requests,
            verification_duration,
            consensus_total,
            report_failures,
            in_flight_verifications,
            reconciler_zones,
        })
    }

    pub fn record_backend_call(&self, backend: &str, action: &str, success: bool) {
        self.backend_calls
            .with_label_values(&[backend, action, if success { "ok" } else { "error" }])
            .inc();
    }

    pub fn record_wire_request(&self, kind: &str, outcome: &str) {
        self.wire_requests.with_label_values(&[kind, outcome]).inc();
    }

    pub fn record_verification(&self, action: &str, status: &str, duration: Duration) {
        self.verification_duration
            .with_label_values(&[action, status])
            .observe(duration.as_secs_f64());
    }

    pub fn record_consensus(&self, action: &str, status: &str) {
        self.consensus_total.with_label_values(&[action, status]).inc();
    }

    pub fn record_report_failure(&self) {
        self.report_failures.inc();
    }

    pub fn verification_started(&self) {
        self.in_flight_verifications.inc();
    }

    pub fn verification_finished(&self) {
        self.in_flight_verifications.dec();
    }

    pub fn record_reconciled_zone(&self, timer: &str, success: bool) {
        self.reconciler_zones
            .with_label_values(&[timer, if success { "ok" } else { "error" }])
            .inc();
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = PoolManagerMetrics::new().unwrap();
        metrics.record_backend_call("fake", "CREATE", false);
        metrics.record_wire_request("soa", "timeout");
        metrics.record_consensus("UPDATE", "SUCCESS");
        metrics.record_report_failure();

        let text = metrics.export().unwrap();
        assert!(text.contains(
            r#"zonepool_backend_calls_total{action="CREATE",backend="fake",result="error"} 1"#
        ));
        assert!(text.contains(r#"zonepool_wire_requests_total{kind="soa",outcome="timeout"} 1"#));
        assert!(text.contains("zonepool_report_failures_total 1"));
    }
}
