//! Prometheus instruments for the HTTP surface.

use log::error;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub(crate) struct Metrics {
    registry: Registry,

    /// Requests labeled by method, route, and status.
    pub(crate) http_requests: IntCounterVec,

    /// Latency in seconds labeled by method, route, and status.
    pub(crate) latency: HistogramVec,

    /// Number of active subscriptions.
    pub(crate) subscriptions: IntGauge,

    /// Cumulative number of published messages.
    pub(crate) published_messages: IntCounter,
}

impl Metrics {
    /// Build and register the instrument set. Registration only fails on
    /// duplicate or invalid descriptors, which would be a programming error,
    /// so failures panic the way a misdeclared metric should.
    pub(crate) fn new() -> Metrics {
        let http_requests = IntCounterVec::new(
            Opts::new(
                "db_http_requests_total",
                "Total number of db HTTP requests, labeled by method, route, and status.",
            ),
            &["method", "route", "status"],
        )
        .unwrap();

        let latency = HistogramVec::new(
            HistogramOpts::new(
                "db_latency_seconds",
                "Histogram of db request latency in seconds, labeled by method, route, and status.",
            ),
            &["method", "route", "status"],
        )
        .unwrap();

        let subscriptions = IntGauge::new("db_subscriptions", "Number of active subscriptions").unwrap();

        let published_messages = IntCounter::new(
            "db_published_messages",
            "Cumulative number of published messages",
        )
        .unwrap();

        let registry = Registry::new();
        registry.register(Box::new(http_requests.clone())).unwrap();
        registry.register(Box::new(latency.clone())).unwrap();
        registry.register(Box::new(subscriptions.clone())).unwrap();
        registry
            .register(Box::new(published_messages.clone()))
            .unwrap();

        Metrics {
            registry,
            http_requests,
            latency,
            subscriptions,
            published_messages,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub(crate) fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!("failed to encode metrics: {}", err);
            return String::new();
        }

        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_instruments() {
        let metrics = Metrics::new();
        metrics
            .http_requests
            .with_label_values(&["GET", "/v1/keys/:key", "200"])
            .inc();
        metrics.subscriptions.inc();
        metrics.published_messages.inc();

        let output = metrics.render();
        assert!(output.contains("db_http_requests_total"));
        assert!(output.contains("db_subscriptions 1"));
        assert!(output.contains("db_published_messages 1"));
    }
}
