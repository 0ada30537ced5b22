use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// Core OTel metrics for the broker. Created once at broker start and shared
/// by every topic and the sweeper.
pub struct Metrics {
    pub messages_pushed: Counter<u64>,
    pub messages_delivered: Counter<u64>,
    pub messages_finished: Counter<u64>,
    pub messages_reclaimed: Counter<u64>,
    pub ready_depth: Gauge<u64>,
    pub parked_workers: Gauge<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("loomq");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_pushed: meter
                .u64_counter("loomq.messages.pushed")
                .with_description("Total messages pushed (including re-queues)")
                .build(),
            messages_delivered: meter
                .u64_counter("loomq.messages.delivered")
                .with_description("Total messages handed to workers")
                .build(),
            messages_finished: meter
                .u64_counter("loomq.messages.finished")
                .with_description("Total messages acknowledged")
                .build(),
            messages_reclaimed: meter
                .u64_counter("loomq.messages.reclaimed")
                .with_description("Total unacknowledged messages re-queued by recovery")
                .build(),
            ready_depth: meter
                .u64_gauge("loomq.topic.ready_depth")
                .with_description("Messages waiting in the ready queue")
                .build(),
            parked_workers: meter
                .u64_gauge("loomq.topic.parked_workers")
                .with_description("Workers waiting for a message")
                .build(),
        }
    }

    fn topic_attr(topic: &str) -> [KeyValue; 1] {
        [KeyValue::new("topic", topic.to_string())]
    }

    pub fn record_push(&self, topic: &str) {
        self.messages_pushed.add(1, &Self::topic_attr(topic));
    }

    pub fn record_delivery(&self, topic: &str) {
        self.messages_delivered.add(1, &Self::topic_attr(topic));
    }

    pub fn record_finish(&self, topic: &str) {
        self.messages_finished.add(1, &Self::topic_attr(topic));
    }

    pub fn record_reclaim(&self, topic: &str) {
        self.messages_reclaimed.add(1, &Self::topic_attr(topic));
    }

    pub fn set_ready_depth(&self, topic: &str, depth: u64) {
        self.ready_depth.record(depth, &Self::topic_attr(topic));
    }

    pub fn set_parked_workers(&self, topic: &str, count: u64) {
        self.parked_workers.record(count, &Self::topic_attr(topic));
    }
}
