//! Kafka-backed bus implementations.
//!
//! [`KafkaEventBus`] publishes ordered entry batches through rdkafka's
//! `FutureProducer`; [`KafkaBusInspector`] answers the watermark and
//! committed-offset queries the backlog metrics need. Everything here
//! sits behind the `kafka` feature so the rest of the workspace builds
//! and tests without a broker.

/// Batch producer over `FutureProducer`
pub mod producer;

/// Offset queries for backlog metrics
pub mod inspector;

pub use inspector::KafkaBusInspector;
pub use producer::KafkaEventBus;
