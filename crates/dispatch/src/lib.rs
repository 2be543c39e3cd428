//! Real-time fraud alert distribution: push delivery to live per-card
//! connections and pull delivery through bounded per-subscription queues.

pub mod connections;
pub mod engine;
pub mod metrics;
pub mod router;
pub mod sink;
pub mod subscriptions;

pub use connections::{BroadcastOutcome, ConnectionRegistry, SessionDelivery};
pub use engine::Dispatcher;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use router::AlertRouter;
pub use sink::{ChannelSink, DeliverySink, PushMessage};
pub use subscriptions::{
    QueuedAlert, SubscriptionConfig, SubscriptionRecord, SubscriptionRegistry, SubscriptionStatus,
};
