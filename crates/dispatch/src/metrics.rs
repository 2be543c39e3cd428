use std::sync::Arc;

use serde::Serialize;

use crate::connections::ConnectionRegistry;
use crate::subscriptions::SubscriptionRegistry;

/// Point-in-time rollup over both registries. Derived, not authoritative:
/// the registries own the state, this only reads it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_subscriptions: usize,
    pub active_subscriptions: usize,
    pub total_alerts_queued: u64,
    pub total_alerts_polled: u64,
    pub average_queue_size: f64,
    pub cleanup_cycles: u64,
    pub active_connections: usize,
    pub total_alerts_sent: u64,
    pub failed_deliveries: u64,
}

pub struct MetricsAggregator {
    subscriptions: Arc<SubscriptionRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl MetricsAggregator {
    pub fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            subscriptions,
            connections,
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let subscriptions = self.subscriptions.stats().await;
        let connections = self.connections.stats().await;
        MetricsSnapshot {
            total_subscriptions: subscriptions.total,
            active_subscriptions: subscriptions.active,
            total_alerts_queued: subscriptions.total_queued,
            total_alerts_polled: subscriptions.total_polled,
            average_queue_size: subscriptions.average_queue_size,
            cleanup_cycles: subscriptions.cleanup_cycles,
            active_connections: connections.active_connections,
            total_alerts_sent: connections.total_sent,
            failed_deliveries: connections.failed_deliveries,
        }
    }
}
