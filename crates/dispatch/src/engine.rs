use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use vigil_core::config::Settings;
use vigil_core::error::DispatchError;

use crate::connections::{BroadcastOutcome, ConnectionRegistry};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::router::AlertRouter;
use crate::subscriptions::SubscriptionRegistry;

/// Owns the registries, the router, and the periodic maintenance sweeps.
/// Construct one at process startup and share it; there is no global
/// instance.
pub struct Dispatcher {
    subscriptions: Arc<SubscriptionRegistry>,
    connections: Arc<ConnectionRegistry>,
    router: AlertRouter,
    metrics: MetricsAggregator,
    settings: Settings,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(settings: Settings) -> Self {
        let subscriptions = Arc::new(SubscriptionRegistry::new(&settings));
        let connections = Arc::new(ConnectionRegistry::new(&settings));
        let router = AlertRouter::new(subscriptions.clone(), connections.clone());
        let metrics = MetricsAggregator::new(subscriptions.clone(), connections.clone());
        Self {
            subscriptions,
            connections,
            router,
            metrics,
            settings,
            sweeps: Mutex::new(Vec::new()),
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub async fn route(
        &self,
        card_token: &str,
        alert_data: Value,
    ) -> Result<BroadcastOutcome, DispatchError> {
        self.router.route(card_token, alert_data).await
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// Spawns the subscription expiry sweep and the combined connection
    /// maintenance sweep (retry redelivery, then staleness). Calling this
    /// twice is a no-op while the first set of sweeps is still running.
    pub async fn start_sweeps(&self) {
        let mut sweeps = self.sweeps.lock().await;
        if !sweeps.is_empty() {
            return;
        }

        let subscriptions = self.subscriptions.clone();
        let expiry_every = self.settings.expiry_sweep_interval();
        sweeps.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(expiry_every);
            loop {
                interval.tick().await;
                let removed = subscriptions.sweep().await;
                if removed > 0 {
                    info!(removed, "expiry sweep removed subscriptions");
                }
            }
        }));

        let connections = self.connections.clone();
        let maintenance_every = self.settings.connection_sweep_interval();
        sweeps.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(maintenance_every);
            loop {
                interval.tick().await;
                connections.retry_sweep().await;
                connections.stale_sweep().await;
            }
        }));

        info!("maintenance sweeps started");
    }

    /// Stops the sweeps first, then releases every remaining connection, so
    /// no sweep can fire against a registry mid-teardown.
    pub async fn shutdown(&self) {
        let mut sweeps = self.sweeps.lock().await;
        for task in sweeps.drain(..) {
            task.abort();
            let _ = task.await;
        }
        drop(sweeps);

        for session_id in self.connections.session_ids().await {
            self.connections.remove(&session_id).await;
        }
        info!("dispatcher shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vigil_core::error::DeliveryFailure;

    struct NullSink;

    #[async_trait]
    impl crate::sink::DeliverySink for NullSink {
        async fn deliver(&self, _payload: Value) -> Result<(), DeliveryFailure> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_releases_connections() {
        let dispatcher = Dispatcher::new(Settings::default());
        dispatcher.start_sweeps().await;
        dispatcher
            .connections()
            .register("sess_1", "card_A", Arc::new(NullSink))
            .await;
        dispatcher
            .connections()
            .register("sess_2", "card_B", Arc::new(NullSink))
            .await;

        dispatcher.shutdown().await;

        assert!(dispatcher.connections().session_ids().await.is_empty());
        assert!(dispatcher.connections().sessions_for_card("card_A").await.is_empty());
    }

    #[tokio::test]
    async fn test_start_sweeps_twice_is_a_no_op() {
        let dispatcher = Dispatcher::new(Settings::default());
        dispatcher.start_sweeps().await;
        dispatcher.start_sweeps().await;

        assert_eq!(dispatcher.sweeps.lock().await.len(), 2);

        dispatcher.shutdown().await;
        assert!(dispatcher.sweeps.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_without_sweeps_is_safe() {
        let dispatcher = Dispatcher::new(Settings::default());
        dispatcher.shutdown().await;
    }
}
