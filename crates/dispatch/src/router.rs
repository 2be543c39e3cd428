use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use vigil_core::error::DispatchError;
use vigil_core::normalize::RawAlertInput;

use crate::connections::{BroadcastOutcome, ConnectionRegistry};
use crate::subscriptions::SubscriptionRegistry;

/// Composition point for the two delivery paths. The router depends on
/// both registries; they never depend on each other or on it.
pub struct AlertRouter {
    subscriptions: Arc<SubscriptionRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl AlertRouter {
    pub fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            subscriptions,
            connections,
        }
    }

    /// Normalizes the payload once, pushes to every live connection on the
    /// card, then queues for every matching subscription. Pull-path
    /// outcomes are fire-and-forget, observable only through poll, status,
    /// or metrics; a malformed payload is the one error the caller sees.
    pub async fn route(
        &self,
        card_token: &str,
        alert_data: Value,
    ) -> Result<BroadcastOutcome, DispatchError> {
        let alert = RawAlertInput::classify(alert_data)?.into_alert(card_token);

        let outcome = self.connections.broadcast(card_token, &alert).await;
        let queued = self.subscriptions.fan_out(card_token, &alert).await;

        debug!(
            card_token = %card_token,
            alert_type = ?alert.alert_type,
            pushed = outcome.successful,
            push_failed = outcome.failed,
            queued,
            "alert routed"
        );
        Ok(outcome)
    }
}
