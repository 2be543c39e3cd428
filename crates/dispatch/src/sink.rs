use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use vigil_core::alert::Alert;
use vigil_core::error::DeliveryFailure;

/// Messages pushed to live consumers. The registry serializes these once
/// per broadcast; the transport behind the sink decides the final encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    FraudAlert {
        sent_at: DateTime<Utc>,
        alert: Alert,
    },
}

/// A write-capable handle for one consumer connection. The write is the
/// only suspension point on the push path; implementations are expected to
/// bound their own write time, the registry applies no timeout of its own.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, payload: Value) -> Result<(), DeliveryFailure>;
}

/// Sink backed by a tokio mpsc channel, for in-process consumers whose
/// transport task drains the receiving half.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Value>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Value>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl DeliverySink for ChannelSink {
    async fn deliver(&self, payload: Value) -> Result<(), DeliveryFailure> {
        self.sender
            .send(payload)
            .await
            .map_err(|err| DeliveryFailure(err.to_string()))
    }
}
