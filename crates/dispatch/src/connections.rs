use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vigil_core::alert::Alert;
use vigil_core::config::Settings;
use vigil_core::error::DispatchError;
use vigil_core::normalize::RawAlertInput;

use crate::sink::{DeliverySink, PushMessage};

/// Per-session outcome of one broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDelivery {
    pub session_id: String,
    pub delivered: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub successful: usize,
    pub failed: usize,
    pub sessions: Vec<SessionDelivery>,
}

/// Rollup consumed by the metrics aggregator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub total_sent: u64,
    pub failed_deliveries: u64,
}

struct RetryEntry {
    payload: Value,
    queued_at: DateTime<Utc>,
    attempts: u32,
}

struct Connection {
    card_token: String,
    sink: Arc<dyn DeliverySink>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    is_active: bool,
    retry_buffer: Vec<RetryEntry>,
}

#[derive(Default)]
struct ConnectionState {
    sessions: HashMap<String, Connection>,
    /// Derived index, card token to session ids. Maintained in the same
    /// critical sections as `sessions` so the two can never diverge.
    by_card: HashMap<String, HashSet<String>>,
}

/// Owns every live consumer connection, the card index, and the bounded
/// per-connection retry buffers.
pub struct ConnectionRegistry {
    state: RwLock<ConnectionState>,
    retry_capacity: usize,
    max_attempts: u32,
    stale_after: Duration,
    total_sent: AtomicU64,
    failed_deliveries: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: RwLock::new(ConnectionState::default()),
            retry_capacity: settings.retry_buffer_capacity,
            max_attempts: settings.max_delivery_attempts,
            stale_after: settings.stale_after(),
            total_sent: AtomicU64::new(0),
            failed_deliveries: AtomicU64::new(0),
        }
    }

    /// Inserts a connection and its index entry in one critical section.
    /// Re-registering an existing session id replaces it, pruning the old
    /// card's index entry first.
    pub async fn register(
        &self,
        session_id: &str,
        card_token: &str,
        sink: Arc<dyn DeliverySink>,
    ) -> bool {
        let now = Utc::now();
        let mut state = self.state.write().await;
        if let Some(previous) = state.sessions.remove(session_id) {
            warn!(session_id = %session_id, "session replaced by new registration");
            unlink_card(&mut state.by_card, &previous.card_token, session_id);
        }
        state.sessions.insert(
            session_id.to_string(),
            Connection {
                card_token: card_token.to_string(),
                sink,
                connected_at: now,
                last_activity: now,
                is_active: true,
                retry_buffer: Vec::new(),
            },
        );
        state
            .by_card
            .entry(card_token.to_string())
            .or_default()
            .insert(session_id.to_string());
        info!(session_id = %session_id, card_token = %card_token, "connection registered");
        true
    }

    /// Removes a connection, prunes the card index, and drops any buffered
    /// retries. False if the session was unknown.
    pub async fn remove(&self, session_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(connection) = state.sessions.remove(session_id) else {
            return false;
        };
        unlink_card(&mut state.by_card, &connection.card_token, session_id);
        info!(
            session_id = %session_id,
            card_token = %connection.card_token,
            "connection removed"
        );
        true
    }

    /// Delivers one alert to every session monitoring `card_token`. Each
    /// sink write happens outside the registry lock and its failure is
    /// isolated to that session. Zero monitoring sessions means an empty
    /// outcome and no side effects.
    pub async fn broadcast(&self, card_token: &str, alert: &Alert) -> BroadcastOutcome {
        let message = PushMessage::FraudAlert {
            sent_at: Utc::now(),
            alert: alert.clone(),
        };
        let payload = match serde_json::to_value(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize push message");
                return BroadcastOutcome::default();
            }
        };

        let targets: Vec<(String, Arc<dyn DeliverySink>)> = {
            let state = self.state.read().await;
            let Some(session_ids) = state.by_card.get(card_token) else {
                return BroadcastOutcome::default();
            };
            let mut targets: Vec<_> = session_ids
                .iter()
                .filter_map(|session_id| {
                    state
                        .sessions
                        .get(session_id)
                        .filter(|connection| connection.is_active)
                        .map(|connection| (session_id.clone(), connection.sink.clone()))
                })
                .collect();
            targets.sort_by(|a, b| a.0.cmp(&b.0));
            targets
        };

        let mut outcome = BroadcastOutcome::default();
        for (session_id, sink) in targets {
            match sink.deliver(payload.clone()).await {
                Ok(()) => {
                    self.mark_delivered(&session_id).await;
                    self.total_sent.fetch_add(1, Ordering::Relaxed);
                    outcome.successful += 1;
                    outcome.sessions.push(SessionDelivery {
                        session_id,
                        delivered: true,
                    });
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "push delivery failed");
                    self.buffer_retry(&session_id, payload.clone()).await;
                    self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    outcome.failed += 1;
                    outcome.sessions.push(SessionDelivery {
                        session_id,
                        delivered: false,
                    });
                }
            }
        }
        outcome
    }

    /// Accepts raw upstream data from callers that bypass the router,
    /// normalizing before delivery.
    pub async fn broadcast_raw(
        &self,
        card_token: &str,
        alert_data: Value,
    ) -> Result<BroadcastOutcome, DispatchError> {
        let alert = RawAlertInput::classify(alert_data)?.into_alert(card_token);
        Ok(self.broadcast(card_token, &alert).await)
    }

    /// Re-attempts every buffered message. Success removes the entry;
    /// failure re-buffers it with one more attempt on the clock until the
    /// configured maximum, after which it is dropped for good.
    pub async fn retry_sweep(&self) {
        let pending: Vec<(String, Arc<dyn DeliverySink>, Vec<RetryEntry>)> = {
            let mut state = self.state.write().await;
            state
                .sessions
                .iter_mut()
                .filter(|(_, connection)| !connection.retry_buffer.is_empty())
                .map(|(session_id, connection)| {
                    (
                        session_id.clone(),
                        connection.sink.clone(),
                        std::mem::take(&mut connection.retry_buffer),
                    )
                })
                .collect()
        };

        for (session_id, sink, entries) in pending {
            for mut entry in entries {
                match sink.deliver(entry.payload.clone()).await {
                    Ok(()) => {
                        self.touch(&session_id).await;
                        self.total_sent.fetch_add(1, Ordering::Relaxed);
                        debug!(session_id = %session_id, "buffered alert redelivered");
                    }
                    Err(err) => {
                        entry.attempts += 1;
                        self.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                        if entry.attempts >= self.max_attempts {
                            warn!(
                                session_id = %session_id,
                                attempts = entry.attempts,
                                queued_at = %entry.queued_at,
                                error = %err,
                                "alert permanently failed, dropping"
                            );
                        } else {
                            self.requeue(&session_id, entry).await;
                        }
                    }
                }
            }
        }
    }

    /// Removes every connection idle past the staleness window.
    pub async fn stale_sweep(&self) -> usize {
        let cutoff = Utc::now() - self.stale_after;
        let stale: Vec<String> = {
            let state = self.state.read().await;
            state
                .sessions
                .iter()
                .filter(|(_, connection)| connection.last_activity < cutoff)
                .map(|(session_id, _)| session_id.clone())
                .collect()
        };
        for session_id in &stale {
            info!(session_id = %session_id, "removing stale connection");
            self.remove(session_id).await;
        }
        stale.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.sessions.keys().cloned().collect()
    }

    pub async fn sessions_for_card(&self, card_token: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut sessions: Vec<String> = state
            .by_card
            .get(card_token)
            .map(|session_ids| session_ids.iter().cloned().collect())
            .unwrap_or_default();
        sessions.sort();
        sessions
    }

    /// Number of messages waiting in a session's retry buffer.
    pub async fn retry_backlog(&self, session_id: &str) -> Option<usize> {
        let state = self.state.read().await;
        state
            .sessions
            .get(session_id)
            .map(|connection| connection.retry_buffer.len())
    }

    pub async fn last_activity(&self, session_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state
            .sessions
            .get(session_id)
            .map(|connection| connection.last_activity)
    }

    pub async fn connected_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state
            .sessions
            .get(session_id)
            .map(|connection| connection.connected_at)
    }

    pub async fn stats(&self) -> ConnectionStats {
        let state = self.state.read().await;
        ConnectionStats {
            active_connections: state
                .sessions
                .values()
                .filter(|connection| connection.is_active)
                .count(),
            total_sent: self.total_sent.load(Ordering::Relaxed),
            failed_deliveries: self.failed_deliveries.load(Ordering::Relaxed),
        }
    }

    async fn mark_delivered(&self, session_id: &str) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.sessions.get_mut(session_id) {
            connection.last_activity = Utc::now();
            connection.retry_buffer.clear();
        }
    }

    async fn touch(&self, session_id: &str) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.sessions.get_mut(session_id) {
            connection.last_activity = Utc::now();
        }
    }

    async fn buffer_retry(&self, session_id: &str, payload: Value) {
        let mut state = self.state.write().await;
        // The session may have been removed while the write was in flight.
        let Some(connection) = state.sessions.get_mut(session_id) else {
            return;
        };
        if connection.retry_buffer.len() >= self.retry_capacity {
            debug!(session_id = %session_id, "retry buffer full, message not buffered");
            return;
        }
        connection.retry_buffer.push(RetryEntry {
            payload,
            queued_at: Utc::now(),
            attempts: 0,
        });
    }

    async fn requeue(&self, session_id: &str, entry: RetryEntry) {
        let mut state = self.state.write().await;
        let Some(connection) = state.sessions.get_mut(session_id) else {
            return;
        };
        if connection.retry_buffer.len() < self.retry_capacity {
            connection.retry_buffer.push(entry);
        }
    }
}

fn unlink_card(
    by_card: &mut HashMap<String, HashSet<String>>,
    card_token: &str,
    session_id: &str,
) {
    if let Some(session_ids) = by_card.get_mut(card_token) {
        session_ids.remove(session_id);
        if session_ids.is_empty() {
            by_card.remove(card_token);
        }
    }
}
