use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vigil_core::alert::{Alert, AlertType};
use vigil_core::config::Settings;
use vigil_core::error::DispatchError;
use vigil_core::ttl;

/// Parameters for a new subscription. An empty token or type set matches
/// every alert.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscriptionConfig {
    pub card_tokens: HashSet<String>,
    pub alert_types: HashSet<AlertType>,
    pub risk_threshold: Option<f64>,
    /// Relative lifetime, e.g. `"4h"`. Unparseable values fall back to the
    /// configured default.
    pub duration: Option<String>,
}

/// A queued alert plus its queue bookkeeping. The alert itself is never
/// mutated after routing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAlert {
    pub subscription_id: String,
    pub queued_at: DateTime<Utc>,
    pub position: u64,
    pub alert: Alert,
}

/// Snapshot handed back from `create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub card_tokens: Vec<String>,
    pub alert_types: Vec<AlertType>,
    pub risk_threshold: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Diagnostic snapshot handed back from `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub subscription_id: String,
    pub is_active: bool,
    pub expired: bool,
    pub queue_depth: usize,
    pub seconds_remaining: i64,
    pub poll_count: u64,
    pub total_alerts_received: u64,
    pub last_polled: Option<DateTime<Utc>>,
    /// Bounded sample of the newest queued alerts.
    pub recent: Vec<QueuedAlert>,
}

/// Rollup consumed by the metrics aggregator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionStats {
    pub total: usize,
    pub active: usize,
    pub total_queued: u64,
    pub total_polled: u64,
    pub average_queue_size: f64,
    pub cleanup_cycles: u64,
}

const STATUS_SAMPLE: usize = 3;

#[derive(Debug)]
struct Subscription {
    card_tokens: HashSet<String>,
    alert_types: HashSet<AlertType>,
    risk_threshold: Option<f64>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
    last_polled: Option<DateTime<Utc>>,
    poll_count: u64,
    total_alerts_received: u64,
    queue: VecDeque<QueuedAlert>,
    next_position: u64,
}

impl Subscription {
    fn wants(&self, card_token: &str, alert: &Alert) -> bool {
        if !self.card_tokens.is_empty() && !self.card_tokens.contains(card_token) {
            return false;
        }
        if !self.alert_types.is_empty() && !self.alert_types.contains(&alert.alert_type) {
            return false;
        }
        match (self.risk_threshold, alert.risk_score) {
            (Some(threshold), Some(score)) => score >= threshold,
            _ => true,
        }
    }

    fn push(&mut self, subscription_id: &str, alert: &Alert, capacity: usize) {
        self.queue.push_back(QueuedAlert {
            subscription_id: subscription_id.to_string(),
            queued_at: Utc::now(),
            position: self.next_position,
            alert: alert.clone(),
        });
        self.next_position += 1;
        while self.queue.len() > capacity {
            self.queue.pop_front();
            debug!(subscription_id = %subscription_id, "queue full, dropped oldest alert");
        }
        self.total_alerts_received += 1;
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    subscriptions: HashMap<String, Subscription>,
    total_queued: u64,
    total_polled: u64,
    cleanup_cycles: u64,
}

/// Owns every subscription record and its bounded queue. All mutation goes
/// through one write guard; callers only ever see snapshots.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: RwLock<SubscriptionState>,
    queue_capacity: usize,
    poll_default: usize,
    poll_max: usize,
    default_ttl: Duration,
}

impl SubscriptionRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: RwLock::new(SubscriptionState::default()),
            queue_capacity: settings.queue_capacity,
            poll_default: settings.poll_default,
            poll_max: settings.poll_max,
            default_ttl: settings.default_ttl(),
        }
    }

    /// Registers a subscription under an externally assigned id. Re-using
    /// an existing id replaces the previous record and its queue.
    pub async fn create(
        &self,
        subscription_id: &str,
        config: SubscriptionConfig,
    ) -> SubscriptionRecord {
        let now = Utc::now();
        let lifetime = config
            .duration
            .as_deref()
            .and_then(ttl::parse_ttl)
            .unwrap_or(self.default_ttl);
        let subscription = Subscription {
            card_tokens: config.card_tokens,
            alert_types: config.alert_types,
            risk_threshold: config.risk_threshold,
            created_at: now,
            expires_at: now + lifetime,
            is_active: true,
            last_polled: None,
            poll_count: 0,
            total_alerts_received: 0,
            queue: VecDeque::new(),
            next_position: 0,
        };

        let mut card_tokens: Vec<String> = subscription.card_tokens.iter().cloned().collect();
        card_tokens.sort();
        let record = SubscriptionRecord {
            subscription_id: subscription_id.to_string(),
            card_tokens,
            alert_types: subscription.alert_types.iter().copied().collect(),
            risk_threshold: subscription.risk_threshold,
            created_at: subscription.created_at,
            expires_at: subscription.expires_at,
            is_active: subscription.is_active,
        };

        let mut state = self.state.write().await;
        if state
            .subscriptions
            .insert(subscription_id.to_string(), subscription)
            .is_some()
        {
            warn!(subscription_id = %subscription_id, "existing subscription replaced");
        }
        info!(
            subscription_id = %subscription_id,
            expires_at = %record.expires_at,
            "subscription created"
        );
        record
    }

    /// Appends one alert to a subscription's queue. Returns false for an
    /// unknown or inactive subscription so fan-out can skip silently.
    pub async fn enqueue(&self, subscription_id: &str, alert: &Alert) -> bool {
        let mut state = self.state.write().await;
        let Some(subscription) = state.subscriptions.get_mut(subscription_id) else {
            return false;
        };
        if !subscription.is_active {
            return false;
        }
        subscription.push(subscription_id, alert, self.queue_capacity);
        state.total_queued += 1;
        true
    }

    /// Atomically drains up to `max_alerts` entries in FIFO order. An alert
    /// returned here is gone from the queue; a second poll never sees it.
    pub async fn poll(
        &self,
        subscription_id: &str,
        max_alerts: Option<usize>,
    ) -> Result<Vec<QueuedAlert>, DispatchError> {
        let limit = max_alerts.unwrap_or(self.poll_default).clamp(1, self.poll_max);
        let now = Utc::now();
        let mut state = self.state.write().await;
        let Some(subscription) = state.subscriptions.get_mut(subscription_id) else {
            return Err(DispatchError::NotFound(subscription_id.to_string()));
        };
        if !subscription.is_active {
            return Err(DispatchError::Inactive(subscription_id.to_string()));
        }
        if now > subscription.expires_at {
            subscription.is_active = false;
            return Err(DispatchError::Expired(subscription_id.to_string()));
        }

        let take = limit.min(subscription.queue.len());
        let drained: Vec<QueuedAlert> = subscription.queue.drain(..take).collect();
        subscription.last_polled = Some(now);
        subscription.poll_count += 1;
        state.total_polled += drained.len() as u64;
        debug!(
            subscription_id = %subscription_id,
            drained = drained.len(),
            "subscription polled"
        );
        Ok(drained)
    }

    pub async fn status(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionStatus, DispatchError> {
        let now = Utc::now();
        let state = self.state.read().await;
        let Some(subscription) = state.subscriptions.get(subscription_id) else {
            return Err(DispatchError::NotFound(subscription_id.to_string()));
        };
        let skip = subscription.queue.len().saturating_sub(STATUS_SAMPLE);
        Ok(SubscriptionStatus {
            subscription_id: subscription_id.to_string(),
            is_active: subscription.is_active,
            expired: now > subscription.expires_at,
            queue_depth: subscription.queue.len(),
            seconds_remaining: (subscription.expires_at - now).num_seconds().max(0),
            poll_count: subscription.poll_count,
            total_alerts_received: subscription.total_alerts_received,
            last_polled: subscription.last_polled,
            recent: subscription.queue.iter().skip(skip).cloned().collect(),
        })
    }

    /// Administrative closure: deactivates without removing, so a later
    /// poll reports Inactive rather than NotFound.
    pub async fn close(&self, subscription_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(subscription) = state.subscriptions.get_mut(subscription_id) else {
            return false;
        };
        subscription.is_active = false;
        info!(subscription_id = %subscription_id, "subscription closed");
        true
    }

    /// Evaluates the match predicate for every active subscription and
    /// enqueues on match. Non-matching or inactive subscriptions are
    /// skipped; nothing here can abort delivery to the rest.
    pub async fn fan_out(&self, card_token: &str, alert: &Alert) -> usize {
        let mut state = self.state.write().await;
        let mut matched = 0u64;
        let capacity = self.queue_capacity;
        for (subscription_id, subscription) in state.subscriptions.iter_mut() {
            if !subscription.is_active || !subscription.wants(card_token, alert) {
                continue;
            }
            subscription.push(subscription_id, alert, capacity);
            matched += 1;
        }
        state.total_queued += matched;
        debug!(
            card_token = %card_token,
            matched,
            "alert fanned out to subscription queues"
        );
        matched as usize
    }

    /// Removes every subscription past its expiry, queue included. This is
    /// the only path that frees memory for subscriptions nobody polls.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .subscriptions
            .iter()
            .filter(|(_, subscription)| now > subscription.expires_at)
            .map(|(subscription_id, _)| subscription_id.clone())
            .collect();
        for subscription_id in &expired {
            if let Some(subscription) = state.subscriptions.remove(subscription_id) {
                info!(
                    subscription_id = %subscription_id,
                    dropped = subscription.queue.len(),
                    "expired subscription removed"
                );
            }
        }
        state.cleanup_cycles += 1;
        expired.len()
    }

    pub async fn stats(&self) -> SubscriptionStats {
        let state = self.state.read().await;
        let total = state.subscriptions.len();
        let depth: usize = state
            .subscriptions
            .values()
            .map(|subscription| subscription.queue.len())
            .sum();
        SubscriptionStats {
            total,
            active: state
                .subscriptions
                .values()
                .filter(|subscription| subscription.is_active)
                .count(),
            total_queued: state.total_queued,
            total_polled: state.total_polled,
            average_queue_size: if total == 0 {
                0.0
            } else {
                depth as f64 / total as f64
            },
            cleanup_cycles: state.cleanup_cycles,
        }
    }
}
