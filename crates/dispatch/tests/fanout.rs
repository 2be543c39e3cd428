//! End-to-end fan-out scenarios across the router, both registries, and
//! the engine lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use vigil_core::config::Settings;
use vigil_core::error::{DeliveryFailure, DispatchError};
use vigil_dispatch::{
    AlertRouter, ConnectionRegistry, DeliverySink, Dispatcher, SubscriptionConfig,
    SubscriptionRegistry,
};

struct RecordingSink {
    delivered: Mutex<Vec<Value>>,
    fail: AtomicBool,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn failing() -> Arc<Self> {
        let sink = Self::new();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, payload: Value) -> Result<(), DeliveryFailure> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryFailure("sink unavailable".to_string()));
        }
        self.delivered.lock().unwrap().push(payload);
        Ok(())
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn fraud_payload() -> Value {
    json!({
        "alertType": "fraud_detected",
        "transactionId": "txn_77",
        "amount": 99.95,
        "merchant": { "name": "Acme Corp", "city": "Austin", "country": "USA" },
        "status": "DECLINED",
        "riskScore": 0.9
    })
}

#[tokio::test]
async fn test_targeted_subscription_receives_alert_exactly_once() -> Result<()> {
    init_logging();
    let dispatcher = Dispatcher::new(Settings::default());
    dispatcher
        .subscriptions()
        .create(
            "sub_1",
            SubscriptionConfig {
                card_tokens: ["card_A".to_string()].into_iter().collect(),
                alert_types: [vigil_core::AlertType::FraudDetected].into_iter().collect(),
                risk_threshold: None,
                duration: Some("1h".to_string()),
            },
        )
        .await;

    dispatcher.route("card_A", fraud_payload()).await?;

    let drained = dispatcher.subscriptions().poll("sub_1", Some(50)).await?;
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].alert.card_token, "card_A");
    assert_eq!(drained[0].alert.immediate.amount, "$99.95");
    assert_eq!(drained[0].alert.immediate.location, "Austin, USA");

    let again = dispatcher.subscriptions().poll("sub_1", Some(50)).await?;
    assert!(again.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_catch_all_subscription_sees_every_card_and_type() -> Result<()> {
    let dispatcher = Dispatcher::new(Settings::default());
    dispatcher
        .subscriptions()
        .create("catch_all", SubscriptionConfig::default())
        .await;

    dispatcher.route("card_A", fraud_payload()).await?;
    dispatcher
        .route("card_B", json!({ "alertType": "velocity_breach" }))
        .await?;
    dispatcher.route("card_C", json!({})).await?;

    let drained = dispatcher.subscriptions().poll("catch_all", None).await?;
    assert_eq!(drained.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_failing_sink_buffers_then_redelivers_after_recovery() -> Result<()> {
    init_logging();
    let settings = Settings::default();
    let connections = Arc::new(ConnectionRegistry::new(&settings));
    let subscriptions = Arc::new(SubscriptionRegistry::new(&settings));
    let router = AlertRouter::new(subscriptions, connections.clone());

    let sink = RecordingSink::failing();
    connections.register("sess_1", "card_B", sink.clone()).await;

    let outcome = router.route("card_B", fraud_payload()).await?;
    assert_eq!(outcome.successful, 0);
    assert_eq!(outcome.failed, 1);
    assert_eq!(connections.retry_backlog("sess_1").await, Some(1));

    sink.fail.store(false, Ordering::SeqCst);
    connections.retry_sweep().await;

    assert_eq!(connections.retry_backlog("sess_1").await, Some(0));
    assert_eq!(sink.delivered_count(), 1);
    let stats = connections.stats().await;
    assert_eq!(stats.total_sent, 1);
    assert_eq!(stats.failed_deliveries, 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_session_swept_out_of_the_index() -> Result<()> {
    let settings = Settings {
        stale_after_secs: 0,
        ..Default::default()
    };
    let connections = ConnectionRegistry::new(&settings);
    connections
        .register("sess_2", "card_C", RecordingSink::new())
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let removed = connections.stale_sweep().await;

    assert_eq!(removed, 1);
    assert!(connections.session_ids().await.is_empty());
    assert!(connections.sessions_for_card("card_C").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_push_and_pull_paths_are_independent() -> Result<()> {
    let dispatcher = Dispatcher::new(Settings::default());
    let sink = RecordingSink::failing();
    dispatcher
        .connections()
        .register("sess_1", "card_A", sink.clone())
        .await;
    dispatcher
        .subscriptions()
        .create("sub_1", SubscriptionConfig::default())
        .await;

    // A failing push sink must not keep the alert out of the queues.
    let outcome = dispatcher.route("card_A", fraud_payload()).await?;
    assert_eq!(outcome.failed, 1);

    let drained = dispatcher.subscriptions().poll("sub_1", None).await?;
    assert_eq!(drained.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_enqueue_and_poll_never_duplicates_or_loses() -> Result<()> {
    let settings = Settings::default();
    let subscriptions = Arc::new(SubscriptionRegistry::new(&settings));
    subscriptions
        .create("sub_1", SubscriptionConfig::default())
        .await;

    let producer = {
        let subscriptions = subscriptions.clone();
        tokio::spawn(async move {
            let alert = vigil_core::RawAlertInput::classify(json!({}))
                .unwrap()
                .into_alert("card_A");
            for _ in 0..200 {
                subscriptions.enqueue("sub_1", &alert).await;
                tokio::task::yield_now().await;
            }
        })
    };

    let consumer = {
        let subscriptions = subscriptions.clone();
        tokio::spawn(async move {
            let mut seen: Vec<u64> = Vec::new();
            while seen.len() < 200 {
                let drained = subscriptions.poll("sub_1", Some(25)).await.unwrap();
                seen.extend(drained.iter().map(|entry| entry.position));
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    producer.await?;
    let seen = consumer.await?;

    assert_eq!(seen.len(), 200);
    let unique: HashSet<u64> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 200, "no alert may be polled twice");
    let mut sorted = seen.clone();
    sorted.sort_unstable();
    assert_eq!(seen, sorted, "polls must preserve enqueue order");
    Ok(())
}

#[tokio::test]
async fn test_concurrent_registration_and_broadcast() -> Result<()> {
    let settings = Settings::default();
    let connections = Arc::new(ConnectionRegistry::new(&settings));
    let alert = vigil_core::RawAlertInput::classify(json!({}))
        .unwrap()
        .into_alert("card_A");

    let mut tasks = Vec::new();
    for i in 0..10 {
        let connections = connections.clone();
        tasks.push(tokio::spawn(async move {
            connections
                .register(&format!("sess_{i}"), "card_A", RecordingSink::new())
                .await;
        }));
    }
    for _ in 0..10 {
        let connections = connections.clone();
        let alert = alert.clone();
        tasks.push(tokio::spawn(async move {
            connections.broadcast("card_A", &alert).await;
        }));
    }
    futures_util::future::join_all(tasks).await;

    assert_eq!(connections.sessions_for_card("card_A").await.len(), 10);
    assert_eq!(connections.session_ids().await.len(), 10);
    Ok(())
}

#[tokio::test]
async fn test_engine_lifecycle_with_metrics() -> Result<()> {
    init_logging();
    let dispatcher = Dispatcher::new(Settings::default());
    dispatcher.start_sweeps().await;

    let sink = RecordingSink::new();
    dispatcher
        .connections()
        .register("sess_1", "card_A", sink.clone())
        .await;
    dispatcher
        .subscriptions()
        .create("sub_1", SubscriptionConfig::default())
        .await;

    dispatcher.route("card_A", fraud_payload()).await?;

    let metrics = dispatcher.metrics().await;
    assert_eq!(metrics.total_subscriptions, 1);
    assert_eq!(metrics.active_subscriptions, 1);
    assert_eq!(metrics.total_alerts_queued, 1);
    assert_eq!(metrics.total_alerts_sent, 1);
    assert_eq!(metrics.active_connections, 1);
    assert_eq!(sink.delivered_count(), 1);

    dispatcher.shutdown().await;
    assert!(dispatcher.connections().session_ids().await.is_empty());

    let metrics = dispatcher.metrics().await;
    assert_eq!(metrics.active_connections, 0);
    Ok(())
}

#[tokio::test]
async fn test_expired_subscription_poll_then_not_found_after_sweep() -> Result<()> {
    let dispatcher = Dispatcher::new(Settings::default());
    dispatcher
        .subscriptions()
        .create(
            "sub_1",
            SubscriptionConfig {
                duration: Some("0m".to_string()),
                ..Default::default()
            },
        )
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let err = dispatcher.subscriptions().poll("sub_1", None).await.unwrap_err();
    assert_eq!(err, DispatchError::Expired("sub_1".to_string()));

    dispatcher.subscriptions().sweep().await;
    let err = dispatcher.subscriptions().poll("sub_1", None).await.unwrap_err();
    assert_eq!(err, DispatchError::NotFound("sub_1".to_string()));
    Ok(())
}
