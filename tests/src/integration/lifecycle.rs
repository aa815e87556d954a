//! # Subscription Lifecycle
//!
//! Expiry, delivery budgets, capacity limits, unsubscribe paths and the
//! periodic sweep.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{call_log, recording};
    use event_bus::{
        sync_handler, BusConfig, BusError, CapacityScope, EventBus, HandlerRef, PublishOptions,
        SubscribeOptions,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting(calls: &Arc<AtomicUsize>) -> HandlerRef {
        let calls = calls.clone();
        sync_handler(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    // =============================================================================
    // EXPIRY AND BUDGETS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_expires_in_stops_delivery() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = bus
            .subscribe(
                "session.ping",
                counting(&calls),
                SubscribeOptions::default().expires_in(Duration::from_millis(100)),
            )
            .unwrap();

        bus.publish("session.ping", json!(1), PublishOptions::wait())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(bus.subscriber_count("session.ping"), 0);
        let result = bus
            .publish("session.ping", json!(2), PublishOptions::wait())
            .await
            .unwrap();

        assert_eq!(result.delivered_to_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
        assert_eq!(bus.stats().subscriptions_expired, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_events_exact_under_concurrent_publishes() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = bus
            .subscribe(
                "burst",
                counting(&calls),
                SubscribeOptions::default().max_events(5),
            )
            .unwrap();

        let publishes: Vec<_> = (0..64)
            .map(|i| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    bus.publish("burst", json!(i), PublishOptions::wait())
                        .await
                        .unwrap()
                        .delivered_to_count
                })
            })
            .collect();

        let mut delivered = 0;
        for publish in publishes {
            delivered += publish.await.unwrap();
        }

        assert_eq!(delivered, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(!subscription.is_active());
        assert!(!bus.has_listeners("burst"));
    }

    #[tokio::test]
    async fn test_subscribe_once_on_pattern() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = bus
            .subscribe_pattern_once("deploy.*", counting(&calls), SubscribeOptions::default())
            .unwrap();
        assert!(subscription.pattern());

        bus.publish("deploy.started", json!(null), PublishOptions::wait())
            .await
            .unwrap();
        bus.publish("deploy.finished", json!(null), PublishOptions::wait())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
        assert_eq!(subscription.event_count(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_count_agrees_with_listener_queries() {
        let bus = EventBus::new();
        bus.subscribe(
            "token.refresh",
            sync_handler(|_| Ok(())),
            SubscribeOptions::default().expires_in(Duration::from_secs(1)),
        )
        .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(!bus.has_listeners("token.refresh"));
        assert_eq!(bus.subscriber_count("token.refresh"), 0);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.stats().active_subscriptions, 0);
    }

    // =============================================================================
    // CAPACITY
    // =============================================================================

    #[tokio::test]
    async fn test_per_topic_cap_leaves_registry_unchanged() {
        let config = BusConfig::default().with_max_subscriptions_per_topic(2);
        let bus = EventBus::with_config(config).unwrap();
        let noop = sync_handler(|_| Ok(()));

        bus.subscribe("X", noop.clone(), SubscribeOptions::default())
            .unwrap();
        bus.subscribe("X", noop.clone(), SubscribeOptions::default())
            .unwrap();

        let err = bus
            .subscribe("X", noop.clone(), SubscribeOptions::default())
            .unwrap_err();
        match err {
            BusError::CapacityExceeded {
                scope: CapacityScope::Topic(topic),
                current,
                max,
            } => {
                assert_eq!(topic, "X");
                assert_eq!(current, 2);
                assert_eq!(max, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(bus.subscriber_count("X"), 2);

        // Other topics and patterns are unaffected
        bus.subscribe("Y", noop.clone(), SubscribeOptions::default())
            .unwrap();
        bus.subscribe_pattern("X*", noop, SubscribeOptions::default())
            .unwrap();
        assert_eq!(bus.subscriber_count("X"), 3);
    }

    #[tokio::test]
    async fn test_global_cap_counts_patterns() {
        let config = BusConfig::default().with_max_subscriptions(2);
        let bus = EventBus::with_config(config).unwrap();
        let noop = sync_handler(|_| Ok(()));

        bus.subscribe("a", noop.clone(), SubscribeOptions::default())
            .unwrap();
        bus.subscribe_pattern("b.*", noop.clone(), SubscribeOptions::default())
            .unwrap();

        let err = bus
            .subscribe("c", noop, SubscribeOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::CapacityExceeded {
                scope: CapacityScope::Global,
                ..
            }
        ));
        assert_eq!(bus.subscription_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_free_capacity() {
        let config = BusConfig::default().with_max_subscriptions_per_topic(1);
        let bus = EventBus::with_config(config).unwrap();
        let noop = sync_handler(|_| Ok(()));

        bus.subscribe(
            "lease",
            noop.clone(),
            SubscribeOptions::default().expires_in(Duration::from_secs(1)),
        )
        .unwrap();
        assert!(bus
            .subscribe("lease", noop.clone(), SubscribeOptions::default())
            .is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        bus.subscribe("lease", noop, SubscribeOptions::default())
            .unwrap();
        assert_eq!(bus.subscriber_count("lease"), 1);
    }

    // =============================================================================
    // UNSUBSCRIBE
    // =============================================================================

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let log = call_log();
        let subscription = bus
            .subscribe("t", recording(&log, "only"), SubscribeOptions::default())
            .unwrap();

        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert!(!bus.unsubscribe(subscription.id()));

        let result = bus
            .publish("t", json!(null), PublishOptions::wait())
            .await
            .unwrap();
        assert_eq!(result.delivered_to_count, 0);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_by_handler() {
        let bus = EventBus::new();
        let log = call_log();
        let shared = recording(&log, "shared");
        let other = recording(&log, "other");

        bus.subscribe("t", shared.clone(), SubscribeOptions::default())
            .unwrap();
        bus.subscribe("t", shared.clone(), SubscribeOptions::default().with_priority(3))
            .unwrap();
        bus.subscribe("t", other, SubscribeOptions::default())
            .unwrap();
        bus.subscribe("u", shared.clone(), SubscribeOptions::default())
            .unwrap();

        assert!(bus.unsubscribe_handler("t", &shared));
        assert!(!bus.unsubscribe_handler("t", &shared));
        assert!(!bus.unsubscribe_handler("missing", &shared));

        assert_eq!(bus.subscriber_count("t"), 1);
        assert_eq!(bus.subscriber_count("u"), 1);
    }

    #[tokio::test]
    async fn test_clear_all_subscriptions() {
        let bus = EventBus::new();
        let noop = sync_handler(|_| Ok(()));
        let exact = bus
            .subscribe("a", noop.clone(), SubscribeOptions::default())
            .unwrap();
        bus.subscribe_pattern("*", noop, SubscribeOptions::default())
            .unwrap();

        bus.clear_all_subscriptions();

        assert_eq!(bus.subscription_count(), 0);
        assert!(bus.active_topics().is_empty());
        assert!(!exact.is_active());
    }

    // =============================================================================
    // SWEEP AND LIFECYCLE
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_evicts_without_traffic() {
        let bus = EventBus::new();
        bus.start().unwrap();
        bus.subscribe(
            "idle",
            sync_handler(|_| Ok(())),
            SubscribeOptions::default().expires_in(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(bus.subscription_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.stats().subscriptions_expired, 1);
        bus.destroy();
    }

    #[tokio::test]
    async fn test_destroy_then_restart() {
        let bus = EventBus::new();
        bus.start().unwrap();
        bus.start().unwrap();
        assert!(bus.is_running());

        bus.subscribe("t", sync_handler(|_| Ok(())), SubscribeOptions::default())
            .unwrap();
        bus.destroy();
        assert!(!bus.is_running());
        assert_eq!(bus.subscription_count(), 0);

        bus.start().unwrap();
        assert!(bus.is_running());
        bus.subscribe("t", sync_handler(|_| Ok(())), SubscribeOptions::default())
            .unwrap();
        assert!(bus.has_listeners("t"));
        bus.destroy();
    }

    #[test]
    fn test_start_outside_runtime() {
        let bus = EventBus::new();
        assert!(matches!(bus.start(), Err(BusError::NotRunning)));
    }
}
