//! # Failure Handling
//!
//! Error containment, rejection of awaited publishes, timeouts and the
//! `system.error` channel for background failures.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{call_log, failing, recording};
    use anyhow::Context;
    use async_trait::async_trait;
    use event_bus::{
        handler_fn, sync_handler, BusError, Event, EventBus, EventHandler, HandlerError,
        PublishOptions, SubscribeOptions, SystemErrorPayload, SYSTEM_ERROR_TOPIC,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Handler backed by application code that reports `anyhow` errors.
    struct LedgerWriter {
        balances: Mutex<Vec<u64>>,
    }

    impl LedgerWriter {
        fn apply(&self, event: &Event) -> anyhow::Result<()> {
            let amount = event.data["amount"]
                .as_u64()
                .context("ledger entry without an amount")?;
            self.balances.lock().push(amount);
            Ok(())
        }
    }

    #[async_trait]
    impl EventHandler for LedgerWriter {
        async fn handle(&self, event: Event) -> Result<(), HandlerError> {
            self.apply(&event)
                .map_err(|err| HandlerError::new(format!("{err:#}")))
        }
    }

    // =============================================================================
    // CONTAINMENT
    // =============================================================================

    #[tokio::test]
    async fn test_isolated_failure_does_not_stop_others() {
        let bus = EventBus::new();
        let log = call_log();

        bus.subscribe("t", recording(&log, "first"), SubscribeOptions::default().with_priority(3))
            .unwrap();
        bus.subscribe("t", failing("boom"), SubscribeOptions::default().with_priority(2).isolated())
            .unwrap();
        bus.subscribe("t", recording(&log, "last"), SubscribeOptions::default().with_priority(1))
            .unwrap();

        let result = bus
            .publish("t", json!(null), PublishOptions::wait())
            .await
            .unwrap();

        assert_eq!(result.delivered_to_count, 3);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].is_handler_error());
        assert_eq!(*log.lock(), vec!["first", "last"]);

        let stats = bus.stats();
        assert_eq!(stats.contained_errors, 1);
        assert_eq!(stats.propagated_errors, 0);
    }

    #[tokio::test]
    async fn test_propagated_failure_rejects_after_all_handlers_ran() {
        let bus = EventBus::new();
        let log = call_log();

        bus.subscribe("t", failing("first failure"), SubscribeOptions::default().with_priority(5))
            .unwrap();
        bus.subscribe("t", failing("second failure"), SubscribeOptions::default().with_priority(4))
            .unwrap();
        bus.subscribe("t", recording(&log, "survivor"), SubscribeOptions::default())
            .unwrap();

        let err = bus
            .publish("t", json!(null), PublishOptions::wait())
            .await
            .unwrap_err();

        let BusError::Rejected { cause, result, .. } = err else {
            panic!("expected rejection, got {err}");
        };
        assert!(cause.to_string().contains("first failure"));
        assert_eq!(result.delivered_to_count, 3);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(*log.lock(), vec!["survivor"]);
    }

    #[tokio::test]
    async fn test_ignore_errors_resolves_with_errors() {
        let bus = EventBus::new();
        bus.subscribe("t", failing("nope"), SubscribeOptions::default())
            .unwrap();
        bus.subscribe(
            "t",
            sync_handler(|_| panic!("handler exploded")),
            SubscribeOptions::default(),
        )
        .unwrap();

        let result = bus
            .publish("t", json!(null), PublishOptions::wait().ignore_errors())
            .await
            .unwrap();

        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[1].to_string().contains("handler exploded"));
        assert_eq!(bus.stats().deliveries, 2);
    }

    #[tokio::test]
    async fn test_trait_handler_reports_context() {
        let bus = EventBus::new();
        let ledger = Arc::new(LedgerWriter {
            balances: Mutex::new(Vec::new()),
        });
        bus.subscribe("ledger.entry", ledger.clone(), SubscribeOptions::default())
            .unwrap();

        bus.publish("ledger.entry", json!({ "amount": 40 }), PublishOptions::wait())
            .await
            .unwrap();
        let err = bus
            .publish("ledger.entry", json!({ "memo": "lunch" }), PublishOptions::wait())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("ledger entry without an amount"));
        assert_eq!(*ledger.balances.lock(), vec![40]);
    }

    // =============================================================================
    // TIMEOUTS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_but_handler_finishes() {
        let bus = EventBus::new();
        let log = call_log();
        let done = log.clone();

        bus.subscribe(
            "slow",
            handler_fn(move |_| {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    done.lock().push("finished".to_string());
                    Ok(())
                }
            }),
            SubscribeOptions::default(),
        )
        .unwrap();

        let err = bus
            .publish(
                "slow",
                json!(null),
                PublishOptions::wait().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        let BusError::Rejected { cause, .. } = err else {
            panic!("expected rejection, got {err}");
        };
        assert!(cause.is_timeout());
        assert!(log.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*log.lock(), vec!["finished"]);
        assert_eq!(bus.stats().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_ignore_errors_resolves() {
        let bus = EventBus::new();
        bus.subscribe(
            "slow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            }),
            SubscribeOptions::default(),
        )
        .unwrap();

        let result = bus
            .publish(
                "slow",
                json!(null),
                PublishOptions::wait()
                    .with_timeout(Duration::from_millis(10))
                    .ignore_errors(),
            )
            .await
            .unwrap();

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].is_timeout());
    }

    // =============================================================================
    // SYSTEM ERROR CHANNEL
    // =============================================================================

    #[tokio::test]
    async fn test_background_failure_reaches_monitor() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        bus.subscribe(
            SYSTEM_ERROR_TOPIC,
            sync_handler(move |event| {
                let payload: SystemErrorPayload = serde_json::from_value(event.data.clone())?;
                let _ = tx.send(payload);
                Ok(())
            }),
            SubscribeOptions::default(),
        )
        .unwrap();
        bus.subscribe("orders", failing("db down"), SubscribeOptions::default())
            .unwrap();

        let result = bus
            .publish("orders", json!({ "id": 1 }), PublishOptions::default())
            .await
            .unwrap();
        assert!(result.errors.is_empty());

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.source, "event-bus");
        assert_eq!(payload.operation, "publish");
        assert_eq!(payload.topic, "orders");
        assert!(payload.error.contains("db down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_timeout_reaches_monitor() {
        let bus = EventBus::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let finished = call_log();
        let done = finished.clone();

        bus.subscribe(
            SYSTEM_ERROR_TOPIC,
            sync_handler(move |event| {
                let payload: SystemErrorPayload = serde_json::from_value(event.data.clone())?;
                let _ = tx.send(payload);
                Ok(())
            }),
            SubscribeOptions::default(),
        )
        .unwrap();
        bus.subscribe(
            "reports.render",
            handler_fn(move |_| {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    done.lock().push("rendered".to_string());
                    Ok(())
                }
            }),
            SubscribeOptions::default(),
        )
        .unwrap();

        let result = bus
            .publish(
                "reports.render",
                json!(null),
                PublishOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert!(result.errors.is_empty());

        tokio::time::sleep(Duration::from_secs(20)).await;

        let payload = rx.try_recv().unwrap();
        assert_eq!(payload.topic, "reports.render");
        assert!(payload.error.contains("timed out after 100ms"));
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.stats().timeouts, 1);
        // The slow handler still ran to completion
        assert_eq!(*finished.lock(), vec!["rendered"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_timeout_with_ignore_errors_is_not_reported() {
        let bus = EventBus::new();
        let reports = call_log();

        bus.subscribe(SYSTEM_ERROR_TOPIC, recording(&reports, "report"), SubscribeOptions::default())
            .unwrap();
        bus.subscribe(
            "slow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            }),
            SubscribeOptions::default(),
        )
        .unwrap();

        bus.publish(
            "slow",
            json!(null),
            PublishOptions::default()
                .with_timeout(Duration::from_millis(10))
                .ignore_errors(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(bus.stats().timeouts, 1);
        assert!(reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_contained_background_failure_is_not_reported() {
        let bus = EventBus::new();
        let reports = call_log();

        bus.subscribe(SYSTEM_ERROR_TOPIC, recording(&reports, "report"), SubscribeOptions::default())
            .unwrap();
        bus.subscribe("orders", failing("ignored"), SubscribeOptions::default().isolated())
            .unwrap();
        let log = call_log();
        bus.subscribe("orders", recording(&log, "after"), SubscribeOptions::default().with_priority(-1))
            .unwrap();

        bus.publish("orders", json!(null), PublishOptions::default())
            .await
            .unwrap();

        // Wait for the background pass to settle
        while bus.stats().deliveries < 2 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;

        assert_eq!(*log.lock(), vec!["after"]);
        assert!(reports.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failing_monitor_does_not_loop() {
        let bus = EventBus::new();
        bus.subscribe(SYSTEM_ERROR_TOPIC, failing("monitor broken"), SubscribeOptions::default())
            .unwrap();
        bus.subscribe("orders", failing("db down"), SubscribeOptions::default())
            .unwrap();

        bus.publish("orders", json!(null), PublishOptions::default())
            .await
            .unwrap();

        while bus.stats().handler_errors < 2 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let stats = bus.stats();
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.handler_errors, 2);
        assert_eq!(stats.contained_errors, 1);
    }

    #[tokio::test]
    async fn test_empty_topic_is_rejected_synchronously() {
        let bus = EventBus::new();
        let err = bus
            .publish("", json!(null), PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidArgument(_)));
        assert_eq!(bus.stats().events_published, 0);

        let err = bus
            .subscribe("", sync_handler(|_| Ok(())), SubscribeOptions::default())
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidArgument(_)));
    }
}
