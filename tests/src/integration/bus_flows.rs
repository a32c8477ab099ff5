//! # Message Bus Flows
//!
//! Publish/subscribe behaviour observed from outside the bus: channel
//! idempotence, per-channel FIFO, TTL expiry, the queue bound, handler
//! isolation and the event history export round-trip.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use shared_bus::{
        parse_json_export, BusConfig, BusError, BusMessage, EventOptions, EventQuery,
        ExportFormat, ExportOptions, HandlerError, MessageBus, MessageHandler, PublishOptions,
        SubscribeOptions,
    };
    use shared_types::{EventSource, Priority};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Records every delivered payload in arrival order.
    fn recorder() -> (
        Arc<Mutex<Vec<serde_json::Value>>>,
        impl Fn(&BusMessage) -> Result<(), HandlerError>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |message: &BusMessage| {
            sink.lock().push(message.data.clone());
            Ok(())
        })
    }

    /// Blocks until the semaphore hands out a permit, then returns it.
    struct Gate(Arc<Semaphore>);

    #[async_trait]
    impl MessageHandler for Gate {
        async fn handle(&self, _: &BusMessage) -> Result<(), HandlerError> {
            let _permit = self
                .0
                .acquire()
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            Ok(())
        }
    }

    fn single_worker_bus(max_queue_size: usize) -> MessageBus {
        MessageBus::new(BusConfig {
            max_queue_size,
            dispatch_workers: 1,
            ..BusConfig::default()
        })
    }

    // =============================================================================
    // CHANNELS AND ORDERING
    // =============================================================================

    #[tokio::test]
    async fn test_create_channel_is_idempotent() {
        let bus = MessageBus::new(BusConfig::default());
        let (_, handler) = recorder();
        let first = bus.create_channel("Ops", Some("Operations".into()));
        bus.subscribe_fn("Ops", "*", "Monitor", handler);
        bus.publish("Ops", "Tick", json!(1), PublishOptions::default())
            .unwrap();
        bus.flush().await;

        let again = bus.create_channel("Ops", Some("Replaced?".into()));
        assert_eq!(again.created_at, first.created_at);
        assert_eq!(again.description.as_deref(), Some("Operations"));
        assert_eq!(again.statistics.total_messages, 1);
        assert_eq!(again.statistics.delivered_messages, 1);
        assert_eq!(bus.list_channels().len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_within_channel() {
        let bus = MessageBus::new(BusConfig {
            dispatch_workers: 1,
            ..BusConfig::default()
        });
        let (seen, handler) = recorder();
        bus.subscribe_fn("Jobs", "Job.*", "Runner", handler);

        for i in 0..50 {
            // Priority is advisory; it must not reorder the queue.
            let priority = if i % 7 == 0 { Priority::High } else { Priority::Normal };
            bus.publish(
                "Jobs",
                "Job.Queued",
                json!(i),
                PublishOptions::from_module("Scheduler").priority(priority),
            )
            .unwrap();
        }
        bus.flush().await;

        let expected: Vec<_> = (0..50).map(|i| json!(i)).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[tokio::test]
    async fn test_expired_messages_are_never_delivered() {
        let bus = MessageBus::new(BusConfig::default());
        let (seen, handler) = recorder();
        bus.subscribe_fn("Lab", "*", "LabRunner", handler);

        bus.publish("Lab", "Stale", json!("stale"), PublishOptions::default().ttl(Duration::ZERO))
            .unwrap();
        bus.publish("Lab", "Fresh", json!("fresh"), PublishOptions::default())
            .unwrap();
        bus.flush().await;

        assert_eq!(*seen.lock(), vec![json!("fresh")]);
        assert_eq!(bus.metrics().expired_messages, 1);
    }

    #[tokio::test]
    async fn test_queue_bound() {
        let bus = single_worker_bus(3);
        let gate = Arc::new(Semaphore::new(0));
        let held = bus.subscribe("Hold", "*", Gate(Arc::clone(&gate)), "M", SubscribeOptions::default());

        // Nothing is dequeued until this test yields.
        for n in 0..3 {
            bus.publish("Hold", "Queued", json!(n), PublishOptions::default())
                .unwrap();
        }
        assert_eq!(bus.queue_len(), 3);
        assert_eq!(
            bus.publish("Hold", "Overflow", json!(99), PublishOptions::default()),
            Err(BusError::QueueFull { capacity: 3 })
        );

        // A blocked handler holds up its own deliveries, not the queue.
        while bus.queue_len() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.metrics().messages_processed, 3);
        assert!(bus
            .publish("Hold", "After", json!(3), PublishOptions::default())
            .is_ok());

        gate.add_permits(1);
        bus.flush().await;
        assert_eq!(bus.subscription(&held).unwrap().message_count, 4);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_hold_back_siblings() {
        let bus = MessageBus::new(BusConfig::default());
        let gate = Arc::new(Semaphore::new(0));
        bus.subscribe("Backup", "*", Gate(Arc::clone(&gate)), "BackupManager", SubscribeOptions::default());
        let (seen, handler) = recorder();
        bus.subscribe_fn("Backup", "*", "SystemMonitoring", handler);

        for n in 0..5 {
            bus.publish("Backup", "Progress", json!(n), PublishOptions::default())
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().len() < 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let expected: Vec<_> = (0..5).map(|n| json!(n)).collect();
        assert_eq!(*seen.lock(), expected);

        gate.add_permits(1);
        bus.flush().await;
    }

    #[tokio::test]
    async fn test_faulty_handler_does_not_block_other_subscribers() {
        let bus = MessageBus::new(BusConfig::default());
        let faulty = bus.subscribe_fn("Backup", "*", "BackupManager", |_| {
            Err(HandlerError::from("disk unavailable"))
        });
        let (seen, handler) = recorder();
        let healthy = bus.subscribe_fn("Backup", "*", "SystemMonitoring", handler);

        bus.publish("Backup", "Started", json!({"job": 1}), PublishOptions::default())
            .unwrap();
        bus.flush().await;

        assert_eq!(*seen.lock(), vec![json!({"job": 1})]);
        let faulty = bus.subscription(&faulty).unwrap();
        assert_eq!(faulty.errors.len(), 1);
        assert_eq!(faulty.errors[0].error, "disk unavailable");
        assert_eq!(bus.subscription(&healthy).unwrap().message_count, 1);
    }

    // =============================================================================
    // CONCRETE SCENARIO
    // =============================================================================

    #[tokio::test]
    async fn test_config_changed_delivered_once() {
        let bus = MessageBus::new(BusConfig::default());
        let (seen, handler) = recorder();
        bus.subscribe_fn("Config", "Changed", "LabRunner", handler);

        bus.publish(
            "Config",
            "Changed",
            json!({"module": "X"}),
            PublishOptions::default()
                .priority(Priority::Normal)
                .ttl(Duration::from_secs(300)),
        )
        .unwrap();
        bus.flush().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["module"], json!("X"));
    }

    // =============================================================================
    // EVENTS AND EXPORT
    // =============================================================================

    #[tokio::test]
    async fn test_events_reach_wildcard_subscribers() {
        let bus = MessageBus::new(BusConfig::default());
        let (seen, handler) = recorder();
        bus.subscribe_fn("Modules", "Event:Module*", "SetupWizard", handler);

        let source = EventSource {
            module: "ModuleLoader".into(),
            ..EventSource::default()
        };
        bus.publish_event(
            "ModuleLoaded",
            json!({"name": "LabRunner"}),
            EventOptions::on_channel("Modules").source(source.clone()),
        )
        .unwrap();
        bus.publish_event(
            "PatchApplied",
            json!({}),
            EventOptions::on_channel("Modules").source(source),
        )
        .unwrap();
        bus.flush().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["name"], json!("ModuleLoaded"));
        assert_eq!(
            bus.events(&EventQuery {
                source_module: Some("ModuleLoader".into()),
                ..EventQuery::default()
            })
            .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_json_export_round_trip() {
        let bus = MessageBus::new(BusConfig::default());
        for (name, n) in [("LabStarted", 1), ("LabStopped", 2), ("BackupDone", 3)] {
            bus.publish_event(name, json!({"n": n}), EventOptions::default())
                .unwrap();
        }
        let history = bus.events(&EventQuery::default());

        let exported = bus
            .export_history(&EventQuery::default(), &ExportOptions::new(ExportFormat::Json))
            .unwrap();
        let parsed = parse_json_export(&exported).unwrap();

        assert_eq!(parsed.len(), history.len());
        for (event, row) in history.iter().zip(&parsed) {
            assert_eq!(row.id, event.id);
            assert_eq!(row.name, event.name);
            assert_eq!(row.timestamp, event.timestamp);
            assert!(row.data.is_none());
        }

        let with_data = bus
            .export_history(
                &EventQuery::named("Lab*"),
                &ExportOptions::new(ExportFormat::Json).with_data(),
            )
            .unwrap();
        let parsed = parse_json_export(&with_data).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].data, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_export_to_file() {
        let bus = MessageBus::new(BusConfig::default());
        bus.publish_event("A", json!({}), EventOptions::default())
            .unwrap();
        bus.publish_event("B", json!({}), EventOptions::default())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let written = bus
            .export_history_to_file(&path, &EventQuery::default(), &ExportOptions::new(ExportFormat::Csv))
            .unwrap();
        assert_eq!(written, 2);

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("Id,Name,Channel"));
        assert_eq!(body.lines().count(), 3);
    }
}
