//! # Bus Properties
//!
//! Ordering, overflow, matching and drain guarantees checked through the
//! public API only.
//!
//! ## Properties Tested:
//!
//! 1. **Priority ordering**: dequeue order is non-increasing by priority and
//!    FIFO within a priority, for arbitrary enqueue sequences
//! 2. **Overflow policies**: lowest-priority eviction and `REJECT` leave the
//!    queue in the documented state
//! 3. **Resolution**: deduplication keeps the direct-listener position
//! 4. **Single-flight**: overlapping emissions share one drain loop

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use tokio::time::timeout;

    use event_bus::{
        glob_match, BusError, Dispatcher, DispatcherConfig, EnqueueOutcome, EventFilter,
        EventListener, FnListener, OverflowStrategy, PriorityQueue, QueueConfig,
    };
    use trading_types::{Event, EventId, EventPriority};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

    fn bus(max_size: usize, strategy: OverflowStrategy) -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            queue: QueueConfig::new(max_size, strategy),
            ..DispatcherConfig::default()
        })
        .expect("valid config")
    }

    fn counting(name: &str, calls: &Arc<AtomicUsize>) -> Arc<dyn EventListener> {
        let calls = calls.clone();
        Arc::new(
            FnListener::from_sync(name, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("valid name"),
        )
    }

    async fn drain(bus: &Dispatcher) {
        timeout(DRAIN_TIMEOUT, bus.drain_queue())
            .await
            .expect("drain should finish");
    }

    fn priorities(queue: &PriorityQueue) -> Vec<EventPriority> {
        queue.snapshot().iter().map(|e| e.priority).collect()
    }

    // =============================================================================
    // PRIORITY ORDERING
    // =============================================================================

    /// Random enqueue sequences always come out highest-first, FIFO within a tier
    #[test]
    fn test_dequeue_order_for_random_sequences() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..50 {
            let count = rng.gen_range(1..=64);
            let mut queue =
                PriorityQueue::new(QueueConfig::new(64, OverflowStrategy::DropIncoming));
            for seq in 0..count {
                let priority = EventPriority::ALL[rng.gen_range(0..EventPriority::ALL.len())];
                let event = Event::new("tick")
                    .with_priority(priority)
                    .with_payload(json!({ "seq": seq }));
                assert!(queue.enqueue(event).unwrap().is_accepted());
            }

            let mut drained = Vec::new();
            while let Some(queued) = queue.dequeue() {
                drained.push(queued.event);
            }
            assert_eq!(drained.len(), count);

            for pair in drained.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                assert!(a.priority >= b.priority, "priority must not increase");
                if a.priority == b.priority {
                    assert!(a.payload["seq"].as_u64() < b.payload["seq"].as_u64());
                }
            }
        }
    }

    // =============================================================================
    // OVERFLOW POLICIES
    // =============================================================================

    #[test]
    fn test_drop_lowest_priority_scenario() {
        use EventPriority::{High, Low};
        let mut queue =
            PriorityQueue::new(QueueConfig::new(2, OverflowStrategy::DropLowestPriority));

        queue.enqueue(Event::new("a").with_priority(Low)).unwrap();
        queue.enqueue(Event::new("b").with_priority(Low)).unwrap();
        assert_eq!(priorities(&queue), vec![Low, Low]);

        let outcome = queue.enqueue(Event::new("c").with_priority(High)).unwrap();
        match outcome {
            EnqueueOutcome::Evicted(evicted) => assert_eq!(evicted.event.priority, Low),
            other => panic!("expected eviction, got {other:?}"),
        }
        assert_eq!(priorities(&queue), vec![High, Low]);

        let outcome = queue.enqueue(Event::new("d").with_priority(Low)).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Rejected(_)));
        assert_eq!(priorities(&queue), vec![High, Low]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_reject_overflow_leaves_queue_unchanged() {
        let mut queue = PriorityQueue::new(QueueConfig::new(3, OverflowStrategy::Reject));
        for priority in [EventPriority::Low, EventPriority::Critical, EventPriority::Normal] {
            queue.enqueue(Event::new("x").with_priority(priority)).unwrap();
        }
        let before: Vec<EventId> = queue.snapshot().iter().map(|e| e.id).collect();

        for _ in 0..3 {
            let err = queue
                .enqueue(Event::new("y").with_priority(EventPriority::Critical))
                .unwrap_err();
            assert_eq!(err, BusError::QueueOverflow { capacity: 3 });
        }

        let after: Vec<EventId> = queue.snapshot().iter().map(|e| e.id).collect();
        assert_eq!(before, after);
    }

    // =============================================================================
    // RESOLUTION & MATCHING
    // =============================================================================

    #[test]
    fn test_dedup_keeps_direct_position() {
        let bus = bus(16, OverflowStrategy::DropIncoming);
        let calls = Arc::new(AtomicUsize::new(0));
        let direct = counting("direct", &calls);
        let routed = counting("routed", &calls);

        let route = bus.create_route(EventFilter::pattern("trade.*"), 100);
        bus.add_listener_to_route(route, routed);
        bus.add_listener_to_route(route, direct.clone());
        bus.subscribe("trade.update", direct);

        let names: Vec<String> = bus
            .resolve_listeners(&Event::new("trade.update"))
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        assert_eq!(names, vec!["direct", "routed"]);
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(glob_match("trade.*", "trade.update"));
        assert!(glob_match("trade.*", "trade.execute"));
        assert!(!glob_match("trade.*", "order.update"));
        assert!(!glob_match("trade.*", "trade"));
        assert!(glob_match("*", "anything.at.all"));
        assert!(!glob_match("*", ""));

        let filter = EventFilter::pattern("trade.*");
        assert!(filter.matches(&Event::new("TRADE.Update")));
        assert!(!filter.matches(&Event::new("order.update")));
    }

    #[tokio::test]
    async fn test_deactivated_listener_never_invoked() {
        let bus = bus(16, OverflowStrategy::DropIncoming);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener = FnListener::from_sync("muted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap()
        .into_arc();
        listener.state().deactivate();

        bus.subscribe("trade.update", listener.clone());
        bus.subscribe_to_pattern("trade.*", listener.clone());

        bus.emit_event(Event::new("trade.update")).await.unwrap();
        bus.emit_sync(Event::new("trade.update"));
        drain(&bus).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // =============================================================================
    // EMISSION
    // =============================================================================

    #[tokio::test]
    async fn test_emit_sync_without_listeners() {
        let bus = bus(16, OverflowStrategy::DropIncoming);

        assert!(!bus.emit_sync(Event::new("nobody.home")));
        assert_eq!(bus.queue_len(), 0);
        assert_eq!(bus.metrics().total_enqueued, 0);
    }

    #[tokio::test]
    async fn test_emit_event_without_listeners_still_enqueued() {
        let bus = bus(16, OverflowStrategy::DropIncoming);

        let has_listeners = bus.emit_event(Event::new("nobody.home")).await.unwrap();
        assert!(!has_listeners);
        assert_eq!(bus.metrics().total_enqueued, 1);

        drain(&bus).await;
        assert_eq!(bus.metrics().total_processed, 1);
    }

    #[tokio::test]
    async fn test_market_pattern_subscription() {
        let bus = bus(16, OverflowStrategy::DropIncoming);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe_to_pattern(
            "market.*",
            Arc::new(
                FnListener::from_sync("L", move |event| {
                    sink.lock().push(event.id);
                    Ok(())
                })
                .unwrap(),
            ),
        );

        let price = Event::new("market.price").with_priority(EventPriority::Normal);
        let price_id = price.id;
        assert!(bus.emit_event(price).await.unwrap());
        assert!(!bus.emit_event(Event::new("order.created")).await.unwrap());
        drain(&bus).await;

        assert_eq!(*seen.lock(), vec![price_id]);
    }

    // =============================================================================
    // SINGLE-FLIGHT DRAIN
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_emits_share_one_drain() {
        let bus = bus(16, OverflowStrategy::DropIncoming);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let (current, max, done) = (in_flight.clone(), max_in_flight.clone(), processed.clone());
        bus.subscribe(
            "order.submit",
            Arc::new(
                FnListener::new("venue", move |_| {
                    let (current, max, done) = (current.clone(), max.clone(), done.clone());
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        max.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap(),
            ),
        );

        let (a, b) = tokio::join!(
            bus.emit_event(Event::new("order.submit")),
            bus.emit_event(Event::new("order.submit")),
        );
        a.unwrap();
        b.unwrap();
        drain(&bus).await;

        assert_eq!(processed.load(Ordering::SeqCst), 2);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(!bus.is_draining());
    }
}
