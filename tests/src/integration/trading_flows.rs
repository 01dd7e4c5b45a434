//! # Trading Flow Scenarios
//!
//! Pipelines shaped like a live trading process:
//!
//! ```text
//! [Exchange connector] ──market.tick──→ [Event Bus] ──→ [Strategy]
//!                                           ↑               │
//!                                           └─order.submit──┘
//!                                           │
//!                     ┌─────────────────────┼──────────────────────┐
//!                     ↓                     ↓                      ↓
//!             [Risk route (High+)]   [Audit ("*")]         [Telemetry recorder]
//! ```
//!
//! ## Test Categories
//!
//! 1. **Happy Path**: tick → order → risk, with audit seeing everything
//! 2. **Emergency Path**: synchronous halt bypassing the queue
//! 3. **Overload**: evictions visible on the diagnostics stream
//! 4. **Failure Handling**: error hooks and retry exhaustion

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    use bus_telemetry::{gather_metrics, record_queue_metrics, register_metrics};
    use event_bus::{
        Diagnostic, Dispatcher, DispatcherConfig, DropReason, EventFilter, FnListener,
        ListenerError, OverflowStrategy, ProcessingMode, QueueConfig, SourceAwareListener,
    };
    use trading_types::{Event, EventPriority};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

    async fn drain(bus: &Dispatcher) {
        timeout(DRAIN_TIMEOUT, bus.drain_queue())
            .await
            .expect("drain should finish");
    }

    fn tick(symbol: &str, price: f64) -> Event {
        Event::new("market.tick")
            .with_source("binance")
            .with_payload(json!({ "symbol": symbol, "price": price }))
    }

    // =============================================================================
    // HAPPY PATH
    // =============================================================================

    #[tokio::test]
    async fn test_tick_to_order_pipeline() {
        let bus = Dispatcher::with_defaults();
        let risk_seen = Arc::new(Mutex::new(Vec::new()));
        let audit_seen = Arc::new(Mutex::new(Vec::new()));

        // Strategy: buys whenever price dips below 100
        let strategy_bus = bus.clone();
        bus.subscribe(
            "market.tick",
            Arc::new(
                FnListener::new("dip-buyer", move |event| {
                    let bus = strategy_bus.clone();
                    async move {
                        let price = event.payload["price"].as_f64().unwrap_or_default();
                        if price < 100.0 {
                            let order = Event::new("order.submit")
                                .with_priority(EventPriority::High)
                                .with_source("dip-buyer")
                                .with_payload(json!({
                                    "symbol": event.payload["symbol"],
                                    "side": "buy",
                                    "limit": price,
                                }));
                            bus.emit_event(order).await?;
                        }
                        Ok(())
                    }
                })
                .unwrap(),
            ),
        );

        // Risk: only high-priority order traffic
        let sink = risk_seen.clone();
        let risk_route = bus.create_route(
            EventFilter::pattern("order.*").with_min_priority(EventPriority::High),
            10,
        );
        bus.add_listener_to_route(
            risk_route,
            Arc::new(
                FnListener::from_sync("risk", move |event| {
                    sink.lock().push(event.payload["limit"].as_f64());
                    Ok(())
                })
                .unwrap(),
            ),
        );

        // Audit: everything, tagged by source
        let sink = audit_seen.clone();
        bus.subscribe_to_pattern(
            "*",
            Arc::new(
                SourceAwareListener::new("audit", move |event, source| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().push(format!("{source}:{}", event.event_type));
                        Ok(())
                    }
                })
                .unwrap(),
            ),
        );

        bus.emit_event(tick("BTCUSDT", 101.5)).await.unwrap();
        bus.emit_event(tick("BTCUSDT", 99.0)).await.unwrap();
        drain(&bus).await;

        assert_eq!(*risk_seen.lock(), vec![Some(99.0)]);
        assert_eq!(
            *audit_seen.lock(),
            vec![
                "binance:market.tick",
                "binance:market.tick",
                "dip-buyer:order.submit",
            ]
        );
        assert_eq!(bus.metrics().total_processed, 3);
    }

    #[tokio::test]
    async fn test_batched_candles_with_payloads() {
        let bus = Dispatcher::new(DispatcherConfig {
            processing_mode: ProcessingMode::Batched,
            batch_size: 10,
            ..DispatcherConfig::default()
        })
        .unwrap();
        let volume = Arc::new(Mutex::new(0u64));
        let sink = volume.clone();
        bus.subscribe(
            "market.candle",
            Arc::new(
                FnListener::from_sync("volume", move |event| {
                    *sink.lock() += event.payload["volume"].as_u64().unwrap_or_default();
                    Ok(())
                })
                .unwrap(),
            ),
        );

        let candles: Vec<Event> = (1..=25u64)
            .map(|i| Event::new("market.candle").with_payload(json!({ "volume": i })))
            .collect();
        let receipt = bus.emit_batch(candles).await.unwrap();
        assert_eq!(receipt.accepted, 25);
        drain(&bus).await;

        assert_eq!(*volume.lock(), (1..=25u64).sum::<u64>());
    }

    // =============================================================================
    // EMERGENCY PATH
    // =============================================================================

    #[tokio::test]
    async fn test_risk_halt_bypasses_backlog() {
        let bus = Dispatcher::new(DispatcherConfig {
            queue: QueueConfig::new(100, OverflowStrategy::DropIncoming),
            ..DispatcherConfig::default()
        })
        .unwrap();
        let halted = Arc::new(AtomicBool::new(false));
        let flag = halted.clone();
        bus.subscribe(
            "risk.halt",
            Arc::new(
                FnListener::from_sync("kill-switch", move |_| {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap(),
            ),
        );

        for i in 0..50 {
            bus.emit_event(tick("ETHUSDT", f64::from(i))).await.unwrap();
        }
        assert!(bus.emit_sync(Event::new("risk.halt").with_priority(EventPriority::Critical)));

        assert!(halted.load(Ordering::SeqCst));
        assert_eq!(bus.queue_len(), 50);
        drain(&bus).await;
    }

    // =============================================================================
    // OVERLOAD
    // =============================================================================

    #[tokio::test]
    async fn test_evictions_on_diagnostic_stream() {
        let bus = Dispatcher::new(DispatcherConfig {
            queue: QueueConfig::new(2, OverflowStrategy::DropOldest),
            ..DispatcherConfig::default()
        })
        .unwrap();
        let mut stream = bus.diagnostic_stream();

        let first = tick("SOLUSDT", 1.0);
        let first_id = first.id;
        bus.emit_event(first).await.unwrap();
        bus.emit_event(tick("SOLUSDT", 2.0)).await.unwrap();
        bus.emit_event(tick("SOLUSDT", 3.0)).await.unwrap();

        let evicted = timeout(Duration::from_millis(500), async {
            while let Some(Ok(diagnostic)) = stream.next().await {
                if let Diagnostic::EventDropped {
                    event_id, reason, ..
                } = diagnostic
                {
                    return Some((event_id, reason));
                }
            }
            None
        })
        .await
        .expect("timeout waiting for drop diagnostic");

        assert_eq!(evicted, Some((first_id, DropReason::Evicted)));
        assert_eq!(bus.metrics().total_dropped, 1);
        drain(&bus).await;
    }

    #[tokio::test]
    async fn test_metrics_exported_to_prometheus() {
        register_metrics().unwrap();
        let bus = Dispatcher::with_defaults();
        bus.subscribe(
            "market.tick",
            Arc::new(FnListener::from_sync("noop", |_| Ok(())).unwrap()),
        );
        for i in 0..5 {
            bus.emit_event(tick("BTCUSDT", f64::from(i))).await.unwrap();
        }
        drain(&bus).await;

        record_queue_metrics(&bus.metrics());
        let text = gather_metrics().unwrap();
        assert!(text.contains("event_bus_events_processed_total"));
        assert!(text.contains("event_bus_queue_capacity 10000"));
    }

    // =============================================================================
    // FAILURE HANDLING
    // =============================================================================

    #[tokio::test]
    async fn test_error_hook_replaces_default_report() {
        let bus = Dispatcher::with_defaults();
        let mut diagnostics = bus.diagnostics();
        let reported = Arc::new(Mutex::new(Vec::<ListenerError>::new()));
        let sink = reported.clone();
        bus.subscribe(
            "order.submit",
            Arc::new(
                FnListener::new("venue-gateway", |_| async {
                    anyhow::bail!("venue rejected order")
                })
                .unwrap()
                .with_error_hook(move |_, err| sink.lock().push(err.clone())),
            ),
        );

        bus.emit_event(Event::new("order.submit")).await.unwrap();
        drain(&bus).await;

        let reported = reported.lock();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].listener(), "venue-gateway");
        assert!(reported[0].to_string().contains("venue rejected order"));

        while let Ok(diagnostic) = diagnostics.try_recv() {
            assert!(!matches!(diagnostic, Diagnostic::ListenerFailed { .. }));
        }
    }

    #[tokio::test]
    async fn test_retries_stop_at_budget() {
        let bus = Dispatcher::new(DispatcherConfig {
            max_retries: 2,
            ..DispatcherConfig::default()
        })
        .unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        bus.subscribe(
            "order.cancel",
            Arc::new(
                FnListener::from_sync("cancel", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("order not found")
                })
                .unwrap(),
            ),
        );

        bus.emit_event(Event::new("order.cancel")).await.unwrap();
        drain(&bus).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(bus.metrics().total_failed, 3);
        assert_eq!(bus.queue_len(), 0);
    }
}
