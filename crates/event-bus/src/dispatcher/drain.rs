//! # Drain Engine
//!
//! Empties the queue by fanning events out to their listeners.
//!
//! ## Single-flight
//!
//! At most one drain runs per dispatcher. The `draining` flag is taken with a
//! compare-exchange before a drain starts and released when the queue is seen
//! empty. After releasing, the drain re-checks the queue and re-acquires the
//! flag if an emitter slipped an event in between, so no enqueued event is
//! left without a drain.
//!
//! ## Isolation
//!
//! Every listener invocation runs under `catch_unwind`; an `Err` or a panic
//! is routed to the listener's own error hook, or logged and published as a
//! `ListenerFailed` diagnostic. Nothing is re-raised to the emitter. A panic
//! escaping the drain pass itself puts the state in `Error`, publishes a
//! `ProcessingError` diagnostic and resets to `Idle`.

use super::Inner;
use crate::config::{OverflowStrategy, ProcessingMode};
use crate::diagnostics::{Diagnostic, DiagnosticsChannel, DropReason};
use crate::error::ListenerError;
use crate::listener::EventListener;
use crate::queue::{EnqueueOutcome, ProcessingState, QueuedEvent};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use trading_types::{Event, EventStatus};

/// What happened when one listener was offered one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    /// Listener inactive; not a failure.
    Skipped,
    Succeeded,
    Failed,
}

/// Runs drain passes until the queue is empty and the flag is released.
///
/// The caller must already hold the single-flight flag.
pub(crate) async fn run(inner: Arc<Inner>, state: ProcessingState) {
    loop {
        inner.queue.lock().set_state(state);

        let pass = AssertUnwindSafe(drain_pass(&inner)).catch_unwind().await;
        if let Err(panic) = pass {
            let message = panic_message(panic.as_ref());
            inner.queue.lock().set_state(ProcessingState::Error);
            error!(error = %message, "Drain loop failed");
            inner
                .diagnostics
                .publish(Diagnostic::ProcessingError { message });
        }

        inner.finish_drain();

        if inner.queue.lock().is_empty() || !inner.try_acquire_drain() {
            break;
        }
        debug!("Events arrived while releasing drain; continuing");
    }
}

async fn drain_pass(inner: &Arc<Inner>) {
    match inner.config.processing_mode {
        ProcessingMode::Sequential => loop {
            let Some(queued) = inner.dequeue_next() else {
                break;
            };
            process_event(inner, queued).await;
        },
        ProcessingMode::Batched => loop {
            let batch = inner.dequeue_batch(inner.config.batch_size);
            if batch.is_empty() {
                break;
            }

            let started = Instant::now();
            let size = batch.len();
            join_all(batch.into_iter().map(|queued| process_event(inner, queued))).await;
            let elapsed = started.elapsed();

            debug!(size, elapsed_ms = elapsed.as_millis() as u64, "Batch processed");
            inner
                .diagnostics
                .publish(Diagnostic::BatchProcessed { size, elapsed });
        },
    }
}

/// Resolves listeners for one event, fans out, and records the outcome.
async fn process_event(inner: &Arc<Inner>, queued: QueuedEvent) {
    let started = Instant::now();
    let event = queued.event.with_status(EventStatus::Processing);
    let listeners = inner.registry.lock().resolve(&event);

    let failed = if inner.config.async_listeners {
        join_all(
            listeners
                .iter()
                .map(|listener| invoke_listener(&inner.diagnostics, listener, &event)),
        )
        .await
        .contains(&Invocation::Failed)
    } else {
        let mut failed = false;
        for listener in &listeners {
            if invoke_listener(&inner.diagnostics, listener, &event).await == Invocation::Failed {
                failed = true;
            }
        }
        failed
    };

    let elapsed = started.elapsed();
    {
        let mut queue = inner.queue.lock();
        if failed {
            queue.record_failed(elapsed);
        } else {
            queue.record_processed(elapsed);
        }
    }

    debug!(
        event_id = %event.id,
        event_type = %event.event_type,
        listeners = listeners.len(),
        failed,
        "Event processed"
    );

    let threshold = inner.config.max_processing_time;
    if elapsed > threshold {
        warn!(
            event_id = %event.id,
            event_type = %event.event_type,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            "Slow event processing"
        );
        inner.diagnostics.publish(Diagnostic::SlowProcessing {
            event_id: event.id,
            event_type: event.event_type.clone(),
            elapsed,
            threshold,
        });
    }

    if failed && queued.retries < inner.config.max_retries {
        retry(inner, queued);
    }
}

fn retry(inner: &Arc<Inner>, queued: QueuedEvent) {
    let event = queued.event.clone();
    let attempt = queued.retries + 1;
    let outcome = inner.queue.lock().requeue(queued);

    match outcome {
        Ok(EnqueueOutcome::Accepted) => {
            debug!(event_id = %event.id, attempt, "Failed event re-enqueued");
        }
        Ok(EnqueueOutcome::Evicted(evicted)) => {
            inner.publish_drop(&evicted.event, DropReason::Evicted);
        }
        Ok(EnqueueOutcome::Rejected(refused)) => {
            // The drain cannot wait on itself for space, so a blocking queue
            // drops the retry here and counts it.
            if inner.config.queue.overflow_strategy == OverflowStrategy::Block {
                inner.queue.lock().record_dropped();
            }
            inner.publish_drop(&refused, DropReason::Rejected);
        }
        Err(err) => {
            warn!(event_id = %event.id, attempt, error = %err, "Retry refused by full queue");
            inner.queue.lock().record_dropped();
            inner.publish_drop(&event, DropReason::Rejected);
        }
    }
}

/// Offers `event` to one listener with full failure isolation.
pub(crate) async fn invoke_listener(
    diagnostics: &DiagnosticsChannel,
    listener: &Arc<dyn EventListener>,
    event: &Event,
) -> Invocation {
    if !listener.is_active() {
        return Invocation::Skipped;
    }

    let outcome = AssertUnwindSafe(listener.handle_event(event))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(())) => return Invocation::Succeeded,
        Ok(Err(err)) => ListenerError::Failed {
            listener: listener.name().to_string(),
            message: format!("{err:#}"),
        },
        Err(panic) => ListenerError::Panicked {
            listener: listener.name().to_string(),
            message: panic_message(panic.as_ref()),
        },
    };

    let handled = std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_error(event, &failure)))
        .unwrap_or(false);
    if !handled {
        error!(
            event_id = %event.id,
            event_type = %event.event_type,
            listener = listener.name(),
            error = %failure,
            "Listener failed"
        );
        diagnostics.publish(Diagnostic::ListenerFailed {
            event_id: event.id,
            listener: listener.name().to_string(),
            error: failure.to_string(),
        });
    }

    Invocation::Failed
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
