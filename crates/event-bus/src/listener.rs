//! # Event Listeners
//!
//! Defines the capability every consumer of the bus implements, plus two
//! ready-made adapters:
//!
//! - [`FnListener`]: wraps a plain callback receiving the event.
//! - [`SourceAwareListener`]: callback additionally receives the event's
//!   resolved source (`"unknown"` when absent).
//!
//! ## Ownership
//!
//! The dispatcher holds `Arc<dyn EventListener>` entries in its registries
//! but never decides a listener's lifetime: the registrant unsubscribes
//! explicitly before discarding it. [`ListenerState::dispose`] deactivates a
//! listener and detaches its error hook without touching any registry.

use crate::error::{BusError, ListenerError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trading_types::Event;
use uuid::Uuid;

/// Identity of a listener, used for registry membership and dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked with the failing event and the caught error.
pub type ErrorHook = Arc<dyn Fn(&Event, &ListenerError) + Send + Sync>;

/// Anything that can receive events from the dispatcher.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Stable identity.
    fn id(&self) -> ListenerId;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Inactive listeners stay registered but are skipped silently.
    fn is_active(&self) -> bool;

    /// Handle one event. Returning `Err` (or panicking) counts as a failure
    /// of this listener only.
    async fn handle_event(&self, event: &Event) -> anyhow::Result<()>;

    /// Error hook. Returns `true` when the failure was handled here; `false`
    /// lets the dispatcher log it and publish a `ListenerFailed` diagnostic.
    fn on_error(&self, _event: &Event, _error: &ListenerError) -> bool {
        false
    }
}

/// Identity, activation flag and error hook shared by listener implementations.
pub struct ListenerState {
    id: ListenerId,
    name: String,
    active: AtomicBool,
    error_hook: RwLock<Option<ErrorHook>>,
}

impl fmt::Debug for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("active", &self.is_active())
            .field("has_error_hook", &self.error_hook.read().is_some())
            .finish()
    }
}

impl ListenerState {
    /// Create an active state.
    ///
    /// # Errors
    /// - `Configuration` if `name` is empty or whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, BusError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BusError::Configuration(
                "listener name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: ListenerId::new(),
            name,
            active: AtomicBool::new(true),
            error_hook: RwLock::new(None),
        })
    }

    /// Listener identity.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Listener name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the listener currently receives events.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start receiving events.
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Stop receiving events while staying registered.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Install or replace the error hook.
    pub fn set_error_hook(&self, hook: ErrorHook) {
        *self.error_hook.write() = Some(hook);
    }

    /// Deactivate and detach the error hook. Registries are untouched.
    pub fn dispose(&self) {
        self.deactivate();
        self.error_hook.write().take();
    }

    /// Run the error hook if one is attached.
    pub fn run_error_hook(&self, event: &Event, error: &ListenerError) -> bool {
        let hook = self.error_hook.read().clone();
        match hook {
            Some(hook) => {
                hook(event, error);
                true
            }
            None => false,
        }
    }
}

type Handler = Box<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type SourceHandler =
    Box<dyn Fn(Event, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Listener backed by a callback.
pub struct FnListener {
    state: ListenerState,
    handler: Handler,
}

impl FnListener {
    /// Wrap an async callback.
    ///
    /// # Errors
    /// - `Configuration` if `name` is empty.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Result<Self, BusError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Ok(Self {
            state: ListenerState::new(name)?,
            handler: Box::new(move |event| Box::pin(handler(event))),
        })
    }

    /// Wrap a synchronous callback. It runs to completion at invocation time.
    ///
    /// # Errors
    /// - `Configuration` if `name` is empty.
    pub fn from_sync<F>(name: impl Into<String>, handler: F) -> Result<Self, BusError>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Ok(Self {
            state: ListenerState::new(name)?,
            handler: Box::new(move |event| {
                let result = handler(&event);
                Box::pin(async move { result })
            }),
        })
    }

    /// Attach an error hook (builder style).
    #[must_use]
    pub fn with_error_hook<H>(self, hook: H) -> Self
    where
        H: Fn(&Event, &ListenerError) + Send + Sync + 'static,
    {
        self.state.set_error_hook(Arc::new(hook));
        self
    }

    /// Activation flag, identity and error hook.
    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    /// Wrap in an `Arc` ready for registration.
    #[must_use]
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl EventListener for FnListener {
    fn id(&self) -> ListenerId {
        self.state.id()
    }

    fn name(&self) -> &str {
        self.state.name()
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        (self.handler)(event.clone()).await
    }

    fn on_error(&self, event: &Event, error: &ListenerError) -> bool {
        self.state.run_error_hook(event, error)
    }
}

/// Listener whose callback also receives the event's resolved source.
pub struct SourceAwareListener {
    state: ListenerState,
    handler: SourceHandler,
}

impl SourceAwareListener {
    /// Wrap an async callback taking `(event, source)`.
    ///
    /// # Errors
    /// - `Configuration` if `name` is empty.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Result<Self, BusError>
    where
        F: Fn(Event, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Ok(Self {
            state: ListenerState::new(name)?,
            handler: Box::new(move |event, source| Box::pin(handler(event, source))),
        })
    }

    /// Attach an error hook (builder style).
    #[must_use]
    pub fn with_error_hook<H>(self, hook: H) -> Self
    where
        H: Fn(&Event, &ListenerError) + Send + Sync + 'static,
    {
        self.state.set_error_hook(Arc::new(hook));
        self
    }

    /// Activation flag, identity and error hook.
    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    /// Wrap in an `Arc` ready for registration.
    #[must_use]
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl EventListener for SourceAwareListener {
    fn id(&self) -> ListenerId {
        self.state.id()
    }

    fn name(&self) -> &str {
        self.state.name()
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        let source = event.resolved_source().to_string();
        (self.handler)(event.clone(), source).await
    }

    fn on_error(&self, event: &Event, error: &ListenerError) -> bool {
        self.state.run_error_hook(event, error)
    }
}
