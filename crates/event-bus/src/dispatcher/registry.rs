//! # Subscription Registries
//!
//! Direct (exact type), filtered and routed subscriptions, plus listener
//! resolution.
//!
//! Resolution order is fixed: direct listeners for the exact type, then
//! listeners of matching active routes by route priority (descending, ties
//! in creation order), then matching active filtered subscriptions. Each
//! listener appears once, at its first position.

use crate::diagnostics::{RouteId, SubscriptionId};
use crate::filter::EventFilter;
use crate::listener::{EventListener, ListenerId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use trading_types::Event;
use uuid::Uuid;

/// A predicate-gated subscription independent of the type registry.
#[derive(Clone)]
pub struct FilteredSubscription {
    /// Subscription identity.
    pub id: SubscriptionId,
    /// Receiving listener.
    pub listener: Arc<dyn EventListener>,
    /// Gate.
    pub filter: EventFilter,
    /// Inactive subscriptions are ignored during resolution.
    pub active: bool,
}

/// A named, prioritized fan-out target.
#[derive(Clone)]
pub struct Route {
    /// Route identity.
    pub id: RouteId,
    /// Gate.
    pub filter: EventFilter,
    /// Member listeners, unique by id, in join order.
    pub listeners: Vec<Arc<dyn EventListener>>,
    /// Resolution order among routes; higher first.
    pub priority: i32,
    /// Inactive routes are ignored during resolution.
    pub active: bool,
}

/// All subscription state owned by a dispatcher.
#[derive(Default)]
pub(crate) struct Registry {
    direct: HashMap<String, Vec<Arc<dyn EventListener>>>,
    filtered: Vec<FilteredSubscription>,
    routes: Vec<Route>,
}

impl Registry {
    /// Adds `listener` under `event_type`. Returns false if already present.
    pub fn subscribe(&mut self, event_type: &str, listener: Arc<dyn EventListener>) -> bool {
        let bucket = self.direct.entry(event_type.to_string()).or_default();
        if bucket.iter().any(|l| l.id() == listener.id()) {
            return false;
        }
        bucket.push(listener);
        true
    }

    /// Removes `listener_id` from `event_type`, dropping the bucket when empty.
    pub fn unsubscribe(&mut self, event_type: &str, listener_id: ListenerId) -> Option<String> {
        let bucket = self.direct.get_mut(event_type)?;
        let position = bucket.iter().position(|l| l.id() == listener_id)?;
        let removed = bucket.remove(position);
        if bucket.is_empty() {
            self.direct.remove(event_type);
        }
        Some(removed.name().to_string())
    }

    /// Removes `listener_id` from every direct bucket. Returns the affected types.
    pub fn unsubscribe_direct_everywhere(&mut self, listener_id: ListenerId) -> Vec<String> {
        let mut affected = Vec::new();
        self.direct.retain(|event_type, bucket| {
            let before = bucket.len();
            bucket.retain(|l| l.id() != listener_id);
            if bucket.len() != before {
                affected.push(event_type.clone());
            }
            !bucket.is_empty()
        });
        affected
    }

    pub fn add_filtered(
        &mut self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.filtered.push(FilteredSubscription {
            id,
            listener,
            filter,
            active: true,
        });
        id
    }

    pub fn remove_filtered(&mut self, id: SubscriptionId) -> bool {
        let before = self.filtered.len();
        self.filtered.retain(|s| s.id != id);
        self.filtered.len() != before
    }

    /// Removes every filtered subscription of `listener_id`. Returns their ids.
    pub fn remove_filtered_for(&mut self, listener_id: ListenerId) -> Vec<SubscriptionId> {
        let mut removed = Vec::new();
        self.filtered.retain(|s| {
            let keep = s.listener.id() != listener_id;
            if !keep {
                removed.push(s.id);
            }
            keep
        });
        removed
    }

    pub fn create_route(&mut self, filter: EventFilter, priority: i32) -> RouteId {
        let id = Uuid::new_v4();
        self.routes.push(Route {
            id,
            filter,
            listeners: Vec::new(),
            priority,
            active: true,
        });
        id
    }

    pub fn remove_route(&mut self, id: RouteId) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| r.id != id);
        self.routes.len() != before
    }

    /// Returns false if the route is missing or already has the listener.
    pub fn add_to_route(&mut self, id: RouteId, listener: Arc<dyn EventListener>) -> bool {
        let Some(route) = self.routes.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        if route.listeners.iter().any(|l| l.id() == listener.id()) {
            return false;
        }
        route.listeners.push(listener);
        true
    }

    pub fn remove_from_route(&mut self, id: RouteId, listener_id: ListenerId) -> bool {
        let Some(route) = self.routes.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        let before = route.listeners.len();
        route.listeners.retain(|l| l.id() != listener_id);
        route.listeners.len() != before
    }

    /// Removes `listener_id` from every route. Returns the affected route ids.
    pub fn remove_from_all_routes(&mut self, listener_id: ListenerId) -> Vec<RouteId> {
        self.routes
            .iter_mut()
            .filter_map(|route| {
                let before = route.listeners.len();
                route.listeners.retain(|l| l.id() != listener_id);
                (route.listeners.len() != before).then_some(route.id)
            })
            .collect()
    }

    /// Returns false if the route is missing or already in that state.
    pub fn set_route_active(&mut self, id: RouteId, active: bool) -> bool {
        match self.routes.iter_mut().find(|r| r.id == id) {
            Some(route) if route.active != active => {
                route.active = active;
                true
            }
            _ => false,
        }
    }

    /// Any registered listener with this identity.
    pub fn find(&self, listener_id: ListenerId) -> Option<Arc<dyn EventListener>> {
        self.direct
            .values()
            .flatten()
            .chain(self.routes.iter().flat_map(|r| r.listeners.iter()))
            .chain(self.filtered.iter().map(|s| &s.listener))
            .find(|l| l.id() == listener_id)
            .cloned()
    }

    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.iter().find(|r| r.id == id)
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.direct.get(event_type).map_or(0, Vec::len)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn filtered_count(&self) -> usize {
        self.filtered.len()
    }

    /// Every listener that should see `event`, deduplicated by identity.
    pub fn resolve(&self, event: &Event) -> Vec<Arc<dyn EventListener>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        let mut push = |listener: &Arc<dyn EventListener>| {
            if seen.insert(listener.id()) {
                resolved.push(Arc::clone(listener));
            }
        };

        if let Some(bucket) = self.direct.get(&event.event_type) {
            bucket.iter().for_each(&mut push);
        }

        let mut routes: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| r.active && r.filter.matches(event))
            .collect();
        // Stable: equal priorities keep creation order.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        for route in routes {
            route.listeners.iter().for_each(&mut push);
        }

        self.filtered
            .iter()
            .filter(|s| s.active && s.filter.matches(event))
            .for_each(|s| push(&s.listener));

        resolved
    }

    /// Whether at least one listener resolves for `event`.
    pub fn has_listeners(&self, event: &Event) -> bool {
        self.direct
            .get(&event.event_type)
            .is_some_and(|bucket| !bucket.is_empty())
            || self
                .routes
                .iter()
                .any(|r| r.active && !r.listeners.is_empty() && r.filter.matches(event))
            || self
                .filtered
                .iter()
                .any(|s| s.active && s.filter.matches(event))
    }

    pub fn clear(&mut self) {
        self.direct.clear();
        self.filtered.clear();
        self.routes.clear();
    }
}
