//! Subscription registry for camera-change and clock-tick notifications.
//!
//! Handlers are owned by an [`EventHub`] that belongs to one viewer instance.
//! `subscribe` hands back a token that must be given to `unsubscribe` on
//! teardown. [`Subscription`] is a single slot that drops its previous token
//! before taking a new one, so replacing a handler never stacks duplicates.

use log::debug;

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

/// Event handler type.
pub type Handler<E> = Box<dyn FnMut(&E)>;

/// Ordered list of handlers for one event type.
pub struct EventHub<E> {
    next: u64,
    handlers: Vec<(SubscriptionToken, Handler<E>)>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            next: 0,
            handlers: Vec::new(),
        }
    }
}

impl<E> std::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&E) + 'static) -> SubscriptionToken {
        self.next += 1;
        let token = SubscriptionToken(self.next);
        self.handlers.push((token, Box::new(handler)));
        token
    }

    /// Remove a handler. Returns false if the token was already released.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(t, _)| *t != token);
        self.handlers.len() != before
    }

    /// Call every handler in subscription order.
    pub fn emit(&mut self, event: &E) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.handlers.is_empty() {
            debug!("[Events] Releasing {} handlers", self.handlers.len());
        }
        self.handlers.clear();
    }
}

/// Slot holding at most one live subscription.
#[derive(Debug, Default)]
pub struct Subscription {
    token: Option<SubscriptionToken>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler`, first releasing whatever this slot held.
    pub fn replace<E>(&mut self, hub: &mut EventHub<E>, handler: impl FnMut(&E) + 'static) -> SubscriptionToken {
        self.release(hub);
        let token = hub.subscribe(handler);
        self.token = Some(token);
        token
    }

    pub fn release<E>(&mut self, hub: &mut EventHub<E>) {
        if let Some(token) = self.token.take() {
            hub.unsubscribe(token);
        }
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }
}
