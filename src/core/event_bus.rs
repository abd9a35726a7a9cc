use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Event payload routed by topic through an [`EventBus`].
pub trait BusEvent {
    type Topic: Copy + Eq + Hash + fmt::Debug;

    fn topic(&self) -> Self::Topic;
}

/// Opaque handle returned by [`EventBus::on`] and consumed by [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionToken(u64);

type Callback<E> = Rc<RefCell<Box<dyn FnMut(&E)>>>;

struct Subscriber<E> {
    token: SubscriptionToken,
    callback: Callback<E>,
}

/// Synchronous single-threaded publish/subscribe hub.
///
/// Subscribers for one topic are called in subscription order. Dispatch works
/// on a snapshot of the subscriber list, so callbacks may subscribe, unsubscribe
/// or emit again without invalidating the running dispatch.
pub struct EventBus<E: BusEvent> {
    topics: RefCell<IndexMap<E::Topic, Vec<Subscriber<E>>>>,
    next_token: Cell<u64>,
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            topics: RefCell::new(IndexMap::new()),
            next_token: Cell::new(1),
        }
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.topics.borrow();
        f.debug_map()
            .entries(topics.iter().map(|(topic, subs)| (topic, subs.len())))
            .finish()
    }
}

impl<E: BusEvent> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, topic: E::Topic, callback: F) -> SubscriptionToken
    where
        F: FnMut(&E) + 'static,
    {
        let token = SubscriptionToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.topics
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(Subscriber {
                token,
                callback: Rc::new(RefCell::new(Box::new(callback))),
            });
        trace!(?topic, token = token.0, "subscribed");
        token
    }

    /// Removes a subscription. Returns `true` when the token was live.
    pub fn off(&self, token: SubscriptionToken) -> bool {
        let mut topics = self.topics.borrow_mut();
        for subscribers in topics.values_mut() {
            if let Some(position) = subscribers.iter().position(|sub| sub.token == token) {
                subscribers.remove(position);
                trace!(token = token.0, "unsubscribed");
                return true;
            }
        }
        false
    }

    #[must_use]
    pub fn is_subscribed(&self, token: SubscriptionToken) -> bool {
        self.topics
            .borrow()
            .values()
            .any(|subs| subs.iter().any(|sub| sub.token == token))
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: E::Topic) -> usize {
        self.topics.borrow().get(&topic).map_or(0, Vec::len)
    }

    /// Delivers `event` to every subscriber of its topic and returns how many ran.
    pub fn emit(&self, event: &E) -> usize {
        let topic = event.topic();
        let snapshot: Vec<(SubscriptionToken, Callback<E>)> = match self.topics.borrow().get(&topic)
        {
            Some(subscribers) => subscribers
                .iter()
                .map(|sub| (sub.token, Rc::clone(&sub.callback)))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (token, callback) in snapshot {
            if !self.is_subscribed(token) {
                continue;
            }
            // A callback that is already on the stack is being re-entered by a
            // nested emit; it observes the outer dispatch instead.
            let Ok(mut callback) = callback.try_borrow_mut() else {
                trace!(?topic, token = token.0, "skipping re-entrant subscriber");
                continue;
            };
            (*callback)(event);
            delivered += 1;
        }
        delivered
    }
}
