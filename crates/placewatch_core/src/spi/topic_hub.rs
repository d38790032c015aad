//! In-process keyed push hub.
//!
//! # Responsibility
//! - Fan each published value out to every listener of its key.
//! - Replay the latest value to new subscribers.
//!
//! # Invariants
//! - Listeners are invoked without the hub lock held, so a listener may
//!   publish, subscribe or cancel re-entrantly.
//! - Stream errors are delivered but never replace the latest value.

use crate::lock::lock;
use crate::spi::{Listener, SpiError, Subscription};
use log::debug;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};

struct Topic<T> {
    latest: Option<T>,
    listeners: BTreeMap<u64, Listener<T>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            latest: None,
            listeners: BTreeMap::new(),
        }
    }
}

struct HubState<K, T> {
    next_listener_id: u64,
    topics: BTreeMap<K, Topic<T>>,
}

/// Keyed latest-value hub backing in-process collaborators.
pub struct TopicHub<K, T> {
    name: &'static str,
    state: Arc<Mutex<HubState<K, T>>>,
}

impl<K, T> TopicHub<K, T>
where
    K: Ord + Clone + Display + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(HubState {
                next_listener_id: 0,
                topics: BTreeMap::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers `listener` for `key` and replays the latest value, if any.
    pub fn subscribe(&self, key: &K, listener: Listener<T>) -> Subscription {
        let (listener_id, replay) = {
            let mut state = lock(&self.state);
            let listener_id = state.next_listener_id;
            state.next_listener_id += 1;
            let topic = state.topics.entry(key.clone()).or_default();
            topic.listeners.insert(listener_id, Arc::clone(&listener));
            (listener_id, topic.latest.clone())
        };
        debug!(
            "event=hub_subscribe module=spi status=ok hub={} key={} listener_id={}",
            self.name, key, listener_id
        );

        if let Some(value) = replay {
            listener(Ok(value));
        }

        let weak = Arc::downgrade(&self.state);
        let cancel_key = key.clone();
        Subscription::new(format!("{}:{}", self.name, key), move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let mut state = lock(&state);
            if let Some(topic) = state.topics.get_mut(&cancel_key) {
                topic.listeners.remove(&listener_id);
            }
        })
    }

    /// Stores `value` as latest for `key` and delivers it to every listener.
    pub fn publish(&self, key: &K, value: T) {
        let listeners = {
            let mut state = lock(&self.state);
            let topic = state.topics.entry(key.clone()).or_default();
            topic.latest = Some(value.clone());
            topic.listeners.values().cloned().collect::<Vec<_>>()
        };
        for listener in listeners {
            listener(Ok(value.clone()));
        }
    }

    /// Delivers a stream error to every listener of `key`.
    pub fn publish_error(&self, key: &K, error: SpiError) {
        let listeners = {
            let state = lock(&self.state);
            state
                .topics
                .get(key)
                .map(|topic| topic.listeners.values().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        for listener in listeners {
            listener(Err(error.clone()));
        }
    }

    /// Stores `value` as latest without notifying anyone, unless a value is
    /// already held. Returns whether `value` was stored.
    pub fn seed_if_empty(&self, key: &K, value: T) -> bool {
        let mut state = lock(&self.state);
        let topic = state.topics.entry(key.clone()).or_default();
        if topic.latest.is_some() {
            return false;
        }
        topic.latest = Some(value);
        true
    }

    pub fn latest(&self, key: &K) -> Option<T> {
        let state = lock(&self.state);
        state.topics.get(key).and_then(|topic| topic.latest.clone())
    }

    pub fn listener_count(&self, key: &K) -> usize {
        let state = lock(&self.state);
        state
            .topics
            .get(key)
            .map_or(0, |topic| topic.listeners.len())
    }
}

#[cfg(test)]
mod tests {
    use super::TopicHub;
    use crate::spi::{Listener, SpiError, SpiResult};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Listener<u32>, Arc<Mutex<Vec<SpiResult<u32>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener<u32> = Arc::new(move |value| {
            sink.lock().expect("recorder lock").push(value);
        });
        (listener, seen)
    }

    #[test]
    fn replays_latest_on_subscribe() {
        let hub: TopicHub<String, u32> = TopicHub::new("test");
        let key = "k".to_string();
        hub.publish(&key, 1);
        hub.publish(&key, 2);
        let (listener, seen) = recorder();
        let _subscription = hub.subscribe(&key, listener);
        assert_eq!(*seen.lock().expect("lock"), vec![Ok(2)]);
    }

    #[test]
    fn cancelled_listener_stops_receiving() {
        let hub: TopicHub<String, u32> = TopicHub::new("test");
        let key = "k".to_string();
        let (listener, seen) = recorder();
        let mut subscription = hub.subscribe(&key, listener);
        hub.publish(&key, 1);
        subscription.cancel();
        hub.publish(&key, 2);
        assert_eq!(*seen.lock().expect("lock"), vec![Ok(1)]);
        assert_eq!(hub.listener_count(&key), 0);
    }

    #[test]
    fn errors_do_not_replace_latest() {
        let hub: TopicHub<String, u32> = TopicHub::new("test");
        let key = "k".to_string();
        let (listener, seen) = recorder();
        let _subscription = hub.subscribe(&key, listener);
        hub.publish(&key, 7);
        hub.publish_error(&key, SpiError::Disconnected("gone".to_string()));
        assert_eq!(hub.latest(&key), Some(7));
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![Ok(7), Err(SpiError::Disconnected("gone".to_string()))]
        );
    }

    #[test]
    fn listener_may_publish_reentrantly() {
        let hub = Arc::new(TopicHub::<String, u32>::new("test"));
        let key = "k".to_string();
        let inner_hub = Arc::clone(&hub);
        let other = "other".to_string();
        let listener: crate::spi::Listener<u32> = Arc::new(move |value| {
            if let Ok(value) = value {
                inner_hub.publish(&other, value + 1);
            }
        });
        let _subscription = hub.subscribe(&key, listener);
        hub.publish(&key, 1);
        assert_eq!(hub.latest(&"other".to_string()), Some(2));
    }

    #[test]
    fn seed_is_silent() {
        let hub: TopicHub<String, u32> = TopicHub::new("test");
        let key = "k".to_string();
        let (listener, seen) = recorder();
        let _subscription = hub.subscribe(&key, listener);
        assert!(hub.seed_if_empty(&key, 5));
        assert!(seen.lock().expect("lock").is_empty());
        assert_eq!(hub.latest(&key), Some(5));
    }

    #[test]
    fn seed_never_replaces_published_value() {
        let hub: TopicHub<String, u32> = TopicHub::new("test");
        let key = "k".to_string();
        hub.publish(&key, 7);
        assert!(!hub.seed_if_empty(&key, 3));
        assert_eq!(hub.latest(&key), Some(7));
    }
}
