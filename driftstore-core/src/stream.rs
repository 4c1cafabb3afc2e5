//! Latest-value replay primitive backing the reactive subscription layer.

use tokio::sync::watch;

/// A cheaply-cloneable handle over a [`tokio::sync::watch`] channel carrying
/// the latest known value for a subscription (an entity id, or a query's
/// result set).
///
/// New subscribers immediately observe the current value on subscribe, then
/// every subsequent publish — this is the "replay last value" semantics the
/// reactive layer promises.
#[derive(Debug, Clone)]
pub struct LatestValue<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> LatestValue<T> {
    /// Creates a new latest-value slot seeded with `initial`.
    pub fn new(initial: T) -> Self {
        LatestValue {
            tx: watch::Sender::new(initial),
        }
    }

    /// Publishes a new value, waking every current subscriber.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Subscribes, receiving the current value immediately and every
    /// subsequent publish.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Returns a clone of the current value without subscribing.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Number of live receivers, used by the reactive layer's idle-sink
    /// reaper to decide when a registry entry can be dropped.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_sees_current_value_immediately() {
        let latest = LatestValue::new(1);
        let rx = latest.subscribe();
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn publish_updates_subscribers() {
        let latest = LatestValue::new(1);
        let mut rx = latest.subscribe();
        latest.publish(2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn receiver_count_reflects_live_subscriptions() {
        let latest = LatestValue::new(1);
        assert_eq!(latest.receiver_count(), 0);
        let rx = latest.subscribe();
        assert_eq!(latest.receiver_count(), 1);
        drop(rx);
        assert_eq!(latest.receiver_count(), 0);
    }
}
