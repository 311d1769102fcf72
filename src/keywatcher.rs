use crate::types::stream::StreamId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Pending notifications buffered per blocked reader. A reader only needs
/// one to wake up, so extras are dropped.
const SUBSCRIPTION_BUFFER: usize = 8;

/// An insert that happened on a watched stream key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub key: String,
    pub id: StreamId,
}

#[derive(Debug, Default)]
struct Waiters {
    next_id: u64,
    by_key: HashMap<String, Vec<(u64, mpsc::Sender<StreamEvent>)>>,
}

/// A registry that lets blocked XREAD clients wait for inserts on stream keys.
///
/// Producers call `notify` after appending an entry. Delivery never blocks:
/// a subscriber whose buffer is full or whose receiver is gone is skipped.
#[derive(Debug, Default, Clone)]
pub struct KeyWatcher {
    inner: Arc<Mutex<Waiters>>,
}

impl KeyWatcher {
    pub fn new() -> Self {
        KeyWatcher::default()
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register one receiver across several keys. The registration lasts
    /// until the returned subscription is dropped.
    pub fn subscribe(&self, keys: &[String]) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut waiters = self.waiters();
        waiters.next_id += 1;
        let id = waiters.next_id;
        for key in keys {
            waiters
                .by_key
                .entry(key.clone())
                .or_default()
                .push((id, tx.clone()));
        }
        Subscription {
            id,
            keys: keys.to_vec(),
            rx,
            watcher: self.clone(),
        }
    }

    /// Tell every subscriber of `key` about a new entry. Returns how many
    /// subscribers accepted the event.
    pub fn notify(&self, key: &str, id: StreamId) -> usize {
        let waiters = self.waiters();
        let Some(subscribers) = waiters.by_key.get(key) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, tx)| {
                tx.try_send(StreamEvent {
                    key: key.to_string(),
                    id,
                })
                .is_ok()
            })
            .count()
    }

    /// Number of live subscriptions on `key`.
    pub fn waiter_count(&self, key: &str) -> usize {
        self.waiters().by_key.get(key).map_or(0, Vec::len)
    }

    fn unregister(&self, id: u64, keys: &[String]) {
        let mut waiters = self.waiters();
        for key in keys {
            if let Some(subscribers) = waiters.by_key.get_mut(key) {
                subscribers.retain(|(sub_id, _)| *sub_id != id);
                if subscribers.is_empty() {
                    waiters.by_key.remove(key);
                }
            }
        }
    }
}

/// A live registration returned by [`KeyWatcher::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    keys: Vec<String>,
    rx: mpsc::Receiver<StreamEvent>,
    watcher: KeyWatcher,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.watcher.unregister(self.id, &self.keys);
    }
}
