pub mod entry;

use crate::error::{ReplisError, ReplisResult};
use crate::keywatcher::KeyWatcher;
use crate::types::stream::{Fields, IdSpec, Stream, StreamId};
use entry::{Clock, StoredEntry, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The keyspace. Every operation holds the internal lock for its full
/// duration and never across I/O.
///
/// Expiry is lazy: an expired string is removed the next time a read or a
/// key scan observes it.
#[derive(Debug)]
pub struct Store {
    data: RwLock<HashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
    watcher: KeyWatcher,
}

pub type SharedStore = Arc<Store>;

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Store {
            data: RwLock::new(HashMap::new()),
            clock,
            watcher: KeyWatcher::new(),
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Registry used by blocking stream readers.
    pub fn watcher(&self) -> &KeyWatcher {
        &self.watcher
    }

    /// Insert or overwrite a string with an optional absolute expiry.
    pub async fn set_string(&self, key: &str, value: String, expires_at: Option<u64>) {
        self.data
            .write()
            .await
            .insert(key.to_string(), StoredEntry::String { value, expires_at });
    }

    /// Look up a key, deleting it first if it has expired.
    pub async fn get(&self, key: &str) -> Option<StoredEntry> {
        let now = self.now_millis();
        {
            let data = self.data.read().await;
            match data.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }
        let mut data = self.data.write().await;
        // Another writer may have replaced the key between the two locks.
        match data.get(key) {
            Some(entry) if entry.is_expired(now) => {
                data.remove(key);
                None
            }
            other => other.cloned(),
        }
    }

    /// The value of a string key. Fails with `WrongType` on a stream.
    pub async fn get_string(&self, key: &str) -> ReplisResult<Option<String>> {
        match self.get(key).await {
            None => Ok(None),
            Some(StoredEntry::String { value, .. }) => Ok(Some(value)),
            Some(StoredEntry::Stream(_)) => Err(ReplisError::WrongType),
        }
    }

    /// All live keys. Expired entries met during the scan are removed.
    pub async fn keys(&self) -> Vec<String> {
        let now = self.now_millis();
        let mut data = self.data.write().await;
        data.retain(|_, entry| !entry.is_expired(now));
        data.keys().cloned().collect()
    }

    /// Type name of the value at `key` without copying it out of the map.
    pub async fn type_of(&self, key: &str) -> &'static str {
        let now = self.now_millis();
        {
            let data = self.data.read().await;
            match data.get(key) {
                None => return "none",
                Some(entry) if !entry.is_expired(now) => return entry.type_name(),
                Some(_) => {}
            }
        }
        // Expired: take the write path so the key is dropped.
        self.get(key).await.map_or("none", |entry| entry.type_name())
    }

    /// Increment the integer held at `key`, treating a missing key as 0.
    /// The result is stored without expiry.
    pub async fn incr(&self, key: &str) -> ReplisResult<i64> {
        let now = self.now_millis();
        let mut data = self.data.write().await;
        let current = match data.get(key) {
            Some(entry) if entry.is_expired(now) => 0,
            None => 0,
            Some(StoredEntry::String { value, .. }) => {
                value.parse::<i64>().map_err(|_| ReplisError::NotInteger)?
            }
            Some(StoredEntry::Stream(_)) => return Err(ReplisError::WrongType),
        };
        let next = current.checked_add(1).ok_or(ReplisError::NotInteger)?;
        data.insert(key.to_string(), StoredEntry::string(next.to_string()));
        Ok(next)
    }

    /// Append to the stream at `key`, creating it if needed, then wake any
    /// blocked readers of that key.
    pub async fn xadd(&self, key: &str, spec: IdSpec, fields: Fields) -> ReplisResult<StreamId> {
        let now = self.now_millis();
        let id = {
            let mut data = self.data.write().await;
            if data.get(key).is_some_and(|entry| entry.is_expired(now)) {
                data.remove(key);
            }
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| StoredEntry::Stream(Stream::new()));
            let inserted = match entry {
                StoredEntry::Stream(stream) => stream.insert(spec, fields, now),
                StoredEntry::String { .. } => return Err(ReplisError::WrongType),
            };
            if inserted.is_err()
                && matches!(data.get(key), Some(StoredEntry::Stream(s)) if s.is_empty())
            {
                // A rejected first entry must not leave an empty stream behind.
                data.remove(key);
            }
            inserted?
        };
        self.watcher.notify(key, id);
        Ok(id)
    }

    /// Inclusive range scan of a stream. A missing key is an empty stream.
    pub async fn xrange(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> ReplisResult<Vec<(StreamId, Fields)>> {
        self.with_stream(key, |stream| stream.range(start, end, count))
            .await
    }

    /// Entries of a stream strictly newer than `after`.
    pub async fn xread_after(
        &self,
        key: &str,
        after: StreamId,
        count: Option<usize>,
    ) -> ReplisResult<Vec<(StreamId, Fields)>> {
        self.with_stream(key, |stream| stream.after(after, count))
            .await
    }

    /// Top id of a stream, `0-0` when the key does not exist.
    pub async fn stream_last_id(&self, key: &str) -> ReplisResult<StreamId> {
        self.with_stream(key, Stream::last_id).await
    }

    async fn with_stream<T: Default>(
        &self,
        key: &str,
        f: impl FnOnce(&Stream) -> T,
    ) -> ReplisResult<T> {
        let now = self.now_millis();
        let data = self.data.read().await;
        match data.get(key) {
            None => Ok(T::default()),
            Some(entry) if entry.is_expired(now) => Ok(T::default()),
            Some(StoredEntry::Stream(stream)) => Ok(f(stream)),
            Some(StoredEntry::String { .. }) => Err(ReplisError::WrongType),
        }
    }

    /// Number of keys, expired or not.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Live string keys with their expiry, for writing a snapshot.
    pub async fn snapshot_strings(&self) -> Vec<(String, String, Option<u64>)> {
        let now = self.now_millis();
        let data = self.data.read().await;
        let mut out: Vec<_> = data
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .filter_map(|(key, entry)| match entry {
                StoredEntry::String { value, expires_at } => {
                    Some((key.clone(), value.clone(), *expires_at))
                }
                StoredEntry::Stream(_) => None,
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
