use crate::types::stream::Stream;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// The value held under one key.
#[derive(Debug, Clone)]
pub enum StoredEntry {
    String {
        value: String,
        /// Absolute expiry in milliseconds since UNIX epoch.
        expires_at: Option<u64>,
    },
    Stream(Stream),
}

impl StoredEntry {
    pub fn string(value: impl Into<String>) -> Self {
        StoredEntry::String {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StoredEntry::String { .. } => "string",
            StoredEntry::Stream(_) => "stream",
        }
    }

    /// Only string entries can expire.
    pub fn is_expired(&self, now: u64) -> bool {
        match self {
            StoredEntry::String {
                expires_at: Some(exp),
                ..
            } => now >= *exp,
            _ => false,
        }
    }
}

/// Source of wall-clock milliseconds for expiry and stream ids.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(start),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Get current time in milliseconds since UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_expiry_boundary() {
        let entry = StoredEntry::String {
            value: "v".into(),
            expires_at: Some(1000),
        };
        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1000));
        assert!(!StoredEntry::string("v").is_expired(u64::MAX));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_millis(), 15);
        clock.set(3);
        assert_eq!(clock.now_millis(), 3);
    }
}
