use crate::error::{ReplisError, ReplisResult};
use std::collections::BTreeMap;
use std::fmt;

/// A stream entry ID: milliseconds-sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// Parse `ms-seq`, or a bare `ms` with `default_seq` filled in.
    pub fn parse(s: &str, default_seq: u64) -> Option<Self> {
        match s.split_once('-') {
            Some((ms, seq)) => Some(StreamId::new(ms.parse().ok()?, seq.parse().ok()?)),
            None => Some(StreamId::new(s.parse().ok()?, default_seq)),
        }
    }

    /// Parse an XRANGE bound. `-` and `+` are the extremes; a bare
    /// timestamp covers the whole millisecond.
    pub fn parse_range_bound(s: &str, is_start: bool) -> ReplisResult<Self> {
        match s {
            "-" => Ok(StreamId::MIN),
            "+" => Ok(StreamId::MAX),
            _ => {
                let default_seq = if is_start { 0 } else { u64::MAX };
                StreamId::parse(s, default_seq).ok_or(ReplisError::InvalidStreamId)
            }
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// The id argument of XADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*`
    Auto,
    /// `<ms>-*`
    AutoSeq(u64),
    /// `<ms>-<seq>`
    Explicit(StreamId),
}

impl IdSpec {
    pub fn parse(s: &str) -> ReplisResult<Self> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        if let Some(ms) = s.strip_suffix("-*") {
            let ms = ms.parse().map_err(|_| ReplisError::InvalidStreamId)?;
            return Ok(IdSpec::AutoSeq(ms));
        }
        StreamId::parse(s, 0)
            .map(IdSpec::Explicit)
            .ok_or(ReplisError::InvalidStreamId)
    }
}

/// Field-value pairs of one entry, in the order they were given.
pub type Fields = Vec<(String, String)>;

/// An append-only log of entries ordered by id.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: BTreeMap<StreamId, Fields>,
    last_id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Stream::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The highest id ever inserted, `0-0` for a fresh stream.
    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolve an XADD id against the current top item without inserting.
    pub fn next_id(&self, spec: IdSpec, now_ms: u64) -> ReplisResult<StreamId> {
        let top = self.last_id;
        let id = match spec {
            IdSpec::Auto => {
                if now_ms > top.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    let seq = top.seq.checked_add(1).ok_or(ReplisError::StreamIdNotIncreasing)?;
                    StreamId::new(top.ms, seq)
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms < top.ms {
                    return Err(ReplisError::StreamIdNotIncreasing);
                }
                if ms == top.ms {
                    let seq = top.seq.checked_add(1).ok_or(ReplisError::StreamIdNotIncreasing)?;
                    StreamId::new(ms, seq)
                } else {
                    StreamId::new(ms, 0)
                }
            }
            IdSpec::Explicit(id) => {
                if id == StreamId::MIN {
                    return Err(ReplisError::StreamIdZero);
                }
                id
            }
        };
        if id <= top {
            return Err(ReplisError::StreamIdNotIncreasing);
        }
        Ok(id)
    }

    /// Append an entry and return the id it was stored under.
    pub fn insert(&mut self, spec: IdSpec, fields: Fields, now_ms: u64) -> ReplisResult<StreamId> {
        let id = self.next_id(spec, now_ms)?;
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    /// Entries with `start <= id <= end`, oldest first.
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<(StreamId, Fields)> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range(start..=end)
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields.clone()))
            .collect()
    }

    /// Entries strictly newer than `after`, oldest first.
    pub fn after(&self, after: StreamId, count: Option<usize>) -> Vec<(StreamId, Fields)> {
        use std::ops::Bound::{Excluded, Unbounded};
        self.entries
            .range((Excluded(after), Unbounded))
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields.clone()))
            .collect()
    }
}
