use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use tokio::time::Instant;

use super::{CacheBackend, ScanDeleteReport};
use crate::error::{Result, SyncError};

#[derive(Clone, Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local cache with TTLs on the tokio clock, so tests can drive
/// expiry with a paused runtime.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<String, Slot>>,
}

impl fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, sorted. Test helper.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

/// Translates a Redis-style glob (`*`, `?`, `[...]`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' {
                        out.push_str("\\\\");
                    } else {
                        out.push(inner);
                    }
                }
                out.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| {
        SyncError::Cache(format!("invalid key pattern '{pattern}': {e}"))
    })
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => {
                return Ok(Some(slot.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, slot| !slot.is_live(now));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let slot = Slot {
            value: value.to_string(),
            expires_at: Some(now + ttl),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, slot| {
                slot.is_live(now) && slot.value == expected
            })
            .is_some())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if slot.is_live(now) && slot.value == expected => {
                *slot = Slot {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_delete(
        &self,
        pattern: &str,
        count: usize,
        max_iterations: usize,
    ) -> Result<ScanDeleteReport> {
        let matcher = glob_to_regex(pattern)?;
        let mut report = ScanDeleteReport {
            pattern: pattern.to_string(),
            ..Default::default()
        };

        // Emulates SCAN pages: a snapshot of the keyspace walked `count` keys
        // at a time.
        let snapshot: Vec<String> =
            self.entries.iter().map(|e| e.key().clone()).collect();
        for page in snapshot.chunks(count.max(1)) {
            if report.iterations >= max_iterations {
                report.truncated = true;
                break;
            }
            report.iterations += 1;
            for key in page.iter().filter(|k| matcher.is_match(k)) {
                if self.entries.remove(key).is_some() {
                    report.deleted += 1;
                }
            }
        }
        Ok(report)
    }
}
