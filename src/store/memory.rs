//! In-memory [`KeyValueStore`] used by the reaper tests.
//!
//! A scan starting at cursor 0 takes a sorted snapshot of the key names and
//! the cursor indexes into it, so deletes made while the scan runs never
//! shift later keys out of reach.  Keys removed since the snapshot are not
//! returned.  `count` bounds how many keys one round-trip looks at (not how
//! many it returns), which is how Redis treats `COUNT`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use super::{KeyValueStore, ScanPage};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    failing_deletes: Mutex<HashSet<String>>,
    delete_calls: Mutex<Vec<String>>,
    scan_snapshot: Mutex<Vec<String>>,
    repeated_in_scan: Mutex<Vec<String>>,
    scan_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (key, value) in entries {
            store.insert(key, value);
        }
        store
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Make every `delete` of `key` fail.
    pub fn fail_delete(&self, key: impl Into<String>) {
        self.failing_deletes.lock().unwrap().insert(key.into());
    }

    /// Every key passed to `delete`, in call order, including failures.
    pub fn delete_calls(&self) -> Vec<String> {
        self.delete_calls.lock().unwrap().clone()
    }

    /// Return `key` a second time on the final page of every scan, the way
    /// Redis may repeat keys across a rehash.
    pub fn repeat_in_scan(&self, key: impl Into<String>) {
        self.repeated_in_scan.lock().unwrap().push(key.into());
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }
}

/// Glob matching for the `*` wildcard, which is all the reaper uses.
fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: u32) -> Result<ScanPage> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().unwrap();
        let mut snapshot = self.scan_snapshot.lock().unwrap();
        if cursor == 0 {
            *snapshot = entries.keys().cloned().collect();
        }

        let start = usize::try_from(cursor)?.min(snapshot.len());
        let end = start
            .saturating_add(count.max(1) as usize)
            .min(snapshot.len());
        let mut keys: Vec<String> = snapshot[start..end]
            .iter()
            .filter(|key| entries.contains_key(*key) && glob_match(pattern, key))
            .cloned()
            .collect();

        let cursor = if end >= snapshot.len() {
            keys.extend(
                self.repeated_in_scan
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|key| glob_match(pattern, key))
                    .cloned(),
            );
            0
        } else {
            end as u64
        };
        Ok(ScanPage { cursor, keys })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.delete_calls.lock().unwrap().push(key.to_string());
        if self.failing_deletes.lock().unwrap().contains(key) {
            anyhow::bail!("simulated DEL failure for {key}");
        }
        Ok(u64::from(self.entries.lock().unwrap().remove(key).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_prefix() {
        assert!(glob_match("custom_domain:*", "custom_domain:a.test"));
        assert!(!glob_match("custom_domain:*", "alice:repo"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn scan_pages_cover_every_match() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.insert(format!("custom_domain:d{i}.test"), "o:r");
            store.insert(format!("other:{i}"), "x");
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let page = store.scan(cursor, "custom_domain:*", 7).await.unwrap();
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 25);
        assert!(store.scan_calls() > 1);
    }

    #[tokio::test]
    async fn scan_survives_deletes_behind_the_cursor() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.insert(format!("custom_domain:d{i}.test"), "o:r");
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let page = store.scan(cursor, "custom_domain:*", 2).await.unwrap();
            for key in page.keys {
                store.delete(&key).await.unwrap();
                seen.push(key);
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn deleted_keys_ahead_of_the_cursor_are_not_returned() {
        let store = MemoryStore::with_entries([("custom_domain:a", "x"), ("custom_domain:b", "x")]);
        let page = store.scan(0, "*", 1).await.unwrap();
        assert_eq!(page.keys, vec!["custom_domain:a"]);

        store.delete("custom_domain:b").await.unwrap();
        let page = store.scan(page.cursor, "*", 1).await.unwrap();
        assert!(page.keys.is_empty());
        assert_eq!(page.cursor, 0);
    }

    #[tokio::test]
    async fn repeated_key_comes_back_on_the_last_page() {
        let store = MemoryStore::with_entries([("custom_domain:a", "x"), ("custom_domain:b", "x")]);
        store.repeat_in_scan("custom_domain:a");

        let first = store.scan(0, "custom_domain:*", 1).await.unwrap();
        assert_eq!(first.keys, vec!["custom_domain:a"]);
        let last = store.scan(first.cursor, "custom_domain:*", 1).await.unwrap();
        assert_eq!(last.cursor, 0);
        assert_eq!(last.keys, vec!["custom_domain:b", "custom_domain:a"]);
    }
}
