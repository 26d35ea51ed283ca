//! Key-value store seam: scalar, hash-table and set operations.
//!
//! The deployment target is a per-party redis instance; that driver lives
//! behind this trait. [`MemoryKv`] is the in-process implementation used by
//! tests and the `memory` configuration type.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Capability set the session store needs from the KV.
///
/// All operations surface [`Error::Kv`]; the runtime treats these as
/// transient for the current iteration, never as fatal.
pub trait KvStore: Send + Sync {
    /// Stores a scalar value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Reads a scalar value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Deletes a scalar value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn del(&self, key: &str) -> Result<()>;

    /// Writes fields into the hash table `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn hput(&self, table: &str, entries: &[(String, String)]) -> Result<()>;

    /// Reads one field of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn hget(&self, table: &str, field: &str) -> Result<Option<String>>;

    /// Reads many fields of `table`, position-aligned with `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn hmget(&self, table: &str, fields: &[String]) -> Result<Vec<Option<String>>>;

    /// Removes one field of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn hdel(&self, table: &str, field: &str) -> Result<()>;

    /// Adds members to the set `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn sadd(&self, key: &str, members: &[String]) -> Result<()>;

    /// Membership tests, position-aligned with `members`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    fn scontains(&self, key: &str, members: &[String]) -> Result<Vec<bool>>;
}

#[derive(Debug, Default)]
struct MemoryKvInner {
    scalars: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-process [`KvStore`]. Clones share state, mirroring separate connections
/// to one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemoryKvInner>>,
}

impl MemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryKvInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Kv("memory kv lock poisoned".into()))
    }
}

impl KvStore for MemoryKv {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.scalars.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.scalars.get(key).cloned())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.lock()?.scalars.remove(key);
        Ok(())
    }

    fn hput(&self, table: &str, entries: &[(String, String)]) -> Result<()> {
        let mut inner = self.lock()?;
        let hash = inner.hashes.entry(table.to_owned()).or_default();
        for (field, value) in entries {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn hget(&self, table: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .hashes
            .get(table)
            .and_then(|hash| hash.get(field).cloned()))
    }

    fn hmget(&self, table: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let inner = self.lock()?;
        let hash = inner.hashes.get(table);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(field).cloned()))
            .collect())
    }

    fn hdel(&self, table: &str, field: &str) -> Result<()> {
        if let Some(hash) = self.lock()?.hashes.get_mut(table) {
            hash.remove(field);
        }
        Ok(())
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        let mut inner = self.lock()?;
        let set = inner.sets.entry(key.to_owned()).or_default();
        set.extend(members.iter().cloned());
        Ok(())
    }

    fn scontains(&self, key: &str, members: &[String]) -> Result<Vec<bool>> {
        let inner = self.lock()?;
        let set = inner.sets.get(key);
        Ok(members
            .iter()
            .map(|member| set.is_some_and(|s| s.contains(member)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let kv = MemoryKv::new();
        for i in 0..10 {
            kv.put(&format!("key-{i}"), &format!("val-{i}")).unwrap();
        }
        for i in 0..10 {
            assert_eq!(kv.get(&format!("key-{i}")).unwrap(), Some(format!("val-{i}")));
        }
        kv.del("key-3").unwrap();
        assert_eq!(kv.get("key-3").unwrap(), None);
    }

    #[test]
    fn test_hash_multi_get_preserves_gaps() {
        let kv = MemoryKv::new();
        let entries: Vec<(String, String)> = (0..6)
            .map(|i| (format!("mkey-{i}"), format!("mval-{i}")))
            .collect();
        kv.hput("test", &entries).unwrap();

        let probe: Vec<String> = ["mkey-1", "no-mkey-2", "mkey-3", "no-mkey-4", "mkey-5"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let found = kv.hmget("test", &probe).unwrap();
        assert_eq!(
            found,
            vec![
                Some("mval-1".to_owned()),
                None,
                Some("mval-3".to_owned()),
                None,
                Some("mval-5".to_owned()),
            ]
        );
    }

    #[test]
    fn test_sets_and_shared_clones() {
        let kv = MemoryKv::new();
        let other = kv.clone();
        kv.sadd("matched", &["a".to_owned(), "b".to_owned()]).unwrap();
        let flags = other
            .scontains("matched", &["a".to_owned(), "z".to_owned()])
            .unwrap();
        assert_eq!(flags, vec![true, false]);
    }
}
