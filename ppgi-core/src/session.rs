//! Typed view of the KV for per-session cryptographic state.
//!
//! Namespaces:
//! * `rand` — session key → JSON list of blinding factors. An entry exists
//!   iff an unblinding is still pending for that session.
//! * `origin_data` — session key → JSON list of the identifiers the client
//!   blinded in that session.
//! * `hash_id_map` — final digest → original identifier. Global across
//!   sessions and grown monotonically.
//! * `matched_data` — set of identifiers confirmed as intersected.
//!
//! Digest bytes are base64-encoded before use as hash fields, since the KV
//! seam is typed over UTF-8 strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use num_bigint_dig::BigUint;

use crate::error::{Error, Result};
use crate::kv::KvStore;

const RAND_TABLE: &str = "rand";
const ORIGIN_TABLE: &str = "origin_data";
const HASH_ID_TABLE: &str = "hash_id_map";
const MATCHED_SET: &str = "matched_data";

/// Per-session state persisted through a [`KvStore`].
#[derive(Debug, Clone)]
pub struct SessionStore<K> {
    kv: K,
}

impl<K: KvStore> SessionStore<K> {
    /// Wraps a KV connection.
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Persists the blinding factors drawn for `session_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn store_blinding_factors(&self, session_key: &str, factors: &[BigUint]) -> Result<()> {
        let encoded: Vec<String> = factors
            .iter()
            .map(|r| BASE64.encode(r.to_bytes_be()))
            .collect();
        let value = serde_json::to_string(&encoded)
            .map_err(|e| Error::Kv(format!("encode blinding factors: {e}")))?;
        self.kv
            .hput(RAND_TABLE, &[(session_key.to_owned(), value)])
    }

    /// Loads the blinding factors for `session_key`, or `None` when no
    /// unblinding is pending for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable or the entry is
    /// corrupt.
    pub fn blinding_factors(&self, session_key: &str) -> Result<Option<Vec<BigUint>>> {
        let Some(value) = self.kv.hget(RAND_TABLE, session_key)? else {
            return Ok(None);
        };
        let encoded: Vec<String> = serde_json::from_str(&value)
            .map_err(|e| Error::Kv(format!("decode blinding factors: {e}")))?;
        let factors = encoded
            .iter()
            .map(|item| {
                BASE64
                    .decode(item)
                    .map(|bytes| BigUint::from_bytes_be(&bytes))
                    .map_err(|e| Error::Kv(format!("decode blinding factor: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(factors))
    }

    /// Drops the blinding factors of a completed session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn delete_blinding_factors(&self, session_key: &str) -> Result<()> {
        self.kv.hdel(RAND_TABLE, session_key)
    }

    /// Persists the identifiers blinded in `session_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn store_origin_ids(&self, session_key: &str, ids: &[String]) -> Result<()> {
        let value = serde_json::to_string(ids)
            .map_err(|e| Error::Kv(format!("encode origin ids: {e}")))?;
        self.kv
            .hput(ORIGIN_TABLE, &[(session_key.to_owned(), value)])
    }

    /// Loads the identifiers blinded in `session_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable or the entry is
    /// corrupt.
    pub fn origin_ids(&self, session_key: &str) -> Result<Option<Vec<String>>> {
        let Some(value) = self.kv.hget(ORIGIN_TABLE, session_key)? else {
            return Ok(None);
        };
        serde_json::from_str(&value)
            .map(Some)
            .map_err(|e| Error::Kv(format!("decode origin ids: {e}")))
    }

    /// Records `digest → identifier` pairs in the global lookup. Extra
    /// digests without a pairing identifier are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn record_hash_ids(&self, digests: &[Vec<u8>], ids: &[String]) -> Result<()> {
        let entries: Vec<(String, String)> = digests
            .iter()
            .zip(ids)
            .map(|(digest, id)| (BASE64.encode(digest), id.clone()))
            .collect();
        self.kv.hput(HASH_ID_TABLE, &entries)
    }

    /// Looks up the identifiers behind received digests, position-aligned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn ids_for_digests(&self, digests: &[Vec<u8>]) -> Result<Vec<Option<String>>> {
        let fields: Vec<String> = digests.iter().map(|d| BASE64.encode(d)).collect();
        self.kv.hmget(HASH_ID_TABLE, &fields)
    }

    /// Adds identifiers confirmed by the intersection protocol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn record_matched(&self, ids: &[String]) -> Result<()> {
        self.kv.sadd(MATCHED_SET, ids)
    }

    /// Membership tests against the matched set, position-aligned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kv`] when the store is unreachable.
    pub fn check_matched(&self, ids: &[String]) -> Result<Vec<bool>> {
        self.kv.scontains(MATCHED_SET, ids)
    }
}
