//! Record Functions
//!
//! Entries are opaque to the tree. When a tree is written to disk each entry is split into a key,
//! which lives in the structure file, and a payload, which lives in the data file. [`Record`]
//! describes how to perform that split and how to put an entry back together.

use std::borrow::Borrow;
use std::cmp::Ordering;

use anyhow::Result;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::BINCODER;

/// Entries which can be written to (and read from) a structure file and data file pair.
pub trait Record: Ord + Sized {
    /// The key portion of an entry, as recovered from the structure file.
    type Key;

    /// Append the serialized key of this entry to `buf`.
    fn serialize_key(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Rebuild the key portion of an entry from the bytes written by `serialize_key`.
    fn deserialize_key(buf: &[u8]) -> Result<Self::Key>;

    /// Append the serialized payload of this entry to `buf`.
    fn serialize_payload(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Complete an entry from its key and the bytes written by `serialize_payload`.
    fn deserialize_payload(key: Self::Key, buf: &[u8]) -> Result<Self>;
}

/// A key and value stored together. Ordering and equality only consider the key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pair<K, V> {
    /// Key
    pub key: K,
    /// Value
    pub value: V,
}

impl<K, V> Pair<K, V> {
    /// Create a new pair.
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Split the pair into its key and value.
    pub fn into_inner(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: Ord, V> PartialOrd for Pair<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Ord for Pair<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl<K: Ord, V> PartialEq for Pair<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<K: Ord, V> Eq for Pair<K, V> {}

// Allows a tree of pairs to be searched by key alone
impl<K, V> Borrow<K> for Pair<K, V> {
    fn borrow(&self) -> &K {
        &self.key
    }
}

impl<K, V> Record for Pair<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    type Key = K;

    fn serialize_key(&self, buf: &mut Vec<u8>) -> Result<()> {
        BINCODER.serialize_into(buf, &self.key)?;
        Ok(())
    }

    fn deserialize_key(buf: &[u8]) -> Result<K> {
        BINCODER.deserialize(buf).map_err(|e| e.into())
    }

    fn serialize_payload(&self, buf: &mut Vec<u8>) -> Result<()> {
        BINCODER.serialize_into(buf, &self.value)?;
        Ok(())
    }

    fn deserialize_payload(key: K, buf: &[u8]) -> Result<Self> {
        let value = BINCODER.deserialize(buf)?;
        Ok(Self { key, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_orders_pairs_by_key() {
        let a = Pair::new("a".to_string(), 9usize);
        let b = Pair::new("b".to_string(), 1usize);
        assert!(a < b);
        assert_eq!(a, Pair::new("a".to_string(), 100));
    }

    #[test]
    fn it_serializes_pair() {
        let pair = Pair::new("this".to_string(), "that".to_string());
        let mut key = vec![];
        let mut payload = vec![];
        pair.serialize_key(&mut key).expect("serializes key");
        pair.serialize_payload(&mut payload).expect("serializes payload");

        let new_key = Pair::<String, String>::deserialize_key(&key).expect("deserializes key");
        let new_pair = Pair::<String, String>::deserialize_payload(new_key, &payload)
            .expect("deserializes payload");
        assert_eq!(new_pair.key, "this");
        assert_eq!(new_pair.value, "that");
    }

    #[test]
    fn it_rejects_truncated_payload() {
        let pair = Pair::new(7u64, "a longer value".to_string());
        let mut payload = vec![];
        pair.serialize_payload(&mut payload).expect("serializes payload");
        payload.truncate(3);
        assert!(Pair::<u64, String>::deserialize_payload(7, &payload).is_err());
    }
}
