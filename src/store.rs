//! In-memory key spaces
//!
//! Two independent maps, each behind its own `RwLock`: the scalar space for
//! SET/GET/DEL/EXISTS/INCR and the hash space for HSET/HGET/HGETALL. A
//! writer on one space never blocks readers or writers of the other.
//! Mutation goes through the engine; everything public here is read-only.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub type Scalars = HashMap<Bytes, Bytes>;
pub type Hash = HashMap<Bytes, Bytes>;
pub type Hashes = HashMap<Bytes, Hash>;

/// The state a command engine owns
#[derive(Debug, Default)]
pub struct KeySpaces {
    pub(crate) scalars: RwLock<Scalars>,
    pub(crate) hashes: RwLock<Hashes>,
}

impl KeySpaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the scalar space
    pub async fn scalar_len(&self) -> usize {
        self.scalars.read().await.len()
    }

    /// Number of keys in the hash space
    pub async fn hash_len(&self) -> usize {
        self.hashes.read().await.len()
    }

    /// All scalar pairs, sorted by key.
    pub async fn scalar_entries(&self) -> Vec<(Bytes, Bytes)> {
        let scalars = self.scalars.read().await;
        let mut entries: Vec<_> = scalars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// All hashes with their fields, sorted by key then field.
    pub async fn hash_entries(&self) -> Vec<(Bytes, Vec<(Bytes, Bytes)>)> {
        let hashes = self.hashes.read().await;
        let mut entries: Vec<_> = hashes
            .iter()
            .map(|(key, hash)| {
                let mut fields: Vec<_> = hash
                    .iter()
                    .map(|(f, v)| (f.clone(), v.clone()))
                    .collect();
                fields.sort();
                (key.clone(), fields)
            })
            .collect();
        entries.sort();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_are_sorted() {
        let spaces = KeySpaces::new();
        {
            let mut scalars = spaces.scalars.write().await;
            scalars.insert(Bytes::from("b"), Bytes::from("2"));
            scalars.insert(Bytes::from("a"), Bytes::from("1"));
        }
        {
            let mut hashes = spaces.hashes.write().await;
            let user = hashes.entry(Bytes::from("user")).or_default();
            user.insert(Bytes::from("name"), Bytes::from("ada"));
            user.insert(Bytes::from("age"), Bytes::from("36"));
        }

        assert_eq!(
            spaces.scalar_entries().await,
            vec![
                (Bytes::from("a"), Bytes::from("1")),
                (Bytes::from("b"), Bytes::from("2")),
            ]
        );
        assert_eq!(
            spaces.hash_entries().await,
            vec![(
                Bytes::from("user"),
                vec![
                    (Bytes::from("age"), Bytes::from("36")),
                    (Bytes::from("name"), Bytes::from("ada")),
                ]
            )]
        );
        assert_eq!(spaces.scalar_len().await, 2);
        assert_eq!(spaces.hash_len().await, 1);
    }

    #[tokio::test]
    async fn test_spaces_lock_independently() {
        let spaces = KeySpaces::new();
        let _scalar_writer = spaces.scalars.write().await;
        // A held scalar write lock must not stall the hash space.
        let hashes = spaces.hashes.try_write();
        assert!(hashes.is_ok());
    }
}
