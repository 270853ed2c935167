//! Inode table: bidirectional map between kernel inode numbers and
//! projection entries.
//!
//! Besides graph nodes, the table addresses the synthetic `/.query`
//! tree, whose entries exist only while the mount is up.

use std::collections::HashMap;

/// What an inode number points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InodeKey {
    /// A graph node by id ("" is the root).
    Node(String),
    /// The `/.query` directory.
    QueryRoot,
    /// A `/.query/<token>` result directory.
    Query(String),
    /// One result row file under `/.query/<token>/`.
    QueryRow { token: String, name: String },
}

/// The root inode (always the graph root).
pub const ROOT_INO: u64 = 1;

pub struct InodeTable {
    by_ino: HashMap<u64, InodeKey>,
    by_key: HashMap<InodeKey, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            by_ino: HashMap::new(),
            by_key: HashMap::new(),
            next: ROOT_INO + 1,
        };
        table
            .by_ino
            .insert(ROOT_INO, InodeKey::Node(String::new()));
        table.by_key.insert(InodeKey::Node(String::new()), ROOT_INO);
        table
    }

    /// Existing inode for a key, or a freshly assigned one.
    pub fn get_or_assign(&mut self, key: InodeKey) -> u64 {
        if let Some(&ino) = self.by_key.get(&key) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(ino, key.clone());
        self.by_key.insert(key, ino);
        ino
    }

    pub fn get(&self, ino: u64) -> Option<&InodeKey> {
        self.by_ino.get(&ino)
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
