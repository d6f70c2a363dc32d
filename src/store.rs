use crate::dirent::DirentRecord;
use crate::inode::InodeDataRecord;
use std::collections::BTreeMap;

/// Every inode-data record seen, grouped by inode number, in scan order.
#[derive(Debug, Default, Clone)]
pub struct InodeVersionStore {
    map: BTreeMap<u32, Vec<InodeDataRecord>>,
}

impl InodeVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: InodeDataRecord) {
        self.map.entry(record.ino).or_default().push(record);
    }

    /// Fragments of `ino` in the order they were scanned.
    pub fn fragments(&self, ino: u32) -> Option<&[InodeDataRecord]> {
        self.map.get(&ino).map(|v| v.as_slice())
    }

    pub fn contains(&self, ino: u32) -> bool {
        self.map.contains_key(&ino)
    }

    pub fn inodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.map.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[InodeDataRecord])> + '_ {
        self.map.iter().map(|(ino, v)| (*ino, v.as_slice()))
    }

    /// Number of distinct inodes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Record with the highest version for `ino`; it carries the most
    /// recent metadata (mode, size, times).
    pub fn latest(&self, ino: u32) -> Option<&InodeDataRecord> {
        self.map.get(&ino)?.iter().max_by_key(|r| r.version)
    }
}

/// The authoritative directory entry per target inode: highest version wins,
/// whatever the scan order.
#[derive(Debug, Default, Clone)]
pub struct DirentVersionStore {
    map: BTreeMap<u32, DirentRecord>,
}

impl DirentVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `record` if it is the first for its target or strictly newer than
    /// the one held. Returns whether it was kept.
    pub fn upsert(&mut self, record: DirentRecord) -> bool {
        match self.map.get(&record.target_ino) {
            Some(existing) if existing.version >= record.version => false,
            _ => {
                self.map.insert(record.target_ino, record);
                true
            }
        }
    }

    pub fn get(&self, ino: u32) -> Option<&DirentRecord> {
        self.map.get(&ino)
    }

    pub fn contains(&self, ino: u32) -> bool {
        self.map.contains_key(&ino)
    }

    pub fn inodes(&self) -> impl Iterator<Item = u32> + '_ {
        self.map.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &DirentRecord)> + '_ {
        self.map.iter().map(|(ino, d)| (*ino, d))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
