//! Write-back LRU cache of decoded nodes.
//!
//! The cache owns the [`NodeStore`]. Nodes are decoded on first access only;
//! nothing is preloaded. Modified nodes stay in memory until they are
//! evicted or the cache is flushed, and are written back in offset order.
//! A capacity of zero turns the cache off and every access goes straight to
//! the store.

use lru::LruCache;

use super::rtree_storage::NodeStore;
use super::rtree_types::{Node, NodeOffset, NodeRecord, SpatialError, SpatialResult};

/// A cached record with its dirty flag
struct CachedNode {
    record: NodeRecord,
    dirty: bool,
}

pub struct NodeCache {
    store: NodeStore,
    entries: LruCache<NodeOffset, CachedNode>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl NodeCache {
    pub fn new(store: NodeStore, capacity: usize) -> Self {
        Self {
            store,
            entries: LruCache::unbounded(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of decoded nodes currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Get the record at `offset`, loading it from the store on a miss
    pub fn get(&mut self, offset: NodeOffset) -> SpatialResult<NodeRecord> {
        if self.capacity == 0 {
            self.misses += 1;
            return self.store.read_record(offset);
        }

        if let Some(cached) = self.entries.get(&offset) {
            self.hits += 1;
            return Ok(cached.record.clone());
        }

        self.misses += 1;
        let record = self.store.read_record(offset)?;
        self.admit(offset, record.clone(), false)?;
        Ok(record)
    }

    /// Get a slot that must hold a live node
    pub fn get_node(&mut self, offset: NodeOffset) -> SpatialResult<Node> {
        match self.get(offset)? {
            NodeRecord::Node(node) if node.is_well_formed() => Ok(node),
            NodeRecord::Node(node) => Err(SpatialError::CorruptStore(format!(
                "node at offset {} has kind {:?} at level {}",
                offset, node.kind, node.level
            ))),
            NodeRecord::Free { .. } => Err(SpatialError::CorruptStore(format!(
                "offset {} refers to a freed node",
                offset
            ))),
        }
    }

    /// Replace the record at `offset`. The store sees it on eviction or flush.
    pub fn put(&mut self, offset: NodeOffset, record: NodeRecord) -> SpatialResult<()> {
        if self.capacity == 0 {
            return self.store.write_record(offset, &record);
        }

        if let Some(cached) = self.entries.get_mut(&offset) {
            cached.record = record;
            cached.dirty = true;
            return Ok(());
        }
        self.admit(offset, record, true)
    }

    /// Write every dirty node back in offset order, then flush the store.
    /// Nodes stay cached, now clean.
    pub fn flush(&mut self) -> SpatialResult<()> {
        let mut dirty: Vec<NodeOffset> = self
            .entries
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(offset, _)| *offset)
            .collect();
        dirty.sort_unstable();

        for offset in dirty {
            if let Some(cached) = self.entries.peek_mut(&offset) {
                self.store.write_record(offset, &cached.record)?;
                cached.dirty = false;
            }
        }
        self.store.flush()
    }

    /// Forget every cached node without writing anything back
    pub fn discard(&mut self) {
        self.entries.clear();
    }

    /// Change the capacity. Dirty nodes are written back first; shrinking
    /// evicts least recently used nodes.
    pub fn set_capacity(&mut self, capacity: usize) -> SpatialResult<()> {
        self.flush()?;
        self.capacity = capacity;
        while self.entries.len() > capacity {
            self.entries.pop_lru();
        }
        log::debug!("Node cache capacity set to {}", capacity);
        Ok(())
    }

    fn admit(&mut self, offset: NodeOffset, record: NodeRecord, dirty: bool) -> SpatialResult<()> {
        while self.entries.len() >= self.capacity {
            let Some((victim, cached)) = self.entries.pop_lru() else {
                break;
            };
            if cached.dirty {
                if let Err(e) = self.store.write_record(victim, &cached.record) {
                    // keep the only copy of the node
                    self.entries.push(victim, cached);
                    self.entries.demote(&victim);
                    return Err(e);
                }
            }
        }
        self.entries.push(offset, CachedNode { record, dirty });
        Ok(())
    }
}
