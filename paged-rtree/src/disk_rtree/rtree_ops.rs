//! Insert and delete algorithms.
//!
//! A [`Mutation`] collects every node it touches in a private write set and
//! works on a copy of the header. Reads consult the write set before the
//! cache, so the algorithms see their own changes. Nothing reaches the
//! cache until [`Mutation::commit`]; dropping a mutation that failed halfway
//! leaves the tree exactly as it was.

use std::collections::{BTreeMap, VecDeque};

use super::rtree_cache::NodeCache;
use super::rtree_types::{
    Entry, FileHeader, IntegrityReport, Node, NodeOffset, NodeRecord, Rect, SpatialError,
    SpatialResult,
};
use super::split::SplitStrategy;

pub(crate) struct Mutation<'a> {
    cache: &'a mut NodeCache,
    header: FileHeader,
    staged: BTreeMap<NodeOffset, NodeRecord>,
    dimensions: usize,
    max_entries: usize,
    min_entries: usize,
    strategy: &'static dyn SplitStrategy,
}

impl<'a> Mutation<'a> {
    pub fn new(cache: &'a mut NodeCache) -> Self {
        let header = cache.store().header().clone();
        Self {
            dimensions: header.dimensions as usize,
            max_entries: header.max_entries as usize,
            min_entries: header.min_entries as usize,
            strategy: header.split_policy.strategy(),
            header,
            staged: BTreeMap::new(),
            cache,
        }
    }

    pub fn header_mut(&mut self) -> &mut FileHeader {
        &mut self.header
    }

    /// Publish the write set and header to the cache
    pub fn commit(self) -> SpatialResult<()> {
        let root_changed = self.header.root_offset != self.cache.store().header().root_offset;
        for (offset, record) in self.staged {
            self.cache.put(offset, record)?;
        }
        if root_changed {
            log::debug!(
                "Root moved to offset {} at height {}",
                self.header.root_offset,
                self.header.height
            );
        }
        self.cache.store_mut().set_header(self.header);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Add a leaf entry
    pub fn insert(&mut self, entry: Entry) -> SpatialResult<()> {
        self.insert_at_level(entry, 0)
    }

    /// Place `entry` into a node at `level`, splitting upward as needed
    fn insert_at_level(&mut self, entry: Entry, level: u32) -> SpatialResult<()> {
        let mut path = Vec::new();
        let mut offset = self.header.root_offset;
        let mut node = self.read_node(offset)?;

        while node.level > level {
            let idx = choose_subtree(&node.entries, &entry.rect);
            path.push((offset, idx));
            offset = node.entries[idx].pointer;
            node = self.read_node(offset)?;
        }
        if node.level != level {
            return Err(SpatialError::Invariant(format!(
                "descent for level {} stopped at node {} on level {}",
                level, offset, node.level
            )));
        }

        node.entries.push(entry);
        self.adjust_tree(offset, node, path)
    }

    /// Write `node` back, splitting it if it overflows, and walk the path up
    /// to the root recomputing every ancestor rectangle.
    fn adjust_tree(
        &mut self,
        mut offset: NodeOffset,
        mut node: Node,
        mut path: Vec<(NodeOffset, usize)>,
    ) -> SpatialResult<()> {
        loop {
            let sibling = if node.len() > self.max_entries {
                Some(self.split(&mut node)?)
            } else {
                None
            };
            let rect = node.compute_rect(self.dimensions);
            let level = node.level;
            self.write(offset, node);

            match path.pop() {
                Some((parent_offset, idx)) => {
                    let mut parent = self.read_node(parent_offset)?;
                    parent.entries[idx].rect = rect;
                    if let Some(sibling) = sibling {
                        parent.entries.push(sibling);
                    }
                    offset = parent_offset;
                    node = parent;
                }
                None => {
                    if let Some(sibling) = sibling {
                        self.grow_root(Entry { rect, pointer: offset }, sibling, level)?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Split an overflowing node in place. Returns the entry for the new sibling.
    fn split(&mut self, node: &mut Node) -> SpatialResult<Entry> {
        let entries = std::mem::take(&mut node.entries);
        let (kept, moved) = self.strategy.split(entries, self.min_entries)?;
        if kept.is_empty() || moved.is_empty() {
            return Err(SpatialError::Invariant("split produced an empty partition".into()));
        }
        node.entries = kept;

        let sibling = Node {
            kind: node.kind,
            level: node.level,
            entries: moved,
        };
        let offset = self.allocate()?;
        let rect = sibling.compute_rect(self.dimensions);
        log::debug!(
            "Split node on level {} into {} + {} entries, new node at {}",
            node.level,
            node.len(),
            sibling.len(),
            offset
        );
        self.write(offset, sibling);
        Ok(Entry { rect, pointer: offset })
    }

    fn grow_root(&mut self, old_root: Entry, sibling: Entry, level: u32) -> SpatialResult<()> {
        let offset = self.allocate()?;
        self.write(offset, Node::directory(level + 1, vec![old_root, sibling]));
        self.header.root_offset = offset;
        self.header.height += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove the leaf entry `(rect, id)` and condense the tree. Returns
    /// false when no such entry exists.
    pub fn delete(&mut self, rect: &Rect, id: u64) -> SpatialResult<bool> {
        let mut path = Vec::new();
        if !self.find_leaf(self.header.root_offset, rect, id, &mut path)? {
            return Ok(false);
        }

        let Some((leaf_offset, idx)) = path.pop() else {
            return Ok(false);
        };
        let mut leaf = self.read_node(leaf_offset)?;
        leaf.entries.remove(idx);
        self.condense(leaf_offset, leaf, path)?;
        Ok(true)
    }

    /// Depth-first search for the leaf holding `(rect, id)`, only entering
    /// subtrees whose rectangle contains `rect`. On success `path` ends with
    /// the leaf and the entry position inside it.
    fn find_leaf(
        &mut self,
        offset: NodeOffset,
        rect: &Rect,
        id: u64,
        path: &mut Vec<(NodeOffset, usize)>,
    ) -> SpatialResult<bool> {
        let node = self.read_node(offset)?;

        if node.is_leaf() {
            if let Some(idx) = node
                .entries
                .iter()
                .position(|e| e.pointer == id && e.rect == *rect)
            {
                path.push((offset, idx));
                return Ok(true);
            }
            return Ok(false);
        }

        for (idx, entry) in node.entries.iter().enumerate() {
            if entry.rect.contains(rect) {
                path.push((offset, idx));
                if self.find_leaf(entry.pointer, rect, id, path)? {
                    return Ok(true);
                }
                path.pop();
            }
        }
        Ok(false)
    }

    fn condense(
        &mut self,
        mut offset: NodeOffset,
        mut node: Node,
        mut path: Vec<(NodeOffset, usize)>,
    ) -> SpatialResult<()> {
        let mut orphans: Vec<(u32, Entry)> = Vec::new();

        while let Some((parent_offset, idx)) = path.pop() {
            let mut parent = self.read_node(parent_offset)?;
            if node.len() < self.min_entries {
                let level = node.level;
                orphans.extend(node.entries.into_iter().map(|e| (level, e)));
                self.free(offset);
                parent.entries.remove(idx);
            } else {
                parent.entries[idx].rect = node.compute_rect(self.dimensions);
                self.write(offset, node);
            }
            offset = parent_offset;
            node = parent;
        }

        // `node` is the root now
        if !node.is_leaf() && node.is_empty() {
            node = Node::leaf(Vec::new());
            self.header.height = 1;
        }
        self.write(offset, node);

        self.reinsert(orphans)?;
        self.shorten_root()
    }

    /// Put orphaned entries back, highest level first. An entry from a level
    /// the tree no longer reaches is dissolved into its child's entries.
    fn reinsert(&mut self, mut orphans: Vec<(u32, Entry)>) -> SpatialResult<()> {
        if orphans.is_empty() {
            return Ok(());
        }
        log::debug!("Reinserting {} orphaned entries", orphans.len());

        orphans.sort_by(|a, b| b.0.cmp(&a.0));
        let mut queue: VecDeque<(u32, Entry)> = orphans.into();

        while let Some((level, entry)) = queue.pop_front() {
            let root_level = self.header.height - 1;
            if level <= root_level {
                self.insert_at_level(entry, level)?;
            } else {
                let child = self.read_node(entry.pointer)?;
                self.free(entry.pointer);
                queue.extend(child.entries.into_iter().map(|e| (level - 1, e)));
            }
        }
        Ok(())
    }

    /// Replace a directory root with a single child by that child
    fn shorten_root(&mut self) -> SpatialResult<()> {
        loop {
            let root = self.read_node(self.header.root_offset)?;
            if root.is_leaf() || root.len() != 1 {
                return Ok(());
            }
            let old = self.header.root_offset;
            self.header.root_offset = root.entries[0].pointer;
            self.header.height -= 1;
            self.free(old);
        }
    }

    // ------------------------------------------------------------------
    // Node access and allocation
    // ------------------------------------------------------------------

    fn read_record(&mut self, offset: NodeOffset) -> SpatialResult<NodeRecord> {
        match self.staged.get(&offset) {
            Some(record) => Ok(record.clone()),
            None => self.cache.get(offset),
        }
    }

    fn read_node(&mut self, offset: NodeOffset) -> SpatialResult<Node> {
        match self.read_record(offset)? {
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

    fn write(&mut self, offset: NodeOffset, node: Node) {
        self.staged.insert(offset, NodeRecord::Node(node));
    }

    /// Take a slot from the free chain, or a fresh one at the end of the file
    fn allocate(&mut self) -> SpatialResult<NodeOffset> {
        let head = self.header.free_list_head;
        if head == 0 {
            let offset = self.header.node_offset(self.header.next_node_id);
            self.header.next_node_id += 1;
            return Ok(offset);
        }

        match self.read_record(head)? {
            NodeRecord::Free { next_free } => {
                self.header.free_list_head = next_free;
                self.header.free_node_count -= 1;
                Ok(head)
            }
            NodeRecord::Node(_) => Err(SpatialError::CorruptStore(format!(
                "free list head {} holds a live node",
                head
            ))),
        }
    }

    fn free(&mut self, offset: NodeOffset) {
        self.staged.insert(
            offset,
            NodeRecord::Free {
                next_free: self.header.free_list_head,
            },
        );
        self.header.free_list_head = offset;
        self.header.free_node_count += 1;
    }
}

/// Child needing the least enlargement, ties broken by smallest resulting area
fn choose_subtree(entries: &[Entry], rect: &Rect) -> usize {
    let mut best_idx = 0;
    let mut best_enlargement = f64::INFINITY;
    let mut best_area = f64::INFINITY;

    for (i, entry) in entries.iter().enumerate() {
        let merged = entry.rect.merge(rect).area();
        // areas near the f64 range overflow; inf - inf must not win or poison ties
        let enlargement = match merged - entry.rect.area() {
            e if e.is_nan() => f64::INFINITY,
            e => e,
        };

        if enlargement < best_enlargement
            || (enlargement == best_enlargement && merged < best_area)
        {
            best_enlargement = enlargement;
            best_area = merged;
            best_idx = i;
        }
    }
    best_idx
}

// ============================================================================
// Integrity walk
// ============================================================================

/// Walk every reachable node and verify the structural invariants: level
/// consistency, fill bounds for non-root nodes, exact directory rectangles,
/// element count and live node count against the header.
pub(crate) fn check_tree(cache: &mut NodeCache) -> IntegrityReport {
    let header = cache.store().header().clone();
    let mut report = IntegrityReport::new();

    if let Err(e) = header.validate() {
        report.fail(format!("Invalid header: {}", e));
        return report;
    }

    let mut stack = vec![(header.root_offset, header.height - 1, None::<Rect>)];
    while let Some((offset, expected_level, expected_rect)) = stack.pop() {
        let node = match cache.get_node(offset) {
            Ok(node) => node,
            Err(e) => {
                report.fail(format!("Node {}: {}", offset, e));
                continue;
            }
        };
        report.nodes_checked += 1;

        if node.level != expected_level {
            report.fail(format!(
                "Node {} is on level {}, expected {}",
                offset, node.level, expected_level
            ));
        }
        let is_root = offset == header.root_offset;
        if node.len() > header.max_entries as usize
            || (!is_root && node.len() < header.min_entries as usize)
        {
            report.fail(format!(
                "Node {} holds {} entries, allowed {}..={}",
                offset,
                node.len(),
                header.min_entries,
                header.max_entries
            ));
        }
        if let Some(expected) = expected_rect {
            let actual = node.compute_rect(header.dimensions as usize);
            if actual != expected {
                report.fail(format!(
                    "Node {} is bounded by {:?} but its parent records {:?}",
                    offset, actual, expected
                ));
            }
        }

        if node.is_leaf() {
            report.elements_found += node.len() as u64;
        } else if node.level > 0 {
            for entry in node.entries {
                stack.push((entry.pointer, node.level - 1, Some(entry.rect)));
            }
        }
    }

    if report.elements_found != header.element_count {
        report.fail(format!(
            "Found {} elements, header records {}",
            report.elements_found, header.element_count
        ));
    }
    if report.nodes_checked != header.live_nodes() {
        report.fail(format!(
            "Reached {} nodes, header accounts for {}",
            report.nodes_checked,
            header.live_nodes()
        ));
    }
    report
}
