//! DiskRTree implementation.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::spatial_tree::{ElementIter, SpatialTree};

use super::element_mapper::ElementMapper;
use super::rtree_cache::NodeCache;
use super::rtree_config::{OpenMode, RTreeConfig};
use super::rtree_constants::ELEMENT_FILE_SUFFIX;
use super::rtree_ops::{check_tree, Mutation};
use super::rtree_storage::NodeStore;
use super::rtree_types::{
    ElementId, Entry, IntegrityReport, NodeOffset, RTreeStats, Rect, SpatialError, SpatialResult,
};

/// Anything that can be stored in the element mapper and recognized again
pub trait Element: Serialize + DeserializeOwned + PartialEq {}

impl<T> Element for T where T: Serialize + DeserializeOwned + PartialEq {}

/// A disk-resident R-tree indexing elements of type `E` by envelope.
///
/// Nodes live in the file at `path`; the identifier mapping for elements in
/// `<path>.elements`. Only nodes that an operation touches are decoded, and
/// at most `cache_capacity` of them are kept in memory.
///
/// All state sits behind one mutex: operations from several threads are
/// serialized, never interleaved.
pub struct DiskRTree<E> {
    inner: Mutex<Option<TreeState<E>>>,
    path: PathBuf,
}

struct TreeState<E> {
    cache: NodeCache,
    mapper: ElementMapper<E>,
    config: RTreeConfig,
}

#[derive(Clone, Copy)]
enum Match {
    Intersects,
    Contained,
}

impl Match {
    fn directory(&self, entry: &Rect, query: &Rect) -> bool {
        // a contained entry can sit below a child that only overlaps the query
        entry.intersects(query)
    }

    fn leaf(&self, entry: &Rect, query: &Rect) -> bool {
        match self {
            Match::Intersects => entry.intersects(query),
            Match::Contained => query.contains(entry),
        }
    }
}

impl<E: Element> DiskRTree<E> {
    /// Create a new, empty tree at `path`, replacing any existing file
    pub fn create(path: impl AsRef<Path>, config: RTreeConfig) -> SpatialResult<Self> {
        Self::with_mode(path, OpenMode::Create, config)
    }

    /// Open the tree stored at `path`
    pub fn open(path: impl AsRef<Path>, config: RTreeConfig) -> SpatialResult<Self> {
        Self::with_mode(path, OpenMode::Open, config)
    }

    /// Create or open a tree.
    ///
    /// When opening, the structural parameters stored in the file win over
    /// the ones in `config`; only the window length and cache capacity are
    /// taken from it.
    pub fn with_mode(
        path: impl AsRef<Path>,
        mode: OpenMode,
        config: RTreeConfig,
    ) -> SpatialResult<Self> {
        let path = path.as_ref();
        config.validate()?;
        let elements_path = element_path(path);

        let (store, mapper, config) = match mode {
            OpenMode::Create => {
                let store = NodeStore::create(path, &config)?;
                let mapper = ElementMapper::create(
                    &elements_path,
                    config.mapper_record_size(),
                    config.window_length(),
                )?;
                log::debug!(
                    "Created R-tree at {} ({} dimensions, {}..{} entries, {} split)",
                    path.display(),
                    config.dimensions(),
                    config.min_entries(),
                    config.max_entries(),
                    config.split_policy()
                );
                (store, mapper, config)
            }
            OpenMode::Open => {
                let store = NodeStore::open(path, &config)?;
                let config = config.reconcile(store.header());
                let mapper = ElementMapper::open(
                    &elements_path,
                    config.mapper_record_size(),
                    config.window_length(),
                )?;
                log::debug!(
                    "Opened R-tree at {} with {} elements, height {}",
                    path.display(),
                    store.header().element_count,
                    store.header().height
                );
                (store, mapper, config)
            }
        };

        let cache = NodeCache::new(store, config.cache_capacity());
        Ok(Self {
            inner: Mutex::new(Some(TreeState {
                cache,
                mapper,
                config,
            })),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index `element` under `envelope`.
    ///
    /// An element already indexed must be deleted first. An element that
    /// was deleted earlier gets its old identifier back.
    pub fn insert(&self, element: &E, envelope: &Envelope) -> SpatialResult<()> {
        self.with_state(|state| state.insert(element, envelope))
    }

    /// Remove `element` from the tree. Its identifier mapping is kept until
    /// [`DiskRTree::release`] is called.
    pub fn delete(&self, element: &E) -> SpatialResult<()> {
        self.with_state(|state| state.delete(element))
    }

    /// Drop the identifier mapping of an element that is no longer indexed
    pub fn release(&self, element: &E) -> SpatialResult<()> {
        self.with_state(|state| {
            let (id, rect) = state
                .mapper
                .find(|e| e == element)?
                .ok_or_else(|| SpatialError::NotFound("element is not mapped".into()))?;
            if rect.is_some() {
                return Err(SpatialError::Usage(
                    "element is still indexed; delete it before releasing".into(),
                ));
            }
            state.mapper.release(id)
        })
    }

    /// Lazily yield every element whose envelope intersects `envelope`.
    /// Each call starts a fresh walk from the root.
    pub fn search(&self, envelope: &Envelope) -> SpatialResult<Search<'_, E>> {
        self.start_search(envelope, Match::Intersects)
    }

    /// Lazily yield every element whose envelope lies inside `envelope`
    pub fn search_contained(&self, envelope: &Envelope) -> SpatialResult<Search<'_, E>> {
        self.start_search(envelope, Match::Contained)
    }

    /// Identifiers of all elements intersecting `envelope`
    pub fn find_intersecting_ids(&self, envelope: &Envelope) -> SpatialResult<Vec<ElementId>> {
        self.with_state(|state| {
            let query = state.check_envelope(envelope)?;
            state.collect_ids(&query, Match::Intersects)
        })
    }

    /// Identifiers of all elements contained in `envelope`
    pub fn find_contained_ids(&self, envelope: &Envelope) -> SpatialResult<Vec<ElementId>> {
        self.with_state(|state| {
            let query = state.check_envelope(envelope)?;
            state.collect_ids(&query, Match::Contained)
        })
    }

    /// Find the `k` elements nearest to `point`.
    ///
    /// Distance is the minimum Euclidean distance from the point to an
    /// element's envelope (zero inside it). Branches farther away than the
    /// current k-th candidate, or than `max_distance`, are pruned. Results
    /// are sorted nearest first.
    pub fn nearest(
        &self,
        point: &[f64],
        k: usize,
        max_distance: Option<f64>,
    ) -> SpatialResult<Vec<(E, f64)>> {
        self.with_state(|state| {
            if point.len() != state.config.dimensions() {
                return Err(SpatialError::Usage(format!(
                    "point has {} dimensions, tree has {}",
                    point.len(),
                    state.config.dimensions()
                )));
            }
            if point.iter().any(|c| !c.is_finite()) {
                return Err(SpatialError::Usage(format!(
                    "non-finite coordinate in point {:?}",
                    point
                )));
            }
            if k == 0 {
                return Ok(Vec::new());
            }

            let mut results = Vec::new();
            let mut bound = max_distance.unwrap_or(f64::INFINITY);
            let root = state.cache.store().header().root_offset;
            state.nearest_recursive(root, point, k, &mut results, &mut bound)?;

            results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            results.truncate(k);
            results
                .into_iter()
                .map(|(id, distance)| state.mapper.element_for(id).map(|e| (e, distance)))
                .collect()
        })
    }

    /// Remove every element and every identifier mapping
    pub fn clear(&self) -> SpatialResult<()> {
        self.with_state(|state| {
            state.cache.discard();
            state.cache.store_mut().reset()?;
            state.mapper.clear()?;
            log::debug!("Cleared R-tree at {}", self.path.display());
            Ok(())
        })
    }

    /// Write all dirty nodes, the header and the element mapper to disk
    pub fn flush(&self) -> SpatialResult<()> {
        self.with_state(|state| {
            state.cache.flush()?;
            state.mapper.flush()?;
            state.cache.store_mut().sync()?;
            state.mapper.sync()
        })
    }

    /// Flush everything and release the files. Every flush step is attempted
    /// even if an earlier one fails and the first failure is returned.
    /// Closing a closed tree does nothing.
    pub fn close(&self) -> SpatialResult<()> {
        let Some(state) = self.inner.lock().take() else {
            return Ok(());
        };

        let results = state.shutdown();
        log::debug!("Closed R-tree at {}", self.path.display());

        results.into_iter().collect::<SpatialResult<Vec<()>>>()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Resize the node cache. Dirty nodes are written back first; zero
    /// disables caching.
    pub fn set_cache_capacity(&self, capacity: usize) -> SpatialResult<()> {
        self.with_state(|state| {
            state.cache.set_capacity(capacity)?;
            state.config.set_cache_capacity(capacity);
            Ok(())
        })
    }

    /// Number of indexed elements (0 once closed)
    pub fn len(&self) -> u64 {
        self.inner
            .lock()
            .as_ref()
            .map(|state| state.cache.store().header().element_count)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of node levels, 1 for a tree whose root is a leaf
    pub fn height(&self) -> SpatialResult<u32> {
        self.with_state(|state| Ok(state.cache.store().header().height))
    }

    /// Envelope of everything indexed, `None` for an empty tree
    pub fn bounds(&self) -> SpatialResult<Option<Envelope>> {
        self.with_state(|state| {
            let root = state
                .cache
                .get_node(state.cache.store().header().root_offset)?;
            if root.is_empty() {
                return Ok(None);
            }
            let rect = root.compute_rect(state.config.dimensions());
            Ok(Some(Envelope::from_rect(
                rect,
                state.config.reference_system().map(str::to_string),
            )))
        })
    }

    /// Effective configuration; for a reopened tree the structural part
    /// comes from the file
    pub fn config(&self) -> SpatialResult<RTreeConfig> {
        self.with_state(|state| Ok(state.config.clone()))
    }

    pub fn stats(&self) -> SpatialResult<RTreeStats> {
        self.with_state(|state| {
            let header = state.cache.store().header();
            let (disk_reads, disk_writes) = state.cache.store().io_counts();
            Ok(RTreeStats {
                element_count: header.element_count,
                tree_height: header.height,
                node_count: header.live_nodes(),
                free_nodes: header.free_node_count,
                cached_nodes: state.cache.len() as u64,
                cache_hits: state.cache.hits(),
                cache_misses: state.cache.misses(),
                disk_reads,
                disk_writes,
                mapper_records: state.mapper.len(),
            })
        })
    }

    /// Walk the whole tree and verify its structure and its identifier
    /// mappings. Problems are reported, never repaired.
    pub fn check_integrity(&self) -> SpatialResult<IntegrityReport> {
        self.with_state(|state| {
            let mut report = check_tree(&mut state.cache);
            if !report.is_valid {
                return Ok(report);
            }

            let world = Rect::new(
                vec![f64::MIN; state.config.dimensions()],
                vec![f64::MAX; state.config.dimensions()],
            );
            for id in state.collect_ids(&world, Match::Intersects)? {
                match state.mapper.indexed_rect(id) {
                    Ok(Some(_)) => {}
                    Ok(None) => report.fail(format!("Element {} is in the tree but detached", id)),
                    Err(e) => report.fail(format!("Element {}: {}", id, e)),
                }
            }
            Ok(report)
        })
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut TreeState<E>) -> SpatialResult<R>,
    ) -> SpatialResult<R> {
        let mut guard = self.inner.lock();
        let state = guard.as_mut().ok_or_else(SpatialError::closed)?;
        f(state)
    }

    fn start_search(&self, envelope: &Envelope, mode: Match) -> SpatialResult<Search<'_, E>> {
        let (query, root) = self.with_state(|state| {
            let query = state.check_envelope(envelope)?;
            Ok((query, state.cache.store().header().root_offset))
        })?;
        Ok(Search {
            tree: self,
            query,
            mode,
            stack: vec![root],
            pending: VecDeque::new(),
            done: false,
        })
    }
}

impl<E> TreeState<E> {
    /// Write everything back and release the files, attempting every step
    fn shutdown(mut self) -> [SpatialResult<()>; 4] {
        [
            self.cache.flush(),
            self.mapper.flush(),
            self.cache.store_mut().sync(),
            self.mapper.sync(),
        ]
    }
}

impl<E: Element> TreeState<E> {
    /// Dimensions and reference system of a caller envelope must match the tree
    fn check_envelope(&self, envelope: &Envelope) -> SpatialResult<Rect> {
        if envelope.dimensions() != self.config.dimensions() {
            return Err(SpatialError::Usage(format!(
                "envelope has {} dimensions, tree has {}",
                envelope.dimensions(),
                self.config.dimensions()
            )));
        }
        if let (Some(given), Some(tree)) =
            (envelope.reference_system(), self.config.reference_system())
        {
            if given != tree {
                return Err(SpatialError::Usage(format!(
                    "envelope reference system {} differs from tree reference system {}",
                    given, tree
                )));
            }
        }
        // envelopes built with new_2d or deserialized skip Envelope::new
        envelope.validate()?;
        Ok(envelope.to_rect())
    }

    fn insert(&mut self, element: &E, envelope: &Envelope) -> SpatialResult<()> {
        let rect = self.check_envelope(envelope)?;

        let (id, fresh) = match self.mapper.find(|e| e == element)? {
            Some((_, Some(_))) => {
                return Err(SpatialError::Usage(
                    "element is already indexed; delete it first".into(),
                ))
            }
            Some((id, None)) => (id, false),
            None => (self.mapper.next_id(), true),
        };

        let mut mutation = Mutation::new(&mut self.cache);
        mutation.insert(Entry {
            rect: rect.clone(),
            pointer: id,
        })?;
        mutation.header_mut().element_count += 1;

        if fresh {
            self.mapper.assign(element, Some(&rect))?;
        } else {
            self.mapper.set_indexed_rect(id, Some(&rect))?;
        }

        if let Err(e) = mutation.commit() {
            let revert = if fresh {
                self.mapper.release(id)
            } else {
                self.mapper.set_indexed_rect(id, None)
            };
            if let Err(revert_err) = revert {
                log::error!("Failed to revert mapping of element {}: {}", id, revert_err);
            }
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, element: &E) -> SpatialResult<()> {
        let (id, rect) = self
            .mapper
            .find(|e| e == element)?
            .ok_or_else(|| SpatialError::NotFound("element is not mapped".into()))?;
        let rect = rect.ok_or_else(|| SpatialError::NotFound("element is not indexed".into()))?;

        let mut mutation = Mutation::new(&mut self.cache);
        if !mutation.delete(&rect, id)? {
            return Err(SpatialError::CorruptStore(format!(
                "element {} is mapped but missing from the tree",
                id
            )));
        }
        let count = &mut mutation.header_mut().element_count;
        *count = count.saturating_sub(1);

        self.mapper.set_indexed_rect(id, None)?;
        if let Err(e) = mutation.commit() {
            if let Err(revert_err) = self.mapper.set_indexed_rect(id, Some(&rect)) {
                log::error!("Failed to revert mapping of element {}: {}", id, revert_err);
            }
            return Err(e);
        }
        Ok(())
    }

    fn collect_ids(&mut self, query: &Rect, mode: Match) -> SpatialResult<Vec<ElementId>> {
        let mut results = Vec::new();
        let mut stack = vec![self.cache.store().header().root_offset];
        while let Some(offset) = stack.pop() {
            expand_node(&mut self.cache, offset, query, mode, &mut stack, &mut results)?;
        }
        Ok(results)
    }

    fn nearest_recursive(
        &mut self,
        offset: NodeOffset,
        point: &[f64],
        k: usize,
        results: &mut Vec<(ElementId, f64)>,
        bound: &mut f64,
    ) -> SpatialResult<()> {
        let node = self.cache.get_node(offset)?;

        if node.is_leaf() {
            for entry in node.entries {
                let distance = entry.rect.min_distance(point);
                if distance <= *bound {
                    results.push((entry.pointer, distance));

                    // keep k candidates; the k-th distance becomes the new bound
                    if results.len() > k {
                        results.sort_by(|a, b| {
                            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
                        });
                        results.truncate(k);
                        if let Some((_, kth)) = results.last() {
                            *bound = *kth;
                        }
                    }
                }
            }
            return Ok(());
        }

        let mut candidates: Vec<(NodeOffset, f64)> = node
            .entries
            .iter()
            .map(|e| (e.pointer, e.rect.min_distance(point)))
            .collect();
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (child, distance) in candidates {
            if distance > *bound {
                continue;
            }
            self.nearest_recursive(child, point, k, results, bound)?;
        }
        Ok(())
    }
}

/// Visit one node: queue matching children, collect matching leaf identifiers
fn expand_node(
    cache: &mut NodeCache,
    offset: NodeOffset,
    query: &Rect,
    mode: Match,
    stack: &mut Vec<NodeOffset>,
    found: &mut impl Extend<ElementId>,
) -> SpatialResult<()> {
    let node = cache.get_node(offset)?;
    if node.is_leaf() {
        found.extend(
            node.entries
                .iter()
                .filter(|e| mode.leaf(&e.rect, query))
                .map(|e| e.pointer),
        );
    } else {
        // reversed so children pop in stored order
        stack.extend(
            node.entries
                .iter()
                .rev()
                .filter(|e| mode.directory(&e.rect, query))
                .map(|e| e.pointer),
        );
    }
    Ok(())
}

fn element_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(ELEMENT_FILE_SUFFIX);
    PathBuf::from(name)
}

// ============================================================================
// Lazy search
// ============================================================================

/// Lazy sequence of elements produced by [`DiskRTree::search`].
///
/// The iterator holds no lock between items: each `next` locks the tree,
/// decodes as many nodes as it needs for one element and releases it
/// again. A search interleaved with inserts or deletes may miss or repeat
/// elements; [`DiskRTree::find_intersecting_ids`] answers under a single
/// lock. After the first error the iterator is exhausted.
pub struct Search<'a, E> {
    tree: &'a DiskRTree<E>,
    query: Rect,
    mode: Match,
    stack: Vec<NodeOffset>,
    pending: VecDeque<ElementId>,
    done: bool,
}

impl<E: Element> Search<'_, E> {
    fn step(&mut self) -> SpatialResult<Option<E>> {
        let mut guard = self.tree.inner.lock();
        let state = guard.as_mut().ok_or_else(SpatialError::closed)?;

        loop {
            if let Some(id) = self.pending.pop_front() {
                return state.mapper.element_for(id).map(Some);
            }
            let Some(offset) = self.stack.pop() else {
                return Ok(None);
            };
            expand_node(
                &mut state.cache,
                offset,
                &self.query,
                self.mode,
                &mut self.stack,
                &mut self.pending,
            )?;
        }
    }
}

impl<E: Element> Iterator for Search<'_, E> {
    type Item = SpatialResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<E: Element> std::iter::FusedIterator for Search<'_, E> {}

// ============================================================================
// SpatialTree Trait Implementation
// ============================================================================

impl<E: Element> SpatialTree<E> for DiskRTree<E> {
    fn insert(&self, element: &E, envelope: &Envelope) -> SpatialResult<()> {
        DiskRTree::insert(self, element, envelope)
    }

    fn search<'a>(&'a self, envelope: &Envelope) -> SpatialResult<ElementIter<'a, E>> {
        Ok(Box::new(DiskRTree::search(self, envelope)?))
    }

    fn delete(&self, element: &E) -> SpatialResult<()> {
        DiskRTree::delete(self, element)
    }

    fn len(&self) -> u64 {
        DiskRTree::len(self)
    }

    fn close(&self) -> SpatialResult<()> {
        DiskRTree::close(self)
    }

    fn clear(&self) -> SpatialResult<()> {
        DiskRTree::clear(self)
    }
}

// ============================================================================
// Drop Implementation
// ============================================================================

impl<E> Drop for DiskRTree<E> {
    fn drop(&mut self) {
        let Some(state) = self.inner.get_mut().take() else {
            return;
        };
        for result in state.shutdown() {
            if let Err(e) = result {
                log::error!("Failed to close R-tree at {}: {}", self.path.display(), e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
