//! Core types and data structures for the disk-resident R-Tree.
//!
//! This module defines the fundamental types used throughout the R-Tree:
//! - Error types and result types
//! - Bounding rectangles, entries and nodes (Leaf and Directory)
//! - Statistics and integrity report structures
//! - File header

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use super::rtree_constants::{HEADER_SIZE, MAGIC, VERSION};
use super::split::SplitPolicy;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial indexing operations
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Underlying storage read/write failed. Never retried internally.
    #[error("I/O failure during {operation} at offset {offset}: {source}")]
    Io {
        operation: &'static str,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Header magic/version mismatch or a structural read produced an invalid record
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// Operation on a closed tree, dimension mismatch, invalid configuration
    #[error("Usage error: {0}")]
    Usage(String),

    /// Lookup of an element that the mapper does not know
    #[error("Not found: {0}")]
    NotFound(String),

    /// A split or condense step broke a structural invariant
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl SpatialError {
    pub(crate) fn closed() -> Self {
        SpatialError::Usage("tree is closed".into())
    }

    pub fn is_io(&self) -> bool {
        matches!(self, SpatialError::Io { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, SpatialError::CorruptStore(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, SpatialError::Usage(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SpatialError::NotFound(_))
    }
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Attaches the failing operation and storage offset to an I/O error.
pub(crate) trait IoContext<T> {
    fn io_context(self, operation: &'static str, offset: u64) -> SpatialResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, operation: &'static str, offset: u64) -> SpatialResult<T> {
        self.map_err(|source| SpatialError::Io {
            operation,
            offset,
            source,
        })
    }
}

/// Identifier substituted for a caller element inside leaf records
pub type ElementId = u64;

/// Absolute byte offset of a node record in the node file
pub type NodeOffset = u64;

// ============================================================================
// Statistics
// ============================================================================

/// Statistics about R-Tree operations
#[derive(Debug, Clone, Default)]
pub struct RTreeStats {
    pub element_count: u64,
    pub tree_height: u32,
    pub node_count: u64,
    pub free_nodes: u64,
    pub cached_nodes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub mapper_records: u64,
}

/// Result of a full structural walk of the tree
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Total nodes visited
    pub nodes_checked: u64,
    /// Leaf entries found during the walk
    pub elements_found: u64,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            nodes_checked: 0,
            elements_found: 0,
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Bounding Rectangles
// ============================================================================

/// Axis-aligned rectangle stored inside node entries.
///
/// Unlike [`crate::Envelope`] this carries no reference-system tag, so
/// every entry of a tree encodes to the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl Rect {
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Self {
        Self { min, max }
    }

    /// The inverted rectangle: merging anything into it yields that thing.
    pub fn empty(dimensions: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; dimensions],
            max: vec![f64::NEG_INFINITY; dimensions],
        }
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.iter().zip(&self.max).any(|(lo, hi)| lo > hi)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min
            .iter()
            .zip(&self.max)
            .zip(other.min.iter().zip(&other.max))
            .all(|((lo, hi), (olo, ohi))| lo <= ohi && olo <= hi)
    }

    pub fn contains(&self, other: &Rect) -> bool {
        self.min
            .iter()
            .zip(&self.max)
            .zip(other.min.iter().zip(&other.max))
            .all(|((lo, hi), (olo, ohi))| lo <= olo && ohi <= hi)
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| hi - lo)
            .product()
    }

    pub fn merge(&self, other: &Rect) -> Rect {
        let mut merged = self.clone();
        merged.expand(other);
        merged
    }

    pub fn expand(&mut self, other: &Rect) {
        for (lo, olo) in self.min.iter_mut().zip(&other.min) {
            *lo = lo.min(*olo);
        }
        for (hi, ohi) in self.max.iter_mut().zip(&other.max) {
            *hi = hi.max(*ohi);
        }
    }

    /// Area growth needed for this rectangle to also cover `other`
    pub fn enlargement(&self, other: &Rect) -> f64 {
        self.merge(other).area() - self.area()
    }

    /// Minimum Euclidean distance from a point to this rectangle (0 inside)
    pub fn min_distance(&self, point: &[f64]) -> f64 {
        self.min
            .iter()
            .zip(&self.max)
            .zip(point)
            .map(|((lo, hi), p)| {
                let d = p - p.clamp(*lo, *hi);
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }
}

// ============================================================================
// Node Types
// ============================================================================

/// An entry of a node. In a directory node `pointer` is a child node
/// offset, in a leaf node it is an element identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub rect: Rect,
    pub pointer: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Directory,
    Leaf,
}

/// A node of the R-Tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Height from leaf level (leaves are 0)
    pub level: u32,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn leaf(entries: Vec<Entry>) -> Self {
        Self {
            kind: NodeKind::Leaf,
            level: 0,
            entries,
        }
    }

    pub fn directory(level: u32, entries: Vec<Entry>) -> Self {
        Self {
            kind: NodeKind::Directory,
            level,
            entries,
        }
    }

    /// Get the rectangle enclosing all entries
    pub fn compute_rect(&self, dimensions: usize) -> Rect {
        compute_entries_rect(&self.entries, dimensions)
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A leaf must sit at level 0 and a directory above it
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            NodeKind::Leaf => self.level == 0,
            NodeKind::Directory => self.level > 0,
        }
    }
}

pub fn compute_entries_rect(entries: &[Entry], dimensions: usize) -> Rect {
    let mut rect = Rect::empty(dimensions);
    for e in entries {
        rect.expand(&e.rect);
    }
    rect
}

/// What a node slot in the store currently holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRecord {
    Node(Node),
    /// A deallocated slot in the free chain (0 = end of chain)
    Free { next_free: NodeOffset },
}

// ============================================================================
// File Header
// ============================================================================

/// File header stored at the beginning of the node file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub max_entries: u32,
    pub min_entries: u32,
    pub dimensions: u32,
    pub split_policy: SplitPolicy,
    pub reference_system: Option<String>,
    pub node_record_size: u32,
    pub mapper_record_size: u32,
    pub root_offset: NodeOffset,
    pub height: u32,
    pub element_count: u64,
    pub next_node_id: u64,
    pub free_list_head: NodeOffset,
    pub free_node_count: u64,
}

impl FileHeader {
    /// Byte offset of the record for a 1-based node id
    pub fn node_offset(&self, node_id: u64) -> NodeOffset {
        HEADER_SIZE + (node_id - 1) * self.node_record_size as u64
    }

    /// Node records ever allocated and not currently free
    pub fn live_nodes(&self) -> u64 {
        (self.next_node_id - 1).saturating_sub(self.free_node_count)
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.magic != MAGIC {
            return Err(SpatialError::CorruptStore(format!(
                "invalid file format (bad magic {:#x})",
                self.magic
            )));
        }
        if self.version != VERSION {
            return Err(SpatialError::CorruptStore(format!(
                "unsupported file format version {}",
                self.version
            )));
        }
        if self.dimensions == 0
            || self.max_entries < 3
            || self.min_entries == 0
            || self.min_entries > self.max_entries / 2
        {
            return Err(SpatialError::CorruptStore(format!(
                "invalid tree parameters (dimensions {}, entries {}..{})",
                self.dimensions, self.min_entries, self.max_entries
            )));
        }
        if self.next_node_id == 0 || self.root_offset < HEADER_SIZE || self.height == 0 {
            return Err(SpatialError::CorruptStore(format!(
                "invalid root {} at height {}",
                self.root_offset, self.height
            )));
        }
        Ok(())
    }
}
