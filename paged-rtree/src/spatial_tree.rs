//! SpatialTree trait definition: the contract collaborators index through.

use crate::disk_rtree::rtree_types::SpatialResult;
use crate::envelope::Envelope;

/// Boxed lazy sequence of search results
pub type ElementIter<'a, E> = Box<dyn Iterator<Item = SpatialResult<E>> + 'a>;

/// A persistent spatial index over elements of type `E`.
///
/// Implementations hold elements by value on disk, so searches yield owned
/// elements. Once the tree is closed every fallible method returns a usage
/// error and `len` reports zero.
pub trait SpatialTree<E>: Send + Sync {
    /// Index `element` under `envelope`.
    fn insert(&self, element: &E, envelope: &Envelope) -> SpatialResult<()>;

    /// Lazily yield every element whose envelope intersects `envelope`.
    /// Each call walks the tree again from the root.
    fn search<'a>(&'a self, envelope: &Envelope) -> SpatialResult<ElementIter<'a, E>>;

    /// Remove `element` from the index.
    fn delete(&self, element: &E) -> SpatialResult<()>;

    /// Number of indexed elements.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush all pending changes and release the storage handles.
    fn close(&self) -> SpatialResult<()>;

    /// Remove every element and identifier mapping.
    fn clear(&self) -> SpatialResult<()>;
}
