//! Disk-resident R-tree.
//!
//! The tree is layered bottom-up:
//! - a windowed paged file of fixed-size records (`paged_file`)
//! - a node store that frames, checksums and addresses node records behind a
//!   file header (`rtree_storage`)
//! - a write-back LRU node cache (`rtree_cache`)
//! - the insert / delete / condense algorithms working on staged node copies
//!   (`rtree_ops`), with pluggable node splitting (`split`)
//! - an element mapper translating leaf identifiers to caller elements
//!   (`element_mapper`)
//!
//! [`DiskRTree`] ties the layers together behind a single lock.

pub mod codec;
pub mod element_mapper;
pub mod paged_file;
pub mod rtree_cache;
pub mod rtree_config;
pub mod rtree_constants;
pub(crate) mod rtree_ops;
pub mod rtree_storage;
pub mod rtree_types;
pub mod split;
mod rtree_impl;

pub use rtree_config::{OpenMode, RTreeConfig, RTreeConfigBuilder};
pub use rtree_impl::{DiskRTree, Element, Search};
pub use rtree_types::{
    ElementId, IntegrityReport, NodeOffset, RTreeStats, SpatialError, SpatialResult,
};
pub use split::SplitPolicy;
