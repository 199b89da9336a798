//! # Paged R-Tree - Disk-Resident Spatial Index
//!
//! This crate indexes arbitrary elements by an n-dimensional bounding
//! envelope in a persistent R-tree whose nodes live on disk and are loaded on
//! demand.
//!
//! ## Features
//!
//! - **Disk-Based Storage**: fixed-size node records in a paged file, read
//!   and written through a buffered window
//! - **Write-Back Cache**: hot nodes kept decoded in an LRU cache, written
//!   back on eviction and flush
//! - **Element Mapping**: leaves hold integer identifiers; elements live in
//!   a separate paged file
//! - **Quadratic or Linear Splits**: chosen per tree, persisted in the header
//! - **Persistent**: reopening a tree restores its structure and elements
//! - **Thread Safe**: every operation is serialized behind one lock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paged_rtree::{DiskRTree, Envelope, RTreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RTreeConfig::builder().max_entries(16).build()?;
//! let tree = DiskRTree::<String>::create("roads.rtree", config)?;
//!
//! tree.insert(&"A1".to_string(), &Envelope::new_2d(0.0, 0.0, 10.0, 2.0))?;
//! tree.insert(&"B7".to_string(), &Envelope::new_2d(20.0, 5.0, 25.0, 30.0))?;
//!
//! for road in tree.search(&Envelope::new_2d(5.0, 0.0, 8.0, 1.0))? {
//!     println!("{}", road?);
//! }
//!
//! tree.delete(&"A1".to_string())?;
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

pub mod disk_rtree;
pub mod envelope;
pub mod spatial_tree;

pub use disk_rtree::{
    DiskRTree, Element, ElementId, IntegrityReport, OpenMode, RTreeConfig, RTreeConfigBuilder,
    RTreeStats, Search, SpatialError, SpatialResult, SplitPolicy,
};
pub use envelope::Envelope;
pub use spatial_tree::{ElementIter, SpatialTree};
