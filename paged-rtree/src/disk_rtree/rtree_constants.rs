//! Constants for the disk-resident R-Tree.

/// Size of the header region at the start of the node file. Node records
/// start immediately after it.
pub const HEADER_SIZE: u64 = 512;

/// Default length of the buffered store window (one physical page)
pub const DEFAULT_WINDOW_LENGTH: usize = 4096;

/// Default maximum number of entries per node
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default dimensionality of indexed envelopes
pub const DEFAULT_DIMENSIONS: usize = 2;

/// Default node cache size in number of decoded nodes
pub const DEFAULT_CACHE_NODES: usize = 1024;

/// Default length of one element mapper record
pub const DEFAULT_MAPPER_RECORD_SIZE: usize = 256;

/// Longest reference-system tag that still fits in the header region
pub const MAX_REFERENCE_SYSTEM_LEN: usize = 256;

/// Bytes in front of every encoded record: crc32 + payload length
pub const FRAME_OVERHEAD: usize = 8;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x50525452; // "PRTR" - Paged R-Tree

/// File format version
pub const VERSION: u32 = 1;

/// Suffix appended to the tree path to name the element mapper file
pub const ELEMENT_FILE_SUFFIX: &str = ".elements";
