//! Tree configuration.
//!
//! [`RTreeConfig`] is a plain value object. Structural parameters (entry
//! bounds, dimensionality, split policy, reference system, mapper record
//! size) are fixed when a tree is created and afterwards read back from the
//! file header; the window length and cache capacity apply to every open.

use serde::{Deserialize, Serialize};

use super::element_mapper::min_record_size;
use super::rtree_constants::{
    DEFAULT_CACHE_NODES, DEFAULT_DIMENSIONS, DEFAULT_MAPPER_RECORD_SIZE, DEFAULT_MAX_ENTRIES,
    DEFAULT_WINDOW_LENGTH, MAX_REFERENCE_SYSTEM_LEN,
};
use super::rtree_types::{FileHeader, SpatialError, SpatialResult};
use super::split::SplitPolicy;

/// Whether the factory writes a fresh tree or reopens an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Create,
    Open,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTreeConfig {
    max_entries: usize,
    min_entries: usize,
    dimensions: usize,
    split_policy: SplitPolicy,
    reference_system: Option<String>,
    window_length: usize,
    cache_capacity: usize,
    mapper_record_size: usize,
}

impl RTreeConfig {
    pub fn builder() -> RTreeConfigBuilder {
        RTreeConfigBuilder::new()
    }

    /// Default minimum fill for a given maximum: 40% of it, at least 2,
    /// at most half.
    pub fn default_min_entries(max_entries: usize) -> usize {
        (max_entries * 2 / 5).max(2).min(max_entries / 2)
    }

    #[inline]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[inline]
    pub fn min_entries(&self) -> usize {
        self.min_entries
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[inline]
    pub fn split_policy(&self) -> SplitPolicy {
        self.split_policy
    }

    #[inline]
    pub fn reference_system(&self) -> Option<&str> {
        self.reference_system.as_deref()
    }

    #[inline]
    pub fn window_length(&self) -> usize {
        self.window_length
    }

    #[inline]
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    #[inline]
    pub fn mapper_record_size(&self) -> usize {
        self.mapper_record_size
    }

    pub(crate) fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache_capacity = capacity;
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.max_entries < 3 {
            return Err(SpatialError::Usage(format!(
                "max_entries must be at least 3, got {}",
                self.max_entries
            )));
        }
        if self.min_entries == 0 || self.min_entries > self.max_entries / 2 {
            return Err(SpatialError::Usage(format!(
                "min_entries must be within 1..={}, got {}",
                self.max_entries / 2,
                self.min_entries
            )));
        }
        if self.dimensions == 0 {
            return Err(SpatialError::Usage("dimensions must be at least 1".into()));
        }
        if self.window_length == 0 {
            return Err(SpatialError::Usage("window_length must be positive".into()));
        }
        let min_record = min_record_size(self.dimensions)?;
        if self.mapper_record_size < min_record {
            return Err(SpatialError::Usage(format!(
                "mapper_record_size must be at least {} for {} dimensions, got {}",
                min_record, self.dimensions, self.mapper_record_size
            )));
        }
        if let Some(tag) = &self.reference_system {
            if tag.len() > MAX_REFERENCE_SYSTEM_LEN {
                return Err(SpatialError::Usage(format!(
                    "reference system tag longer than {} bytes",
                    MAX_REFERENCE_SYSTEM_LEN
                )));
            }
        }
        Ok(())
    }

    /// Effective configuration of a reopened tree: structure from the
    /// header, tuning from `self`.
    pub(crate) fn reconcile(&self, header: &FileHeader) -> RTreeConfig {
        let stored = RTreeConfig {
            max_entries: header.max_entries as usize,
            min_entries: header.min_entries as usize,
            dimensions: header.dimensions as usize,
            split_policy: header.split_policy,
            reference_system: header.reference_system.clone(),
            window_length: self.window_length,
            cache_capacity: self.cache_capacity,
            mapper_record_size: header.mapper_record_size as usize,
        };
        if &stored != self {
            log::warn!(
                "Structural settings of an existing tree come from its header; ignoring max_entries={}, dimensions={}, split_policy={}",
                self.max_entries,
                self.dimensions,
                self.split_policy
            );
        }
        stored
    }
}

impl Default for RTreeConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            min_entries: Self::default_min_entries(DEFAULT_MAX_ENTRIES),
            dimensions: DEFAULT_DIMENSIONS,
            split_policy: SplitPolicy::default(),
            reference_system: None,
            window_length: DEFAULT_WINDOW_LENGTH,
            cache_capacity: DEFAULT_CACHE_NODES,
            mapper_record_size: DEFAULT_MAPPER_RECORD_SIZE,
        }
    }
}

/// Builder for [`RTreeConfig`]. `min_entries` follows `max_entries` unless
/// it is set explicitly.
pub struct RTreeConfigBuilder {
    config: RTreeConfig,
    explicit_min: Option<usize>,
}

impl RTreeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RTreeConfig::default(),
            explicit_min: None,
        }
    }

    #[inline]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_entries = max_entries;
        self
    }

    #[inline]
    pub fn min_entries(mut self, min_entries: usize) -> Self {
        self.explicit_min = Some(min_entries);
        self
    }

    #[inline]
    pub fn dimensions(mut self, dimensions: usize) -> Self {
        self.config.dimensions = dimensions;
        self
    }

    #[inline]
    pub fn split_policy(mut self, split_policy: SplitPolicy) -> Self {
        self.config.split_policy = split_policy;
        self
    }

    #[inline]
    pub fn reference_system(mut self, tag: impl Into<String>) -> Self {
        self.config.reference_system = Some(tag.into());
        self
    }

    #[inline]
    pub fn window_length(mut self, window_length: usize) -> Self {
        self.config.window_length = window_length;
        self
    }

    #[inline]
    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.config.cache_capacity = cache_capacity;
        self
    }

    #[inline]
    pub fn mapper_record_size(mut self, mapper_record_size: usize) -> Self {
        self.config.mapper_record_size = mapper_record_size;
        self
    }

    pub fn build(mut self) -> SpatialResult<RTreeConfig> {
        self.config.min_entries = self
            .explicit_min
            .unwrap_or_else(|| RTreeConfig::default_min_entries(self.config.max_entries));
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RTreeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
