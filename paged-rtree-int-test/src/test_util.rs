use paged_rtree::{DiskRTree, Envelope, RTreeConfig, SpatialResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Element type used throughout the integration tests
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Feature {
    pub id: u32,
    pub name: String,
}

impl Feature {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: format!("feature-{}", id),
        }
    }
}

/// Runs a test between a setup and a teardown step. The teardown runs even
/// when the test itself fails.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    B: Fn() -> SpatialResult<TestContext>,
    T: Fn(TestContext) -> SpatialResult<()>,
    A: Fn(TestContext) -> SpatialResult<()>,
{
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };
    let result = test(ctx.clone());
    let after_result = after(ctx);
    if let Err(e) = result {
        panic!("Test failed: {:?}", e);
    }
    if let Err(e) = after_result {
        panic!("After run failed: {:?}", e);
    }
}

#[derive(Clone)]
pub struct TestContext {
    dir: Arc<TempDir>,
    path: PathBuf,
    tree: Arc<DiskRTree<Feature>>,
}

impl TestContext {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn tree(&self) -> Arc<DiskRTree<Feature>> {
        self.tree.clone()
    }

    /// Close the current tree and open it again from disk
    pub fn reopen(&self, config: RTreeConfig) -> SpatialResult<TestContext> {
        self.tree.close()?;
        let tree = DiskRTree::open(&self.path, config)?;
        Ok(TestContext {
            dir: self.dir.clone(),
            path: self.path.clone(),
            tree: Arc::new(tree),
        })
    }
}

pub fn small_config() -> RTreeConfig {
    RTreeConfig::builder()
        .max_entries(6)
        .cache_capacity(16)
        .build()
        .expect("valid test config")
}

pub fn create_test_context() -> SpatialResult<TestContext> {
    create_test_context_with(small_config())
}

pub fn create_test_context_with(config: RTreeConfig) -> SpatialResult<TestContext> {
    let dir = tempfile::tempdir().map_err(|e| paged_rtree::SpatialError::Io {
        operation: "create temp dir",
        offset: 0,
        source: e,
    })?;
    let path = dir.path().join("test.rtree");
    let tree = DiskRTree::create(&path, config)?;
    Ok(TestContext {
        dir: Arc::new(dir),
        path,
        tree: Arc::new(tree),
    })
}

pub fn cleanup(ctx: TestContext) -> SpatialResult<()> {
    if let Err(e) = ctx.tree.close() {
        log::warn!("Failed to close tree at {}: {}", ctx.path.display(), e);
    }
    Ok(())
}

/// Random 2D envelope inside `[0, extent]` with sides up to `max_side`
pub fn random_envelope<R: Rng>(rng: &mut R, extent: f64, max_side: f64) -> Envelope {
    let x = rng.gen_range(0.0..extent);
    let y = rng.gen_range(0.0..extent);
    let w = rng.gen_range(0.0..max_side);
    let h = rng.gen_range(0.0..max_side);
    Envelope::new_2d(x, y, x + w, y + h)
}

pub fn random_features<R: Rng>(rng: &mut R, count: u32, extent: f64) -> Vec<(Feature, Envelope)> {
    (0..count)
        .map(|i| (Feature::new(i), random_envelope(rng, extent, extent / 20.0)))
        .collect()
}

/// Linear-scan reference answer for an intersection query, sorted by id
pub fn brute_force_intersecting(data: &[(Feature, Envelope)], query: &Envelope) -> Vec<u32> {
    let mut ids: Vec<u32> = data
        .iter()
        .filter(|(_, env)| env.intersects(query))
        .map(|(f, _)| f.id)
        .collect();
    ids.sort();
    ids
}

/// Collect the ids of a tree search, sorted
pub fn search_ids(tree: &DiskRTree<Feature>, query: &Envelope) -> SpatialResult<Vec<u32>> {
    let mut ids = Vec::new();
    for feature in tree.search(query)? {
        ids.push(feature?.id);
    }
    ids.sort();
    Ok(ids)
}
