use paged_rtree::{DiskRTree, Envelope, RTreeConfig, SpatialResult};
use paged_rtree_int_test::test_util::{random_features, Feature};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() -> SpatialResult<()> {
    println!("Starting stress test...");
    let dir = tempfile::tempdir().map_err(|e| paged_rtree::SpatialError::Io {
        operation: "create temp dir",
        offset: 0,
        source: e,
    })?;
    let path = dir.path().join("stress.rtree");

    let count = 20_000;
    let mut rng = StdRng::seed_from_u64(42);
    let data = random_features(&mut rng, count, 10_000.0);

    let config = RTreeConfig::builder()
        .max_entries(32)
        .cache_capacity(256)
        .build()?;
    let tree = DiskRTree::<Feature>::create(&path, config.clone())?;

    let start = std::time::Instant::now();
    for (feature, envelope) in &data {
        tree.insert(feature, envelope)?;
    }
    println!("Inserted {} features in {:?}", count, start.elapsed());

    let start = std::time::Instant::now();
    let query = Envelope::new_2d(2_500.0, 2_500.0, 7_500.0, 7_500.0);
    let mut found = 0;
    for feature in tree.search(&query)? {
        feature?;
        found += 1;
    }
    println!("Found {} features in {:?}", found, start.elapsed());

    let start = std::time::Instant::now();
    for (feature, _) in data.iter().step_by(2) {
        tree.delete(feature)?;
    }
    println!("Deleted {} features in {:?}", count / 2, start.elapsed());

    tree.close()?;

    let start = std::time::Instant::now();
    let tree = DiskRTree::<Feature>::open(&path, config)?;
    let report = tree.check_integrity()?;
    println!(
        "Reopened and checked {} nodes in {:?}, valid: {}",
        report.nodes_checked,
        start.elapsed(),
        report.is_valid
    );
    println!("{:?}", tree.stats()?);
    tree.close()
}
