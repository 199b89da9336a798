//! Close / reopen behaviour of the on-disk files.

use paged_rtree::{DiskRTree, Envelope, OpenMode, RTreeConfig, SplitPolicy};
use paged_rtree_int_test::test_util::{
    brute_force_intersecting, cleanup, create_test_context, random_envelope, random_features,
    run_test, search_ids, small_config, Feature,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

#[test]
fn test_reopen_preserves_search_results() {
    run_test(
        create_test_context,
        |ctx| {
            let mut rng = StdRng::seed_from_u64(5);
            let data = random_features(&mut rng, 250, 1000.0);
            let tree = ctx.tree();
            for (feature, envelope) in &data {
                tree.insert(feature, envelope)?;
            }
            let queries: Vec<Envelope> =
                (0..10).map(|_| random_envelope(&mut rng, 1000.0, 250.0)).collect();
            let before = tree.stats()?;

            let ctx = ctx.reopen(RTreeConfig::default())?;
            let tree = ctx.tree();
            let after = tree.stats()?;
            assert_eq!(after.element_count, before.element_count);
            assert_eq!(after.tree_height, before.tree_height);
            assert_eq!(after.node_count, before.node_count);
            assert_eq!(tree.config()?.max_entries(), small_config().max_entries());

            for query in &queries {
                assert_eq!(search_ids(&tree, query)?, brute_force_intersecting(&data, query));
            }
            let report = tree.check_integrity()?;
            assert!(report.is_valid, "{:?}", report.errors);
            cleanup(ctx)
        },
        cleanup,
    )
}

#[test]
fn test_reopen_keeps_detached_mappings() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            for i in 0..20 {
                tree.insert(&Feature::new(i), &Envelope::new_2d(i as f64, 0.0, i as f64, 1.0))?;
            }
            for i in 0..10 {
                tree.delete(&Feature::new(i))?;
            }

            let ctx = ctx.reopen(small_config())?;
            let tree = ctx.tree();
            assert_eq!(tree.len(), 10);
            // deleted features come back under their old identifiers
            tree.insert(&Feature::new(3), &Envelope::new_2d(50.0, 50.0, 51.0, 51.0))?;
            assert_eq!(
                tree.find_intersecting_ids(&Envelope::new_2d(50.0, 50.0, 51.0, 51.0))?,
                vec![4]
            );
            assert_eq!(tree.stats()?.mapper_records, 20);
            cleanup(ctx)
        },
        cleanup,
    )
}

#[test]
fn test_reference_system_and_policy_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tagged.rtree");
    let config = RTreeConfig::builder()
        .max_entries(7)
        .split_policy(SplitPolicy::Linear)
        .reference_system("EPSG:25832")
        .build()
        .unwrap();
    {
        let tree = DiskRTree::<Feature>::with_mode(&path, OpenMode::Create, config).unwrap();
        tree.insert(&Feature::new(1), &Envelope::new_2d(0.0, 0.0, 2.0, 2.0))
            .unwrap();
        tree.close().unwrap();
    }

    let tree = DiskRTree::<Feature>::with_mode(&path, OpenMode::Open, RTreeConfig::default())
        .unwrap();
    let config = tree.config().unwrap();
    assert_eq!(config.max_entries(), 7);
    assert_eq!(config.split_policy(), SplitPolicy::Linear);
    assert_eq!(config.reference_system(), Some("EPSG:25832"));

    let bounds = tree.bounds().unwrap().unwrap();
    assert_eq!(bounds.reference_system(), Some("EPSG:25832"));
    let other = Envelope::new_2d(0.0, 0.0, 1.0, 1.0).with_reference_system("EPSG:4326");
    assert!(tree.search(&other).err().unwrap().is_usage());
}

#[test]
fn test_clear_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cleared.rtree");
    {
        let tree = DiskRTree::<Feature>::create(&path, small_config()).unwrap();
        for i in 0..40 {
            tree.insert(&Feature::new(i), &Envelope::new_2d(i as f64, 0.0, i as f64 + 1.0, 1.0))
                .unwrap();
        }
        tree.clear().unwrap();
        tree.close().unwrap();
    }

    let tree = DiskRTree::<Feature>::open(&path, small_config()).unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.stats().unwrap().mapper_records, 0);
    assert_eq!(tree.search(&Envelope::world(2)).unwrap().count(), 0);
}

#[test]
fn test_corrupted_header_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.rtree");
    {
        let tree = DiskRTree::<Feature>::create(&path, small_config()).unwrap();
        tree.insert(&Feature::new(1), &Envelope::new_2d(0.0, 0.0, 1.0, 1.0))
            .unwrap();
        tree.close().unwrap();
    }

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(10)).unwrap();
    file.write_all(&[0xff; 8]).unwrap();
    drop(file);

    let err = DiskRTree::<Feature>::open(&path, small_config()).err().unwrap();
    assert!(err.is_corrupt());
}

#[test]
fn test_missing_element_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orphan.rtree");
    {
        let tree = DiskRTree::<Feature>::create(&path, small_config()).unwrap();
        tree.close().unwrap();
    }
    std::fs::remove_file(dir.path().join("orphan.rtree.elements")).unwrap();

    let err = DiskRTree::<Feature>::open(&path, small_config()).err().unwrap();
    assert!(err.is_io());
}
