//! Insert / search / delete workloads against a live tree.

use paged_rtree::{Envelope, RTreeConfig, SplitPolicy};
use paged_rtree_int_test::test_util::{
    brute_force_intersecting, cleanup, create_test_context, create_test_context_with,
    random_envelope, random_features, run_test, search_ids, Feature,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

#[test]
fn test_random_workload_matches_linear_scan() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let mut rng = StdRng::seed_from_u64(7);
            let data = random_features(&mut rng, 400, 1000.0);
            for (feature, envelope) in &data {
                tree.insert(feature, envelope)?;
            }
            assert_eq!(tree.len(), 400);

            for _ in 0..25 {
                let query = random_envelope(&mut rng, 1000.0, 200.0);
                assert_eq!(search_ids(&tree, &query)?, brute_force_intersecting(&data, &query));
            }

            let report = tree.check_integrity()?;
            assert!(report.is_valid, "{:?}", report.errors);
            assert_eq!(report.elements_found, 400);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_interleaved_insert_and_delete() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let mut rng = StdRng::seed_from_u64(11);
            let data = random_features(&mut rng, 300, 500.0);

            let mut live = Vec::new();
            for (i, (feature, envelope)) in data.iter().enumerate() {
                tree.insert(feature, envelope)?;
                live.push((feature.clone(), envelope.clone()));
                // every third insert, drop the oldest survivor
                if i % 3 == 2 {
                    let (gone, _) = live.remove(0);
                    tree.delete(&gone)?;
                }
            }
            assert_eq!(tree.len(), live.len() as u64);

            let world = Envelope::world(2);
            assert_eq!(search_ids(&tree, &world)?, brute_force_intersecting(&live, &world));
            for _ in 0..10 {
                let query = random_envelope(&mut rng, 500.0, 100.0);
                assert_eq!(search_ids(&tree, &query)?, brute_force_intersecting(&live, &query));
            }

            let report = tree.check_integrity()?;
            assert!(report.is_valid, "{:?}", report.errors);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_all_then_refill() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let mut rng = StdRng::seed_from_u64(3);
            let data = random_features(&mut rng, 150, 100.0);
            for (feature, envelope) in &data {
                tree.insert(feature, envelope)?;
            }
            let grown = tree.stats()?;
            assert!(grown.tree_height > 1);

            for (feature, _) in &data {
                tree.delete(feature)?;
            }
            assert!(tree.is_empty());
            assert_eq!(tree.height()?, 1);
            assert!(tree.bounds()?.is_none());
            let emptied = tree.stats()?;
            assert_eq!(emptied.node_count, 1);
            assert!(emptied.free_nodes > 0);

            // freed slots are handed out again before the file grows
            for (feature, envelope) in &data {
                tree.insert(feature, envelope)?;
            }
            let refilled = tree.stats()?;
            assert_eq!(refilled.element_count, 150);
            assert_eq!(refilled.mapper_records, 150);
            assert!(refilled.free_nodes < emptied.free_nodes);

            let report = tree.check_integrity()?;
            assert!(report.is_valid, "{:?}", report.errors);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_linear_split_workload() {
    let config = RTreeConfig::builder()
        .max_entries(8)
        .split_policy(SplitPolicy::Linear)
        .cache_capacity(4)
        .build()
        .unwrap();
    run_test(
        || create_test_context_with(config.clone()),
        |ctx| {
            let tree = ctx.tree();
            let mut rng = StdRng::seed_from_u64(19);
            let data = random_features(&mut rng, 300, 1000.0);
            for (feature, envelope) in &data {
                tree.insert(feature, envelope)?;
            }
            for _ in 0..10 {
                let query = random_envelope(&mut rng, 1000.0, 300.0);
                assert_eq!(search_ids(&tree, &query)?, brute_force_intersecting(&data, &query));
            }
            let stats = tree.stats()?;
            assert!(stats.cached_nodes <= 4);
            let report = tree.check_integrity()?;
            assert!(report.is_valid, "{:?}", report.errors);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_three_dimensional_tree() {
    let config = RTreeConfig::builder()
        .max_entries(5)
        .dimensions(3)
        .build()
        .unwrap();
    run_test(
        || create_test_context_with(config.clone()),
        |ctx| {
            let tree = ctx.tree();
            for i in 0..60u32 {
                let z = i as f64;
                let env = Envelope::new(vec![0.0, 0.0, z], vec![1.0, 1.0, z + 0.5])?;
                tree.insert(&Feature::new(i), &env)?;
            }

            let slab = Envelope::new(vec![0.0, 0.0, 10.0], vec![1.0, 1.0, 20.0])?;
            let ids = search_ids(&tree, &slab)?;
            assert_eq!(ids, (10..=20).collect::<Vec<u32>>());

            let flat = Envelope::new_2d(0.0, 0.0, 1.0, 1.0);
            assert!(tree.insert(&Feature::new(99), &flat).unwrap_err().is_usage());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nearest_matches_linear_scan() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let mut rng = StdRng::seed_from_u64(23);
            let data = random_features(&mut rng, 200, 1000.0);
            for (feature, envelope) in &data {
                tree.insert(feature, envelope)?;
            }

            let point = [500.0, 500.0];
            let nearest = tree.nearest(&point, 5, None)?;
            assert_eq!(nearest.len(), 5);
            assert!(nearest.windows(2).all(|w| w[0].1 <= w[1].1));

            // the fifth distance bounds every feature left out
            let kth = nearest[4].1;
            let chosen: HashSet<u32> = nearest.iter().map(|(f, _)| f.id).collect();
            for (feature, envelope) in &data {
                if chosen.contains(&feature.id) {
                    continue;
                }
                let dx = (envelope.min()[0] - point[0]).max(point[0] - envelope.max()[0]).max(0.0);
                let dy = (envelope.min()[1] - point[1]).max(point[1] - envelope.max()[1]).max(0.0);
                assert!((dx * dx + dy * dy).sqrt() >= kth);
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_release_after_delete() {
    run_test(
        create_test_context,
        |ctx| {
            let tree = ctx.tree();
            let feature = Feature::new(1);
            tree.insert(&feature, &Envelope::new_2d(0.0, 0.0, 1.0, 1.0))?;
            assert!(tree.release(&feature).unwrap_err().is_usage());

            tree.delete(&feature)?;
            tree.release(&feature)?;
            assert!(tree.delete(&feature).unwrap_err().is_not_found());
            assert_eq!(tree.stats()?.mapper_records, 1);
            Ok(())
        },
        cleanup,
    )
}
