//! Generated workloads checked against a linear scan.

use paged_rtree::{DiskRTree, Envelope, RTreeConfig, SplitPolicy};
use paged_rtree_int_test::test_util::{brute_force_intersecting, search_ids, Feature};
use proptest::prelude::*;

fn envelope_strategy() -> impl Strategy<Value = Envelope> {
    (0.0..100.0f64, 0.0..100.0f64, 0.0..10.0f64, 0.0..10.0f64)
        .prop_map(|(x, y, w, h)| Envelope::new_2d(x, y, x + w, y + h))
}

fn dataset_strategy() -> impl Strategy<Value = Vec<(Feature, Envelope)>> {
    prop::collection::vec(envelope_strategy(), 0..80).prop_map(|envelopes| {
        envelopes
            .into_iter()
            .enumerate()
            .map(|(i, env)| (Feature::new(i as u32), env))
            .collect()
    })
}

fn policy_strategy() -> impl Strategy<Value = SplitPolicy> {
    prop_oneof![Just(SplitPolicy::Quadratic), Just(SplitPolicy::Linear)]
}

fn config(max_entries: usize, policy: SplitPolicy) -> RTreeConfig {
    RTreeConfig::builder()
        .max_entries(max_entries)
        .split_policy(policy)
        .cache_capacity(8)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn search_returns_exactly_the_intersecting_elements(
        data in dataset_strategy(),
        queries in prop::collection::vec(envelope_strategy(), 1..6),
        max_entries in 3usize..10,
        policy in policy_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let tree = DiskRTree::create(dir.path().join("p.rtree"), config(max_entries, policy)).unwrap();
        for (feature, envelope) in &data {
            tree.insert(feature, envelope).unwrap();
        }

        for query in &queries {
            prop_assert_eq!(search_ids(&tree, query).unwrap(), brute_force_intersecting(&data, query));
        }
    }

    #[test]
    fn nodes_stay_within_bounds_with_exact_rectangles(
        data in dataset_strategy(),
        max_entries in 3usize..10,
        policy in policy_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let tree = DiskRTree::create(dir.path().join("p.rtree"), config(max_entries, policy)).unwrap();
        for (feature, envelope) in &data {
            tree.insert(feature, envelope).unwrap();
        }

        let report = tree.check_integrity().unwrap();
        prop_assert!(report.is_valid, "{:?}", report.errors);
        prop_assert_eq!(report.elements_found, data.len() as u64);
    }

    #[test]
    fn deleted_elements_disappear_and_the_rest_remain(
        data in dataset_strategy(),
        delete_mask in prop::collection::vec(any::<bool>(), 80),
        max_entries in 3usize..8,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let tree = DiskRTree::create(dir.path().join("p.rtree"), config(max_entries, SplitPolicy::Quadratic)).unwrap();
        for (feature, envelope) in &data {
            tree.insert(feature, envelope).unwrap();
        }

        let mut remaining = Vec::new();
        for (i, (feature, envelope)) in data.iter().enumerate() {
            if delete_mask[i] {
                tree.delete(feature).unwrap();
            } else {
                remaining.push((feature.clone(), envelope.clone()));
            }
        }

        prop_assert_eq!(tree.len(), remaining.len() as u64);
        let world = Envelope::world(2);
        prop_assert_eq!(search_ids(&tree, &world).unwrap(), brute_force_intersecting(&remaining, &world));
        let report = tree.check_integrity().unwrap();
        prop_assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn reopened_tree_answers_like_the_original(
        data in dataset_strategy(),
        query in envelope_strategy(),
        policy in policy_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.rtree");
        let before = {
            let tree = DiskRTree::create(&path, config(4, policy)).unwrap();
            for (feature, envelope) in &data {
                tree.insert(feature, envelope).unwrap();
            }
            let ids = search_ids(&tree, &query).unwrap();
            tree.close().unwrap();
            ids
        };

        let tree = DiskRTree::<Feature>::open(&path, RTreeConfig::default()).unwrap();
        prop_assert_eq!(tree.len(), data.len() as u64);
        prop_assert_eq!(search_ids(&tree, &query).unwrap(), before);
    }
}
