//! Property tests: convergence, idempotence and change-log deduplication.

use proptest::prelude::*;
use reposync_events::dedup_latest;
use reposync_testkit::prelude::*;
use std::collections::{BTreeSet, HashMap};

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn one_sided_edits_converge(
        side in side_strategy(),
        seed in content_strategy(),
        mutations in mutation_sequence_strategy(1, 6),
    ) {
        let repo = TestRepository::new();
        seed_layout(&repo, &seed);
        repo.sync();
        repo.assert_converged();

        let mut file = TrackedFile::seeded();
        for mutation in &mutations {
            apply_mutation(&repo, side, &mut file, mutation);
        }
        repo.sync();
        repo.assert_converged();
        prop_assert_eq!(repo.local_snapshot().contains_key(&file.relative()), file.exists);

        let again = repo.sync();
        prop_assert_eq!(again.total_invocations(), 0);
        prop_assert!(again.is_clean());
    }

    #[test]
    fn paging_delivers_each_object_once(
        page_size in 1usize..4,
        touched in prop::collection::vec(0usize..3, 1..10),
    ) {
        let repo = TestRepository::with_config(|config| config.with_page_size(page_size));
        for index in 0..3 {
            repo.remote.put_file(&format!("/f{index}.txt"), b"seed").unwrap();
        }
        repo.sync();

        for (round, index) in touched.iter().enumerate() {
            repo.remote
                .put_file(&format!("/f{index}.txt"), round.to_string().as_bytes())
                .unwrap();
        }
        let report = repo.sync();
        let distinct: BTreeSet<_> = touched.iter().collect();
        prop_assert_eq!(report.events_processed, distinct.len() as u64);
        prop_assert_eq!(report.invocations_of("download-changed"), distinct.len() as u64);
        repo.assert_converged();
    }
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn dedup_keeps_each_objects_last_kind(entries in change_log_strategy(40)) {
        let mut last_kind = HashMap::new();
        let mut last_position = HashMap::new();
        for (position, entry) in entries.iter().enumerate() {
            last_kind.insert(entry.remote_id.clone(), entry.kind);
            last_position.insert(entry.remote_id.clone(), position);
        }

        let deduped = dedup_latest(entries);
        prop_assert_eq!(deduped.len(), last_kind.len());
        for entry in &deduped {
            prop_assert_eq!(Some(&entry.kind), last_kind.get(&entry.remote_id));
        }
        let positions: Vec<_> = deduped
            .iter()
            .map(|entry| last_position[&entry.remote_id])
            .collect();
        prop_assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
