// Copyright (C) 2025 The tarn authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

#[cfg(test)]
mod tests {
    use crate::{
        BagCommitContext, BagConfig, BagError, BagOwner, CollectionManager, LinkBag,
        PendingBagOp, TableConfig,
        backing::{
            BagBacking, EmbeddedBacking, RemoteBagClient, RemoteStubBacking, TreeBacking,
        },
        change::Change,
    };
    use pretty_assertions::assert_eq;
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tarn_common::{CollectionPointer, Rid, RidMap, RidResolver};
    use uuid::Uuid;

    const FILE_ID: i64 = 0;

    fn manager() -> Arc<CollectionManager> {
        CollectionManager::open(None, TableConfig::default()).unwrap().0
    }

    fn rid(position: i64) -> Rid {
        Rid::new(0, position)
    }

    fn embedded_bag(resolver: Arc<RidMap>) -> LinkBag<EmbeddedBacking> {
        LinkBag::new(EmbeddedBacking::new(), resolver, u32::MAX, 1000)
    }

    /// Write counts straight into a fresh collection and return its pointer.
    fn seed_collection(
        manager: &CollectionManager,
        entries: &[(Rid, u32)],
    ) -> CollectionPointer {
        let pointer = manager.allocate_pointer(FILE_ID).unwrap();
        let mut ctx = BagCommitContext::new(Uuid::new_v4());
        ctx.push(PendingBagOp::Update {
            pointer,
            counter_max_value: u32::MAX,
            entries: entries
                .iter()
                .map(|(rid, count)| (*rid, Change::absolute(*count)))
                .collect(),
        });
        manager.materialize(ctx).unwrap();
        pointer
    }

    fn seeded_tree_bag(
        manager: &CollectionManager,
        resolver: Arc<RidMap>,
        entries: &[(Rid, u32)],
    ) -> LinkBag<TreeBacking> {
        let pointer = seed_collection(manager, entries);
        let size = entries.iter().map(|(_, c)| u64::from(*c)).sum();
        let tree = manager.tree(FILE_ID).unwrap();
        LinkBag::hydrate(
            TreeBacking::new(tree, Some(pointer)),
            resolver,
            u32::MAX,
            1000,
            Some(size),
            vec![],
        )
    }

    fn collect(bag: &LinkBag<impl BagBacking>) -> Vec<Rid> {
        bag.iter().collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_add_remove_inverse() {
        let mut bag = embedded_bag(Arc::new(RidMap::new()));
        assert!(bag.add(rid(1)).unwrap());
        assert!(bag.add(rid(1)).unwrap());
        assert_eq!(bag.size(), Some(2));

        assert!(bag.remove(rid(1)).unwrap());
        assert!(bag.contains(rid(1)).unwrap());
        assert_eq!(bag.size(), Some(1));

        assert!(bag.remove(rid(1)).unwrap());
        assert!(!bag.contains(rid(1)).unwrap());
        assert_eq!(bag.size(), Some(0));
        assert!(bag.is_empty());

        // removing an absent identifier is a no-op that reports so
        assert!(!bag.remove(rid(1)).unwrap());
        assert_eq!(bag.size(), Some(0));
    }

    #[test]
    fn test_invalid_rid_rejected() {
        let mut bag = embedded_bag(Arc::new(RidMap::new()));
        assert_eq!(
            bag.add(Rid::new(-1, 3)),
            Err(BagError::InvalidRid(Rid::new(-1, 3)))
        );
        assert_eq!(bag.contains(Rid::new(0, -7)), Ok(false));
    }

    #[test]
    fn test_counter_cap() {
        let mut bag = LinkBag::new(EmbeddedBacking::new(), Arc::new(RidMap::new()), 3, 1000);
        for _ in 0..3 {
            assert!(bag.add(rid(9)).unwrap());
        }
        assert!(!bag.add(rid(9)).unwrap());
        assert!(!bag.add(rid(9)).unwrap());
        assert_eq!(bag.size(), Some(3));
        assert_eq!(collect(&bag), vec![rid(9); 3]);
    }

    #[test]
    fn test_zero_cap_admits_nothing() {
        let resolver = Arc::new(RidMap::new());
        let mut bag = LinkBag::new(EmbeddedBacking::new(), resolver.clone(), 0, 1000);
        let temp = resolver.allocate();
        assert!(!bag.add(temp).unwrap());
        // the refused add must leave no phantom entry behind
        assert!(!bag.contains(temp).unwrap());
        assert!(!bag.remove(temp).unwrap());
        assert_eq!(bag.size(), Some(0));
        assert_eq!(collect(&bag), Vec::<Rid>::new());
    }

    #[test]
    fn test_merged_iteration_is_ordered() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let mut bag = seeded_tree_bag(
            &manager,
            resolver,
            &[(rid(5), 1), (rid(1), 1), (rid(3), 1)],
        );
        bag.add(rid(2)).unwrap();
        bag.add(rid(4)).unwrap();
        assert_eq!(
            collect(&bag),
            vec![rid(1), rid(2), rid(3), rid(4), rid(5)]
        );
        // the backing walk agrees with what iteration yields
        assert_eq!(bag.update_size().unwrap(), 5);
    }

    #[test]
    fn test_local_change_overrides_stored_count() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let pointer = seed_collection(&manager, &[(rid(7), 3)]);
        let tree = manager.tree(FILE_ID).unwrap();
        let mut bag = LinkBag::hydrate(
            TreeBacking::new(tree, Some(pointer)),
            resolver,
            u32::MAX,
            1000,
            Some(3),
            vec![(rid(7), Change::diff(-1))],
        );

        // a relative change makes the size unknowable until recomputed
        assert_eq!(bag.size(), None);
        assert_eq!(collect(&bag), vec![rid(7); 2]);
        assert_eq!(bag.to_string(), "LinkBag [size=undefined]");

        assert_eq!(bag.update_size().unwrap(), 2);
        assert_eq!(bag.size(), Some(2));
        assert_eq!(bag.to_string(), "LinkBag [size=2]");
    }

    #[test]
    fn test_new_entries_drain_first() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let mut bag = seeded_tree_bag(&manager, resolver.clone(), &[(rid(1), 1)]);
        let t0 = resolver.allocate();
        let t1 = resolver.allocate();
        bag.add(t1).unwrap();
        bag.add(t0).unwrap();
        bag.add(rid(0)).unwrap();

        // never-persisted entries come first in allocation order, then the
        // merged persistent run ascending
        assert_eq!(collect(&bag), vec![t0, t1, rid(0), rid(1)]);
    }

    #[test]
    fn test_zero_counts_are_skipped() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let mut bag =
            seeded_tree_bag(&manager, resolver, &[(rid(1), 1), (rid(2), 1)]);
        assert!(bag.remove(rid(1)).unwrap());
        assert_eq!(collect(&bag), vec![rid(2)]);
        assert!(!bag.contains(rid(1)).unwrap());
    }

    #[test]
    fn test_mutation_during_iteration() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let entries: Vec<_> = (1..=5).map(|p| (rid(p), 1)).collect();
        let mut bag = seeded_tree_bag(&manager, resolver, &entries);

        let mut cursor = bag.cursor();
        assert_eq!(cursor.next(&bag).unwrap(), Some(rid(1)));

        // remove an identifier the cursor has not reached yet
        assert!(bag.remove(rid(3)).unwrap());

        let mut rest = vec![];
        while let Some(r) = cursor.next(&bag).unwrap() {
            rest.push(r);
        }
        assert_eq!(rest, vec![rid(2), rid(4), rid(5)]);
    }

    #[test]
    fn test_remove_current_shrinks_pending_repeats() {
        let mut bag = embedded_bag(Arc::new(RidMap::new()));
        bag.add(rid(4)).unwrap();
        bag.add(rid(4)).unwrap();

        let mut cursor = bag.cursor();
        assert_eq!(cursor.next(&bag).unwrap(), Some(rid(4)));
        assert!(cursor.remove_current(&mut bag).unwrap());
        // the second occurrence was consumed by the removal
        assert_eq!(cursor.next(&bag).unwrap(), None);
        assert_eq!(bag.size(), Some(1));
    }

    #[test]
    fn test_rollback_replays_timeline_backwards() {
        let mut bag = embedded_bag(Arc::new(RidMap::new()));
        bag.add(rid(1)).unwrap();
        bag.add(rid(2)).unwrap();
        bag.enable_tracking();

        bag.add(rid(3)).unwrap();
        bag.remove(rid(1)).unwrap();
        assert!(bag.is_modified());

        let events = bag.tracker().timeline().to_vec();
        let reverted = bag.return_original_state(&events).unwrap();
        assert_eq!(reverted.size(), Some(2));
        assert!(reverted.contains(rid(1)).unwrap());
        assert!(reverted.contains(rid(2)).unwrap());
        assert!(!reverted.contains(rid(3)).unwrap());
        assert!(!reverted.is_modified());
    }

    #[test]
    fn test_finalize_new_entry() {
        let resolver = Arc::new(RidMap::new());
        let mut bag = embedded_bag(resolver.clone());
        let temp = resolver.allocate();
        bag.add(temp).unwrap();
        bag.add(temp).unwrap();
        assert_eq!(bag.size(), Some(2));

        let Rid::Temp(handle) = temp else { panic!() };
        resolver.bind(handle, rid(42)).unwrap();
        bag.finalize_new_entry(temp, rid(42)).unwrap();

        assert_eq!(bag.size(), Some(2));
        assert!(bag.contains(rid(42)).unwrap());
        assert_eq!(collect(&bag), vec![rid(42); 2]);
        assert_eq!(
            bag.pending_changes().unwrap(),
            vec![(rid(42), Change::absolute(2))]
        );
    }

    #[test]
    fn test_unresolved_new_entry_blocks_commit() {
        let resolver = Arc::new(RidMap::new());
        let mut bag = embedded_bag(resolver.clone());
        bag.add(resolver.allocate()).unwrap();
        assert!(matches!(
            bag.pending_changes(),
            Err(BagError::IllegalState(_))
        ));
    }

    #[test]
    fn test_commit_roundtrip() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let tree = manager.tree(FILE_ID).unwrap();
        let mut bag = LinkBag::new(
            TreeBacking::new(tree.clone(), None),
            resolver.clone(),
            u32::MAX,
            1000,
        );
        bag.add(rid(10)).unwrap();
        bag.add(rid(10)).unwrap();
        bag.add(rid(11)).unwrap();

        let mut ctx = BagCommitContext::new(Uuid::new_v4());
        bag.register_pending(&manager, &mut ctx).unwrap();
        let pointer = bag.pointer().unwrap();
        assert!(pointer.is_durable());
        manager.materialize(ctx).unwrap();
        bag.changes_flushed(bag.size());

        let reloaded = LinkBag::hydrate(
            TreeBacking::new(tree, Some(pointer)),
            resolver,
            u32::MAX,
            1000,
            Some(3),
            vec![],
        );
        assert_eq!(collect(&reloaded), vec![rid(10), rid(10), rid(11)]);
        assert!(reloaded.contains(rid(10)).unwrap());
        assert!(!reloaded.contains(rid(12)).unwrap());
    }

    #[test]
    fn test_stored_counts_written_and_purged() {
        let manager = manager();
        let tree = manager.tree(FILE_ID).unwrap();
        tree.put_count(3, &rid(1), 2).unwrap();
        tree.put_count(3, &rid(2), 1).unwrap();
        assert_eq!(tree.get_count(3, &rid(1)).unwrap(), 2);

        // writing zero deletes the stored entry
        tree.put_count(3, &rid(2), 0).unwrap();
        assert_eq!(tree.get_count(3, &rid(2)).unwrap(), 0);

        assert_eq!(tree.purge_collection(3).unwrap(), 1);
        assert_eq!(tree.get_count(3, &rid(1)).unwrap(), 0);
    }

    #[test]
    fn test_collection_deletion_is_isolated() {
        let manager = manager();
        let a = seed_collection(&manager, &[(rid(1), 1), (rid(2), 1)]);
        let b = seed_collection(&manager, &[(rid(1), 1), (rid(9), 4)]);

        assert_eq!(manager.delete_collection(a).unwrap(), 2);

        let resolver: Arc<RidMap> = Arc::new(RidMap::new());
        let tree = manager.tree(FILE_ID).unwrap();
        let survivor = LinkBag::hydrate(
            TreeBacking::new(tree.clone(), Some(b)),
            resolver.clone(),
            u32::MAX,
            1000,
            Some(5),
            vec![],
        );
        assert_eq!(collect(&survivor), vec![rid(1), rid(9), rid(9), rid(9), rid(9)]);

        let deleted = LinkBag::hydrate(
            TreeBacking::new(tree, Some(a)),
            resolver,
            u32::MAX,
            1000,
            Some(0),
            vec![],
        );
        assert_eq!(collect(&deleted), Vec::<Rid>::new());
    }

    #[test]
    fn test_session_pending_pointer_map() {
        let manager = manager();
        let session = Uuid::new_v4();
        let other_session = Uuid::new_v4();
        let temp_id = manager.allocate_temp_id();
        assert!(temp_id < 0);

        let durable = manager.allocate_pointer(FILE_ID).unwrap();
        manager.register_pending_pointer(session, temp_id, durable);

        assert_eq!(manager.pending_pointer(session, temp_id), Some(durable));
        assert_eq!(manager.pending_pointer(other_session, temp_id), None);

        manager.clear_session_pointers(session);
        assert_eq!(manager.pending_pointer(session, temp_id), None);
    }

    #[test]
    fn test_collection_id_sequence_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = {
            let (manager, fresh) =
                CollectionManager::open(Some(dir.path()), TableConfig::default()).unwrap();
            assert!(fresh);
            manager.allocate_pointer(FILE_ID).unwrap()
        };
        let (manager, fresh) =
            CollectionManager::open(Some(dir.path()), TableConfig::default()).unwrap();
        assert!(!fresh);
        let second = manager.allocate_pointer(FILE_ID).unwrap();
        assert!(second.collection_id > first.collection_id);
    }

    #[test]
    fn test_embedded_tree_equivalence() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let mut embedded = embedded_bag(resolver.clone());
        let tree = manager.tree(FILE_ID).unwrap();
        let mut tree_bag = LinkBag::new(
            TreeBacking::new(tree, None),
            resolver.clone(),
            u32::MAX,
            1000,
        );

        // same mutation script against both representations
        let script = [
            (true, rid(3)),
            (true, rid(1)),
            (true, rid(3)),
            (false, rid(3)),
            (true, rid(2)),
            (false, rid(7)),
        ];
        for (is_add, r) in script {
            if is_add {
                assert_eq!(embedded.add(r).unwrap(), tree_bag.add(r).unwrap());
            } else {
                assert_eq!(embedded.remove(r).unwrap(), tree_bag.remove(r).unwrap());
            }
        }

        assert_eq!(collect(&embedded), collect(&tree_bag));
        assert_eq!(embedded.size(), tree_bag.size());
        for p in 0..8 {
            assert_eq!(
                embedded.contains(rid(p)).unwrap(),
                tree_bag.contains(rid(p)).unwrap()
            );
        }
    }

    #[test]
    fn test_update_size_unsupported_on_embedded() {
        let mut bag = embedded_bag(Arc::new(RidMap::new()));
        assert_eq!(
            bag.update_size(),
            Err(BagError::UnsupportedOperation("embedded", "update_size"))
        );
    }

    struct CountingOwner {
        dirtied: AtomicUsize,
    }

    impl BagOwner for CountingOwner {
        fn mark_dirty(&self) {
            self.dirtied.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_owner_guard_and_notification() {
        let mut bag = embedded_bag(Arc::new(RidMap::new()));
        let owner = Arc::new(CountingOwner {
            dirtied: AtomicUsize::new(0),
        });
        bag.set_owner(Some(owner.clone() as Arc<dyn BagOwner>)).unwrap();
        // re-attaching the same owner is fine
        bag.set_owner(Some(owner.clone() as Arc<dyn BagOwner>)).unwrap();

        let interloper = Arc::new(CountingOwner {
            dirtied: AtomicUsize::new(0),
        });
        assert_eq!(
            bag.set_owner(Some(interloper as Arc<dyn BagOwner>)),
            Err(BagError::AlreadyOwned)
        );

        bag.add(rid(1)).unwrap();
        assert_eq!(owner.dirtied.load(Ordering::SeqCst), 1);
    }

    struct StaticRemote {
        counts: HashMap<Rid, u64>,
    }

    impl RemoteBagClient for StaticRemote {
        fn absolute_value(
            &self,
            _owner: Rid,
            _field: &str,
            rid: Rid,
        ) -> Result<u64, BagError> {
            Ok(self.counts.get(&rid).copied().unwrap_or(0))
        }

        fn collection_size(
            &self,
            _owner: Rid,
            _field: &str,
            _pointer: CollectionPointer,
        ) -> Result<u64, BagError> {
            Ok(self.counts.values().sum())
        }
    }

    #[test]
    fn test_remote_stub_delegates_point_queries() {
        let client = Arc::new(StaticRemote {
            counts: HashMap::from([(rid(1), 2), (rid(5), 1)]),
        });
        let backing = RemoteStubBacking::new(
            CollectionPointer::new(FILE_ID, 3),
            rid(100),
            "friends",
            client,
        );
        assert_eq!(backing.remote_size().unwrap(), 3);

        let bag = LinkBag::hydrate(
            backing,
            Arc::new(RidMap::new()) as Arc<dyn RidResolver>,
            u32::MAX,
            1000,
            None,
            vec![],
        );
        assert!(bag.contains(rid(1)).unwrap());
        assert!(!bag.contains(rid(2)).unwrap());
        // streaming the remote collection is refused, not degraded
        assert!(matches!(
            bag.iter().next(),
            Some(Err(BagError::UnsupportedOperation("remote", "scan")))
        ));
        assert!(matches!(
            bag.backing().read_batch(None, 10),
            Err(BagError::UnsupportedOperation("remote", "scan"))
        ));
    }

    #[test]
    fn test_remote_size_through_bag() {
        let client = Arc::new(StaticRemote {
            counts: HashMap::from([(rid(1), 2), (rid(5), 1)]),
        });
        let backing = RemoteStubBacking::new(
            CollectionPointer::new(FILE_ID, 3),
            rid(100),
            "friends",
            client,
        );
        let mut bag = LinkBag::hydrate(
            backing,
            Arc::new(RidMap::new()) as Arc<dyn RidResolver>,
            u32::MAX,
            1000,
            None,
            vec![(rid(1), Change::diff(1))],
        );
        assert_eq!(bag.size(), None);

        // server-side total of 3, plus the unflushed extra occurrence of
        // rid(1), with no scan involved
        assert_eq!(bag.update_size().unwrap(), 4);
        assert_eq!(bag.size(), Some(4));

        bag.remove(rid(5)).unwrap();
        assert_eq!(bag.update_size().unwrap(), 3);
    }

    #[test]
    fn test_merge_pending_from() {
        let manager = manager();
        let resolver = Arc::new(RidMap::new());
        let pointer = seed_collection(&manager, &[(rid(1), 2), (rid(3), 1)]);
        let tree = manager.tree(FILE_ID).unwrap();
        let mut shared = LinkBag::hydrate(
            TreeBacking::new(tree.clone(), Some(pointer)),
            resolver.clone(),
            u32::MAX,
            1000,
            Some(3),
            vec![(rid(1), Change::diff(1))],
        );
        let working = LinkBag::hydrate(
            TreeBacking::new(tree, Some(pointer)),
            resolver,
            u32::MAX,
            1000,
            Some(3),
            vec![(rid(1), Change::diff(1)), (rid(3), Change::absolute(0))],
        );

        shared.merge_pending_from(&working).unwrap();
        assert_eq!(shared.size(), None);
        // relative changes stacked (2+1+1), the absolute override pinned
        // rid(3) to zero
        assert_eq!(shared.update_size().unwrap(), 4);
        assert_eq!(collect(&shared), vec![rid(1); 4]);
    }

    mod facade {
        use super::*;
        use crate::RidBag;
        use pretty_assertions::assert_eq;

        fn small_config() -> BagConfig {
            BagConfig {
                embedded_to_tree_threshold: Some(4),
                tree_to_embedded_threshold: Some(2),
                ..BagConfig::default()
            }
        }

        #[test]
        fn test_threshold_conversion_carries_contents() {
            let manager = manager();
            let resolver = Arc::new(RidMap::new());
            let mut bag =
                RidBag::new(manager, resolver, small_config(), FILE_ID).unwrap();
            bag.enable_tracking();

            for p in 1..=5 {
                bag.add(rid(p)).unwrap();
            }
            assert!(!bag.is_embedded());
            assert_eq!(bag.size(), Some(5));
            // the full history survived the representation change
            assert_eq!(bag.tracker().timeline().len(), 5);
            assert!(bag.is_modified());

            for p in 1..=4 {
                bag.remove(rid(p)).unwrap();
            }
            assert!(bag.is_embedded());
            assert_eq!(bag.size(), Some(1));
            assert!(bag.contains(rid(5)).unwrap());

            let contents: Vec<_> = bag.iter().collect::<Result<Vec<_>, _>>().unwrap();
            assert_eq!(contents, vec![rid(5)]);
        }

        #[test]
        fn test_hysteresis_band_avoids_flapping() {
            let manager = manager();
            let resolver = Arc::new(RidMap::new());
            let mut bag =
                RidBag::new(manager, resolver, small_config(), FILE_ID).unwrap();
            for p in 1..=5 {
                bag.add(rid(p)).unwrap();
            }
            assert!(!bag.is_embedded());

            // oscillating around the upper threshold stays a tree, because
            // the downward boundary is lower
            for _ in 0..3 {
                bag.remove(rid(5)).unwrap();
                assert!(!bag.is_embedded());
                bag.add(rid(5)).unwrap();
                assert!(!bag.is_embedded());
            }
        }

        #[test]
        fn test_facade_commit_roundtrip() {
            let manager = manager();
            let resolver = Arc::new(RidMap::new());
            let mut bag = RidBag::new(
                manager.clone(),
                resolver.clone(),
                small_config(),
                FILE_ID,
            )
            .unwrap();
            for p in 1..=6 {
                bag.add(rid(p)).unwrap();
            }
            assert!(!bag.is_embedded());

            let mut ctx = BagCommitContext::new(Uuid::new_v4());
            bag.register_pending(&mut ctx).unwrap();
            let pointer = bag.pointer().unwrap();
            manager.materialize(ctx).unwrap();
            bag.changes_flushed().unwrap();

            let reloaded = RidBag::from_tree_pointer(
                manager,
                resolver,
                small_config(),
                pointer,
                Some(6),
                vec![],
            )
            .unwrap();
            assert_eq!(reloaded.size(), Some(6));
            assert!(bag == reloaded);
        }

        #[test]
        fn test_downward_conversion_purges_stored_collection() {
            let manager = manager();
            let resolver = Arc::new(RidMap::new());
            let pointer = seed_collection(
                &manager,
                &[(rid(1), 1), (rid(2), 1), (rid(3), 1)],
            );
            let mut bag = RidBag::from_tree_pointer(
                manager.clone(),
                resolver,
                small_config(),
                pointer,
                Some(3),
                vec![],
            )
            .unwrap();

            bag.remove(rid(2)).unwrap();
            bag.remove(rid(3)).unwrap();
            assert!(bag.is_embedded());

            let mut ctx = BagCommitContext::new(Uuid::new_v4());
            bag.register_pending(&mut ctx).unwrap();
            manager.materialize(ctx).unwrap();

            // the orphaned tree collection is gone
            assert_eq!(manager.delete_collection(pointer).unwrap(), 0);
            assert!(bag.contains(rid(1)).unwrap());
        }

        #[test]
        fn test_unfinalized_entry_survives_flush_failure() {
            let manager = manager();
            let resolver = Arc::new(RidMap::new());
            let mut bag = RidBag::new(
                manager,
                resolver.clone() as Arc<dyn RidResolver>,
                small_config(),
                FILE_ID,
            )
            .unwrap();
            let temp = resolver.allocate();
            bag.add(temp).unwrap();

            // flushing with an unresolved temporary entry fails and must
            // not destroy the entry
            assert!(matches!(
                bag.changes_flushed(),
                Err(BagError::IllegalState(_))
            ));
            assert_eq!(bag.size(), Some(1));
            assert!(bag.contains(temp).unwrap());
            let contents: Vec<_> = bag.iter().collect::<Result<Vec<_>, _>>().unwrap();
            assert_eq!(contents, vec![temp]);

            // once resolved, the same flush succeeds
            let Rid::Temp(handle) = temp else { panic!() };
            resolver.bind(handle, rid(42)).unwrap();
            bag.finalize_new_entry(temp, rid(42)).unwrap();
            bag.changes_flushed().unwrap();
            assert_eq!(bag.size(), Some(1));
            assert!(bag.contains(rid(42)).unwrap());
        }

        #[test]
        fn test_facade_rollback() {
            let manager = manager();
            let resolver = Arc::new(RidMap::new());
            let mut bag =
                RidBag::new(manager, resolver, small_config(), FILE_ID).unwrap();
            bag.add(rid(1)).unwrap();
            bag.enable_tracking();
            bag.add(rid(2)).unwrap();
            bag.remove(rid(1)).unwrap();

            let events = bag.tracker().timeline().to_vec();
            let reverted = bag.return_original_state(&events).unwrap();
            assert_eq!(reverted.size(), Some(1));
            assert!(reverted.contains(rid(1)).unwrap());
            assert!(!reverted.contains(rid(2)).unwrap());
        }
    }
}
