//! Chunk manager unit tests

#[cfg(test)]
mod tests {
    use atlas_world::chunk::{ChunkManager, OccupancyGrid};
    use atlas_world::config::WorldConfig;
    use atlas_world::contract::{Contract, SchemaRegistry};
    use atlas_world::layer::LayerRegistry;
    use atlas_world::protocol::{DeltaKind, ServerMessage};
    use atlas_world::session::Outbox;
    use atlas_world::store::EntityStore;
    use atlas_world::types::{ChunkKey, SessionId, Vec3};
    use std::collections::HashSet;
    use std::str::FromStr;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Rig {
        store: EntityStore,
        layers: LayerRegistry,
        chunks: ChunkManager,
        outbox: Outbox,
    }

    fn rig_with(config: WorldConfig) -> Rig {
        let config = Arc::new(config);
        let outbox = Outbox::new();
        Rig {
            store: EntityStore::new(SchemaRegistry::new()),
            layers: LayerRegistry::new(config.chunk_size, config.gravity),
            chunks: ChunkManager::new(config, outbox.clone()),
            outbox,
        }
    }

    fn rig() -> Rig {
        rig_with(WorldConfig::default())
    }

    fn attach(rig: &Rig, session: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(256);
        rig.outbox.register(session, tx);
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn make_entity(rig: &mut Rig, id: &str, position: Vec3) {
        rig.store
            .create(
                id,
                vec![
                    Contract::Identity {
                        id: id.to_owned(),
                        name: None,
                        description: None,
                    },
                    Contract::Mobility {
                        position,
                        velocity: None,
                        max_speed: None,
                        acceleration: None,
                    },
                ],
            )
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // ChunkKey canonical form
    // -----------------------------------------------------------------------

    #[test]
    fn chunk_key_string_round_trips() {
        for key in [
            ChunkKey::new("default", 0, 0, 0),
            ChunkKey::new("nether", -3, 1, 42),
            ChunkKey::new("層", 2147483647, -2147483648, -1),
        ] {
            let parsed = ChunkKey::from_str(&key.to_string()).unwrap();
            assert_eq!(parsed, key);
        }
        assert_eq!(ChunkKey::new("default", 1, -2, 3).to_string(), "default:1,-2,3");
    }

    #[test]
    fn malformed_chunk_keys_are_rejected() {
        for bad in [
            "default",
            "default:1,2",
            "default:1,2,3,4",
            ":1,2,3",
            "a:b:1,2,3",
            "default:+1,2,3",
            "default:1,,3",
            "default:1,2,x",
        ] {
            assert!(ChunkKey::from_str(bad).is_err(), "accepted '{bad}'");
        }
    }

    // -----------------------------------------------------------------------
    // Occupancy grid
    // -----------------------------------------------------------------------

    #[test]
    fn occupancy_set_and_get() {
        let mut grid = OccupancyGrid::new(16);
        assert!(!grid.is_solid(3, 4, 5));
        grid.set_solid(3, 4, 5, true);
        assert!(grid.is_solid(3, 4, 5));
        grid.set_solid(3, 4, 5, false);
        assert!(!grid.is_solid(3, 4, 5));
    }

    #[test]
    fn occupancy_clips_out_of_range() {
        let mut grid = OccupancyGrid::new(16);
        grid.set_solid(-1, 0, 0, true);
        grid.set_solid(16, 0, 0, true);
        assert!(!grid.is_solid(-1, 0, 0));
        assert!(!grid.is_solid(16, 0, 0));
        assert!(!grid.any_solid());
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    #[test]
    fn versions_start_at_one_and_bump_on_every_mutation() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        make_entity(&mut r, "e1", Vec3::new(1.0, 1.0, 1.0));

        assert_eq!(r.chunks.get_or_create(&key).version, 1);

        r.chunks.add_entity("e1", &key, &r.store);
        assert_eq!(r.chunks.version_of(&key), 2);

        r.chunks.entity_updated(&key, "e1", &r.store);
        assert_eq!(r.chunks.version_of(&key), 3);

        r.chunks.remove_entity("e1", &key);
        assert_eq!(r.chunks.version_of(&key), 4);

        // Idempotent re-removal does not bump.
        r.chunks.remove_entity("e1", &key);
        assert_eq!(r.chunks.version_of(&key), 4);
    }

    #[test]
    fn wire_versions_are_strictly_increasing() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        make_entity(&mut r, "e1", Vec3::new(1.0, 1.0, 1.0));

        let mut rx = attach(&r, "s1");
        r.chunks.get_or_create(&key);
        r.chunks.subscribe("s1", &key, &r.store);

        r.chunks.add_entity("e1", &key, &r.store);
        r.chunks.entity_updated(&key, "e1", &r.store);
        r.chunks.remove_entity("e1", &key);

        let mut last = 0u64;
        for msg in drain(&mut rx) {
            let version = match msg {
                ServerMessage::ChunkSnapshot { version, .. } => version,
                ServerMessage::ChunkDelta { version, .. } => version,
                _ => continue,
            };
            assert!(version > last, "version {version} after {last}");
            last = version;
        }
        assert!(last >= 4);
    }

    #[test]
    fn deltas_carry_membership_changes_to_subscribers() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        make_entity(&mut r, "e1", Vec3::new(1.0, 1.0, 1.0));

        let mut rx = attach(&r, "s1");
        r.chunks.get_or_create(&key);
        r.chunks.subscribe("s1", &key, &r.store);
        drain(&mut rx); // snapshot

        r.chunks.add_entity("e1", &key, &r.store);
        let msgs = drain(&mut rx);
        match &msgs[..] {
            [ServerMessage::ChunkDelta { delta, .. }] => {
                assert_eq!(delta.kind, DeltaKind::EntityAdd);
                assert_eq!(delta.entity_id, "e1");
                assert!(delta.contracts.is_some());
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    #[test]
    fn subscribe_sends_a_snapshot_of_current_members() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        make_entity(&mut r, "e1", Vec3::new(1.0, 1.0, 1.0));
        r.chunks.add_entity("e1", &key, &r.store);

        let mut rx = attach(&r, "s1");
        r.chunks.subscribe("s1", &key, &r.store);

        let msgs = drain(&mut rx);
        match &msgs[..] {
            [ServerMessage::ChunkSnapshot {
                chunk_key,
                entities,
                version,
            }] => {
                assert_eq!(chunk_key, &key);
                assert_eq!(entities.len(), 1);
                assert_eq!(entities[0].id, "e1");
                assert!(*version >= 2);
            }
            other => panic!("unexpected messages {other:?}"),
        }
    }

    #[test]
    fn unsubscribed_sessions_stop_receiving() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        make_entity(&mut r, "e1", Vec3::new(1.0, 1.0, 1.0));

        let mut rx = attach(&r, "s1");
        r.chunks.subscribe("s1", &key, &r.store);
        r.chunks.unsubscribe("s1", &key);
        drain(&mut rx);

        r.chunks.add_entity("e1", &key, &r.store);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn unregistered_subscriber_is_dropped_on_first_send() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        // No outbox channel for "ghost": the snapshot send fails and the
        // subscriber is dropped immediately.
        r.chunks.subscribe("ghost", &key, &r.store);
        assert!(r.chunks.subscribers_of(&key).is_empty());
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    #[test]
    fn generation_is_idempotent_on_the_key() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);

        r.chunks.load(&key, &mut r.store, &mut r.layers);
        assert_eq!(r.store.len(), 1);
        let members = r.chunks.entities_in(&key);
        assert_eq!(members.len(), 1);
        let id = &members[0];
        assert!(r.store.is_solid(id));
        assert_eq!(r.layers.entity_layer(id), "default");

        // Unload + reload must not duplicate.
        r.chunks.unload(&key);
        r.chunks.load(&key, &mut r.store, &mut r.layers);
        assert_eq!(r.store.len(), 1);
        assert_eq!(r.chunks.entities_in(&key).len(), 1);
    }

    #[test]
    fn generation_marks_the_center_voxel_solid() {
        let mut r = rig();
        let key = ChunkKey::new("default", 4, 0, -4);
        r.chunks.load(&key, &mut r.store, &mut r.layers);
        let chunk = r.chunks.get(&key).unwrap();
        assert!(chunk.loaded);
        assert!(chunk.occupancy.as_ref().unwrap().any_solid());
    }

    #[test]
    fn off_lattice_chunks_generate_nothing() {
        let mut r = rig();
        for key in [
            ChunkKey::new("default", 1, 0, 0),
            ChunkKey::new("default", 4, 1, 4),
            ChunkKey::new("default", 2, 0, 2),
        ] {
            r.chunks.load(&key, &mut r.store, &mut r.layers);
            assert!(r.chunks.entities_in(&key).is_empty(), "generated in {key}");
        }
        assert_eq!(r.store.len(), 0);
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    #[test]
    fn over_cap_loaded_chunks_are_unloaded() {
        let mut r = rig_with(WorldConfig {
            max_loaded_chunks: 2,
            ..WorldConfig::default()
        });
        for cx in 0..5 {
            // Off the generation lattice so chunks stay empty.
            let key = ChunkKey::new("default", cx * 4 + 1, 0, 1);
            r.chunks.load(&key, &mut r.store, &mut r.layers);
        }
        assert_eq!(r.chunks.loaded_count(), 5);

        let report = r.chunks.run_maintenance(&HashSet::new());
        assert!(report.unloaded.len() >= 3);
        assert!(r.chunks.loaded_count() <= 2);
        // Metadata survives unloading.
        assert_eq!(r.chunks.retained_count(), 5);
    }

    #[test]
    fn idle_empty_chunks_are_deleted_past_the_retention_cap() {
        let mut r = rig_with(WorldConfig {
            max_retained_chunks: 3,
            chunk_unload_delay_ms: 0,
            ..WorldConfig::default()
        });
        for cx in 0..6 {
            r.chunks.get_or_create(&ChunkKey::new("default", cx * 4 + 1, 0, 1));
        }
        // One chunk keeps an entity and must survive.
        let keeper = ChunkKey::new("default", 1, 0, 1);
        make_entity(&mut r, "e1", Vec3::zero());
        r.chunks.add_entity("e1", &keeper, &r.store);

        let report = r.chunks.run_maintenance(&HashSet::new());
        assert!(report.deleted >= 5);
        assert!(r.chunks.get(&keeper).is_some());
    }

    #[test]
    fn dead_sessions_are_pruned_from_subscriber_sets() {
        let mut r = rig();
        let key = ChunkKey::new("default", 0, 0, 0);
        let _rx1 = attach(&r, "alive");
        let _rx2 = attach(&r, "dead");
        r.chunks.subscribe("alive", &key, &r.store);
        r.chunks.subscribe("dead", &key, &r.store);

        let live: HashSet<SessionId> = ["alive".to_owned()].into();
        let report = r.chunks.run_maintenance(&live);
        assert_eq!(report.pruned_subscribers, 1);
        assert_eq!(r.chunks.subscribers_of(&key), vec!["alive".to_owned()]);
    }
}
