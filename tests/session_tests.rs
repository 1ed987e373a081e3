//! Session manager tests: capability gating, dispatch, auto-subscription.

#[cfg(test)]
mod tests {
    use atlas_world::config::WorldConfig;
    use atlas_world::contract::{Contract, ContractKind};
    use atlas_world::events::EventHub;
    use atlas_world::protocol::{ClientMessage, Direction, ServerMessage};
    use atlas_world::service::WorldCore;
    use atlas_world::session::Outbox;
    use atlas_world::types::{SessionId, Vec3};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn core() -> WorldCore {
        core_with(WorldConfig::default())
    }

    fn core_with(config: WorldConfig) -> WorldCore {
        WorldCore::new(Arc::new(config), Outbox::new(), EventHub::default())
    }

    fn connect(core: &mut WorldCore) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(512);
        let id = core.connect(tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn login(core: &mut WorldCore, sid: &str, rx: &mut mpsc::Receiver<ServerMessage>) -> String {
        core.handle_message(
            sid,
            ClientMessage::Login {
                layer_id: None,
                player_name: Some("Ada".to_owned()),
            },
        );
        drain(rx)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::LoginOk { player_id, .. } => Some(player_id),
                _ => None,
            })
            .expect("login_ok not received")
    }

    fn error_codes(msgs: &[ServerMessage]) -> Vec<String> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMessage::Error { code, .. } => Some(code.clone()),
                _ => None,
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn connect_greets_with_hello_ok() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        match &drain(&mut rx)[..] {
            [ServerMessage::HelloOk {
                client_id,
                server_id,
                server_version,
            }] => {
                assert_eq!(client_id, &sid);
                assert!(!server_id.is_empty());
                assert!(!server_version.is_empty());
            }
            other => panic!("unexpected greeting {other:?}"),
        }
    }

    #[test]
    fn login_spawns_and_binds_a_player() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);

        let player = login(&mut c, &sid, &mut rx);
        assert!(c.store.contains(&player));
        assert_eq!(c.layers.entity_layer(&player), "default");
        // Spawned at the default layer's spawn point.
        assert_eq!(c.store.position(&player), Some(Vec3::new(0.0, 10.0, 0.0)));
        // Default view: auto-subscribed to the player's own chunk.
        let key = c.chunk_key_of(&player).unwrap();
        assert!(c.chunks.subscribers_of(&key).contains(&sid));
    }

    #[test]
    fn login_to_unknown_layer_fails() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        c.handle_message(
            &sid,
            ClientMessage::Login {
                layer_id: Some("atlantis".to_owned()),
                player_name: None,
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["JOIN_FAILED"]);
    }

    #[test]
    fn logout_despawns_and_clears_subscriptions() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);
        let key = c.chunk_key_of(&player).unwrap();

        c.handle_message(&sid, ClientMessage::Logout {});
        let msgs = drain(&mut rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::LogoutOk {})));
        assert!(!c.store.contains(&player));
        assert!(!c.chunks.subscribers_of(&key).contains(&sid));
    }

    #[test]
    fn disconnect_cleans_up_everything() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);

        c.disconnect(&sid, "test");
        assert!(!c.store.contains(&player));
        assert!(c.sessions.get(&sid).is_none());
        assert!(!c.outbox().is_registered(&sid));
    }

    #[test]
    fn idle_sessions_time_out_via_maintenance() {
        let mut c = core_with(WorldConfig {
            ws_connection_timeout_ms: 0,
            ..WorldConfig::default()
        });
        let (sid, _rx) = connect(&mut c);
        assert!(c.sessions.get(&sid).is_some());
        c.run_maintenance();
        assert!(c.sessions.get(&sid).is_none());
    }

    // -----------------------------------------------------------------------
    // Capability gating
    // -----------------------------------------------------------------------

    #[test]
    fn commands_require_a_bound_player_except_login() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);

        c.handle_message(
            &sid,
            ClientMessage::Move {
                want: Vec3::new(1.0, 0.0, 0.0),
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["NOT_AUTHENTICATED"]);

        c.handle_message(&sid, ClientMessage::SetView { radius: 10.0 });
        assert_eq!(error_codes(&drain(&mut rx)), vec!["NOT_AUTHENTICATED"]);
    }

    #[test]
    fn world_command_allow_list_gates_commands() {
        let mut c = core();
        // A world-rules entity in the default layer that only allows login
        // and logout.
        c.store
            .create(
                "world-rules",
                vec![Contract::WorldCommands {
                    commands: vec!["login".to_owned(), "logout".to_owned()],
                }],
            )
            .unwrap();
        c.layers.set_entity_layer("world-rules", "default");

        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        login(&mut c, &sid, &mut rx);

        c.handle_message(
            &sid,
            ClientMessage::Move {
                want: Vec3::new(1.0, 10.0, 0.0),
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["FORBIDDEN"]);
    }

    #[test]
    fn player_command_access_gates_commands() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);

        // Replace the granted set with one that omits move.
        c.store
            .add(
                &player,
                Contract::CommandAccess {
                    commands: vec!["logout".to_owned()],
                },
            )
            .unwrap();

        c.handle_message(
            &sid,
            ClientMessage::Move {
                want: Vec3::new(1.0, 10.0, 0.0),
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["PERMISSION_DENIED"]);
    }

    // -----------------------------------------------------------------------
    // Contract mutation authorization
    // -----------------------------------------------------------------------

    #[test]
    fn sessions_may_only_mutate_their_own_player() {
        let mut c = core();
        let (s1, mut rx1) = connect(&mut c);
        let (s2, mut rx2) = connect(&mut c);
        drain(&mut rx1);
        drain(&mut rx2);
        let p1 = login(&mut c, &s1, &mut rx1);
        let _p2 = login(&mut c, &s2, &mut rx2);

        c.handle_message(
            &s2,
            ClientMessage::AddContract {
                entity_id: p1.clone(),
                contract: Contract::Visual {
                    color: Some("#000000".to_owned()),
                    texture: None,
                    material: None,
                    visible: Some(false),
                },
            },
        );
        assert_eq!(error_codes(&drain(&mut rx2)), vec!["PERMISSION_DENIED"]);
    }

    #[test]
    fn add_contract_validates_and_broadcasts() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);

        // Invalid contract → ADD_CONTRACT_FAILED, state untouched.
        c.handle_message(
            &sid,
            ClientMessage::AddContract {
                entity_id: player.clone(),
                contract: Contract::Portable {
                    can_pickup: true,
                    weight: -1.0,
                },
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["ADD_CONTRACT_FAILED"]);

        // Valid contract → silent success + entity_update delta on the
        // player's chunk (the session is auto-subscribed to it).
        c.handle_message(
            &sid,
            ClientMessage::AddContract {
                entity_id: player.clone(),
                contract: Contract::Portable {
                    can_pickup: true,
                    weight: 2.0,
                },
            },
        );
        let msgs = drain(&mut rx);
        assert!(error_codes(&msgs).is_empty());
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::ChunkDelta { delta, .. }
                if delta.entity_id == player)));
    }

    #[test]
    fn remove_contract_classifies_failures() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);

        c.handle_message(
            &sid,
            ClientMessage::RemoveContract {
                entity_id: player.clone(),
                contract_type: "telepathy".to_owned(),
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["REMOVE_CONTRACT_FAILED"]);

        c.handle_message(
            &sid,
            ClientMessage::RemoveContract {
                entity_id: player.clone(),
                contract_type: "entrance".to_owned(),
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["CONTRACT_NOT_FOUND"]);

        c.handle_message(
            &sid,
            ClientMessage::RemoveContract {
                entity_id: player.clone(),
                contract_type: "visual".to_owned(),
            },
        );
        assert!(error_codes(&drain(&mut rx)).is_empty());
        assert!(c.store.get(&player, ContractKind::Visual).is_none());
    }

    #[test]
    fn interact_is_reserved() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        login(&mut c, &sid, &mut rx);

        c.handle_message(
            &sid,
            ClientMessage::Interact {
                action: "open".to_owned(),
                target_id: None,
                data: None,
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["NOT_IMPLEMENTED"]);
    }

    // -----------------------------------------------------------------------
    // Movement dispatch
    // -----------------------------------------------------------------------

    #[test]
    fn move_replies_with_a_result_and_updates_the_store() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);
        let start = c.store.position(&player).unwrap();

        c.handle_message(
            &sid,
            ClientMessage::Move {
                want: Vec3::new(3.0, 10.0, 0.0),
            },
        );
        let msgs = drain(&mut rx);
        let result = msgs
            .iter()
            .find_map(|m| match m {
                ServerMessage::MoveResult {
                    success, position, ..
                } => Some((*success, *position)),
                _ => None,
            })
            .expect("move_result not received");
        assert!(result.0);
        assert!(result.1.x > start.x);
        assert_eq!(c.store.position(&player), Some(result.1));
    }

    #[test]
    fn move_dir_steps_by_movement_rules() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);
        let start = c.store.position(&player).unwrap();

        c.handle_message(
            &sid,
            ClientMessage::MoveDir {
                directions: vec![Direction::North],
            },
        );
        let after = c.store.position(&player).unwrap();
        assert!(after.z < start.z, "north is -z");
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::MoveResult { success: true, .. })));

        c.handle_message(
            &sid,
            ClientMessage::MoveDir {
                directions: vec![
                    Direction::North,
                    Direction::East,
                    Direction::South,
                ],
            },
        );
        assert_eq!(error_codes(&drain(&mut rx)), vec!["INVALID_MESSAGE"]);
    }

    // -----------------------------------------------------------------------
    // View-radius auto-subscription
    // -----------------------------------------------------------------------

    #[test]
    fn set_view_subscribes_the_chunk_cube() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);
        drain(&mut rx);

        // ceil(64 / 32) = 2 → a 5×5×5 cube of 125 chunks.
        c.handle_message(&sid, ClientMessage::SetView { radius: 64.0 });
        let msgs = drain(&mut rx);
        let snapshots = msgs
            .iter()
            .filter(|m| matches!(m, ServerMessage::ChunkSnapshot { .. }))
            .count();
        // 124 new chunks (the center was already subscribed at login).
        assert_eq!(snapshots, 124);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::SetViewOk { radius } if *radius == 64.0)));

        let session = c.sessions.get(&sid).unwrap();
        assert_eq!(session.subscriptions.len(), 125);
        let _ = player;
    }

    #[test]
    fn crossing_a_chunk_boundary_rolls_the_subscription_window() {
        let mut c = core();
        let (sid, mut rx) = connect(&mut c);
        drain(&mut rx);
        let player = login(&mut c, &sid, &mut rx);
        c.handle_message(&sid, ClientMessage::SetView { radius: 64.0 });
        drain(&mut rx);

        // Move the player from cx=0 into cx=1 (dt chosen to cover 40 units
        // at the default speed cap), then recompute the window.
        let out = c.apply_move(&player, Vec3::new(40.0, 10.0, 0.0), 8.0);
        assert!(out.ok, "blocked: {:?}", out.blocked_reason);
        c.refresh_subscriptions(&sid);

        let msgs = drain(&mut rx);
        let new_snapshots: Vec<i32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMessage::ChunkSnapshot { chunk_key, .. } => Some(chunk_key.cx),
                _ => None,
            })
            .collect();
        // 25 chunks entered on the cx=3 face, one snapshot each.
        assert_eq!(new_snapshots.len(), 25);
        assert!(new_snapshots.iter().all(|cx| *cx == 3));

        let session = c.sessions.get(&sid).unwrap();
        assert_eq!(session.subscriptions.len(), 125);
        assert!(!session.subscriptions.iter().any(|k| k.cx == -2));
        // The cx=-2 face was unsubscribed.
        for cz in -2..=2 {
            for cy in -2..=2 {
                let key = atlas_world::types::ChunkKey::new("default", -2, cy, cz);
                assert!(!c.chunks.subscribers_of(&key).contains(&sid));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rate limiting
    // -----------------------------------------------------------------------

    #[test]
    fn sessions_account_messages_per_window() {
        let mut c = core();
        let (sid, _rx) = connect(&mut c);
        let session = c.sessions.get_mut(&sid).unwrap();
        let window = Duration::from_secs(60);
        for _ in 0..60 {
            assert!(session.admit_message(window, 60));
        }
        assert!(!session.admit_message(window, 60));
    }
}
