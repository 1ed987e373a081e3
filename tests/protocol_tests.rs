//! Wire protocol tests

#[cfg(test)]
mod tests {
    use atlas_world::contract::{Contract, ContractKind};
    use atlas_world::error::WorldError;
    use atlas_world::protocol::{
        parse_client_message, ChunkDelta, ClientMessage, DeltaKind, Direction, ServerMessage,
    };
    use atlas_world::types::{ChunkKey, Vec3};

    // -----------------------------------------------------------------------
    // Inbound classification
    // -----------------------------------------------------------------------

    #[test]
    fn known_messages_parse() {
        let msg = parse_client_message(
            r#"{"type":"move","want":{"x":1.0,"y":2.0,"z":3.0}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Move {
                want: Vec3::new(1.0, 2.0, 3.0)
            }
        );

        let msg = parse_client_message(
            r#"{"type":"login","layerId":"default","playerName":"Ada"}"#,
        )
        .unwrap();
        assert_eq!(msg.command_name(), "login");

        let msg = parse_client_message(
            r#"{"type":"move_dir","directions":["north","east"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::MoveDir {
                directions: vec![Direction::North, Direction::East]
            }
        );
    }

    #[test]
    fn unknown_type_vs_malformed_known_message() {
        let err = parse_client_message(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_MESSAGE_TYPE");

        // Known type, missing required field.
        let err = parse_client_message(r#"{"type":"move"}"#).unwrap_err();
        assert_eq!(err.code, "INVALID_MESSAGE");

        let err = parse_client_message("not json at all").unwrap_err();
        assert_eq!(err.code, "INVALID_MESSAGE");

        let err = parse_client_message(r#"{"no_type":true}"#).unwrap_err();
        assert_eq!(err.code, "INVALID_MESSAGE");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = parse_client_message(
            r#"{"type":"logout","surprise":42,"nested":{"a":1}}"#,
        )
        .unwrap();
        assert_eq!(msg, ClientMessage::Logout {});
    }

    #[test]
    fn subscribe_chunks_carries_wire_chunk_keys() {
        let msg = parse_client_message(
            r#"{"type":"subscribe_chunks","chunkKeys":[
                {"layerId":"default","cx":1,"cy":0,"cz":-2}]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubscribeChunks {
                chunk_keys: vec![ChunkKey::new("default", 1, 0, -2)]
            }
        );
    }

    #[test]
    fn add_contract_carries_a_tagged_contract() {
        let msg = parse_client_message(
            r#"{"type":"add_contract","entityId":"e1",
                "contract":{"kind":"solidity","solid":true}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::AddContract {
                entity_id,
                contract,
            } => {
                assert_eq!(entity_id, "e1");
                assert_eq!(
                    contract,
                    Contract::Solidity {
                        solid: true,
                        collision_groups: None
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound shapes
    // -----------------------------------------------------------------------

    #[test]
    fn hello_ok_uses_camel_case_fields() {
        let json = serde_json::to_value(ServerMessage::HelloOk {
            client_id: "client-1".to_owned(),
            server_id: "atlas-1".to_owned(),
            server_version: "0.1.0".to_owned(),
        })
        .unwrap();
        assert_eq!(json["type"], "hello_ok");
        assert_eq!(json["clientId"], "client-1");
        assert_eq!(json["serverId"], "atlas-1");
        assert_eq!(json["serverVersion"], "0.1.0");
    }

    #[test]
    fn chunk_delta_wire_form() {
        let json = serde_json::to_value(ServerMessage::ChunkDelta {
            chunk_key: ChunkKey::new("default", 0, 0, 0),
            delta: ChunkDelta {
                kind: DeltaKind::EntityAdd,
                entity_id: "e1".to_owned(),
                contracts: Some(vec![]),
            },
            version: 7,
        })
        .unwrap();
        assert_eq!(json["type"], "chunk_delta");
        assert_eq!(json["chunkKey"]["layerId"], "default");
        assert_eq!(json["delta"]["type"], "entity_add");
        assert_eq!(json["delta"]["entityId"], "e1");
        assert_eq!(json["version"], 7);
    }

    #[test]
    fn move_result_omits_absent_reason() {
        let json = serde_json::to_value(ServerMessage::MoveResult {
            success: true,
            position: Vec3::zero(),
            reason: None,
        })
        .unwrap();
        assert_eq!(json["type"], "move_result");
        assert_eq!(json["success"], true);
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn error_reply_shape() {
        let json =
            serde_json::to_value(ServerMessage::error("FORBIDDEN", "not allowed")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "FORBIDDEN");
        assert_eq!(json["message"], "not allowed");
    }

    #[test]
    fn world_errors_convert_through_the_code_table() {
        for (err, code) in [
            (WorldError::NotAuthenticated, "NOT_AUTHENTICATED"),
            (WorldError::Forbidden("x".to_owned()), "FORBIDDEN"),
            (
                WorldError::PermissionDenied("x".to_owned()),
                "PERMISSION_DENIED",
            ),
            (WorldError::InvalidMessage("x".to_owned()), "INVALID_MESSAGE"),
            (
                WorldError::InvalidContract("x".to_owned()),
                "ADD_CONTRACT_FAILED",
            ),
            (
                WorldError::LimitExceeded {
                    entity: "e1".to_owned(),
                    kind: ContractKind::Entrance,
                },
                "ADD_CONTRACT_FAILED",
            ),
            (WorldError::UnknownEntity("e1".to_owned()), "CONTRACT_NOT_FOUND"),
            (WorldError::UnknownLayer("nether".to_owned()), "JOIN_FAILED"),
            (WorldError::AlreadyExists("e1".to_owned()), "JOIN_FAILED"),
        ] {
            assert_eq!(err.wire_code(), code);
            match err.to_reply() {
                ServerMessage::Error { code: got, message } => {
                    assert_eq!(got, code);
                    assert_eq!(message, err.to_string());
                }
                other => panic!("expected an error reply, got {other:?}"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Directions
    // -----------------------------------------------------------------------

    #[test]
    fn cardinal_units_match_the_compass() {
        assert_eq!(Direction::North.unit(), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(Direction::South.unit(), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(Direction::West.unit(), Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(Direction::East.unit(), Vec3::new(1.0, 0.0, 0.0));
    }
}
