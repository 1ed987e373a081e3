//! Archetype catalog and spawner tests

#[cfg(test)]
mod tests {
    use atlas_world::archetype::{player_contracts, Archetype, ArchetypeCatalog};
    use atlas_world::contract::{Contract, ContractKind, Geometry};
    use atlas_world::protocol::BASE_COMMANDS;
    use atlas_world::types::Vec3;
    use std::collections::HashMap;

    fn crate_template() -> Archetype {
        Archetype {
            id: "crate".to_owned(),
            name: "Wooden Crate".to_owned(),
            tags: vec!["prop".to_owned()],
            contracts: vec![
                Contract::Identity {
                    id: "template".to_owned(),
                    name: Some("Crate".to_owned()),
                    description: None,
                },
                Contract::Mobility {
                    position: Vec3::zero(),
                    velocity: None,
                    max_speed: None,
                    acceleration: None,
                },
                Contract::Visual {
                    color: Some("#aa7744".to_owned()),
                    texture: None,
                    material: Some("wood".to_owned()),
                    visible: Some(true),
                },
            ],
        }
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    #[test]
    fn define_stores_and_overwrites() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(crate_template());
        assert_eq!(catalog.get("crate").unwrap().name, "Wooden Crate");

        let mut replacement = crate_template();
        replacement.name = "Iron Crate".to_owned();
        catalog.define(replacement);
        assert_eq!(catalog.get("crate").unwrap().name, "Iron Crate");
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn unknown_archetype_fails() {
        let catalog = ArchetypeCatalog::new();
        assert!(catalog
            .clone_contracts("missing", "e1", Vec3::zero(), None)
            .is_err());
    }

    // -----------------------------------------------------------------------
    // Cloning rules
    // -----------------------------------------------------------------------

    #[test]
    fn cloning_rewrites_identity_and_position() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(crate_template());

        let contracts = catalog
            .clone_contracts("crate", "crate-1", Vec3::new(7.0, 8.0, 9.0), None)
            .unwrap();

        let identity = contracts
            .iter()
            .find(|c| c.kind() == ContractKind::Identity)
            .unwrap();
        match identity {
            Contract::Identity { id, name, .. } => {
                assert_eq!(id, "crate-1");
                // Template fields other than the id survive the clone.
                assert_eq!(name.as_deref(), Some("Crate"));
            }
            _ => unreachable!(),
        }

        let mobility = contracts
            .iter()
            .find(|c| c.kind() == ContractKind::Mobility)
            .unwrap();
        match mobility {
            Contract::Mobility { position, .. } => {
                assert_eq!(*position, Vec3::new(7.0, 8.0, 9.0));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn overrides_shallow_merge_by_kind() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(crate_template());

        let overrides = HashMap::from([(
            "visual".to_owned(),
            serde_json::json!({"color": "#ff0000"}),
        )]);
        let contracts = catalog
            .clone_contracts("crate", "crate-2", Vec3::zero(), Some(&overrides))
            .unwrap();

        let visual = contracts
            .iter()
            .find(|c| c.kind() == ContractKind::Visual)
            .unwrap();
        match visual {
            Contract::Visual {
                color, material, ..
            } => {
                assert_eq!(color.as_deref(), Some("#ff0000"));
                // Untouched fields keep their template values.
                assert_eq!(material.as_deref(), Some("wood"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn override_cannot_change_the_kind() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(crate_template());

        let overrides = HashMap::from([(
            "visual".to_owned(),
            serde_json::json!({"kind": "solidity", "color": "#00ff00"}),
        )]);
        let contracts = catalog
            .clone_contracts("crate", "crate-3", Vec3::zero(), Some(&overrides))
            .unwrap();
        assert!(contracts.iter().any(|c| c.kind() == ContractKind::Visual));
        assert!(!contracts.iter().any(|c| c.kind() == ContractKind::Solidity));
    }

    #[test]
    fn bad_override_is_an_invalid_contract() {
        let mut catalog = ArchetypeCatalog::new();
        catalog.define(crate_template());

        let overrides = HashMap::from([(
            "mobility".to_owned(),
            serde_json::json!({"position": "not-a-vector"}),
        )]);
        assert!(catalog
            .clone_contracts("crate", "crate-4", Vec3::zero(), Some(&overrides))
            .is_err());
    }

    // -----------------------------------------------------------------------
    // Id generation
    // -----------------------------------------------------------------------

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let mut catalog = ArchetypeCatalog::new();
        let a = catalog.next_id("crate");
        let b = catalog.next_id("crate");
        assert!(a.starts_with("crate-"));
        assert!(b.starts_with("crate-"));
        assert_ne!(a, b);
    }

    // -----------------------------------------------------------------------
    // Player factory
    // -----------------------------------------------------------------------

    #[test]
    fn player_factory_produces_the_standard_contract_set() {
        let contracts = player_contracts("p1", Some("Ada".to_owned()), Vec3::new(0.0, 10.0, 0.0));
        let kind_of = |k: ContractKind| contracts.iter().find(|c| c.kind() == k);

        match kind_of(ContractKind::Identity).unwrap() {
            Contract::Identity { id, name, .. } => {
                assert_eq!(id, "p1");
                assert_eq!(name.as_deref(), Some("Ada"));
            }
            _ => unreachable!(),
        }

        match kind_of(ContractKind::Shape).unwrap() {
            Contract::Shape { min, max, geometry } => {
                assert_eq!(*geometry, Geometry::Box);
                assert_eq!(*max - *min, Vec3::new(0.6, 1.8, 0.6));
            }
            _ => unreachable!(),
        }

        match kind_of(ContractKind::Inventory).unwrap() {
            Contract::Inventory { capacity, .. } => assert_eq!(*capacity, Some(10)),
            _ => unreachable!(),
        }

        match kind_of(ContractKind::Durability).unwrap() {
            Contract::Durability {
                health, max_health, ..
            } => {
                assert_eq!(*health, 100.0);
                assert_eq!(*max_health, 100.0);
            }
            _ => unreachable!(),
        }

        match kind_of(ContractKind::MovementRules).unwrap() {
            Contract::MovementRules {
                step_distance,
                allow_diagonal,
                diagonal_normalized,
            } => {
                assert_eq!(*step_distance, 1.0);
                assert!(*allow_diagonal);
                assert!(*diagonal_normalized);
            }
            _ => unreachable!(),
        }

        match kind_of(ContractKind::CommandAccess).unwrap() {
            Contract::CommandAccess { commands } => {
                for cmd in BASE_COMMANDS {
                    assert!(commands.iter().any(|c| c == cmd), "missing {cmd}");
                }
            }
            _ => unreachable!(),
        }

        match kind_of(ContractKind::ContractLimit).unwrap() {
            Contract::ContractLimit { limits } => {
                assert_eq!(limits.get("entrance"), Some(&5));
                assert_eq!(limits.get("portable"), Some(&3));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn player_archetype_resolves_without_a_defined_template() {
        let catalog = ArchetypeCatalog::new();
        let contracts = catalog
            .clone_contracts("player", "p9", Vec3::new(1.0, 2.0, 3.0), None)
            .unwrap();
        assert!(contracts.iter().any(|c| c.kind() == ContractKind::Shape));
        match contracts
            .iter()
            .find(|c| c.kind() == ContractKind::Mobility)
            .unwrap()
        {
            Contract::Mobility { position, .. } => assert_eq!(*position, Vec3::new(1.0, 2.0, 3.0)),
            _ => unreachable!(),
        }
    }
}
