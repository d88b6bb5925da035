//! `controller.*` commands.
//!
//! Inclusion commands hand the shared [`InclusionBridge`] to the driver as
//! its user-callback object.  The bridge is bound to the requesting client
//! only when the driver accepts the inclusion.
//!
//! Route rebuilding answers to both the legacy `heal…` and the current
//! `rebuild…` tags at every schema version.  Likewise
//! `remove_node_from_all_associations` also answers to its old misspelling
//! `remove_node_from_all_assocations`.
//!
//! [`InclusionBridge`]: crate::application::inclusion::InclusionBridge

use std::sync::Arc;

use serde_json::json;
use zwave_core::compat;
use zwave_core::domain::{
    AssociationAddress, DskOrNodeId, ExclusionOptions, InclusionGrant, InclusionOptions,
    Powerlevel, ProvisioningEntry,
};
use zwave_core::driver::InclusionUserCallbacks;

use super::{unknown_tag, Args, CommandContext, CommandRouter, RouterOutcome, RouterResult};
use crate::domain::GatewayError;

pub(super) async fn handle(
    router: &CommandRouter,
    ctx: CommandContext,
    tag: &str,
    args: &Args<'_>,
) -> RouterResult {
    let controller = router.driver.controller();
    let v = ctx.schema_version;
    let callbacks = || -> Arc<dyn InclusionUserCallbacks> { router.inclusion.clone() };
    let mark = router.inclusion.request_mark();
    let accepted = |success: bool| {
        if success {
            router.inclusion.bind(ctx.client, mark);
        }
        json!({ "success": success })
    };

    let result = match tag {
        // ── Membership ────────────────────────────────────────────────────────
        "begin_inclusion" => {
            let options: InclusionOptions = args.optional("options")?.unwrap_or_default();
            accepted(controller.begin_inclusion(options, callbacks()).await?)
        }
        "stop_inclusion" => json!({ "success": controller.stop_inclusion().await? }),
        "begin_exclusion" => {
            let options: ExclusionOptions = args.optional("options")?.unwrap_or_default();
            json!({ "success": controller.begin_exclusion(options).await? })
        }
        "stop_exclusion" => json!({ "success": controller.stop_exclusion().await? }),
        "remove_failed_node" => {
            controller.remove_failed_node(args.node_id()?).await?;
            json!({})
        }
        "replace_failed_node" => {
            let node_id = args.node_id()?;
            let options: InclusionOptions = args.optional("options")?.unwrap_or_default();
            accepted(
                controller
                    .replace_failed_node(node_id, options, callbacks())
                    .await?,
            )
        }
        "is_failed_node" => json!({ "failed": controller.is_failed_node(args.node_id()?).await? }),
        "get_node_neighbors" => {
            json!({ "neighbors": controller.node_neighbors(args.node_id()?).await? })
        }

        // ── User decisions during inclusion ───────────────────────────────────
        "grant_security_classes" => {
            let grant: InclusionGrant = args.required("inclusionGrant")?;
            router.inclusion.resolve_grant(grant)?;
            json!({})
        }
        "validate_dsk_and_enter_pin" => {
            let pin: String = args.required("pin")?;
            router.inclusion.resolve_pin(pin)?;
            json!({})
        }

        // ── Routing ───────────────────────────────────────────────────────────
        "heal_node" | "rebuild_node_routes" => {
            json!({ "success": controller.rebuild_node_routes(args.node_id()?).await? })
        }
        "begin_healing_network" | "begin_rebuilding_routes" => {
            json!({ "success": controller.begin_rebuilding_routes() })
        }
        "stop_healing_network" | "stop_rebuilding_routes" => {
            json!({ "success": controller.stop_rebuilding_routes() })
        }
        "get_known_lifeline_routes" => json!({ "routes": controller.known_lifeline_routes() }),

        // ── Associations ──────────────────────────────────────────────────────
        "get_association_groups" => {
            json!({ "groups": controller.association_groups(association_source(args)?)? })
        }
        "get_associations" => {
            json!({ "associations": controller.associations(association_source(args)?)? })
        }
        "is_association_allowed" => {
            let source = association_source(args)?;
            let group: u8 = args.required("group")?;
            let destination: AssociationAddress = args.required("association")?;
            json!({ "allowed": controller.is_association_allowed(source, group, destination)? })
        }
        "add_associations" => {
            let source = association_source(args)?;
            let group: u8 = args.required("group")?;
            let destinations: Vec<AssociationAddress> = args.required("associations")?;
            controller.add_associations(source, group, destinations).await?;
            json!({})
        }
        "remove_associations" => {
            let source = association_source(args)?;
            let group: u8 = args.required("group")?;
            let destinations: Vec<AssociationAddress> = args.required("associations")?;
            controller.remove_associations(source, group, destinations).await?;
            json!({})
        }
        "remove_node_from_all_associations" | "remove_node_from_all_assocations" => {
            controller
                .remove_node_from_all_associations(args.node_id()?)
                .await?;
            json!({})
        }

        // ── SmartStart provisioning ───────────────────────────────────────────
        "provision_smart_start_node" => {
            let entry: ProvisioningEntry = args.required("entry")?;
            controller.provision_smart_start_node(entry)?;
            json!({})
        }
        "unprovision_smart_start_node" => {
            controller.unprovision_smart_start_node(&provisioning_target(args)?)?;
            json!({})
        }
        "get_provisioning_entry" => {
            json!({ "entry": controller.provisioning_entry(&provisioning_target(args)?) })
        }
        "get_provisioning_entries" => json!({ "entries": controller.provisioning_entries() }),

        // ── Radio ─────────────────────────────────────────────────────────────
        "supports_feature" => {
            let feature: u8 = args.required("feature")?;
            json!({ "supported": controller.supports_feature(feature) })
        }
        "get_rf_region" => json!({ "region": controller.rf_region().await? }),
        "set_rf_region" => {
            let region: u8 = args.required("region")?;
            json!({ "success": controller.set_rf_region(region).await? })
        }
        "get_powerlevel" => {
            let level = controller.powerlevel().await?;
            json!({ "powerlevel": level.powerlevel, "measured0dBm": level.measured_0_dbm })
        }
        "set_powerlevel" => {
            let level = Powerlevel {
                powerlevel: args.required("powerlevel")?,
                measured_0_dbm: args.required("measured0dBm")?,
            };
            json!({ "success": controller.set_powerlevel(level).await? })
        }
        "get_state" => json!({ "state": compat::controller_state(&controller.state(), v) }),

        // ── Firmware ──────────────────────────────────────────────────────────
        "is_any_ota_firmware_update_in_progress" | "get_any_firmware_update_progress" => {
            json!({ "progress": controller.is_any_ota_firmware_update_in_progress() })
        }
        "is_firmware_update_in_progress" => {
            json!({ "progress": controller.is_firmware_update_in_progress() })
        }
        "firmware_update_ota" => {
            let node_id = args.node_id()?;
            let updates = args.firmware_updates()?;
            let result = controller.firmware_update_ota(node_id, updates).await?;
            compat::firmware_update_result(&result, v)
        }

        _ => return Err(unknown_tag(tag)),
    };
    Ok(RouterOutcome::result(result))
}

/// The node (and optional endpoint) whose association groups are addressed.
fn association_source(args: &Args<'_>) -> Result<AssociationAddress, GatewayError> {
    Ok(AssociationAddress {
        node_id: args.node_id()?,
        endpoint: args.optional("endpoint")?,
    })
}

/// `dskOrNodeId`, or `dsk` as older clients send it.
fn provisioning_target(args: &Args<'_>) -> Result<DskOrNodeId, GatewayError> {
    match args.optional("dskOrNodeId")? {
        Some(target) => Ok(target),
        None => Ok(DskOrNodeId::Dsk(args.required("dsk")?)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_eq, task};
    use zwave_core::domain::{
        InclusionGrant, InclusionState, LifelineRoutes, RouteStatistics, SecurityClass,
    };
    use zwave_core::testing::ZW_INJECTED_FAILURE;
    use zwave_core::DriverError;

    use super::super::tests::{harness, run};
    use crate::domain::InclusionPhase;

    fn grant() -> InclusionGrant {
        InclusionGrant {
            security_classes: vec![SecurityClass::S2Unauthenticated],
            client_side_auth: false,
        }
    }

    #[tokio::test]
    async fn test_begin_inclusion_hands_bridge_to_driver() {
        let h = harness();

        let outcome = run(&h, 35, "controller.begin_inclusion", json!({"options": {"strategy": "security_s2"}}))
            .await
            .unwrap();

        assert_eq!(outcome.result, json!({"success": true}));
        let sim = h.driver.controller_handle();
        assert_eq!(sim.inclusion_state(), InclusionState::Including);
        assert!(sim.inclusion_callbacks().is_some());
    }

    #[tokio::test]
    async fn test_second_begin_inclusion_reports_false() {
        let h = harness();
        run(&h, 35, "controller.begin_inclusion", json!({})).await.unwrap();
        let second = run(&h, 35, "controller.begin_inclusion", json!({})).await.unwrap();
        assert_eq!(second.result["success"], false);
    }

    #[tokio::test]
    async fn test_grant_resolves_driver_request() {
        // Arrange
        let h = harness();
        run(&h, 35, "controller.begin_inclusion", json!({})).await.unwrap();
        let callbacks = h.driver.controller_handle().inclusion_callbacks().unwrap();
        let mut waiter = task::spawn(callbacks.grant_security_classes(grant()));
        assert_pending!(waiter.poll());

        // Act
        run(
            &h,
            35,
            "controller.grant_security_classes",
            json!({"inclusionGrant": {"securityClasses": ["s2_unauthenticated"], "clientSideAuth": false}}),
        )
        .await
        .unwrap();

        // Assert
        assert_ready_eq!(waiter.poll(), Some(grant()));
    }

    #[tokio::test]
    async fn test_rejected_begin_inclusion_keeps_running_inclusion() {
        // Arrange: client A's inclusion is waiting for a grant
        let h = harness();
        run(&h, 35, "controller.begin_inclusion", json!({})).await.unwrap();
        let owner = h.inclusion.bound_client();
        let callbacks = h.driver.controller_handle().inclusion_callbacks().unwrap();
        let mut waiter = task::spawn(callbacks.grant_security_classes(grant()));
        assert_pending!(waiter.poll());

        // Act: client B tries to start its own inclusion
        let second = run(&h, 35, "controller.begin_inclusion", json!({})).await.unwrap();

        // Assert: B is refused, A keeps the binding and can still answer
        assert_eq!(second.result, json!({"success": false}));
        assert_eq!(h.inclusion.bound_client(), owner);
        assert_pending!(waiter.poll());
        run(
            &h,
            35,
            "controller.grant_security_classes",
            json!({"inclusionGrant": {"securityClasses": ["s2_unauthenticated"], "clientSideAuth": false}}),
        )
        .await
        .unwrap();
        assert_ready_eq!(waiter.poll(), Some(grant()));
    }

    #[tokio::test]
    async fn test_failed_replace_failed_node_keeps_pending_pin() {
        let h = harness();
        h.driver.add_node(4);
        run(&h, 35, "controller.begin_inclusion", json!({})).await.unwrap();
        let callbacks = h.driver.controller_handle().inclusion_callbacks().unwrap();
        let mut waiter = task::spawn(callbacks.validate_dsk_and_enter_pin("dsk".into()));
        assert_pending!(waiter.poll());
        h.driver.fail_operation(
            "controller.replace_failed_node",
            DriverError::new(ZW_INJECTED_FAILURE, "busy"),
        );

        let err = run(&h, 35, "controller.replace_failed_node", json!({"nodeId": 4}))
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "zwaveError");
        assert!(h.inclusion.is_pending(InclusionPhase::ValidateDskAndEnterPin));
        run(&h, 35, "controller.validate_dsk_and_enter_pin", json!({"pin": "12345"}))
            .await
            .unwrap();
        assert_ready_eq!(waiter.poll(), Some("12345".to_string()));
    }

    #[tokio::test]
    async fn test_late_pin_is_inclusion_phase_not_in_progress() {
        let h = harness();
        let err = run(&h, 35, "controller.validate_dsk_and_enter_pin", json!({"pin": "12345"}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "inclusionPhaseNotInProgress");
        assert!(!h.inclusion.is_pending(InclusionPhase::ValidateDskAndEnterPin));
    }

    #[tokio::test]
    async fn test_heal_and_rebuild_tags_are_aliases() {
        for version in [31, 32] {
            let h = harness();
            let heal = run(&h, version, "controller.begin_healing_network", json!({}))
                .await
                .unwrap();
            assert_eq!(heal.result["success"], true);
            let stop = run(&h, version, "controller.stop_rebuilding_routes", json!({}))
                .await
                .unwrap();
            assert_eq!(stop.result["success"], true);
            let rebuild = run(&h, version, "controller.begin_rebuilding_routes", json!({}))
                .await
                .unwrap();
            assert_eq!(rebuild.result["success"], true);
        }
    }

    #[tokio::test]
    async fn test_get_state_renames_routing_flag_before_v32() {
        let h = harness();
        let old = run(&h, 31, "controller.get_state", json!({})).await.unwrap();
        let new = run(&h, 32, "controller.get_state", json!({})).await.unwrap();

        assert!(old.result["state"].get("isHealNetworkActive").is_some());
        assert!(old.result["state"].get("isRebuildingRoutes").is_none());
        assert!(new.result["state"].get("isRebuildingRoutes").is_some());
    }

    #[tokio::test]
    async fn test_powerlevel_uses_wire_names() {
        let h = harness();
        run(
            &h,
            35,
            "controller.set_powerlevel",
            json!({"powerlevel": 3, "measured0dBm": -2}),
        )
        .await
        .unwrap();
        let outcome = run(&h, 35, "controller.get_powerlevel", json!({})).await.unwrap();
        assert_eq!(outcome.result, json!({"powerlevel": 3, "measured0dBm": -2}));
    }

    #[tokio::test]
    async fn test_firmware_update_ota_shape_follows_version() {
        let h = harness();
        h.driver.add_node(5);
        let args = json!({"nodeId": 5, "updates": [{"file": "AQID"}]});

        let old = run(&h, 28, "controller.firmware_update_ota", args.clone())
            .await
            .unwrap();
        let new = run(&h, 29, "controller.firmware_update_ota", args).await.unwrap();

        assert_eq!(old.result, json!({"success": true}));
        assert_eq!(new.result["result"]["status"], "ok_no_restart");
    }

    #[tokio::test]
    async fn test_remove_failed_node_records_call() {
        let h = harness();
        h.driver.add_node(6);
        run(&h, 35, "controller.remove_failed_node", json!({"nodeId": 6}))
            .await
            .unwrap();
        assert!(h
            .driver
            .calls()
            .contains(&"controller.remove_failed_node 6".to_string()));
    }

    #[tokio::test]
    async fn test_associations_round_trip_through_driver() {
        // Arrange
        let h = harness();
        for id in [2, 3] {
            h.driver.add_node(id);
        }
        let destination = json!([{"nodeId": 3}]);

        // Act
        run(
            &h,
            35,
            "controller.add_associations",
            json!({"nodeId": 2, "group": 1, "associations": destination}),
        )
        .await
        .unwrap();
        let listed = run(&h, 35, "controller.get_associations", json!({"nodeId": 2}))
            .await
            .unwrap();
        let groups = run(&h, 35, "controller.get_association_groups", json!({"nodeId": 2}))
            .await
            .unwrap();

        // Assert
        assert_eq!(listed.result, json!({"associations": {"1": [{"nodeId": 3}]}}));
        assert_eq!(groups.result["groups"]["1"]["isLifeline"], true);
    }

    #[tokio::test]
    async fn test_is_association_allowed_rejects_self_association() {
        let h = harness();
        h.driver.add_node(2);
        let outcome = run(
            &h,
            35,
            "controller.is_association_allowed",
            json!({"nodeId": 2, "group": 1, "association": {"nodeId": 2}}),
        )
        .await
        .unwrap();
        assert_eq!(outcome.result, json!({"allowed": false}));
    }

    #[tokio::test]
    async fn test_misspelled_remove_from_all_associations_is_accepted() {
        for (version, tag) in [
            (2, "controller.remove_node_from_all_assocations"),
            (3, "controller.remove_node_from_all_associations"),
        ] {
            let h = harness();
            h.driver.add_node(4);
            let outcome = run(&h, version, tag, json!({"nodeId": 4})).await.unwrap();
            assert_eq!(outcome.result, json!({}));
            assert!(h
                .driver
                .calls()
                .contains(&"controller.remove_node_from_all_associations 4".to_string()));
        }
    }

    #[tokio::test]
    async fn test_provisioning_entry_lookup_by_dsk_or_legacy_field() {
        // Arrange
        let h = harness();
        run(
            &h,
            35,
            "controller.provision_smart_start_node",
            json!({"entry": {"dsk": "11111-22222", "securityClasses": ["s2_authenticated"], "name": "Porch"}}),
        )
        .await
        .unwrap();

        // Act
        let current = run(
            &h,
            35,
            "controller.get_provisioning_entry",
            json!({"dskOrNodeId": "11111-22222"}),
        )
        .await
        .unwrap();
        let legacy = run(&h, 16, "controller.get_provisioning_entry", json!({"dsk": "11111-22222"}))
            .await
            .unwrap();
        let missing = run(&h, 35, "controller.get_provisioning_entry", json!({"dskOrNodeId": 9}))
            .await
            .unwrap();

        // Assert
        assert_eq!(current.result["entry"]["name"], "Porch");
        assert_eq!(legacy.result, current.result);
        assert!(missing.result["entry"].is_null());
    }

    #[tokio::test]
    async fn test_unprovision_empties_entry_list() {
        let h = harness();
        run(
            &h,
            35,
            "controller.provision_smart_start_node",
            json!({"entry": {"dsk": "11111-22222", "securityClasses": []}}),
        )
        .await
        .unwrap();

        run(
            &h,
            35,
            "controller.unprovision_smart_start_node",
            json!({"dskOrNodeId": "11111-22222"}),
        )
        .await
        .unwrap();

        let entries = run(&h, 35, "controller.get_provisioning_entries", json!({}))
            .await
            .unwrap();
        assert_eq!(entries.result, json!({"entries": []}));
    }

    #[tokio::test]
    async fn test_known_lifeline_routes_keyed_by_node() {
        let h = harness();
        h.driver.controller_handle().set_lifeline_routes(
            2,
            LifelineRoutes {
                lwr: Some(RouteStatistics {
                    protocol_data_rate: 3,
                    repeaters: vec![4],
                    rssi: Some(-70),
                }),
                nlwr: None,
            },
        );

        let outcome = run(&h, 35, "controller.get_known_lifeline_routes", json!({}))
            .await
            .unwrap();

        assert_eq!(
            outcome.result,
            json!({"routes": {"2": {"lwr": {"protocolDataRate": 3, "repeaters": [4], "rssi": -70}}}})
        );
    }

    #[tokio::test]
    async fn test_controller_firmware_progress_flags() {
        let h = harness();
        h.driver.controller_handle().set_firmware_update_in_progress(true);

        let own = run(&h, 35, "controller.is_firmware_update_in_progress", json!({}))
            .await
            .unwrap();
        let any = run(&h, 35, "controller.get_any_firmware_update_progress", json!({}))
            .await
            .unwrap();

        assert_eq!(own.result, json!({"progress": true}));
        assert_eq!(any.result, json!({"progress": false}));
    }
}
