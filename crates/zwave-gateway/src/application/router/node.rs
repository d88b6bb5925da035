//! `node.*` commands.  Every command addresses one physical node by `nodeId`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use zwave_core::compat;
use zwave_core::domain::{FirmwareFile, PowerlevelTest, RawConfigParameter, SecurityClass};
use zwave_core::driver::Node;
use zwave_core::protocol::base64_decode;
use zwave_core::{NodeId, ValueId};

use super::{unknown_tag, Args, CommandContext, CommandRouter, RouterOutcome, RouterResult};
use crate::domain::GatewayError;

pub(super) async fn handle(
    router: &CommandRouter,
    ctx: CommandContext,
    tag: &str,
    args: &Args<'_>,
) -> RouterResult {
    // Resolved per arm so an unknown tag never touches `nodeId`.
    let node = || lookup(router, args);
    let v = ctx.schema_version;

    let result = match tag {
        // ── Values ────────────────────────────────────────────────────────────
        "set_value" => {
            let node = node()?;
            let value_id: ValueId = args.required("valueId")?;
            let value = args.required("value")?;
            let options = args.optional("options")?;
            let result = node.set_value(&value_id, value, options).await?;
            compat::set_value_result(&result, v)
        }
        "get_value" => {
            let node = node()?;
            let value_id: ValueId = args.required("valueId")?;
            json!({ "value": node.value(&value_id) })
        }
        "get_value_metadata" => {
            let node = node()?;
            let value_id: ValueId = args.required("valueId")?;
            compat::value_metadata(&node.value_metadata(&value_id), v)
        }
        "get_value_timestamp" => {
            let node = node()?;
            let value_id: ValueId = args.required("valueId")?;
            json!({ "timestamp": node.value_timestamp(&value_id) })
        }
        "poll_value" => {
            let node = node()?;
            let value_id: ValueId = args.required("valueId")?;
            json!({ "value": node.poll_value(&value_id).await? })
        }
        "get_defined_value_ids" => json!({ "valueIds": node()?.defined_value_ids() }),
        "get_endpoint_count" => json!({ "count": node()?.endpoint_count() }),
        "get_state" => json!({ "state": compat::node_snapshot(&node()?.snapshot()?, v) }),

        // ── Interview and refresh ─────────────────────────────────────────────
        "refresh_info" => {
            node()?.refresh_info().await?;
            json!({})
        }
        "refresh_values" => {
            node()?.refresh_values().await?;
            json!({})
        }
        "refresh_cc_values" => {
            let node = node()?;
            node.refresh_cc_values(args.required("commandClass")?).await?;
            json!({})
        }
        "interview" => {
            node()?.interview().await?;
            json!({})
        }
        "interview_cc" => {
            let node = node()?;
            node.interview_cc(args.required("commandClass")?).await?;
            json!({})
        }
        "wait_for_wakeup" => {
            node()?.wait_for_wakeup().await?;
            json!({})
        }
        "ping" => json!({ "responded": node()?.ping().await? }),

        // ── Link health ───────────────────────────────────────────────────────
        "check_lifeline_health" => {
            let node = node()?;
            let rounds: Option<u8> = args.optional("rounds")?;
            json!({ "summary": node.check_lifeline_health(rounds).await? })
        }
        "check_route_health" => {
            let node = node()?;
            let target_node_id: NodeId = args.required("targetNodeId")?;
            let rounds: Option<u8> = args.optional("rounds")?;
            json!({ "summary": node.check_route_health(target_node_id, rounds).await? })
        }
        "test_powerlevel" => {
            let node = node()?;
            let test = PowerlevelTest {
                test_node_id: args.required("testNodeId")?,
                powerlevel: args.required("powerlevel")?,
                frame_count: args.required("testFrameCount")?,
            };
            json!({ "framesAcked": node.test_powerlevel(test).await? })
        }

        // ── Security ──────────────────────────────────────────────────────────
        "has_security_class" => {
            let node = node()?;
            let class: SecurityClass = args.required("securityClass")?;
            json!({ "hasSecurityClass": node.has_security_class(class) })
        }
        "get_highest_security_class" => {
            json!({ "highestSecurityClass": node()?.highest_security_class() })
        }

        // ── Settings ──────────────────────────────────────────────────────────
        "set_name" => {
            node()?.set_name(args.required("name")?);
            json!({})
        }
        "set_location" => {
            node()?.set_location(args.required("location")?);
            json!({})
        }
        "set_keep_awake" => {
            node()?.set_keep_awake(args.required("keepAwake")?);
            json!({})
        }
        "set_raw_config_parameter_value" => {
            let node = node()?;
            let parameter = raw_config_parameter(args)?;
            node.set_raw_config_parameter_value(parameter).await?;
            json!({})
        }
        "set_date_and_time" => {
            let node = node()?;
            let date: Option<DateTime<Utc>> = args.optional("date")?;
            json!({ "success": node.set_date_and_time(date).await? })
        }

        // ── Firmware ──────────────────────────────────────────────────────────
        "begin_firmware_update" | "update_firmware" => {
            let node = node()?;
            let updates = firmware_files(args)?;
            let result = node.update_firmware(updates).await?;
            compat::firmware_update_result(&result, v)
        }
        "abort_firmware_update" => {
            node()?.abort_firmware_update().await?;
            json!({})
        }
        "is_firmware_update_in_progress" | "get_firmware_update_progress" => {
            json!({ "progress": node()?.is_firmware_update_in_progress() })
        }
        "get_firmware_update_capabilities" => {
            json!({ "capabilities": node()?.firmware_update_capabilities().await? })
        }
        "get_firmware_update_capabilities_cached" => {
            json!({ "capabilities": node()?.firmware_update_capabilities_cached() })
        }

        _ => return Err(unknown_tag(tag)),
    };
    Ok(RouterOutcome::result(result))
}

fn lookup(router: &CommandRouter, args: &Args<'_>) -> Result<Arc<dyn Node>, GatewayError> {
    let node_id = args.node_id()?;
    router
        .driver
        .controller()
        .node(node_id)
        .ok_or(GatewayError::NodeNotFound { node_id })
}

/// The write's fields sit at the top level of the command.
fn raw_config_parameter(args: &Args<'_>) -> Result<RawConfigParameter, GatewayError> {
    let parameter = RawConfigParameter {
        parameter: args.required("parameter")?,
        bit_mask: args.optional("bitMask")?,
        value: args.required("value")?,
        value_size: args.optional("valueSize")?,
        value_format: args.optional("valueFormat")?,
    };
    match parameter.problem() {
        Some(problem) => Err(GatewayError::InvalidCommand(problem.to_string())),
        None => Ok(parameter),
    }
}

/// `updates`, or the single-file form older clients send with
/// `begin_firmware_update` (`firmwareFile` + `firmwareFileFormat`).
fn firmware_files(args: &Args<'_>) -> Result<Vec<FirmwareFile>, GatewayError> {
    let Some(file) = args.optional::<String>("firmwareFile")? else {
        return args.firmware_updates();
    };
    let data = base64_decode(&file)
        .map_err(|e| GatewayError::InvalidCommand(format!("invalid firmware file: {e}")))?;
    Ok(vec![FirmwareFile {
        data,
        file_format: args.optional("firmwareFileFormat")?,
        target: args.optional("target")?,
    }])
}
