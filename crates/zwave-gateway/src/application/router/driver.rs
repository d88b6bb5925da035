//! `driver.*` commands.

use serde_json::json;
use tracing::warn;
use zwave_core::compat;
use zwave_core::domain::{LogConfigUpdate, LogFilter};
use zwave_core::OutgoingEvent;

use super::{unknown_tag, Args, CommandContext, CommandRouter, Deferred, RouterOutcome, RouterResult};

pub(super) async fn handle(
    router: &CommandRouter,
    ctx: CommandContext,
    tag: &str,
    args: &Args<'_>,
) -> RouterResult {
    let driver = router.driver.as_ref();
    let v = ctx.schema_version;

    let result = match tag {
        "get_config" => json!({ "config": driver.options() }),
        "update_options" => {
            driver.update_options(args.required("options")?)?;
            json!({})
        }
        "get_log_config" => json!({ "config": compat::log_config(&driver.log_config(), v) }),
        "update_log_config" => {
            let update: LogConfigUpdate = args.required("config")?;
            driver.update_log_config(update)?;
            router.registry.restart_log_forwarder_if_active();
            router
                .registry
                .broadcast_to_all(&OutgoingEvent::LogConfigUpdated {
                    config: driver.log_config(),
                });
            json!({})
        }
        "is_statistics_enabled" => json!({ "statisticsEnabled": driver.statistics_enabled() }),
        "enable_statistics" => {
            let name: String = args.required("applicationName")?;
            let version: String = args.required("applicationVersion")?;
            driver.enable_statistics(&name, &version);
            json!({})
        }
        "disable_statistics" => {
            driver.disable_statistics();
            json!({})
        }
        "start_listening_logs" => {
            let filter: Option<LogFilter> = args.optional("filter")?;
            router.registry.start_listening_logs(ctx.client, filter);
            json!({})
        }
        "stop_listening_logs" => {
            router.registry.stop_listening_logs(ctx.client);
            json!({})
        }
        "check_for_config_updates" => {
            let new_version = driver.check_for_config_updates().await?;
            let mut result = json!({
                "installedVersion": driver.config_version(),
                "updateAvailable": new_version.is_some(),
            });
            if let Some(new_version) = new_version {
                result["newVersion"] = json!(new_version);
            }
            result
        }
        "install_config_update" => json!({ "success": driver.install_config_update().await? }),
        "set_preferred_scales" => {
            driver.set_preferred_scales(args.required("scales")?)?;
            json!({})
        }
        "enable_error_reporting" => {
            warn!("client {} asked for error reporting; not supported, ignoring", ctx.client);
            json!({})
        }
        "soft_reset" => {
            driver.soft_reset().await?;
            json!({})
        }
        "try_soft_reset" => {
            driver.try_soft_reset().await?;
            json!({})
        }
        "hard_reset" => {
            return Ok(RouterOutcome {
                result: json!({}),
                deferred: Some(Deferred::HardReset),
            })
        }
        "shutdown" => json!({ "success": driver.shutdown().await }),
        "send_test_frame" => {
            let node_id = args.node_id()?;
            let powerlevel: u8 = args.required("powerlevel")?;
            json!({ "status": driver.send_test_frame(node_id, powerlevel).await? })
        }
        _ => return Err(unknown_tag(tag)),
    };
    Ok(RouterOutcome::result(result))
}
