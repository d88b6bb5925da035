//! `broadcast_node.*` and `multicast_group.*` commands.
//!
//! Both domains share one `match` and differ only in how the target
//! is obtained: the broadcast node addresses every node, a multicast group
//! the `nodeIDs` listed in the command.  Endpoint-scoped commands take an
//! optional `index`; `0` (or no index) is the virtual node itself.  An index
//! the target does not have fails with `virtualEndpointNotFound` before any
//! driver call.

use std::sync::Arc;

use serde_json::{json, Value};
use zwave_core::compat;
use zwave_core::driver::{VirtualEndpoint, VirtualNode};
use zwave_core::{NodeId, ValueId};

use super::{unknown_tag, Args, CommandContext, CommandRouter, RouterOutcome, RouterResult};
use crate::domain::GatewayError;

/// How the virtual node is addressed.
#[derive(Clone, Copy)]
enum Addressing {
    Broadcast,
    Multicast,
}

/// The addressed virtual node.  Nothing is resolved until a command needs
/// it, so an unknown tag fails before `nodeIDs` is even read.
struct Target<'a> {
    router: &'a CommandRouter,
    args: &'a Args<'a>,
    addressing: Addressing,
}

impl Target<'_> {
    /// `nodeIDs` of a multicast group; `None` for the broadcast node.
    fn node_ids(&self) -> Result<Option<Vec<NodeId>>, GatewayError> {
        match self.addressing {
            Addressing::Broadcast => Ok(None),
            Addressing::Multicast => self.args.required("nodeIDs").map(Some),
        }
    }

    fn resolve(&self) -> Result<Arc<dyn VirtualNode>, GatewayError> {
        let controller = self.router.driver.controller();
        match self.node_ids()? {
            None => Ok(controller.broadcast_node()),
            Some(node_ids) => Ok(controller.multicast_group(&node_ids)?),
        }
    }

    fn endpoint(&self) -> Result<Arc<dyn VirtualEndpoint>, GatewayError> {
        let node = self.resolve()?;
        let index: u16 = self.args.optional("index")?.unwrap_or(0);
        match node.endpoint(index) {
            Some(endpoint) => Ok(endpoint),
            None => {
                let node_ids = self.node_ids()?;
                Err(GatewayError::VirtualEndpointNotFound {
                    index,
                    broadcast: node_ids.is_none(),
                    node_ids,
                })
            }
        }
    }
}

pub(super) async fn handle_broadcast(
    router: &CommandRouter,
    ctx: CommandContext,
    tag: &str,
    args: &Args<'_>,
) -> RouterResult {
    let target = Target {
        router,
        args,
        addressing: Addressing::Broadcast,
    };
    handle(&target, ctx, tag).await
}

pub(super) async fn handle_multicast(
    router: &CommandRouter,
    ctx: CommandContext,
    tag: &str,
    args: &Args<'_>,
) -> RouterResult {
    let target = Target {
        router,
        args,
        addressing: Addressing::Multicast,
    };
    handle(&target, ctx, tag).await
}

async fn handle(target: &Target<'_>, ctx: CommandContext, tag: &str) -> RouterResult {
    let args = target.args;
    let result = match tag {
        "set_value" => {
            let node = target.resolve()?;
            let value_id: ValueId = args.required("valueId")?;
            let value: Value = args.required("value")?;
            let options = args.optional("options")?;
            let result = node.set_value(&value_id, value, options).await?;
            compat::set_value_result(&result, ctx.schema_version)
        }
        "get_endpoint_count" => json!({ "count": target.resolve()?.endpoint_count() }),
        "get_defined_value_ids" => json!({ "valueIds": target.resolve()?.defined_value_ids() }),
        "supports_cc" => {
            let endpoint = target.endpoint()?;
            json!({ "supported": endpoint.supports_cc(args.required("commandClass")?) })
        }
        "get_cc_version" => {
            let endpoint = target.endpoint()?;
            json!({ "version": endpoint.cc_version(args.required("commandClass")?) })
        }
        "supports_cc_api" => {
            let endpoint = target.endpoint()?;
            json!({ "supported": endpoint.supports_cc_api(args.required("commandClass")?) })
        }
        "invoke_cc_api" => {
            let endpoint = target.endpoint()?;
            let command_class: u8 = args.required("commandClass")?;
            let method_name: String = args.required("methodName")?;
            let call_args: Vec<Value> = args.optional("args")?.unwrap_or_default();
            let response = endpoint
                .invoke_cc_api(command_class, &method_name, call_args)
                .await?;
            json!({ "response": response })
        }
        _ => return Err(unknown_tag(tag)),
    };
    Ok(RouterOutcome::result(result))
}
