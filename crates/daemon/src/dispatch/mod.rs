// Tool dispatcher: routes decoded protocol messages to tool handlers.
//
// Requests always get exactly one reply keyed by their id. Notifications and
// stray responses are consumed without a reply.

mod tools;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use toolbridge_common::protocol::jsonrpc::{Message, RequestId, RpcError};
use toolbridge_common::protocol::methods;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, ToolGroups, TraversalDefaults};
use crate::context::BridgeContext;
use crate::transport::InboundHandler;
use crate::traversal::Limits;

pub use tools::{ToolGroup, ToolOutput, ToolSpec, TOOLS};

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "toolbridge";

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub struct Dispatcher {
    context: BridgeContext,
    groups: ToolGroups,
    traversal: TraversalDefaults,
    shell_timeout: Duration,
    limits: Limits,
}

impl Dispatcher {
    pub fn new(context: BridgeContext, config: &BridgeConfig) -> Self {
        Self {
            context,
            groups: config.tools,
            traversal: config.traversal,
            shell_timeout: config.shell.timeout(),
            limits: Limits::default(),
        }
    }

    /// Overrides the traversal ceilings.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    /// Tools whose capability group is enabled.
    pub fn enabled_tools(&self) -> impl Iterator<Item = &'static ToolSpec> + '_ {
        TOOLS.iter().filter(|tool| tool.group.is_enabled(&self.groups))
    }

    /// Handles one inbound message. Returns the reply, if any.
    pub async fn dispatch(&self, message: Message) -> Option<Message> {
        match message {
            Message::Request { id, method, params } => Some(self.handle_request(id, &method, params).await),
            Message::Notification { method, .. } => {
                if methods::ACCEPTED_NOTIFICATIONS.contains(&method.as_str()) {
                    debug!(%method, "notification received");
                } else {
                    debug!(%method, "ignoring unknown notification");
                }
                None
            }
            Message::Response { id, .. } | Message::ErrorResponse { id, .. } => {
                debug!(%id, "dropping response to a request this bridge never sent");
                None
            }
        }
    }

    async fn handle_request(&self, id: RequestId, method: &str, params: Option<Value>) -> Message {
        let outcome = match method {
            methods::INITIALIZE => Ok(self.initialize_result()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(self.tools_list_result()),
            methods::TOOLS_CALL => self.handle_tools_call(params).await,
            _ => Err(RpcError::method_not_found(method)),
        };

        match outcome {
            Ok(result) => Message::response(id, result),
            Err(error) => {
                debug!(%id, method, code = error.code, "request rejected");
                Message::error_response(id, error)
            }
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": false },
            },
        })
    }

    fn tools_list_result(&self) -> Value {
        let tools: Vec<Value> = self.enabled_tools().map(ToolSpec::describe).collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let Some(params) = params else {
            return Err(RpcError::invalid_params("tools/call requires params"));
        };
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|error| RpcError::invalid_params(format!("failed to decode tools/call params: {error}")))?;

        let tool = tools::find(&params.name)
            .filter(|tool| tool.group.is_enabled(&self.groups))
            .ok_or_else(|| RpcError::invalid_params(format!("unknown tool `{}`", params.name)))?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let output = self.call_tool(tool, arguments).await?;
        if output.is_error() {
            info!(tool = tool.name, "tool reported an error");
        }
        Ok(output.into_value())
    }
}

#[async_trait]
impl InboundHandler for Dispatcher {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>> {
        if let Message::ErrorResponse { id, error } = &message {
            warn!(%id, code = error.code, message = %error.message, "remote reported an error");
        }
        Ok(self.dispatch(message).await)
    }
}
