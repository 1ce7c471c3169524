// Method names understood by the bridge's dispatcher.

pub const INITIALIZE: &str = "initialize";
pub const PING: &str = "ping";
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";

pub const NOTIFY_INITIALIZED: &str = "notifications/initialized";
pub const NOTIFY_CANCELLED: &str = "notifications/cancelled";

/// Request methods with a handler.
pub const IMPLEMENTED_METHODS: &[&str] = &[INITIALIZE, PING, TOOLS_LIST, TOOLS_CALL];

/// Notifications accepted without a reply.
pub const ACCEPTED_NOTIFICATIONS: &[&str] = &[NOTIFY_INITIALIZED, NOTIFY_CANCELLED];

#[must_use]
pub fn is_implemented(method: &str) -> bool {
    IMPLEMENTED_METHODS.contains(&method)
}
