// toolbridge-daemon library entry point.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod host;
pub mod runtime;
pub mod transport;
pub mod traversal;
