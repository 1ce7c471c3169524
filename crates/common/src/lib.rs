// toolbridge-common: protocol envelope, patch engine and path rules shared by the bridge.

pub mod patch;
pub mod path;
pub mod protocol;
