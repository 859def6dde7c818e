//! Bridge to the vendor client running in a helper process.

mod protocol;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod sidecar;

pub use protocol::Command;
pub use protocol::Message;
pub use protocol::WireError;
pub use sidecar::SidecarConnector;
pub use sidecar::SidecarService;
