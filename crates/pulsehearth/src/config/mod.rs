// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod partial;

pub use config::*;
pub use diagnostics::Diagnostic;
pub use diagnostics::LoadError;
pub use diagnostics::format_diagnostics;
pub use diagnostics::render_diagnostics;
