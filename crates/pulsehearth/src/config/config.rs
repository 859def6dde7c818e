use std::collections::HashMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::Diagnostic;
use super::diagnostics::LoadError;
use super::diagnostics::ValidationError;
use super::diagnostics::Warning;
use super::diagnostics::format_diagnostics;
use super::partial::PartialConfig;

pub const DEFAULT_API_PORT: u16 = 8565;
const DEFAULT_PYTHON_PATH: &str = "python3";
const DEFAULT_SCRIPT_PATH: &str = "python/pulse_sidecar.py";
const DEFAULT_STORAGE_PATH: &str = "/var/lib/pulsehearth";

/// Name of the config-entry file inside the storage directory
pub const ENTRIES_FILE: &str = "config_entries.json";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub sidecar: SidecarConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"pulsehearth::integrations::adtpulse" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: IpAddr,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_API_PORT,
        }
    }
}

/// Helper process hosting the vendor client library
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub python_path: PathBuf,
    pub script_path: PathBuf,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from(DEFAULT_PYTHON_PATH),
            script_path: PathBuf::from(DEFAULT_SCRIPT_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding persisted config entries
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

impl StorageConfig {
    pub fn entries_file(&self) -> PathBuf {
        self.path.join(ENTRIES_FILE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Rendered diagnostics, ready to print
    #[error("{0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate a config file.
    ///
    /// Returns the config with any warnings, or every error found rendered
    /// with source snippets.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let partial = PartialConfig::from_file(path)?;
        Self::from_partial(partial)
    }

    /// Like `from_file`, for config text already in memory.
    pub fn parse(content: &str, path: &Path) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let partial = PartialConfig::parse(content, path)?;
        Self::from_partial(partial)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    pub fn from_partial(partial: PartialConfig) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let (config, diagnostics) = Self::validate(partial);
        if diagnostics.iter().any(|d| d.is_error()) {
            return Err(ConfigError::Invalid(format_diagnostics(&diagnostics)));
        }
        Ok((config, diagnostics))
    }

    /// Check every field, collecting all problems instead of stopping at the
    /// first. Invalid fields keep their defaults in the returned config.
    fn validate(partial: PartialConfig) -> (Self, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();

        if partial.is_empty() {
            if let Some(source) = &partial.source {
                diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source.file_path.clone(),
                }));
            }
        }

        let source = partial.source.clone();
        let mut error = |field_path: &str, message: String, span: std::ops::Range<usize>| {
            diagnostics.push(Diagnostic::Error(ValidationError {
                field_path: field_path.to_string(),
                message,
                span: Some(span),
                source: source.clone(),
            }));
        };

        let logging = partial
            .logging
            .map(|l| LoggingConfig {
                level: l.level.unwrap_or_default(),
                overrides: l.overrides.unwrap_or_default(),
            })
            .unwrap_or_default();

        let mut api = ApiConfig::default();
        if let Some(partial_api) = partial.api {
            if let Some(enabled) = partial_api.enabled {
                api.enabled = enabled;
            }
            if let Some(listen) = partial_api.listen {
                match listen.get_ref().parse::<IpAddr>() {
                    Ok(addr) => api.listen = addr,
                    Err(_) => error(
                        "api.listen",
                        format!("'{}' is not an IP address", listen.get_ref()),
                        listen.span(),
                    ),
                }
            }
            if let Some(port) = partial_api.port {
                match u16::try_from(*port.get_ref()) {
                    Ok(p) if p != 0 => api.port = p,
                    _ => error(
                        "api.port",
                        "port must be between 1 and 65535".to_string(),
                        port.span(),
                    ),
                }
            }
        }

        let mut sidecar = SidecarConfig::default();
        if let Some(partial_sidecar) = partial.sidecar {
            if let Some(python_path) = partial_sidecar.python_path {
                if python_path.get_ref().trim().is_empty() {
                    error(
                        "sidecar.python_path",
                        "python_path must not be empty".to_string(),
                        python_path.span(),
                    );
                } else {
                    sidecar.python_path = PathBuf::from(python_path.into_inner());
                }
            }
            if let Some(script_path) = partial_sidecar.script_path {
                if script_path.get_ref().trim().is_empty() {
                    error(
                        "sidecar.script_path",
                        "script_path must not be empty".to_string(),
                        script_path.span(),
                    );
                } else {
                    sidecar.script_path = PathBuf::from(script_path.into_inner());
                }
            }
        }

        let mut storage = StorageConfig::default();
        if let Some(path) = partial.storage.and_then(|s| s.path) {
            if path.get_ref().trim().is_empty() {
                error(
                    "storage.path",
                    "storage path must not be empty".to_string(),
                    path.span(),
                );
            } else {
                storage.path = PathBuf::from(path.into_inner());
            }
        }

        (
            Config {
                logging,
                api,
                sidecar,
                storage,
            },
            diagnostics,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::diagnostics::render_diagnostics;

    fn test_path() -> PathBuf {
        PathBuf::from("<test>")
    }

    fn validation_errors(content: &str) -> Vec<Diagnostic> {
        let partial = PartialConfig::parse(content, &test_path()).unwrap();
        Config::validate(partial).1
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[logging]
level = "debug"

[logging.overrides]
"pulsehearth::api" = "warn"

[api]
listen = "0.0.0.0"
port = 9000

[sidecar]
python_path = "/opt/pulse/bin/python"
script_path = "/opt/pulse/pulse_sidecar.py"

[storage]
path = "/srv/pulsehearth"
"#;

        let (config, diagnostics) = Config::parse(toml, &test_path()).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("pulsehearth::api"),
            Some(&LogLevel::Warn)
        );
        assert_eq!(config.api.listen, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(config.api.port, 9000);
        assert_eq!(
            config.sidecar.python_path,
            PathBuf::from("/opt/pulse/bin/python")
        );
        assert_eq!(
            config.storage.entries_file(),
            PathBuf::from("/srv/pulsehearth/config_entries.json")
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let (config, diagnostics) = Config::parse("", &test_path()).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.api.enabled);
        assert_eq!(config.api.port, DEFAULT_API_PORT);
        assert_eq!(config.sidecar.python_path, PathBuf::from("python3"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::parse("[api]\nbind = \"127.0.0.1\"\n", &test_path()).unwrap_err();
        assert!(matches!(err, ConfigError::Load(LoadError::Parse { .. })));
        assert!(err.to_string().contains("bind"));
    }

    #[test]
    fn test_all_errors_reported() {
        let toml = r#"
[api]
listen = "localhost"
port = 70000

[storage]
path = ""
"#;
        let err = Config::parse(toml, &test_path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("api.listen"));
        assert!(msg.contains("api.port"));
        assert!(msg.contains("storage.path"));
    }

    #[test]
    fn test_validation_error_fields() {
        let diagnostics = validation_errors("[api]\nport = 0\n");
        let summary: Vec<_> = diagnostics
            .iter()
            .map(|d| match d {
                Diagnostic::Error(e) => (e.field_path.clone(), e.message.clone(), e.span.clone()),
                Diagnostic::Warning(w) => panic!("unexpected warning {:?}", w),
            })
            .collect();
        insta::assert_debug_snapshot!(summary, @r#"
        [
            (
                "api.port",
                "port must be between 1 and 65535",
                Some(
                    13..14,
                ),
            ),
        ]
        "#);
    }

    #[test]
    fn test_validation_error_rendering() {
        let diagnostics = validation_errors("[api]\nport = 0\n");
        let rendered = render_diagnostics(&diagnostics, false);
        insta::assert_snapshot!(rendered, @r"
        Error: Invalid value for 'api.port'
           ╭─[ <test>:2:8 ]
           │
         2 │ port = 0
           │        ┬  
           │        ╰── port must be between 1 and 65535
        ───╯
        ");
    }

    #[test]
    fn test_missing_file_error() {
        let missing = PathBuf::from("/nonexistent/pulsehearth.toml");
        let err = Config::from_file(&missing).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Failed to read"));
        assert!(msg.contains("/nonexistent/pulsehearth.toml"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[api]\nenabled = false\n").unwrap();

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert!(diagnostics.is_empty());
        assert!(!config.api.enabled);
    }
}
