use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::LogLevel;
use super::diagnostics::LoadError;
use super::diagnostics::SourceInfo;

/// Config file as written, before validation.
///
/// Fields that need checking keep their spans so errors can point at the
/// offending value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub logging: Option<PartialLoggingConfig>,
    pub api: Option<PartialApiConfig>,
    pub sidecar: Option<PartialSidecarConfig>,
    pub storage: Option<PartialStorageConfig>,

    /// Source information for error reporting (not deserialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialLoggingConfig {
    pub level: Option<LogLevel>,
    pub overrides: Option<HashMap<String, LogLevel>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialApiConfig {
    pub enabled: Option<bool>,
    pub listen: Option<toml::Spanned<String>>,
    pub port: Option<toml::Spanned<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialSidecarConfig {
    pub python_path: Option<toml::Spanned<String>>,
    pub script_path: Option<toml::Spanned<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialStorageConfig {
    pub path: Option<toml::Spanned<String>>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;
        Self::parse(&content, path)
    }

    /// Parse config text; `path` is only used to label diagnostics.
    pub fn parse(content: &str, path: &Path) -> Result<Self, LoadError> {
        let mut config: PartialConfig = toml::from_str(content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content: content.to_string(),
        });

        Ok(config)
    }

    /// True when the file set nothing at all.
    pub fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.api.is_none()
            && self.sidecar.is_none()
            && self.storage.is_none()
    }
}
