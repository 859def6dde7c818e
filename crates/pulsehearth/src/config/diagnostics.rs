use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(ValidationError),
}

/// Warnings don't prevent the config from loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },
}

/// A value that parsed but is not acceptable
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Config file could not be read or parsed at all
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    render_diagnostics(diagnostics, true)
}

/// Format diagnostics, optionally without terminal colours.
pub fn render_diagnostics(diagnostics: &[Diagnostic], color: bool) -> String {
    use ariadne::Color;
    use ariadne::Label;
    use ariadne::Report;
    use ariadne::ReportKind;
    use ariadne::Source;

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(Warning::EmptyConfig { file_path }) => {
                let msg = format!(
                    "Warning: Config file '{}' is empty, using defaults\n",
                    file_path.display()
                );
                output.extend_from_slice(msg.as_bytes());
            }
            Diagnostic::Error(error) => match (&error.span, &error.source) {
                (Some(span), Some(source)) => {
                    let file_id = source.file_path.to_string_lossy().to_string();
                    Report::build(ReportKind::Error, (file_id.clone(), span.clone()))
                        .with_config(ariadne::Config::default().with_color(color))
                        .with_message(format!("Invalid value for '{}'", error.field_path))
                        .with_label(
                            Label::new((file_id.clone(), span.clone()))
                                .with_message(&error.message)
                                .with_color(Color::Red),
                        )
                        .finish()
                        .write((file_id, Source::from(&source.content)), &mut output)
                        .ok();
                }
                _ => {
                    let msg = format!(
                        "Validation error in '{}': {}\n",
                        error.field_path, error.message
                    );
                    output.extend_from_slice(msg.as_bytes());
                }
            },
        }
    }

    String::from_utf8_lossy(&output).to_string()
}
