// config.rs — Legalization options and their layered sources
//
// Options are resolved lowest to highest precedence: built-in defaults,
// `set` directives in the source, a JSON config file, CLI flags.
//
// Preconditions: none.
// Postconditions: a returned `LegalizeOptions` has passed `validate`.
// Failure modes: unreadable or malformed config files return `ConfigError`;
//                bad `set` directives produce diagnostics (W0105, E0106).
// Side effects: `load_overrides` reads a file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::{Item, Program, SetStmt, SetValue};
use crate::diag::{codes, Diagnostic};

pub const KNOWN_SETTINGS: &[&str] = &["insert_copy", "min_gran"];

/// Configuration of the legalization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LegalizeOptions {
    /// Bridge bypass edges with copy chains (`true`) or merge their levels (`false`).
    pub insert_copy: bool,
    /// Minimum number of original levels folded into one output stage.
    pub min_gran: u32,
}

impl Default for LegalizeOptions {
    fn default() -> Self {
        LegalizeOptions {
            insert_copy: true,
            min_gran: 1,
        }
    }
}

/// A partial set of options from one source. Absent fields leave lower
/// layers untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub insert_copy: Option<bool>,
    pub min_gran: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("min_gran must be at least 1, got {0}")]
    ZeroGranularity(u32),
}

impl LegalizeOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_gran == 0 {
            return Err(ConfigError::ZeroGranularity(self.min_gran));
        }
        Ok(())
    }

    /// Whether the compactor renumbers levels after grouping.
    pub fn renumbers(&self) -> bool {
        self.min_gran != 1 || !self.insert_copy
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.insert_copy {
            self.insert_copy = v;
        }
        if let Some(v) = overrides.min_gran {
            self.min_gran = v;
        }
    }

    /// Defaults overlaid with the `set` directives of `program`.
    pub fn from_program(program: &Program) -> (Self, Vec<Diagnostic>) {
        let mut opts = LegalizeOptions::default();
        let mut diagnostics = Vec::new();
        for item in &program.items {
            if let Item::Set(set) = item {
                if let Err(diag) = opts.apply_set(set) {
                    diagnostics.push(diag);
                }
            }
        }
        (opts, diagnostics)
    }

    fn apply_set(&mut self, set: &SetStmt) -> Result<(), Diagnostic> {
        let name = set.name.name.as_str();
        match (name, &set.value) {
            ("insert_copy", SetValue::Bool(v, _)) => {
                self.insert_copy = *v;
                Ok(())
            }
            ("min_gran", SetValue::Int(v, span)) => match u32::try_from(*v) {
                Ok(n) if n >= 1 => {
                    self.min_gran = n;
                    Ok(())
                }
                _ => Err(Diagnostic::error(
                    codes::E0106,
                    *span,
                    format!("min_gran must be a positive integer, got {v}"),
                )),
            },
            ("insert_copy" | "min_gran", value) => {
                let expected = if name == "insert_copy" {
                    "a boolean"
                } else {
                    "an integer"
                };
                Err(Diagnostic::error(
                    codes::E0106,
                    value.span(),
                    format!("setting '{name}' expects {expected}"),
                ))
            }
            _ => Err(Diagnostic::warning(
                codes::W0105,
                set.name.span,
                format!("unknown setting '{name}'"),
            )
            .with_hint(format!("known settings: {}", KNOWN_SETTINGS.join(", ")))),
        }
    }
}

/// Parse a JSON config file into overrides.
pub fn load_overrides(path: &Path) -> Result<ConfigOverrides, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_overrides(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_overrides(text: &str) -> Result<ConfigOverrides, serde_json::Error> {
    serde_json::from_str(text)
}
