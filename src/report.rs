//! Per-module diagnostics and the validation report

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a per-module problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// Files could not be read or parsed
    Load,
    /// Record failed structural or format validation
    Schema,
    /// Fetched content disagrees with the record
    Integrity,
    /// Versions or tags could not be resolved
    Resolution,
    /// Content could not be fetched
    Network,
    /// Module key already claimed by an earlier module
    Duplicate,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Load => "load",
            DiagnosticKind::Schema => "schema",
            DiagnosticKind::Integrity => "integrity",
            DiagnosticKind::Resolution => "resolution",
            DiagnosticKind::Network => "network",
            DiagnosticKind::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found while processing a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Load, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Schema, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Integrity, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Resolution, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Network, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Duplicate, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Whether diagnostics fail the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    /// Any diagnostic fails the build
    #[default]
    Strict,
    /// Diagnostics are reported, invalid modules are skipped
    BestEffort,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Strict => "strict",
            BuildMode::BestEffort => "best-effort",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result line for one module in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Machine-readable summary of a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub timestamp: DateTime<Utc>,
    pub modules: usize,
    pub valid: usize,
    pub invalid: usize,
    pub total_errors: usize,
    pub results: BTreeMap<String, ModuleResult>,
}

impl ValidationReport {
    /// Build from per-module diagnostics, keyed by module key or path label
    pub fn from_diagnostics<'a, I>(modules: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<Diagnostic>)>,
    {
        let results: BTreeMap<String, ModuleResult> = modules
            .into_iter()
            .map(|(key, diagnostics)| {
                (
                    key.clone(),
                    ModuleResult {
                        valid: diagnostics.is_empty(),
                        errors: diagnostics.iter().map(|d| d.to_string()).collect(),
                    },
                )
            })
            .collect();

        let valid = results.values().filter(|r| r.valid).count();
        let total_errors = results.values().map(|r| r.errors.len()).sum();

        Self {
            timestamp: Utc::now(),
            modules: results.len(),
            valid,
            invalid: results.len() - valid,
            total_errors,
            results,
        }
    }
}
