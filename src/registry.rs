//! Registry Aggregation
//!
//! Walks the module tree once, turns every module into an immutable
//! [`ModuleOutcome`], and folds the outcomes into the published index.
//! Nothing here mutates a shared registry; a run is rebuilt from scratch.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, Result};
use crate::integrity::IntegrityChecker;
use crate::loader::{discover_modules, load_module, ModuleLocation};
use crate::report::{BuildMode, Diagnostic, ValidationReport};
use crate::schema::{ModuleRecord, RegistryEntry, RegistryIndex, SearchIndex};
use crate::validation::{resolve_generation, SchemaValidator};

/// Result of processing one module
#[derive(Debug, Clone)]
pub struct ModuleOutcome {
    /// `@author/name` derived from the storage path
    pub key: String,
    /// File or directory the module was read from
    pub origin: PathBuf,
    /// Present only when the module produced no diagnostics
    pub entry: Option<RegistryEntry>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ModuleOutcome {
    fn rejected(location: &ModuleLocation, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            key: location.key().to_string(),
            origin: location.path().to_path_buf(),
            entry: None,
            diagnostics,
        }
    }
}

/// Everything a build produced
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub index: RegistryIndex,
    /// Diagnostics per module, including modules without any
    pub results: BTreeMap<String, Vec<Diagnostic>>,
}

impl Aggregation {
    pub fn error_count(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    pub fn invalid_modules(&self) -> impl Iterator<Item = (&String, &Vec<Diagnostic>)> {
        self.results.iter().filter(|(_, d)| !d.is_empty())
    }

    /// Whether the build passes under `mode`
    pub fn is_success(&self, mode: BuildMode) -> bool {
        match mode {
            BuildMode::Strict => self.error_count() == 0,
            BuildMode::BestEffort => true,
        }
    }

    pub fn report(&self) -> ValidationReport {
        ValidationReport::from_diagnostics(&self.results)
    }
}

/// Fold module outcomes into an index
///
/// The first outcome for a key claims it, whether or not it was valid. Any
/// later outcome with the same key is rejected as a duplicate and reported
/// under its own origin.
pub fn fold<I>(outcomes: I) -> Aggregation
where
    I: IntoIterator<Item = ModuleOutcome>,
{
    let mut modules = BTreeMap::new();
    let mut results: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();
    let mut origins: BTreeMap<String, PathBuf> = BTreeMap::new();

    for outcome in outcomes {
        if let Some(first) = origins.get(&outcome.key) {
            warn!(
                "Duplicate module {} at {} (first seen at {})",
                outcome.key,
                outcome.origin.display(),
                first.display()
            );
            let label = format!("{} ({})", outcome.key, outcome.origin.display());
            results.insert(
                label,
                vec![Diagnostic::duplicate(format!(
                    "Duplicate module {}: already defined by {}",
                    outcome.key,
                    first.display()
                ))],
            );
            continue;
        }

        origins.insert(outcome.key.clone(), outcome.origin);
        if let Some(entry) = outcome.entry {
            modules.insert(outcome.key.clone(), entry);
        }
        results.insert(outcome.key, outcome.diagnostics);
    }

    Aggregation {
        index: RegistryIndex::new(modules),
        results,
    }
}

/// Builds the registry index from a modules directory
pub struct RegistryAggregator {
    modules_dir: PathBuf,
    validator: SchemaValidator,
    integrity: Option<IntegrityChecker>,
}

impl RegistryAggregator {
    pub fn new(modules_dir: impl AsRef<Path>) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            validator: SchemaValidator::new(),
            integrity: None,
        }
    }

    /// Verify fetched content for every module
    pub fn with_integrity(mut self, checker: IntegrityChecker) -> Self {
        self.integrity = Some(checker);
        self
    }

    /// Scan every module and build the index
    ///
    /// Fails only when the modules directory cannot be read or the run is
    /// cancelled.
    pub async fn aggregate(&self, cancel: &CancellationToken) -> Result<Aggregation> {
        let locations = discover_modules(&self.modules_dir)?;
        info!(
            "Building registry from {} module(s) in {}",
            locations.len(),
            self.modules_dir.display()
        );

        let mut outcomes = Vec::with_capacity(locations.len());
        for location in &locations {
            if cancel.is_cancelled() {
                return Err(RegistryError::Cancelled);
            }
            outcomes.push(self.process(location, cancel).await?);
        }

        let aggregation = fold(outcomes);
        info!(
            "Registry built: {} module(s) included, {} error(s)",
            aggregation.index.len(),
            aggregation.error_count()
        );
        Ok(aggregation)
    }

    /// Load, validate and optionally verify a single module
    pub async fn process(
        &self,
        location: &ModuleLocation,
        cancel: &CancellationToken,
    ) -> Result<ModuleOutcome> {
        let module = match load_module(location) {
            Ok(module) => module,
            Err(diagnostic) => {
                warn!("Skipping {}: {}", location.key(), diagnostic);
                return Ok(ModuleOutcome::rejected(location, vec![diagnostic]));
            }
        };

        let mut diagnostics = Vec::new();
        let (generation, generation_error) = resolve_generation(&module.record, module.format);
        diagnostics.extend(generation_error.map(Diagnostic::schema));
        diagnostics.extend(
            self.validator
                .validate(&module.key, &module.record, generation)
                .into_iter()
                .map(Diagnostic::schema),
        );

        let record = match serde_json::from_value::<ModuleRecord>(module.record.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                if diagnostics.is_empty() {
                    diagnostics.push(Diagnostic::schema(format!("Unreadable module record: {}", e)));
                }
                None
            }
        };

        if let (Some(checker), Some(record)) = (&self.integrity, &record) {
            diagnostics.extend(checker.check(&module.key, &record.source, cancel).await?);
        }

        if !diagnostics.is_empty() {
            warn!(
                "Skipping {}: {} error(s) ({})",
                module.key,
                diagnostics.len(),
                generation
            );
            return Ok(ModuleOutcome::rejected(location, diagnostics));
        }

        let Some(record) = record else {
            return Ok(ModuleOutcome::rejected(location, diagnostics));
        };
        let (metadata, version) = record.into_parts();
        let entry = RegistryEntry::assemble(
            metadata,
            version,
            module.available_versions,
            module.tags,
            module.format,
        );

        debug!("Accepted {} at {}", module.key, entry.version);
        Ok(ModuleOutcome {
            key: module.key.to_string(),
            origin: location.path().to_path_buf(),
            entry: Some(entry),
            diagnostics,
        })
    }
}

/// File names of the build artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub dir: PathBuf,
    pub index_file: String,
    pub dist_file: String,
    pub search_file: String,
    pub report_file: String,
}

impl Default for OutputFiles {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            index_file: "modules.json".to_string(),
            dist_file: "modules.min.json".to_string(),
            search_file: "search.json".to_string(),
            report_file: "validation-report.json".to_string(),
        }
    }
}

impl OutputFiles {
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(&self.index_file)
    }

    pub fn dist_path(&self) -> PathBuf {
        self.dir.join(&self.dist_file)
    }

    pub fn search_path(&self) -> PathBuf {
        self.dir.join(&self.search_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let mut json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    if pretty {
        json.push('\n');
    }
    fs::write(path, json)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write the index artifacts, plus the report when asked
///
/// Returns the paths written, in order.
pub fn write_outputs(
    aggregation: &Aggregation,
    files: &OutputFiles,
    save_report: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&files.dir)?;

    let mut written = vec![files.index_path(), files.dist_path(), files.search_path()];
    write_json(&written[0], &aggregation.index, true)?;
    write_json(&written[1], &aggregation.index, false)?;
    write_json(&written[2], &SearchIndex::from(&aggregation.index), true)?;

    if save_report {
        let path = files.report_path();
        write_json(&path, &aggregation.report(), true)?;
        written.push(path);
    }

    Ok(written)
}
