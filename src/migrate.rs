//! Legacy layout migration
//!
//! Moves flat `{author}/{module}.json` records into the versioned layout:
//!
//! ```text
//! {author}/{module}/metadata.json
//! {author}/{module}/{version}.json
//! {author}/{module}/tags.json        latest + stable → version
//! {author}/{module}.json.backup      the flat file, renamed
//! ```
//!
//! Planning is separate from applying so a dry run shows exactly what would
//! be written.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, Result};
use crate::loader::{discover_modules, ModuleLocation, METADATA_FILE, TAGS_FILE};
use crate::schema::{ModuleKey, TagMap, DEFAULT_LEGACY_VERSION, DEFAULT_LICENSE};
use crate::version::{ModuleVersion, LATEST_TAG};

/// Tag pinned alongside `latest` for migrated modules
pub const STABLE_TAG: &str = "stable";
/// Engine range assumed when a legacy record declares none
pub const DEFAULT_MLLD_VERSION: &str = ">=1.0.0";
const BACKUP_SUFFIX: &str = "backup";

/// One module to migrate
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStep {
    pub key: ModuleKey,
    pub legacy_file: PathBuf,
    pub target_dir: PathBuf,
    pub version: ModuleVersion,
    pub metadata: Value,
    pub version_record: Value,
    pub tags: TagMap,
}

impl MigrationStep {
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.legacy_file.as_os_str().to_owned();
        name.push(format!(".{}", BACKUP_SUFFIX));
        PathBuf::from(name)
    }

    /// Files this step creates
    pub fn outputs(&self) -> Vec<PathBuf> {
        vec![
            self.target_dir.join(METADATA_FILE),
            self.target_dir.join(self.version.file_name()),
            self.target_dir.join(TAGS_FILE),
        ]
    }
}

/// A module left alone, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedModule {
    pub key: ModuleKey,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
    pub skipped: Vec<SkippedModule>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Work out what a migration of `root` would do
pub fn plan_migration(root: &Path) -> Result<MigrationPlan> {
    let mut plan = MigrationPlan::default();

    for location in discover_modules(root)? {
        let ModuleLocation::Legacy { key, file } = location else {
            continue;
        };

        let target_dir = file.with_extension("");
        if target_dir.exists() {
            plan.skipped.push(SkippedModule {
                key,
                path: file,
                reason: format!("{} already exists", target_dir.display()),
            });
            continue;
        }

        match plan_step(&key, &file, target_dir) {
            Ok(step) => plan.steps.push(step),
            Err(e) => plan.skipped.push(SkippedModule {
                key,
                path: file,
                reason: e.to_string(),
            }),
        }
    }

    debug!(
        "Migration plan: {} to migrate, {} skipped",
        plan.steps.len(),
        plan.skipped.len()
    );
    Ok(plan)
}

fn plan_step(key: &ModuleKey, file: &Path, target_dir: PathBuf) -> Result<MigrationStep> {
    let content = fs::read_to_string(file)?;
    let record: Map<String, Value> = match serde_json::from_str::<Value>(&content)? {
        Value::Object(obj) => obj,
        _ => {
            return Err(RegistryError::Migration(format!(
                "{} does not contain a JSON object",
                file.display()
            )))
        }
    };

    let version_str = string_field(&record, "version").unwrap_or(DEFAULT_LEGACY_VERSION);
    let version = ModuleVersion::parse(version_str)?;
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let author = match record.get("author") {
        Some(Value::Object(profile)) => profile
            .get("github")
            .filter(|handle| handle.as_str().is_some_and(|h| !h.is_empty()))
            .cloned()
            .unwrap_or_else(|| Value::String(key.author().to_string())),
        Some(other) => other.clone(),
        None => Value::String(key.author().to_string()),
    };
    let published_at = string_field(&record, "publishedAt").map(str::to_string).unwrap_or(now);
    let published_by = record.get("publishedBy").cloned().unwrap_or(Value::Null);
    let about = string_field(&record, "about")
        .or_else(|| string_field(&record, "description"))
        .unwrap_or_default();

    let metadata = json!({
        "name": record.get("name").cloned().unwrap_or_else(|| Value::String(key.to_string())),
        "author": author,
        "about": about,
        "owners": [author],
        "maintainers": [],
        "created": published_at,
        "createdBy": published_by,
    });

    let mut version_record = Map::new();
    version_record.insert("version".to_string(), json!(version.to_string()));
    version_record.insert("needs".to_string(), field_or(&record, "needs", json!([])));
    version_record.insert(
        "license".to_string(),
        field_or(&record, "license", json!(DEFAULT_LICENSE)),
    );
    version_record.insert(
        "mlldVersion".to_string(),
        field_or(&record, "mlldVersion", json!(DEFAULT_MLLD_VERSION)),
    );
    version_record.insert("source".to_string(), field_or(&record, "source", Value::Null));
    version_record.insert("dependencies".to_string(), field_or(&record, "dependencies", json!({})));
    version_record.insert("keywords".to_string(), field_or(&record, "keywords", json!([])));
    for optional in ["repo", "bugs", "homepage"] {
        if let Some(value) = record.get(optional).filter(|v| !v.is_null()) {
            version_record.insert(optional.to_string(), value.clone());
        }
    }
    version_record.insert("publishedAt".to_string(), json!(published_at));
    version_record.insert("publishedBy".to_string(), published_by);

    let tags: TagMap = [LATEST_TAG, STABLE_TAG]
        .into_iter()
        .map(|tag| (tag.to_string(), version.to_string()))
        .collect();

    Ok(MigrationStep {
        key: key.clone(),
        legacy_file: file.to_path_buf(),
        target_dir,
        version,
        metadata,
        version_record: Value::Object(version_record),
        tags,
    })
}

fn string_field<'a>(record: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn field_or(record: &Map<String, Value>, field: &str, default: Value) -> Value {
    record
        .get(field)
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or(default)
}

fn write_pretty(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    fs::write(path, json)?;
    Ok(())
}

/// Write every step of a plan, returning the backup paths
///
/// Steps run in order; the first failure stops the migration and the
/// modules already migrated stay migrated.
pub fn apply_migration(plan: &MigrationPlan) -> Result<Vec<PathBuf>> {
    let mut backups = Vec::with_capacity(plan.steps.len());

    for step in &plan.steps {
        if step.target_dir.exists() {
            warn!("Skipping {}: {} appeared during migration", step.key, step.target_dir.display());
            continue;
        }

        fs::create_dir_all(&step.target_dir)?;
        let outputs = step.outputs();
        write_pretty(&outputs[0], &step.metadata)?;
        write_pretty(&outputs[1], &step.version_record)?;
        write_pretty(&outputs[2], &step.tags)?;

        let backup = step.backup_path();
        fs::rename(&step.legacy_file, &backup)?;
        info!("Migrated {} to {}", step.key, step.target_dir.display());
        backups.push(backup);
    }

    Ok(backups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_module;
    use crate::schema::LayoutFormat;
    use tempfile::TempDir;

    fn legacy_record() -> Value {
        json!({
            "name": "@alice/utils",
            "author": { "name": "Alice", "github": "alice" },
            "description": "Handy helpers",
            "version": "1.2.0",
            "mlldVersion": ">=0.5.0",
            "publishedAt": "2024-01-01T00:00:00Z",
            "source": { "type": "external", "url": "https://example.com/utils.mld" },
            "keywords": ["utils"]
        })
    }

    fn seed(root: &Path) {
        let author = root.join("alice");
        fs::create_dir_all(&author).unwrap();
        fs::write(author.join("utils.json"), legacy_record().to_string()).unwrap();
        fs::write(author.join("bare.json"), json!({ "name": "@alice/bare" }).to_string()).unwrap();
    }

    #[test]
    fn test_plan_builds_versioned_records() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());

        let plan = plan_migration(temp.path()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.skipped.is_empty());

        let utils = plan.steps.iter().find(|s| s.key.name() == "utils").unwrap();
        assert_eq!(utils.version.to_string(), "1.2.0");
        assert_eq!(utils.metadata["author"], "alice");
        assert_eq!(utils.metadata["about"], "Handy helpers");
        assert_eq!(utils.metadata["owners"], json!(["alice"]));
        assert_eq!(utils.metadata["created"], "2024-01-01T00:00:00Z");
        assert_eq!(utils.version_record["license"], DEFAULT_LICENSE);
        assert_eq!(utils.tags["latest"], "1.2.0");
        assert_eq!(utils.tags["stable"], "1.2.0");
        assert!(utils.version_record.get("repo").is_none());

        let bare = plan.steps.iter().find(|s| s.key.name() == "bare").unwrap();
        assert_eq!(bare.version.to_string(), DEFAULT_LEGACY_VERSION);
        assert_eq!(bare.version_record["mlldVersion"], DEFAULT_MLLD_VERSION);
    }

    #[test]
    fn test_author_profile_without_handle_uses_key_author() {
        let temp = TempDir::new().unwrap();
        let author = temp.path().join("alice");
        fs::create_dir_all(&author).unwrap();
        let mut record = legacy_record();
        record["author"] = json!({ "name": "Alice" });
        fs::write(author.join("utils.json"), record.to_string()).unwrap();

        let plan = plan_migration(temp.path()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].metadata["author"], "alice");
        assert_eq!(plan.steps[0].metadata["owners"], json!(["alice"]));
    }

    #[test]
    fn test_existing_directory_is_skipped() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());
        fs::create_dir_all(temp.path().join("alice/utils")).unwrap();

        let plan = plan_migration(temp.path()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].key.name(), "utils");
    }

    #[test]
    fn test_apply_writes_layout_and_backup() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());

        let plan = plan_migration(temp.path()).unwrap();
        let backups = apply_migration(&plan).unwrap();
        assert_eq!(backups.len(), 2);

        let dir = temp.path().join("alice/utils");
        assert!(dir.join("metadata.json").is_file());
        assert!(dir.join("1.2.0.json").is_file());
        assert!(dir.join("tags.json").is_file());
        assert!(temp.path().join("alice/utils.json.backup").is_file());
        assert!(!temp.path().join("alice/utils.json").exists());

        let module = load_module(&ModuleLocation::Versioned {
            key: ModuleKey::new("alice", "utils"),
            dir,
        })
        .unwrap();
        assert_eq!(module.format, LayoutFormat::Versioned);
        assert_eq!(module.record["version"], "1.2.0");
        assert_eq!(module.record["keywords"], json!(["utils"]));

        // A second run has nothing left to do
        assert!(plan_migration(temp.path()).unwrap().is_empty());
    }
}
