//! Module Loading
//!
//! Enumerates `modules/{author}/...` and reads each module into a single
//! merged JSON record. Two layouts are recognised:
//!
//! ```text
//! modules/
//! ├── alice/
//! │   ├── utils/
//! │   │   ├── metadata.json     versioned layout
//! │   │   ├── 1.0.0.json
//! │   │   ├── 1.1.0.json
//! │   │   └── tags.json         optional
//! │   └── prompts.json          legacy flat file
//! └── bob/
//!     └── ...
//! ```
//!
//! A module directory lacking `metadata.json` falls back to the sibling
//! `{module}.json` flat file. Entries that cannot be read are kept as
//! [`ModuleLocation::Unreadable`] so they surface as load diagnostics.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{RegistryError, Result};
use crate::report::Diagnostic;
use crate::schema::{LayoutFormat, ModuleKey, TagMap, DEFAULT_LEGACY_VERSION};
use crate::version::{discover_versions, resolve_latest, ModuleVersion};

pub const METADATA_FILE: &str = "metadata.json";
pub const TAGS_FILE: &str = "tags.json";
const JSON_EXTENSION: &str = "json";
/// Stands in for a path segment that could not be read
const UNKNOWN_SEGMENT: &str = "*";

/// Where a module's data lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLocation {
    /// `{author}/{module}/metadata.json` plus version files
    Versioned { key: ModuleKey, dir: PathBuf },
    /// `{author}/{module}.json`
    Legacy { key: ModuleKey, file: PathBuf },
    /// A module directory with neither `metadata.json` nor a flat file
    Incomplete { key: ModuleKey, dir: PathBuf },
    /// An author directory or module entry that could not be read
    Unreadable {
        key: ModuleKey,
        path: PathBuf,
        error: String,
    },
}

impl ModuleLocation {
    pub fn key(&self) -> &ModuleKey {
        match self {
            ModuleLocation::Versioned { key, .. }
            | ModuleLocation::Legacy { key, .. }
            | ModuleLocation::Incomplete { key, .. }
            | ModuleLocation::Unreadable { key, .. } => key,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ModuleLocation::Versioned { dir, .. } | ModuleLocation::Incomplete { dir, .. } => dir,
            ModuleLocation::Legacy { file, .. } => file,
            ModuleLocation::Unreadable { path, .. } => path,
        }
    }
}

/// A module read from disk, not yet validated
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub key: ModuleKey,
    pub format: LayoutFormat,
    /// Module metadata merged with the selected version record
    pub record: Value,
    pub selected_version: ModuleVersion,
    /// Descending, without duplicates
    pub available_versions: Vec<ModuleVersion>,
    pub tags: Option<TagMap>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Key for an unreadable path: `@{author}/{module}` as far as the path
/// below `root` gives them, `*` for the rest
fn unreadable_key(root: &Path, path: &Path) -> ModuleKey {
    let mut segments = path
        .strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string());
    let author = segments.next().unwrap_or_else(|| UNKNOWN_SEGMENT.to_string());
    let name = segments
        .next()
        .map(|n| match n.strip_suffix(&format!(".{}", JSON_EXTENSION)) {
            Some(stem) => stem.to_string(),
            None => n,
        })
        .unwrap_or_else(|| UNKNOWN_SEGMENT.to_string());
    ModuleKey::new(author, name)
}

#[derive(Default)]
struct AuthorEntries {
    dirs: Vec<String>,
    /// Flat file stems
    files: Vec<String>,
    unreadable: Vec<(String, ModuleLocation)>,
}

/// Enumerate every module under `root` in a stable order
///
/// Only an unreadable root is an error. Anything unreadable below it comes
/// back as a [`ModuleLocation::Unreadable`].
pub fn discover_modules(root: &Path) -> Result<Vec<ModuleLocation>> {
    fs::read_dir(root).map_err(|source| RegistryError::Structural {
        path: root.to_path_buf(),
        source,
    })?;

    let mut authors: BTreeMap<String, AuthorEntries> = BTreeMap::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!("Unreadable entry {}: {}", path.display(), e);
                let key = unreadable_key(root, &path);
                let location = ModuleLocation::Unreadable {
                    key: key.clone(),
                    path,
                    error: e.to_string(),
                };
                authors
                    .entry(key.author().to_string())
                    .or_default()
                    .unreadable
                    .push((key.name().to_string(), location));
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().is_dir();

        if entry.depth() == 1 {
            if is_dir {
                authors.entry(name).or_default();
            }
            continue;
        }

        let Some(author) = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
        else {
            continue;
        };
        let Some(entries) = authors.get_mut(&author) else {
            continue;
        };

        if is_dir {
            entries.dirs.push(name);
        } else if let Some(stem) = name.strip_suffix(&format!(".{}", JSON_EXTENSION)) {
            entries.files.push(stem.to_string());
        }
    }

    let mut locations = Vec::new();
    for (author, entries) in authors {
        let AuthorEntries {
            dirs,
            mut files,
            unreadable,
        } = entries;
        let author_dir = root.join(&author);
        let mut found: Vec<(String, ModuleLocation)> = unreadable;

        for module in dirs {
            let dir = author_dir.join(&module);
            let key = ModuleKey::new(&author, &module);
            let location = if dir.join(METADATA_FILE).is_file() {
                ModuleLocation::Versioned { key, dir }
            } else if let Some(pos) = files.iter().position(|f| *f == module) {
                files.remove(pos);
                ModuleLocation::Legacy {
                    key,
                    file: author_dir.join(format!("{}.{}", module, JSON_EXTENSION)),
                }
            } else {
                ModuleLocation::Incomplete { key, dir }
            };
            found.push((module, location));
        }

        for module in files {
            let file = author_dir.join(format!("{}.{}", module, JSON_EXTENSION));
            let key = ModuleKey::new(&author, &module);
            found.push((module, ModuleLocation::Legacy { key, file }));
        }

        // Stable: directory before flat file of the same name
        found.sort_by(|a, b| a.0.cmp(&b.0));
        locations.extend(found.into_iter().map(|(_, location)| location));
    }

    debug!("Discovered {} module(s) under {}", locations.len(), root.display());
    Ok(locations)
}

/// Read a module into a merged record
pub fn load_module(location: &ModuleLocation) -> std::result::Result<LoadedModule, Diagnostic> {
    match location {
        ModuleLocation::Versioned { key, dir } => load_versioned(key, dir),
        ModuleLocation::Legacy { key, file } => load_legacy(key, file),
        ModuleLocation::Incomplete { dir, .. } => Err(Diagnostic::load(format!(
            "No {} in {} and no legacy module file beside it",
            METADATA_FILE,
            dir.display()
        ))),
        ModuleLocation::Unreadable { path, error, .. } => Err(Diagnostic::load(format!(
            "Failed to read {}: {}",
            path.display(),
            error
        ))),
    }
}

fn read_object(path: &Path) -> std::result::Result<Map<String, Value>, Diagnostic> {
    let content = fs::read_to_string(path)
        .map_err(|e| Diagnostic::load(format!("Failed to read {}: {}", path.display(), e)))?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(Diagnostic::load(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
        Err(e) => Err(Diagnostic::load(format!(
            "Failed to parse JSON in {}: {}",
            path.display(),
            e
        ))),
    }
}

fn load_versioned(key: &ModuleKey, dir: &Path) -> std::result::Result<LoadedModule, Diagnostic> {
    let metadata = read_object(&dir.join(METADATA_FILE))?;

    let list_error =
        |e: std::io::Error| Diagnostic::load(format!("Failed to list {}: {}", dir.display(), e));
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    let available_versions = discover_versions(&names);

    let tags_path = dir.join(TAGS_FILE);
    let tags = if tags_path.is_file() {
        let content = fs::read_to_string(&tags_path)
            .map_err(|e| Diagnostic::load(format!("Failed to read {}: {}", tags_path.display(), e)))?;
        let tags: TagMap = serde_json::from_str(&content).map_err(|e| {
            Diagnostic::load(format!("Failed to parse tags in {}: {}", tags_path.display(), e))
        })?;
        Some(tags)
    } else {
        None
    };

    let selected = resolve_latest(&key.to_string(), &available_versions, tags.as_ref())
        .map_err(|e| Diagnostic::resolution(e.to_string()))?;
    if !available_versions.contains(&selected) {
        return Err(Diagnostic::resolution(format!(
            "Tagged version {} has no version file {}",
            selected,
            selected.file_name()
        )));
    }

    let version_record = read_object(&dir.join(selected.file_name()))?;
    if let Some(declared) = version_record.get("version").and_then(Value::as_str) {
        if declared != selected.to_string() {
            return Err(Diagnostic::resolution(format!(
                "Version file {} declares version {}",
                selected.file_name(),
                declared
            )));
        }
    }

    // Module-level fields from metadata.json take precedence
    let mut record = version_record;
    record.extend(metadata);

    debug!("Loaded {} at {} ({} version(s))", key, selected, available_versions.len());
    Ok(LoadedModule {
        key: key.clone(),
        format: LayoutFormat::Versioned,
        record: Value::Object(record),
        selected_version: selected,
        available_versions,
        tags,
    })
}

fn default_legacy_version() -> ModuleVersion {
    ModuleVersion::parse(DEFAULT_LEGACY_VERSION).unwrap_or_else(|_| ModuleVersion::new(1, 0, 0))
}

fn load_legacy(key: &ModuleKey, file: &Path) -> std::result::Result<LoadedModule, Diagnostic> {
    let record = read_object(file)?;

    let selected = record
        .get("version")
        .and_then(Value::as_str)
        .and_then(|v| ModuleVersion::parse(v).ok())
        .unwrap_or_else(default_legacy_version);

    debug!("Loaded legacy module {} from {}", key, file.display());
    Ok(LoadedModule {
        key: key.clone(),
        format: LayoutFormat::Legacy,
        record: Value::Object(record),
        available_versions: vec![selected.clone()],
        selected_version: selected,
        tags: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, value: &Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn test_discovery_order_and_layouts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("bob/tools/metadata.json"), &json!({}));
        write(&root.join("alice/utils/metadata.json"), &json!({}));
        write(&root.join("alice/prompts.json"), &json!({}));
        write(&root.join("alice/legacy/README.json"), &json!({}));
        write(&root.join("alice/legacy.json"), &json!({}));
        fs::create_dir_all(root.join("alice/empty")).unwrap();
        fs::write(root.join("alice/notes.txt"), "ignored").unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();

        let found: Vec<(String, &str)> = discover_modules(root)
            .unwrap()
            .iter()
            .map(|l| {
                let layout = match l {
                    ModuleLocation::Versioned { .. } => "versioned",
                    ModuleLocation::Legacy { .. } => "legacy",
                    ModuleLocation::Incomplete { .. } => "incomplete",
                    ModuleLocation::Unreadable { .. } => "unreadable",
                };
                (l.key().to_string(), layout)
            })
            .collect();

        assert_eq!(
            found,
            vec![
                ("@alice/empty".to_string(), "incomplete"),
                ("@alice/legacy".to_string(), "legacy"),
                ("@alice/prompts".to_string(), "legacy"),
                ("@alice/utils".to_string(), "versioned"),
                ("@bob/tools".to_string(), "versioned"),
            ]
        );
    }

    #[test]
    fn test_missing_root_is_structural() {
        let temp = TempDir::new().unwrap();
        let err = discover_modules(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, RegistryError::Structural { .. }));
    }

    #[test]
    fn test_versioned_load_merges_selected_version() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("alice/utils");
        write(&dir.join("metadata.json"), &json!({ "name": "@alice/utils", "author": "alice" }));
        write(&dir.join("1.0.0.json"), &json!({ "version": "1.0.0", "license": "MIT" }));
        write(&dir.join("1.2.0.json"), &json!({ "version": "1.2.0", "license": "MIT" }));
        write(&dir.join("tags.json"), &json!({ "latest": "1.0.0" }));

        let location = ModuleLocation::Versioned {
            key: ModuleKey::new("alice", "utils"),
            dir,
        };
        let module = load_module(&location).unwrap();

        assert_eq!(module.selected_version.to_string(), "1.0.0");
        assert_eq!(module.record["version"], "1.0.0");
        assert_eq!(module.record["name"], "@alice/utils");
        let versions: Vec<String> = module.available_versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(versions, vec!["1.2.0", "1.0.0"]);
    }

    #[test]
    fn test_tag_pointing_at_missing_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("alice/utils");
        write(&dir.join("metadata.json"), &json!({}));
        write(&dir.join("1.0.0.json"), &json!({ "version": "1.0.0" }));
        write(&dir.join("tags.json"), &json!({ "latest": "2.0.0" }));

        let diagnostic = load_module(&ModuleLocation::Versioned {
            key: ModuleKey::new("alice", "utils"),
            dir,
        })
        .unwrap_err();
        assert_eq!(diagnostic.kind, crate::report::DiagnosticKind::Resolution);
    }

    #[test]
    fn test_unparsable_latest_tag() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("alice/utils");
        write(&dir.join("metadata.json"), &json!({}));
        write(&dir.join("1.0.0.json"), &json!({ "version": "1.0.0" }));
        write(&dir.join("tags.json"), &json!({ "latest": "garbage" }));

        let diagnostic = load_module(&ModuleLocation::Versioned {
            key: ModuleKey::new("alice", "utils"),
            dir,
        })
        .unwrap_err();
        assert_eq!(diagnostic.kind, crate::report::DiagnosticKind::Resolution);
        assert!(diagnostic.message.contains("garbage"), "{}", diagnostic.message);
    }

    #[test]
    fn test_unreadable_location_is_load_error() {
        let location = ModuleLocation::Unreadable {
            key: ModuleKey::new("bob", UNKNOWN_SEGMENT),
            path: PathBuf::from("modules/bob"),
            error: "Permission denied (os error 13)".to_string(),
        };
        assert_eq!(location.key().to_string(), "@bob/*");

        let diagnostic = load_module(&location).unwrap_err();
        assert_eq!(diagnostic.kind, crate::report::DiagnosticKind::Load);
        assert_eq!(
            diagnostic.message,
            "Failed to read modules/bob: Permission denied (os error 13)"
        );
    }

    #[test]
    fn test_unreadable_key_from_path() {
        let root = Path::new("/srv/modules");
        assert_eq!(unreadable_key(root, &root.join("bob")).to_string(), "@bob/*");
        assert_eq!(unreadable_key(root, &root.join("bob/tools")).to_string(), "@bob/tools");
        assert_eq!(unreadable_key(root, &root.join("bob/tools.json")).to_string(), "@bob/tools");
        assert_eq!(unreadable_key(root, root).to_string(), "@*/*");
    }

    #[test]
    fn test_no_version_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("alice/utils");
        write(&dir.join("metadata.json"), &json!({}));

        let diagnostic = load_module(&ModuleLocation::Versioned {
            key: ModuleKey::new("alice", "utils"),
            dir,
        })
        .unwrap_err();
        assert_eq!(diagnostic.message, "No versions found for @alice/utils");
    }

    #[test]
    fn test_legacy_load_defaults_version() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("alice/prompts.json");
        write(&file, &json!({ "name": "@alice/prompts" }));

        let module = load_module(&ModuleLocation::Legacy {
            key: ModuleKey::new("alice", "prompts"),
            file,
        })
        .unwrap();
        assert_eq!(module.format, LayoutFormat::Legacy);
        assert_eq!(module.available_versions, vec![ModuleVersion::new(1, 0, 0)]);
        assert!(module.tags.is_none());
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("alice/broken.json");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "{ not json").unwrap();

        let diagnostic = load_module(&ModuleLocation::Legacy {
            key: ModuleKey::new("alice", "broken"),
            file,
        })
        .unwrap_err();
        assert_eq!(diagnostic.kind, crate::report::DiagnosticKind::Load);
        assert!(diagnostic.message.starts_with("Failed to parse JSON"));
    }
}
