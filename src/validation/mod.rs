//! Module Record Validation
//!
//! Checks a merged metadata + version record before it is admitted to the
//! index. Validation never fails: every independent check runs and each
//! problem becomes one message, so a single pass shows authors everything
//! that needs fixing.
//!
//! ## Schema generations
//! Records are checked against exactly one generation. A record's
//! `schemaVersion` field selects it; otherwise the storage layout does
//! (flat file = generation 1, versioned directory = generation 2). Fields
//! that belong to the other generation are reported rather than tolerated.

mod source;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map, Value};

use crate::schema::{LayoutFormat, ModuleKey, Runtime, SchemaGeneration};

/// Field selecting the schema generation explicitly
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

const LEGACY_REQUIRED: &[&str] = &["name", "author", "source", "publishedAt", "mlldVersion"];
const VERSIONED_REQUIRED: &[&str] = &[
    "name",
    "author",
    "about",
    "created",
    "version",
    "source",
    "publishedAt",
    "mlldVersion",
];

/// Fields only generation 1 may carry
const LEGACY_ONLY: &[&str] = &["description", "ownerGithubUserIds"];
/// Fields only generation 2 may carry
const VERSIONED_ONLY: &[&str] = &["owners", "maintainers"];

/// Accepted values of the optional `category` field
pub const VALID_CATEGORIES: &[&str] = &[
    "prompts",
    "utilities",
    "when",
    "filters",
    "formatters",
    "commands",
    "apis",
    "clis",
    "templates",
    "integrations",
    "generators",
    "validators",
    "transformers",
    "workflows",
    "dev",
    "tests",
    "context",
];

/// Compiled format rules shared by the record and source checks
pub(crate) struct Patterns {
    pub module_key: Regex,
    pub handle: Regex,
    pub keyword: Regex,
    pub engine_range: Regex,
    pub strict_semver: Regex,
    pub gist_id: Regex,
    pub commit_hash: Regex,
    pub content_hash: Regex,
    pub owner_repo: Regex,
    pub http_url: Regex,
}

impl Patterns {
    fn new() -> Self {
        let re = |p: &str| Regex::new(p).expect("validation pattern is valid");
        Self {
            module_key: re(r"^@[a-z0-9-]+/[a-z0-9-]+$"),
            handle: re(r"^[a-z0-9-]+$"),
            keyword: re(r"^[a-z0-9-]+$"),
            engine_range: re(r"^(>=|>|=|<|<=)?\d+\.\d+\.\d+$"),
            strict_semver: re(r"^\d+\.\d+\.\d+$"),
            gist_id: re(r"^[a-f0-9]{32}$"),
            commit_hash: re(r"^[a-f0-9]{40}$"),
            content_hash: re(r"^[a-f0-9]{64}$"),
            owner_repo: re(r"^[^/]+/[^/]+$"),
            http_url: re(r"^https?://.+"),
        }
    }
}

/// Work out which generation a record must be validated against
///
/// An explicit `schemaVersion` wins; the layout decides otherwise. An
/// unusable `schemaVersion` is an error and the layout default is used so the
/// remaining checks still run.
pub fn resolve_generation(
    record: &Value,
    layout: LayoutFormat,
) -> (SchemaGeneration, Option<String>) {
    let fallback = SchemaGeneration::for_layout(layout);
    match record.get(SCHEMA_VERSION_FIELD) {
        None | Some(Value::Null) => (fallback, None),
        Some(declared) => match declared.as_u64().and_then(SchemaGeneration::from_number) {
            Some(generation) => (generation, None),
            None => (
                fallback,
                Some(format!(
                    "Invalid {}: {}. Must be 1 or 2",
                    SCHEMA_VERSION_FIELD, declared
                )),
            ),
        },
    }
}

/// The module record validator
pub struct SchemaValidator {
    patterns: Patterns,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            patterns: Patterns::new(),
        }
    }

    /// Validate a record, returning every problem found
    pub fn validate(
        &self,
        key: &ModuleKey,
        record: &Value,
        generation: SchemaGeneration,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        let key_str = key.to_string();
        if !self.patterns.module_key.is_match(&key_str) {
            errors.push(format!(
                "Invalid module name format: {}. Must be @username/module-name",
                key_str
            ));
        }

        let Some(obj) = record.as_object() else {
            errors.push("Module record must be a JSON object".to_string());
            return errors;
        };

        self.check_required(obj, generation, &mut errors);
        self.check_generation_fields(obj, generation, &mut errors);
        self.check_name(obj, &key_str, &mut errors);
        self.check_author(obj, key, generation, &mut errors);

        if let Some(source) = present(obj, "source") {
            source::validate_source(&self.patterns, source, &mut errors);
        }

        self.check_dependencies(obj, &mut errors);
        self.check_needs(obj, &mut errors);
        self.check_keywords(obj, &mut errors);
        self.check_engine_range(obj, &mut errors);
        self.check_dates(obj, &mut errors);
        self.check_version(obj, generation, &mut errors);
        self.check_ownership(obj, &mut errors);
        self.check_category(obj, &mut errors);
        self.check_optional_strings(obj, &mut errors);

        errors
    }

    fn check_required(
        &self,
        obj: &Map<String, Value>,
        generation: SchemaGeneration,
        errors: &mut Vec<String>,
    ) {
        let required = match generation {
            SchemaGeneration::Legacy => LEGACY_REQUIRED,
            SchemaGeneration::Versioned => VERSIONED_REQUIRED,
        };
        for field in required {
            if present(obj, field).is_none() {
                errors.push(format!("Missing required field: {}", field));
            }
        }

        // generation 1 accepts the older `description` in place of `about`
        if generation == SchemaGeneration::Legacy
            && present(obj, "about").is_none()
            && present(obj, "description").is_none()
        {
            errors.push("Missing required field: about".to_string());
        }
    }

    fn check_generation_fields(
        &self,
        obj: &Map<String, Value>,
        generation: SchemaGeneration,
        errors: &mut Vec<String>,
    ) {
        let (foreign, owner) = match generation {
            SchemaGeneration::Legacy => (VERSIONED_ONLY, SchemaGeneration::Versioned),
            SchemaGeneration::Versioned => (LEGACY_ONLY, SchemaGeneration::Legacy),
        };
        for field in foreign {
            if obj.contains_key(*field) {
                errors.push(format!(
                    "Field {} belongs to {} and is not allowed in {}",
                    field, owner, generation
                ));
            }
        }
    }

    fn check_name(&self, obj: &Map<String, Value>, key: &str, errors: &mut Vec<String>) {
        match present(obj, "name") {
            Some(Value::String(name)) if name != key => {
                errors.push(format!("Module name mismatch: {} !== {}", name, key));
            }
            Some(Value::String(_)) | None => {}
            Some(_) => errors.push("Name must be a string".to_string()),
        }
    }

    fn check_author(
        &self,
        obj: &Map<String, Value>,
        key: &ModuleKey,
        generation: SchemaGeneration,
        errors: &mut Vec<String>,
    ) {
        let handle = match present(obj, "author") {
            None => return,
            Some(Value::String(handle)) => handle.as_str(),
            Some(Value::Object(profile)) => {
                if generation == SchemaGeneration::Versioned {
                    errors.push(format!("Author must be a string in {}", generation));
                    return;
                }
                if non_empty_str(profile.get("name")).is_none() {
                    errors.push("Author object missing name".to_string());
                }
                match non_empty_str(profile.get("github")) {
                    Some(github) => github,
                    None => {
                        errors.push("Author object missing github".to_string());
                        return;
                    }
                }
            }
            Some(_) => {
                errors.push("Author must be a string or an object with name and github".to_string());
                return;
            }
        };

        if !self.patterns.handle.is_match(handle) {
            errors.push(format!(
                "Invalid author format: {}. Must be lowercase alphanumeric with hyphens",
                handle
            ));
        }
        if handle != key.author() {
            errors.push(format!(
                "Author mismatch: {} does not match directory {}",
                handle,
                key.author()
            ));
        }
    }

    fn check_dependencies(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        let deps = match present(obj, "dependencies") {
            None => return,
            Some(Value::Object(deps)) => deps,
            Some(_) => {
                errors.push("Dependencies must be an object".to_string());
                return;
            }
        };

        for (tag, declared) in deps {
            let runtime = Runtime::from_tag(tag);
            if runtime.is_none() {
                errors.push(format!(
                    "Invalid dependency runtime: {}. Must be one of: {}",
                    tag,
                    Runtime::tag_list()
                ));
            }
            let Some(declared) = declared.as_object() else {
                errors.push(format!("Dependencies for {} must be an object", tag));
                continue;
            };
            let Some(runtime) = runtime else { continue };

            let expected = runtime.dependency_field();
            for (field, list) in declared {
                if field != expected {
                    errors.push(format!(
                        "dependencies.{}.{} is not valid for {}; expected {}",
                        tag, field, tag, expected
                    ));
                    continue;
                }
                let Some(items) = list.as_array() else {
                    errors.push(format!("dependencies.{}.{} must be an array", tag, field));
                    continue;
                };
                for item in items {
                    let well_formed = item
                        .as_str()
                        .map(|s| !s.is_empty() && !s.chars().any(char::is_whitespace))
                        .unwrap_or(false);
                    if !well_formed {
                        errors.push(format!(
                            "Invalid entry in dependencies.{}.{}: {}",
                            tag,
                            field,
                            display(item)
                        ));
                    }
                }
            }
        }
    }

    fn check_needs(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        match present(obj, "needs") {
            None => {}
            Some(Value::Array(needs)) => {
                for need in needs {
                    if need.as_str().and_then(Runtime::from_tag).is_none() {
                        errors.push(format!(
                            "Invalid need: {}. Must be one of: {}",
                            display(need),
                            Runtime::tag_list()
                        ));
                    }
                }
            }
            Some(_) => errors.push("Needs must be an array".to_string()),
        }
    }

    fn check_keywords(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        match present(obj, "keywords") {
            None => {}
            Some(Value::Array(keywords)) => {
                for keyword in keywords {
                    let ok = keyword
                        .as_str()
                        .map(|k| self.patterns.keyword.is_match(k))
                        .unwrap_or(false);
                    if !ok {
                        errors.push(format!(
                            "Invalid keyword: {}. Must be lowercase alphanumeric with hyphens",
                            display(keyword)
                        ));
                    }
                }
            }
            Some(_) => errors.push("Keywords must be an array".to_string()),
        }
    }

    fn check_engine_range(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        if let Some(range) = present(obj, "mlldVersion") {
            let ok = range
                .as_str()
                .map(|r| self.patterns.engine_range.is_match(r))
                .unwrap_or(false);
            if !ok {
                errors.push(format!("Invalid mlldVersion format: {}", display(range)));
            }
        }
    }

    fn check_dates(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        for field in ["publishedAt", "created"] {
            if let Some(value) = present(obj, field) {
                if !value.as_str().map(is_valid_date).unwrap_or(false) {
                    errors.push(format!("Invalid {} date: {}", field, display(value)));
                }
            }
        }
    }

    fn check_version(
        &self,
        obj: &Map<String, Value>,
        generation: SchemaGeneration,
        errors: &mut Vec<String>,
    ) {
        let Some(value) = present(obj, "version") else { return };
        let Some(version) = value.as_str() else {
            errors.push(format!("Invalid version format: {}", display(value)));
            return;
        };

        match generation {
            SchemaGeneration::Legacy => {
                let strict = self.patterns.strict_semver.is_match(version)
                    && semver::Version::parse(version)
                        .map(|v| v.pre.is_empty())
                        .unwrap_or(false);
                if !strict {
                    errors.push(format!(
                        "Invalid version format: {}. Must be semver (x.y.z)",
                        version
                    ));
                }
            }
            SchemaGeneration::Versioned => {
                if crate::version::ModuleVersion::parse(version).is_err() {
                    errors.push(format!(
                        "Invalid version format: {}. Must be x.y.z or x.y.z-prerelease",
                        version
                    ));
                }
            }
        }
    }

    fn check_ownership(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        match present(obj, "ownerGithubUserIds") {
            None => {}
            Some(Value::Array(ids)) => {
                for id in ids {
                    if !id.as_u64().map(|n| n > 0).unwrap_or(false) {
                        errors.push(format!(
                            "Invalid GitHub user ID: {}. Must be a positive integer",
                            display(id)
                        ));
                    }
                }
            }
            Some(_) => errors.push("ownerGithubUserIds must be an array".to_string()),
        }

        match present(obj, "owners") {
            None => {}
            Some(Value::Array(owners)) if owners.is_empty() => {
                errors.push("Owners must be a non-empty list".to_string());
            }
            Some(Value::Array(owners)) => self.check_handles("owner", owners, errors),
            Some(_) => errors.push("Owners must be an array".to_string()),
        }

        match present(obj, "maintainers") {
            None => {}
            Some(Value::Array(maintainers)) => self.check_handles("maintainer", maintainers, errors),
            Some(_) => errors.push("Maintainers must be an array".to_string()),
        }
    }

    fn check_category(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        let Some(category) = present(obj, "category") else {
            return;
        };
        if !category.as_str().is_some_and(|c| VALID_CATEGORIES.contains(&c)) {
            errors.push(format!(
                "Invalid category: {}. Must be one of: {}",
                display(category),
                VALID_CATEGORIES.join(", ")
            ));
        }
    }

    fn check_handles(&self, role: &str, handles: &[Value], errors: &mut Vec<String>) {
        for handle in handles {
            let ok = handle
                .as_str()
                .map(|h| self.patterns.handle.is_match(h))
                .unwrap_or(false);
            if !ok {
                errors.push(format!("Invalid {}: {}", role, display(handle)));
            }
        }
    }

    fn check_optional_strings(&self, obj: &Map<String, Value>, errors: &mut Vec<String>) {
        if let Some(license) = present(obj, "license") {
            if !license.is_string() {
                errors.push("License must be a string".to_string());
            }
        }
        for field in ["repo", "bugs", "homepage"] {
            if let Some(value) = present(obj, field) {
                let ok = value
                    .as_str()
                    .map(|u| self.patterns.http_url.is_match(u))
                    .unwrap_or(false);
                if !ok {
                    errors.push(format!("Invalid {} URL: {}", field, display(value)));
                }
            }
        }
    }
}

/// A field that is present and not null or an empty string
pub(crate) fn present<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(v),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Strings verbatim, everything else as JSON
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_valid_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
