//! Registry data model
//!
//! Inputs (`metadata.json`, `{version}.json`, `tags.json`, legacy flat files)
//! are read as loosely typed JSON first so the validator can report every
//! problem. Only records that pass are converted into the typed structures
//! here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::version::ModuleVersion;

/// Format version written into every generated index
pub const INDEX_FORMAT_VERSION: &str = "1.0.0";

/// Symbolic tag → version string
pub type TagMap = BTreeMap<String, String>;

/// `@{author}/{name}` identifier of a module
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleKey {
    author: String,
    name: String,
}

impl ModuleKey {
    pub fn new(author: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            name: name.into(),
        }
    }

    /// Split `@author/name` into its segments
    pub fn parse(key: &str) -> Option<Self> {
        let (author, name) = key.strip_prefix('@')?.split_once('/')?;
        Some(Self::new(author, name))
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Both segments are non-empty lowercase alphanumerics with hyphens
    pub fn is_well_formed(&self) -> bool {
        fn segment_ok(s: &str) -> bool {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        }
        segment_ok(&self.author) && segment_ok(&self.name)
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}/{}", self.author, self.name)
    }
}

/// Schema generation a record is validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaGeneration {
    /// Flat `{module}.json` records: author may be an object, `description`
    /// may stand in for `about`, ownership by GitHub user id.
    Legacy,
    /// Split `metadata.json` + `{version}.json` records with string authors
    /// and explicit owner lists.
    Versioned,
}

impl SchemaGeneration {
    /// Value of the `schemaVersion` field for this generation
    pub fn number(&self) -> u64 {
        match self {
            SchemaGeneration::Legacy => 1,
            SchemaGeneration::Versioned => 2,
        }
    }

    pub fn from_number(n: u64) -> Option<Self> {
        match n {
            1 => Some(SchemaGeneration::Legacy),
            2 => Some(SchemaGeneration::Versioned),
            _ => None,
        }
    }

    /// Generation implied by the storage layout a record was read from
    pub fn for_layout(format: LayoutFormat) -> Self {
        match format {
            LayoutFormat::Versioned => SchemaGeneration::Versioned,
            LayoutFormat::Legacy => SchemaGeneration::Legacy,
        }
    }
}

impl fmt::Display for SchemaGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema generation {}", self.number())
    }
}

/// Storage layout an entry was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutFormat {
    /// `modules/{author}/{module}/metadata.json` + version files
    #[default]
    Versioned,
    /// `modules/{author}/{module}.json`
    Legacy,
}

impl LayoutFormat {
    pub fn is_versioned(&self) -> bool {
        matches!(self, LayoutFormat::Versioned)
    }
}

/// Execution runtimes a module may need or declare dependencies for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Js,
    Node,
    Py,
    Python,
    Sh,
    Bash,
}

impl Runtime {
    pub const ALL: [Runtime; 6] = [
        Runtime::Js,
        Runtime::Node,
        Runtime::Py,
        Runtime::Python,
        Runtime::Sh,
        Runtime::Bash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Js => "js",
            Runtime::Node => "node",
            Runtime::Py => "py",
            Runtime::Python => "python",
            Runtime::Sh => "sh",
            Runtime::Bash => "bash",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == tag)
    }

    /// Field of a dependency declaration that lists this runtime's requirements
    pub fn dependency_field(&self) -> &'static str {
        match self {
            Runtime::Js | Runtime::Node | Runtime::Py | Runtime::Python => "packages",
            Runtime::Sh | Runtime::Bash => "commands",
        }
    }

    /// Comma-separated list of every runtime tag, for error messages
    pub fn tag_list() -> String {
        Self::ALL.map(|r| r.as_str()).join(", ")
    }
}

/// Requirements declared for one runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependencies {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}

/// Identity of whoever created or published a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    /// Numeric GitHub user id
    Id(u64),
    /// GitHub login
    Login(String),
}

/// Author as written in a record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AuthorField {
    Handle(String),
    Profile { name: String, github: String },
}

impl AuthorField {
    /// The platform handle the module is published under
    pub fn handle(&self) -> &str {
        match self {
            AuthorField::Handle(h) => h,
            AuthorField::Profile { github, .. } => github,
        }
    }
}

/// Source type discriminant, as written in `source.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Gist,
    Github,
    External,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Gist, SourceKind::Github, SourceKind::External];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Gist => "gist",
            SourceKind::Github => "github",
            SourceKind::External => "external",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

/// Pinned location of a module's source bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Gist(GistSource),
    Github(GithubSource),
    External(ExternalSource),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GistSource {
    /// 32-hex gist id
    pub id: String,
    /// 40-hex gist revision
    #[serde(rename = "hash", alias = "commitHash")]
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubSource {
    /// `owner/repo`
    pub repo: String,
    /// 40-hex commit SHA
    #[serde(rename = "hash", alias = "commitHash")]
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryPointer>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPointer {
    pub url: String,
    pub commit: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSource {
    pub url: String,
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Gist(_) => SourceKind::Gist,
            SourceDescriptor::Github(_) => SourceKind::Github,
            SourceDescriptor::External(_) => SourceKind::External,
        }
    }

    /// URL serving the exact source bytes
    pub fn url(&self) -> &str {
        match self {
            SourceDescriptor::Gist(s) => &s.url,
            SourceDescriptor::Github(s) => &s.url,
            SourceDescriptor::External(s) => &s.url,
        }
    }

    /// Declared SHA-256 of the source bytes, if any
    pub fn content_hash(&self) -> Option<&str> {
        match self {
            SourceDescriptor::Gist(s) => s.content_hash.as_deref(),
            SourceDescriptor::Github(s) => s.content_hash.as_deref(),
            SourceDescriptor::External(_) => None,
        }
    }

    /// Commit-level hash, if the source type has one
    pub fn commit_hash(&self) -> Option<&str> {
        match self {
            SourceDescriptor::Gist(s) => Some(&s.commit_hash),
            SourceDescriptor::Github(s) => Some(&s.commit_hash),
            SourceDescriptor::External(_) => None,
        }
    }
}

/// Module-level metadata (`metadata.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    pub name: String,
    pub author: String,
    pub about: String,
    pub owners: Vec<String>,
    #[serde(default)]
    pub maintainers: Vec<String>,
    pub created: String,
    #[serde(default)]
    pub created_by: Option<Identity>,
}

/// One published version (`{version}.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: String,
    #[serde(default)]
    pub needs: Vec<Runtime>,
    pub license: String,
    pub mlld_version: String,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub dependencies: BTreeMap<Runtime, RuntimeDependencies>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    pub published_at: String,
    #[serde(default)]
    pub published_by: Option<Identity>,
}

/// Version assumed for legacy records that never declared one
pub const DEFAULT_LEGACY_VERSION: &str = "1.0.0";
/// License assumed when a record declares none
pub const DEFAULT_LICENSE: &str = "CC0";

/// Merged view over either schema generation, read after validation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub name: String,
    pub author: AuthorField,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub needs: Vec<Runtime>,
    #[serde(default)]
    pub license: Option<String>,
    pub mlld_version: String,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub dependencies: BTreeMap<Runtime, RuntimeDependencies>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub bugs: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub published_at: String,
    #[serde(default)]
    pub published_by: Option<Identity>,
    #[serde(default)]
    pub owners: Option<Vec<String>>,
    #[serde(default)]
    pub maintainers: Vec<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub created_by: Option<Identity>,
}

impl ModuleRecord {
    /// Split into module metadata and the version record, filling the
    /// defaults older records leave out
    pub fn into_parts(self) -> (ModuleMetadata, VersionRecord) {
        let author = self.author.handle().to_string();
        let owners = self
            .owners
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| vec![author.clone()]);

        let metadata = ModuleMetadata {
            name: self.name,
            author,
            about: self.about.or(self.description).unwrap_or_default(),
            owners,
            maintainers: self.maintainers,
            created: self.created.unwrap_or_else(|| self.published_at.clone()),
            created_by: self.created_by.or_else(|| self.published_by.clone()),
        };

        let record = VersionRecord {
            version: self
                .version
                .unwrap_or_else(|| DEFAULT_LEGACY_VERSION.to_string()),
            needs: self.needs,
            license: self.license.unwrap_or_else(|| DEFAULT_LICENSE.to_string()),
            mlld_version: self.mlld_version,
            source: self.source,
            dependencies: self.dependencies,
            keywords: self.keywords,
            repo: self.repo,
            bugs: self.bugs,
            homepage: self.homepage,
            published_at: self.published_at,
            published_by: self.published_by,
        };

        (metadata, record)
    }
}

/// One module in the published index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    pub author: String,
    pub about: String,
    pub version: String,
    pub needs: Vec<Runtime>,
    pub license: String,
    pub mlld_version: String,
    pub source: SourceDescriptor,
    pub dependencies: BTreeMap<Runtime, RuntimeDependencies>,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bugs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    pub published_at: String,
    pub published_by: Option<Identity>,
    pub available_versions: Vec<ModuleVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagMap>,
    pub owners: Vec<String>,
    pub maintainers: Vec<String>,
    #[serde(default, skip_serializing_if = "LayoutFormat::is_versioned")]
    pub format: LayoutFormat,
}

impl RegistryEntry {
    /// Merge metadata, the selected version and the discovered versions
    pub fn assemble(
        metadata: ModuleMetadata,
        record: VersionRecord,
        available_versions: Vec<ModuleVersion>,
        tags: Option<TagMap>,
        format: LayoutFormat,
    ) -> Self {
        Self {
            name: metadata.name,
            author: metadata.author,
            about: metadata.about,
            version: record.version,
            needs: record.needs,
            license: record.license,
            mlld_version: record.mlld_version,
            source: record.source,
            dependencies: record.dependencies,
            keywords: record.keywords,
            repo: record.repo,
            bugs: record.bugs,
            homepage: record.homepage,
            published_at: record.published_at,
            published_by: record.published_by,
            available_versions,
            tags,
            owners: metadata.owners,
            maintainers: metadata.maintainers,
            format,
        }
    }
}

/// The aggregated registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryIndex {
    pub version: String,
    pub updated: DateTime<Utc>,
    pub modules: BTreeMap<String, RegistryEntry>,
}

impl RegistryIndex {
    pub fn new(modules: BTreeMap<String, RegistryEntry>) -> Self {
        Self {
            version: INDEX_FORMAT_VERSION.to_string(),
            updated: Utc::now(),
            modules,
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
        self.modules.get(key)
    }
}

/// Lightweight per-module record used for search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub description: String,
    pub tags: Vec<String>,
    pub author: String,
    pub capabilities: Vec<Runtime>,
}

/// Search index derived from a [`RegistryIndex`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndex {
    pub version: String,
    pub generated: DateTime<Utc>,
    pub modules: BTreeMap<String, SearchEntry>,
}

impl From<&RegistryIndex> for SearchIndex {
    fn from(index: &RegistryIndex) -> Self {
        let modules = index
            .modules
            .iter()
            .map(|(key, entry)| {
                (
                    key.clone(),
                    SearchEntry {
                        description: entry.about.clone(),
                        tags: entry.keywords.clone(),
                        author: entry.author.clone(),
                        capabilities: entry.needs.clone(),
                    },
                )
            })
            .collect();

        Self {
            version: index.version.clone(),
            generated: index.updated,
            modules,
        }
    }
}
