//! mlld Module Registry
//!
//! Aggregates per-author module descriptors into a single versioned registry
//! index, validating every record before it is published.
//!
//! ## Features
//!
//! - **Source Pinning**: Gist and repository links resolve to commit-pinned raw URLs
//! - **Versioned Modules**: Versions discovered from file names, `latest` tag aware
//! - **Schema Validation**: Every problem in a record is reported, not just the first
//! - **Content Integrity**: SHA-256 content hashes and frontmatter identity checks
//! - **Legacy Support**: Flat module files are read alongside the versioned layout
//!
//! ## Architecture
//!
//! ```text
//! modules/
//! ├── alice/
//! │   ├── utils/
//! │   │   ├── metadata.json
//! │   │   ├── 1.0.0.json
//! │   │   ├── 1.1.0.json
//! │   │   └── tags.json
//! │   └── prompts.json        (legacy)
//! └── bob/
//!
//!        │ loader → validation → integrity
//!        ▼
//! modules.json  modules.min.json  search.json  validation-report.json
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod http;
pub mod integrity;
pub mod loader;
pub mod migrate;
pub mod registry;
pub mod report;
pub mod schema;
pub mod source;
pub mod validation;
pub mod version;

pub use checksum::{Checksum, HashAlgorithm};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use http::GithubClient;
pub use integrity::{ContentFetcher, IntegrityChecker};
pub use registry::{fold, write_outputs, Aggregation, ModuleOutcome, OutputFiles, RegistryAggregator};
pub use report::{BuildMode, Diagnostic, DiagnosticKind, ValidationReport};
pub use schema::{
    LayoutFormat, ModuleKey, RegistryEntry, RegistryIndex, SchemaGeneration, SearchIndex,
    SourceDescriptor,
};
pub use source::{GithubApi, ResolvedSource, SourceReference, SourceResolver};
pub use validation::SchemaValidator;
pub use version::ModuleVersion;
