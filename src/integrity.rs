//! Content integrity
//!
//! Fetches the bytes behind a pinned source and checks them against what the
//! record claims: declared hashes, frontmatter identity, and a basic sanity
//! check that the file looks like mlld at all.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checksum::{Checksum, HashAlgorithm};
use crate::error::{RegistryError, Result};
use crate::report::Diagnostic;
use crate::schema::{ModuleKey, SourceDescriptor};
use crate::source::cancellable;

/// Marker every mlld directive starts with
pub const DIRECTIVE_MARKER: char = '@';

/// Fetches raw source bytes
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

fn frontmatter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^---\n([\s\S]*?)\n---").expect("frontmatter pattern is valid"))
}

fn frontmatter_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([^:]+):\s*(.+)$").expect("frontmatter line pattern is valid"))
}

/// Parse a leading `---` delimited block of `key: value` lines
pub fn parse_frontmatter(content: &str) -> Option<BTreeMap<String, String>> {
    let block = frontmatter_pattern().captures(content)?;
    let fields = block[1]
        .lines()
        .filter_map(|line| frontmatter_line_pattern().captures(line))
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
        .collect();
    Some(fields)
}

/// Verifies fetched content against a module record
#[derive(Clone)]
pub struct IntegrityChecker {
    fetcher: Arc<dyn ContentFetcher>,
}

impl IntegrityChecker {
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch and check one module's source
    ///
    /// Problems come back as diagnostics; only cancellation is an `Err`.
    pub async fn check(
        &self,
        key: &ModuleKey,
        source: &SourceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        debug!("Fetching content for {} from {}", key, source.url());

        let content = match cancellable(cancel, self.fetcher.fetch(source.url())).await {
            Ok(bytes) => bytes,
            Err(RegistryError::Cancelled) => return Err(RegistryError::Cancelled),
            Err(e) => {
                return Ok(vec![Diagnostic::network(format!(
                    "Failed to fetch content from {}: {}",
                    source.url(),
                    e
                ))])
            }
        };

        Ok(check_content(key, source, &content))
    }
}

/// Pure content checks over already fetched bytes
pub fn check_content(key: &ModuleKey, source: &SourceDescriptor, content: &[u8]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if let Some(expected) = source.content_hash() {
        if !Checksum::from(expected).verify(HashAlgorithm::Sha256, content) {
            diagnostics.push(Diagnostic::integrity(format!(
                "Content hash mismatch: expected {}, got {}",
                expected,
                Checksum::sha256(content)
            )));
        }
    } else if let SourceDescriptor::Gist(gist) = source {
        // Older gist records only carry the revision hash
        if !Checksum::from(gist.commit_hash.as_str()).verify(HashAlgorithm::Sha1, content) {
            diagnostics.push(Diagnostic::integrity(format!(
                "Legacy hash mismatch: expected {}, got {}",
                gist.commit_hash,
                Checksum::sha1(content)
            )));
        }
    }

    let text = String::from_utf8_lossy(content);
    match parse_frontmatter(&text) {
        None => diagnostics.push(Diagnostic::integrity("Content missing required frontmatter")),
        Some(fields) => {
            for (field, expected) in [("author", key.author()), ("name", key.name())] {
                let declared = fields.get(field).map(String::as_str);
                if declared != Some(expected) {
                    diagnostics.push(Diagnostic::integrity(format!(
                        "Frontmatter {} mismatch: {} !== {}",
                        field,
                        declared.unwrap_or("<missing>"),
                        expected
                    )));
                }
            }
        }
    }

    if !text.contains(DIRECTIVE_MARKER) {
        diagnostics.push(Diagnostic::integrity(
            "Content appears to be missing mlld directives (likely wrong content)",
        ));
    }

    diagnostics
}
