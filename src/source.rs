//! Source Resolution
//!
//! Turns whatever reference an author hands us (a friendly gist link, a
//! GitHub `blob` link, an already pinned raw URL) into a commit-pinned
//! [`SourceDescriptor`]. Gist and repository links are resolved through the
//! [`GithubApi`] seam; pinned raw URLs and other `http(s)` URLs pass through.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checksum::Checksum;
use crate::error::{RegistryError, Result};
use crate::schema::{
    ExternalSource, GistSource, GithubSource, RepositoryPointer, SourceDescriptor,
};

/// Extension of module source files
pub const SOURCE_EXTENSION: &str = ".mld";

const GIST_RAW_HOST: &str = "https://gist.githubusercontent.com";
const GITHUB_RAW_HOST: &str = "https://raw.githubusercontent.com";
const GITHUB_HOST: &str = "https://github.com";

/// `https://gist.githubusercontent.com/{user}/{gistId}/raw/{commit}/{file}.mld`
pub fn gist_raw_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^https://gist\.githubusercontent\.com/([^/]+)/([a-f0-9]{32})/raw/([a-f0-9]{40})/(.+\.mld)$",
        )
        .expect("gist raw url pattern is valid")
    })
}

/// `https://raw.githubusercontent.com/{owner}/{repo}/{sha}/{path}.mld`
pub fn github_raw_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^https://raw\.githubusercontent\.com/([^/]+)/([^/]+)/([a-f0-9]{40})/(.+\.mld)$",
        )
        .expect("github raw url pattern is valid")
    })
}

fn gist_page_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^https://gist\.github\.com/([^/]+)/([a-f0-9]{32})(?:/([a-f0-9]{40}))?(?:#file-(.+))?$",
        )
        .expect("gist page pattern is valid")
    })
}

fn repo_blob_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/blob/([^/]+)/(.+\.mld)$")
            .expect("repo blob pattern is valid")
    })
}

/// A classified, not yet resolved, source reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    /// Raw gist URL already pinned to a revision
    Raw(PinnedGist),
    /// Friendly gist page link
    Gist {
        username: String,
        gist_id: String,
        commit_hash: Option<String>,
        file: Option<String>,
    },
    /// File inside a GitHub repository at a branch, tag or SHA
    Repo {
        owner: String,
        repo: String,
        reference: String,
        path: String,
    },
    /// Any other http(s) URL
    External(String),
}

impl SourceReference {
    /// Classify a reference string
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if let Some(caps) = gist_raw_url_pattern().captures(input) {
            return Ok(SourceReference::Raw(PinnedGist {
                username: caps[1].to_string(),
                gist_id: caps[2].to_string(),
                commit_hash: caps[3].to_string(),
                filename: caps[4].to_string(),
            }));
        }

        if let Some(caps) = gist_page_pattern().captures(input) {
            return Ok(SourceReference::Gist {
                username: caps[1].to_string(),
                gist_id: caps[2].to_string(),
                commit_hash: caps.get(3).map(|m| m.as_str().to_string()),
                file: caps.get(4).map(|m| m.as_str().to_string()),
            });
        }

        if let Some(caps) = repo_blob_pattern().captures(input) {
            return Ok(SourceReference::Repo {
                owner: caps[1].to_string(),
                repo: caps[2].to_string(),
                reference: caps[3].to_string(),
                path: caps[4].to_string(),
            });
        }

        if input.starts_with("https://") || input.starts_with("http://") {
            return Ok(SourceReference::External(input.to_string()));
        }

        Err(RegistryError::UnsupportedReference(input.to_string()))
    }

    /// Short name of the reference class
    pub fn kind(&self) -> &'static str {
        match self {
            SourceReference::Raw(_) => "raw",
            SourceReference::Gist { .. } => "gist",
            SourceReference::Repo { .. } => "repo",
            SourceReference::External(_) => "external",
        }
    }
}

/// A gist file pinned to one revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedGist {
    pub username: String,
    pub gist_id: String,
    pub commit_hash: String,
    pub filename: String,
}

impl PinnedGist {
    pub fn raw_url(&self) -> String {
        format!(
            "{}/{}/{}/raw/{}/{}",
            GIST_RAW_HOST, self.username, self.gist_id, self.commit_hash, self.filename
        )
    }
}

/// A repository file pinned to one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedRepoFile {
    pub owner: String,
    pub repo: String,
    /// The ref the author named; informational only
    pub reference: String,
    pub commit_hash: String,
    pub path: String,
}

impl PinnedRepoFile {
    pub fn raw_url(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            GITHUB_RAW_HOST, self.owner, self.repo, self.commit_hash, self.path
        )
    }

    pub fn repository_url(&self) -> String {
        format!("{}/{}/{}", GITHUB_HOST, self.owner, self.repo)
    }
}

/// Outcome of resolution: content that can no longer drift
/// (external URLs excepted)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Gist(PinnedGist),
    Repo(PinnedRepoFile),
    External(String),
}

impl ResolvedSource {
    /// URL serving the exact bytes
    pub fn url(&self) -> String {
        match self {
            ResolvedSource::Gist(gist) => gist.raw_url(),
            ResolvedSource::Repo(file) => file.raw_url(),
            ResolvedSource::External(url) => url.clone(),
        }
    }

    /// Build the registry descriptor, optionally recording a content hash
    pub fn to_descriptor(&self, content_hash: Option<&Checksum>) -> SourceDescriptor {
        let content_hash = content_hash.map(|c| c.to_string());
        match self {
            ResolvedSource::Gist(gist) => SourceDescriptor::Gist(GistSource {
                id: gist.gist_id.clone(),
                commit_hash: gist.commit_hash.clone(),
                content_hash,
                url: gist.raw_url(),
            }),
            ResolvedSource::Repo(file) => SourceDescriptor::Github(GithubSource {
                repo: format!("{}/{}", file.owner, file.repo),
                commit_hash: file.commit_hash.clone(),
                content_hash,
                repository: Some(RepositoryPointer {
                    url: file.repository_url(),
                    commit: file.commit_hash.clone(),
                    path: file.path.clone(),
                }),
                url: file.raw_url(),
            }),
            ResolvedSource::External(url) => {
                SourceDescriptor::External(ExternalSource { url: url.clone() })
            }
        }
    }
}

impl fmt::Display for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Gist metadata as returned by `GET /gists/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GistInfo {
    #[serde(default)]
    pub history: Vec<GistRevision>,
    #[serde(default)]
    pub files: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GistRevision {
    /// Revision SHA
    pub version: String,
}

/// Remote metadata lookups needed to pin a reference
#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Gist metadata, newest revision first in `history`
    async fn gist(&self, gist_id: &str) -> Result<GistInfo>;

    /// Commit SHA a branch, tag or SHA currently points at
    async fn commit_sha(&self, owner: &str, repo: &str, reference: &str) -> Result<String>;

    /// Whether `path` exists in the repository at `commit`
    async fn file_exists(&self, owner: &str, repo: &str, path: &str, commit: &str) -> Result<bool>;
}

/// Resolves references into pinned sources
pub struct SourceResolver<A> {
    api: A,
}

impl<A: GithubApi> SourceResolver<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Parse and resolve a reference string
    pub async fn resolve(&self, input: &str, cancel: &CancellationToken) -> Result<ResolvedSource> {
        let reference = SourceReference::parse(input)?;
        debug!("Resolving {} reference {}", reference.kind(), input);
        self.resolve_reference(reference, cancel).await
    }

    pub async fn resolve_reference(
        &self,
        reference: SourceReference,
        cancel: &CancellationToken,
    ) -> Result<ResolvedSource> {
        match reference {
            SourceReference::Raw(pinned) => Ok(ResolvedSource::Gist(pinned)),
            SourceReference::External(url) => Ok(ResolvedSource::External(url)),
            SourceReference::Gist {
                username,
                gist_id,
                commit_hash,
                file,
            } => {
                let info = cancellable(cancel, self.api.gist(&gist_id)).await?;
                let latest = info
                    .history
                    .first()
                    .ok_or_else(|| RegistryError::NoCommits(gist_id.clone()))?
                    .version
                    .clone();

                if let Some(embedded) = commit_hash.filter(|c| *c != latest) {
                    warn!(
                        "Gist {} link names revision {}; pinning newest revision {}",
                        gist_id, embedded, latest
                    );
                }

                let filename = select_gist_file(&gist_id, &info, file.as_deref())?;
                Ok(ResolvedSource::Gist(PinnedGist {
                    username,
                    gist_id,
                    commit_hash: latest,
                    filename,
                }))
            }
            SourceReference::Repo {
                owner,
                repo,
                reference,
                path,
            } => {
                let sha = cancellable(cancel, self.api.commit_sha(&owner, &repo, &reference)).await?;
                let exists =
                    cancellable(cancel, self.api.file_exists(&owner, &repo, &path, &sha)).await?;
                if !exists {
                    return Err(RegistryError::FileNotFound {
                        file: path,
                        available: Vec::new(),
                    });
                }
                Ok(ResolvedSource::Repo(PinnedRepoFile {
                    owner,
                    repo,
                    reference,
                    commit_hash: sha,
                    path,
                }))
            }
        }
    }
}

/// Pick the module file out of a gist
///
/// A named file must exist, matched exactly or by GitHub's `#file-` anchor
/// slug. Without a name exactly one source file must be present.
pub fn select_gist_file(gist_id: &str, info: &GistInfo, requested: Option<&str>) -> Result<String> {
    let available: Vec<String> = info.files.keys().cloned().collect();

    if let Some(requested) = requested {
        return available
            .iter()
            .find(|name| name.as_str() == requested || anchor_slug(name) == requested)
            .cloned()
            .ok_or_else(|| RegistryError::FileNotFound {
                file: requested.to_string(),
                available: available.clone(),
            });
    }

    let mut candidates: Vec<String> = available
        .iter()
        .filter(|name| name.ends_with(SOURCE_EXTENSION))
        .cloned()
        .collect();

    match candidates.len() {
        0 => Err(RegistryError::NoSourceFile {
            gist_id: gist_id.to_string(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(RegistryError::AmbiguousSourceFile { candidates }),
    }
}

/// `Utils.MLD` → `utils-mld`, the form GitHub uses in `#file-` anchors
fn anchor_slug(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// Await `fut` unless the run is cancelled first
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RegistryError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const GIST_ID: &str = "0123456789abcdef0123456789abcdef";
    const OLD_REV: &str = "1111111111111111111111111111111111111111";
    const NEW_REV: &str = "2222222222222222222222222222222222222222";
    const SHA: &str = "3333333333333333333333333333333333333333";

    #[derive(Default)]
    struct FakeApi {
        gists: HashMap<String, GistInfo>,
        refs: HashMap<String, String>,
        files: Vec<(String, String)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GithubApi for FakeApi {
        async fn gist(&self, gist_id: &str) -> Result<GistInfo> {
            self.calls.lock().unwrap().push(format!("gist:{}", gist_id));
            self.gists.get(gist_id).cloned().ok_or(RegistryError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })
        }

        async fn commit_sha(&self, owner: &str, repo: &str, reference: &str) -> Result<String> {
            self.calls.lock().unwrap().push(format!("ref:{}/{}@{}", owner, repo, reference));
            self.refs.get(reference).cloned().ok_or(RegistryError::Api {
                status: 422,
                message: "No commit found".to_string(),
            })
        }

        async fn file_exists(&self, _owner: &str, _repo: &str, path: &str, commit: &str) -> Result<bool> {
            self.calls.lock().unwrap().push(format!("contents:{}@{}", path, commit));
            Ok(self.files.iter().any(|(p, c)| p == path && c == commit))
        }
    }

    fn gist_with_files(files: &[&str]) -> GistInfo {
        GistInfo {
            history: vec![
                GistRevision { version: NEW_REV.to_string() },
                GistRevision { version: OLD_REV.to_string() },
            ],
            files: files
                .iter()
                .map(|f| (f.to_string(), serde_json::json!({ "filename": f })))
                .collect(),
        }
    }

    fn api_with_gist(files: &[&str]) -> FakeApi {
        let mut api = FakeApi::default();
        api.gists.insert(GIST_ID.to_string(), gist_with_files(files));
        api
    }

    #[test]
    fn test_classification() {
        let raw = format!(
            "https://gist.githubusercontent.com/alice/{}/raw/{}/utils.mld",
            GIST_ID, NEW_REV
        );
        assert_eq!(SourceReference::parse(&raw).unwrap().kind(), "raw");
        assert_eq!(
            SourceReference::parse(&format!("https://gist.github.com/alice/{}", GIST_ID))
                .unwrap()
                .kind(),
            "gist"
        );
        assert_eq!(
            SourceReference::parse("https://github.com/alice/mods/blob/main/lib/utils.mld")
                .unwrap()
                .kind(),
            "repo"
        );
        assert_eq!(
            SourceReference::parse("https://example.com/utils.mld").unwrap().kind(),
            "external"
        );
        assert!(matches!(
            SourceReference::parse("ftp://example.com/utils.mld"),
            Err(RegistryError::UnsupportedReference(_))
        ));
    }

    #[test]
    fn test_gist_page_with_commit_and_fragment() {
        let reference = SourceReference::parse(&format!(
            "https://gist.github.com/alice/{}/{}#file-utils-mld",
            GIST_ID, OLD_REV
        ))
        .unwrap();
        assert_eq!(
            reference,
            SourceReference::Gist {
                username: "alice".to_string(),
                gist_id: GIST_ID.to_string(),
                commit_hash: Some(OLD_REV.to_string()),
                file: Some("utils-mld".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_raw_url_roundtrip() {
        let raw = format!(
            "https://gist.githubusercontent.com/alice/{}/raw/{}/utils.mld",
            GIST_ID, NEW_REV
        );
        let resolver = SourceResolver::new(FakeApi::default());
        let resolved = resolver.resolve(&raw, &CancellationToken::new()).await.unwrap();

        assert_eq!(resolved.url(), raw);
        assert!(resolver.api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gist_resolves_to_newest_revision() {
        let resolver = SourceResolver::new(api_with_gist(&["utils.mld", "README.md"]));
        let resolved = resolver
            .resolve(
                &format!("https://gist.github.com/alice/{}/{}", GIST_ID, OLD_REV),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            resolved.url(),
            format!(
                "https://gist.githubusercontent.com/alice/{}/raw/{}/utils.mld",
                GIST_ID, NEW_REV
            )
        );
        match resolved.to_descriptor(None) {
            SourceDescriptor::Gist(gist) => {
                assert_eq!(gist.id, GIST_ID);
                assert_eq!(gist.commit_hash, NEW_REV);
            }
            other => panic!("Expected gist descriptor, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gist_file_selection_errors() {
        let page = format!("https://gist.github.com/alice/{}", GIST_ID);
        let cancel = CancellationToken::new();

        let none = SourceResolver::new(api_with_gist(&["README.md"]));
        assert!(matches!(
            none.resolve(&page, &cancel).await,
            Err(RegistryError::NoSourceFile { .. })
        ));

        let many = SourceResolver::new(api_with_gist(&["a.mld", "b.mld"]));
        match many.resolve(&page, &cancel).await {
            Err(RegistryError::AmbiguousSourceFile { candidates }) => {
                assert_eq!(candidates, vec!["a.mld", "b.mld"]);
            }
            other => panic!("Expected ambiguity error, got {:?}", other),
        }

        let named = SourceResolver::new(api_with_gist(&["a.mld", "b.mld"]));
        match named.resolve(&format!("{}#file-c.mld", page), &cancel).await {
            Err(RegistryError::FileNotFound { file, available }) => {
                assert_eq!(file, "c.mld");
                assert_eq!(available, vec!["a.mld", "b.mld"]);
            }
            other => panic!("Expected missing file error, got {:?}", other),
        }

        let slug = named.resolve(&format!("{}#file-b-mld", page), &cancel).await.unwrap();
        assert!(slug.url().ends_with("/b.mld"));
    }

    #[tokio::test]
    async fn test_repo_pins_commit_not_ref() {
        let mut api = FakeApi::default();
        api.refs.insert("main".to_string(), SHA.to_string());
        api.files.push(("lib/utils.mld".to_string(), SHA.to_string()));
        let resolver = SourceResolver::new(api);

        let resolved = resolver
            .resolve(
                "https://github.com/alice/mods/blob/main/lib/utils.mld",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            resolved.url(),
            format!("https://raw.githubusercontent.com/alice/mods/{}/lib/utils.mld", SHA)
        );
        let descriptor = resolved.to_descriptor(Some(&Checksum::sha256(b"content")));
        match descriptor {
            SourceDescriptor::Github(github) => {
                assert_eq!(github.repo, "alice/mods");
                assert_eq!(github.repository.unwrap().commit, SHA);
                assert_eq!(github.content_hash.unwrap().len(), 64);
            }
            other => panic!("Expected github descriptor, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repo_missing_file() {
        let mut api = FakeApi::default();
        api.refs.insert("main".to_string(), SHA.to_string());
        let resolver = SourceResolver::new(api);

        let result = resolver
            .resolve(
                "https://github.com/alice/mods/blob/main/lib/utils.mld",
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(RegistryError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_resolution() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let resolver = SourceResolver::new(api_with_gist(&["utils.mld"]));
        let result = resolver
            .resolve(&format!("https://gist.github.com/alice/{}", GIST_ID), &cancel)
            .await;
        assert!(matches!(result, Err(RegistryError::Cancelled)));
    }
}
