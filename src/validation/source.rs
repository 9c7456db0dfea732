//! Per-source-type validation
//!
//! `source.type` selects exactly one [`SourceKind`]; each kind has its own
//! rule set below.

use serde_json::{Map, Value};

use super::{display, present, Patterns};
use crate::schema::SourceKind;
use crate::source::{gist_raw_url_pattern, github_raw_url_pattern};

pub(super) fn validate_source(patterns: &Patterns, source: &Value, errors: &mut Vec<String>) {
    let Some(obj) = source.as_object() else {
        errors.push("Source must be an object".to_string());
        return;
    };

    let kind = match present(obj, "type") {
        None => {
            errors.push("Missing required source field: type".to_string());
            return;
        }
        Some(tag) => match tag.as_str().and_then(SourceKind::from_tag) {
            Some(kind) => kind,
            None => {
                errors.push(format!(
                    "Invalid source type: {}. Must be one of: gist, github, external",
                    display(tag)
                ));
                return;
            }
        },
    };

    match kind {
        SourceKind::Gist => validate_gist(patterns, obj, errors),
        SourceKind::Github => validate_github(patterns, obj, errors),
        SourceKind::External => validate_external(patterns, obj, errors),
    }
}

fn validate_gist(patterns: &Patterns, obj: &Map<String, Value>, errors: &mut Vec<String>) {
    let id = required_str(obj, "id", errors);
    let hash = commit_field(obj, errors);
    let url = required_str(obj, "url", errors);

    if let Some(id) = id {
        if !patterns.gist_id.is_match(id) {
            errors.push(format!("Invalid gist ID format: {}", id));
        }
    }
    if let Some(hash) = hash {
        check_commit_hash(patterns, hash, errors);
    }
    check_content_hash(patterns, obj, errors);

    let Some(url) = url else { return };
    let Some(caps) = gist_raw_url_pattern().captures(url) else {
        errors.push(format!("Invalid gist URL format: {}", url));
        return;
    };
    if let Some(id) = id {
        if &caps[2] != id {
            errors.push(format!("Gist ID mismatch in URL: {} !== {}", &caps[2], id));
        }
    }
    if let Some(hash) = hash {
        if &caps[3] != hash {
            errors.push(format!("Commit hash mismatch in URL: {} !== {}", &caps[3], hash));
        }
    }
}

fn validate_github(patterns: &Patterns, obj: &Map<String, Value>, errors: &mut Vec<String>) {
    let repo = required_str(obj, "repo", errors);
    let hash = commit_field(obj, errors);
    let url = required_str(obj, "url", errors);

    if let Some(repo) = repo {
        if !patterns.owner_repo.is_match(repo) {
            errors.push(format!("Invalid repo format: {}. Must be owner/repo", repo));
        }
    }
    if let Some(hash) = hash {
        check_commit_hash(patterns, hash, errors);
    }
    check_content_hash(patterns, obj, errors);

    let pointer_path = match present(obj, "repository") {
        None => None,
        Some(Value::Object(pointer)) => check_repository_pointer(patterns, pointer, hash, errors),
        Some(_) => {
            errors.push("source.repository must be an object".to_string());
            None
        }
    };

    let Some(url) = url else { return };
    let Some(caps) = github_raw_url_pattern().captures(url) else {
        errors.push(format!("Invalid GitHub raw URL format: {}", url));
        return;
    };
    let url_repo = format!("{}/{}", &caps[1], &caps[2]);
    if let Some(repo) = repo {
        if url_repo != repo {
            errors.push(format!("Repository mismatch in URL: {} !== {}", url_repo, repo));
        }
    }
    if let Some(hash) = hash {
        if &caps[3] != hash {
            errors.push(format!("Commit hash mismatch in URL: {} !== {}", &caps[3], hash));
        }
    }
    if let Some(path) = pointer_path {
        if &caps[4] != path {
            errors.push(format!("repository.path mismatch in URL: {} !== {}", &caps[4], path));
        }
    }
}

/// Returns the declared path so it can be compared with the URL
fn check_repository_pointer<'a>(
    patterns: &Patterns,
    pointer: &'a Map<String, Value>,
    hash: Option<&str>,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    if present(pointer, "url").is_none() {
        errors.push("Missing repository.url".to_string());
    }
    match present(pointer, "commit").map(|c| c.as_str()) {
        None => errors.push("Missing repository.commit".to_string()),
        Some(Some(commit)) if patterns.commit_hash.is_match(commit) => {
            if let Some(hash) = hash {
                if commit != hash {
                    errors.push(format!(
                        "repository.commit does not match source hash: {} !== {}",
                        commit, hash
                    ));
                }
            }
        }
        Some(commit) => errors.push(format!(
            "Invalid repository commit hash: {}",
            commit.unwrap_or("<non-string>")
        )),
    }
    match present(pointer, "path") {
        None => {
            errors.push("Missing repository.path".to_string());
            None
        }
        Some(path) => path.as_str(),
    }
}

fn validate_external(patterns: &Patterns, obj: &Map<String, Value>, errors: &mut Vec<String>) {
    if let Some(url) = required_str(obj, "url", errors) {
        if !patterns.http_url.is_match(url) {
            errors.push(format!("Invalid external URL format: {}", url));
        }
    }
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    match present(obj, field) {
        None => {
            errors.push(format!("Missing required source field: {}", field));
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            errors.push(format!("source.{} must be a string, got {}", field, other));
            None
        }
    }
}

/// Commit hash, written `hash` or `commitHash`
fn commit_field<'a>(obj: &'a Map<String, Value>, errors: &mut Vec<String>) -> Option<&'a str> {
    if present(obj, "hash").is_none() && present(obj, "commitHash").is_some() {
        return required_str(obj, "commitHash", errors);
    }
    required_str(obj, "hash", errors)
}

fn check_commit_hash(patterns: &Patterns, hash: &str, errors: &mut Vec<String>) {
    if !patterns.commit_hash.is_match(hash) {
        errors.push(format!("Invalid commit hash format: {}", hash));
    }
}

fn check_content_hash(patterns: &Patterns, obj: &Map<String, Value>, errors: &mut Vec<String>) {
    if let Some(hash) = present(obj, "contentHash") {
        let ok = hash
            .as_str()
            .map(|h| patterns.content_hash.is_match(h))
            .unwrap_or(false);
        if !ok {
            errors.push(format!("Invalid content hash format: {}", display(hash)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GIST_ID: &str = "0123456789abcdef0123456789abcdef";
    const COMMIT: &str = "89abcdef0123456789abcdef0123456789abcdef";
    const OTHER_COMMIT: &str = "ffffffffffffffffffffffffffffffffffffffff";

    fn check(source: Value) -> Vec<String> {
        let mut errors = Vec::new();
        validate_source(&Patterns::new(), &source, &mut errors);
        errors
    }

    #[test]
    fn test_gist_components_must_agree_with_url() {
        let errors = check(json!({
            "type": "gist",
            "id": GIST_ID,
            "hash": OTHER_COMMIT,
            "url": format!("https://gist.githubusercontent.com/alice/{}/raw/{}/utils.mld", GIST_ID, COMMIT)
        }));
        assert_eq!(
            errors,
            vec![format!("Commit hash mismatch in URL: {} !== {}", COMMIT, OTHER_COMMIT)]
        );
    }

    #[test]
    fn test_gist_field_formats() {
        let errors = check(json!({
            "type": "gist",
            "id": "ABC",
            "hash": "123",
            "contentHash": "xyz",
            "url": "https://gist.github.com/alice/abc"
        }));
        assert!(errors.contains(&"Invalid gist ID format: ABC".to_string()));
        assert!(errors.contains(&"Invalid commit hash format: 123".to_string()));
        assert!(errors.contains(&"Invalid content hash format: xyz".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("Invalid gist URL format")));
    }

    #[test]
    fn test_github_source_with_repository_pointer() {
        let url = format!(
            "https://raw.githubusercontent.com/alice/mods/{}/lib/utils.mld",
            COMMIT
        );
        let valid = check(json!({
            "type": "github",
            "repo": "alice/mods",
            "hash": COMMIT,
            "repository": { "url": "https://github.com/alice/mods", "commit": COMMIT, "path": "lib/utils.mld" },
            "url": url
        }));
        assert!(valid.is_empty(), "{:?}", valid);

        let invalid = check(json!({
            "type": "github",
            "repo": "bob/mods",
            "hash": COMMIT,
            "repository": { "commit": OTHER_COMMIT, "path": "other.mld" },
            "url": url
        }));
        assert!(invalid.contains(&"Missing repository.url".to_string()));
        assert!(invalid.iter().any(|e| e.starts_with("repository.commit does not match source hash")));
        assert!(invalid.iter().any(|e| e.starts_with("Repository mismatch in URL: alice/mods !== bob/mods")));
        assert!(invalid.iter().any(|e| e.starts_with("repository.path mismatch in URL")));
    }

    #[test]
    fn test_unknown_and_missing_type() {
        assert_eq!(
            check(json!({ "type": "ftp", "url": "ftp://x" })),
            vec!["Invalid source type: ftp. Must be one of: gist, github, external".to_string()]
        );
        assert_eq!(
            check(json!({ "url": "https://x" })),
            vec!["Missing required source field: type".to_string()]
        );
    }

    #[test]
    fn test_external_source() {
        assert!(check(json!({ "type": "external", "url": "https://example.com/a.mld" })).is_empty());
        assert_eq!(
            check(json!({ "type": "external", "url": "file:///etc/passwd" })),
            vec!["Invalid external URL format: file:///etc/passwd".to_string()]
        );
    }
}
