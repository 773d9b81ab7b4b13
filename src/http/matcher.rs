//! Request path selection.

use crate::config::PathsConfig;

/// One path pattern.
///
/// `/api/chat` matches `/api/chat` and anything below it (`/api/chat/stream`)
/// but not `/api/chatter`. A trailing `*` matches any path starting with the
/// text before it (`/api/chat*` also matches `/api/chatter`). A leading `/`
/// is implied, so `favicon.ico` and `/favicon.ico` are the same pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Prefix(String),
    Subtree(String),
}

impl Pattern {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let normalized = if raw.starts_with('/') {
            raw.to_string()
        } else {
            format!("/{}", raw)
        };

        match normalized.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Subtree(normalized.trim_end_matches('/').to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Pattern::Subtree(root) => {
                path == root
                    || path
                        .strip_prefix(root.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// Decides which requests go through the limiter.
///
/// A path is matched when it matches some include pattern, or the include
/// list is empty, and it matches no exclude pattern.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathMatcher {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: include.into_iter().map(|p| Pattern::parse(p.as_ref())).collect(),
            exclude: exclude.into_iter().map(|p| Pattern::parse(p.as_ref())).collect(),
        }
    }

    pub fn from_config(config: &PathsConfig) -> Self {
        Self::new(&config.include, &config.exclude)
    }

    pub fn matches(&self, path: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(path));
        included && !self.exclude.iter().any(|p| p.matches(path))
    }
}

/// Canonical form of a request path.
///
/// Each segment is percent-decoded and re-encoded, so `/api/ch%61t` and
/// `/api/chat` have the same form. Empty and `.` segments are dropped and
/// `..` removes the previous segment without climbing above the root; `\`
/// separates segments like `/`. Returns `None` when a segment is not UTF-8
/// once decoded or hides an encoded separator (`%2F`, `%5C`).
pub fn canonical_path(path: &str) -> Option<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut trailing_slash = false;

    for raw in path.split(['/', '\\']) {
        let segment = urlencoding::decode(raw).ok()?;
        if segment.contains(['/', '\\']) {
            return None;
        }

        trailing_slash = matches!(segment.as_ref(), "" | "." | "..");
        match segment.as_ref() {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(urlencoding::encode(segment).into_owned()),
        }
    }

    let mut canonical = format!("/{}", segments.join("/"));
    if trailing_slash && !segments.is_empty() {
        canonical.push('/');
    }
    Some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_PATTERNS: [&str; 0] = [];

    #[test]
    fn test_chat_only() {
        let matcher = PathMatcher::new(["/api/chat"], NO_PATTERNS);

        assert!(matcher.matches("/api/chat"));
        assert!(matcher.matches("/api/chat/stream"));
        assert!(!matcher.matches("/api/chatter"));
        assert!(!matcher.matches("/home"));
        assert!(!matcher.matches("/"));
    }

    #[test]
    fn test_everything_but_static_assets() {
        let matcher = PathMatcher::new(
            NO_PATTERNS,
            ["_next/static", "_next/image", "favicon.ico"],
        );

        assert!(matcher.matches("/"));
        assert!(matcher.matches("/home"));
        assert!(matcher.matches("/api/chat"));
        assert!(!matcher.matches("/_next/static/chunks/app.js"));
        assert!(!matcher.matches("/_next/image"));
        assert!(!matcher.matches("/favicon.ico"));
    }

    #[test]
    fn test_wildcard_prefix() {
        let matcher = PathMatcher::new(["/api/*"], ["/api/health"]);

        assert!(matcher.matches("/api/chat"));
        assert!(matcher.matches("/api/search"));
        assert!(!matcher.matches("/api/health"));
        assert!(!matcher.matches("/api"));
    }

    #[test]
    fn test_root_pattern_matches_all() {
        let matcher = PathMatcher::new(["/"], NO_PATTERNS);
        assert!(matcher.matches("/"));
        assert!(matcher.matches("/anything/below"));
    }

    #[test]
    fn test_from_default_config() {
        let matcher = PathMatcher::from_config(&PathsConfig::default());
        assert!(matcher.matches("/api/chat"));
        assert!(!matcher.matches("/home"));
    }

    #[test]
    fn test_canonical_path_resolves_dot_segments() {
        assert_eq!(canonical_path("/x/../api/chat").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("/x/%2e%2e/api/chat").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("/x/%2E./api/chat").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("/./api/./chat").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("/../../api/chat").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("/x\\..\\api/chat").as_deref(), Some("/api/chat"));
    }

    #[test]
    fn test_canonical_path_decodes_unreserved() {
        assert_eq!(canonical_path("/api/ch%61t").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("//api//chat").as_deref(), Some("/api/chat"));
        assert_eq!(canonical_path("/api/chat/").as_deref(), Some("/api/chat/"));
        assert_eq!(canonical_path("/api/chat/..").as_deref(), Some("/api/"));
        assert_eq!(canonical_path("/").as_deref(), Some("/"));
        assert_eq!(canonical_path("").as_deref(), Some("/"));
        assert_eq!(canonical_path("/files/a%20b").as_deref(), Some("/files/a%20b"));
    }

    #[test]
    fn test_canonical_path_rejects_hidden_separators() {
        assert_eq!(canonical_path("/api%2Fchat"), None);
        assert_eq!(canonical_path("/api%5cchat"), None);
        assert_eq!(canonical_path("/api/%ff"), None);
    }

    #[test]
    fn test_canonical_spellings_all_match() {
        let matcher = PathMatcher::new(["/api/chat"], NO_PATTERNS);
        for raw in ["/x/../api/chat", "/x/%2e%2e/api/chat", "/api/ch%61t", "//api/chat"] {
            let path = canonical_path(raw).unwrap();
            assert!(matcher.matches(&path), "{} -> {}", raw, path);
        }
    }
}
