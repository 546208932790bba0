//! Origin handling and logical-path derivation.
//!
//! Partitions are keyed by absolute URL, while the resource table is keyed by
//! logical path relative to the origin. `Origin` converts between the two.

use crate::error::{Error, Result};

/// Logical path of the root document.
pub const ROOT: &str = "/";

/// Query marker used by the build tool as a cache-busting version tag.
const VERSION_QUERY: &str = "?v=";

/// The scheme/host/port prefix every cached URL shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin(String);

impl Origin {
    /// Parses an origin such as `https://example.com` or `http://localhost:8080`.
    /// A trailing slash is accepted and removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value is not an http(s) origin.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .ok_or_else(|| Error::Config(format!("origin must be http(s): {value}")))?;
        if rest.is_empty() || rest.contains('/') || rest.contains('?') || rest.contains('#') {
            return Err(Error::Config(format!("origin must not carry a path: {value}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the origin as a string, without a trailing slash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves a logical path against this origin.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }

    /// Strips `origin + "/"` from a URL, returning the raw remainder.
    ///
    /// URLs from another origin (or the bare origin itself) yield an empty
    /// string, matching what a plain prefix cut produces.
    fn strip<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or("")
    }

    /// Logical path of a stored cache key. The empty remainder maps to `/`.
    #[must_use]
    pub fn key_path(&self, url: &str) -> String {
        match self.strip(url) {
            "" => ROOT.to_string(),
            rest => rest.to_string(),
        }
    }

    /// Logical path of an intercepted request.
    ///
    /// Drops everything from the first `?v=`, and maps the origin itself,
    /// `origin/#...` and the empty path to `/`.
    #[must_use]
    pub fn request_path(&self, url: &str) -> String {
        if url == self.0 || url.starts_with(&format!("{}/#", self.0)) {
            return ROOT.to_string();
        }
        if !url.starts_with(&format!("{}/", self.0)) {
            // Foreign origin: never a member of the table.
            return url.to_string();
        }
        let rest = self.strip(url);
        let rest = rest.split_once(VERSION_QUERY).map_or(rest, |(path, _)| path);
        if rest.is_empty() {
            ROOT.to_string()
        } else {
            rest.to_string()
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn origin() -> Origin {
        Origin::parse("https://game.example.com").unwrap()
    }

    #[test]
    fn parse_strips_trailing_slash() {
        assert_eq!(
            Origin::parse("https://game.example.com/").unwrap().as_str(),
            "https://game.example.com"
        );
        assert!(Origin::parse("http://localhost:8080").is_ok());
    }

    #[test]
    fn parse_rejects_paths_and_schemes() {
        assert!(Origin::parse("ftp://example.com").is_err());
        assert!(Origin::parse("https://example.com/app").is_err());
        assert!(Origin::parse("https://").is_err());
    }

    #[test]
    fn resolve_joins_paths() {
        let o = origin();
        assert_eq!(o.resolve("main.dart.js"), "https://game.example.com/main.dart.js");
        assert_eq!(o.resolve("/"), "https://game.example.com/");
        assert_eq!(o.resolve("assets/a.png"), "https://game.example.com/assets/a.png");
    }

    #[test]
    fn key_path_normalizes_root() {
        let o = origin();
        assert_eq!(o.key_path("https://game.example.com/"), "/");
        assert_eq!(o.key_path("https://game.example.com/main.dart.js"), "main.dart.js");
        assert_eq!(o.key_path("https://game.example.com/a.js?v=1"), "a.js?v=1");
    }

    #[test]
    fn request_path_root_variants() {
        let o = origin();
        assert_eq!(o.request_path("https://game.example.com"), "/");
        assert_eq!(o.request_path("https://game.example.com/"), "/");
        assert_eq!(o.request_path("https://game.example.com/#/menu"), "/");
        assert_eq!(o.request_path("https://game.example.com/?v=1234"), "/");
    }

    #[test]
    fn request_path_strips_version_tag() {
        let o = origin();
        assert_eq!(
            o.request_path("https://game.example.com/main.dart.js?v=99"),
            "main.dart.js"
        );
        assert_eq!(
            o.request_path("https://game.example.com/api/scores?page=2"),
            "api/scores?page=2"
        );
    }

    #[test]
    fn request_path_foreign_origin_is_untouched() {
        let o = origin();
        assert_eq!(
            o.request_path("https://cdn.example.net/lib.js"),
            "https://cdn.example.net/lib.js"
        );
    }

    proptest! {
        #[test]
        fn resolved_paths_round_trip(path in "[a-z][a-z0-9_/.-]{0,30}") {
            let o = origin();
            let url = o.resolve(&path);
            prop_assert_eq!(o.key_path(&url), path.clone());
            prop_assert_eq!(o.request_path(&url), path);
        }

        #[test]
        fn version_tag_never_changes_path(
            path in "[a-z][a-z0-9_.]{0,20}",
            tag in "[0-9a-f]{1,12}",
        ) {
            let o = origin();
            let url = format!("{}?v={tag}", o.resolve(&path));
            prop_assert_eq!(o.request_path(&url), path);
        }
    }
}
