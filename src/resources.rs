//! Build-time resource table, core set and the manifest file that carries them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mapping of logical path to content hash, fixed at deployment.
///
/// Serializes as a flat JSON object, which is also the format of the entry
/// kept in the manifest partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTable(BTreeMap<String, String>);

impl ResourceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the content hash recorded for a path.
    #[must_use]
    pub fn hash(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    /// Returns true when the path is a versioned, cacheable resource.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// Iterates over all logical paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes the table to its stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a table from its stored JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object of strings.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Ordered list of paths the application shell needs to boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreSet(Vec<String>);

impl CoreSet {
    /// Builds a core set, checking every path is a member of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] naming the first path the table lacks.
    pub fn new<I, S>(paths: I, table: &ResourceTable) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        if let Some(missing) = paths.iter().find(|p| !table.contains(p)) {
            return Err(Error::Manifest(format!(
                "core path {missing} is not in the resource table"
            )));
        }
        Ok(Self(paths))
    }

    /// Iterates over core paths in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of core paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when there are no core paths.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The build tool's output: resource table plus core set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub resources: ResourceTable,
    #[serde(default)]
    pub core: CoreSet,
}

impl ResourceManifest {
    /// Builds a manifest, validating the core set against the table.
    ///
    /// # Errors
    ///
    /// Returns an error if a core path is missing from the table.
    pub fn new<I, S>(resources: ResourceTable, core: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let core = CoreSet::new(core, &resources)?;
        Ok(Self { resources, core })
    }

    /// Parses and validates a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the core set names a path
    /// absent from the resource table.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: Self = serde_json::from_slice(bytes)?;
        Self::new(raw.resources, raw.core.0)
    }

    /// Loads a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResourceTable {
        [("a.js", "h1"), ("b.js", "h2"), ("/", "h0")]
            .into_iter()
            .collect()
    }

    #[test]
    fn table_lookup() {
        let t = table();
        assert_eq!(t.hash("a.js"), Some("h1"));
        assert!(t.contains("/"));
        assert!(!t.contains("c.js"));
        assert_eq!(t.paths().collect::<Vec<_>>(), vec!["/", "a.js", "b.js"]);
    }

    #[test]
    fn table_json_is_flat_object() {
        let json = String::from_utf8(table().to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"/":"h0","a.js":"h1","b.js":"h2"}"#);
        assert_eq!(ResourceTable::from_json(json.as_bytes()).unwrap(), table());
    }

    #[test]
    fn table_rejects_non_object() {
        assert!(ResourceTable::from_json(b"[1,2]").is_err());
        assert!(ResourceTable::from_json(b"not json").is_err());
    }

    #[test]
    fn core_set_must_be_subset() {
        let t = table();
        let core = CoreSet::new(["a.js", "/"], &t).unwrap();
        assert_eq!(core.iter().collect::<Vec<_>>(), vec!["a.js", "/"]);

        let err = CoreSet::new(["missing.js"], &t).unwrap_err();
        assert!(err.to_string().contains("missing.js"));
    }

    #[test]
    fn manifest_from_json() {
        let json = br#"{
            "resources": {"main.js": "abc", "index.html": "def"},
            "core": ["main.js"]
        }"#;
        let m = ResourceManifest::from_json(json).unwrap();
        assert_eq!(m.resources.len(), 2);
        assert_eq!(m.core.len(), 1);
    }

    #[test]
    fn manifest_core_defaults_to_empty() {
        let m = ResourceManifest::from_json(br#"{"resources": {"a": "1"}}"#).unwrap();
        assert!(m.core.is_empty());
    }

    #[test]
    fn manifest_validates_core() {
        let json = br#"{"resources": {"a": "1"}, "core": ["b"]}"#;
        assert!(matches!(
            ResourceManifest::from_json(json),
            Err(Error::Manifest(_))
        ));
    }

    #[test]
    fn manifest_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, r#"{"resources": {"a": "1"}, "core": ["a"]}"#).unwrap();
        let m = ResourceManifest::load(&path).unwrap();
        assert_eq!(m.resources.hash("a"), Some("1"));
    }
}
