use crate::error::HapicError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Multi-valued string map for query and form parameters.
///
/// Keys may repeat; the order of values within one key is the order they
/// appeared on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiMap {
    entries: Vec<(String, String)>,
}

impl MultiMap {
    pub fn new() -> Self {
        MultiMap::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// First value for a key, matching single-value read semantics.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for a key, in arrival order.
    pub fn all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Distinct keys in first-appearance order.
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for (k, _) in &self.entries {
            if !seen.contains(&k.as_str()) {
                seen.push(k.as_str());
            }
        }
        seen
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Header parameter container.
///
/// Stores only lowercase keys and looks them up case-insensitively;
/// inserting a mixed-case key fails fast so adapters normalize at the edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderParameters {
    entries: BTreeMap<String, String>,
}

impl HeaderParameters {
    pub fn new() -> Self {
        HeaderParameters::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HapicError> {
        let name = name.into();
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(HapicError::Configuration(format!(
                "header parameter key '{name}' must be lowercase"
            )));
        }
        self.entries.insert(name, value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Opaque upload handle held in the files bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    /// Form field name the file arrived under.
    pub name: String,
    /// Client-supplied file name, if any.
    pub filename: Option<String>,
    /// Declared Content-Type of the part, if any.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        UploadedFile {
            name: name.into(),
            filename: None,
            content_type: None,
            data,
        }
    }

    /// A field that is present but carries no bytes. Required file fields
    /// reject these during `load_files_input`.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Immutable view of one inbound request, split into the six parameter
/// buckets. Created by the context for each request and consumed read-only
/// by the input wrappers.
#[derive(Debug, Clone, Default)]
pub struct RequestParameters {
    pub path: HashMap<String, String>,
    pub query: MultiMap,
    pub body: Option<Value>,
    pub forms: MultiMap,
    pub headers: HeaderParameters,
    pub files: HashMap<String, UploadedFile>,
}

/// Validated input bundle injected into the controller.
///
/// Input wrappers populate one slot each, in declaration order. Slots not
/// covered by a declaration stay `Null` (the files slot stays empty).
#[derive(Debug, Clone, Default)]
pub struct HapicData {
    pub path: Value,
    pub query: Value,
    pub body: Value,
    pub headers: Value,
    pub forms: Value,
    pub files: HashMap<String, UploadedFile>,
}
