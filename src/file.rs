use crate::error::ProcessValidationError;
use serde_json::Map;
use std::path::PathBuf;

/// Where the outbound bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    /// Read from the filesystem at response time. The path must reference an
    /// existing readable file when the response is built.
    Path(PathBuf),
    /// Already in memory. Requires a declared mimetype.
    Content(Vec<u8>),
}

/// Outbound file descriptor returned by file endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct HapicFile {
    source: FileSource,
    pub mimetype: Option<String>,
    pub filename: Option<String>,
    pub as_attachment: bool,
}

impl HapicFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        HapicFile {
            source: FileSource::Path(path.into()),
            mimetype: None,
            filename: None,
            as_attachment: false,
        }
    }

    pub fn from_content(content: Vec<u8>, mimetype: impl Into<String>) -> Self {
        HapicFile {
            source: FileSource::Content(content),
            mimetype: Some(mimetype.into()),
            filename: None,
            as_attachment: false,
        }
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn as_attachment(mut self) -> Self {
        self.as_attachment = true;
        self
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn into_source(self) -> FileSource {
        self.source
    }

    /// Derived `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        let disposition = if self.as_attachment {
            "attachment"
        } else {
            "inline"
        };
        match &self.filename {
            Some(name) => format!("{disposition}; filename=\"{name}\""),
            None => disposition.to_string(),
        }
    }

    /// Check the descriptor invariants at response time.
    pub fn check(&self) -> Result<(), ProcessValidationError> {
        match &self.source {
            FileSource::Content(_) => {
                if self.mimetype.is_none() {
                    return Err(ProcessValidationError::new(
                        "Validation error of output file",
                        detail("mimetype", "mimetype is required for in-memory content"),
                    ));
                }
            }
            FileSource::Path(path) => {
                if !path.is_file() {
                    return Err(ProcessValidationError::new(
                        "Validation error of output file",
                        detail("path", &format!("'{}' is not a readable file", path.display())),
                    ));
                }
                if std::fs::File::open(path).is_err() {
                    return Err(ProcessValidationError::new(
                        "Validation error of output file",
                        detail("path", &format!("'{}' cannot be opened", path.display())),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn detail(field: &str, message: &str) -> Map<String, serde_json::Value> {
    let mut m = Map::new();
    m.insert(
        field.to_string(),
        serde_json::Value::Array(vec![serde_json::Value::String(message.to_string())]),
    );
    m
}
