//! Schema-library adapter layer.
//!
//! A [`Processor`] wraps one named schema plus projection options and turns
//! it into the operations the wrapper pipeline and the document generator
//! need: validate/load input buckets, round-trip outputs, and produce
//! OpenAPI definition references. The default implementation is
//! [`JsonSchemaProcessor`], driven by JSON Schema documents; alternative
//! schema libraries plug in behind the trait.

mod json_schema;
mod plugin;

pub use json_schema::{JsonSchemaProcessor, ProcessorOptions};
pub use plugin::{NameResolver, SchemaPlugin};

use crate::error::ProcessValidationError;
use crate::error_builder::ErrorBuilder;
use crate::file::HapicFile;
use crate::params::UploadedFile;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A named schema document. The unit a processor is configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDef {
    pub name: String,
    pub schema: Value,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        SchemaDef {
            name: name.into(),
            schema,
        }
    }
}

/// Identity of an effective (possibly projected) schema.
///
/// Two usages of one schema class with different `only`/`exclude` options
/// resolve to distinct names and therefore distinct definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaUsage {
    pub name: String,
    pub schema: Value,
}

/// Schema-library-agnostic validate/load/dump plus OpenAPI reference
/// helpers. Instances are configured once and shared immutably across
/// requests.
pub trait Processor: Send + Sync {
    fn schema(&self) -> &SchemaDef;

    /// Whether this processor carries list semantics (`many`).
    fn many(&self) -> bool;

    /// Normalize raw input for validation. A nullish `raw` becomes an empty
    /// mapping so schema engines that reject null do not produce misleading
    /// errors.
    fn clean_data(&self, raw: Option<&Value>) -> Value;

    /// Parse and validate one input bucket.
    fn load(&self, raw: Option<&Value>) -> Result<Value, ProcessValidationError>;

    /// Like [`load`](Processor::load) for the files bucket: required fields
    /// must be present AND non-empty, a check generic schema loaders skip.
    fn load_files_input(
        &self,
        files: &HashMap<String, UploadedFile>,
    ) -> Result<HashMap<String, UploadedFile>, ProcessValidationError>;

    /// Serialize an output value, then re-validate the serialized form; a
    /// failed round trip is an output-validation failure.
    fn dump_output(&self, value: &Value) -> Result<Value, ProcessValidationError>;

    /// Validate that an outbound file descriptor satisfies its invariants.
    fn dump_output_file(&self, file: &HapicFile) -> Result<(), ProcessValidationError> {
        file.check()
    }

    /// Build the input-validation error for `raw` without an early return.
    fn get_input_validation_error(&self, raw: Option<&Value>) -> ProcessValidationError {
        match self.load(raw) {
            Err(e) => e,
            Ok(_) => ProcessValidationError::new(
                "Validation error of input data",
                serde_json::Map::new(),
            ),
        }
    }

    /// Build the output-validation error for `value` without an early return.
    fn get_output_validation_error(&self, value: &Value) -> ProcessValidationError {
        match self.dump_output(value) {
            Err(e) => e,
            Ok(_) => ProcessValidationError::new(
                "Validation error of output data",
                serde_json::Map::new(),
            ),
        }
    }

    /// The effective schema after `only`/`exclude` projection, under the
    /// name the documentation should register it as.
    fn schema_usage(&self) -> SchemaUsage;

    /// Register this processor's effective schema with the plugin and return
    /// the OpenAPI reference fragment, wrapped in an array schema when
    /// `many` is set.
    fn schema_ref(&self, plugin: &mut SchemaPlugin) -> Value {
        let usage = self.schema_usage();
        let name = plugin.register(&usage);
        let reference = serde_json::json!({ "$ref": format!("#/definitions/{name}") });
        if self.many() {
            serde_json::json!({ "type": "array", "items": reference })
        } else {
            reference
        }
    }

    /// Documentation plugin matching this processor's schema style.
    fn create_doc_plugin(&self, name_resolver: Option<NameResolver>) -> SchemaPlugin {
        SchemaPlugin::new(name_resolver)
    }

    /// Error builder whose payload schema matches this processor's style.
    fn default_error_builder(&self) -> Arc<dyn ErrorBuilder>;
}
