use super::{Processor, SchemaDef, SchemaUsage};
use crate::error::{HapicError, ProcessValidationError};
use crate::error_builder::{DefaultErrorBuilder, ErrorBuilder};
use crate::params::UploadedFile;
use jsonschema::{ValidationErrorKind, Validator};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Projection options fixed at processor construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorOptions {
    /// Keep only these properties.
    pub only: Vec<String>,
    /// Drop these properties.
    pub exclude: Vec<String>,
    /// List semantics: load/dump arrays of items instead of one item.
    pub many: bool,
}

impl ProcessorOptions {
    pub fn only(fields: &[&str]) -> Self {
        ProcessorOptions {
            only: fields.iter().map(|s| s.to_string()).collect(),
            ..ProcessorOptions::default()
        }
    }

    pub fn exclude(fields: &[&str]) -> Self {
        ProcessorOptions {
            exclude: fields.iter().map(|s| s.to_string()).collect(),
            ..ProcessorOptions::default()
        }
    }

    pub fn many() -> Self {
        ProcessorOptions {
            many: true,
            ..ProcessorOptions::default()
        }
    }
}

/// Default [`Processor`]: one named JSON Schema document, compiled once at
/// configuration time and shared immutably across requests.
///
/// String-valued properties are coerced to the schema's declared
/// `integer`/`number`/`boolean`/`array` types before validation, because
/// path, query, header and form buckets arrive as text.
pub struct JsonSchemaProcessor {
    schema: SchemaDef,
    options: ProcessorOptions,
    effective: Value,
    validator: Validator,
}

impl JsonSchemaProcessor {
    pub fn new(schema: SchemaDef) -> Result<Self, HapicError> {
        Self::with_options(schema, ProcessorOptions::default())
    }

    pub fn with_options(schema: SchemaDef, options: ProcessorOptions) -> Result<Self, HapicError> {
        if schema.schema.is_null() {
            return Err(HapicError::Configuration(format!(
                "processor '{}' has no schema set",
                schema.name
            )));
        }
        let effective = project_schema(&schema.schema, &options)?;
        let validator = jsonschema::validator_for(&effective).map_err(|e| {
            HapicError::Configuration(format!("schema '{}' does not compile: {e}", schema.name))
        })?;
        Ok(JsonSchemaProcessor {
            schema,
            options,
            effective,
            validator,
        })
    }

    /// Convenience constructor returning the trait object the facade wants.
    pub fn shared(schema: SchemaDef) -> Result<Arc<dyn Processor>, HapicError> {
        Ok(Arc::new(Self::new(schema)?))
    }

    pub fn effective_schema(&self) -> &Value {
        &self.effective
    }

    fn projected_name(&self) -> String {
        let mut name = self.schema.name.clone();
        if !self.options.only.is_empty() {
            name.push_str("_only_");
            name.push_str(&self.options.only.join("_"));
        }
        if !self.options.exclude.is_empty() {
            name.push_str("_exclude_");
            name.push_str(&self.options.exclude.join("_"));
        }
        name
    }

    fn coerce_item(&self, value: &Value) -> Value {
        let props = self.effective.get("properties").and_then(|p| p.as_object());
        let obj = match (value.as_object(), props) {
            (Some(obj), Some(props)) => (obj, props),
            _ => return value.clone(),
        };
        let (obj, props) = obj;
        let mut out = Map::with_capacity(obj.len());
        for (k, v) in obj {
            let coerced = match (v, props.get(k)) {
                (Value::String(s), Some(prop)) => coerce_string(s, prop),
                // list-semantics buckets arrive as arrays of text; coerce
                // each element against the declared items schema
                (Value::Array(elements), Some(prop))
                    if prop.get("type").and_then(|t| t.as_str()) == Some("array") =>
                {
                    let items = prop.get("items").cloned().unwrap_or(Value::Null);
                    Value::Array(
                        elements
                            .iter()
                            .map(|element| match element {
                                Value::String(s) => coerce_string(s, &items),
                                other => other.clone(),
                            })
                            .collect(),
                    )
                }
                _ => v.clone(),
            };
            out.insert(k.clone(), coerced);
        }
        Value::Object(out)
    }

    fn collect_errors(&self, instance: &Value, key_prefix: Option<usize>) -> Map<String, Value> {
        let mut details = Map::new();
        for err in self.validator.iter_errors(instance) {
            let (field, message) = match &err.kind {
                ValidationErrorKind::Required { property } => (
                    property.as_str().unwrap_or("_schema").to_string(),
                    "Missing data for required field.".to_string(),
                ),
                _ => {
                    let path = err.instance_path.to_string();
                    let field = path.trim_start_matches('/').replace('/', ".");
                    let field = if field.is_empty() {
                        "_schema".to_string()
                    } else {
                        field
                    };
                    (field, err.to_string())
                }
            };
            let key = match key_prefix {
                Some(idx) => format!("{idx}.{field}"),
                None => field,
            };
            let entry = details
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(messages) = entry {
                messages.push(Value::String(message));
            }
        }
        details
    }

    fn validate(&self, cleaned: &Value, message: &str) -> Result<(), ProcessValidationError> {
        if self.options.many {
            let items = match cleaned.as_array() {
                Some(items) => items,
                None => {
                    let mut details = Map::new();
                    details.insert(
                        "_schema".to_string(),
                        json!(["Expected a list of items."]),
                    );
                    return Err(ProcessValidationError::new(message, details));
                }
            };
            let mut details = Map::new();
            for (idx, item) in items.iter().enumerate() {
                details.extend(self.collect_errors(item, Some(idx)));
            }
            if !details.is_empty() {
                return Err(ProcessValidationError::new(message, details));
            }
        } else {
            let details = self.collect_errors(cleaned, None);
            if !details.is_empty() {
                return Err(ProcessValidationError::new(message, details));
            }
        }
        Ok(())
    }

    fn project_value(&self, value: &Value) -> Value {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return value.clone(),
        };
        let mut out = obj.clone();
        if !self.options.only.is_empty() {
            out.retain(|k, _| self.options.only.iter().any(|f| f == k));
        }
        for field in &self.options.exclude {
            out.remove(field);
        }
        Value::Object(out)
    }
}

impl Processor for JsonSchemaProcessor {
    fn schema(&self) -> &SchemaDef {
        &self.schema
    }

    fn many(&self) -> bool {
        self.options.many
    }

    fn clean_data(&self, raw: Option<&Value>) -> Value {
        let raw = match raw {
            None | Some(Value::Null) => return Value::Object(Map::new()),
            Some(v) => v,
        };
        if self.options.many {
            if let Value::Array(items) = raw {
                return Value::Array(items.iter().map(|i| self.coerce_item(i)).collect());
            }
        }
        self.coerce_item(raw)
    }

    fn load(&self, raw: Option<&Value>) -> Result<Value, ProcessValidationError> {
        let cleaned = self.clean_data(raw);
        self.validate(&cleaned, "Validation error of input data")?;
        Ok(cleaned)
    }

    fn load_files_input(
        &self,
        files: &HashMap<String, UploadedFile>,
    ) -> Result<HashMap<String, UploadedFile>, ProcessValidationError> {
        let required: Vec<&str> = self
            .effective
            .get("required")
            .and_then(|r| r.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        let mut details = Map::new();
        for name in required {
            match files.get(name) {
                None => {
                    details.insert(
                        name.to_string(),
                        json!(["Missing data for required field."]),
                    );
                }
                Some(file) if file.is_empty() => {
                    details.insert(name.to_string(), json!(["Uploaded file is empty."]));
                }
                Some(_) => {}
            }
        }
        if !details.is_empty() {
            return Err(ProcessValidationError::new(
                "Validation error of input data",
                details,
            ));
        }
        Ok(files.clone())
    }

    fn dump_output(&self, value: &Value) -> Result<Value, ProcessValidationError> {
        let projected = if self.options.many {
            match value.as_array() {
                Some(items) => Value::Array(items.iter().map(|i| self.project_value(i)).collect()),
                None => value.clone(),
            }
        } else {
            self.project_value(value)
        };
        self.validate(&projected, "Validation error of output data")?;
        Ok(projected)
    }

    fn schema_usage(&self) -> SchemaUsage {
        SchemaUsage {
            name: self.projected_name(),
            schema: self.effective.clone(),
        }
    }

    fn default_error_builder(&self) -> Arc<dyn ErrorBuilder> {
        Arc::new(DefaultErrorBuilder::default())
    }
}

/// Apply `only`/`exclude` to an object schema, filtering `properties` and
/// `required` consistently.
fn project_schema(schema: &Value, options: &ProcessorOptions) -> Result<Value, HapicError> {
    if options.only.is_empty() && options.exclude.is_empty() {
        return Ok(schema.clone());
    }
    let mut effective = schema.clone();
    let obj = effective.as_object_mut().ok_or_else(|| {
        HapicError::Configuration("only/exclude projection requires an object schema".to_string())
    })?;
    let keep = |name: &str| {
        (options.only.is_empty() || options.only.iter().any(|f| f == name))
            && !options.exclude.iter().any(|f| f == name)
    };
    if let Some(Value::Object(properties)) = obj.get_mut("properties") {
        properties.retain(|k, _| keep(k));
    }
    if let Some(Value::Array(required)) = obj.get_mut("required") {
        required.retain(|v| v.as_str().map(keep).unwrap_or(true));
        if required.is_empty() {
            obj.remove("required");
        }
    }
    Ok(effective)
}

/// Convert a text value to the type its property schema declares, the way
/// path/query/header/form buckets need. Unparseable values are left as text
/// so validation reports them against the declared type.
fn coerce_string(value: &str, prop: &Value) -> Value {
    let ty = prop.get("type").and_then(|t| t.as_str());
    match ty {
        Some("integer") => value
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(value.to_string())),
        Some("number") => value
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(value.to_string())),
        Some("boolean") => value
            .parse::<bool>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(value.to_string())),
        Some("array") => {
            let items = prop.get("items").cloned().unwrap_or(Value::Null);
            let parts = value
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|p| coerce_string(p.trim(), &items))
                .collect();
            Value::Array(parts)
        }
        _ => Value::String(value.to_string()),
    }
}
