use crate::error::{CaughtException, ProcessValidationError};
use crate::processor::SchemaDef;
use serde_json::{json, Map, Value};

/// Produces the canonical error payload from a caught controller error or a
/// validation failure.
///
/// The default payload shape is `{message, details, code}`: `message` is the
/// error's display form (falling back to its type name), `details` carries
/// `error_detail` for exceptions or the per-field mapping for validation
/// errors, and `code` is a null-by-default extension point. Debug contexts
/// add `details.traceback`.
pub trait ErrorBuilder: Send + Sync {
    fn build_from_exception(&self, exc: &CaughtException, include_traceback: bool) -> Value;

    fn build_from_validation_error(&self, error: &ProcessValidationError) -> Value;

    /// Schema of the payloads this builder produces, registered as an
    /// OpenAPI definition for documented error responses.
    fn schema(&self) -> SchemaDef;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultErrorBuilder;

impl ErrorBuilder for DefaultErrorBuilder {
    fn build_from_exception(&self, exc: &CaughtException, include_traceback: bool) -> Value {
        let message = if exc.message.is_empty() {
            exc.short_class_name().to_string()
        } else {
            exc.message.clone()
        };
        let mut details = Map::new();
        details.insert(
            "error_detail".to_string(),
            Value::Object(exc.error_detail.clone()),
        );
        if include_traceback {
            if let Some(traceback) = &exc.traceback {
                details.insert("traceback".to_string(), Value::String(traceback.clone()));
            }
        }
        json!({
            "message": message,
            "details": details,
            "code": Value::Null,
        })
    }

    fn build_from_validation_error(&self, error: &ProcessValidationError) -> Value {
        json!({
            "message": error.message,
            "details": error.details,
            "code": Value::Null,
        })
    }

    fn schema(&self) -> SchemaDef {
        SchemaDef::new(
            "DefaultErrorSchema",
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "details": {"type": "object"},
                    "code": {}
                },
                "required": ["message", "details"]
            }),
        )
    }
}
