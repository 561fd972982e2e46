use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Validation failure payload produced by a [`Processor`](crate::processor::Processor).
///
/// Carries a human-readable message plus a per-field detail mapping
/// (field name to list of error messages). This is the payload rendered
/// into 4xx/5xx validation responses by the error builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessValidationError {
    pub message: String,
    pub details: Map<String, Value>,
}

impl ProcessValidationError {
    pub fn new(message: impl Into<String>, details: Map<String, Value>) -> Self {
        ProcessValidationError {
            message: message.into(),
            details,
        }
    }
}

impl std::fmt::Display for ProcessValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Failure kinds raised across the decoration pipeline.
#[derive(Debug, Error)]
pub enum HapicError {
    /// A schema rejected a deserialized request bucket. Recovered locally by
    /// the input wrapper; surfaces as an HTTP response at the wrapper's
    /// configured error code.
    #[error("validation error of input data: {}", .0.message)]
    InputValidation(ProcessValidationError),
    /// A controller return value (or an error builder's own payload) failed
    /// its round trip through the output schema.
    #[error("validation error of output data: {}", .0.message)]
    OutputValidation(ProcessValidationError),
    /// The same non-error role was decorated twice before `with_api_doc`.
    #[error("'{role}' already decorated on this controller")]
    AlreadyDecorated { role: &'static str },
    /// The documentation generator could not match a registered controller
    /// to a framework route. Fatal at documentation time only.
    #[error("no route found for controller '{controller}'")]
    RouteNotFound { controller: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("documentation error: {0}")]
    Documentation(String),
    /// The peer went away while a stream response was being fed.
    #[error("stream closed by peer")]
    StreamClosed,
    /// A controller error no exception wrapper matched. Propagates to the
    /// host framework, which shows its own error page.
    #[error("unhandled controller error: {0}")]
    Unhandled(anyhow::Error),
}

/// Marker trait for application error types the exception wrappers can catch.
///
/// Implementors get class-based matching via `handle_exception::<E>(..)`.
/// Override [`error_detail`](HapicException::error_detail) to attach a
/// structured mapping to the error payload's `details.error_detail` slot.
pub trait HapicException: std::error::Error + Send + Sync + 'static {
    fn error_detail(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// What a matched exception guard extracts from a controller error.
#[derive(Debug, Clone)]
pub struct CaughtException {
    /// Full type path of the matched error type.
    pub class_name: &'static str,
    pub message: String,
    pub error_detail: Map<String, Value>,
    /// Debug rendering of the whole error chain, included in payloads only
    /// when the context runs in debug mode.
    pub traceback: Option<String>,
}

impl CaughtException {
    /// Last segment of the type path, used as the message fallback.
    pub fn short_class_name(&self) -> &'static str {
        self.class_name.rsplit("::").next().unwrap_or(self.class_name)
    }
}

/// Class matcher applied to a controller error.
///
/// Returns the extracted [`CaughtException`] when the error chain's root is
/// the registered type, `None` otherwise.
pub type ExceptionMatcher = Arc<dyn Fn(&anyhow::Error) -> Option<CaughtException> + Send + Sync>;

/// Build the matcher for one error type.
pub fn exception_matcher<E: HapicException>() -> ExceptionMatcher {
    Arc::new(|err: &anyhow::Error| {
        err.downcast_ref::<E>().map(|e| CaughtException {
            class_name: std::any::type_name::<E>(),
            message: e.to_string(),
            error_detail: e.error_detail(),
            traceback: Some(format!("{err:?}")),
        })
    })
}
