//! Host-framework adapter seam.
//!
//! A [`Context`] adapts one HTTP framework: it extracts the six request
//! parameter buckets, builds native responses (plain, file, stream and
//! validation-error), enumerates registered routes for the documentation
//! generator, and holds the framework-wide exception handlers. The shipped
//! adapter is [`TinyHttpContext`] over `tiny_http`.

mod tiny;

pub use tiny::{TinyBody, TinyHttpContext, TinyRequest, TinyResponse, TinyStream};

use crate::description::DecoratedController;
use crate::error::{
    exception_matcher, CaughtException, ExceptionMatcher, HapicError, HapicException,
    ProcessValidationError,
};
use crate::error_builder::ErrorBuilder;
use crate::file::HapicFile;
use crate::params::RequestParameters;
use crate::wrappers::ControllerOutput;
use http::Method;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// A framework route as the documentation generator sees it: the rule in
/// the framework's native syntax, the HTTP method, and the name the view
/// was registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRepresentation {
    pub rule: String,
    pub method: Method,
    pub name: String,
}

/// A framework-wide exception catch, applied to every view. Tested in
/// registration order; the first matching class wins. Per-controller
/// exception wrappers take precedence because they sit closer to the
/// controller.
#[derive(Clone)]
pub struct GlobalExceptionHandler {
    pub class_name: &'static str,
    pub http_code: u16,
    pub matcher: ExceptionMatcher,
}

impl GlobalExceptionHandler {
    pub fn new<E: HapicException>(http_code: u16) -> Self {
        GlobalExceptionHandler {
            class_name: std::any::type_name::<E>(),
            http_code,
            matcher: exception_matcher::<E>(),
        }
    }

    pub fn catches(&self, err: &anyhow::Error) -> Option<CaughtException> {
        (self.matcher)(err)
    }
}

/// Registered view callable: the wrapper pipeline behind one route.
pub type ViewFn<C> = Arc<
    dyn Fn(&mut <C as Context>::Request) -> Result<<C as Context>::Response, HapicError>
        + Send
        + Sync,
>;

/// Adapter over one host HTTP framework.
pub trait Context: Send + Sync + 'static {
    /// Framework-native (or adapter-owned) request representation.
    type Request;
    /// Framework-native response. `Send + 'static` so cooperative
    /// controllers can ship it across a coroutine channel.
    type Response: Send + 'static;
    /// Open streaming-response feeder handle. Dropping it ends the stream.
    type Stream: Send + 'static;

    /// Extract the six parameter buckets from the native request.
    fn get_request_parameters(
        &self,
        req: &mut Self::Request,
    ) -> Result<RequestParameters, HapicError>;

    /// Build a native response. 204 responses must carry no body and no
    /// Content-Type.
    fn get_response(&self, body: String, http_code: u16, mimetype: &str) -> Self::Response;

    /// Build a native response streaming a file, with Content-Type and
    /// Content-Disposition derived from the descriptor.
    fn get_file_response(
        &self,
        file: HapicFile,
        http_code: u16,
    ) -> Result<Self::Response, HapicError>;

    /// Begin a chunked response. Returns the feeder handle plus the
    /// response to hand back to the framework while feeding continues.
    fn get_stream_response_object(
        &self,
        http_code: u16,
        headers: &[(String, String)],
    ) -> Result<(Self::Stream, Self::Response), HapicError>;

    /// Append one serialized item, newline-delimited, to an open stream.
    /// Fails with [`HapicError::StreamClosed`] once the peer went away.
    fn feed_stream_response(
        &self,
        stream: &mut Self::Stream,
        serialized_item: &str,
    ) -> Result<(), HapicError>;

    /// Add or replace headers on an already-built response.
    fn set_response_headers(&self, resp: &mut Self::Response, headers: &[(String, String)]);

    /// Error builder used for validation-error responses when the
    /// application installs no override.
    fn default_error_builder(&self) -> Arc<dyn ErrorBuilder>;

    /// Render a validation error into a native response through the default
    /// error builder. A builder whose own payload fails its schema is a
    /// misconfiguration and surfaces as an output-validation error.
    fn get_validation_error_response(
        &self,
        error: &ProcessValidationError,
        http_code: u16,
    ) -> Result<Self::Response, HapicError> {
        let builder = self.default_error_builder();
        let payload = builder.build_from_validation_error(error);
        let payload = check_error_payload(builder.as_ref(), payload)?;
        Ok(self.get_response(payload.to_string(), http_code, "application/json"))
    }

    /// Match a decorated controller to its registered route, primarily by
    /// token equality. Token-only matches against HEAD routes are ignored
    /// (frameworks auto-create those from GET registrations).
    fn find_route(
        &self,
        controller: &DecoratedController,
    ) -> Result<RouteRepresentation, HapicError>;

    /// Translate the framework's URL rule syntax into OpenAPI `{name}`
    /// placeholders.
    fn get_swagger_path(&self, rule: &str) -> String;

    /// True when the controller's return value is already a framework
    /// response and must skip output wrapping.
    fn by_pass_output_wrapping(&self, value: &ControllerOutput<Self::Response>) -> bool {
        matches!(value, ControllerOutput::Native(_))
    }

    /// Whether tracebacks may be included in error payloads.
    fn is_debug(&self) -> bool {
        false
    }

    fn add_global_exception_handler(&self, handler: GlobalExceptionHandler);

    /// Register a framework-wide catch for one error class. Setup-time
    /// only; handlers match in registration order.
    fn handle_exception<E: HapicException>(&self, http_code: u16)
    where
        Self: Sized,
    {
        self.add_global_exception_handler(GlobalExceptionHandler::new::<E>(http_code));
    }

    /// Snapshot of the registered framework-wide handlers, in registration
    /// order.
    fn global_exception_handlers(&self) -> Vec<GlobalExceptionHandler>;

    /// Register a view under a rule. The token travels with the view so
    /// `find_route` can match it back to the controller.
    fn add_view(
        &self,
        rule: &str,
        method: Method,
        token: Option<String>,
        view: ViewFn<Self>,
    ) -> Result<(), HapicError>
    where
        Self: Sized;

    /// Serve a directory of static files under a URL prefix.
    fn serve_directory(&self, prefix: &str, dir: &Path) -> Result<(), HapicError>;
}

/// Round-trip an error payload through its builder's schema. A failure here
/// means the error builder itself is misconfigured.
pub fn check_error_payload(builder: &dyn ErrorBuilder, payload: Value) -> Result<Value, HapicError> {
    let schema = builder.schema();
    let validator = jsonschema::validator_for(&schema.schema).map_err(|e| {
        HapicError::Configuration(format!(
            "error builder schema '{}' does not compile: {e}",
            schema.name
        ))
    })?;
    let mut details = serde_json::Map::new();
    for err in validator.iter_errors(&payload) {
        let path = err.instance_path.to_string();
        let field = path.trim_start_matches('/').replace('/', ".");
        let field = if field.is_empty() {
            "_schema".to_string()
        } else {
            field
        };
        let entry = details
            .entry(field)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(messages) = entry {
            messages.push(Value::String(err.to_string()));
        }
    }
    if !details.is_empty() {
        return Err(HapicError::OutputValidation(ProcessValidationError::new(
            "Validation error of error response",
            details,
        )));
    }
    Ok(payload)
}
