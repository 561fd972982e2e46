//! # hapic
//!
//! **hapic** is a framework-agnostic HTTP input/output decoration layer:
//! controllers declare their inputs (path, query, body, headers, forms,
//! files) and outputs (body, headers, file, stream) against named schemas,
//! and the same declarations drive request-time validation and OpenAPI 2.0
//! documentation.
//!
//! ## Architecture
//!
//! The library is organized around two orthogonal seams:
//!
//! - **[`processor`]** - the schema-library adapter: validate/load input
//!   buckets, round-trip outputs, produce OpenAPI definition references.
//!   The default is [`JsonSchemaProcessor`], driven by JSON Schema.
//! - **[`context`]** - the host-framework adapter: extract request
//!   parameters, build native responses, enumerate routes, hold global
//!   exception handlers. The shipped adapter is [`TinyHttpContext`] over
//!   `tiny_http`.
//!
//! Around them sit:
//!
//! - **[`facade`]** - the [`Hapic`] decoration API and controller registry
//! - **[`wrappers`]** - the composed request pipeline behind each route
//! - **[`description`]** - the per-controller description records and the
//!   decoration buffer
//! - **[`doc`]** - the OpenAPI 2.0 document generator and the bundled
//!   documentation views
//! - **[`error_builder`]** - canonical `{message, details, code}` error
//!   payloads
//!
//! ## Request flow
//!
//! The context extracts the six parameter buckets, input descriptions load
//! and validate them into a [`HapicData`] bundle in declaration order, the
//! controller runs with the bundle injected, and the output description
//! serializes the return value into a native response. Controller errors
//! are matched per-controller first, then against the context's global
//! handlers; unmatched errors fall through to the host framework.
//!
//! ## Quick start
//!
//! ```no_run
//! use hapic::{
//!     ControllerOutput, ExecutionMode, Hapic, InputOptions, SchemaDef, TinyHttpContext,
//! };
//! use http::Method;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let hapic: Arc<Hapic<TinyHttpContext>> = Arc::new(Hapic::new(ExecutionMode::Thread));
//!
//! let name_schema = SchemaDef::new(
//!     "HelloPathSchema",
//!     json!({
//!         "type": "object",
//!         "properties": { "name": { "type": "string", "minLength": 3 } },
//!         "required": ["name"]
//!     }),
//! );
//!
//! hapic.input_path(name_schema, InputOptions::default()).unwrap();
//! let hello = hapic
//!     .with_api_doc(
//!         "hello",
//!         &["greetings"],
//!         Some("Say hello."),
//!         Arc::new(|data| {
//!             let name = data.path["name"].as_str().unwrap_or("world").to_string();
//!             Ok(ControllerOutput::json(json!({ "sentence": format!("Hello, {name}") })))
//!         }),
//!     )
//!     .unwrap();
//!
//! let ctx = Arc::new(TinyHttpContext::new());
//! hapic.set_context(Arc::clone(&ctx));
//! hapic.register("/hello/:name", Method::GET, &hello).unwrap();
//! hapic.add_documentation_view("/doc", "Demo API", "A demo").unwrap();
//! ctx.run("0.0.0.0:8080").unwrap();
//! ```
//!
//! ## Runtime considerations
//!
//! Cooperative mode runs every controller in a `may` coroutine; stack size
//! is configurable via the `HAPIC_STACK_SIZE` environment variable. The
//! execution mode is fixed when the facade is constructed, so synchronous
//! and cooperative variants are never mixed on one controller.

pub mod context;
pub mod description;
pub mod doc;
pub mod error;
pub mod error_builder;
pub mod facade;
pub mod file;
pub mod params;
pub mod processor;
pub mod runtime_config;
pub mod wrappers;

pub use context::{
    Context, GlobalExceptionHandler, RouteRepresentation, TinyBody, TinyHttpContext, TinyRequest,
    TinyResponse,
};
pub use description::{DecoratedController, Role};
pub use error::{HapicError, HapicException, ProcessValidationError};
pub use error_builder::{DefaultErrorBuilder, ErrorBuilder};
pub use facade::{Hapic, InputOptions, OutputOptions};
pub use file::HapicFile;
pub use params::{HapicData, HeaderParameters, MultiMap, RequestParameters, UploadedFile};
pub use processor::{JsonSchemaProcessor, Processor, ProcessorOptions, SchemaDef, SchemaUsage};
pub use runtime_config::RuntimeConfig;
pub use wrappers::{Controller, ControllerOutput, DecoratedView, ExecutionMode};
