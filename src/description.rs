use crate::error::{ExceptionMatcher, HapicError};
use crate::error_builder::ErrorBuilder;
use crate::processor::Processor;
use std::sync::Arc;

/// The role a description binds to on one controller. Every role except
/// `Error` may appear at most once per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    InputPath,
    InputQuery,
    InputBody,
    InputHeaders,
    InputForms,
    InputFiles,
    OutputBody,
    OutputHeaders,
    OutputFile,
    OutputStream,
    Error,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::InputPath => "input_path",
            Role::InputQuery => "input_query",
            Role::InputBody => "input_body",
            Role::InputHeaders => "input_headers",
            Role::InputForms => "input_forms",
            Role::InputFiles => "input_files",
            Role::OutputBody => "output_body",
            Role::OutputHeaders => "output_headers",
            Role::OutputFile => "output_file",
            Role::OutputStream => "output_stream",
            Role::Error => "error",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One input bucket binding: which bucket, through which processor, and the
/// HTTP code validation failures answer with.
#[derive(Clone)]
pub struct InputDescription {
    pub role: Role,
    pub processor: Arc<dyn Processor>,
    pub error_http_code: u16,
    /// Query only: parameter names forced to list semantics even when a
    /// single value arrived.
    pub as_list: Vec<String>,
}

#[derive(Clone)]
pub struct OutputBodyDescription {
    pub processor: Arc<dyn Processor>,
    pub default_http_code: u16,
    pub error_http_code: u16,
}

#[derive(Clone)]
pub struct OutputHeadersDescription {
    pub processor: Arc<dyn Processor>,
    pub error_http_code: u16,
}

#[derive(Clone)]
pub struct OutputFileDescription {
    /// Acceptable response MIME types, also documented as `produces`.
    pub output_types: Vec<String>,
    pub default_http_code: u16,
    pub error_http_code: u16,
}

#[derive(Clone)]
pub struct OutputStreamDescription {
    pub processor: Arc<dyn Processor>,
    pub default_http_code: u16,
    pub error_http_code: u16,
    /// When set, an item failing validation is dropped and iteration
    /// continues; otherwise the stream stops at the first failing item.
    pub ignore_on_error: bool,
}

/// One handled error class: matcher, response code, payload builder.
#[derive(Clone)]
pub struct ErrorDescription {
    pub class_name: &'static str,
    pub http_code: u16,
    pub error_builder: Arc<dyn ErrorBuilder>,
    pub description: String,
    pub matcher: ExceptionMatcher,
}

/// The single output kind a controller may declare.
#[derive(Clone)]
pub enum OutputDescription {
    Body(OutputBodyDescription),
    File(OutputFileDescription),
    Stream(OutputStreamDescription),
}

impl OutputDescription {
    pub fn role(&self) -> Role {
        match self {
            OutputDescription::Body(_) => Role::OutputBody,
            OutputDescription::File(_) => Role::OutputFile,
            OutputDescription::Stream(_) => Role::OutputStream,
        }
    }

    pub fn default_http_code(&self) -> u16 {
        match self {
            OutputDescription::Body(d) => d.default_http_code,
            OutputDescription::File(d) => d.default_http_code,
            OutputDescription::Stream(d) => d.default_http_code,
        }
    }
}

/// Everything attached to one controller: ordered inputs, at most one
/// output kind, optional response-header validation, any number of handled
/// errors, plus documentation metadata.
#[derive(Clone)]
pub struct ControllerDescription {
    pub inputs: Vec<InputDescription>,
    pub output: Option<OutputDescription>,
    pub output_headers: Option<OutputHeadersDescription>,
    pub errors: Vec<ErrorDescription>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

/// Per-decoration-site accumulator.
///
/// Decoration calls push descriptions here; `with_api_doc` drains the
/// buffer into a [`ControllerDescription`] and resets it for the next site.
/// Assigning the same non-error role twice before a drain fails fast.
#[derive(Default)]
pub struct DecorationBuffer {
    inputs: Vec<InputDescription>,
    output: Option<OutputDescription>,
    output_headers: Option<OutputHeadersDescription>,
    errors: Vec<ErrorDescription>,
}

impl DecorationBuffer {
    pub fn new() -> Self {
        DecorationBuffer::default()
    }

    pub fn add_input(&mut self, description: InputDescription) -> Result<(), HapicError> {
        if self.inputs.iter().any(|d| d.role == description.role) {
            return Err(HapicError::AlreadyDecorated {
                role: description.role.as_str(),
            });
        }
        self.inputs.push(description);
        Ok(())
    }

    pub fn add_output(&mut self, description: OutputDescription) -> Result<(), HapicError> {
        if let Some(existing) = &self.output {
            let role = if existing.role() == description.role() {
                description.role().as_str()
            } else {
                // body/file/stream are mutually exclusive output kinds
                existing.role().as_str()
            };
            return Err(HapicError::AlreadyDecorated { role });
        }
        self.output = Some(description);
        Ok(())
    }

    pub fn add_output_headers(
        &mut self,
        description: OutputHeadersDescription,
    ) -> Result<(), HapicError> {
        if self.output_headers.is_some() {
            return Err(HapicError::AlreadyDecorated {
                role: Role::OutputHeaders.as_str(),
            });
        }
        self.output_headers = Some(description);
        Ok(())
    }

    pub fn add_error(&mut self, description: ErrorDescription) {
        self.errors.push(description);
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
            && self.output.is_none()
            && self.output_headers.is_none()
            && self.errors.is_empty()
    }

    /// Drain into a controller description, leaving the buffer empty for
    /// the next decoration site.
    pub fn drain(&mut self, tags: Vec<String>, description: Option<String>) -> ControllerDescription {
        let drained = ControllerDescription {
            inputs: std::mem::take(&mut self.inputs),
            output: self.output.take(),
            output_headers: self.output_headers.take(),
            errors: std::mem::take(&mut self.errors),
            tags,
            description,
        };
        debug_assert!(self.is_empty());
        drained
    }
}

/// Authoritative identity of a decorated controller.
///
/// The token is stamped on the registered view at decoration time; route
/// matching uses token equality so identity survives however the host
/// framework re-wraps the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerReference {
    pub token: String,
}

/// Registry entry: one decorated controller, never removed.
#[derive(Clone)]
pub struct DecoratedController {
    pub name: String,
    pub reference: ControllerReference,
    pub description: Arc<ControllerDescription>,
}
