//! Controller wrapper pipeline.
//!
//! A [`DecoratedView`] is the composed callable built by `with_api_doc`: it
//! runs the input descriptions in declaration order against the request
//! parameters, invokes the controller under the facade's execution mode,
//! then applies the output or exception handling on the way back out.

use crate::context::{Context, ViewFn};
use crate::description::{
    ControllerDescription, InputDescription, OutputDescription, OutputStreamDescription, Role,
};
use crate::error::{HapicError, ProcessValidationError};
use crate::file::HapicFile;
use crate::params::{HapicData, RequestParameters};
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// How controller invocations are scheduled.
///
/// Fixed at facade construction; every controller decorated by one facade
/// runs under the same mode, so synchronous and cooperative variants can
/// never be mixed on one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Invoke inline on the serving thread; blocking I/O is acceptable.
    Thread,
    /// Ship the call into a `may` coroutine and await the reply channel.
    Coroutine,
}

/// Lazily-typed sequence of stream items produced by a controller.
pub type ItemStream = Box<dyn Iterator<Item = Value> + Send + 'static>;

/// What a controller hands back to the pipeline.
pub enum ControllerOutput<R> {
    /// A value for the output-body processor, plus any extra response
    /// headers the output-headers description validates.
    Payload {
        body: Value,
        headers: Vec<(String, String)>,
    },
    /// An already-built framework response, passed through untouched.
    Native(R),
    /// An outbound file descriptor for the output-file description.
    File(HapicFile),
    /// A lazy item sequence for the output-stream description.
    Stream(ItemStream),
}

impl<R> ControllerOutput<R> {
    pub fn json(body: Value) -> Self {
        ControllerOutput::Payload {
            body,
            headers: Vec::new(),
        }
    }

    pub fn json_with_headers(body: Value, headers: Vec<(String, String)>) -> Self {
        ControllerOutput::Payload { body, headers }
    }

    pub fn file(file: HapicFile) -> Self {
        ControllerOutput::File(file)
    }

    pub fn stream<I>(items: I) -> Self
    where
        I: Iterator<Item = Value> + Send + 'static,
    {
        ControllerOutput::Stream(Box::new(items))
    }
}

/// User controller: receives the validated input bundle, returns an output
/// or an error for the exception wrappers.
pub type Controller<C> = Arc<
    dyn Fn(HapicData) -> anyhow::Result<ControllerOutput<<C as Context>::Response>> + Send + Sync,
>;

/// Shared lazy handle to the facade's context. Views capture this handle at
/// decoration time, never the context itself, so decoration works before a
/// context is installed.
pub type ContextHandle<C> = Arc<RwLock<Option<Arc<C>>>>;

/// The composed view for one decorated controller.
pub struct DecoratedView<C: Context> {
    pub name: String,
    pub token: String,
    pub description: Arc<ControllerDescription>,
    controller: Controller<C>,
    context: ContextHandle<C>,
    mode: ExecutionMode,
    stack_size: usize,
}

impl<C: Context> DecoratedView<C> {
    pub fn new(
        name: String,
        token: String,
        description: Arc<ControllerDescription>,
        controller: Controller<C>,
        context: ContextHandle<C>,
        mode: ExecutionMode,
        stack_size: usize,
    ) -> Self {
        DecoratedView {
            name,
            token,
            description,
            controller,
            context,
            mode,
            stack_size,
        }
    }

    fn context(&self) -> Result<Arc<C>, HapicError> {
        self.context
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| {
                HapicError::Configuration(format!(
                    "controller '{}' invoked with no context installed",
                    self.name
                ))
            })
    }

    /// Run the full pipeline for one request.
    pub fn handle(&self, req: &mut C::Request) -> Result<C::Response, HapicError> {
        let ctx = self.context()?;
        let params = ctx.get_request_parameters(req)?;
        let mut data = HapicData::default();
        for input in &self.description.inputs {
            if let Err(error) = process_input(input, &params, &mut data) {
                debug!(
                    controller = %self.name,
                    role = input.role.as_str(),
                    message = %error.message,
                    "input validation failed"
                );
                return ctx.get_validation_error_response(&error, input.error_http_code);
            }
        }
        match self.invoke_controller(data) {
            Ok(output) => self.process_output(&ctx, output),
            Err(err) => self.process_error(&ctx, err),
        }
    }

    /// Adapt a view for route registration.
    pub fn as_view_fn(view: &Arc<Self>) -> ViewFn<C> {
        let view = Arc::clone(view);
        Arc::new(move |req: &mut C::Request| view.handle(req))
    }

    fn invoke_controller(
        &self,
        data: HapicData,
    ) -> anyhow::Result<ControllerOutput<C::Response>> {
        match self.mode {
            ExecutionMode::Thread => {
                let controller = &self.controller;
                catch_unwind(AssertUnwindSafe(|| controller(data)))
                    .unwrap_or_else(|panic| Err(anyhow::anyhow!("controller panicked: {panic:?}")))
            }
            ExecutionMode::Coroutine => {
                let (tx, rx) = may::sync::mpsc::channel();
                let controller = Arc::clone(&self.controller);
                // SAFETY: may::coroutine::Builder::spawn is unsafe per the
                // runtime's contract. The closure owns everything it touches
                // (controller Arc, input bundle, reply sender) and sends
                // exactly one reply, including on panic.
                let spawned = unsafe {
                    may::coroutine::Builder::new()
                        .stack_size(self.stack_size)
                        .spawn(move || {
                            let result =
                                catch_unwind(AssertUnwindSafe(|| controller(data)))
                                    .unwrap_or_else(|panic| {
                                        Err(anyhow::anyhow!("controller panicked: {panic:?}"))
                                    });
                            let _ = tx.send(result);
                        })
                };
                if let Err(e) = spawned {
                    return Err(anyhow::anyhow!("failed to spawn controller coroutine: {e}"));
                }
                rx.recv().unwrap_or_else(|_| {
                    Err(anyhow::anyhow!(
                        "controller coroutine terminated without a response"
                    ))
                })
            }
        }
    }

    fn process_output(
        &self,
        ctx: &Arc<C>,
        output: ControllerOutput<C::Response>,
    ) -> Result<C::Response, HapicError> {
        if ctx.by_pass_output_wrapping(&output) {
            if let ControllerOutput::Native(resp) = output {
                return Ok(resp);
            }
        }
        match (&self.description.output, output) {
            (_, ControllerOutput::Native(resp)) => Ok(resp),
            (Some(OutputDescription::Body(d)), ControllerOutput::Payload { body, headers }) => {
                let dumped = match d.processor.dump_output(&body) {
                    Ok(dumped) => dumped,
                    Err(error) => {
                        debug!(controller = %self.name, message = %error.message, "output validation failed");
                        return ctx.get_validation_error_response(&error, d.error_http_code);
                    }
                };
                if let Some(response) = self.check_output_headers(ctx, &headers)? {
                    return Ok(response);
                }
                let body_string = dumped.to_string();
                let mut resp = ctx.get_response(body_string, d.default_http_code, "application/json");
                if !headers.is_empty() {
                    ctx.set_response_headers(&mut resp, &headers);
                }
                Ok(resp)
            }
            (Some(OutputDescription::File(d)), ControllerOutput::File(file)) => {
                if let Err(error) = file.check() {
                    debug!(controller = %self.name, message = %error.message, "output file validation failed");
                    return ctx.get_validation_error_response(&error, d.error_http_code);
                }
                ctx.get_file_response(file, d.default_http_code)
            }
            (Some(OutputDescription::Stream(d)), ControllerOutput::Stream(items)) => {
                self.process_stream(ctx, d, items)
            }
            (None, ControllerOutput::Payload { body, headers }) => {
                if let Some(response) = self.check_output_headers(ctx, &headers)? {
                    return Ok(response);
                }
                let mut resp = ctx.get_response(body.to_string(), 200, "application/json");
                if !headers.is_empty() {
                    ctx.set_response_headers(&mut resp, &headers);
                }
                Ok(resp)
            }
            (declared, returned) => Err(HapicError::Configuration(format!(
                "controller '{}' returned {} but declares {}",
                self.name,
                output_kind(&returned),
                declared
                    .as_ref()
                    .map(|d| d.role().as_str())
                    .unwrap_or("no output"),
            ))),
        }
    }

    /// Validate controller-supplied response headers against the declared
    /// output-headers description, if any. Returns the error response to
    /// short-circuit with on failure.
    fn check_output_headers(
        &self,
        ctx: &Arc<C>,
        headers: &[(String, String)],
    ) -> Result<Option<C::Response>, HapicError> {
        let declared = match &self.description.output_headers {
            Some(declared) => declared,
            None => return Ok(None),
        };
        let mut object = Map::new();
        for (name, value) in headers {
            object.insert(
                name.to_ascii_lowercase(),
                Value::String(value.clone()),
            );
        }
        match declared.processor.dump_output(&Value::Object(object)) {
            Ok(_) => Ok(None),
            Err(error) => {
                debug!(controller = %self.name, message = %error.message, "output headers validation failed");
                ctx.get_validation_error_response(&error, declared.error_http_code)
                    .map(Some)
            }
        }
    }

    fn process_stream(
        &self,
        ctx: &Arc<C>,
        d: &OutputStreamDescription,
        items: ItemStream,
    ) -> Result<C::Response, HapicError> {
        let (stream, response) = ctx.get_stream_response_object(d.default_http_code, &[])?;
        let feeder_ctx = Arc::clone(ctx);
        let processor = Arc::clone(&d.processor);
        let ignore_on_error = d.ignore_on_error;
        let controller_name = self.name.clone();
        let worker = move || {
            let mut stream = stream;
            let mut items = items;
            loop {
                let item = match items.next() {
                    Some(item) => item,
                    None => break,
                };
                match processor.dump_output(&item) {
                    Ok(dumped) => {
                        let line = dumped.to_string();
                        if feeder_ctx.feed_stream_response(&mut stream, &line).is_err() {
                            debug!(controller = %controller_name, "stream closed by peer, stopping generator");
                            break;
                        }
                    }
                    Err(error) => {
                        if ignore_on_error {
                            debug!(
                                controller = %controller_name,
                                message = %error.message,
                                "dropping invalid stream item"
                            );
                            continue;
                        }
                        warn!(
                            controller = %controller_name,
                            message = %error.message,
                            "stopping stream on invalid item"
                        );
                        break;
                    }
                }
            }
            // dropping the feeder handle ends the chunked response
        };
        match self.mode {
            ExecutionMode::Thread => {
                std::thread::spawn(worker);
            }
            ExecutionMode::Coroutine => {
                // SAFETY: same contract as the controller spawn above; the
                // worker owns the feeder handle and the item iterator.
                let spawned = unsafe {
                    may::coroutine::Builder::new()
                        .stack_size(self.stack_size)
                        .spawn(worker)
                };
                if let Err(e) = spawned {
                    return Err(HapicError::Configuration(format!(
                        "failed to spawn stream feeder coroutine: {e}"
                    )));
                }
            }
        }
        Ok(response)
    }

    fn process_error(
        &self,
        ctx: &Arc<C>,
        err: anyhow::Error,
    ) -> Result<C::Response, HapicError> {
        for description in &self.description.errors {
            if let Some(caught) = (description.matcher)(&err) {
                info!(
                    controller = %self.name,
                    class = caught.short_class_name(),
                    http_code = description.http_code,
                    message = %caught.message,
                    "controller error handled"
                );
                debug!(traceback = ?caught.traceback, "handled error traceback");
                let payload = description
                    .error_builder
                    .build_from_exception(&caught, ctx.is_debug());
                let payload =
                    crate::context::check_error_payload(description.error_builder.as_ref(), payload)?;
                return Ok(ctx.get_response(
                    payload.to_string(),
                    description.http_code,
                    "application/json",
                ));
            }
        }
        for handler in ctx.global_exception_handlers() {
            if let Some(caught) = handler.catches(&err) {
                info!(
                    controller = %self.name,
                    class = caught.short_class_name(),
                    http_code = handler.http_code,
                    message = %caught.message,
                    "controller error handled by context"
                );
                debug!(traceback = ?caught.traceback, "handled error traceback");
                let builder = ctx.default_error_builder();
                let payload = builder.build_from_exception(&caught, ctx.is_debug());
                let payload = crate::context::check_error_payload(builder.as_ref(), payload)?;
                return Ok(ctx.get_response(
                    payload.to_string(),
                    handler.http_code,
                    "application/json",
                ));
            }
        }
        Err(HapicError::Unhandled(err))
    }
}

fn output_kind<R>(output: &ControllerOutput<R>) -> &'static str {
    match output {
        ControllerOutput::Payload { .. } => "a payload",
        ControllerOutput::Native(_) => "a native response",
        ControllerOutput::File(_) => "a file",
        ControllerOutput::Stream(_) => "a stream",
    }
}

/// Pull one bucket out of the request parameters, run it through the
/// description's processor and assign the result into the matching slot.
fn process_input(
    input: &InputDescription,
    params: &RequestParameters,
    data: &mut HapicData,
) -> Result<(), ProcessValidationError> {
    match input.role {
        Role::InputPath => {
            let raw = string_map_to_value(params.path.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            data.path = input.processor.load(Some(&raw))?;
        }
        Role::InputQuery => {
            let raw = multi_to_value(&params.query, &input.as_list);
            data.query = input.processor.load(Some(&raw))?;
        }
        Role::InputBody => {
            data.body = input.processor.load(params.body.as_ref())?;
        }
        Role::InputHeaders => {
            let raw = string_map_to_value(params.headers.iter());
            data.headers = input.processor.load(Some(&raw))?;
        }
        Role::InputForms => {
            let raw = multi_to_value(&params.forms, &[]);
            data.forms = input.processor.load(Some(&raw))?;
        }
        Role::InputFiles => {
            data.files = input.processor.load_files_input(&params.files)?;
        }
        _ => {}
    }
    Ok(())
}

fn string_map_to_value<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> Value {
    let mut object = Map::new();
    for (k, v) in entries {
        object.insert(k.to_string(), Value::String(v.to_string()));
    }
    Value::Object(object)
}

/// Single-value reads take the first value for a key; names forced to list
/// semantics receive every value in arrival order.
fn multi_to_value(multi: &crate::params::MultiMap, as_list: &[String]) -> Value {
    let mut object = Map::new();
    for key in multi.keys() {
        if as_list.iter().any(|name| name == key) {
            let values = multi
                .all(key)
                .into_iter()
                .map(|v| Value::String(v.to_string()))
                .collect();
            object.insert(key.to_string(), Value::Array(values));
        } else if let Some(value) = multi.first(key) {
            object.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(object)
}
