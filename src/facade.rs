//! Public decoration API.
//!
//! A [`Hapic`] facade accumulates input/output/error descriptions per
//! decoration site, composes them into a [`DecoratedView`] in
//! `with_api_doc`, and keeps the append-only registry the documentation
//! generator walks. The context is bound lazily: decoration works before
//! `set_context`, because views capture a shared handle rather than the
//! context itself.

use crate::context::{Context, ViewFn};
use crate::description::{
    ControllerDescription, ControllerReference, DecoratedController, DecorationBuffer,
    ErrorDescription, InputDescription, OutputBodyDescription, OutputDescription,
    OutputFileDescription, OutputHeadersDescription, OutputStreamDescription, Role,
};
use crate::error::{exception_matcher, HapicError, HapicException};
use crate::error_builder::{DefaultErrorBuilder, ErrorBuilder};
use crate::processor::{JsonSchemaProcessor, Processor, ProcessorOptions, SchemaDef};
use crate::runtime_config::RuntimeConfig;
use crate::wrappers::{Controller, ContextHandle, DecoratedView, ExecutionMode};
use http::Method;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Builds a processor from a schema and projection options. Swapping the
/// factory swaps the schema library for every later decoration.
pub type ProcessorFactory =
    Arc<dyn Fn(SchemaDef, ProcessorOptions) -> Result<Arc<dyn Processor>, HapicError> + Send + Sync>;

/// Options for one input decoration.
pub struct InputOptions {
    /// Explicit processor; built by the facade's factory when absent.
    pub processor: Option<Arc<dyn Processor>>,
    pub options: ProcessorOptions,
    pub error_http_code: u16,
    /// Query only: names forced to list semantics.
    pub as_list: Vec<String>,
}

impl Default for InputOptions {
    fn default() -> Self {
        InputOptions {
            processor: None,
            options: ProcessorOptions::default(),
            error_http_code: 400,
            as_list: Vec::new(),
        }
    }
}

/// Options for one output decoration.
pub struct OutputOptions {
    pub processor: Option<Arc<dyn Processor>>,
    pub options: ProcessorOptions,
    pub default_http_code: u16,
    pub error_http_code: u16,
}

impl Default for OutputOptions {
    fn default() -> Self {
        OutputOptions {
            processor: None,
            options: ProcessorOptions::default(),
            default_http_code: 200,
            error_http_code: 500,
        }
    }
}

/// The application-facing facade.
pub struct Hapic<C: Context> {
    context: ContextHandle<C>,
    mode: ExecutionMode,
    processor_factory: RwLock<ProcessorFactory>,
    buffer: Mutex<DecorationBuffer>,
    controllers: Arc<RwLock<Vec<DecoratedController>>>,
    config: RuntimeConfig,
}

impl<C: Context> Hapic<C> {
    pub fn new(mode: ExecutionMode) -> Self {
        Self::with_config(mode, RuntimeConfig::from_env())
    }

    pub fn with_config(mode: ExecutionMode, config: RuntimeConfig) -> Self {
        Hapic {
            context: Arc::new(RwLock::new(None)),
            mode,
            processor_factory: RwLock::new(Arc::new(|schema, options| {
                Ok(Arc::new(JsonSchemaProcessor::with_options(schema, options)?)
                    as Arc<dyn Processor>)
            })),
            buffer: Mutex::new(DecorationBuffer::new()),
            controllers: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn set_context(&self, context: Arc<C>) {
        if let Ok(mut slot) = self.context.write() {
            *slot = Some(context);
        }
    }

    pub fn reset_context(&self) {
        if let Ok(mut slot) = self.context.write() {
            *slot = None;
        }
    }

    pub fn context(&self) -> Result<Arc<C>, HapicError> {
        self.context
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| HapicError::Configuration("no context installed".to_string()))
    }

    pub fn set_processor_factory(&self, factory: ProcessorFactory) {
        if let Ok(mut slot) = self.processor_factory.write() {
            *slot = factory;
        }
    }

    fn build_processor(
        &self,
        schema: SchemaDef,
        options: ProcessorOptions,
        explicit: Option<Arc<dyn Processor>>,
    ) -> Result<Arc<dyn Processor>, HapicError> {
        if let Some(processor) = explicit {
            return Ok(processor);
        }
        let factory = self
            .processor_factory
            .read()
            .map_err(|_| HapicError::Configuration("processor factory lock poisoned".to_string()))?
            .clone();
        factory(schema, options)
    }

    fn add_input(
        &self,
        role: Role,
        schema: SchemaDef,
        options: InputOptions,
    ) -> Result<&Self, HapicError> {
        let processor = self.build_processor(schema, options.options, options.processor)?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| HapicError::Configuration("decoration buffer lock poisoned".to_string()))?;
        buffer.add_input(InputDescription {
            role,
            processor,
            error_http_code: options.error_http_code,
            as_list: options.as_list,
        })?;
        Ok(self)
    }

    pub fn input_path(&self, schema: SchemaDef, options: InputOptions) -> Result<&Self, HapicError> {
        self.add_input(Role::InputPath, schema, options)
    }

    pub fn input_query(&self, schema: SchemaDef, options: InputOptions) -> Result<&Self, HapicError> {
        self.add_input(Role::InputQuery, schema, options)
    }

    pub fn input_body(&self, schema: SchemaDef, options: InputOptions) -> Result<&Self, HapicError> {
        self.add_input(Role::InputBody, schema, options)
    }

    pub fn input_headers(
        &self,
        schema: SchemaDef,
        options: InputOptions,
    ) -> Result<&Self, HapicError> {
        self.add_input(Role::InputHeaders, schema, options)
    }

    pub fn input_forms(&self, schema: SchemaDef, options: InputOptions) -> Result<&Self, HapicError> {
        self.add_input(Role::InputForms, schema, options)
    }

    pub fn input_files(&self, schema: SchemaDef, options: InputOptions) -> Result<&Self, HapicError> {
        self.add_input(Role::InputFiles, schema, options)
    }

    pub fn output_body(
        &self,
        schema: SchemaDef,
        options: OutputOptions,
    ) -> Result<&Self, HapicError> {
        let processor = self.build_processor(schema, options.options, options.processor)?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| HapicError::Configuration("decoration buffer lock poisoned".to_string()))?;
        buffer.add_output(OutputDescription::Body(OutputBodyDescription {
            processor,
            default_http_code: options.default_http_code,
            error_http_code: options.error_http_code,
        }))?;
        Ok(self)
    }

    pub fn output_headers(
        &self,
        schema: SchemaDef,
        options: OutputOptions,
    ) -> Result<&Self, HapicError> {
        let processor = self.build_processor(schema, options.options, options.processor)?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| HapicError::Configuration("decoration buffer lock poisoned".to_string()))?;
        buffer.add_output_headers(OutputHeadersDescription {
            processor,
            error_http_code: options.error_http_code,
        })?;
        Ok(self)
    }

    pub fn output_file(
        &self,
        output_types: Vec<String>,
        default_http_code: u16,
    ) -> Result<&Self, HapicError> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| HapicError::Configuration("decoration buffer lock poisoned".to_string()))?;
        buffer.add_output(OutputDescription::File(OutputFileDescription {
            output_types,
            default_http_code,
            error_http_code: 500,
        }))?;
        Ok(self)
    }

    pub fn output_stream(
        &self,
        schema: SchemaDef,
        options: OutputOptions,
        ignore_on_error: bool,
    ) -> Result<&Self, HapicError> {
        let processor = self.build_processor(schema, options.options, options.processor)?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| HapicError::Configuration("decoration buffer lock poisoned".to_string()))?;
        buffer.add_output(OutputDescription::Stream(OutputStreamDescription {
            processor,
            default_http_code: options.default_http_code,
            error_http_code: options.error_http_code,
            ignore_on_error,
        }))?;
        Ok(self)
    }

    /// Register a per-controller catch for one error class, answered at
    /// `http_code` with the default error builder's payload. Matchers run
    /// in declaration order; the first matching class wins.
    pub fn handle_exception<E: HapicException>(
        &self,
        http_code: u16,
        description: &str,
    ) -> Result<&Self, HapicError> {
        self.handle_exception_with::<E>(http_code, description, Arc::new(DefaultErrorBuilder))
    }

    pub fn handle_exception_with<E: HapicException>(
        &self,
        http_code: u16,
        description: &str,
        error_builder: Arc<dyn ErrorBuilder>,
    ) -> Result<&Self, HapicError> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| HapicError::Configuration("decoration buffer lock poisoned".to_string()))?;
        buffer.add_error(ErrorDescription {
            class_name: std::any::type_name::<E>(),
            http_code,
            error_builder,
            description: description.to_string(),
            matcher: exception_matcher::<E>(),
        });
        Ok(self)
    }

    /// Close one decoration site: drain the buffer, mint the controller
    /// token, append to the registry and return the composed view.
    pub fn with_api_doc(
        &self,
        name: &str,
        tags: &[&str],
        description: Option<&str>,
        controller: Controller<C>,
    ) -> Result<Arc<DecoratedView<C>>, HapicError> {
        let controller_description: ControllerDescription = {
            let mut buffer = self.buffer.lock().map_err(|_| {
                HapicError::Configuration("decoration buffer lock poisoned".to_string())
            })?;
            buffer.drain(
                tags.iter().map(|t| t.to_string()).collect(),
                description.map(|d| d.to_string()),
            )
        };
        let token = ulid::Ulid::new().to_string();
        let description = Arc::new(controller_description);
        let decorated = DecoratedController {
            name: name.to_string(),
            reference: ControllerReference {
                token: token.clone(),
            },
            description: Arc::clone(&description),
        };
        {
            let mut controllers = self.controllers.write().map_err(|_| {
                HapicError::Configuration("controller registry lock poisoned".to_string())
            })?;
            controllers.push(decorated);
        }
        info!(controller = %name, token = %token, "controller decorated");
        Ok(Arc::new(DecoratedView::new(
            name.to_string(),
            token,
            description,
            controller,
            Arc::clone(&self.context),
            self.mode,
            self.config.stack_size,
        )))
    }

    /// Register a decorated view with the current context, stamping the
    /// controller token on the route entry.
    pub fn register(
        &self,
        rule: &str,
        method: Method,
        view: &Arc<DecoratedView<C>>,
    ) -> Result<(), HapicError> {
        let ctx = self.context()?;
        ctx.add_view(
            rule,
            method,
            Some(view.token.clone()),
            DecoratedView::as_view_fn(view),
        )
    }

    /// Snapshot of the registry, in decoration order.
    pub fn controllers(&self) -> Vec<DecoratedController> {
        self.controllers
            .read()
            .map(|controllers| controllers.clone())
            .unwrap_or_default()
    }

    /// Emit the OpenAPI 2.0 document for every registered controller.
    pub fn generate_doc(
        &self,
        title: &str,
        description: &str,
        version: &str,
    ) -> Result<Value, HapicError> {
        let ctx = self.context()?;
        let controllers = self.controllers();
        debug!(controllers = controllers.len(), "generating documentation");
        crate::doc::generate_document(&controllers, ctx.as_ref(), title, description, version)
    }

    /// Install the documentation views on the current context: an HTML page
    /// at `<route>/`, the YAML document at `<route>/spec.yml` and the JSON
    /// document at `<route>/spec.json`.
    ///
    /// The views capture the registry and context handles, not the facade,
    /// so the document always reflects the registry at request time.
    pub fn add_documentation_view(
        &self,
        route: &str,
        title: &str,
        description: &str,
    ) -> Result<(), HapicError> {
        let ctx = self.context()?;
        let base = route.trim_end_matches('/').to_string();
        let title = title.to_string();
        let description = description.to_string();

        let spec_url = format!("{base}/spec.yml");
        let page_title = title.clone();
        let handle = Arc::clone(&self.context);
        let html_view: ViewFn<C> = Arc::new(move |_req| {
            let ctx = context_from(&handle)?;
            let page = crate::doc::render_doc_page(&page_title, &spec_url)?;
            Ok(ctx.get_response(page, 200, "text/html"))
        });

        let handle = Arc::clone(&self.context);
        let registry = Arc::clone(&self.controllers);
        let yaml_title = title.clone();
        let yaml_description = description.clone();
        let yaml_view: ViewFn<C> = Arc::new(move |_req| {
            let ctx = context_from(&handle)?;
            let controllers = registry_snapshot(&registry);
            let doc = crate::doc::generate_document(
                &controllers,
                ctx.as_ref(),
                &yaml_title,
                &yaml_description,
                "1.0.0",
            )?;
            let yaml = crate::doc::document_to_yaml(&doc)?;
            Ok(ctx.get_response(yaml, 200, "text/x-yaml"))
        });

        let handle = Arc::clone(&self.context);
        let registry = Arc::clone(&self.controllers);
        let json_view: ViewFn<C> = Arc::new(move |_req| {
            let ctx = context_from(&handle)?;
            let controllers = registry_snapshot(&registry);
            let doc = crate::doc::generate_document(
                &controllers,
                ctx.as_ref(),
                &title,
                &description,
                "1.0.0",
            )?;
            Ok(ctx.get_response(doc.to_string(), 200, "application/json"))
        });

        ctx.add_view(&format!("{base}/"), Method::GET, None, html_view)?;
        ctx.add_view(&format!("{base}/spec.yml"), Method::GET, None, yaml_view)?;
        ctx.add_view(&format!("{base}/spec.json"), Method::GET, None, json_view)?;
        Ok(())
    }
}

fn context_from<C: Context>(handle: &ContextHandle<C>) -> Result<Arc<C>, HapicError> {
    handle
        .read()
        .ok()
        .and_then(|guard| guard.clone())
        .ok_or_else(|| HapicError::Configuration("no context installed".to_string()))
}

fn registry_snapshot(
    registry: &Arc<RwLock<Vec<DecoratedController>>>,
) -> Vec<DecoratedController> {
    registry
        .read()
        .map(|controllers| controllers.clone())
        .unwrap_or_default()
}
