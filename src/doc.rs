//! OpenAPI 2.0 document generation.
//!
//! Fuses the facade's controller registry, each description's processor
//! references and the context's route information into one swagger 2.0
//! tree. Two passes: definitions first (deduplicated by resolved name),
//! then paths.

use crate::context::Context;
use crate::description::{DecoratedController, OutputDescription, Role};
use crate::error::HapicError;
use crate::processor::{SchemaPlugin, SchemaUsage};
use minijinja::Environment;
use serde_json::{json, Map, Value};
use tracing::debug;

const DOC_PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>{{ title }}</title>
    <meta charset="utf-8"/>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>body { margin: 0; padding: 0; }</style>
  </head>
  <body>
    <redoc spec-url="{{ spec_url }}"></redoc>
    <script src="https://cdn.redoc.ly/redoc/latest/bundles/redoc.standalone.js"></script>
  </body>
</html>
"#;

/// Build the OpenAPI 2.0 document for the given controllers against the
/// current context's routes.
pub fn generate_document<C: Context>(
    controllers: &[DecoratedController],
    ctx: &C,
    title: &str,
    description: &str,
    version: &str,
) -> Result<Value, HapicError> {
    let mut plugin = controllers
        .iter()
        .flat_map(|c| c.description.inputs.iter())
        .map(|input| input.processor.create_doc_plugin(None))
        .next()
        .unwrap_or_else(|| SchemaPlugin::new(None));

    // first pass: register every schema-carrying description so projected
    // variants land in definitions exactly once
    for controller in controllers {
        for input in &controller.description.inputs {
            if matches!(input.role, Role::InputBody | Role::InputForms) {
                plugin.register(&input.processor.schema_usage());
            }
        }
        match &controller.description.output {
            Some(OutputDescription::Body(d)) => {
                plugin.register(&d.processor.schema_usage());
            }
            Some(OutputDescription::Stream(d)) => {
                plugin.register(&d.processor.schema_usage());
            }
            _ => {}
        }
        for error in &controller.description.errors {
            plugin.register(&builder_usage(error.error_builder.as_ref()));
        }
    }

    // second pass: one operation object per controller route
    let mut paths = Map::new();
    for controller in controllers {
        let route = ctx.find_route(controller)?;
        let swagger_path = ctx.get_swagger_path(&route.rule);
        let operation = generate_operation(controller, &mut plugin);
        debug!(
            controller = %controller.name,
            path = %swagger_path,
            method = %route.method,
            "operation documented"
        );
        let entry = paths
            .entry(swagger_path)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(methods) = entry {
            methods.insert(route.method.as_str().to_lowercase(), operation);
        }
    }

    Ok(json!({
        "swagger": "2.0",
        "info": {
            "title": title,
            "description": description,
            "version": version,
        },
        "paths": paths,
        "definitions": plugin.definitions(),
    }))
}

fn builder_usage(builder: &dyn crate::error_builder::ErrorBuilder) -> SchemaUsage {
    let def = builder.schema();
    SchemaUsage {
        name: def.name,
        schema: def.schema,
    }
}

fn generate_operation(controller: &DecoratedController, plugin: &mut SchemaPlugin) -> Value {
    let description = &controller.description;
    let mut operation = Map::new();

    if let Some(text) = &description.description {
        let first_line = text
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(str::trim)
            .unwrap_or("");
        operation.insert(
            "description".to_string(),
            Value::String(first_line.to_string()),
        );
    }
    if !description.tags.is_empty() {
        operation.insert(
            "tags".to_string(),
            Value::Array(
                description
                    .tags
                    .iter()
                    .map(|t| Value::String(t.clone()))
                    .collect(),
            ),
        );
    }

    let mut parameters = Vec::new();
    let mut consumes = Vec::new();
    for input in &description.inputs {
        match input.role {
            Role::InputBody => {
                parameters.push(json!({
                    "in": "body",
                    "name": "body",
                    "schema": input.processor.schema_ref(plugin),
                }));
            }
            Role::InputPath => {
                parameters.extend(non_body_parameters(&input.processor.schema_usage(), "path"));
            }
            Role::InputQuery => {
                parameters.extend(non_body_parameters(&input.processor.schema_usage(), "query"));
            }
            Role::InputHeaders => {
                parameters.extend(non_body_parameters(
                    &input.processor.schema_usage(),
                    "header",
                ));
            }
            Role::InputForms => {
                push_unique(&mut consumes, "multipart/form-data");
                parameters.extend(form_data_parameters(&input.processor.schema_usage(), false));
            }
            Role::InputFiles => {
                push_unique(&mut consumes, "multipart/form-data");
                parameters.extend(form_data_parameters(&input.processor.schema_usage(), true));
            }
            _ => {}
        }
    }
    if !parameters.is_empty() {
        operation.insert("parameters".to_string(), Value::Array(parameters));
    }
    if !consumes.is_empty() {
        operation.insert(
            "consumes".to_string(),
            Value::Array(consumes.into_iter().map(Value::String).collect()),
        );
    }

    let mut responses = Map::new();
    match &description.output {
        Some(OutputDescription::Body(d)) => {
            responses.insert(
                d.default_http_code.to_string(),
                json!({
                    "description": "",
                    "schema": d.processor.schema_ref(plugin),
                }),
            );
        }
        Some(OutputDescription::Stream(d)) => {
            let usage = d.processor.schema_usage();
            let name = plugin.register(&usage);
            responses.insert(
                d.default_http_code.to_string(),
                json!({
                    "description": "",
                    "schema": {
                        "type": "array",
                        "items": { "$ref": format!("#/definitions/{name}") },
                    },
                }),
            );
        }
        Some(OutputDescription::File(d)) => {
            operation.insert(
                "produces".to_string(),
                Value::Array(
                    d.output_types
                        .iter()
                        .map(|t| Value::String(t.clone()))
                        .collect(),
                ),
            );
            responses.insert(
                d.default_http_code.to_string(),
                json!({ "description": "" }),
            );
        }
        None => {}
    }

    // one response per HTTP code; wrappers sharing a code concatenate their
    // descriptions and share the first wrapper's schema
    let mut error_codes: Vec<u16> = Vec::new();
    for error in &description.errors {
        if !error_codes.contains(&error.http_code) {
            error_codes.push(error.http_code);
        }
    }
    for code in error_codes {
        let group: Vec<_> = description
            .errors
            .iter()
            .filter(|e| e.http_code == code)
            .collect();
        let joined = group
            .iter()
            .map(|e| e.description.as_str())
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let name = plugin.register(&builder_usage(group[0].error_builder.as_ref()));
        responses.insert(
            code.to_string(),
            json!({
                "description": joined,
                "schema": { "$ref": format!("#/definitions/{name}") },
            }),
        );
    }

    if responses.is_empty() {
        responses.insert("200".to_string(), json!({ "description": "" }));
    }
    operation.insert("responses".to_string(), Value::Object(responses));

    Value::Object(operation)
}

/// OpenAPI keywords legal on a non-body parameter, per the property's type.
fn allowed_keywords(ty: &str) -> Vec<&'static str> {
    let mut allowed = vec!["type", "format", "description", "enum"];
    match ty {
        "string" => allowed.extend(["maxLength", "minLength", "pattern"]),
        "number" | "integer" => allowed.extend([
            "maximum",
            "exclusiveMaximum",
            "minimum",
            "exclusiveMinimum",
            "multipleOf",
        ]),
        "array" => allowed.extend([
            "items",
            "collectionFormat",
            "pattern",
            "maxItems",
            "minItems",
            "uniqueItems",
        ]),
        _ => {}
    }
    allowed
}

fn non_body_parameters(usage: &SchemaUsage, location: &str) -> Vec<Value> {
    let properties = match usage.schema.get("properties").and_then(|p| p.as_object()) {
        Some(properties) => properties,
        None => return Vec::new(),
    };
    let required = required_fields(&usage.schema);
    let mut parameters = Vec::new();
    for (name, prop) in properties {
        let ty = prop
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("string");
        let mut entry = Map::new();
        entry.insert("name".to_string(), Value::String(name.clone()));
        entry.insert("in".to_string(), Value::String(location.to_string()));
        entry.insert(
            "required".to_string(),
            Value::Bool(location == "path" || required.iter().any(|r| r == name)),
        );
        for keyword in allowed_keywords(ty) {
            if let Some(value) = prop.get(keyword) {
                entry.insert(keyword.to_string(), value.clone());
            }
        }
        if !entry.contains_key("type") {
            entry.insert("type".to_string(), Value::String(ty.to_string()));
        }
        // OpenAPI 2.0 disallows `example` on path/query parameters; move it
        // into the description instead
        if let Some(example) = prop.get("example") {
            let rendered = match example {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let existing = entry
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string();
            entry.insert(
                "description".to_string(),
                Value::String(format!("{existing}\n\n*example value: {rendered}*")),
            );
        }
        parameters.push(Value::Object(entry));
    }
    parameters
}

fn form_data_parameters(usage: &SchemaUsage, is_file: bool) -> Vec<Value> {
    let properties = match usage.schema.get("properties").and_then(|p| p.as_object()) {
        Some(properties) => properties,
        None => return Vec::new(),
    };
    let required = required_fields(&usage.schema);
    let mut parameters = Vec::new();
    for (name, prop) in properties {
        let ty = if is_file {
            "file".to_string()
        } else {
            prop.get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("string")
                .to_string()
        };
        parameters.push(json!({
            "name": name,
            "in": "formData",
            "required": required.iter().any(|r| r == name),
            "type": ty,
        }));
    }
    parameters
}

fn required_fields(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Render the document as YAML, round-tripping through JSON first so the
/// dump carries no library-specific ordered-mapping artifacts.
pub fn document_to_yaml(doc: &Value) -> Result<String, HapicError> {
    let serialized = serde_json::to_string(doc)
        .map_err(|e| HapicError::Documentation(format!("document does not serialize: {e}")))?;
    let round_tripped: Value = serde_json::from_str(&serialized)
        .map_err(|e| HapicError::Documentation(format!("document does not round-trip: {e}")))?;
    serde_yaml::to_string(&round_tripped)
        .map_err(|e| HapicError::Documentation(format!("document does not dump as YAML: {e}")))
}

/// Render the HTML page that displays the document.
pub fn render_doc_page(title: &str, spec_url: &str) -> Result<String, HapicError> {
    let mut env = Environment::new();
    env.add_template("doc_page", DOC_PAGE_TEMPLATE)
        .map_err(|e| HapicError::Documentation(format!("doc page template: {e}")))?;
    let template = env
        .get_template("doc_page")
        .map_err(|e| HapicError::Documentation(format!("doc page template: {e}")))?;
    template
        .render(minijinja::context! { title => title, spec_url => spec_url })
        .map_err(|e| HapicError::Documentation(format!("doc page render: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let doc = json!({"swagger": "2.0", "paths": {"/x": {"get": {"responses": {"200": {"description": ""}}}}}});
        let yaml = document_to_yaml(&doc).unwrap();
        assert!(yaml.contains("swagger: '2.0'") || yaml.contains("swagger: \"2.0\""));
        assert!(yaml.contains("/x"));
    }

    #[test]
    fn test_doc_page_renders_spec_url() {
        let page = render_doc_page("Demo API", "/doc/spec.yml").unwrap();
        assert!(page.contains("<title>Demo API</title>"));
        assert!(page.contains("spec-url=\"/doc/spec.yml\""));
    }
}
