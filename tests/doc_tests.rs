//! Tests for the OpenAPI 2.0 document generator and documentation views
//!
//! Controllers are decorated and registered against the tiny_http adapter,
//! then the generated swagger tree is checked: definitions registered once
//! per resolved name, projected variants under distinct names, inline
//! parameters per bucket, responses keyed by stringified codes.

mod common;

use common::{facade, hello_path_schema, user_schema};
use hapic::{
    ControllerOutput, HapicException, InputOptions, OutputOptions, ProcessorOptions, TinyRequest,
};
use http::Method;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("missing user")]
struct UserNotFound;

impl HapicException for UserNotFound {}

#[derive(Debug, thiserror::Error)]
#[error("forbidden")]
struct Forbidden;

impl HapicException for Forbidden {}

#[derive(Debug, thiserror::Error)]
#[error("teapot")]
struct Teapot;

impl HapicException for Teapot {}

fn noop_controller() -> hapic::Controller<hapic::TinyHttpContext> {
    Arc::new(|_data| Ok(ControllerOutput::json(json!({}))))
}

#[test]
fn test_input_body_documents_ref_and_definition_once() {
    let (hapic, _ctx) = facade();
    hapic
        .input_body(
            user_schema(),
            InputOptions {
                options: ProcessorOptions::exclude(&["id"]),
                ..InputOptions::default()
            },
        )
        .unwrap()
        .output_body(user_schema(), OutputOptions::default())
        .unwrap();
    let add_user = hapic
        .with_api_doc("add_user", &["users"], Some("Add a user."), noop_controller())
        .unwrap();
    hapic.register("/users/", Method::POST, &add_user).unwrap();

    let doc = hapic.generate_doc("Users API", "", "1.0.0").unwrap();
    assert_eq!(doc["swagger"], json!("2.0"));

    let operation = &doc["paths"]["/users/"]["post"];
    assert_eq!(operation["description"], json!("Add a user."));
    assert_eq!(operation["tags"], json!(["users"]));

    let parameters = operation["parameters"].as_array().unwrap();
    let body_param = parameters
        .iter()
        .find(|p| p["in"] == json!("body"))
        .unwrap();
    assert_eq!(body_param["name"], json!("body"));
    assert_eq!(
        body_param["schema"]["$ref"],
        json!("#/definitions/UserSchema_exclude_id")
    );

    assert_eq!(
        operation["responses"]["200"]["schema"]["$ref"],
        json!("#/definitions/UserSchema")
    );

    let definitions = doc["definitions"].as_object().unwrap();
    assert!(definitions.contains_key("UserSchema"));
    assert!(definitions.contains_key("UserSchema_exclude_id"));
}

#[test]
fn test_projected_definition_differs_by_excluded_property() {
    let (hapic, _ctx) = facade();
    hapic
        .input_body(
            user_schema(),
            InputOptions {
                options: ProcessorOptions::exclude(&["id"]),
                ..InputOptions::default()
            },
        )
        .unwrap()
        .output_body(user_schema(), OutputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc("add_user", &[], None, noop_controller())
        .unwrap();
    hapic.register("/users/", Method::POST, &view).unwrap();

    let doc = hapic.generate_doc("Users API", "", "1.0.0").unwrap();
    let full = doc["definitions"]["UserSchema"]["properties"]
        .as_object()
        .unwrap();
    let projected = doc["definitions"]["UserSchema_exclude_id"]["properties"]
        .as_object()
        .unwrap();
    let mut missing: Vec<&String> = full.keys().filter(|k| !projected.contains_key(*k)).collect();
    missing.sort();
    assert_eq!(missing, vec!["id"]);
    for key in projected.keys() {
        assert!(full.contains_key(key));
    }
}

#[test]
fn test_path_and_query_parameters_are_inline() {
    let (hapic, _ctx) = facade();
    let query_schema = hapic::SchemaDef::new(
        "PageSchema",
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "maximum": 100, "example": 10 },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["limit"]
        }),
    );
    hapic
        .input_path(hello_path_schema(), InputOptions::default())
        .unwrap()
        .input_query(query_schema, InputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc("hello", &[], None, noop_controller())
        .unwrap();
    hapic.register("/hello/:name", Method::GET, &view).unwrap();

    let doc = hapic.generate_doc("Demo", "", "1.0.0").unwrap();
    let operation = &doc["paths"]["/hello/{name}"]["get"];
    let parameters = operation["parameters"].as_array().unwrap();

    let name_param = parameters
        .iter()
        .find(|p| p["name"] == json!("name"))
        .unwrap();
    assert_eq!(name_param["in"], json!("path"));
    assert_eq!(name_param["required"], json!(true));
    assert_eq!(name_param["type"], json!("string"));
    assert_eq!(name_param["minLength"], json!(3));

    let limit_param = parameters
        .iter()
        .find(|p| p["name"] == json!("limit"))
        .unwrap();
    assert_eq!(limit_param["in"], json!("query"));
    assert_eq!(limit_param["required"], json!(true));
    assert_eq!(limit_param["minimum"], json!(1));
    assert_eq!(limit_param["maximum"], json!(100));
    // swagger 2.0 has no `example` on query parameters
    assert!(limit_param.get("example").is_none());
    assert!(limit_param["description"]
        .as_str()
        .unwrap()
        .contains("*example value: 10*"));

    let tags_param = parameters
        .iter()
        .find(|p| p["name"] == json!("tags"))
        .unwrap();
    assert_eq!(tags_param["type"], json!("array"));
    assert_eq!(tags_param["items"], json!({ "type": "string" }));
    assert_eq!(tags_param["required"], json!(false));
}

#[test]
fn test_files_and_forms_document_multipart() {
    let (hapic, _ctx) = facade();
    let files_schema = hapic::SchemaDef::new(
        "AvatarSchema",
        json!({
            "type": "object",
            "properties": { "avatar": { "type": "string" } },
            "required": ["avatar"]
        }),
    );
    let forms_schema = hapic::SchemaDef::new(
        "CaptionSchema",
        json!({
            "type": "object",
            "properties": { "caption": { "type": "string" } }
        }),
    );
    hapic
        .input_files(files_schema, InputOptions::default())
        .unwrap()
        .input_forms(forms_schema, InputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc("upload", &[], None, noop_controller())
        .unwrap();
    hapic.register("/upload", Method::POST, &view).unwrap();

    let doc = hapic.generate_doc("Demo", "", "1.0.0").unwrap();
    let operation = &doc["paths"]["/upload"]["post"];
    assert_eq!(operation["consumes"], json!(["multipart/form-data"]));

    let parameters = operation["parameters"].as_array().unwrap();
    let avatar = parameters
        .iter()
        .find(|p| p["name"] == json!("avatar"))
        .unwrap();
    assert_eq!(avatar["in"], json!("formData"));
    assert_eq!(avatar["type"], json!("file"));
    assert_eq!(avatar["required"], json!(true));

    let caption = parameters
        .iter()
        .find(|p| p["name"] == json!("caption"))
        .unwrap();
    assert_eq!(caption["in"], json!("formData"));
    assert_eq!(caption["type"], json!("string"));
}

#[test]
fn test_stream_documents_array_of_items() {
    let (hapic, _ctx) = facade();
    hapic
        .output_stream(user_schema(), OutputOptions::default(), false)
        .unwrap();
    let view = hapic
        .with_api_doc("list_users", &[], None, noop_controller())
        .unwrap();
    hapic.register("/users", Method::GET, &view).unwrap();

    let doc = hapic.generate_doc("Demo", "", "1.0.0").unwrap();
    assert_eq!(
        doc["paths"]["/users"]["get"]["responses"]["200"]["schema"],
        json!({
            "type": "array",
            "items": { "$ref": "#/definitions/UserSchema" }
        })
    );
}

#[test]
fn test_file_output_documents_produces() {
    let (hapic, _ctx) = facade();
    hapic
        .output_file(vec!["application/pdf".to_string()], 200)
        .unwrap();
    let view = hapic
        .with_api_doc("report", &[], None, noop_controller())
        .unwrap();
    hapic.register("/report", Method::GET, &view).unwrap();

    let doc = hapic.generate_doc("Demo", "", "1.0.0").unwrap();
    let operation = &doc["paths"]["/report"]["get"];
    assert_eq!(operation["produces"], json!(["application/pdf"]));
    assert!(operation["responses"]["200"].get("schema").is_none());
}

#[test]
fn test_errors_sharing_a_code_concatenate_descriptions() {
    let (hapic, _ctx) = facade();
    hapic
        .handle_exception::<UserNotFound>(404, "User is unknown")
        .unwrap();
    hapic
        .handle_exception::<Forbidden>(404, "User is hidden")
        .unwrap();
    hapic.handle_exception::<Teapot>(418, "Teapot").unwrap();
    let view = hapic
        .with_api_doc("get_user", &[], None, noop_controller())
        .unwrap();
    hapic.register("/users/:id", Method::GET, &view).unwrap();

    let doc = hapic.generate_doc("Demo", "", "1.0.0").unwrap();
    let responses = &doc["paths"]["/users/{id}"]["get"]["responses"];
    assert_eq!(
        responses["404"]["description"],
        json!("User is unknown\n\nUser is hidden")
    );
    assert_eq!(
        responses["404"]["schema"]["$ref"],
        json!("#/definitions/DefaultErrorSchema")
    );
    assert_eq!(responses["418"]["description"], json!("Teapot"));
    assert!(doc["definitions"]
        .as_object()
        .unwrap()
        .contains_key("DefaultErrorSchema"));
}

#[test]
fn test_route_lookup_failure_is_fatal_at_doc_time() {
    let (hapic, _ctx) = facade();
    let _view = hapic
        .with_api_doc("unregistered", &[], None, noop_controller())
        .unwrap();
    // decorated but never registered with the context
    let err = hapic.generate_doc("Demo", "", "1.0.0").unwrap_err();
    assert!(matches!(err, hapic::HapicError::RouteNotFound { .. }));
}

#[test]
fn test_documentation_views_serve_html_yaml_and_json() {
    let (hapic, ctx) = facade();
    hapic
        .input_path(hello_path_schema(), InputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc("hello", &[], None, noop_controller())
        .unwrap();
    hapic.register("/hello/:name", Method::GET, &view).unwrap();
    hapic
        .add_documentation_view("/doc", "Demo API", "A demo API")
        .unwrap();

    let mut page_req = TinyRequest::new(Method::GET, "/doc/");
    let page = ctx.dispatch(&mut page_req);
    assert_eq!(page.status, 200);
    assert_eq!(page.header("content-type"), Some("text/html"));
    assert!(page.body_string().contains("/doc/spec.yml"));

    let mut yaml_req = TinyRequest::new(Method::GET, "/doc/spec.yml");
    let yaml = ctx.dispatch(&mut yaml_req);
    assert_eq!(yaml.status, 200);
    assert_eq!(yaml.header("content-type"), Some("text/x-yaml"));
    let yaml_body = yaml.body_string();
    assert!(yaml_body.contains("swagger"));
    assert!(yaml_body.contains("/hello/{name}"));

    let mut json_req = TinyRequest::new(Method::GET, "/doc/spec.json");
    let json_resp = ctx.dispatch(&mut json_req);
    assert_eq!(json_resp.status, 200);
    let parsed: Value = serde_json::from_str(&json_resp.body_string()).unwrap();
    assert_eq!(parsed["info"]["title"], json!("Demo API"));
}
