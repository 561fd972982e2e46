//! Tests for the tiny_http context adapter
//!
//! Route matching and token identity, file responses, multipart bucket
//! extraction, static directory serving and response-header validation.

mod common;

use common::{facade, user_schema};
use hapic::{
    Context, ControllerOutput, HapicFile, InputOptions, OutputOptions, TinyRequest,
};
use http::Method;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

fn noop_controller() -> hapic::Controller<hapic::TinyHttpContext> {
    Arc::new(|_data| Ok(ControllerOutput::json(json!({}))))
}

#[test]
fn test_find_route_matches_by_token() {
    let (hapic, ctx) = facade();
    let view = hapic
        .with_api_doc("get_user", &[], None, noop_controller())
        .unwrap();
    hapic
        .register("/users/:user_id", Method::GET, &view)
        .unwrap();

    let controller = &hapic.controllers()[0];
    let route = ctx.find_route(controller).unwrap();
    assert_eq!(route.rule, "/users/:user_id");
    assert_eq!(route.method, Method::GET);
    assert_eq!(
        ctx.get_swagger_path(&route.rule),
        "/users/{user_id}"
    );
}

#[test]
fn test_find_route_skips_head_twin() {
    let (hapic, ctx) = facade();
    let view = hapic
        .with_api_doc("get_user", &[], None, noop_controller())
        .unwrap();
    // a HEAD twin registered first, as frameworks auto-create them
    hapic
        .register("/users/:user_id", Method::HEAD, &view)
        .unwrap();
    hapic
        .register("/users/:user_id", Method::GET, &view)
        .unwrap();

    let controller = &hapic.controllers()[0];
    let route = ctx.find_route(controller).unwrap();
    assert_eq!(route.method, Method::GET);
}

#[test]
fn test_find_route_fails_for_unregistered_controller() {
    let (hapic, ctx) = facade();
    let _view = hapic
        .with_api_doc("ghost", &[], None, noop_controller())
        .unwrap();
    let controller = &hapic.controllers()[0];
    assert!(matches!(
        ctx.find_route(controller),
        Err(hapic::HapicError::RouteNotFound { .. })
    ));
}

#[test]
fn test_unknown_path_answers_404() {
    let (_hapic, ctx) = facade();
    let mut req = TinyRequest::new(Method::GET, "/nowhere");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 404);
}

#[test]
fn test_file_response_from_path_sets_disposition() {
    let (hapic, ctx) = facade();
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"%PDF-1.4 report").unwrap();
    let path = tmp.path().to_path_buf();

    hapic
        .output_file(vec!["application/pdf".to_string()], 200)
        .unwrap();
    let view = hapic
        .with_api_doc(
            "report",
            &[],
            None,
            Arc::new(move |_data| {
                Ok(ControllerOutput::file(
                    HapicFile::from_path(&path)
                        .with_mimetype("application/pdf")
                        .with_filename("report.pdf")
                        .as_attachment(),
                ))
            }),
        )
        .unwrap();
    hapic.register("/report", Method::GET, &view).unwrap();

    let mut req = TinyRequest::new(Method::GET, "/report");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/pdf"));
    assert_eq!(
        resp.header("content-disposition"),
        Some("attachment; filename=\"report.pdf\"")
    );
    assert_eq!(resp.body_bytes(), b"%PDF-1.4 report");
}

#[test]
fn test_missing_file_answers_500_validation_error() {
    let (hapic, ctx) = facade();
    hapic
        .output_file(vec!["application/pdf".to_string()], 200)
        .unwrap();
    let view = hapic
        .with_api_doc(
            "report",
            &[],
            None,
            Arc::new(|_data| {
                Ok(ControllerOutput::file(HapicFile::from_path(
                    "/no/such/report.pdf",
                )))
            }),
        )
        .unwrap();
    hapic.register("/report", Method::GET, &view).unwrap();

    let mut req = TinyRequest::new(Method::GET, "/report");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 500);
}

#[test]
fn test_multipart_request_populates_forms_and_files() {
    let (hapic, ctx) = facade();
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
            "properties": { "caption": { "type": "string" } },
            "required": ["caption"]
        }),
    );
    hapic
        .input_forms(forms_schema, InputOptions::default())
        .unwrap()
        .input_files(files_schema, InputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc(
            "upload",
            &[],
            None,
            Arc::new(|data| {
                let avatar = data.files.get("avatar").unwrap();
                Ok(ControllerOutput::json(json!({
                    "caption": data.forms["caption"],
                    "filename": avatar.filename,
                    "size": avatar.data.len(),
                })))
            }),
        )
        .unwrap();
    hapic.register("/upload", Method::POST, &view).unwrap();

    let body = b"--XBOUND\r\n\
Content-Disposition: form-data; name=\"caption\"\r\n\
\r\n\
holiday picture\r\n\
--XBOUND\r\n\
Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
Content-Type: image/png\r\n\
\r\n\
PNGDATA\r\n\
--XBOUND--\r\n";
    let mut req = TinyRequest::new(Method::POST, "/upload").with_body(
        body.to_vec(),
        "multipart/form-data; boundary=XBOUND",
    );
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 200);
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&resp.body_string()).unwrap(),
        json!({ "caption": "holiday picture", "filename": "me.png", "size": 7 })
    );
}

#[test]
fn test_missing_required_file_answers_400() {
    let (hapic, ctx) = facade();
    let files_schema = hapic::SchemaDef::new(
        "AvatarSchema",
        json!({
            "type": "object",
            "properties": { "avatar": { "type": "string" } },
            "required": ["avatar"]
        }),
    );
    hapic
        .input_files(files_schema, InputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc("upload", &[], None, noop_controller())
        .unwrap();
    hapic.register("/upload", Method::POST, &view).unwrap();

    let mut req = TinyRequest::new(Method::POST, "/upload");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 400);
    let payload: serde_json::Value = serde_json::from_str(&resp.body_string()).unwrap();
    assert_eq!(
        payload["details"]["avatar"],
        json!(["Missing data for required field."])
    );
}

#[test]
fn test_serve_directory_with_traversal_protection() {
    let (_hapic, ctx) = facade();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("site.css"), "body {}").unwrap();
    ctx.serve_directory("/static", dir.path()).unwrap();

    let mut req = TinyRequest::new(Method::GET, "/static/site.css");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("text/css"));
    assert_eq!(resp.body_string(), "body {}");

    let mut sneaky = TinyRequest::new(Method::GET, "/static/../Cargo.toml");
    let resp = ctx.dispatch(&mut sneaky);
    assert_eq!(resp.status, 404);
}

#[test]
fn test_output_headers_are_validated() {
    let (hapic, ctx) = facade();
    let headers_schema = hapic::SchemaDef::new(
        "PaginationHeadersSchema",
        json!({
            "type": "object",
            "properties": { "x-total-count": { "type": "string" } },
            "required": ["x-total-count"]
        }),
    );
    hapic
        .output_body(user_schema(), OutputOptions::default())
        .unwrap()
        .output_headers(headers_schema, OutputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc(
            "list_users",
            &[],
            None,
            Arc::new(|_data| {
                Ok(ControllerOutput::json_with_headers(
                    json!({
                        "id": 1,
                        "first_name": "Bob",
                        "last_name": "Sponge",
                        "email_address": "bob@example.com"
                    }),
                    vec![("X-Total-Count".to_string(), "1".to_string())],
                ))
            }),
        )
        .unwrap();
    hapic.register("/users", Method::GET, &view).unwrap();

    let mut req = TinyRequest::new(Method::GET, "/users");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("x-total-count"), Some("1"));
}

#[test]
fn test_output_headers_missing_required_answers_500() {
    let (hapic, ctx) = facade();
    let headers_schema = hapic::SchemaDef::new(
        "PaginationHeadersSchema",
        json!({
            "type": "object",
            "properties": { "x-total-count": { "type": "string" } },
            "required": ["x-total-count"]
        }),
    );
    hapic
        .output_body(user_schema(), OutputOptions::default())
        .unwrap()
        .output_headers(headers_schema, OutputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc(
            "list_users",
            &[],
            None,
            Arc::new(|_data| {
                Ok(ControllerOutput::json(json!({
                    "id": 1,
                    "first_name": "Bob",
                    "last_name": "Sponge",
                    "email_address": "bob@example.com"
                })))
            }),
        )
        .unwrap();
    hapic.register("/users", Method::GET, &view).unwrap();

    let mut req = TinyRequest::new(Method::GET, "/users");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 500);
}

#[test]
fn test_header_bucket_reaches_controller_lowercased() {
    let (hapic, ctx) = facade();
    let headers_schema = hapic::SchemaDef::new(
        "ApiKeyHeadersSchema",
        json!({
            "type": "object",
            "properties": { "x-api-key": { "type": "string" } },
            "required": ["x-api-key"]
        }),
    );
    hapic
        .input_headers(headers_schema, InputOptions::default())
        .unwrap();
    let view = hapic
        .with_api_doc(
            "secure",
            &[],
            None,
            Arc::new(|data| Ok(ControllerOutput::json(data.headers.clone()))),
        )
        .unwrap();
    hapic.register("/secure", Method::GET, &view).unwrap();

    let mut req = TinyRequest::new(Method::GET, "/secure").with_header("X-Api-Key", "secret");
    let resp = ctx.dispatch(&mut req);
    assert_eq!(resp.status, 200);
    let payload: serde_json::Value = serde_json::from_str(&resp.body_string()).unwrap();
    assert_eq!(payload["x-api-key"], json!("secret"));
}
