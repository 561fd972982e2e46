//! Context adapter for the `tiny_http` server.
//!
//! `tiny_http` ships no router, so this adapter owns the route table and
//! mediates registration through `add_view`. Its native rule syntax uses
//! `:name` segments (`/hello/:name`), compiled to anchored regexes for
//! matching and translated to OpenAPI `{name}` placeholders for the
//! documentation generator.

use super::{Context, GlobalExceptionHandler, RouteRepresentation, ViewFn};
use crate::description::DecoratedController;
use crate::error::HapicError;
use crate::error_builder::{DefaultErrorBuilder, ErrorBuilder};
use crate::file::{FileSource, HapicFile};
use crate::params::{HeaderParameters, MultiMap, RequestParameters, UploadedFile};
use http::Method;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

static RULE_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("rule parameter regex"));

/// Adapter-owned request representation, pre-parsed by the serving loop.
#[derive(Debug, Clone)]
pub struct TinyRequest {
    pub method: Method,
    /// Path plus query string, as received.
    pub url: String,
    /// Header pairs with lowercase names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Filled by route matching before the view runs.
    pub path_params: HashMap<String, String>,
}

impl TinyRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        TinyRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
            path_params: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.body = body;
        self.with_header("content-type", content_type)
    }

    pub fn with_json(self, value: &Value) -> Self {
        let body = value.to_string().into_bytes();
        self.with_body(body, "application/json")
    }

    pub fn with_form(self, pairs: &[(&str, &str)]) -> Self {
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().copied())
            .finish();
        self.with_body(encoded.into_bytes(), "application/x-www-form-urlencoded")
    }

    fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("/")
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response body variants the serving loop knows how to emit.
pub enum TinyBody {
    Empty,
    Bytes(Vec<u8>),
    /// Chunked body fed through a channel while the response streams.
    Stream(Receiver<Vec<u8>>),
    File(PathBuf),
}

/// Adapter-owned native response.
pub struct TinyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: TinyBody,
}

impl TinyResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Drain the body into bytes. A stream body blocks until the feeder
    /// finishes, which makes test assertions deterministic.
    pub fn body_bytes(self) -> Vec<u8> {
        match self.body {
            TinyBody::Empty => Vec::new(),
            TinyBody::Bytes(bytes) => bytes,
            TinyBody::Stream(rx) => {
                let mut out = Vec::new();
                while let Ok(chunk) = rx.recv() {
                    out.extend_from_slice(&chunk);
                }
                out
            }
            TinyBody::File(path) => std::fs::read(path).unwrap_or_default(),
        }
    }

    pub fn body_string(self) -> String {
        String::from_utf8_lossy(&self.body_bytes()).into_owned()
    }

    fn not_found() -> Self {
        TinyResponse {
            status: 404,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: TinyBody::Bytes(b"{\"message\":\"Not found\"}".to_vec()),
        }
    }

    fn host_error() -> Self {
        TinyResponse {
            status: 500,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: TinyBody::Bytes(b"Internal Server Error".to_vec()),
        }
    }
}

/// Feeder half of a chunked response.
pub struct TinyStream {
    tx: Sender<Vec<u8>>,
}

struct RouteEntry {
    method: Method,
    rule: String,
    regex: Regex,
    param_names: Vec<String>,
    token: Option<String>,
    view: ViewFn<TinyHttpContext>,
}

/// The shipped host adapter.
pub struct TinyHttpContext {
    routes: RwLock<Vec<RouteEntry>>,
    handlers: RwLock<Vec<GlobalExceptionHandler>>,
    static_dirs: RwLock<Vec<(String, PathBuf)>>,
    error_builder: Arc<dyn ErrorBuilder>,
    debug: bool,
}

impl Default for TinyHttpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TinyHttpContext {
    pub fn new() -> Self {
        TinyHttpContext {
            routes: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            static_dirs: RwLock::new(Vec::new()),
            error_builder: Arc::new(DefaultErrorBuilder),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_error_builder(mut self, builder: Arc<dyn ErrorBuilder>) -> Self {
        self.error_builder = builder;
        self
    }

    /// Match and run the view for one request. This is the piece the serve
    /// loop (and the tests) drive; no socket involved.
    pub fn dispatch(&self, req: &mut TinyRequest) -> TinyResponse {
        let path = req.path().to_string();
        if req.method == Method::GET {
            if let Some(resp) = self.try_static(&path) {
                return resp;
            }
        }
        let matched = {
            let routes = match self.routes.read() {
                Ok(routes) => routes,
                Err(_) => return TinyResponse::host_error(),
            };
            routes.iter().find_map(|entry| {
                if entry.method != req.method {
                    return None;
                }
                entry.regex.captures(&path).map(|caps| {
                    let params: HashMap<String, String> = entry
                        .param_names
                        .iter()
                        .filter_map(|name| {
                            caps.name(name).map(|m| (name.clone(), m.as_str().to_string()))
                        })
                        .collect();
                    (Arc::clone(&entry.view), params)
                })
            })
        };
        match matched {
            Some((view, params)) => {
                req.path_params = params;
                match view(req) {
                    Ok(resp) => resp,
                    Err(err) => {
                        error!(method = %req.method, path = %path, error = %err, "view failed");
                        TinyResponse::host_error()
                    }
                }
            }
            None => {
                debug!(method = %req.method, path = %path, "no route matched");
                TinyResponse::not_found()
            }
        }
    }

    fn try_static(&self, path: &str) -> Option<TinyResponse> {
        let dirs = self.static_dirs.read().ok()?;
        for (prefix, dir) in dirs.iter() {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                let file_path = map_static_path(dir, rest)?;
                if file_path.is_file() {
                    let bytes = std::fs::read(&file_path).ok()?;
                    return Some(TinyResponse {
                        status: 200,
                        headers: vec![(
                            "content-type".to_string(),
                            static_content_type(&file_path).to_string(),
                        )],
                        body: TinyBody::Bytes(bytes),
                    });
                }
            }
        }
        None
    }

    /// Serve forever on `addr`, one thread per request.
    pub fn run(self: Arc<Self>, addr: &str) -> Result<(), HapicError> {
        let server = tiny_http::Server::http(addr)
            .map_err(|e| HapicError::Configuration(format!("cannot bind '{addr}': {e}")))?;
        info!(addr = %addr, "serving");
        for request in server.incoming_requests() {
            let ctx = Arc::clone(&self);
            std::thread::spawn(move || ctx.serve_one(request));
        }
        Ok(())
    }

    fn serve_one(&self, mut request: tiny_http::Request) {
        let method = Method::from_bytes(request.method().to_string().as_bytes())
            .unwrap_or(Method::GET);
        let url = request.url().to_string();
        let headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .map(|h| {
                (
                    h.field.to_string().to_ascii_lowercase(),
                    h.value.to_string(),
                )
            })
            .collect();
        let mut body = Vec::new();
        let _ = request.as_reader().read_to_end(&mut body);
        let mut req = TinyRequest {
            method,
            url,
            headers,
            body,
            path_params: HashMap::new(),
        };
        let resp = self.dispatch(&mut req);
        respond_native(request, resp);
    }
}

impl Context for TinyHttpContext {
    type Request = TinyRequest;
    type Response = TinyResponse;
    type Stream = TinyStream;

    fn get_request_parameters(
        &self,
        req: &mut Self::Request,
    ) -> Result<RequestParameters, HapicError> {
        let mut headers = HeaderParameters::new();
        for (name, value) in &req.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone())?;
        }

        let mut query = MultiMap::new();
        if let Some(pos) = req.url.find('?') {
            for (k, v) in url::form_urlencoded::parse(req.url[pos + 1..].as_bytes()) {
                query.insert(k.into_owned(), v.into_owned());
            }
        }

        let mut body = None;
        let mut forms = MultiMap::new();
        let mut files = HashMap::new();
        let content_type = req.header("content-type").unwrap_or("").to_string();
        if !req.body.is_empty() {
            if content_type.starts_with("application/json") {
                body = serde_json::from_slice(&req.body).ok();
            } else if content_type.starts_with("application/x-www-form-urlencoded") {
                for (k, v) in url::form_urlencoded::parse(&req.body) {
                    forms.insert(k.into_owned(), v.into_owned());
                }
            } else if let Some(boundary) = multipart_boundary(&content_type) {
                parse_multipart(&req.body, &boundary, &mut forms, &mut files);
            }
        }

        Ok(RequestParameters {
            path: req.path_params.clone(),
            query,
            body,
            forms,
            headers,
            files,
        })
    }

    fn get_response(&self, body: String, http_code: u16, mimetype: &str) -> Self::Response {
        if http_code == 204 {
            return TinyResponse {
                status: 204,
                headers: Vec::new(),
                body: TinyBody::Empty,
            };
        }
        TinyResponse {
            status: http_code,
            headers: vec![("content-type".to_string(), mimetype.to_string())],
            body: TinyBody::Bytes(body.into_bytes()),
        }
    }

    fn get_file_response(
        &self,
        file: HapicFile,
        http_code: u16,
    ) -> Result<Self::Response, HapicError> {
        let mimetype = file
            .mimetype
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let disposition = file.content_disposition();
        let body = match file.into_source() {
            FileSource::Content(bytes) => TinyBody::Bytes(bytes),
            FileSource::Path(path) => TinyBody::File(path),
        };
        Ok(TinyResponse {
            status: http_code,
            headers: vec![
                ("content-type".to_string(), mimetype),
                ("content-disposition".to_string(), disposition),
            ],
            body,
        })
    }

    fn get_stream_response_object(
        &self,
        http_code: u16,
        headers: &[(String, String)],
    ) -> Result<(Self::Stream, Self::Response), HapicError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut response_headers = vec![(
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        )];
        response_headers.extend(headers.iter().cloned());
        Ok((
            TinyStream { tx },
            TinyResponse {
                status: http_code,
                headers: response_headers,
                body: TinyBody::Stream(rx),
            },
        ))
    }

    fn feed_stream_response(
        &self,
        stream: &mut Self::Stream,
        serialized_item: &str,
    ) -> Result<(), HapicError> {
        let mut chunk = serialized_item.as_bytes().to_vec();
        chunk.push(b'\n');
        stream.tx.send(chunk).map_err(|_| HapicError::StreamClosed)
    }

    fn set_response_headers(&self, resp: &mut Self::Response, headers: &[(String, String)]) {
        for (name, value) in headers {
            resp.headers
                .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            resp.headers
                .push((name.to_ascii_lowercase(), value.clone()));
        }
    }

    fn default_error_builder(&self) -> Arc<dyn ErrorBuilder> {
        Arc::clone(&self.error_builder)
    }

    fn find_route(
        &self,
        controller: &DecoratedController,
    ) -> Result<RouteRepresentation, HapicError> {
        let routes = self.routes.read().map_err(|_| {
            HapicError::Configuration("route table lock poisoned".to_string())
        })?;
        for entry in routes.iter() {
            if entry.token.as_deref() == Some(controller.reference.token.as_str()) {
                // frameworks may auto-register HEAD twins; a token-only
                // match against those would document the wrong method
                if entry.method == Method::HEAD {
                    continue;
                }
                return Ok(RouteRepresentation {
                    rule: entry.rule.clone(),
                    method: entry.method.clone(),
                    name: controller.name.clone(),
                });
            }
        }
        Err(HapicError::RouteNotFound {
            controller: controller.name.clone(),
        })
    }

    fn get_swagger_path(&self, rule: &str) -> String {
        RULE_PARAM_RE.replace_all(rule, "{$1}").into_owned()
    }

    fn is_debug(&self) -> bool {
        self.debug
    }

    fn add_global_exception_handler(&self, handler: GlobalExceptionHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }

    fn global_exception_handlers(&self) -> Vec<GlobalExceptionHandler> {
        self.handlers
            .read()
            .map(|handlers| handlers.clone())
            .unwrap_or_default()
    }

    fn add_view(
        &self,
        rule: &str,
        method: Method,
        token: Option<String>,
        view: ViewFn<Self>,
    ) -> Result<(), HapicError> {
        let (regex, param_names) = compile_rule(rule)?;
        info!(rule = %rule, method = %method, "view registered");
        let mut routes = self.routes.write().map_err(|_| {
            HapicError::Configuration("route table lock poisoned".to_string())
        })?;
        routes.push(RouteEntry {
            method,
            rule: rule.to_string(),
            regex,
            param_names,
            token,
            view,
        });
        Ok(())
    }

    fn serve_directory(&self, prefix: &str, dir: &Path) -> Result<(), HapicError> {
        if !dir.is_dir() {
            return Err(HapicError::Configuration(format!(
                "'{}' is not a directory",
                dir.display()
            )));
        }
        let mut dirs = self.static_dirs.write().map_err(|_| {
            HapicError::Configuration("static directory lock poisoned".to_string())
        })?;
        dirs.push((prefix.to_string(), dir.to_path_buf()));
        Ok(())
    }
}

/// Compile a `:name`-style rule into an anchored regex with one named group
/// per parameter.
fn compile_rule(rule: &str) -> Result<(Regex, Vec<String>), HapicError> {
    if !rule.starts_with('/') {
        return Err(HapicError::Configuration(format!(
            "route rule '{rule}' must start with '/'"
        )));
    }
    let mut pattern = String::from("^");
    let mut param_names = Vec::new();
    for (i, segment) in rule.split('/').enumerate() {
        if i > 0 {
            pattern.push('/');
        }
        if let Some(name) = segment.strip_prefix(':') {
            param_names.push(name.to_string());
            pattern.push_str(&format!("(?P<{name}>[^/]+)"));
        } else {
            pattern.push_str(&regex::escape(segment));
        }
    }
    pattern.push('$');
    let regex = Regex::new(&pattern)
        .map_err(|e| HapicError::Configuration(format!("rule '{rule}' does not compile: {e}")))?;
    Ok((regex, param_names))
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type.starts_with("multipart/form-data") {
        return None;
    }
    content_type.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Minimal multipart/form-data parser: text parts land in the forms bucket,
/// parts carrying a filename land in the files bucket.
fn parse_multipart(
    body: &[u8],
    boundary: &str,
    forms: &mut MultiMap,
    files: &mut HashMap<String, UploadedFile>,
) {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut offset = 0;
    let mut starts = Vec::new();
    while let Some(pos) = find_subsequence(&body[offset..], delimiter) {
        starts.push(offset + pos);
        offset += pos + delimiter.len();
    }
    for window in starts.windows(2) {
        let part_start = window[0] + delimiter.len();
        let part = &body[part_start..window[1]];
        // part = \r\n headers \r\n\r\n data \r\n
        let part = part.strip_prefix(b"\r\n".as_slice()).unwrap_or(part);
        let header_end = match find_subsequence(part, b"\r\n\r\n") {
            Some(end) => end,
            None => continue,
        };
        let header_block = String::from_utf8_lossy(&part[..header_end]);
        let mut data = &part[header_end + 4..];
        if data.ends_with(b"\r\n") {
            data = &data[..data.len() - 2];
        }
        let mut name = None;
        let mut filename = None;
        let mut content_type = None;
        for line in header_block.lines() {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("content-disposition:") {
                name = extract_disposition_param(line, "name");
                filename = extract_disposition_param(line, "filename");
            } else if let Some(value) = lower.strip_prefix("content-type:") {
                content_type = Some(value.trim().to_string());
            }
        }
        let name = match name {
            Some(name) => name,
            None => continue,
        };
        if filename.is_some() {
            files.insert(
                name.clone(),
                UploadedFile {
                    name,
                    filename,
                    content_type,
                    data: data.to_vec(),
                },
            );
        } else {
            forms.insert(name, String::from_utf8_lossy(data).into_owned());
        }
    }
}

fn extract_disposition_param(line: &str, param: &str) -> Option<String> {
    let marker = format!("{param}=\"");
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Traversal-safe mapping of a URL remainder onto a base directory.
fn map_static_path(base: &Path, url_rest: &str) -> Option<PathBuf> {
    let mut path = base.to_path_buf();
    for comp in Path::new(url_rest.trim_start_matches('/')).components() {
        match comp {
            Component::Normal(segment) => path.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

fn static_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "yml" | "yaml" => "text/x-yaml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    position: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.position >= self.buffer.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buffer = chunk;
                    self.position = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = &self.buffer[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

fn respond_native(request: tiny_http::Request, resp: TinyResponse) {
    let status = tiny_http::StatusCode(resp.status);
    let headers: Vec<tiny_http::Header> = resp
        .headers
        .iter()
        .filter_map(|(k, v)| tiny_http::Header::from_bytes(k.as_bytes(), v.as_bytes()).ok())
        .collect();
    let result = match resp.body {
        TinyBody::Empty => {
            let mut response = tiny_http::Response::empty(status);
            for header in headers {
                response.add_header(header);
            }
            request.respond(response)
        }
        TinyBody::Bytes(bytes) => {
            let mut response = tiny_http::Response::from_data(bytes).with_status_code(status);
            for header in headers {
                response.add_header(header);
            }
            request.respond(response)
        }
        TinyBody::Stream(rx) => {
            let reader = ChannelReader {
                rx,
                buffer: Vec::new(),
                position: 0,
            };
            let response = tiny_http::Response::new(status, headers, reader, None, None);
            request.respond(response)
        }
        TinyBody::File(path) => match std::fs::File::open(&path) {
            Ok(file) => {
                let mut response = tiny_http::Response::from_file(file).with_status_code(status);
                for header in headers {
                    response.add_header(header);
                }
                request.respond(response)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "file response vanished");
                request.respond(
                    tiny_http::Response::from_string("Internal Server Error")
                        .with_status_code(tiny_http::StatusCode(500)),
                )
            }
        },
    };
    if let Err(e) = result {
        debug!(error = %e, "client went away before the response completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_rule_extracts_params() {
        let (regex, names) = compile_rule("/users/:user_id/posts/:post_id").unwrap();
        assert_eq!(names, vec!["user_id", "post_id"]);
        let caps = regex.captures("/users/42/posts/7").unwrap();
        assert_eq!(&caps["user_id"], "42");
        assert_eq!(&caps["post_id"], "7");
        assert!(regex.captures("/users/42").is_none());
    }

    #[test]
    fn test_swagger_path_translation() {
        let ctx = TinyHttpContext::new();
        assert_eq!(
            ctx.get_swagger_path("/users/:user_id/posts/:post_id"),
            "/users/{user_id}/posts/{post_id}"
        );
        assert_eq!(ctx.get_swagger_path("/health"), "/health");
    }

    #[test]
    fn test_multipart_parser_splits_forms_and_files() {
        let body = b"--XBOUND\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
hello\r\n\
--XBOUND\r\n\
Content-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\
Content-Type: image/png\r\n\
\r\n\
PNGDATA\r\n\
--XBOUND--\r\n";
        let mut forms = MultiMap::new();
        let mut files = HashMap::new();
        parse_multipart(body, "XBOUND", &mut forms, &mut files);
        assert_eq!(forms.first("title"), Some("hello"));
        let avatar = files.get("avatar").unwrap();
        assert_eq!(avatar.filename.as_deref(), Some("a.png"));
        assert_eq!(avatar.content_type.as_deref(), Some("image/png"));
        assert_eq!(avatar.data, b"PNGDATA");
    }

    #[test]
    fn test_204_has_no_body_and_no_content_type() {
        let ctx = TinyHttpContext::new();
        let resp = ctx.get_response(String::new(), 204, "application/json");
        assert_eq!(resp.status, 204);
        assert!(resp.header("content-type").is_none());
        assert!(resp.body_bytes().is_empty());
    }

    #[test]
    fn test_map_static_path_blocks_traversal() {
        let base = Path::new("/srv/static");
        assert!(map_static_path(base, "../etc/passwd").is_none());
        assert_eq!(
            map_static_path(base, "css/site.css"),
            Some(PathBuf::from("/srv/static/css/site.css"))
        );
    }
}
