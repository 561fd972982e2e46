//! Shared fixtures for the integration suites.

use hapic::{ExecutionMode, Hapic, RuntimeConfig, SchemaDef, TinyHttpContext};
use serde_json::json;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install the env-filter subscriber once per test binary; run tests with
/// `RUST_LOG=hapic=debug` to see the pipeline logs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Facade + context pair wired together, thread mode.
pub fn facade() -> (Arc<Hapic<TinyHttpContext>>, Arc<TinyHttpContext>) {
    facade_with(ExecutionMode::Thread, false)
}

pub fn facade_with(
    mode: ExecutionMode,
    debug: bool,
) -> (Arc<Hapic<TinyHttpContext>>, Arc<TinyHttpContext>) {
    init_tracing();
    let hapic = Arc::new(Hapic::with_config(mode, RuntimeConfig::default()));
    let ctx = Arc::new(TinyHttpContext::new().with_debug(debug));
    hapic.set_context(Arc::clone(&ctx));
    (hapic, ctx)
}

pub fn hello_path_schema() -> SchemaDef {
    SchemaDef::new(
        "HelloPathSchema",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 3 }
            },
            "required": ["name"]
        }),
    )
}

pub fn user_schema() -> SchemaDef {
    SchemaDef::new(
        "UserSchema",
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer" },
                "first_name": { "type": "string" },
                "last_name": { "type": "string" },
                "email_address": { "type": "string" }
            },
            "required": ["id", "first_name", "last_name", "email_address"]
        }),
    )
}

pub fn sentence_schema() -> SchemaDef {
    SchemaDef::new(
        "SentenceSchema",
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" }
            },
            "required": ["name"],
            "additionalProperties": false
        }),
    )
}
