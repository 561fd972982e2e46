use super::SchemaUsage;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps a schema usage to the definition name it is registered under.
pub type NameResolver = Arc<dyn Fn(&SchemaUsage) -> String + Send + Sync>;

/// Documentation-side definition registry.
///
/// Collects every schema the generator references under its resolved name.
/// Registration is idempotent per name, so one schema used by several
/// controllers lands in `definitions` once.
pub struct SchemaPlugin {
    resolver: NameResolver,
    definitions: BTreeMap<String, Value>,
}

impl SchemaPlugin {
    pub fn new(name_resolver: Option<NameResolver>) -> Self {
        let resolver = name_resolver.unwrap_or_else(|| Arc::new(|u: &SchemaUsage| u.name.clone()));
        SchemaPlugin {
            resolver,
            definitions: BTreeMap::new(),
        }
    }

    /// Register a usage and return its resolved definition name.
    pub fn register(&mut self, usage: &SchemaUsage) -> String {
        let name = (self.resolver)(usage);
        self.definitions
            .entry(name.clone())
            .or_insert_with(|| usage.schema.clone());
        name
    }

    pub fn definitions(&self) -> &BTreeMap<String, Value> {
        &self.definitions
    }

    pub fn into_definitions(self) -> BTreeMap<String, Value> {
        self.definitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_deduplicates_by_resolved_name() {
        let mut plugin = SchemaPlugin::new(None);
        let usage = SchemaUsage {
            name: "User".to_string(),
            schema: json!({"type": "object"}),
        };
        assert_eq!(plugin.register(&usage), "User");
        assert_eq!(plugin.register(&usage), "User");
        assert_eq!(plugin.definitions().len(), 1);
    }

    #[test]
    fn test_custom_resolver_controls_names() {
        let resolver: NameResolver = Arc::new(|u: &SchemaUsage| format!("{}V2", u.name));
        let mut plugin = SchemaPlugin::new(Some(resolver));
        let usage = SchemaUsage {
            name: "User".to_string(),
            schema: json!({"type": "object"}),
        };
        assert_eq!(plugin.register(&usage), "UserV2");
    }
}
