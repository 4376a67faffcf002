//! Per-entry options.
//!
//! Options are immutable once bound and shared behind an `Arc`, so the same
//! definition can govern many entries and sub-collections. Named
//! definitions are registered on the engine or on a single instance and
//! resolved lazily, which allows a definition to name itself as a sub.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tessera_core::{Fields, StoreError};
use tessera_store::Query;

pub type QueryFn = Arc<dyn Fn(Query) -> Query + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&StoreError) + Send + Sync>;
/// Initial fields of a freshly created record's document.
pub type DocumentFactory = Arc<dyn Fn() -> Fields + Send + Sync>;

/// Value applied to a field when a document is built locally.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Generated(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Generated(generate) => generate(),
        }
    }
}

impl From<Value> for DefaultValue {
    fn from(value: Value) -> Self {
        DefaultValue::Value(value)
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultValue::Generated(_) => f.write_str("Generated"),
        }
    }
}

/// How a bind or sub-collection names its options.
#[derive(Debug, Clone, Default)]
pub enum OptionsInput {
    #[default]
    Default,
    Named(String),
    Inline(Arc<EntryOptions>),
}

impl From<&str> for OptionsInput {
    fn from(name: &str) -> Self {
        OptionsInput::Named(name.to_string())
    }
}

impl From<String> for OptionsInput {
    fn from(name: String) -> Self {
        OptionsInput::Named(name)
    }
}

impl From<EntryOptions> for OptionsInput {
    fn from(options: EntryOptions) -> Self {
        OptionsInput::Inline(Arc::new(options))
    }
}

impl From<Arc<EntryOptions>> for OptionsInput {
    fn from(options: Arc<EntryOptions>) -> Self {
        OptionsInput::Inline(options)
    }
}

#[derive(Clone, Default)]
pub struct EntryOptions {
    /// Field that receives the document id.
    pub key: Option<String>,
    pub query: Option<QueryFn>,
    /// Query run backwards from the first cursor when paging back.
    pub query_reverse: Option<QueryFn>,
    /// Project queries into a mapping keyed by document id.
    pub map: bool,
    /// Sub-collections with these options are single documents.
    pub doc: bool,
    /// Read once instead of subscribing.
    pub once: bool,
    pub stream: bool,
    pub stream_initial: Option<usize>,
    pub stream_more: Option<usize>,
    /// Destroy the record when a bound document goes missing.
    pub nullify_missing: bool,
    /// Field that mirrors remote existence.
    pub prop_exists: Option<String>,
    /// Field that receives non-object values; the engine default when unset.
    pub prop_value: Option<String>,
    /// Fields encoded on writes. All fields when unset.
    pub include: Option<Vec<String>>,
    pub exclude: BTreeSet<String>,
    pub defaults: BTreeMap<String, DefaultValue>,
    pub sub: BTreeMap<String, OptionsInput>,
    pub new_document: Option<DocumentFactory>,
    pub on_error: Option<ErrorHook>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, field: impl Into<String>) -> Self {
        self.key = Some(field.into());
        self
    }

    pub fn query(mut self, query: impl Fn(Query) -> Query + Send + Sync + 'static) -> Self {
        self.query = Some(Arc::new(query));
        self
    }

    pub fn query_reverse(mut self, query: impl Fn(Query) -> Query + Send + Sync + 'static) -> Self {
        self.query_reverse = Some(Arc::new(query));
        self
    }

    pub fn map(mut self) -> Self {
        self.map = true;
        self
    }

    pub fn doc(mut self) -> Self {
        self.doc = true;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn stream(mut self, initial: usize, more: usize) -> Self {
        self.stream = true;
        self.stream_initial = Some(initial);
        self.stream_more = Some(more);
        self
    }

    /// Stream using the engine's default window sizes.
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn nullify_missing(mut self) -> Self {
        self.nullify_missing = true;
        self
    }

    pub fn prop_exists(mut self, field: impl Into<String>) -> Self {
        self.prop_exists = Some(field.into());
        self
    }

    pub fn prop_value(mut self, field: impl Into<String>) -> Self {
        self.prop_value = Some(field.into());
        self
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn default_value(mut self, field: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(field.into(), DefaultValue::Value(value));
        self
    }

    pub fn default_with(
        mut self,
        field: impl Into<String>,
        generate: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.defaults
            .insert(field.into(), DefaultValue::Generated(Arc::new(generate)));
        self
    }

    pub fn sub(mut self, name: impl Into<String>, options: impl Into<OptionsInput>) -> Self {
        self.sub.insert(name.into(), options.into());
        self
    }

    /// Seeds every record this entry creates with the factory's fields.
    /// Remote fields of the same name win once a snapshot arrives.
    pub fn new_document(mut self, factory: impl Fn() -> Fields + Send + Sync + 'static) -> Self {
        self.new_document = Some(Arc::new(factory));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&StoreError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub(crate) fn resolve_query(&self, source: Query) -> Query {
        match &self.query {
            Some(query) => query(source),
            None => source,
        }
    }

    pub(crate) fn prop_value_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.prop_value.as_deref().unwrap_or(fallback)
    }
}

impl fmt::Debug for EntryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryOptions")
            .field("key", &self.key)
            .field("query", &self.query.is_some())
            .field("query_reverse", &self.query_reverse.is_some())
            .field("map", &self.map)
            .field("doc", &self.doc)
            .field("once", &self.once)
            .field("stream", &self.stream)
            .field("stream_initial", &self.stream_initial)
            .field("stream_more", &self.stream_more)
            .field("nullify_missing", &self.nullify_missing)
            .field("prop_exists", &self.prop_exists)
            .field("prop_value", &self.prop_value)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("defaults", &self.defaults)
            .field("sub", &self.sub.keys().collect::<Vec<_>>())
            .field("new_document", &self.new_document.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tessera_store::{Direction, FilterOp};

    #[test]
    fn test_builder_sets_fields() {
        let options = EntryOptions::new()
            .key("id")
            .map()
            .stream(5, 2)
            .prop_exists("$exists")
            .exclude(["draft"])
            .sub("comments", "comment")
            .sub("settings", EntryOptions::new().doc());

        assert_eq!(options.key.as_deref(), Some("id"));
        assert!(options.map && options.stream);
        assert_eq!(options.stream_initial, Some(5));
        assert!(options.exclude.contains("draft"));
        assert!(matches!(options.sub.get("comments"), Some(OptionsInput::Named(n)) if n == "comment"));
        assert!(matches!(options.sub.get("settings"), Some(OptionsInput::Inline(o)) if o.doc));
    }

    #[test]
    fn test_resolve_query_applies_modifier() {
        let options = EntryOptions::new().query(|q| q.filter("done", FilterOp::Eq, json!(false)));
        let base = Query::collection("todos");
        assert_ne!(options.resolve_query(base.clone()), base);
        assert_eq!(EntryOptions::new().resolve_query(base.clone()), base);

        let ordered = EntryOptions::new().query(|q| q.order_by("rank", Direction::Ascending));
        assert_eq!(ordered.resolve_query(base).ordering().len(), 1);
    }

    #[test]
    fn test_generated_defaults_run_each_time() {
        let counter = Arc::new(AtomicU64::new(0));
        let source = Arc::clone(&counter);
        let options = EntryOptions::new()
            .default_value("done", json!(false))
            .default_with("seq", move || json!(source.fetch_add(1, Ordering::SeqCst)));

        let seq = &options.defaults["seq"];
        assert_eq!(seq.produce(), json!(0));
        assert_eq!(seq.produce(), json!(1));
        assert_eq!(options.defaults["done"].produce(), json!(false));
    }

    #[test]
    fn test_prop_value_fallback() {
        assert_eq!(EntryOptions::new().prop_value_or(".value"), ".value");
        assert_eq!(EntryOptions::new().prop_value("v").prop_value_or(".value"), "v");
    }
}
