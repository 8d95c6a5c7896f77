//! Processing components and the component registry.
//!
//! A component is a named, parameterized stream transformation. The
//! registry maps stable component ids to components; it is populated once
//! at startup (see [`crate::components::register_all_components`]) and only
//! read afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ComponentRegistry              │
//! │  ┌─────────┐ ┌──────────┐ ┌───────────┐  │
//! │  │  HTML   │ │Tokenizers│ │  Phrases  │  │
//! │  │Preproc. │ │Stopwords │ │ (cached)  │  │
//! │  └─────────┘ └──────────┘ └───────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        build_pipeline() → DocStream
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;
use crate::models::{ParamValue, Params};
use crate::pipeline::Env;
use crate::stream::DocStream;

/// Stable component id derived from the defining module and function name,
/// e.g. `corpus_pipeline_components_html_process`.
///
/// Stored pipelines reference components by this id, so it must not depend
/// on registration order or anything else that varies between runs.
pub fn component_id(module_path: &str, name: &str) -> String {
    format!("{}_{}", module_path, name).replace("::", "_")
}

/// Type of a component parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Bool,
    Int { min: Option<i64> },
    Float,
    Str,
    /// One of a fixed set of `(value, label)` choices.
    Choice { values: Vec<(String, String)> },
}

/// A single declared parameter with its default.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub title: String,
    pub description: String,
    pub kind: ParamKind,
    pub default: ParamValue,
}

impl ParamSpec {
    pub fn new(name: &str, title: &str, kind: ParamKind, default: impl Into<ParamValue>) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: String::new(),
            kind,
            default: default.into(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Typed, lenient reads of step parameters.
///
/// Missing or mistyped values fall back to the default; unknown keys are
/// never looked at.
pub trait ParamsExt {
    fn str_or(&self, key: &str, default: &str) -> String;
    fn int_or(&self, key: &str, default: i64) -> i64;
    fn float_or(&self, key: &str, default: f64) -> f64;
    fn bool_or(&self, key: &str, default: bool) -> bool;
}

impl ParamsExt for Params {
    fn str_or(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(ParamValue::Str(s)) => s.clone(),
            Some(ParamValue::Int(i)) => i.to_string(),
            Some(ParamValue::Float(f)) => f.to_string(),
            Some(ParamValue::Bool(b)) => b.to_string(),
            None => default.to_string(),
        }
    }

    fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(ParamValue::as_i64).unwrap_or(default)
    }

    fn float_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(ParamValue::as_f64).unwrap_or(default)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(ParamValue::as_bool).unwrap_or(default)
    }
}

/// A registered pipeline component.
///
/// `transform` is called once per pipeline build and returns a lazy stream;
/// no document is pulled until the caller iterates. Work that must happen
/// before streaming (cache lookups, job scheduling) happens in the async
/// body.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use corpus_pipeline::component::Component;
/// use corpus_pipeline::models::Params;
/// use corpus_pipeline::pipeline::Env;
/// use corpus_pipeline::stream::{map_documents, DocStream};
///
/// pub struct Shout;
///
/// #[async_trait]
/// impl Component for Shout {
///     fn id(&self) -> &str { "shout" }
///     fn title(&self) -> &str { "Upper-case everything" }
///
///     async fn transform(&self, content: DocStream, _env: &Env, _params: &Params) -> Result<DocStream> {
///         Ok(map_documents(content, "shout", |doc| Ok(doc.with_text(doc.text.to_uppercase()))))
///     }
/// }
/// ```
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable id, see [`component_id`].
    fn id(&self) -> &str;

    /// Display title for component pickers.
    fn title(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Declared parameters with defaults.
    fn schema(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Wrap `content` in this component's transformation.
    async fn transform(&self, content: DocStream, env: &Env, params: &Params) -> Result<DocStream>;
}

/// Serializable description of a registered component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// Registry of pipeline components, in registration order.
pub struct ComponentRegistry {
    components: Vec<Box<dyn Component>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a registry holding every built-in component.
    pub fn with_builtins() -> Result<Self, PipelineError> {
        let mut registry = Self::new();
        crate::components::register_all_components(&mut registry)?;
        Ok(registry)
    }

    /// Register a component. Ids must be unique.
    pub fn register(&mut self, component: Box<dyn Component>) -> Result<(), PipelineError> {
        if self.lookup(component.id()).is_some() {
            return Err(PipelineError::DuplicateComponent(component.id().to_string()));
        }
        self.components.push(component);
        Ok(())
    }

    /// Find a component by id.
    pub fn lookup(&self, id: &str) -> Option<&dyn Component> {
        self.components
            .iter()
            .find(|c| c.id() == id)
            .map(|c| c.as_ref())
    }

    /// All components, in registration order.
    pub fn all(&self) -> &[Box<dyn Component>] {
        &self.components
    }

    pub fn describe(&self) -> Vec<ComponentInfo> {
        self.components
            .iter()
            .map(|c| ComponentInfo {
                id: c.id().to_string(),
                title: c.title().to_string(),
                description: c.description().to_string(),
                params: c.schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Component for Noop {
        fn id(&self) -> &str {
            self.0
        }
        fn title(&self) -> &str {
            "noop"
        }
        async fn transform(
            &self,
            content: DocStream,
            _env: &Env,
            _params: &Params,
        ) -> Result<DocStream> {
            Ok(content)
        }
    }

    #[test]
    fn component_ids_are_derived_from_module_and_name() {
        assert_eq!(
            component_id("corpus_pipeline::components::html", "process"),
            "corpus_pipeline_components_html_process"
        );
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = ComponentRegistry::new();
        registry.register(Box::new(Noop("a"))).unwrap();
        let err = registry.register(Box::new(Noop("a"))).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateComponent(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_keeps_insertion_order() {
        let mut registry = ComponentRegistry::new();
        for id in ["z", "a", "m"] {
            registry.register(Box::new(Noop(id))).unwrap();
        }
        let ids: Vec<&str> = registry.all().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
        assert!(registry.lookup("m").is_some());
        assert!(registry.lookup("q").is_none());
    }

    #[test]
    fn builtins_register_without_conflicts() {
        let registry = ComponentRegistry::with_builtins().unwrap();
        assert!(registry.len() >= 8);
        let ids: Vec<&str> = registry.all().iter().map(|c| c.id()).collect();
        assert!(ids.iter().all(|id| id.starts_with("corpus_pipeline_")));
    }

    #[test]
    fn params_read_leniently() {
        let mut p = Params::new();
        p.insert("n".into(), ParamValue::from("7"));
        p.insert("flag".into(), ParamValue::Bool(true));
        assert_eq!(p.int_or("n", 1), 7);
        assert_eq!(p.int_or("missing", 1), 1);
        assert!(p.bool_or("flag", false));
        assert_eq!(p.str_or("n", "x"), "7");
        assert_eq!(p.float_or("n", 0.0), 7.0);
    }
}
