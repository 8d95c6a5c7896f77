//! Built-in pipeline components.
//!
//! Each submodule defines one component. Component ids are derived from the
//! module path (see [`crate::component::component_id`]), so moving a
//! component to another module changes its id and breaks stored pipelines.

pub mod html;
pub mod limit;
pub mod preprocess;
pub mod regex_tokenizer;
pub mod sentiment;
pub mod simple_tokenizer;
pub mod stopwords;

use crate::component::ComponentRegistry;
use crate::error::PipelineError;
use crate::phrases::component::PhraseFinder;

/// Register every built-in component. Registration order is the order
/// component pickers list them in.
pub fn register_all_components(registry: &mut ComponentRegistry) -> Result<(), PipelineError> {
    registry.register(Box::new(html::HtmlStrip::new()))?;
    registry.register(Box::new(preprocess::Preprocess::new()))?;
    registry.register(Box::new(simple_tokenizer::SimpleTokenizer::new()))?;
    registry.register(Box::new(regex_tokenizer::RegexTokenizer::new()))?;
    registry.register(Box::new(stopwords::StopWords::new()))?;
    registry.register(Box::new(limit::Limit::new()))?;
    registry.register(Box::new(sentiment::SentimentFilter::new()))?;
    registry.register(Box::new(PhraseFinder::new()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_order_is_stable() {
        let mut registry = ComponentRegistry::new();
        register_all_components(&mut registry).unwrap();
        let ids: Vec<&str> = registry.all().iter().map(|c| c.id()).collect();
        assert_eq!(
            ids,
            vec![
                "corpus_pipeline_components_html_process",
                "corpus_pipeline_components_preprocess_process",
                "corpus_pipeline_components_simple_tokenizer_process",
                "corpus_pipeline_components_regex_tokenizer_process",
                "corpus_pipeline_components_stopwords_process",
                "corpus_pipeline_components_limit_process",
                "corpus_pipeline_components_sentiment_process",
                "corpus_pipeline_phrases_component_process",
            ]
        );
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = ComponentRegistry::new();
        register_all_components(&mut registry).unwrap();
        assert!(matches!(
            register_all_components(&mut registry),
            Err(PipelineError::DuplicateComponent(_))
        ));
    }
}
