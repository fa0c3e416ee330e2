//! Data-source processors

pub mod wikipedia;

pub use wikipedia::WikipediaPageviewsProcessor;

use std::sync::Arc;

use crate::registry::ProcessorRegistry;

/// Registry holding every processor shipped with this crate
pub fn default_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(WikipediaPageviewsProcessor::new()));
    registry
}
