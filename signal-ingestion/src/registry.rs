//! Processor registry
//!
//! Built once at startup by explicit registration, then shared read-only
//! behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use common::{Company, SignalCategory};

use crate::processor::Processor;

/// Mapping `signal_type -> processor`, iterated in signal-type order
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its signal type, replacing any previous one
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        let signal_type = processor.metadata().signal_type.clone();
        if self.processors.contains_key(&signal_type) {
            warn!(processor = %signal_type, "Replacing already registered processor");
        } else {
            info!(processor = %signal_type, "Registered processor");
        }
        self.processors.insert(signal_type, processor);
    }

    pub fn get(&self, signal_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(signal_type).cloned()
    }

    pub fn exists(&self, signal_type: &str) -> bool {
        self.processors.contains_key(signal_type)
    }

    pub fn list_all(&self) -> Vec<Arc<dyn Processor>> {
        self.processors.values().cloned().collect()
    }

    /// Processors whose applicability predicate accepts the company
    pub fn list_applicable(&self, company: &Company) -> Vec<Arc<dyn Processor>> {
        self.processors
            .values()
            .filter(|p| p.is_applicable(company))
            .cloned()
            .collect()
    }

    pub fn list_by_category(&self, category: SignalCategory) -> Vec<Arc<dyn Processor>> {
        self.processors
            .values()
            .filter(|p| p.metadata().category == category)
            .cloned()
            .collect()
    }

    pub fn signal_types(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
