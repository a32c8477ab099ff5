//! In-memory dependency source for callers that already know the graph.

use crate::domain::errors::LoaderError;
use crate::ports::outbound::DependencySource;
use shared_types::ModuleDescriptor;
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct StaticDependencySource {
    dependencies: HashMap<String, Vec<String>>,
}

impl StaticDependencySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, module: &str, dependencies: &[&str]) -> Self {
        self.insert(module, dependencies.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn insert(&mut self, module: &str, dependencies: Vec<String>) {
        self.dependencies.insert(module.to_string(), dependencies);
    }
}

impl DependencySource for StaticDependencySource {
    fn dependencies(&self, descriptor: &ModuleDescriptor) -> Result<Vec<String>, LoaderError> {
        Ok(self
            .dependencies
            .get(&descriptor.name)
            .cloned()
            .unwrap_or_default())
    }
}
