mod dryrun;
mod gemini;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use crate::config::StudioConfig;
use crate::request::CompositeRequest;
use crate::response::BackendReply;

pub use dryrun::DryrunBackend;
pub use gemini::GeminiBackend;

/// A model host that answers one composite request with one reply.
pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, model: &str, request: &CompositeRequest) -> Result<BackendReply>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn GenerativeBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: GenerativeBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerativeBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &StudioConfig) -> Result<BackendRegistry> {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(GeminiBackend::from_config(config)?);
    Ok(backends)
}
