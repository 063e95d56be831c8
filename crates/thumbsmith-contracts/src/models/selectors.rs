use anyhow::{bail, Result};

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Resolves a requested model name for a capability, falling back to the
/// first usable registry entry. With `restricted_to`, models whose provider
/// has no backend are never chosen.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
    providers: Option<Vec<String>>,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
            providers: None,
        }
    }

    pub fn restricted_to(mut self, providers: Vec<String>) -> Self {
        self.providers = Some(providers);
        self
    }

    fn has_provider(&self, model: &ModelSpec) -> bool {
        self.providers
            .as_ref()
            .map(|providers| providers.iter().any(|name| name == &model.provider))
            .unwrap_or(true)
    }

    pub fn select(&self, requested: Option<&str>, capability: &str) -> Result<ModelSelection> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = requested.and_then(|name| match self.registry.get(name) {
            None => Some(format!("Unknown model '{name}'.")),
            Some(model) if !model.supports(capability) => Some(format!(
                "Model '{name}' cannot produce {capability} output."
            )),
            Some(model) if !self.has_provider(model) => Some(format!(
                "No backend available for provider '{}' of model '{name}'.",
                model.provider
            )),
            Some(_) => None,
        });

        if let (Some(name), None) = (requested, fallback_reason.as_ref()) {
            if let Some(model) = self.registry.get(name) {
                return Ok(ModelSelection {
                    model: model.clone(),
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
        }

        let Some(model) = self
            .registry
            .by_capability(capability)
            .into_iter()
            .find(|model| self.has_provider(model))
        else {
            bail!("No models available for capability '{capability}'.");
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: fallback_reason
                .map(|reason| format!("{reason} Using default for {capability}.")),
        })
    }
}
