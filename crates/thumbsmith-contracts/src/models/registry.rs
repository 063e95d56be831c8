use indexmap::IndexMap;

pub const TEXT_CAPABILITY: &str = "text";
pub const IMAGE_CAPABILITY: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models in preference order; the first model with a capability is
/// that capability's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("gemini-2.5-flash", "gemini", &[TEXT_CAPABILITY]);
    insert("gemini-2.5-pro", "gemini", &[TEXT_CAPABILITY]);
    insert("gemini-2.5-flash-image", "gemini", &[IMAGE_CAPABILITY]);
    insert("gemini-3-pro-image-preview", "gemini", &[IMAGE_CAPABILITY]);
    insert("dryrun-text", "dryrun", &[TEXT_CAPABILITY]);
    insert("dryrun-image", "dryrun", &[IMAGE_CAPABILITY]);

    map
}
