mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, IMAGE_CAPABILITY, TEXT_CAPABILITY};
pub use selectors::{ModelSelection, ModelSelector};
