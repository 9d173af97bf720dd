mod registry;
mod selectors;

pub use registry::{ModelCapability, ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
