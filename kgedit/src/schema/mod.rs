pub mod registry;
pub mod types;

pub use registry::TypeRegistry;
pub use types::*;
