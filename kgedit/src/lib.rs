pub mod api;
pub mod config;
pub mod error;
pub mod field;
pub mod instance;
pub mod schema;
pub mod store;

pub use api::{Api, MemoryApi, MemoryFixture};
pub use config::EditorConfig;
pub use error::{KgError, RequestError, Result};
pub use field::{FieldContext, FieldStore, WidgetRegistry};
pub use instance::{FetchError, FetchState, Instance};
pub use schema::{FieldDefinition, TypeDefinition, TypeRegistry};
pub use store::{InstanceHandle, InstanceStore, QueueKind};
