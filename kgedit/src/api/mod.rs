//! Collaborator contract: the backend operations the instance store consumes.
//!
//! Only the shape of each call matters here; transports implement [`Api`].
//! [`MemoryApi`] is an in-memory backend used by the CLI and by tests.

pub mod memory;
pub mod types;

pub use memory::{MemoryApi, MemoryFixture, StoredInstance};
pub use types::*;

use crate::error::RequestError;
use crate::field::SuggestionResponse;
use async_trait::async_trait;
use serde_json::Value;

pub type ApiResult<T> = std::result::Result<T, RequestError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Api: Send + Sync {
    /// Batched full fetch
    async fn get_instances_list(&self, stage: &str, ids: &[String]) -> ApiResult<BatchResponse>;

    /// Batched label fetch (identity, name and types only)
    async fn get_instances_label(&self, stage: &str, ids: &[String]) -> ApiResult<BatchResponse>;

    async fn get_suggestions(&self, request: SuggestionRequest) -> ApiResult<SuggestionResponse>;

    async fn create_instance(&self, space: &str, id: &str, payload: Value) -> ApiResult<RawInstance>;

    async fn patch_instance(&self, id: &str, payload: Value) -> ApiResult<RawInstance>;

    async fn get_raw_instance(&self, id: &str) -> ApiResult<RawInstanceData>;

    async fn get_more_incoming_links(
        &self,
        id: &str,
        property: &str,
        type_name: &str,
        from: usize,
        size: usize,
    ) -> ApiResult<IncomingLinkPage>;
}
