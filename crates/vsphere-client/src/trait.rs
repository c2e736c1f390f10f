//! VSphereClient trait for mocking
//!
//! This trait abstracts the VSphereClient to enable mocking in unit tests.
//! The concrete VSphereClient implements this trait, and tests can use mock implementations.

use crate::error::VSphereError;
use crate::models::*;

/// Trait for vSphere API client operations
///
/// Every call except `login` is made on behalf of an existing [`Session`].
/// A rejected session is reported as [`VSphereError::Authentication`].
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait VSphereClientTrait: Send + Sync {
    /// Log in and return a new session
    async fn login(&self, credentials: &Credentials) -> Result<Session, VSphereError>;

    /// Terminate a session
    async fn logout(&self, session: &Session) -> Result<(), VSphereError>;

    /// Create a container view over `container` listing objects of `types`
    async fn create_container_view(
        &self,
        session: &Session,
        container: &ManagedObjectReference,
        types: &[&str],
        recursive: bool,
    ) -> Result<ManagedObjectReference, VSphereError>;

    /// Retrieve the first page of VM summaries reachable through `view`
    async fn retrieve_vm_summaries(
        &self,
        session: &Session,
        view: &ManagedObjectReference,
    ) -> Result<RetrievePage, VSphereError>;

    /// Retrieve the next page for a continuation token
    async fn continue_retrieve(&self, session: &Session, token: &str) -> Result<RetrievePage, VSphereError>;

    /// Discard a continuation token without reading the remaining pages
    async fn cancel_retrieve(&self, session: &Session, token: &str) -> Result<(), VSphereError>;

    /// Destroy a view created by `create_container_view`
    async fn destroy_view(&self, session: &Session, view: &ManagedObjectReference) -> Result<(), VSphereError>;
}
