//! vSphere API Client
//!
//! A Rust client library for the vSphere VI/JSON API, scoped to what an
//! inventory controller needs: authenticated sessions and virtual machine
//! summaries.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vsphere_client::{
//!     list_virtual_machine_summaries, ClientOptions, Credentials, SessionProvider, VSphereClient,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VSphereClient::new(ClientOptions::default())?;
//! let provider = Arc::new(SessionProvider::new(client));
//!
//! let credentials = Credentials::from_url("vc.example.com", Some("admin".to_string()), Some("secret".to_string()))?;
//! let cancel = CancellationToken::new();
//!
//! // Re-authenticates once if the cached session was rejected
//! let vms = provider
//!     .with_session(&credentials, &cancel, |session| {
//!         let provider = Arc::clone(&provider);
//!         let cancel = cancel.clone();
//!         async move { list_virtual_machine_summaries(provider.client(), &session, &cancel).await }
//!     })
//!     .await?;
//!
//! for vm in vms {
//!     println!("{} cpus={} memory={}MB", vm.name, vm.num_cpu, vm.memory_size_mb);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Session caching**: one login per endpoint and user, shared across callers
//! - **Single-flight re-authentication**: concurrent callers that hit a stale session trigger one login
//! - **Paged retrieval**: follows continuation cursors until the inventory is drained
//! - **Cancellation**: views and cursors are released even when a listing is cancelled

pub mod cancel;
pub mod client;
pub mod error;
pub mod inventory;
pub mod models;
pub mod session;
#[path = "trait.rs"]
pub mod vsphere_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cancel::cancellable;
pub use client::{ClientOptions, VSphereClient, DEFAULT_API_RELEASE, DEFAULT_PAGE_SIZE, SESSION_HEADER};
pub use error::VSphereError;
pub use inventory::list_virtual_machine_summaries;
pub use models::*;
pub use session::SessionProvider;
pub use vsphere_trait::VSphereClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockVSphereClient;
