//! Virtual machine inventory listing
//!
//! Lists every virtual machine under the root folder through a recursive
//! container view. The view and any outstanding retrieval cursor are
//! server-side objects bound to the session, so they are released on every
//! exit path: success, error and cancellation.

use crate::cancel::cancellable;
use crate::error::VSphereError;
use crate::models::{ManagedObjectReference, Session, VmSummary};
use crate::vsphere_trait::VSphereClientTrait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Managed object type listed by [`list_virtual_machine_summaries`]
pub const VIRTUAL_MACHINE_TYPE: &str = "VirtualMachine";

/// Upper bound on releasing a view after the listing finished or was cancelled
pub const VIEW_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// List the summary of every virtual machine visible to `session`.
///
/// Order follows the server. Objects without a configured name are skipped.
/// If `cancel` fires, the call returns [`VSphereError::Cancelled`] after
/// releasing what it created.
pub async fn list_virtual_machine_summaries<C>(
    client: &C,
    session: &Session,
    cancel: &CancellationToken,
) -> Result<Vec<VmSummary>, VSphereError>
where
    C: VSphereClientTrait + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(VSphereError::Cancelled);
    }

    let create = client.create_container_view(session, &session.content.root_folder, &[VIRTUAL_MACHINE_TYPE], true);
    tokio::pin!(create);
    let view = tokio::select! {
        biased;
        result = &mut create => result?,
        () = cancel.cancelled() => {
            // The server may still create the view after we stop waiting
            settle_cancelled_create(client, session, create).await;
            return Err(VSphereError::Cancelled);
        }
    };
    debug!("Created container view {}", view);

    let mut cursor: Option<String> = None;
    let result = collect_pages(client, session, &view, &mut cursor, cancel).await;

    release(client, session, &view, cursor.as_deref()).await;

    let summaries = result?;
    debug!("Listed {} virtual machines", summaries.len());
    Ok(summaries)
}

/// Let an abandoned view creation finish, bounded by [`VIEW_RELEASE_TIMEOUT`],
/// and destroy the view it produced
async fn settle_cancelled_create<C, F>(client: &C, session: &Session, create: F)
where
    C: VSphereClientTrait + ?Sized,
    F: std::future::Future<Output = Result<ManagedObjectReference, VSphereError>>,
{
    match tokio::time::timeout(VIEW_RELEASE_TIMEOUT, create).await {
        Ok(Ok(view)) => {
            debug!("Destroying container view {} created after cancellation", view);
            release(client, session, &view, None).await;
        }
        Ok(Err(e)) => debug!("Container view creation failed after cancellation: {}", e),
        Err(_) => warn!(
            "Container view creation did not finish within {:?} after cancellation",
            VIEW_RELEASE_TIMEOUT
        ),
    }
}

/// Drain all pages, keeping `cursor` pointed at the outstanding continuation
async fn collect_pages<C>(
    client: &C,
    session: &Session,
    view: &ManagedObjectReference,
    cursor: &mut Option<String>,
    cancel: &CancellationToken,
) -> Result<Vec<VmSummary>, VSphereError>
where
    C: VSphereClientTrait + ?Sized,
{
    let page = cancellable(cancel, client.retrieve_vm_summaries(session, view)).await?;
    let mut summaries = page.summaries;
    *cursor = page.token;

    while let Some(token) = cursor.clone() {
        let page = cancellable(cancel, client.continue_retrieve(session, &token)).await?;
        summaries.extend(page.summaries);
        *cursor = page.token;
    }

    Ok(summaries)
}

/// Cancel the outstanding cursor (if any) and destroy the view.
///
/// Runs regardless of the caller's cancellation but is bounded by
/// [`VIEW_RELEASE_TIMEOUT`]. Failures are logged, never returned.
async fn release<C>(client: &C, session: &Session, view: &ManagedObjectReference, cursor: Option<&str>)
where
    C: VSphereClientTrait + ?Sized,
{
    let cleanup = async {
        if let Some(token) = cursor {
            if let Err(e) = client.cancel_retrieve(session, token).await {
                warn!("Failed to cancel retrieval cursor on {}: {}", view, e);
            }
        }
        if let Err(e) = client.destroy_view(session, view).await {
            warn!("Failed to destroy container view {}: {}", view, e);
        }
    };

    if tokio::time::timeout(VIEW_RELEASE_TIMEOUT, cleanup).await.is_err() {
        warn!(
            "Releasing container view {} timed out after {:?}",
            view, VIEW_RELEASE_TIMEOUT
        );
    }
}
