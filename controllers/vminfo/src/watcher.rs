//! Kubernetes resource watcher.
//!
//! Drives the reconciler from `kube_runtime::Controller`, which serializes
//! reconciles per object, bounds concurrency and reconnects the watch. VM
//! state changes produce no Kubernetes events, so successful reconciles are
//! requeued after the resync interval.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::{ResourceKey, VmInfoStore};
use crds::VMInfo;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{
    controller::{self, Action, Config as ControllerConfig},
    watcher, Controller,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vsphere_client::VSphereClientTrait;

/// Quiet period after the last event before a reconcile starts
const DEBOUNCE: Duration = Duration::from_secs(2);

/// Scheduling settings for the watcher
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Deadline for a single reconcile
    pub reconcile_timeout: Duration,
    /// Requeue interval after success
    pub resync_interval: Duration,
    /// Maximum concurrent reconciles
    pub concurrency: u16,
    /// Error requeue delays
    pub backoff: FibonacciBackoff,
}

/// Consecutive failures of one resource
#[derive(Debug, Clone, Copy)]
struct ErrorRecord {
    count: u32,
    last: Instant,
}

/// Shared state handed to every reconcile by the controller runtime
pub struct Context<C, S> {
    reconciler: Reconciler<C, S>,
    shutdown: CancellationToken,
    settings: WatchSettings,
    /// Consecutive failures per resource, cleared on success or deletion
    error_counts: Mutex<HashMap<ResourceKey, ErrorRecord>>,
}

impl<C, S> std::fmt::Debug for Context<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("reconciler", &self.reconciler)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<C, S> Context<C, S> {
    /// Create the context; cancelling `shutdown` cancels in-flight reconciles
    pub fn new(reconciler: Reconciler<C, S>, shutdown: CancellationToken, settings: WatchSettings) -> Self {
        Self {
            reconciler,
            shutdown,
            settings,
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    /// The reconciler driven by this context
    pub fn reconciler(&self) -> &Reconciler<C, S> {
        &self.reconciler
    }

    fn error_counts(&self) -> MutexGuard<'_, HashMap<ResourceKey, ErrorRecord>> {
        self.error_counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Age after which a failure record belongs to a resource that is no
    /// longer being retried. A failing resource is requeued within the
    /// maximum backoff delay plus one reconcile.
    fn stale_after(&self) -> Duration {
        (self.settings.backoff.max_delay() + self.settings.reconcile_timeout) * 2
    }

    fn record_error(&self, key: &ResourceKey) -> u32 {
        self.record_error_at(key, Instant::now())
    }

    fn record_error_at(&self, key: &ResourceKey, now: Instant) -> u32 {
        let stale_after = self.stale_after();
        let mut counts = self.error_counts();
        counts.retain(|k, record| k == key || now.saturating_duration_since(record.last) < stale_after);

        let record = counts.entry(key.clone()).or_insert(ErrorRecord { count: 0, last: now });
        record.count = record.count.saturating_add(1);
        record.last = now;
        record.count
    }

    fn clear_errors(&self, key: &ResourceKey) {
        self.error_counts().remove(key);
    }

    /// Resources with a recorded failure
    #[cfg(test)]
    fn failing_resources(&self) -> usize {
        self.error_counts().len()
    }
}

fn resource_key(resource: &VMInfo) -> Result<ResourceKey, ControllerError> {
    ResourceKey::from_resource(resource)
        .ok_or_else(|| ControllerError::Watch("received VMInfo without namespace or name".to_string()))
}

/// Reconcile one resource under a deadline and translate the outcome into a
/// requeue action.
pub async fn reconcile<C, S>(resource: Arc<VMInfo>, ctx: Arc<Context<C, S>>) -> Result<Action, ControllerError>
where
    C: VSphereClientTrait,
    S: VmInfoStore,
{
    let key = resource_key(&resource)?;
    debug!("Reconciling VMInfo {}", key);

    let cancel = ctx.shutdown.child_token();
    {
        let cancel = cancel.clone();
        let timeout = ctx.settings.reconcile_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => cancel.cancel(),
            }
        });
    }
    // Stops the deadline task once this reconcile returns
    let _deadline_guard = cancel.clone().drop_guard();

    let result = ctx.reconciler.reconcile(&key, &cancel).await;

    match result {
        Ok(ReconcileOutcome::Deleted) => {
            ctx.clear_errors(&key);
            Ok(Action::await_change())
        }
        Ok(outcome) => {
            ctx.clear_errors(&key);
            debug!("Reconciled VMInfo {} ({:?})", key, outcome);
            Ok(Action::requeue(ctx.settings.resync_interval))
        }
        Err(ControllerError::Cancelled) if !ctx.shutdown.is_cancelled() => {
            warn!(
                "Reconcile of VMInfo {} exceeded {:?}",
                key, ctx.settings.reconcile_timeout
            );
            Err(ControllerError::Cancelled)
        }
        Err(e) => Err(e),
    }
}

/// Requeue a failed resource with Fibonacci backoff
pub fn error_policy<C, S>(resource: Arc<VMInfo>, error: &ControllerError, ctx: Arc<Context<C, S>>) -> Action {
    let Ok(key) = resource_key(&resource) else {
        error!("Reconciliation error for unnamed VMInfo: {}", error);
        return Action::requeue(ctx.settings.backoff.delay_for_error_count(1));
    };

    if !error.is_retryable() {
        error!("Reconciliation of VMInfo {} failed permanently: {}", key, error);
        return Action::await_change();
    }

    let count = ctx.record_error(&key);
    let delay = ctx.settings.backoff.delay_for_error_count(count);
    error!(
        "Reconciliation error for VMInfo {} (attempt {}), retrying in {:?}: {}",
        key, count, delay, error
    );
    Action::requeue(delay)
}

/// Watch VMInfo resources and reconcile them until `ctx`'s shutdown token is
/// cancelled.
pub async fn watch_vm_infos<C, S>(api: Api<VMInfo>, ctx: Arc<Context<C, S>>) -> Result<(), ControllerError>
where
    C: VSphereClientTrait + 'static,
    S: VmInfoStore + 'static,
{
    info!("Starting VMInfo watcher");

    let controller_config = ControllerConfig::default()
        .debounce(DEBOUNCE)
        .concurrency(ctx.settings.concurrency);
    let shutdown = ctx.shutdown.clone();
    let errors = Arc::clone(&ctx);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile::<C, S>, error_policy::<C, S>, ctx)
        .take_until(shutdown.cancelled_owned())
        .for_each(|res| {
            match res {
                Ok((object, _action)) => debug!("Reconciled {}", object.name),
                // Deleted before its requeue fired
                Err(controller::Error::ObjectNotFound(object)) => {
                    debug!("VMInfo {} is gone, dropping its failure count", object.name);
                    if let Some(namespace) = object.namespace {
                        errors.clear_errors(&ResourceKey::new(namespace, object.name));
                    }
                }
                Err(e) => warn!("VMInfo controller error: {}", e),
            }
            futures::future::ready(())
        })
        .await;

    info!("VMInfo watcher stopped");
    Ok(())
}
