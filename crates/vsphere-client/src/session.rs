//! Session cache
//!
//! [`SessionProvider`] owns the logged-in sessions of a process. Sessions are
//! keyed by `(endpoint, username)` and shared by every reconcile.
//!
//! The cache lock is only held to look up or publish a session. Logins for
//! the same key are single-flight: callers queue on a per-key gate and re-check
//! the cache once they hold it, so a burst of callers that all found a stale
//! session produces one login, not one per caller. A rejected login is handed
//! to the callers that queued behind it instead of being repeated by each.

use crate::cancel::cancellable;
use crate::error::VSphereError;
use crate::models::{Credentials, Session, SessionKey};
use crate::vsphere_trait::VSphereClientTrait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-key login serialization
#[derive(Debug, Default)]
struct LoginGate {
    /// Finished login attempts; readable before queueing on `last_failure`
    completed: AtomicU64,
    last_failure: Mutex<Option<LoginFailure>>,
}

/// The most recent rejected login for a key
#[derive(Debug)]
struct LoginFailure {
    /// Value of `completed` once this attempt finished
    attempt: u64,
    error: VSphereError,
}

/// Caches authenticated sessions and re-authenticates on rejection.
#[derive(Debug)]
pub struct SessionProvider<C> {
    client: C,
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    login_gates: Mutex<HashMap<SessionKey, Arc<LoginGate>>>,
}

impl<C: VSphereClientTrait> SessionProvider<C> {
    /// Create a provider with an empty cache
    pub fn new(client: C) -> Self {
        Self {
            client,
            sessions: RwLock::new(HashMap::new()),
            login_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn cached(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().await.get(key).cloned()
    }

    async fn login_gate(&self, key: &SessionKey) -> Arc<LoginGate> {
        let mut gates = self.login_gates.lock().await;
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    /// Return the cached session for these credentials, logging in if there
    /// is none.
    ///
    /// A login that fails while this caller waits for the gate is returned to
    /// it as well; only callers arriving after that failure try again.
    pub async fn get_session(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Arc<Session>, VSphereError> {
        let key = credentials.session_key();

        if let Some(session) = self.cached(&key).await {
            debug!("Reusing cached session for {}", key);
            return Ok(session);
        }

        let gate = self.login_gate(&key).await;
        let seen = gate.completed.load(Ordering::Acquire);
        let mut last_failure = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(VSphereError::Cancelled),
            guard = gate.last_failure.lock() => guard,
        };

        // Another caller may have logged in while we waited on the gate
        if let Some(session) = self.cached(&key).await {
            debug!("Session for {} was established by a concurrent caller", key);
            return Ok(session);
        }
        if let Some(failure) = last_failure.as_ref().filter(|f| f.attempt > seen) {
            debug!("Login for {} was rejected for a concurrent caller", key);
            return Err(failure.error.duplicate());
        }

        info!("Logging in to {} as {}", credentials.endpoint, credentials.username);
        match cancellable(cancel, self.client.login(credentials)).await {
            Ok(session) => {
                let session = Arc::new(session);
                self.sessions.write().await.insert(key, Arc::clone(&session));
                *last_failure = None;
                gate.completed.fetch_add(1, Ordering::AcqRel);
                Ok(session)
            }
            // Cancellation belongs to this caller; waiters try for themselves
            Err(VSphereError::Cancelled) => Err(VSphereError::Cancelled),
            Err(e) => {
                let attempt = gate.completed.fetch_add(1, Ordering::AcqRel) + 1;
                *last_failure = Some(LoginFailure {
                    attempt,
                    error: e.duplicate(),
                });
                Err(e)
            }
        }
    }

    /// Drop `session` from the cache if it is still the cached one.
    ///
    /// Returns `false` when the cache already holds a different session for
    /// the key (a concurrent caller re-authenticated first).
    pub async fn invalidate(&self, session: &Session) -> bool {
        let key = session.key();
        let mut sessions = self.sessions.write().await;
        match sessions.get(&key) {
            Some(current) if current.token == session.token => {
                sessions.remove(&key);
                debug!("Invalidated session for {}", key);
                true
            }
            _ => false,
        }
    }

    /// Run `op` with a session for `credentials`.
    ///
    /// If the login or `op` fails with [`VSphereError::Authentication`], the
    /// session is invalidated and the whole sequence is tried exactly once
    /// more. A second failure is returned as is. Other errors are never
    /// retried.
    pub async fn with_session<T, F, Fut>(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, VSphereError>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, VSphereError>>,
    {
        let mut reauthenticated = false;

        loop {
            let result = match self.get_session(credentials, cancel).await {
                Ok(session) => match op(Arc::clone(&session)).await {
                    Err(e) if e.is_authentication() => {
                        self.invalidate(&session).await;
                        Err(e)
                    }
                    other => other,
                },
                Err(e) => Err(e),
            };

            match result {
                Err(e) if e.is_authentication() && !reauthenticated => {
                    warn!(
                        "Session for {}@{} rejected ({}), re-authenticating",
                        credentials.username, credentials.endpoint, e
                    );
                    reauthenticated = true;
                }
                other => return other,
            }
        }
    }

    /// Number of cached sessions
    pub async fn cached_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Log out and forget every cached session. Failures are logged.
    pub async fn logout_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();

        for session in sessions {
            match self.client.logout(&session).await {
                Ok(()) => info!("Logged out of {} as {}", session.endpoint, session.username),
                Err(e) => warn!("Failed to log out of {} as {}: {}", session.endpoint, session.username, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVSphereClient;
    use std::time::Duration;

    fn credentials(username: &str) -> Credentials {
        Credentials {
            endpoint: "https://vc.example.com".to_string(),
            username: username.to_string(),
            password: "secret".to_string(),
        }
    }

    /// An operation that needs a valid session on the mock
    async fn touch(mock: MockVSphereClient, session: Arc<Session>) -> Result<(), VSphereError> {
        let view = mock
            .create_container_view(&session, &session.content.root_folder, &["VirtualMachine"], true)
            .await?;
        mock.destroy_view(&session, &view).await
    }

    #[tokio::test]
    async fn test_reuses_session_for_same_key() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        let first = provider.get_session(&credentials("admin"), &cancel).await.unwrap();
        let second = provider.get_session(&credentials("admin"), &cancel).await.unwrap();

        assert_eq!(first.token, second.token);
        assert_eq!(mock.login_count(), 1);
    }

    #[tokio::test]
    async fn test_separate_sessions_per_username() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        provider.get_session(&credentials("admin"), &cancel).await.unwrap();
        provider.get_session(&credentials("reader"), &cancel).await.unwrap();

        assert_eq!(mock.login_count(), 2);
        assert_eq!(provider.cached_sessions().await, 2);
    }

    #[tokio::test]
    async fn test_stale_session_is_replaced_transparently() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();
        let creds = credentials("admin");

        let stale = provider.get_session(&creds, &cancel).await.unwrap();
        mock.expire_sessions();

        let client = mock.clone();
        provider
            .with_session(&creds, &cancel, |session| touch(client.clone(), session))
            .await
            .unwrap();

        let fresh = provider.get_session(&creds, &cancel).await.unwrap();
        assert_ne!(stale.token, fresh.token);
        assert_eq!(mock.login_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_first_login_is_retried_once() {
        let mock = MockVSphereClient::new();
        mock.fail_next_logins(1);
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        let client = mock.clone();
        provider
            .with_session(&credentials("admin"), &cancel, |session| touch(client.clone(), session))
            .await
            .unwrap();

        assert_eq!(mock.login_attempts(), 2);
        assert_eq!(mock.login_count(), 1);
    }

    #[tokio::test]
    async fn test_second_authentication_failure_is_surfaced() {
        let mock = MockVSphereClient::new();
        mock.fail_next_logins(2);
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        let client = mock.clone();
        let err = provider
            .with_session(&credentials("admin"), &cancel, |session| touch(client.clone(), session))
            .await
            .unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(mock.login_attempts(), 2);
        assert_eq!(provider.cached_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_operation_rejected_twice_is_surfaced() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        let err = provider
            .with_session(&credentials("admin"), &cancel, |_session| async {
                Err::<(), _>(VSphereError::Authentication("NotAuthenticated".to_string()))
            })
            .await
            .unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(mock.login_count(), 2);
    }

    #[tokio::test]
    async fn test_non_authentication_errors_are_not_retried() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        let err = provider
            .with_session(&credentials("admin"), &cancel, |_session| async {
                Err::<(), _>(VSphereError::Api("SystemError".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, VSphereError::Api(_)));
        assert_eq!(mock.login_count(), 1);
        assert_eq!(provider.cached_sessions().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reauthentication_logs_in_once() {
        let mock = MockVSphereClient::new();
        let provider = Arc::new(SessionProvider::new(mock.clone()));
        let cancel = CancellationToken::new();
        let creds = credentials("admin");

        provider.get_session(&creds, &cancel).await.unwrap();
        assert_eq!(mock.login_count(), 1);

        mock.expire_sessions();
        mock.set_login_delay(Duration::from_millis(50));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let provider = Arc::clone(&provider);
            let mock = mock.clone();
            let creds = creds.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                provider
                    .with_session(&creds, &cancel, |session| touch(mock.clone(), session))
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(mock.login_count(), 2, "exactly one re-authentication expected");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rejected_logins_are_shared() {
        let mock = MockVSphereClient::new();
        let provider = Arc::new(SessionProvider::new(mock.clone()));
        let cancel = CancellationToken::new();
        let creds = credentials("admin");

        provider.get_session(&creds, &cancel).await.unwrap();
        assert_eq!(mock.login_attempts(), 1);

        mock.expire_sessions();
        mock.fail_next_logins(1000);
        mock.set_login_delay(Duration::from_millis(50));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let provider = Arc::clone(&provider);
            let mock = mock.clone();
            let creds = creds.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                provider
                    .with_session(&creds, &cancel, |session| touch(mock.clone(), session))
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_authentication(), "unexpected error: {err}");
        }

        // One rejected re-login for the burst, plus at most one retry from
        // callers whose first pass already saw that rejection
        let relogins = mock.login_attempts() - 1;
        assert!(
            (1..=2).contains(&relogins),
            "expected one shared re-login, got {relogins} attempts"
        );
        assert_eq!(provider.cached_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_later_caller_retries_after_shared_failure() {
        let mock = MockVSphereClient::new();
        mock.fail_next_logins(1);
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();
        let creds = credentials("admin");

        let err = provider.get_session(&creds, &cancel).await.unwrap_err();
        assert!(err.is_authentication());

        provider.get_session(&creds, &cancel).await.unwrap();
        assert_eq!(mock.login_attempts(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_ignores_newer_session() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();
        let creds = credentials("admin");

        let old = provider.get_session(&creds, &cancel).await.unwrap();
        assert!(provider.invalidate(&old).await);
        let new = provider.get_session(&creds, &cancel).await.unwrap();

        assert!(!provider.invalidate(&old).await);
        let current = provider.get_session(&creds, &cancel).await.unwrap();
        assert_eq!(current.token, new.token);
    }

    #[tokio::test]
    async fn test_cancelled_login_caches_nothing() {
        let mock = MockVSphereClient::new();
        mock.set_login_delay(Duration::from_secs(5));
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = provider.get_session(&credentials("admin"), &cancel).await.unwrap_err();
        assert!(matches!(err, VSphereError::Cancelled));
        assert_eq!(provider.cached_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_logout_all_clears_cache() {
        let mock = MockVSphereClient::new();
        let provider = SessionProvider::new(mock.clone());
        let cancel = CancellationToken::new();

        provider.get_session(&credentials("admin"), &cancel).await.unwrap();
        provider.get_session(&credentials("reader"), &cancel).await.unwrap();
        provider.logout_all().await;

        assert_eq!(mock.logout_count(), 2);
        assert_eq!(provider.cached_sessions().await, 0);
    }
}
