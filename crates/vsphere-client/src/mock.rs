//! Mock VSphereClient for unit testing
//!
//! This module provides a mock implementation of VSphereClientTrait that can be used
//! in unit tests without requiring a running vCenter.
//!
//! The mock keeps its inventory and server-side bookkeeping (sessions, views,
//! cursors) in memory so tests can assert that nothing leaks.

use crate::error::VSphereError;
use crate::models::*;
use crate::vsphere_trait::VSphereClientTrait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    vms: Vec<VmSummary>,
    page_size: Option<usize>,
    valid_tokens: HashSet<String>,
    login_attempts: usize,
    logins: usize,
    logouts: usize,
    failing_logins: usize,
    login_delay: Duration,
    create_delay: Duration,
    retrieve_delay: Duration,
    continue_delay: Duration,
    retrieve_error: Option<String>,
    open_views: HashSet<String>,
    views_created: usize,
    cursors: HashMap<String, Vec<VmSummary>>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_session(&self, session: &Session) -> Result<(), VSphereError> {
        if self.valid_tokens.contains(&session.token) {
            Ok(())
        } else {
            Err(VSphereError::Authentication(
                "NotAuthenticated: The session is not authenticated.".to_string(),
            ))
        }
    }

    /// Split `summaries` into a page and register a cursor for the rest
    fn page(&mut self, mut summaries: Vec<VmSummary>) -> RetrievePage {
        match self.page_size {
            Some(size) if summaries.len() > size => {
                let rest = summaries.split_off(size);
                let token = format!("cursor-{}", self.next_id());
                self.cursors.insert(token.clone(), rest);
                RetrievePage {
                    summaries,
                    token: Some(token),
                }
            }
            _ => RetrievePage {
                summaries,
                token: None,
            },
        }
    }
}

/// Mock VSphereClient for testing
///
/// Cloning shares state, so a test can hand one clone to the code under test
/// and inspect counters through another.
#[derive(Debug, Clone, Default)]
pub struct MockVSphereClient {
    state: Arc<Mutex<MockState>>,
}

impl MockVSphereClient {
    /// Create a new mock client with an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock client serving the given inventory
    pub fn with_vms(vms: Vec<VmSummary>) -> Self {
        let client = Self::new();
        client.set_vms(vms);
        client
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the inventory
    pub fn set_vms(&self, vms: Vec<VmSummary>) {
        self.state().vms = vms;
    }

    /// Return at most `size` summaries per page
    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size.max(1));
    }

    /// Delay every login by `delay`
    pub fn set_login_delay(&self, delay: Duration) {
        self.state().login_delay = delay;
    }

    /// Delay every view creation by `delay`; the view exists once the delay ends
    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = delay;
    }

    /// Delay the first page of every retrieval by `delay`
    pub fn set_retrieve_delay(&self, delay: Duration) {
        self.state().retrieve_delay = delay;
    }

    /// Delay every continuation page by `delay`
    pub fn set_continue_delay(&self, delay: Duration) {
        self.state().continue_delay = delay;
    }

    /// Reject the next `count` login attempts with `InvalidLogin`
    pub fn fail_next_logins(&self, count: usize) {
        self.state().failing_logins = count;
    }

    /// Make retrievals fail with an API error (`None` clears it)
    pub fn set_retrieve_error(&self, message: Option<&str>) {
        self.state().retrieve_error = message.map(str::to_string);
    }

    /// Invalidate every issued session token, as a server restart would
    pub fn expire_sessions(&self) {
        self.state().valid_tokens.clear();
    }

    /// Number of login attempts, successful or not
    pub fn login_attempts(&self) -> usize {
        self.state().login_attempts
    }

    /// Number of successful logins
    pub fn login_count(&self) -> usize {
        self.state().logins
    }

    /// Number of logouts
    pub fn logout_count(&self) -> usize {
        self.state().logouts
    }

    /// Views created and not yet destroyed
    pub fn open_views(&self) -> usize {
        self.state().open_views.len()
    }

    /// Total views ever created
    pub fn views_created(&self) -> usize {
        self.state().views_created
    }

    /// Continuation cursors neither exhausted nor cancelled
    pub fn open_cursors(&self) -> usize {
        self.state().cursors.len()
    }

    fn service_content() -> ServiceContent {
        ServiceContent {
            root_folder: ManagedObjectReference::new("Folder", "group-d1"),
            property_collector: ManagedObjectReference::new("PropertyCollector", "propertyCollector"),
            view_manager: ManagedObjectReference::new("ViewManager", "ViewManager"),
            session_manager: ManagedObjectReference::new("SessionManager", "SessionManager"),
            about: AboutInfo {
                full_name: "Mock vCenter Server".to_string(),
                api_version: "8.0.1.0".to_string(),
            },
        }
    }
}

#[async_trait::async_trait]
impl VSphereClientTrait for MockVSphereClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session, VSphereError> {
        let delay = {
            let mut state = self.state();
            state.login_attempts += 1;
            state.login_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.failing_logins > 0 {
            state.failing_logins -= 1;
            return Err(VSphereError::Authentication(
                "InvalidLogin: Cannot complete login due to an incorrect user name or password.".to_string(),
            ));
        }

        let token = format!("mock-session-{}", state.next_id());
        state.valid_tokens.insert(token.clone());
        state.logins += 1;

        Ok(Session {
            endpoint: credentials.endpoint.clone(),
            username: credentials.username.clone(),
            token,
            content: Self::service_content(),
        })
    }

    async fn logout(&self, session: &Session) -> Result<(), VSphereError> {
        let mut state = self.state();
        state.check_session(session)?;
        state.valid_tokens.remove(&session.token);
        state.logouts += 1;
        Ok(())
    }

    async fn create_container_view(
        &self,
        session: &Session,
        _container: &ManagedObjectReference,
        _types: &[&str],
        _recursive: bool,
    ) -> Result<ManagedObjectReference, VSphereError> {
        let delay = {
            let state = self.state();
            state.check_session(session)?;
            state.create_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let value = format!("session[mock]view-{}", state.next_id());
        state.open_views.insert(value.clone());
        state.views_created += 1;
        Ok(ManagedObjectReference::new("ContainerView", value))
    }

    async fn retrieve_vm_summaries(
        &self,
        session: &Session,
        view: &ManagedObjectReference,
    ) -> Result<RetrievePage, VSphereError> {
        let delay = {
            let state = self.state();
            state.check_session(session)?;
            if !state.open_views.contains(&view.value) {
                return Err(VSphereError::NotFound(format!("view {view} does not exist")));
            }
            state.retrieve_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(message) = state.retrieve_error.clone() {
            return Err(VSphereError::Api(message));
        }
        let vms = state.vms.clone();
        Ok(state.page(vms))
    }

    async fn continue_retrieve(&self, session: &Session, token: &str) -> Result<RetrievePage, VSphereError> {
        let delay = {
            let state = self.state();
            state.check_session(session)?;
            state.continue_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let rest = state
            .cursors
            .remove(token)
            .ok_or_else(|| VSphereError::NotFound(format!("cursor {token} does not exist")))?;
        Ok(state.page(rest))
    }

    async fn cancel_retrieve(&self, session: &Session, token: &str) -> Result<(), VSphereError> {
        let mut state = self.state();
        state.check_session(session)?;
        state.cursors.remove(token);
        Ok(())
    }

    async fn destroy_view(&self, session: &Session, view: &ManagedObjectReference) -> Result<(), VSphereError> {
        let mut state = self.state();
        state.check_session(session)?;
        if state.open_views.remove(&view.value) {
            Ok(())
        } else {
            Err(VSphereError::NotFound(format!("view {view} does not exist")))
        }
    }
}
