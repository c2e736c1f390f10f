//! vSphere API client
//!
//! Implements the vSphere VI/JSON API client used for session management and
//! inventory retrieval.
//! Based on the VI/JSON method layout: /sdk/vim25/{release}/{MoType}/{moId}/{Method}

use crate::error::VSphereError;
use crate::models::*;
use crate::vsphere_trait::VSphereClientTrait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the session token on every authenticated request
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// VI/JSON release used when none is configured
pub const DEFAULT_API_RELEASE: &str = "8.0.1.0";

/// Objects per `RetrievePropertiesEx` page when none is configured
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Connection options for [`VSphereClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Skip TLS certificate verification. Opt-in only.
    pub insecure: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// VI/JSON release path segment (e.g. "8.0.1.0")
    pub api_release: String,
    /// Maximum objects per retrieved page
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: Duration::from_secs(30),
            api_release: DEFAULT_API_RELEASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// vSphere API client
///
/// The client is not bound to an endpoint: the endpoint comes from the
/// [`Credentials`] at login and from the [`Session`] afterwards, so one
/// client can serve every cached session.
#[derive(Debug, Clone)]
pub struct VSphereClient {
    client: Client,
    api_release: String,
    page_size: u32,
}

impl VSphereClient {
    /// Create a new vSphere client
    ///
    /// # Arguments
    /// * `options` - TLS, timeout and API release settings
    pub fn new(options: ClientOptions) -> Result<Self, VSphereError> {
        if options.insecure {
            warn!("TLS certificate verification is disabled for vSphere connections");
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .map_err(VSphereError::Http)?;

        Ok(Self {
            client,
            api_release: options.api_release,
            page_size: options.page_size.max(1),
        })
    }

    /// Get the VI/JSON release this client targets
    pub fn api_release(&self) -> &str {
        &self.api_release
    }

    fn method_url(&self, endpoint: &str, moref: &ManagedObjectReference, method: &str) -> String {
        format!(
            "{}/sdk/vim25/{}/{}/{}/{}",
            endpoint.trim_end_matches('/'),
            self.api_release,
            moref.kind,
            moref.value,
            method
        )
    }

    /// Fetch the service content (root folder, collectors, managers).
    ///
    /// This call does not require a session.
    pub async fn service_content(&self, endpoint: &str) -> Result<ServiceContent, VSphereError> {
        let url = format!(
            "{}/sdk/vim25/{}/ServiceInstance/ServiceInstance/content",
            endpoint.trim_end_matches('/'),
            self.api_release
        );
        debug!("Fetching service content from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = check_response(response, "Failed to fetch service content").await?;

        let content: ServiceContent = response.json().await?;
        Ok(content)
    }

    /// POST a method invocation on behalf of `session`
    async fn invoke<B: Serialize + ?Sized>(
        &self,
        session: &Session,
        moref: &ManagedObjectReference,
        method: &str,
        body: Option<&B>,
    ) -> Result<Response, VSphereError> {
        let url = self.method_url(&session.endpoint, moref, method);
        debug!("Invoking {} on {}", method, moref);

        let mut request = self
            .client
            .post(&url)
            .header(SESSION_HEADER, &session.token)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        check_response(response, &format!("{method} on {moref} failed")).await
    }

    fn retrieve_body(&self, view: &ManagedObjectReference) -> serde_json::Value {
        json!({
            "specSet": [{
                "_typeName": "PropertyFilterSpec",
                "propSet": [{
                    "_typeName": "PropertySpec",
                    "type": "VirtualMachine",
                    "pathSet": ["summary"]
                }],
                "objectSet": [{
                    "_typeName": "ObjectSpec",
                    "obj": view,
                    "skip": true,
                    "selectSet": [{
                        "_typeName": "TraversalSpec",
                        "name": "traverseEntities",
                        "type": "ContainerView",
                        "path": "view",
                        "skip": false
                    }]
                }]
            }],
            "options": {
                "_typeName": "RetrieveOptions",
                "maxObjects": self.page_size
            }
        })
    }
}

/// Map a non-success response to a [`VSphereError`]
async fn check_response(response: Response, context: &str) -> Result<Response, VSphereError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let fault: MethodFault = serde_json::from_str(&body).unwrap_or_default();
    let detail = fault.message.clone().unwrap_or(body);

    if status == StatusCode::UNAUTHORIZED || fault.is_authentication() {
        return Err(VSphereError::Authentication(format!("{context}: {status} - {detail}")));
    }

    if status == StatusCode::NOT_FOUND || fault.type_name == "ManagedObjectNotFound" {
        return Err(VSphereError::NotFound(format!("{context}: {detail}")));
    }

    Err(VSphereError::Api(format!(
        "{context}: {status} {} - {detail}",
        fault.type_name
    )))
}

/// Decode a `RetrievePropertiesEx` body. An empty body or `null` means no objects.
async fn decode_retrieve_result(response: Response) -> Result<RetrievePage, VSphereError> {
    let text = response.text().await?;
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(RetrievePage::default());
    }

    let result: RetrieveResult = serde_json::from_str(trimmed)?;
    let mut summaries = Vec::with_capacity(result.objects.len());

    for object in result.objects {
        let Some(property) = object.prop_set.into_iter().find(|p| p.name == "summary") else {
            debug!("Object {} returned without a summary, skipping", object.obj);
            continue;
        };

        let summary: VirtualMachineSummary = serde_json::from_value(property.val)?;
        match summary.into_vm_summary() {
            Some(vm) => summaries.push(vm),
            None => debug!("Object {} has no configured name, skipping", object.obj),
        }
    }

    Ok(RetrievePage {
        summaries,
        token: result.token,
    })
}

#[async_trait::async_trait]
impl VSphereClientTrait for VSphereClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session, VSphereError> {
        let content = self.service_content(&credentials.endpoint).await?;
        let url = self.method_url(&credentials.endpoint, &content.session_manager, "Login");
        debug!("Logging in to {} as {}", credentials.endpoint, credentials.username);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&json!({
                "userName": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await?;
        let response = check_response(response, "Login failed").await?;

        let token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| VSphereError::Api(format!("Login response carried no {SESSION_HEADER} header")))?;

        debug!("Logged in to {} ({})", credentials.endpoint, content.about.full_name);
        Ok(Session {
            endpoint: credentials.endpoint.clone(),
            username: credentials.username.clone(),
            token,
            content,
        })
    }

    async fn logout(&self, session: &Session) -> Result<(), VSphereError> {
        self.invoke::<()>(session, &session.content.session_manager, "Logout", None)
            .await?;
        Ok(())
    }

    async fn create_container_view(
        &self,
        session: &Session,
        container: &ManagedObjectReference,
        types: &[&str],
        recursive: bool,
    ) -> Result<ManagedObjectReference, VSphereError> {
        let body = json!({
            "container": container,
            "type": types,
            "recursive": recursive,
        });
        let response = self
            .invoke(session, &session.content.view_manager, "CreateContainerView", Some(&body))
            .await?;
        let view: ManagedObjectReference = response.json().await?;
        Ok(view)
    }

    async fn retrieve_vm_summaries(
        &self,
        session: &Session,
        view: &ManagedObjectReference,
    ) -> Result<RetrievePage, VSphereError> {
        let body = self.retrieve_body(view);
        let response = self
            .invoke(session, &session.content.property_collector, "RetrievePropertiesEx", Some(&body))
            .await?;
        decode_retrieve_result(response).await
    }

    async fn continue_retrieve(&self, session: &Session, token: &str) -> Result<RetrievePage, VSphereError> {
        let body = json!({ "token": token });
        let response = self
            .invoke(
                session,
                &session.content.property_collector,
                "ContinueRetrievePropertiesEx",
                Some(&body),
            )
            .await?;
        decode_retrieve_result(response).await
    }

    async fn cancel_retrieve(&self, session: &Session, token: &str) -> Result<(), VSphereError> {
        let body = json!({ "token": token });
        self.invoke(
            session,
            &session.content.property_collector,
            "CancelRetrievePropertiesEx",
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn destroy_view(&self, session: &Session, view: &ManagedObjectReference) -> Result<(), VSphereError> {
        self.invoke::<()>(session, view, "DestroyView", None).await?;
        Ok(())
    }
}
