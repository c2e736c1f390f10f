//! HTTP-level tests for VSphereClient against a mock VI/JSON endpoint

use serde_json::json;
use vsphere_client::{
    ClientOptions, Credentials, ManagedObjectReference, VSphereClient, VSphereClientTrait, VSphereError,
    SESSION_HEADER,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE: &str = "/sdk/vim25/8.0.1.0";

fn service_content() -> serde_json::Value {
    json!({
        "_typeName": "ServiceContent",
        "rootFolder": {"_typeName": "ManagedObjectReference", "type": "Folder", "value": "group-d1"},
        "propertyCollector": {"_typeName": "ManagedObjectReference", "type": "PropertyCollector", "value": "propertyCollector"},
        "viewManager": {"_typeName": "ManagedObjectReference", "type": "ViewManager", "value": "ViewManager"},
        "sessionManager": {"_typeName": "ManagedObjectReference", "type": "SessionManager", "value": "SessionManager"},
        "about": {"_typeName": "AboutInfo", "fullName": "VMware vCenter Server 8.0.1", "apiVersion": "8.0.1.0"}
    })
}

fn vm_object(moid: &str, name: &str, num_cpu: i64) -> serde_json::Value {
    json!({
        "_typeName": "ObjectContent",
        "obj": {"_typeName": "ManagedObjectReference", "type": "VirtualMachine", "value": moid},
        "propSet": [{
            "_typeName": "DynamicProperty",
            "name": "summary",
            "val": {
                "_typeName": "VirtualMachineSummary",
                "config": {
                    "name": name,
                    "numCpu": num_cpu,
                    "memorySizeMB": 8192,
                    "cpuReservation": 0,
                    "memoryReservation": 0,
                    "vmPathName": format!("[datastore1] {name}/{name}.vmx")
                },
                "runtime": {"powerState": "poweredOn"},
                "guest": {"guestId": "ubuntu64Guest", "hwVersion": "vmx-19", "ipAddress": "10.0.0.10"}
            }
        }]
    })
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path(format!("{BASE}/ServiceInstance/ServiceInstance/content")))
        .respond_with(ResponseTemplate::new(200).set_body_json(service_content()))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{BASE}/SessionManager/SessionManager/Login")))
        .and(body_partial_json(json!({"userName": "admin"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(SESSION_HEADER, token)
                .set_body_json(json!({"_typeName": "UserSession", "userName": "admin"})),
        )
        .mount(server)
        .await;
}

fn credentials(server: &MockServer) -> Credentials {
    Credentials::from_url(&server.uri(), Some("admin".to_string()), Some("secret".to_string())).unwrap()
}

fn client() -> VSphereClient {
    VSphereClient::new(ClientOptions::default()).unwrap()
}

#[tokio::test]
async fn test_login_reads_session_header() {
    let server = MockServer::start().await;
    mount_login(&server, "token-123").await;

    let session = client().login(&credentials(&server)).await.unwrap();

    assert_eq!(session.token, "token-123");
    assert_eq!(session.username, "admin");
    assert_eq!(session.content.root_folder, ManagedObjectReference::new("Folder", "group-d1"));
}

#[tokio::test]
async fn test_invalid_login_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{BASE}/ServiceInstance/ServiceInstance/content")))
        .respond_with(ResponseTemplate::new(200).set_body_json(service_content()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{BASE}/SessionManager/SessionManager/Login")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "_typeName": "InvalidLogin",
            "faultstring": "Cannot complete login due to an incorrect user name or password."
        })))
        .mount(&server)
        .await;

    let err = client().login(&credentials(&server)).await.unwrap_err();
    assert!(err.is_authentication(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unauthorized_is_authentication_error() {
    let server = MockServer::start().await;
    mount_login(&server, "token-123").await;
    Mock::given(method("POST"))
        .and(path(format!("{BASE}/ViewManager/ViewManager/CreateContainerView")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client();
    let session = client.login(&credentials(&server)).await.unwrap();
    let err = client
        .create_container_view(&session, &session.content.root_folder, &["VirtualMachine"], true)
        .await
        .unwrap_err();

    assert!(err.is_authentication(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_retrieve_and_continue_decode_summaries() {
    let server = MockServer::start().await;
    mount_login(&server, "token-123").await;
    Mock::given(method("POST"))
        .and(path(format!("{BASE}/PropertyCollector/propertyCollector/RetrievePropertiesEx")))
        .and(header(SESSION_HEADER, "token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_typeName": "RetrieveResult",
            "token": "page-2",
            "objects": [vm_object("vm-1", "node-a", 2)]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{BASE}/PropertyCollector/propertyCollector/ContinueRetrievePropertiesEx")))
        .and(body_partial_json(json!({"token": "page-2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_typeName": "RetrieveResult",
            "objects": [vm_object("vm-2", "node-b", 4)]
        })))
        .mount(&server)
        .await;

    let client = client();
    let session = client.login(&credentials(&server)).await.unwrap();
    let view = ManagedObjectReference::new("ContainerView", "session-abc-view-1");

    let first = client.retrieve_vm_summaries(&session, &view).await.unwrap();
    assert_eq!(first.token.as_deref(), Some("page-2"));
    assert_eq!(first.summaries.len(), 1);
    let vm = &first.summaries[0];
    assert_eq!(vm.name, "node-a");
    assert_eq!(vm.num_cpu, 2);
    assert_eq!(vm.memory_size_mb, 8192);
    assert_eq!(vm.power_state, "poweredOn");
    assert_eq!(vm.ip_address, "10.0.0.10");
    assert_eq!(vm.guest_id, "ubuntu64Guest");
    assert_eq!(vm.hw_version, "vmx-19");
    assert_eq!(vm.vm_path_name, "[datastore1] node-a/node-a.vmx");

    let second = client.continue_retrieve(&session, "page-2").await.unwrap();
    assert_eq!(second.token, None);
    assert_eq!(second.summaries[0].name, "node-b");
}

#[tokio::test]
async fn test_null_retrieve_result_is_empty() {
    let server = MockServer::start().await;
    mount_login(&server, "token-123").await;
    Mock::given(method("POST"))
        .and(path(format!("{BASE}/PropertyCollector/propertyCollector/RetrievePropertiesEx")))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let client = client();
    let session = client.login(&credentials(&server)).await.unwrap();
    let view = ManagedObjectReference::new("ContainerView", "session-abc-view-1");

    let page = client.retrieve_vm_summaries(&session, &view).await.unwrap();
    assert!(page.summaries.is_empty());
    assert_eq!(page.token, None);
}

#[tokio::test]
async fn test_destroy_missing_view_is_not_found() {
    let server = MockServer::start().await;
    mount_login(&server, "token-123").await;
    Mock::given(method("POST"))
        .and(path(format!("{BASE}/ContainerView/session-abc-view-1/DestroyView")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "_typeName": "ManagedObjectNotFound",
            "faultstring": "The object has already been deleted or has not been completely created"
        })))
        .mount(&server)
        .await;

    let client = client();
    let session = client.login(&credentials(&server)).await.unwrap();
    let view = ManagedObjectReference::new("ContainerView", "session-abc-view-1");

    let err = client.destroy_view(&session, &view).await.unwrap_err();
    assert!(matches!(err, VSphereError::NotFound(_)), "unexpected error: {err}");
}
