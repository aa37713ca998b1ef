//! HTTP backend against a mock node API.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use metal_provisioner::backend::{
    NodeBackend, ProvisionState, ProvisionStateRequest, TargetPowerState, TargetProvisionState,
};
use metal_provisioner::options::UpdateOp;
use metal_provisioner::provisioner::{BmcDetails, RaidConfig, SoftwareRaidVolume};
use metal_provisioner::{
    BackendError, EventRecorder, HostData, HttpBackend, IronicFactory, PrepareData,
    ProvisionerConfig, ProvisionerFactory, UpdateOperation, REQUEUE_DELAY,
};

const NODE_ID: &str = "33ce8659-7400-4c68-9535-d10766f07a58";

fn node_body(state: &str) -> serde_json::Value {
    json!({
        "uuid": NODE_ID,
        "name": "metal~worker-0",
        "driver": "ipmi",
        "provision_state": state,
        "power_state": "power off",
        "maintenance": false,
        "properties": {},
        "instance_info": {},
        "driver_info": {"ipmi_address": "10.0.0.1"},
        "extra": {}
    })
}

#[tokio::test]
async fn test_get_node_sends_api_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/nodes/{NODE_ID}")))
        .and(header("X-OpenStack-Ironic-API-Version", "1.81"))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_body("clean wait")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&server.uri()).unwrap();
    let node = backend.get_node(NODE_ID).await.unwrap();

    assert_eq!(node.provision_state, ProvisionState::CleanWait);
    assert_eq!(node.driver_info["ipmi_address"], json!("10.0.0.1"));
}

#[tokio::test]
async fn test_missing_node() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/nodes/metal~ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_string("node not found"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&server.uri()).unwrap();
    assert!(matches!(
        backend.get_node("metal~ghost").await,
        Err(BackendError::NotFound(_))
    ));
    assert!(backend.find_node_by_name("metal~ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_locked_node_is_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/provision")))
        .and(body_json(json!({"target": "manage"})))
        .respond_with(ResponseTemplate::new(409).set_body_string("node locked"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&server.uri()).unwrap();
    let err = backend
        .change_provision_state(NODE_ID, ProvisionStateRequest::new(TargetProvisionState::Manage))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Conflict(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_update_node_sends_json_patch() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v1/nodes/{NODE_ID}")))
        .and(body_json(json!([
            {"op": "add", "path": "/properties/cpu_arch", "value": "x86_64"},
            {"op": "remove", "path": "/instance_info/image_source"}
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_body("available")))
        .expect(1)
        .mount(&server)
        .await;

    let ops = vec![
        UpdateOperation {
            op: UpdateOp::Add,
            path: "/properties/cpu_arch".into(),
            value: Some("x86_64".into()),
        },
        UpdateOperation {
            op: UpdateOp::Remove,
            path: "/instance_info/image_source".into(),
            value: None,
        },
    ];

    let backend = HttpBackend::new(&server.uri()).unwrap();
    let node = backend.update_node(NODE_ID, &ops).await.unwrap();
    assert_eq!(node.provision_state, ProvisionState::Available);
}

#[tokio::test]
async fn test_power_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/power")))
        .and(body_json(json!({"target": "soft power off"})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/v1/nodes/{NODE_ID}")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&server.uri()).unwrap();
    backend
        .set_power_state(NODE_ID, TargetPowerState::SoftPowerOff)
        .await
        .unwrap();
    backend.delete_node(NODE_ID).await.unwrap();
}

#[tokio::test]
async fn test_readiness() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "v1"})))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&server.uri()).unwrap();
    assert!(backend.is_ready().await.unwrap());

    let unreachable = HttpBackend::new("http://127.0.0.1:1").unwrap();
    assert!(!unreachable.is_ready().await.unwrap());
}

#[tokio::test]
async fn test_prepare_starts_cleaning_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/nodes/{NODE_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_body("manageable")))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/raid")))
        .and(body_json(json!({"logical_disks": [{
            "size_gb": "MAX",
            "raid_level": "1",
            "controller": "software",
            "is_root_volume": true
        }]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/provision")))
        .and(body_json(json!({
            "target": "clean",
            "clean_steps": [
                {"interface": "raid", "step": "delete_configuration"},
                {"interface": "deploy", "step": "erase_devices_metadata"},
                {"interface": "raid", "step": "create_configuration"}
            ]
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let backend = Arc::new(HttpBackend::new(&server.uri()).unwrap());
    let factory = IronicFactory::new(backend, ProvisionerConfig::new(server.uri()));
    let host = HostData {
        name: "worker-0".into(),
        namespace: "metal".into(),
        provisioner_id: NODE_ID.into(),
        bmc: BmcDetails {
            address: "ipmi://10.0.0.1".into(),
            disable_certificate_verification: false,
        },
        ..HostData::default()
    };
    let events = Arc::new(EventRecorder::new());
    let prov = factory.create(host, Arc::clone(&events) as _).unwrap();

    let data = PrepareData {
        raid_config: Some(RaidConfig {
            software_raid_volumes: vec![SoftwareRaidVolume {
                level: "1".into(),
                size_gibibytes: None,
            }],
            ..RaidConfig::default()
        }),
    };
    let (result, started) = prov.prepare(data, true).await.unwrap();

    assert!(started);
    assert!(result.dirty);
    assert_eq!(result.requeue_after, REQUEUE_DELAY);
    assert_eq!(events.reasons(), vec!["PreparingStarted"]);
}

fn worker_host() -> HostData {
    HostData {
        name: "worker-0".into(),
        namespace: "metal".into(),
        provisioner_id: NODE_ID.into(),
        bmc: BmcDetails {
            address: "ipmi://10.0.0.1".into(),
            disable_certificate_verification: false,
        },
        ..HostData::default()
    }
}

fn mirrored_root() -> PrepareData {
    PrepareData {
        raid_config: Some(RaidConfig {
            software_raid_volumes: vec![SoftwareRaidVolume {
                level: "1".into(),
                size_gibibytes: None,
            }],
            ..RaidConfig::default()
        }),
    }
}

async fn serve_node(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/nodes/{NODE_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_clean_failure_recovery_retries_when_locked() {
    let server = MockServer::start().await;
    let mut body = node_body("clean failed");
    body["maintenance"] = json!(true);
    serve_node(&server, body).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/v1/nodes/{NODE_ID}/maintenance")))
        .respond_with(ResponseTemplate::new(409).set_body_string("node locked by conductor-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/provision")))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let backend = Arc::new(HttpBackend::new(&server.uri()).unwrap());
    let factory = IronicFactory::new(backend, ProvisionerConfig::new(server.uri()));
    let prov = factory
        .create(worker_host(), Arc::new(EventRecorder::new()))
        .unwrap();

    let (result, started) = prov.prepare(mirrored_root(), true).await.unwrap();
    assert!(!started);
    assert!(result.dirty);
    assert_eq!(result.requeue_after, REQUEUE_DELAY);
    assert!(result.error_message.is_empty());
}

#[tokio::test]
async fn test_raid_config_retries_when_locked() {
    let server = MockServer::start().await;
    serve_node(&server, node_body("manageable")).await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/raid")))
        .respond_with(ResponseTemplate::new(409).set_body_string("node locked by conductor-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/states/provision")))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let backend = Arc::new(HttpBackend::new(&server.uri()).unwrap());
    let factory = IronicFactory::new(backend, ProvisionerConfig::new(server.uri()));
    let events = Arc::new(EventRecorder::new());
    let prov = factory.create(worker_host(), Arc::clone(&events) as _).unwrap();

    let (result, started) = prov.prepare(mirrored_root(), true).await.unwrap();
    assert!(!started);
    assert!(result.dirty);
    assert!(events.reasons().is_empty());
}

#[tokio::test]
async fn test_delete_retries_when_maintenance_is_locked() {
    let server = MockServer::start().await;
    serve_node(&server, node_body("active")).await;
    Mock::given(method("PUT"))
        .and(path(format!("/v1/nodes/{NODE_ID}/maintenance")))
        .respond_with(ResponseTemplate::new(409).set_body_string("node locked by conductor-1"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = Arc::new(HttpBackend::new(&server.uri()).unwrap());
    let factory = IronicFactory::new(backend, ProvisionerConfig::new(server.uri()));
    let prov = factory
        .create(worker_host(), Arc::new(EventRecorder::new()))
        .unwrap();

    let result = prov.delete().await.unwrap();
    assert!(result.dirty);
    assert!(result.error_message.is_empty());
}

#[tokio::test]
async fn test_auth_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/nodes/{NODE_ID}")))
        .and(header("Authorization", "Bearer s3cr3t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(node_body("active")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&server.uri())
        .unwrap()
        .with_auth_token("s3cr3t");
    let node = backend.get_node(NODE_ID).await.unwrap();
    assert_eq!(node.provision_state, ProvisionState::Active);
}
