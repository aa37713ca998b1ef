//! Contract behaviour shared by the provisioning strategies.

use std::sync::Arc;

use async_trait::async_trait;

use metal_provisioner::backend::{Node, ProvisionState};
use metal_provisioner::provisioner::{
    BmcDetails, HardwareDetails, ManagementAccessData, RaidConfig, SoftwareRaidVolume,
};
use metal_provisioner::{
    Agent, AgentFactory, AgentLocator, HostData, InMemoryBackend, IronicFactory,
    NullEventPublisher, PrepareData, ProvisionResult, Provisioner, ProvisionerConfig,
    ProvisionerError, ProvisionerFactory, ProvisioningState, REQUEUE_DELAY,
};

const NODE_ID: &str = "node-1";

const ALL_STATES: &[ProvisionState] = &[
    ProvisionState::Enroll,
    ProvisionState::Verifying,
    ProvisionState::Manageable,
    ProvisionState::Inspecting,
    ProvisionState::InspectWait,
    ProvisionState::InspectFail,
    ProvisionState::Cleaning,
    ProvisionState::CleanWait,
    ProvisionState::CleanFail,
    ProvisionState::Available,
    ProvisionState::Deploying,
    ProvisionState::DeployWait,
    ProvisionState::DeployFail,
    ProvisionState::Active,
    ProvisionState::Deleting,
    ProvisionState::Error,
    ProvisionState::Adopting,
    ProvisionState::AdoptFail,
];

fn host() -> HostData {
    HostData {
        name: "worker-0".into(),
        namespace: "metal".into(),
        provisioner_id: NODE_ID.into(),
        bmc: BmcDetails {
            address: "redfish://10.0.0.1/redfish/v1/Systems/1".into(),
            disable_certificate_verification: true,
        },
        ..HostData::default()
    }
}

fn backend_with(state: ProvisionState) -> Arc<InMemoryBackend> {
    Arc::new(InMemoryBackend::new().with_node(Node {
        uuid: NODE_ID.into(),
        name: Some("metal~worker-0".into()),
        provision_state: state,
        ..Node::default()
    }))
}

fn raid() -> PrepareData {
    PrepareData {
        raid_config: Some(RaidConfig {
            software_raid_volumes: vec![SoftwareRaidVolume {
                level: "1".into(),
                size_gibibytes: Some(100),
            }],
            ..RaidConfig::default()
        }),
    }
}

/// Locator for hosts whose agent never checks in.
struct AbsentAgent;

#[async_trait]
impl AgentLocator for AbsentAgent {
    async fn find_agent(&self, _host: &HostData) -> Result<Option<Arc<dyn Agent>>, ProvisionerError> {
        Ok(None)
    }
}

struct ReadyAgent;

#[async_trait]
impl Agent for ReadyAgent {
    async fn hardware_details(&self) -> Result<HardwareDetails, ProvisionerError> {
        Ok(HardwareDetails::default())
    }

    async fn is_deployed(&self) -> Result<bool, ProvisionerError> {
        Ok(false)
    }

    async fn deploy(&self, _url: &str) -> Result<bool, ProvisionerError> {
        Ok(true)
    }

    async fn clean_up(&self) -> Result<(), ProvisionerError> {
        Ok(())
    }
}

struct PresentAgent;

#[async_trait]
impl AgentLocator for PresentAgent {
    async fn find_agent(&self, _host: &HostData) -> Result<Option<Arc<dyn Agent>>, ProvisionerError> {
        Ok(Some(Arc::new(ReadyAgent)))
    }
}

fn ironic(backend: &Arc<InMemoryBackend>) -> Arc<IronicFactory> {
    Arc::new(IronicFactory::new(
        Arc::clone(backend) as _,
        ProvisionerConfig::new("http://ironic.test:6385"),
    ))
}

fn agent_provisioner(
    backend: &Arc<InMemoryBackend>,
    locator: Arc<dyn AgentLocator>,
) -> Box<dyn Provisioner> {
    AgentFactory::new(ironic(backend), locator, "http://agent.test/live.iso")
        .create(host(), Arc::new(NullEventPublisher))
        .unwrap()
}

#[tokio::test]
async fn test_prepare_without_raid_is_noop_in_every_state() {
    for state in ALL_STATES {
        let backend = backend_with(*state);
        let prov = ironic(&backend)
            .create(host(), Arc::new(NullEventPublisher))
            .unwrap();

        for unprepared in [false, true] {
            let (result, started) = prov.prepare(PrepareData::default(), unprepared).await.unwrap();
            assert_eq!(result, ProvisionResult::complete(), "state {state}");
            assert!(!started, "state {state}");
        }
        assert!(backend.calls().await.is_empty(), "state {state}");
        assert_eq!(backend.reads(), 0, "state {state}");
    }
}

#[tokio::test]
async fn test_agent_wrapper_rejects_raid_in_every_state() {
    for state in ALL_STATES {
        let backend = backend_with(*state);
        let prov = agent_provisioner(&backend, Arc::new(AbsentAgent));

        let err = prov.prepare(raid(), true).await.unwrap_err();
        assert!(matches!(err, ProvisionerError::Unsupported(_)), "state {state}");
        assert!(!err.is_retryable());
        assert!(backend.calls().await.is_empty());
    }
}

#[tokio::test]
async fn test_agent_registration_provisions_live_iso() {
    let backend = backend_with(ProvisionState::Manageable);
    let prov = agent_provisioner(&backend, Arc::new(AbsentAgent));

    let data = ManagementAccessData {
        state: ProvisioningState::Registering,
        ..ManagementAccessData::default()
    };

    // Manageable -> provide
    let (result, id) = prov.validate_management_access(data.clone(), false, false).await.unwrap();
    assert_eq!(id, NODE_ID);
    assert!(result.dirty);
    assert_eq!(result.requeue_after, REQUEUE_DELAY);
    let node = backend.node(NODE_ID).await.unwrap();
    assert_eq!(node.provision_state, ProvisionState::Available);

    // Available -> deploy the agent ISO
    prov.validate_management_access(data.clone(), false, false).await.unwrap();
    let node = backend.node(NODE_ID).await.unwrap();
    assert_eq!(node.provision_state, ProvisionState::Deploying);
    assert_eq!(
        node.instance_info["boot_iso"],
        serde_json::json!("http://agent.test/live.iso")
    );

    // Deployed, but the agent has not checked in yet
    backend.set_provision_state(NODE_ID, ProvisionState::Active).await;
    let (result, _) = prov.validate_management_access(data, false, false).await.unwrap();
    assert!(result.dirty);
    assert_eq!(result.requeue_after, REQUEUE_DELAY);
}

#[tokio::test]
async fn test_agent_registration_completes_once_agent_is_up() {
    let backend = backend_with(ProvisionState::Active);
    let prov = agent_provisioner(&backend, Arc::new(PresentAgent));

    // Seed the node as already running the agent ISO.
    let seeded = {
        let mut node = backend.node(NODE_ID).await.unwrap();
        node.instance_info.insert(
            "boot_iso".into(),
            serde_json::json!("http://agent.test/live.iso"),
        );
        node
    };
    backend.insert(seeded).await;

    let data = ManagementAccessData {
        state: ProvisioningState::Registering,
        ..ManagementAccessData::default()
    };
    let (result, _) = prov.validate_management_access(data, false, false).await.unwrap();
    assert_eq!(result, ProvisionResult::complete());
}
