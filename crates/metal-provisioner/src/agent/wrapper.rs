use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Agent, AgentLocator};
use crate::hardware::get_profile;
use crate::provisioner::{
    AdoptData, BootMode, HardwareDetails, HardwareState, HostData, Image, InspectData,
    ManagementAccessData, PrepareData, ProvisionData, ProvisionResult, Provisioner,
    ProvisionerError, ProvisioningState, RebootMode, REQUEUE_DELAY,
};

/// Disk format of the agent image.
const LIVE_ISO: &str = "live-iso";

/// Hardware profile used when booting the agent.
const AGENT_PROFILE: &str = "libvirt";

/// Provisioner that boots a helper agent through `inner` and lets the agent
/// do the actual work.
pub struct AgentProvisioner {
    inner: Box<dyn Provisioner>,
    host: HostData,
    locator: Arc<dyn AgentLocator>,
    iso_url: String,
}

impl AgentProvisioner {
    /// Wrap `inner`, booting the agent ISO at `iso_url`.
    #[must_use]
    pub fn new(
        inner: Box<dyn Provisioner>,
        host: HostData,
        locator: Arc<dyn AgentLocator>,
        iso_url: String,
    ) -> Self {
        Self {
            inner,
            host,
            locator,
            iso_url,
        }
    }

    async fn find_agent(&self) -> Result<Option<Arc<dyn Agent>>, ProvisionerError> {
        let agent = self.locator.find_agent(&self.host).await?;
        debug!(host = %self.host.node_name(), found = agent.is_some(), "agent lookup");
        Ok(agent)
    }

    /// State handed to the inner provisioner.
    ///
    /// Registration goes straight to provisioning the agent image, and a
    /// host without a running agent needs it booted again before anything
    /// can be torn down.
    async fn delegate_state(
        &self,
        state: ProvisioningState,
    ) -> Result<ProvisioningState, ProvisionerError> {
        let delegated = match state {
            ProvisioningState::Registering => ProvisioningState::Provisioning,
            ProvisioningState::Deprovisioning => {
                if self.find_agent().await?.is_some() {
                    state
                } else {
                    ProvisioningState::Provisioning
                }
            }
            _ => ProvisioningState::Provisioned,
        };
        Ok(delegated)
    }

    fn delegate_provision_data(&self) -> Result<ProvisionData, ProvisionerError> {
        Ok(ProvisionData {
            image: Image {
                url: self.iso_url.clone(),
                disk_format: Some(LIVE_ISO.to_string()),
                ..Image::default()
            },
            boot_mode: BootMode::Uefi,
            hardware_profile: get_profile(AGENT_PROFILE)?,
            root_device_hints: None,
        })
    }

    /// Boot the agent image and wait for the agent to check in.
    async fn boot_agent(&self) -> Result<ProvisionResult, ProvisionerError> {
        let result = self.inner.provision(self.delegate_provision_data()?).await?;
        if result.is_incomplete() {
            return Ok(result);
        }

        if self.find_agent().await?.is_none() {
            info!(host = %self.host.node_name(), "waiting for agent to start");
            return Ok(ProvisionResult::continuing(REQUEUE_DELAY));
        }
        Ok(result)
    }
}

#[async_trait]
impl Provisioner for AgentProvisioner {
    async fn validate_management_access(
        &self,
        mut data: ManagementAccessData,
        credentials_changed: bool,
        force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError> {
        let initialising = data.state == ProvisioningState::Registering;
        data.state = self.delegate_state(data.state).await?;

        let (result, id) = self
            .inner
            .validate_management_access(data, credentials_changed, force)
            .await?;
        if result.is_incomplete() || id != self.host.provisioner_id || !initialising {
            return Ok((result, id));
        }

        let result = self.boot_agent().await?;
        Ok((result, id))
    }

    async fn adopt(&self, mut data: AdoptData, force: bool) -> Result<ProvisionResult, ProvisionerError> {
        data.state = self.delegate_state(data.state).await?;
        self.inner.adopt(data, force).await
    }

    async fn inspect_hardware(
        &self,
        _data: InspectData,
        _force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError> {
        let Some(agent) = self.find_agent().await? else {
            return Ok((ProvisionResult::continuing(REQUEUE_DELAY), None));
        };
        let details = agent.hardware_details().await?;
        Ok((ProvisionResult::complete(), Some(details)))
    }

    async fn prepare(
        &self,
        data: PrepareData,
        _unprepared: bool,
    ) -> Result<(ProvisionResult, bool), ProvisionerError> {
        if data.raid_config.is_some() {
            return Err(ProvisionerError::Unsupported(
                "RAID settings are defined, but RAID is not supported".into(),
            ));
        }
        Ok((ProvisionResult::complete(), false))
    }

    async fn provision(&self, data: ProvisionData) -> Result<ProvisionResult, ProvisionerError> {
        let Some(agent) = self.find_agent().await? else {
            return Ok(ProvisionResult::continuing(REQUEUE_DELAY));
        };
        if agent.deploy(&data.image.url).await? {
            Ok(ProvisionResult::complete())
        } else {
            Ok(ProvisionResult::continuing(REQUEUE_DELAY))
        }
    }

    async fn deprovision(&self, force: bool) -> Result<ProvisionResult, ProvisionerError> {
        if let Some(agent) = self.find_agent().await? {
            if agent.is_deployed().await? {
                let result = self.inner.deprovision(force).await?;
                if result.is_incomplete() {
                    return Ok(result);
                }
                agent.clean_up().await?;
            }
        }
        self.boot_agent().await
    }

    async fn delete(&self) -> Result<ProvisionResult, ProvisionerError> {
        self.inner.delete().await
    }

    async fn power_on(&self) -> Result<ProvisionResult, ProvisionerError> {
        self.inner.power_on().await
    }

    async fn power_off(&self, mode: RebootMode) -> Result<ProvisionResult, ProvisionerError> {
        self.inner.power_off(mode).await
    }

    async fn is_ready(&self) -> Result<bool, ProvisionerError> {
        self.inner.is_ready().await
    }

    async fn has_provisioning_capacity(&self) -> Result<bool, ProvisionerError> {
        self.inner.has_provisioning_capacity().await
    }

    async fn update_hardware_state(&self) -> Result<HardwareState, ProvisionerError> {
        self.inner.update_hardware_state().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::provisioner::{RaidConfig, SoftwareRaidVolume};

    const PROV_ID: &str = "node-1";

    /// Inner provisioner recording what it was asked to do.
    #[derive(Default)]
    struct RecordingProvisioner {
        calls: Mutex<Vec<String>>,
        states: Mutex<Vec<ProvisioningState>>,
        provisioned: Mutex<Vec<ProvisionData>>,
        provision_result: ProvisionResult,
        deprovision_result: ProvisionResult,
    }

    impl RecordingProvisioner {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Provisioner for Arc<RecordingProvisioner> {
        async fn validate_management_access(
            &self,
            data: ManagementAccessData,
            _credentials_changed: bool,
            _force: bool,
        ) -> Result<(ProvisionResult, String), ProvisionerError> {
            self.record("validate");
            self.states.lock().unwrap().push(data.state);
            Ok((ProvisionResult::complete(), PROV_ID.to_string()))
        }

        async fn adopt(&self, data: AdoptData, _force: bool) -> Result<ProvisionResult, ProvisionerError> {
            self.record("adopt");
            self.states.lock().unwrap().push(data.state);
            Ok(ProvisionResult::complete())
        }

        async fn inspect_hardware(
            &self,
            _data: InspectData,
            _force: bool,
        ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError> {
            self.record("inspect");
            Ok((ProvisionResult::complete(), None))
        }

        async fn prepare(
            &self,
            _data: PrepareData,
            _unprepared: bool,
        ) -> Result<(ProvisionResult, bool), ProvisionerError> {
            self.record("prepare");
            Ok((ProvisionResult::complete(), false))
        }

        async fn provision(&self, data: ProvisionData) -> Result<ProvisionResult, ProvisionerError> {
            self.record("provision");
            self.provisioned.lock().unwrap().push(data);
            Ok(self.provision_result.clone())
        }

        async fn deprovision(&self, _force: bool) -> Result<ProvisionResult, ProvisionerError> {
            self.record("deprovision");
            Ok(self.deprovision_result.clone())
        }

        async fn delete(&self) -> Result<ProvisionResult, ProvisionerError> {
            self.record("delete");
            Ok(ProvisionResult::complete())
        }

        async fn power_on(&self) -> Result<ProvisionResult, ProvisionerError> {
            self.record("power_on");
            Ok(ProvisionResult::complete())
        }

        async fn power_off(&self, _mode: RebootMode) -> Result<ProvisionResult, ProvisionerError> {
            self.record("power_off");
            Ok(ProvisionResult::complete())
        }

        async fn is_ready(&self) -> Result<bool, ProvisionerError> {
            Ok(true)
        }

        async fn has_provisioning_capacity(&self) -> Result<bool, ProvisionerError> {
            Ok(true)
        }

        async fn update_hardware_state(&self) -> Result<HardwareState, ProvisionerError> {
            Ok(HardwareState::default())
        }
    }

    #[derive(Default)]
    struct FakeAgent {
        deployed: AtomicBool,
        cleaned: AtomicBool,
        deploy_done: bool,
    }

    #[async_trait]
    impl Agent for FakeAgent {
        async fn hardware_details(&self) -> Result<HardwareDetails, ProvisionerError> {
            Ok(HardwareDetails {
                cpu_count: Some(4),
                ..HardwareDetails::default()
            })
        }

        async fn is_deployed(&self) -> Result<bool, ProvisionerError> {
            Ok(self.deployed.load(Ordering::SeqCst))
        }

        async fn deploy(&self, _url: &str) -> Result<bool, ProvisionerError> {
            self.deployed.store(true, Ordering::SeqCst);
            Ok(self.deploy_done)
        }

        async fn clean_up(&self) -> Result<(), ProvisionerError> {
            self.cleaned.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeLocator(Option<Arc<FakeAgent>>);

    #[async_trait]
    impl AgentLocator for FakeLocator {
        async fn find_agent(&self, _host: &HostData) -> Result<Option<Arc<dyn Agent>>, ProvisionerError> {
            Ok(self.0.clone().map(|a| a as Arc<dyn Agent>))
        }
    }

    fn wrapper(
        inner: &Arc<RecordingProvisioner>,
        agent: Option<Arc<FakeAgent>>,
    ) -> AgentProvisioner {
        let host = HostData {
            name: "worker-0".into(),
            provisioner_id: PROV_ID.into(),
            ..HostData::default()
        };
        AgentProvisioner::new(
            Box::new(Arc::clone(inner)),
            host,
            Arc::new(FakeLocator(agent)),
            "http://agent.test/live.iso".into(),
        )
    }

    #[tokio::test]
    async fn test_prepare_with_raid_fails_for_any_request() {
        let inner = Arc::new(RecordingProvisioner::default());
        let prov = wrapper(&inner, None);

        let data = PrepareData {
            raid_config: Some(RaidConfig {
                software_raid_volumes: vec![SoftwareRaidVolume {
                    level: "1".into(),
                    size_gibibytes: None,
                }],
                ..RaidConfig::default()
            }),
        };
        for unprepared in [false, true] {
            let err = prov.prepare(data.clone(), unprepared).await.unwrap_err();
            assert!(matches!(err, ProvisionerError::Unsupported(_)));
            assert!(!err.is_retryable());
        }

        let (result, started) = prov.prepare(PrepareData::default(), true).await.unwrap();
        assert_eq!(result, ProvisionResult::complete());
        assert!(!started);
        assert!(inner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_registration_boots_agent() {
        let inner = Arc::new(RecordingProvisioner::default());
        let prov = wrapper(&inner, None);

        let data = ManagementAccessData {
            state: ProvisioningState::Registering,
            ..ManagementAccessData::default()
        };
        let (result, id) = prov.validate_management_access(data, false, false).await.unwrap();

        assert_eq!(id, PROV_ID);
        assert_eq!(inner.calls(), vec!["validate", "provision"]);
        assert_eq!(*inner.states.lock().unwrap(), vec![ProvisioningState::Provisioning]);
        assert!(result.dirty, "no agent yet");
        assert_eq!(result.requeue_after, REQUEUE_DELAY);

        let booted = inner.provisioned.lock().unwrap()[0].clone();
        assert!(booted.image.is_live_iso());
        assert_eq!(booted.image.url, "http://agent.test/live.iso");
        assert_eq!(booted.boot_mode, BootMode::Uefi);
        assert_eq!(booted.hardware_profile.name, "libvirt");
    }

    #[tokio::test]
    async fn test_agent_gating_after_inner_provisioning() {
        let inner = Arc::new(RecordingProvisioner::default());
        let prov = wrapper(&inner, Some(Arc::new(FakeAgent::default())));

        let data = ManagementAccessData {
            state: ProvisioningState::Registering,
            ..ManagementAccessData::default()
        };
        let (result, _) = prov.validate_management_access(data, false, false).await.unwrap();
        assert_eq!(result, ProvisionResult::complete());
    }

    #[tokio::test]
    async fn test_incomplete_inner_provisioning_short_circuits() {
        let inner = Arc::new(RecordingProvisioner {
            provision_result: ProvisionResult::failed("deploy failed"),
            ..RecordingProvisioner::default()
        });
        let prov = wrapper(&inner, None);

        let data = ManagementAccessData {
            state: ProvisioningState::Registering,
            ..ManagementAccessData::default()
        };
        let (result, _) = prov.validate_management_access(data, false, false).await.unwrap();
        assert_eq!(result.error_message, "deploy failed");
    }

    #[tokio::test]
    async fn test_validate_outside_registration_only_forwards() {
        let inner = Arc::new(RecordingProvisioner::default());
        let prov = wrapper(&inner, None);

        let data = ManagementAccessData {
            state: ProvisioningState::Ready,
            ..ManagementAccessData::default()
        };
        prov.validate_management_access(data, false, false).await.unwrap();
        assert_eq!(inner.calls(), vec!["validate"]);
        assert_eq!(*inner.states.lock().unwrap(), vec![ProvisioningState::Provisioned]);
    }

    #[tokio::test]
    async fn test_deprovisioning_state_depends_on_agent() {
        let inner = Arc::new(RecordingProvisioner::default());
        let data = AdoptData {
            state: ProvisioningState::Deprovisioning,
        };

        wrapper(&inner, None).adopt(data.clone(), false).await.unwrap();
        wrapper(&inner, Some(Arc::new(FakeAgent::default())))
            .adopt(data, false)
            .await
            .unwrap();

        assert_eq!(
            *inner.states.lock().unwrap(),
            vec![ProvisioningState::Provisioning, ProvisioningState::Deprovisioning]
        );
    }

    #[tokio::test]
    async fn test_provision_uses_agent() {
        let inner = Arc::new(RecordingProvisioner::default());
        let image = ProvisionData {
            image: Image {
                url: "http://images/os.img".into(),
                ..Image::default()
            },
            boot_mode: BootMode::Uefi,
            hardware_profile: get_profile("unknown").unwrap(),
            root_device_hints: None,
        };

        let result = wrapper(&inner, None).provision(image.clone()).await.unwrap();
        assert!(result.dirty);

        let agent = Arc::new(FakeAgent {
            deploy_done: true,
            ..FakeAgent::default()
        });
        let result = wrapper(&inner, Some(agent)).provision(image).await.unwrap();
        assert_eq!(result, ProvisionResult::complete());
        assert!(inner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_cleans_up_then_reboots_agent() {
        let inner = Arc::new(RecordingProvisioner::default());
        let agent = Arc::new(FakeAgent::default());
        agent.deployed.store(true, Ordering::SeqCst);
        let prov = wrapper(&inner, Some(Arc::clone(&agent)));

        let result = prov.deprovision(false).await.unwrap();
        assert_eq!(result, ProvisionResult::complete());
        assert!(agent.cleaned.load(Ordering::SeqCst));
        assert_eq!(inner.calls(), vec!["deprovision", "provision"]);
    }

    #[tokio::test]
    async fn test_deprovision_waits_for_inner() {
        let inner = Arc::new(RecordingProvisioner {
            deprovision_result: ProvisionResult::continuing(REQUEUE_DELAY),
            ..RecordingProvisioner::default()
        });
        let agent = Arc::new(FakeAgent::default());
        agent.deployed.store(true, Ordering::SeqCst);
        let prov = wrapper(&inner, Some(Arc::clone(&agent)));

        let result = prov.deprovision(true).await.unwrap();
        assert!(result.dirty);
        assert!(!agent.cleaned.load(Ordering::SeqCst));
        assert_eq!(inner.calls(), vec!["deprovision"]);
    }

    #[tokio::test]
    async fn test_inspection_reads_agent() {
        let inner = Arc::new(RecordingProvisioner::default());

        let (result, details) = wrapper(&inner, None)
            .inspect_hardware(InspectData::default(), false)
            .await
            .unwrap();
        assert!(result.dirty);
        assert!(details.is_none());

        let (_, details) = wrapper(&inner, Some(Arc::new(FakeAgent::default())))
            .inspect_hardware(InspectData::default(), false)
            .await
            .unwrap();
        assert_eq!(details.unwrap().cpu_count, Some(4));
    }

    #[tokio::test]
    async fn test_adoption_states_are_remapped() {
        let inner = Arc::new(RecordingProvisioner::default());
        let prov = wrapper(&inner, None);

        for state in [ProvisioningState::Adopting, ProvisioningState::Adopted] {
            prov.adopt(AdoptData { state }, false).await.unwrap();
        }

        assert_eq!(inner.calls(), vec!["adopt", "adopt"]);
        assert_eq!(
            *inner.states.lock().unwrap(),
            vec![ProvisioningState::Provisioned, ProvisioningState::Provisioned]
        );
    }
}
