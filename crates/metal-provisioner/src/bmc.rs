//! BMC address parsing and driver capabilities.

use url::Url;

use crate::options::{OptionValue, OptionsData};
use crate::provisioner::{Credentials, ProvisionerError};

/// Hardware management protocol spoken by a BMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmcDriver {
    /// Plain IPMI.
    Ipmi,
    /// DMTF Redfish.
    Redfish,
    /// Dell iDRAC.
    Idrac,
    /// Fujitsu iRMC.
    Irmc,
    /// HPE iLO 4.
    Ilo4,
    /// HPE iLO 5.
    Ilo5,
}

impl BmcDriver {
    fn from_scheme(scheme: &str) -> Option<Self> {
        let driver = match scheme {
            "ipmi" | "libvirt" => Self::Ipmi,
            "redfish" | "redfish+http" | "redfish+https" | "redfish-virtualmedia" => Self::Redfish,
            "idrac" | "idrac-redfish" | "idrac-virtualmedia" => Self::Idrac,
            "irmc" => Self::Irmc,
            "ilo4" => Self::Ilo4,
            "ilo5" => Self::Ilo5,
            _ => return None,
        };
        Some(driver)
    }

    /// Backend driver name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ipmi => "ipmi",
            Self::Redfish => "redfish",
            Self::Idrac => "idrac",
            Self::Irmc => "irmc",
            Self::Ilo4 => "ilo",
            Self::Ilo5 => "ilo5",
        }
    }

    /// Prefix of the driver's `driver_info` keys.
    fn info_prefix(self) -> &'static str {
        match self {
            Self::Ipmi => "ipmi",
            Self::Redfish => "redfish",
            Self::Idrac => "drac",
            Self::Irmc => "irmc",
            Self::Ilo4 | Self::Ilo5 => "ilo",
        }
    }
}

/// A parsed BMC address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmcAccess {
    driver: BmcDriver,
    host: String,
    port: Option<u16>,
    path: String,
    secure: bool,
}

impl BmcAccess {
    /// Parse a BMC address. Addresses without a scheme are IPMI.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::InvalidHost`] for malformed addresses and
    /// [`ProvisionerError::Unsupported`] for unknown schemes.
    pub fn parse(address: &str) -> Result<Self, ProvisionerError> {
        if address.trim().is_empty() {
            return Err(ProvisionerError::InvalidHost("missing BMC address".into()));
        }

        let normalized = if address.contains("://") {
            address.to_string()
        } else {
            format!("ipmi://{address}")
        };
        let url = Url::parse(&normalized)
            .map_err(|e| ProvisionerError::InvalidHost(format!("BMC address {address}: {e}")))?;

        let driver = BmcDriver::from_scheme(url.scheme()).ok_or_else(|| {
            ProvisionerError::Unsupported(format!("unknown BMC type '{}'", url.scheme()))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| ProvisionerError::InvalidHost(format!("BMC address {address} has no host")))?
            .to_string();

        Ok(Self {
            driver,
            host,
            port: url.port(),
            path: url.path().to_string(),
            secure: url.scheme() != "redfish+http",
        })
    }

    /// Driver used to talk to this BMC.
    #[must_use]
    pub fn driver(&self) -> BmcDriver {
        self.driver
    }

    /// Whether the BMC can build hardware RAID volumes.
    #[must_use]
    pub fn supports_hardware_raid(&self) -> bool {
        matches!(
            self.driver,
            BmcDriver::Idrac | BmcDriver::Irmc | BmcDriver::Ilo5
        )
    }

    /// Desired `driver_info` for this BMC.
    #[must_use]
    pub fn driver_info(&self, credentials: &Credentials, disable_verify: bool) -> OptionsData {
        let prefix = self.driver.info_prefix();
        let mut info = OptionsData::new();
        let mut set = |key: &str, value: Option<OptionValue>| {
            info.insert(format!("{prefix}_{key}"), value);
        };

        match self.driver {
            BmcDriver::Redfish => {
                let scheme = if self.secure { "https" } else { "http" };
                let authority = match self.port {
                    Some(port) => format!("{}:{port}", self.host),
                    None => self.host.clone(),
                };
                set("address", Some(format!("{scheme}://{authority}").into()));
                set("system_id", Some(self.path.clone().into()));
                set("verify_ca", disable_verify.then_some(false.into()));
            }
            _ => {
                set("address", Some(self.host.clone().into()));
                set("port", self.port.map(|p| OptionValue::from(u32::from(p))));
            }
        }
        set("username", Some(credentials.username.clone().into()));
        set("password", Some(credentials.password.clone().into()));

        info
    }
}
