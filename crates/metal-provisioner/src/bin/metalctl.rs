//! metalctl - run single provisioner operations against a node backend.
//!
//! Each invocation performs one reconcile tick of one operation and prints
//! the result. Re-run the command while `dirty` is true.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use metal_provisioner::hardware::get_profile;
use metal_provisioner::provisioner::{
    AdoptData, BmcDetails, BootMode, Credentials, Image, InspectData, ManagementAccessData,
    ProvisionData, RaidConfig, RebootMode,
};
use metal_provisioner::{
    AgentFactory, EmptyFactory, HostData, HttpAgentLocator, HttpBackend, IronicFactory,
    PrepareData, ProvisionResult, ProvisionerConfig, ProvisionerFactory, ProvisioningState,
    TracingEventPublisher,
};

/// metalctl - bare metal host provisioning, one tick at a time.
#[derive(Parser)]
#[command(name = "metalctl")]
#[command(about = "Drive bare metal hosts through provisioning operations")]
struct Cli {
    /// Node API endpoint (or set `IRONIC_ENDPOINT` env var).
    #[arg(long, env = "IRONIC_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token for the node API (or set `IRONIC_AUTH_TOKEN` env var).
    #[arg(long, env = "IRONIC_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// YAML configuration file. Overrides environment configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Provisioning strategy.
    #[arg(long, value_enum, default_value = "ironic")]
    strategy: Strategy,

    /// Host name.
    #[arg(long)]
    name: String,

    /// Host namespace.
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Backend id of the host, if already registered.
    #[arg(long, default_value = "")]
    provisioner_id: String,

    /// BMC address (or set `BMC_ADDRESS` env var).
    #[arg(long, env = "BMC_ADDRESS", default_value = "")]
    bmc_address: String,

    /// BMC username (or set `BMC_USERNAME` env var).
    #[arg(long, env = "BMC_USERNAME", default_value = "")]
    bmc_username: String,

    /// BMC password (or set `BMC_PASSWORD` env var).
    #[arg(long, env = "BMC_PASSWORD", default_value = "", hide_env_values = true)]
    bmc_password: String,

    /// Skip TLS verification when talking to the BMC.
    #[arg(long, default_value = "false")]
    disable_certificate_verification: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Ironic-style node state machine.
    Ironic,
    /// Node state machine booting a helper agent that deploys the image.
    Agent,
    /// No-op provisioner.
    Empty,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the host and verify BMC access.
    Validate {
        /// Provisioning state of the host (e.g. registering, ready).
        #[arg(long, default_value = "registering")]
        state: String,

        /// BMC credentials changed since the last run.
        #[arg(long, default_value = "false")]
        credentials_changed: bool,

        /// Retry after a verification failure.
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Adopt an already provisioned host.
    Adopt {
        /// Retry after an adoption failure.
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Inspect hardware.
    Inspect {
        /// Boot mode (uefi, uefi-secure-boot, legacy).
        #[arg(long, default_value = "uefi")]
        boot_mode: String,

        /// Inspect again even if inspection already ran.
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Apply RAID configuration through cleaning.
    Prepare {
        /// YAML file with the RAID configuration.
        #[arg(long)]
        raid: Option<PathBuf>,

        /// Configuration has not been applied yet.
        #[arg(long, default_value = "false")]
        unprepared: bool,
    },

    /// Write an image to the host.
    Provision {
        /// Image URL.
        #[arg(long)]
        image_url: String,

        /// Image checksum.
        #[arg(long)]
        checksum: Option<String>,

        /// Checksum algorithm (e.g. sha256).
        #[arg(long)]
        checksum_type: Option<String>,

        /// Disk format (raw, qcow2, live-iso).
        #[arg(long)]
        disk_format: Option<String>,

        /// Hardware profile name.
        #[arg(long, default_value = "unknown")]
        profile: String,

        /// Boot mode (uefi, uefi-secure-boot, legacy).
        #[arg(long, default_value = "uefi")]
        boot_mode: String,
    },

    /// Remove the image from the host.
    Deprovision {
        /// Skip graceful clean-up.
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Remove the host from the backend.
    Delete,

    /// Power the host on.
    PowerOn,

    /// Power the host off.
    PowerOff {
        /// Cut power instead of a graceful shutdown.
        #[arg(long, default_value = "false")]
        hard: bool,
    },

    /// Show backend readiness and host power state.
    Status,

    /// Check whether another host may start a busy operation.
    Capacity,
}

/// Parse a kebab-case enum value the way it is serialized.
fn parse_value<T: DeserializeOwned>(kind: &str, value: &str) -> Result<T> {
    serde_json::from_value(Value::String(value.to_string()))
        .with_context(|| format!("Invalid {kind}: {value}"))
}

fn load_config(cli: &Cli) -> Result<ProvisionerConfig> {
    if let Some(path) = &cli.config {
        return ProvisionerConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }
    match &cli.endpoint {
        Some(endpoint) => {
            let mut config = ProvisionerConfig::from_env()
                .unwrap_or_else(|_| ProvisionerConfig::new(endpoint.clone()));
            config.ironic_endpoint.clone_from(endpoint);
            config.validate().context("Invalid configuration")?;
            Ok(config)
        }
        None => ProvisionerConfig::from_env().context("Failed to load configuration"),
    }
}

fn ironic_factory(cli: &Cli, config: ProvisionerConfig) -> Result<IronicFactory> {
    debug!(endpoint = %config.ironic_endpoint, "using node backend");
    let mut backend = HttpBackend::new(&config.ironic_endpoint)
        .context("Failed to create backend client")?;
    if let Some(token) = &cli.auth_token {
        backend = backend.with_auth_token(token.clone());
    }
    Ok(IronicFactory::new(Arc::new(backend), config))
}

fn load_raid(path: &Path) -> Result<RaidConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).context("Invalid RAID configuration")
}

fn print_result(result: &ProvisionResult, extra: &Value) -> Result<()> {
    let mut output = json!({
        "dirty": result.dirty,
        "requeueAfterSeconds": result.requeue_after.as_secs(),
        "errorMessage": result.error_message,
    });
    if let (Some(out), Some(extra)) = (output.as_object_mut(), extra.as_object()) {
        out.extend(extra.clone());
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let host = HostData {
        name: cli.name.clone(),
        namespace: cli.namespace.clone(),
        provisioner_id: cli.provisioner_id.clone(),
        bmc: BmcDetails {
            address: cli.bmc_address.clone(),
            disable_certificate_verification: cli.disable_certificate_verification,
        },
        credentials: Credentials {
            username: cli.bmc_username.clone(),
            password: cli.bmc_password.clone(),
        },
        boot_mac_address: None,
    };
    let publisher = Arc::new(TracingEventPublisher::new(host.node_name()));

    let factory: Box<dyn ProvisionerFactory> = match cli.strategy {
        Strategy::Ironic => Box::new(ironic_factory(&cli, load_config(&cli)?)?),
        Strategy::Agent => {
            let config = load_config(&cli)?;
            let service_url = config
                .agent_service_url
                .clone()
                .context("AGENT_SERVICE_URL is required for the agent strategy")?;
            let api_url = config
                .agent_api_url
                .clone()
                .context("AGENT_API_URL is required for the agent strategy")?;
            debug!(agent_api = %api_url, "using agent directory");
            let locator = HttpAgentLocator::new(&api_url).context("Failed to create agent client")?;
            let delegate = ironic_factory(&cli, config)?;
            Box::new(AgentFactory::new(Arc::new(delegate), Arc::new(locator), service_url))
        }
        Strategy::Empty => Box::new(EmptyFactory),
    };
    let prov = factory
        .create(host, publisher)
        .context("Failed to create provisioner")?;

    match cli.command {
        Commands::Validate {
            state,
            credentials_changed,
            force,
        } => {
            let data = ManagementAccessData {
                state: parse_value::<ProvisioningState>("state", &state)?,
                ..ManagementAccessData::default()
            };
            let (result, id) = prov
                .validate_management_access(data, credentials_changed, force)
                .await?;
            info!(id = %id, "management access checked");
            print_result(&result, &json!({ "provisionerId": id }))?;
        }

        Commands::Adopt { force } => {
            let result = prov
                .adopt(
                    AdoptData {
                        state: ProvisioningState::Adopting,
                    },
                    force,
                )
                .await?;
            print_result(&result, &json!({}))?;
        }

        Commands::Inspect { boot_mode, force } => {
            let data = InspectData {
                boot_mode: parse_value::<BootMode>("boot mode", &boot_mode)?,
            };
            let (result, details) = prov.inspect_hardware(data, force).await?;
            print_result(&result, &json!({ "hardwareDetails": details }))?;
        }

        Commands::Prepare { raid, unprepared } => {
            let data = PrepareData {
                raid_config: raid.as_deref().map(load_raid).transpose()?,
            };
            let (result, started) = prov.prepare(data, unprepared).await?;
            print_result(&result, &json!({ "started": started }))?;
        }

        Commands::Provision {
            image_url,
            checksum,
            checksum_type,
            disk_format,
            profile,
            boot_mode,
        } => {
            let data = ProvisionData {
                image: Image {
                    url: image_url,
                    checksum,
                    checksum_type,
                    disk_format,
                },
                boot_mode: parse_value::<BootMode>("boot mode", &boot_mode)?,
                hardware_profile: get_profile(&profile)?,
                root_device_hints: None,
            };
            let result = prov.provision(data).await?;
            print_result(&result, &json!({}))?;
        }

        Commands::Deprovision { force } => {
            let result = prov.deprovision(force).await?;
            print_result(&result, &json!({}))?;
        }

        Commands::Delete => {
            let result = prov.delete().await?;
            print_result(&result, &json!({}))?;
        }

        Commands::PowerOn => {
            let result = prov.power_on().await?;
            print_result(&result, &json!({}))?;
        }

        Commands::PowerOff { hard } => {
            let mode = if hard { RebootMode::Hard } else { RebootMode::Soft };
            let result = prov.power_off(mode).await?;
            print_result(&result, &json!({}))?;
        }

        Commands::Status => {
            let ready = prov.is_ready().await?;
            let state = prov.update_hardware_state().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "backendReady": ready,
                    "poweredOn": state.powered_on,
                }))?
            );
        }

        Commands::Capacity => {
            let capacity = prov.has_provisioning_capacity().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "hasCapacity": capacity }))?
            );
        }
    }

    Ok(())
}
