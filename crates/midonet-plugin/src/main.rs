//! midonet-plugin - configuration check and offline tooling.
//!
//! The plugin itself runs inside the network service; this binary validates
//! a deployment's configuration, prints the controller names derived for a
//! logical id, and can replay a small topology against an in-memory
//! controller.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use midonet_client::api::RouterSpec;
use midonet_client::{Controller, MemoryController};
use midonet_plugin::audit::{init_logging, init_logging_pretty};
use midonet_plugin::config::{LockBackend, LogFormat, DEFAULT_CONFIG_PATH};
use midonet_plugin::mapper::{name_for, NameRole};
use midonet_plugin::{
    MemoryStore, MidonetPlugin, NetworkRequest, PluginConfig, PortRequest, Stores, SubnetRequest,
};
use midonet_types::{IpAddress, IpPrefix, MacAddress};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "midonet-plugin")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plugin configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level, overridden by RUST_LOG
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration
    CheckConfig,
    /// Print every controller name derived from a logical id
    Names { id: Uuid },
    /// Build a network, subnet and port against an in-memory controller
    DryRun {
        #[arg(long, default_value = "demo")]
        tenant: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match PluginConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {}", args.config, e);
            return ExitCode::FAILURE;
        }
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    match config.logging.format {
        LogFormat::Json => init_logging(&level),
        LogFormat::Pretty => init_logging_pretty(&level),
    }

    match run(args.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "midonet-plugin failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: PluginConfig) -> Result<()> {
    match command {
        Command::CheckConfig => {
            config.validate().context("invalid configuration")?;
            info!(
                midonet_uri = %config.midonet.midonet_uri,
                provider_router = ?config.midonet.provider_router_id,
                lock_backend = ?config.locking.backend,
                "Configuration is valid"
            );
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Names { id } => {
            for role in NameRole::ALL {
                println!("{:<14} {:<15} {}", role, role.owner_kind(), name_for(role, &id));
            }
        }
        Command::DryRun { tenant } => dry_run(config, &tenant)?,
    }
    Ok(())
}

fn dry_run(mut config: PluginConfig, tenant: &str) -> Result<()> {
    let controller = Arc::new(MemoryController::new());
    let provider = controller
        .create_router(&RouterSpec::new("admin", "provider"))
        .context("creating provider router")?;
    config.midonet.provider_router_id = Some(provider.id.to_string());
    config.locking.backend = LockBackend::Local;

    let stores = Stores::from_shared(Arc::new(MemoryStore::new()));
    let plugin = MidonetPlugin::new(&config, controller.clone(), stores)?;

    let network = plugin.create_network(NetworkRequest::new(tenant, "dry-run"))?;
    let subnet = plugin.create_subnet(
        SubnetRequest::new(network.id, tenant, IpPrefix::v4(10, 0, 0, 0, 24))
            .with_gateway(IpAddress::v4(10, 0, 0, 1)),
    )?;
    let port = plugin.create_port(
        PortRequest::new(tenant, network.id, MacAddress::new([0xfa, 0x16, 0x3e, 0, 0, 1]))
            .with_fixed_ip(subnet.id, IpAddress::v4(10, 0, 0, 3)),
    )?;

    for call in controller.calls() {
        println!("{:<28} {}", call.operation, call.target);
    }
    info!(
        network = %network.id,
        port = %port.id,
        calls = controller.calls().len(),
        chains = controller.chain_names().len(),
        "Dry run complete"
    );
    Ok(())
}
