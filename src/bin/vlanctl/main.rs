use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ipnetwork::IpNetwork;
use itertools::Itertools;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vlan_domain::config::{validate_vid, CtlConfig, VlanConf};
use vlan_domain::state::Store;
use vlan_domain::{generate_name, IpCommand, LocalArea, Netlink, Vlan, BOND_SUFFIX};

/// A command line tool to manage node-local VLAN domains
#[derive(Parser)]
#[command(name = "vlanctl", author, version, about)]
struct Cli {
    /// Path to the vlanctl configuration file
    #[arg(long, default_value = "/etc/vlan-domain/config.json")]
    config: PathBuf,

    /// Deadline for the whole operation, in seconds (overrides the config file)
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the bridge, attach the uplink and enable local areas
    Setup {
        /// VLAN domain name
        #[arg(long)]
        name: String,

        /// Uplink interface to attach to the bridge
        #[arg(long)]
        uplink: String,

        /// Local area as VID or VID=CIDR (repeatable)
        #[arg(long)]
        area: Vec<LocalArea>,
    },

    /// Set up a domain from a JSON description
    Apply {
        /// Path to the VLAN configuration file
        #[arg(long)]
        file: PathBuf,
    },

    /// Enable a local area on an existing domain
    Add {
        /// VLAN domain name
        #[arg(long)]
        name: String,

        /// VLAN ID (1-4094)
        #[arg(long)]
        vid: u16,

        /// Subnet to route via the local gateway
        #[arg(long)]
        cidr: Option<String>,
    },

    /// Disable a local area on an existing domain
    Remove {
        /// VLAN domain name
        #[arg(long)]
        name: String,

        /// VLAN ID (1-4094)
        #[arg(long)]
        vid: u16,
    },

    /// List the local areas recorded for a domain
    List {
        /// VLAN domain name
        #[arg(long)]
        name: String,
    },

    /// Show the bridge and uplink of an existing domain
    Show {
        /// VLAN domain name
        #[arg(long)]
        name: String,
    },

    /// Detach the uplink and delete the uplink and bridge
    Teardown {
        /// VLAN domain name
        #[arg(long)]
        name: String,
    },

    /// Generate a VLAN configuration
    Generate {
        /// VLAN domain name
        #[arg(long)]
        name: String,

        /// Uplink interface
        #[arg(long)]
        uplink: String,

        /// Local area as VID or VID=CIDR (repeatable)
        #[arg(long)]
        area: Vec<LocalArea>,

        /// Output file path
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Run a blocking domain operation under a deadline.
///
/// The kernel calls cannot be cancelled; on timeout the operation is abandoned
/// and the process exits with an error.
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => joined.context("Domain operation panicked")?,
        Err(_) => anyhow::bail!("Domain operation timed out after {}s", timeout.as_secs()),
    }
}

fn warn_if_unprivileged() {
    if !nix::unistd::geteuid().is_root() {
        warn!("Not running as root; link and route changes will likely be refused");
    }
}

fn parse_cidr(cidr: Option<String>) -> Result<Option<IpNetwork>> {
    match cidr.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(cidr) => cidr
            .parse::<IpNetwork>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid CIDR {}: {}", cidr, e)),
    }
}

fn apply(conf: VlanConf, netlink: IpCommand, store: Store) -> Result<()> {
    conf.validate()?;

    if conf.uplink != generate_name(&conf.name, BOND_SUFFIX) {
        warn!(
            uplink = %conf.uplink,
            expected = %generate_name(&conf.name, BOND_SUFFIX),
            "Uplink does not follow the naming convention; later commands will not discover it"
        );
    }

    let uplink = netlink
        .link_by_name(&conf.uplink)
        .with_context(|| format!("Uplink interface {} does not exist", conf.uplink))?;

    let mut vlan = Vlan::new(&conf.name, conf.local_areas.clone(), netlink);
    let result = vlan.setup(uplink);

    // Record whatever was applied, even when setup stopped part way
    store.save_merged(&mut vlan)?;
    result.with_context(|| format!("Failed to set up VLAN {}", conf.name))?;

    info!(vlan = %conf.name, bridge = %vlan.bridge().name, "VLAN network is ready");
    Ok(())
}

fn discover(name: &str, netlink: IpCommand, store: &Store) -> Result<Vlan<IpCommand>> {
    let mut vlan =
        Vlan::get(name, netlink).with_context(|| format!("VLAN {} is not provisioned", name))?;
    vlan.adopt_local_areas(store.load(name)?);
    Ok(vlan)
}

fn add_local_area(name: &str, la: LocalArea, netlink: IpCommand, store: Store) -> Result<()> {
    let mut vlan = discover(name, netlink, &store)?;
    let result = vlan.add_local_area(la);
    store.save(name, vlan.list_local_area())?;
    result.with_context(|| format!("Failed to add local area to VLAN {}", name))?;
    Ok(())
}

fn remove_local_area(name: &str, vid: u16, netlink: IpCommand, store: Store) -> Result<()> {
    let mut vlan = discover(name, netlink, &store)?;
    let result = vlan.remove_local_area(&LocalArea::vlan_only(vid));
    store.save(name, vlan.list_local_area())?;
    result.with_context(|| format!("Failed to remove local area from VLAN {}", name))?;
    Ok(())
}

fn teardown(name: &str, netlink: IpCommand, store: Store) -> Result<()> {
    let mut vlan = discover(name, netlink, &store)?;
    vlan.teardown()
        .with_context(|| format!("Failed to tear down VLAN {}", name))?;
    store.remove(name)?;
    Ok(())
}

fn show(name: &str, netlink: IpCommand, store: Store) -> Result<()> {
    let vlan = discover(name, netlink, &store)?;

    println!("VLAN {} ({}):", vlan.name(), vlan.kind());
    println!("  Bridge: {}", vlan.bridge().name);
    if let Some(attrs) = &vlan.bridge().attrs {
        println!("    Index: {}", attrs.index);
        if let Some(state) = &attrs.oper_state {
            println!("    State: {}", state);
        }
        if let Some(mtu) = attrs.mtu {
            println!("    MTU: {}", mtu);
        }
        println!(
            "    VLAN filtering: {}",
            attrs.vlan_filtering.unwrap_or(false)
        );
    }

    if let Some(uplink) = vlan.uplink() {
        println!("  Uplink: {}", uplink.name);
        if let Some(kind) = &uplink.attrs.kind {
            println!("    Kind: {}", kind);
        }
        if let Some(master) = &uplink.attrs.master {
            println!("    Master: {}", master);
        }
    }

    if vlan.list_local_area().is_empty() {
        println!("  Local areas: none recorded");
    } else {
        println!(
            "  Local areas: {}",
            vlan.list_local_area().iter().join(", ")
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure logging based on verbosity
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    let config = CtlConfig::load(&cli.config)?;
    let timeout = Duration::from_secs(cli.timeout.unwrap_or(config.timeout_secs));
    let netlink = IpCommand::from_config(&config);
    let store = Store::new(config.state_dir.clone());

    match cli.command {
        Commands::Setup { name, uplink, area } => {
            warn_if_unprivileged();
            let conf = VlanConf::new(&name, &uplink, area);
            run_blocking(timeout, move || apply(conf, netlink, store)).await?;
            println!("VLAN {} set up on {}", name, uplink);
        }

        Commands::Apply { file } => {
            warn_if_unprivileged();
            let bytes = fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let conf = VlanConf::parse(&bytes)?;
            let name = conf.name.clone();
            run_blocking(timeout, move || apply(conf, netlink, store)).await?;
            println!("VLAN {} applied from {}", name, file.display());
        }

        Commands::Add { name, vid, cidr } => {
            warn_if_unprivileged();
            validate_vid(vid)?;
            let la = LocalArea::new(vid, parse_cidr(cidr)?);
            let task_name = name.clone();
            run_blocking(timeout, move || add_local_area(&task_name, la, netlink, store)).await?;
            println!("Local area {} added to VLAN {}", vid, name);
        }

        Commands::Remove { name, vid } => {
            warn_if_unprivileged();
            let task_name = name.clone();
            run_blocking(timeout, move || {
                remove_local_area(&task_name, vid, netlink, store)
            })
            .await?;
            println!("Local area {} removed from VLAN {}", vid, name);
        }

        Commands::List { name } => {
            let local_areas = store.load(&name)?;
            if local_areas.is_empty() {
                println!("No local areas recorded for VLAN {}", name);
            } else {
                println!("Local areas of VLAN {}:", name);
                for la in local_areas {
                    match la.cidr {
                        Some(cidr) => println!("  VLAN {} (route {} via gateway)", la.vid, cidr),
                        None => println!("  VLAN {}", la.vid),
                    }
                }
            }
        }

        Commands::Show { name } => {
            run_blocking(timeout, move || show(&name, netlink, store)).await?;
        }

        Commands::Teardown { name } => {
            warn_if_unprivileged();
            let task_name = name.clone();
            run_blocking(timeout, move || teardown(&task_name, netlink, store)).await?;
            println!("VLAN {} torn down", name);
        }

        Commands::Generate {
            name,
            uplink,
            area,
            output,
        } => {
            let conf = VlanConf::new(&name, &uplink, area);
            conf.validate()?;

            if let Some(path) = output {
                conf.save(&path)?;
                println!("VLAN configuration written to {}", path.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&conf)?);
            }
        }
    }

    Ok(())
}
