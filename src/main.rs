//! netmap - network topology inference agent
//!
//! This binary can:
//! - Build a topology (nodes, links, central node) from the device inventory
//! - Inspect and delete stored topologies
//! - Check or recalculate the central node election
//! - Run as a background daemon (for systemd integration)

mod agent;
mod config;
mod daemon;
mod inventory;
mod persistence;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use netmap_core::pipeline::{GenerateOptions, GenerationReport, Timeouts};
use netmap_core::topology::Topology;

#[derive(Parser)]
#[command(name = "netmap")]
#[command(author = "netmap Team")]
#[command(version)]
#[command(about = "Network topology inference agent")]
#[command(long_about = "
netmap builds a network topology from a device inventory: it classifies
devices, probes reachability, reads switch forwarding tables over SNMP,
elects a central node and stores the result.

Quick start:
  1. Show configuration:  netmap config
  2. Build a topology:    netmap generate
  3. Start daemon:        netmap daemon --interval 15
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Per-run generation options
#[derive(Args, Debug, Clone, Default)]
pub struct GenerateArgs {
    /// Use this address as the central node
    #[arg(long)]
    pub gateway: Option<String>,

    /// SNMP community for forwarding-table polls
    #[arg(long)]
    pub credential: Option<String>,

    /// Ignore the snapshot cache
    #[arg(long)]
    pub no_cache: bool,

    /// Add heuristic links for switches without forwarding-table data
    #[arg(long)]
    pub fallback_links: bool,

    /// Score switches and routers equally instead of preferring routers
    #[arg(long)]
    pub no_prefer_router: bool,

    /// Re-elect the central node even if a cached winner exists
    #[arg(long)]
    pub force_election: bool,

    /// Per-probe deadline in milliseconds
    #[arg(long)]
    pub probe_timeout: Option<u64>,

    /// Per-switch poll deadline in milliseconds
    #[arg(long)]
    pub poll_timeout: Option<u64>,

    /// Whole-run deadline in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl GenerateArgs {
    fn to_options(&self) -> GenerateOptions {
        GenerateOptions {
            gateway_address: self.gateway.clone(),
            protocol_credential: self.credential.clone(),
            timeouts: Timeouts {
                probe_ms: self.probe_timeout,
                poll_ms: self.poll_timeout,
                pipeline_ms: self.timeout,
            },
            cache_enabled: !self.no_cache,
            prefer_router_as_central: !self.no_prefer_router,
            fallback_links: self.fallback_links.then_some(true),
            force_recalculation: self.force_election,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and store a topology from the current inventory
    Generate(GenerateArgs),

    /// Show the last-active topology
    Last,

    /// Show a stored topology
    Show {
        /// Topology id
        id: String,
    },

    /// Delete a stored topology
    Delete {
        /// Topology id
        id: String,
    },

    /// Central node election
    Election {
        #[command(subcommand)]
        action: ElectionAction,
    },

    /// Cache statistics and maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Run as a background generation daemon
    Daemon {
        /// Generation interval in minutes
        #[arg(short, long, default_value = "15")]
        interval: u64,

        #[command(flatten)]
        generate: GenerateArgs,
    },

    /// Show configuration paths and settings
    Config,
}

#[derive(Subcommand)]
pub enum ElectionAction {
    /// Compare a fresh election with the cached or last published winner
    Check {
        /// Use this address as the central node
        #[arg(long)]
        gateway: Option<String>,
    },
    /// Re-elect ignoring the caches and publish the result
    Recalculate {
        /// Use this address as the central node
        #[arg(long)]
        gateway: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show cache hit rates and sizes
    Stats,
    /// Drop every cached entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("netmap={},netmap_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Generate(args) => cmd_generate(&cli, args).await,
        Commands::Last => cmd_last(&cli).await,
        Commands::Show { id } => cmd_show(&cli, id).await,
        Commands::Delete { id } => cmd_delete(&cli, id).await,
        Commands::Election { action } => cmd_election(&cli, action).await,
        Commands::Cache { action } => cmd_cache(&cli, action).await,
        Commands::Daemon { interval, generate } => {
            let agent = agent::build_agent().await?;
            daemon::run_daemon(agent, *interval, generate.to_options()).await
        }
        Commands::Config => cmd_config(&cli).await,
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn print_topology(topology: &Topology) {
    println!(
        "Topology {} v{} ({})",
        topology.id,
        topology.version,
        topology.created_at.to_rfc3339()
    );
    match topology.central_node() {
        Some(central) => println!(
            "Central node: {} ({}, {}{})",
            central.id,
            central.ip,
            central.role,
            if central.is_virtual { ", virtual" } else { "" }
        ),
        None => println!("Central node: -"),
    }

    println!();
    println!(
        "Nodes ({}, {} reachable):",
        topology.stats.total_nodes, topology.stats.reachable_nodes
    );
    for node in &topology.nodes {
        let reachable = match node.metrics.reachable {
            Some(true) => "up",
            Some(false) => "down",
            None => "-",
        };
        let hostname = node.hostname.as_deref().unwrap_or("-");
        let marker = if node.is_central { "*" } else { " " };
        match node.vendor.as_deref() {
            Some(vendor) => println!(
                " {} {:15} {:12} {:>4}  {} ({})",
                marker, node.ip, node.role, reachable, hostname, vendor
            ),
            None => println!(
                " {} {:15} {:12} {:>4}  {}",
                marker, node.ip, node.role, reachable, hostname
            ),
        }
    }

    println!();
    println!(
        "Links ({}: {} protocol, {} fallback, {} assumed; mean confidence {:.2}):",
        topology.stats.total_links,
        topology.stats.protocol_links,
        topology.stats.fallback_links,
        topology.stats.assumed_links,
        topology.stats.mean_link_confidence
    );
    for link in &topology.links {
        println!(
            "  {} -> {}  {} ({}){}",
            link.source_node_id,
            link.target_node_id,
            link.link_type.as_str(),
            link.confidence,
            link.port.map(|p| format!(" port {}", p)).unwrap_or_default()
        );
    }
}

fn print_report(report: &GenerationReport) {
    print_topology(&report.topology);
    let m = &report.metrics;
    println!();
    if report.from_cache {
        println!("Served from cache ({}ms)", m.total_ms);
    } else {
        println!(
            "Generated in {}ms: {}/{} probes answered, {} polls ({} failed, {} cached)",
            m.total_ms,
            m.probes_succeeded,
            m.probes_attempted,
            m.polls_issued,
            m.polls_failed,
            m.poll_cache_hits
        );
    }
}

async fn cmd_generate(cli: &Cli, args: &GenerateArgs) -> Result<()> {
    let agent = agent::build_agent().await?;

    match agent.generator.generate(args.to_options()).await {
        Ok(report) => match cli.format {
            OutputFormat::Text => print_report(&report),
            OutputFormat::Json => print_json(&serde_json::json!({
                "topology": report.topology.as_ref(),
                "fromCache": report.from_cache,
                "metrics": report.metrics,
            }))?,
        },
        Err(e) => {
            match cli.format {
                OutputFormat::Text => {
                    eprintln!("Generation failed: {}", e.failure);
                    eprintln!(
                        "  {} devices, {}/{} probes answered, {} polls failed",
                        e.metrics.device_count,
                        e.metrics.probes_succeeded,
                        e.metrics.probes_attempted,
                        e.metrics.polls_failed
                    );
                }
                OutputFormat::Json => print_json(&serde_json::json!({
                    "error": e.failure.to_string(),
                    "metrics": e.metrics,
                }))?,
            }
            return Err(e.into());
        }
    }

    Ok(())
}

async fn cmd_last(cli: &Cli) -> Result<()> {
    let agent = agent::build_agent().await?;
    let topology = agent.generator.last_topology().await?;

    match (cli.format, topology) {
        (OutputFormat::Text, Some(topology)) => print_topology(&topology),
        (OutputFormat::Text, None) => {
            println!("No topology stored yet. Run 'netmap generate' first.");
        }
        (OutputFormat::Json, topology) => print_json(&topology)?,
    }
    Ok(())
}

async fn cmd_show(cli: &Cli, id: &str) -> Result<()> {
    let agent = agent::build_agent().await?;
    let topology = agent
        .generator
        .topology_by_id(id)
        .await?
        .with_context(|| format!("No topology with id {}", id))?;

    match cli.format {
        OutputFormat::Text => print_topology(&topology),
        OutputFormat::Json => print_json(&topology)?,
    }
    Ok(())
}

async fn cmd_delete(cli: &Cli, id: &str) -> Result<()> {
    let agent = agent::build_agent().await?;
    let deleted = agent.generator.delete_topology(id).await?;

    match cli.format {
        OutputFormat::Text => {
            if deleted {
                println!("Deleted topology {}", id);
            } else {
                println!("No topology with id {}", id);
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "id": id,
            "deleted": deleted,
        }))?,
    }
    Ok(())
}

async fn cmd_election(cli: &Cli, action: &ElectionAction) -> Result<()> {
    let agent = agent::build_agent().await?;

    match action {
        ElectionAction::Check { gateway } => {
            let options = GenerateOptions {
                gateway_address: gateway.clone(),
                ..GenerateOptions::default()
            };
            let consistency = agent.generator.check_election_consistency(&options).await?;
            match cli.format {
                OutputFormat::Text => {
                    println!("Current winner: {}", consistency.current_central_node_id);
                    println!(
                        "Cached winner:  {}",
                        consistency.cached_central_node_id.as_deref().unwrap_or("-")
                    );
                    println!("Snapshot hash:  {}", consistency.snapshot_hash);
                    println!(
                        "Consistent:     {}",
                        if consistency.is_consistent { "yes" } else { "no" }
                    );
                }
                OutputFormat::Json => print_json(&consistency)?,
            }
        }
        ElectionAction::Recalculate { gateway } => {
            let options = GenerateOptions {
                gateway_address: gateway.clone(),
                ..GenerateOptions::default()
            };
            let report = agent.generator.recalculate_election(&options).await?;
            let topology = report.topology.as_ref();
            let central = topology.central_node();
            let election = central.and_then(|n| n.metadata.get("election"));
            match cli.format {
                OutputFormat::Text => {
                    match central {
                        Some(node) => println!(
                            "Central node: {} ({}, {}{})",
                            node.id,
                            node.ip,
                            node.role,
                            if node.is_virtual { ", virtual" } else { "" }
                        ),
                        None => println!("Central node: -"),
                    }
                    if let Some(election) = election {
                        println!("Confidence:   {}", election["confidence"].as_str().unwrap_or("-"));
                        println!("Reasoning:    {}", election["reasoning"].as_str().unwrap_or("-"));
                    }
                    println!("Published:    {} v{}", topology.id, topology.version);
                }
                OutputFormat::Json => print_json(&serde_json::json!({
                    "centralNodeId": topology.central_node_id,
                    "election": election,
                    "topologyId": topology.id,
                    "version": topology.version,
                }))?,
            }
        }
    }
    Ok(())
}

async fn cmd_cache(cli: &Cli, action: &CacheAction) -> Result<()> {
    let agent = agent::build_agent().await?;

    if let CacheAction::Clear = action {
        agent.generator.clear_caches();
    }

    let stats = agent.generator.cache_stats();
    match cli.format {
        OutputFormat::Text => {
            if let CacheAction::Clear = action {
                println!("Caches cleared.");
                println!();
            }
            for (name, s) in [
                ("snapshot", stats.snapshot),
                ("election", stats.election),
                ("protocol poll", stats.protocol_poll),
            ] {
                println!(
                    "{:14} {:>4}/{:<4} entries  ttl {:>8}ms  hits {:>5}  misses {:>5}  hit rate {:>5.1}%",
                    name,
                    s.entries,
                    s.capacity,
                    s.ttl_ms,
                    s.hits,
                    s.misses,
                    s.hit_rate() * 100.0
                );
            }
        }
        OutputFormat::Json => print_json(&stats)?,
    }
    Ok(())
}

async fn cmd_config(cli: &Cli) -> Result<()> {
    let agent = agent::build_agent().await?;
    let config_path = config::get_config_file_path_string();
    let caps = &agent.capabilities;

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Loaded from:      {}", agent.config_source);
            println!("Inventory:        {}", agent.config.inventory);
            println!("Recency window:   {}h", agent.config.recency_hours);
            println!("Topology store:   {}", agent.storage_dir.display());
            println!();
            println!("Probing");
            println!("  Configured:     {}", agent.config.liveness);
            println!("  Using:          {}", caps.method);
            println!("  ICMP available: {}", if caps.can_ping { "yes" } else { "no" });
            println!("  Elevated:       {}", if caps.is_elevated { "yes" } else { "no" });
            if let Some(warning) = &caps.warning {
                println!("  Warning:        {}", warning);
            }
            println!();
            println!("Environment variables:");
            println!("  NETMAP_CONFIG - Path to a config file");
            println!("  RUST_LOG      - Log filter (e.g. netmap_core=debug)");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "configFile": config_path,
            "source": agent.config_source.to_string(),
            "storageDir": agent.storage_dir,
            "capabilities": caps,
            "config": agent.config,
        }))?,
    }

    Ok(())
}
