//! cluctl - cluster node health checking and power control

mod classify;
mod client;
mod config;
mod dispatch;
mod display;
mod hostlist;
mod models;
mod probe;
mod scheduler;
mod slurm;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use client::{ClientError, DaemonClient};
use config::Config;
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use dispatch::{DispatchResult, Dispatcher};
use display::HealthReportRow;
use models::{ActionRequest, Category, NodeOutcome, Subsystem};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{self, Write};

#[derive(Parser)]
#[command(name = "cluctl")]
#[command(about = "Cluster node health checking and power control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check node health: reachability, mounts, Slurm and power state
    Health {
        /// Hostlist of nodes to check (default: full daemon inventory)
        #[arg(short, long, value_name = "HOSTLIST")]
        nodes: Option<String>,

        /// Check the nodes of a configured group
        #[arg(short, long)]
        group: Option<String>,

        /// Check the nodes inside a rack
        #[arg(short, long)]
        rack: Option<String>,

        /// Per-check timeout in seconds (overrides config)
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Watch mode: refresh every N seconds
        #[arg(short, long, value_name = "SECONDS", default_value = "0")]
        watch: f64,
    },

    /// BMC power management
    Power {
        /// Host list
        #[arg(value_name = "HOSTLIST")]
        hosts: Option<String>,

        /// Action: status, on, off, reset, cycle
        action: Option<String>,

        /// Perform the action on the nodes of the group
        #[arg(short, long)]
        group: Option<String>,

        /// Perform the action on the nodes inside the rack
        #[arg(short, long)]
        rack: Option<String>,
    },

    /// Chassis identification control
    Chassis {
        /// Host list
        #[arg(value_name = "HOSTLIST")]
        hosts: Option<String>,

        /// Action: identify, noidentify
        action: Option<String>,

        /// Perform the action on the nodes of the group
        #[arg(short, long)]
        group: Option<String>,

        /// Perform the action on the nodes inside the rack
        #[arg(short, long)]
        rack: Option<String>,
    },

    /// System event log access
    Sel {
        /// Host list (list accepts a single node only)
        #[arg(value_name = "HOSTLIST")]
        hosts: String,

        /// Action: list, clear
        action: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CLUCTL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (config, warnings) = Config::load();
    for warning in &warnings {
        eprintln!("Warning: {}", warning);
    }

    if let Err(e) = run(cli, config).await {
        eprintln!("{} {}", "ERROR ::".red().bold(), e);
        // transport-class failures keep the exit code the fleet scripts watch for
        let code = if e.downcast_ref::<ClientError>().is_some() {
            3
        } else {
            1
        };
        std::process::exit(code);
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<()> {
    match cli.command {
        Commands::Health {
            nodes,
            group,
            rack,
            timeout,
            watch,
        } => {
            if let Some(secs) = timeout {
                config.health.timeout = secs;
            }
            let client = connect(&config)?;
            if watch > 0.0 {
                watch_loop(watch, || {
                    handle_health(&config, &client, nodes.as_deref(), group.as_deref(), rack.as_deref())
                })
                .await?;
            } else {
                let output = handle_health(
                    &config,
                    &client,
                    nodes.as_deref(),
                    group.as_deref(),
                    rack.as_deref(),
                )
                .await?;
                println!("{}", output);
            }
        }
        Commands::Power {
            hosts,
            action,
            group,
            rack,
        } => {
            let output =
                handle_action(&config, Subsystem::Power, hosts, action, group, rack).await?;
            println!("{}", output);
        }
        Commands::Chassis {
            hosts,
            action,
            group,
            rack,
        } => {
            let output =
                handle_action(&config, Subsystem::Chassis, hosts, action, group, rack).await?;
            println!("{}", output);
        }
        Commands::Sel { hosts, action } => {
            let output = handle_sel(&config, &hosts, &action).await?;
            println!("{}", output);
        }
    }
    Ok(())
}

/// Validate credentials and build the daemon client.
fn connect(config: &Config) -> Result<DaemonClient> {
    if let Err(errors) = config.validate_api() {
        let mut message = String::from("You need to fix following errors...");
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n{}. {}", i + 1, error));
        }
        bail!(message);
    }
    Ok(DaemonClient::new(config)?)
}

/// Resolve the target node set from the explicit hostlist and the
/// group/rack helpers, duplicates collapsed in first-seen order.
async fn resolve_node_set(
    client: &DaemonClient,
    nodes: Option<&str>,
    group: Option<&str>,
    rack: Option<&str>,
) -> Result<Vec<String>> {
    let mut resolved = match nodes {
        Some(expression) => hostlist::expand(expression)?,
        None => Vec::new(),
    };
    if let Some(group) = group {
        for node in client.group_members(group).await? {
            if !resolved.contains(&node) {
                resolved.push(node);
            }
        }
    }
    if let Some(rack) = rack {
        for node in client.rack_nodes(rack).await? {
            if !resolved.contains(&node) {
                resolved.push(node);
            }
        }
    }
    Ok(resolved)
}

async fn handle_health(
    config: &Config,
    client: &DaemonClient,
    nodes: Option<&str>,
    group: Option<&str>,
    rack: Option<&str>,
) -> Result<String> {
    // inventory supplies the default node set and the Daemon column
    let inventory = client.node_inventory().await?;
    let daemon_status: BTreeMap<String, String> = inventory.iter().cloned().collect();

    let mut node_set = resolve_node_set(client, nodes, group, rack).await?;
    if node_set.is_empty() {
        node_set = inventory.iter().map(|(name, _)| name.clone()).collect();
    }
    if node_set.is_empty() {
        bail!("No nodes available with {}", config.api.base_url());
    }

    let power_request = ActionRequest::new(Subsystem::Power, "status", &node_set.join(","))
        .map_err(|e| anyhow!(e))?;
    let dispatcher = Dispatcher::new(client);
    let resolver = slurm::SlurmResolver::new(config);

    let (records, slurm_states, power) = tokio::join!(
        scheduler::probe_all(&node_set, &config.health),
        resolver.resolve_states(&node_set),
        dispatcher.dispatch(&power_request),
    );
    let power = power?;

    let rows: Vec<HealthReportRow> = node_set
        .iter()
        .map(|node| {
            let power_cell = power_cell(&power, node);
            let daemon = daemon_status.get(node).cloned().unwrap_or_default();
            let daemon_cell = (daemon.clone(), classify::classify_daemon_status(&daemon));
            let slurm_status = slurm_states
                .get(node)
                .cloned()
                .unwrap_or_else(|| slurm::UNKNOWN_STATE.to_string());
            let slurm_cell = (
                slurm_status.clone(),
                classify::classify_slurm_status(&slurm_status),
            );
            let health_cell = records
                .get(node)
                .map(|record| {
                    let text = if record.details.is_empty() {
                        record.status.clone()
                    } else {
                        format!("{} ({})", record.status, record.details)
                    };
                    (text, classify::classify_health_status(&record.status))
                })
                .unwrap_or_else(|| ("UNKN".to_string(), Category::Unknown));

            HealthReportRow {
                node: node.clone(),
                power: power_cell,
                daemon: daemon_cell,
                slurm: slurm_cell,
                health: health_cell,
            }
        })
        .collect();

    Ok(display::format_health_report(&rows))
}

/// Power column text and category for one node.
fn power_cell(power: &DispatchResult, node: &str) -> (String, Category) {
    match power {
        DispatchResult::Batch(outcomes) => match outcomes.get(node) {
            Some(NodeOutcome::Ok(message)) | Some(NodeOutcome::Status(message)) => (
                message.to_uppercase(),
                classify::classify_power_status(message, false),
            ),
            Some(NodeOutcome::Failed(reason)) => (reason.clone(), Category::Error),
            Some(NodeOutcome::Pending) | None => (String::new(), Category::Unknown),
        },
        // single-node health runs take the synchronous path; the line is
        // "<node>: <status>"
        DispatchResult::Single(line) => match line.strip_prefix(&format!("{}: ", node)) {
            Some(status) => (
                status.to_uppercase(),
                classify::classify_power_status(status, false),
            ),
            None => (line.clone(), Category::Error),
        },
    }
}

async fn handle_action(
    config: &Config,
    subsystem: Subsystem,
    hosts: Option<String>,
    action: Option<String>,
    group: Option<String>,
    rack: Option<String>,
) -> Result<String> {
    // `cluctl power on` puts the action in the hosts slot when targets come
    // from --group/--rack
    let (hosts, action) = match (hosts, action) {
        (Some(hosts), Some(action)) => (Some(hosts), action),
        (Some(action), None) if group.is_some() || rack.is_some() => (None, action),
        _ => bail!("Instruction incomplete. Nodes and Task expected."),
    };

    let client = connect(config)?;
    let mut targets = hosts.unwrap_or_default();
    if group.is_some() || rack.is_some() {
        let extra = resolve_node_set(&client, None, group.as_deref(), rack.as_deref()).await?;
        if extra.is_empty() {
            bail!("no nodes resolved from group/rack");
        }
        if targets.is_empty() {
            targets = extra.join(",");
        } else {
            targets = format!("{},{}", targets, extra.join(","));
        }
    }

    let request = ActionRequest::new(subsystem, &action, &targets).map_err(|e| anyhow!(e))?;
    match Dispatcher::new(&client).dispatch(&request).await? {
        DispatchResult::Single(line) => Ok(line),
        DispatchResult::Batch(outcomes) => Ok(display::format_outcomes(&outcomes)),
    }
}

async fn handle_sel(config: &Config, hosts: &str, action: &str) -> Result<String> {
    let client = connect(config)?;
    let request = ActionRequest::new(Subsystem::Sel, action, hosts).map_err(|e| anyhow!(e))?;

    if action == "list" {
        if !request.is_single_target() {
            bail!("sel list works on a single node, got '{}'", hosts);
        }
        return Ok(dispatch::sel_list(&client, hosts).await?);
    }

    match Dispatcher::new(&client).dispatch(&request).await? {
        DispatchResult::Single(line) => Ok(line),
        DispatchResult::Batch(outcomes) => Ok(display::format_outcomes(&outcomes)),
    }
}

/// Watch loop that repeatedly executes a command with flicker-free updates
async fn watch_loop<F, Fut>(interval: f64, command: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    // Set up Ctrl+C handler
    let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, std::sync::atomic::Ordering::SeqCst);
    })?;

    // Enter alternate screen buffer and hide cursor for clean display
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;

    let result = async {
        while running.load(std::sync::atomic::Ordering::SeqCst) {
            let now = chrono::Local::now();
            let timestamp = now.format("%Y-%m-%d %H:%M:%S");

            let output = match command().await {
                Ok(s) => s,
                Err(e) => format!("Error: {}", e),
            };

            // Build complete screen content in memory
            let screen_content = format!(
                "{}\n\nLast updated: {} | Refreshing every {}s | Press Ctrl+C to exit",
                output, timestamp, interval
            );

            // Write everything at once with synchronized update (DEC private mode)
            // so the terminal never renders a partial frame
            write!(stdout, "\x1B[?2026h")?;
            write!(stdout, "\x1B[H{}\x1B[J", screen_content)?;
            write!(stdout, "\x1B[?2026l")?;
            stdout.flush()?;

            tokio::time::sleep(std::time::Duration::from_secs_f64(interval)).await;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    // Always clean up terminal state
    let mut stdout = io::stdout();
    execute!(stdout, Show, LeaveAlternateScreen)?;
    println!("Watch mode stopped.");

    result
}
