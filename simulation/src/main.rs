//! SHINGO - Zone Routing Simulation
//!
//! Runs the hybrid routing engine on simulated radio topologies.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use shingo_logging::{LogConfig, ShingoSubscriberBuilder};

use shingo_simulation::{NodeId, SimConfig, Simulation, Topology, TopologyBuilder, scenarios};

#[derive(Parser)]
#[command(
    name = "shingo-sim",
    about = "Discrete-event simulation of hybrid zone routing",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON simulation configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed for the medium and the engines
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    /// Zone radius in hops
    #[arg(long, global = true)]
    zone_radius: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Zone convergence on a line
    Converge {
        #[arg(short, long, default_value = "6")]
        nodes: u16,
    },

    /// Route discovery beyond the zone on an eight-node line
    Discovery,

    /// Node failure in the middle of a grid
    LinkFailure,

    /// Random traffic over a random topology
    Random {
        #[arg(short, long, default_value = "20")]
        nodes: u16,

        /// Connection probability
        #[arg(short, long, default_value = "0.15")]
        probability: f64,

        /// Packets to send
        #[arg(long, default_value = "50")]
        packets: u32,
    },

    /// Create and visualize a topology
    Topology {
        #[arg(short, long, value_enum, default_value = "line")]
        kind: TopologyKind,

        #[arg(short, long, default_value = "6")]
        nodes: u16,

        /// Columns of a grid
        #[arg(long, default_value = "3")]
        columns: u16,

        /// Connection probability of a random topology
        #[arg(short, long, default_value = "0.4")]
        probability: f64,
    },

    /// Interactive simulation mode
    Interactive {
        #[arg(short, long, value_enum, default_value = "line")]
        kind: TopologyKind,

        #[arg(short, long, default_value = "6")]
        nodes: u16,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TopologyKind {
    Line,
    Ring,
    Grid,
    Star,
    Random,
}

impl TopologyKind {
    fn build(self, nodes: u16, columns: u16, probability: f64, seed: u64) -> Topology {
        let builder = TopologyBuilder::new(nodes);
        match self {
            Self::Line => builder.line(),
            Self::Ring => builder.ring(),
            Self::Grid => builder.grid(columns),
            Self::Star => builder.star(),
            Self::Random => builder.random(probability, seed),
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SimConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::fast(),
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    if let Some(radius) = cli.zone_radius {
        config.router = config.router.with_zone_radius(radius);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig::development().with_target("shingo_routing", "warn")
    };
    let _log_guard = ShingoSubscriberBuilder::new()
        .with_config(log_config)
        .with_level(if cli.verbose { "debug" } else { "info" })
        .init();

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Converge { nodes } => {
            scenarios::run_zone_convergence_scenario(nodes, config)?;
        }
        Commands::Discovery => {
            scenarios::run_discovery_scenario(config)?;
        }
        Commands::LinkFailure => {
            scenarios::run_link_failure_scenario(config)?;
        }
        Commands::Random {
            nodes,
            probability,
            packets,
        } => {
            scenarios::run_random_traffic_scenario(nodes, probability, packets, config)?;
        }
        Commands::Topology {
            kind,
            nodes,
            columns,
            probability,
        } => {
            let topology = kind.build(nodes, columns, probability, config.seed);
            println!("{}", topology.visualize());
        }
        Commands::Interactive { kind, nodes } => {
            let topology = kind.build(nodes, 3, 0.4, config.seed);
            run_interactive(topology, config)?;
        }
    }

    Ok(())
}

fn parse_node(arg: Option<&&str>) -> anyhow::Result<NodeId> {
    let Some(arg) = arg else {
        bail!("missing node number");
    };
    let id: u16 = arg.trim_start_matches('n').parse().with_context(|| format!("bad node {arg}"))?;
    Ok(NodeId(id))
}

fn run_interactive(topology: Topology, config: SimConfig) -> anyhow::Result<()> {
    use std::io::{self, Write};

    println!("{}", topology.visualize());
    let radius = config.router.zone_radius;
    let mut sim = Simulation::new(topology, config)?;
    sim.start();

    println!("\nInteractive mode. Commands:");
    println!("  send <from> <to> [msg] - Send a data packet");
    println!("  run [ms]               - Advance virtual time (default 1000 ms)");
    println!("  down <a> <b>           - Cut a link");
    println!("  up <a> <b>             - Restore a link");
    println!("  table <node>           - Show a node's routing tables");
    println!("  status                 - Show current state");
    println!("  stats                  - Show statistics");
    println!("  events                 - Show event log");
    println!("  quit                   - Exit");
    println!();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts.first() {
            None => continue,
            Some(&("quit" | "exit" | "q")) => {
                println!("Goodbye!");
                break;
            }
            Some(_) => {
                if let Err(e) = handle_command(&mut sim, radius, &parts) {
                    println!("  Error: {e}");
                }
            }
        }
    }

    Ok(())
}

fn handle_command(sim: &mut Simulation, radius: u32, parts: &[&str]) -> anyhow::Result<()> {
    match parts[0] {
        "send" => {
            let from = parse_node(parts.get(1))?;
            let to = parse_node(parts.get(2))?;
            let message = parts.get(3..).map(|m| m.join(" ")).unwrap_or_default();
            let uid = sim.send_data(from, to, message.into_bytes())?;
            println!("  Sent packet {uid} {from} -> {to}");
        }
        "run" | "step" => {
            let ms: u64 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1000);
            sim.run_for(Duration::from_millis(ms));
            println!("  {}", sim.state_summary());
        }
        "down" => {
            let (a, b) = (parse_node(parts.get(1))?, parse_node(parts.get(2))?);
            if sim.link_down(a, b)? {
                println!("  {a} - {b} cut");
            } else {
                println!("  {a} and {b} were not linked");
            }
        }
        "up" => {
            let (a, b) = (parse_node(parts.get(1))?, parse_node(parts.get(2))?);
            sim.link_up(a, b)?;
            println!("  {a} - {b} linked");
        }
        "table" => {
            let node = parse_node(parts.get(1))?;
            println!("{}", sim.dump(node)?);
        }
        "status" => {
            println!("  {}", sim.state_summary());
            let missing = sim.missing_zone_routes(radius);
            println!("  Zones converged: {} ({} routes missing)", missing.is_empty(), missing.len());
        }
        "stats" => {
            let stats = &sim.stats;
            println!("  Packets sent: {}", stats.packets_sent);
            println!("  Packets delivered: {}", stats.packets_delivered);
            println!("  Packets dropped: {}", stats.packets_dropped);
            println!("  Control frames: {}", stats.control_frames);
            println!("  Engine counters: {:?}", sim.router_stats());
        }
        "events" => {
            println!("  Event log ({} events):", sim.event_log.len());
            for event in sim.event_log.iter().rev().take(20) {
                println!("    {:?}", event);
            }
            if sim.event_log.len() > 20 {
                println!("    ... ({} more)", sim.event_log.len() - 20);
            }
        }
        other => println!("  Unknown command: {other}"),
    }
    Ok(())
}
