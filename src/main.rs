//! distribution-engine CLI
//!
//! Plan cargo distribution for a scenario from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Compute routing plans for a scenario
//! distribution-engine plan --input scenario.json
//!
//! # Output as JSON
//! distribution-engine plan --input scenario.json --format json
//!
//! # Show the components of the link graph as DOT
//! distribution-engine components --input scenario.json --dot
//!
//! # Run vehicles and production for 60 days
//! distribution-engine simulate --input scenario.json --days 60
//!
//! # Generate a random scenario for testing
//! distribution-engine generate --stations 20 --extra-links 10
//! ```

use distribution_engine::core::ids::CargoId;
use distribution_engine::core::settings::{DistributionSettings, DistributionType};
use distribution_engine::engine::DistributionEngine;
use distribution_engine::graph::export::to_dot;
use distribution_engine::graph::link_graph::LinkGraph;
use distribution_engine::simulation::scenario::{generate_random_network, NetworkConfig, Scenario};
use distribution_engine::simulation::traffic::VisitReport;
use std::fs;
use std::process;

fn print_usage() {
    eprintln!(
        r#"distribution-engine — cargo distribution over transport link graphs

USAGE:
    distribution-engine <COMMAND> [OPTIONS]

COMMANDS:
    plan        Compute routing plans for every station of a scenario
    components  List the connected components of each cargo's link graph
    simulate    Run production, vehicles and scheduled planning for some days
    generate    Generate a random scenario (for testing)
    help        Show this message

OPTIONS (plan, components, simulate):
    --input <FILE>      Path to JSON scenario file
    --config <FILE>     JSON settings overriding the scenario's settings
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (components):
    --dot               Print every component as a DOT graph

OPTIONS (simulate):
    --days <N>          Days to simulate (default: 30)

OPTIONS (generate):
    --stations <N>      Number of stations (default: 12)
    --extra-links <N>   Links beyond the spanning tree (default: 6)
    --cargo <N>         Number of cargo types (default: 1)
    --seed <N>          Random seed for reproducible output
    --output <FILE>     Write to file instead of stdout

EXAMPLES:
    distribution-engine plan --input scenario.json
    distribution-engine plan --input scenario.json --config fast.json --format json
    distribution-engine components --input scenario.json --dot
    distribution-engine simulate --input scenario.json --days 90
    distribution-engine generate --stations 30 --cargo 2 --seed 7 --output test.json"#
    );
}

#[derive(serde::Serialize)]
struct FlowOutput {
    origin: String,
    via: String,
    planned: u32,
    sent: u32,
}

#[derive(serde::Serialize)]
struct StationOutput {
    station: String,
    cargo: u8,
    supply: u32,
    waiting: u32,
    flows: Vec<FlowOutput>,
}

#[derive(serde::Serialize)]
struct PlanOutput {
    date: u32,
    stations_updated: usize,
    stations_purged: usize,
    stations: Vec<StationOutput>,
}

#[derive(serde::Serialize)]
struct ComponentOutput {
    cargo: u8,
    colour: u16,
    stations: Vec<String>,
    links: usize,
}

#[derive(serde::Serialize)]
struct SimulationOutput {
    days: u32,
    delivered: u32,
    transferred: u32,
    loaded: u32,
    income: String,
    cargo_aboard: u64,
    stations: Vec<StationOutput>,
}

struct CommonArgs {
    input: Option<String>,
    config: Option<String>,
    format: String,
}

impl CommonArgs {
    fn new() -> Self {
        Self {
            input: None,
            config: None,
            format: "text".to_string(),
        }
    }

    /// Consume a shared option at `args[*i]`. Returns false if it is not one.
    fn parse(&mut self, args: &[String], i: &mut usize) -> bool {
        match args[*i].as_str() {
            "--input" => {
                *i += 1;
                self.input = Some(require(args, *i, "--input requires a file path"));
            }
            "--config" => {
                *i += 1;
                self.config = Some(require(args, *i, "--config requires a file path"));
            }
            "--format" => {
                *i += 1;
                self.format = require(args, *i, "--format requires 'text' or 'json'");
            }
            _ => return false,
        }
        true
    }

    fn load_scenario(&self) -> Scenario {
        let path = self.input.clone().unwrap_or_else(|| {
            eprintln!("Error: --input <FILE> is required");
            process::exit(1);
        });
        let mut scenario = Scenario::load(&path).unwrap_or_else(|e| {
            eprintln!("Error loading scenario: {}", e);
            eprintln!("Expected format:");
            eprintln!(
                r#"{{
  "settings": {{ "num_cargo": 1 }},
  "stations": [ {{ "name": "Mine", "x": 2, "y": 2, "supply": {{ "0": 40 }} }},
                {{ "name": "Mill", "x": 30, "y": 2, "accepts": [0] }} ],
  "links": [ {{ "from": "Mine", "to": "Mill", "capacity": 80, "bidirectional": true }} ]
}}"#
            );
            process::exit(1);
        });
        if let Some(config) = &self.config {
            scenario.settings = load_settings(config);
        }
        scenario
    }
}

fn require(args: &[String], i: usize, message: &str) -> String {
    args.get(i).cloned().unwrap_or_else(|| {
        eprintln!("{}", message);
        process::exit(1);
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, option: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("{} requires a number, got '{}'", option, value);
        process::exit(1);
    })
}

fn load_settings(path: &str) -> DistributionSettings {
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", path, e);
        process::exit(1);
    });
    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing settings: {}", e);
        process::exit(1);
    })
}

fn station_outputs(engine: &DistributionEngine) -> Vec<StationOutput> {
    let stations = engine.stations();
    let name = |id| {
        stations
            .get(id)
            .map_or_else(|| format!("{}", id), |st| st.name.clone())
    };
    let mut out = Vec::new();
    for station in stations.iter() {
        for (cargo, ge) in station.all_goods() {
            if ge.flows.is_empty() && ge.cargo.is_empty() && ge.supply == 0 {
                continue;
            }
            let flows = ge
                .flows
                .iter()
                .flat_map(|(origin, set)| {
                    set.iter().map(move |stat| (*origin, stat.via(), stat.planned(), stat.sent()))
                })
                .map(|(origin, via, planned, sent)| FlowOutput {
                    origin: name(origin),
                    via: name(via),
                    planned,
                    sent,
                })
                .collect();
            out.push(StationOutput {
                station: station.name.clone(),
                cargo: cargo.0,
                supply: ge.supply,
                waiting: ge.cargo.count(),
                flows,
            });
        }
    }
    out
}

fn print_stations(stations: &[StationOutput]) {
    for st in stations {
        println!(
            "  {:<16} cargo {:<3} supply {:>6}  waiting {:>6}",
            st.station, st.cargo, st.supply, st.waiting
        );
        for flow in &st.flows {
            println!(
                "      from {:<16} via {:<16} planned {:>6}  sent {:>6}",
                flow.origin, flow.via, flow.planned, flow.sent
            );
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn cmd_plan(args: &[String]) {
    let mut common = CommonArgs::new();
    let mut i = 0;
    while i < args.len() {
        if !common.parse(args, &mut i) {
            eprintln!("Unknown option: {}", args[i]);
            process::exit(1);
        }
        i += 1;
    }

    let scenario = common.load_scenario();
    let mut sim = scenario.build().unwrap_or_else(|e| {
        eprintln!("Error building scenario: {}", e);
        process::exit(1);
    });
    let report = sim.engine_mut().recalculate_all();
    let stations = station_outputs(sim.engine());

    if common.format == "json" {
        print_json(&PlanOutput {
            date: sim.engine().date(),
            stations_updated: report.stations_updated,
            stations_purged: report.stations_purged,
            stations,
        });
    } else {
        println!("=== Distribution Plan ===");
        println!("Stations updated: {}", report.stations_updated);
        println!();
        print_stations(&stations);
    }
}

fn cmd_components(args: &[String]) {
    let mut common = CommonArgs::new();
    let mut dot = false;
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--dot" {
            dot = true;
        } else if !common.parse(args, &mut i) {
            eprintln!("Unknown option: {}", args[i]);
            process::exit(1);
        }
        i += 1;
    }

    let scenario = common.load_scenario();
    let sim = scenario.build_inline().unwrap_or_else(|e| {
        eprintln!("Error building scenario: {}", e);
        process::exit(1);
    });
    let engine = sim.engine();
    let stations = engine.stations();

    let mut graphs = Vec::new();
    for cargo in engine.settings().cargos() {
        if engine.settings().distribution_for(cargo) == DistributionType::Manual {
            continue;
        }
        let mut graph = LinkGraph::new(cargo);
        while graph.next_component(stations, engine.job_settings(cargo), None) {}
        graphs.push(graph);
    }

    if dot {
        for job in graphs.iter().flat_map(LinkGraph::pending) {
            println!("{}", to_dot(job.component(), stations));
        }
        return;
    }

    let components: Vec<ComponentOutput> = graphs
        .iter()
        .flat_map(LinkGraph::pending)
        .map(|job| {
            let component = job.component();
            ComponentOutput {
                cargo: component.cargo().0,
                colour: component.colour(),
                stations: component
                    .nodes()
                    .iter()
                    .map(|n| stations.get(n.station).map_or_else(String::new, |st| st.name.clone()))
                    .collect(),
                links: component.link_count(),
            }
        })
        .collect();

    if common.format == "json" {
        print_json(&components);
    } else if components.is_empty() {
        println!("No linked stations found.");
    } else {
        println!("Found {} component(s):", components.len());
        println!();
        for (idx, c) in components.iter().enumerate() {
            println!(
                "  Component {} [{}]: {} stations, {} links",
                idx + 1,
                CargoId(c.cargo),
                c.stations.len(),
                c.links
            );
            println!("    {}", c.stations.join(", "));
        }
    }
}

fn cmd_simulate(args: &[String]) {
    let mut common = CommonArgs::new();
    let mut days: u32 = 30;
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--days" {
            i += 1;
            days = parse_number(&require(args, i, "--days requires a number"), "--days");
        } else if !common.parse(args, &mut i) {
            eprintln!("Unknown option: {}", args[i]);
            process::exit(1);
        }
        i += 1;
    }

    let scenario = common.load_scenario();
    let mut sim = scenario.build().unwrap_or_else(|e| {
        eprintln!("Error building scenario: {}", e);
        process::exit(1);
    });
    let totals: VisitReport = sim.run_days(days).unwrap_or_else(|e| {
        eprintln!("Simulation failed: {}", e);
        process::exit(1);
    });
    let stations = station_outputs(sim.engine());

    if common.format == "json" {
        print_json(&SimulationOutput {
            days,
            delivered: totals.delivered,
            transferred: totals.transferred,
            loaded: totals.loaded,
            income: totals.income.to_string(),
            cargo_aboard: sim.traffic().cargo_aboard(),
            stations,
        });
    } else {
        println!("=== Simulation: {} days ===", days);
        println!("Loaded:       {}", totals.loaded);
        println!("Delivered:    {}", totals.delivered);
        println!("Transferred:  {}", totals.transferred);
        println!("Income:       {}", totals.income);
        println!("Aboard:       {}", sim.traffic().cargo_aboard());
        println!();
        print_stations(&stations);
    }
}

fn cmd_generate(args: &[String]) {
    let mut config = NetworkConfig::default();
    let mut output = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--stations" => {
                i += 1;
                config.station_count = parse_number(&require(args, i, "--stations requires a number"), "--stations");
            }
            "--extra-links" => {
                i += 1;
                config.extra_links =
                    parse_number(&require(args, i, "--extra-links requires a number"), "--extra-links");
            }
            "--cargo" => {
                i += 1;
                config.num_cargo = parse_number(&require(args, i, "--cargo requires a number"), "--cargo");
            }
            "--seed" => {
                i += 1;
                config.seed = Some(parse_number(&require(args, i, "--seed requires a number"), "--seed"));
            }
            "--output" => {
                i += 1;
                output = Some(require(args, i, "--output requires a file path"));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let scenario = generate_random_network(&config);
    let json = scenario.to_json().unwrap_or_else(|e| {
        eprintln!("Error serializing scenario: {}", e);
        process::exit(1);
    });

    match output {
        Some(path) => {
            fs::write(&path, &json).unwrap_or_else(|e| {
                eprintln!("Error writing '{}': {}", path, e);
                process::exit(1);
            });
            eprintln!(
                "Generated {} stations and {} links → {}",
                scenario.stations.len(),
                scenario.links.len(),
                path
            );
        }
        None => println!("{}", json),
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "plan" => cmd_plan(&args[2..]),
        "components" => cmd_components(&args[2..]),
        "simulate" => cmd_simulate(&args[2..]),
        "generate" => cmd_generate(&args[2..]),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            process::exit(1);
        }
    }
}
