// Anaximander: Planning and Simulating Traceroute-Based Probing Campaigns
// Copyright (C) 2024-2025 The Anaximander developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use anaximander::{
    error::Result,
    rib::{self, Heuristic},
    rocketfuel, simulator,
    simulator::{SimulationConfig, SimulationMode},
    stats,
    strategy::{self, StrategyConfig},
    Asn,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse RIBs and collect everything the strategy and the simulation
    /// need.
    RibParsing {
        #[command(subcommand)]
        command: RibParsingCommand,
    },
    /// Output the ordered list of targets for each AS of interest.
    /// Redirect stdout to a file to keep the run statistics.
    Strategy(StrategyArgs),
    /// Simulate the probing campaign on a recorded traceroute dataset.
    /// Redirect stdout to a file to keep the run statistics.
    Simulation(SimulationArgs),
    /// Replay evaluation of the classic path-reduction techniques.
    RocketfuelSimulation {
        #[command(subcommand)]
        command: RocketfuelCommand,
    },
    /// Further analyses and processing of the parsing results.
    Analysis {
        #[command(subcommand)]
        command: AnalysisCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RibParsingCommand {
    /// Step 1: count the entries of each collector, to sort out the
    /// sound ones (more than ~800k entries).
    Count {
        /// The output file
        #[arg(short)]
        output: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// Start of the interval at which to retrieve the BGP tables
        #[arg(short)]
        start: String,
        /// End of the interval at which to retrieve the BGP tables
        #[arg(short)]
        end: String,
    },
    /// Step 2: parse the RIBs of all (sound) collectors and write the
    /// forwarding tables, next-hop ASes, peers and overlays.
    RibsMulti {
        /// The file containing the ASes of interest (one line, space
        /// separated)
        #[arg(short)]
        ases: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The output directory
        #[arg(short)]
        output: PathBuf,
        /// Start of the interval at which to retrieve the BGP tables
        #[arg(short)]
        start: String,
        /// End of the interval at which to retrieve the BGP tables
        #[arg(short)]
        end: String,
        /// The BGP decision-process heuristic to apply (0 shortest
        /// path, 1 valley free)
        #[arg(long = "heuristic", default_value_t = 1)]
        heuristic: usize,
        /// CAIDA file containing the relationships between ASes
        #[arg(long)]
        asrel: Option<PathBuf>,
    },
    /// Step 3: build the best-path directed probes from the parsing
    /// results.
    BuildBestDirectedProbes {
        /// The output directory
        #[arg(short)]
        output: PathBuf,
        /// The file containing the ASes of interest
        #[arg(short)]
        ases: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The directory with the parsing results of `ribs-multi`
        #[arg(short)]
        datadir: PathBuf,
    },
    /// Tier-1 composition of the AS paths, straight from the RIBs.
    AnalyseRib {
        /// The output file
        #[arg(short)]
        output: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The file containing the AS relationships
        #[arg(short)]
        relfile: PathBuf,
        /// Start of the interval at which to retrieve the BGP tables
        #[arg(short)]
        start: String,
        /// End of the interval at which to retrieve the BGP tables
        #[arg(short)]
        end: String,
    },
    /// Tier-1 composition of the AS paths, over the saved forwarding
    /// tables.
    AnalyseFib {
        /// The directory with the saved forwarding tables
        #[arg(short)]
        datadir: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The file containing the AS relationships
        #[arg(short)]
        relfile: PathBuf,
        /// The output file
        #[arg(short)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct StrategyArgs {
    /// The probing strategy
    #[arg(short)]
    strategy: usize,
    /// Break the announced prefixes down into /24s
    #[arg(long = "break")]
    break_prefix: bool,
    /// The file containing the ASes of interest (one line, space
    /// separated)
    #[arg(long)]
    ases: PathBuf,
    /// CAIDA file containing the relationships between ASes
    #[arg(long)]
    asrel: PathBuf,
    /// CAIDA file containing the customer cones of ASes
    #[arg(long)]
    ppdc: PathBuf,
    /// The prefix-to-AS mapping
    #[arg(long)]
    ip2as: PathBuf,
    /// The directory containing the directed prefixes (output of
    /// rib-parsing)
    #[arg(long = "dp-dir")]
    directed_prefixes_dir: Option<PathBuf>,
    /// The file containing all merged overlays (output of rib-parsing)
    #[arg(long = "overlays-file")]
    overlays_file: Option<PathBuf>,
    /// The directory containing the merged next-AS tables
    #[arg(long = "nextas-dir")]
    next_as_dir: Option<PathBuf>,
    /// The directory containing the successful traces of an earlier run
    #[arg(long = "oracle-dir")]
    oracle_dir: Option<PathBuf>,
    /// The output directory for the targets and the AS delimitations
    #[arg(short)]
    output: PathBuf,
    /// Annotation database (to record the strategy against a trace
    /// dataset; optional)
    #[arg(long)]
    bdr: Option<PathBuf>,
    /// The directory containing the traceroute captures (optional)
    #[arg(long)]
    traces: Option<PathBuf>,
    /// The file containing the vantage points (optional)
    #[arg(long)]
    vps: Option<PathBuf>,
    /// Seed of the shuffled baseline strategy
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args, Debug)]
struct SimulationArgs {
    /// The file containing the ASes of interest (one line, space
    /// separated)
    #[arg(long)]
    ases: PathBuf,
    /// Annotation database
    #[arg(long)]
    bdr: PathBuf,
    /// The directory containing the traceroute captures
    #[arg(long)]
    traces: PathBuf,
    /// The directory with the targets and AS delimitations of each AS
    /// of interest
    #[arg(long)]
    strategy: PathBuf,
    /// Output file
    #[arg(short)]
    output: PathBuf,
    /// The plateau threshold (tau) to apply
    #[arg(short, default_value_t = 1.0)]
    threshold: f64,
    /// Break the announced prefixes down into /24s
    #[arg(long = "break")]
    break_prefix: bool,
    /// The simulation mode (0 sequential, 1 parallel, 2 greedy)
    #[arg(short, default_value_t = 0)]
    mode: usize,
    /// CAIDA file containing the customer cones of ASes
    #[arg(long)]
    ppdc: Option<PathBuf>,
    /// The prefix-to-AS mapping
    #[arg(long)]
    ip2as: Option<PathBuf>,
    /// The weighting function and its parameters, e.g. `1-0.1-0.2` for
    /// function 1 with parameters 0.1 and 0.2
    #[arg(short)]
    weights: Option<String>,
    /// Record the traces that discovered something
    #[arg(long)]
    record_successful: bool,
}

#[derive(Subcommand, Debug)]
enum RocketfuelCommand {
    /// Ingress and egress counts per vantage point and AS of interest.
    IngressReduction {
        /// The file containing the ASes of interest
        #[arg(short)]
        ases: PathBuf,
        /// Annotation database
        #[arg(long)]
        bdr: PathBuf,
        /// The directory containing the traceroute captures
        #[arg(long)]
        traces: PathBuf,
        /// The output directory
        #[arg(short)]
        output: PathBuf,
    },
    /// Prefixes with more than one observed next-hop AS.
    NextAs {
        /// The output directory
        #[arg(short)]
        output: PathBuf,
        /// The file containing the ASes of interest
        #[arg(short)]
        ases: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The directory with the next-hop-AS parsing results
        #[arg(short)]
        datadir: PathBuf,
    },
    /// Merge the per-collector next-hop-AS tables per AS of interest.
    MergeNextAs {
        /// The output directory
        #[arg(short)]
        output: PathBuf,
        /// The file containing the ASes of interest
        #[arg(short)]
        ases: PathBuf,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The directory with the next-hop-AS parsing results
        #[arg(short)]
        datadir: PathBuf,
    },
    /// Prefixes whose AS path crosses the AS of interest, with the
    /// dependent / up-down classification.
    DirectedPrefixes {
        /// The AS of interest
        #[arg(short)]
        asn: Asn,
        /// The file containing the BGP collectors
        #[arg(short)]
        collectors: PathBuf,
        /// The output file
        #[arg(short)]
        output: PathBuf,
        /// Break the prefixes down into /24s
        #[arg(short)]
        break_prefix: bool,
        /// Start of the interval at which to retrieve the BGP tables
        #[arg(short)]
        start: String,
        /// End of the interval at which to retrieve the BGP tables
        #[arg(short)]
        end: String,
    },
}

#[derive(Subcommand, Debug)]
enum AnalysisCommand {
    /// Mean forwarding-table reduction allowed by each collector's own
    /// overlays.
    Overlays {
        /// The saved forwarding tables
        forwarding_tables: Vec<PathBuf>,
    },
    /// Same, against the merged overlay file.
    AnalyseMergedOverlays {
        /// The merged overlay file
        merged_overlays: PathBuf,
        /// The saved forwarding tables
        forwarding_tables: Vec<PathBuf>,
    },
    /// Reduction as a function of the vantage-point count.
    OverlaysRepartitionVp {
        /// The overlay file
        overlay_file: PathBuf,
        /// One saved forwarding table
        forwarding_table: PathBuf,
    },
    /// Merge the per-collector overlay files of a parsing run.
    MergeOverlays {
        /// The directory with the parsing results of `ribs-multi`
        dir: PathBuf,
    },
    /// Restrict the merged overlays to each AS's directed prefixes.
    BuildOverlaysPerAs {
        /// The file containing the ASes of interest
        ases: PathBuf,
        /// The merged overlay file
        all_overlays: PathBuf,
        /// The directory containing the directed prefixes
        directed_prefixes_dir: PathBuf,
        /// The output directory
        output: PathBuf,
    },
}

fn parse_weights(weights: Option<&str>) -> Vec<f64> {
    weights
        .unwrap_or_default()
        .split('-')
        .filter_map(|token| token.parse().ok())
        .collect()
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::RibParsing { command } => match command {
            RibParsingCommand::Count {
                output,
                collectors,
                start,
                end,
            } => rib::count::count_ribs(&output, &collectors, &start, &end),
            RibParsingCommand::RibsMulti {
                ases,
                collectors,
                output,
                start,
                end,
                heuristic,
                asrel,
            } => rib::parse_ribs(
                &ases,
                &collectors,
                &output,
                &start,
                &end,
                Heuristic::try_from(heuristic)?,
                asrel.as_deref(),
            ),
            RibParsingCommand::BuildBestDirectedProbes {
                output,
                ases,
                collectors,
                datadir,
            } => rib::analysis::build_best_directed_probes(&output, &ases, &collectors, &datadir),
            RibParsingCommand::AnalyseRib {
                output,
                collectors,
                relfile,
                start,
                end,
            } => rib::analysis::analyse_ribs(&output, &collectors, &relfile, &start, &end),
            RibParsingCommand::AnalyseFib {
                datadir,
                collectors,
                relfile,
                output,
            } => rib::analysis::analyse_fibs(&datadir, &collectors, &relfile, &output),
        },
        Command::Strategy(args) => {
            stats::ensure_redirected()?;
            strategy::launch_strategy(StrategyConfig {
                strategy: args.strategy,
                break_prefix: args.break_prefix,
                output_dir: args.output,
                ases_interest_file: args.ases,
                as_rel_file: args.asrel,
                ppdc_file: args.ppdc,
                ip2as_file: args.ip2as,
                directed_prefixes_dir: args.directed_prefixes_dir,
                overlays_global_file: args.overlays_file,
                next_hop_as_dir: args.next_as_dir,
                oracle_prefixes_dir: args.oracle_dir,
                annotation_file: args.bdr,
                traces_directory: args.traces,
                vps_file: args.vps,
                shuffle_seed: args.seed,
            })
        }
        Command::Simulation(args) => {
            stats::ensure_redirected()?;
            simulator::launch_simulation(SimulationConfig {
                mode: SimulationMode::try_from(args.mode)?,
                output_file: args.output,
                strategy_dir: args.strategy,
                ases_interest_file: args.ases,
                annotation_file: args.bdr,
                traces_directory: args.traces,
                threshold: args.threshold,
                weights: parse_weights(args.weights.as_deref()),
                ip2as_file: args.ip2as,
                ppdc_file: args.ppdc,
                record_successful_traces: args.record_successful,
            })
        }
        Command::RocketfuelSimulation { command } => match command {
            RocketfuelCommand::IngressReduction {
                ases,
                bdr,
                traces,
                output,
            } => rocketfuel::ingress_reduction(&ases, &bdr, &traces, &output),
            RocketfuelCommand::NextAs {
                output,
                ases,
                collectors,
                datadir,
            } => rocketfuel::analyse_next_hops(&output, &ases, &collectors, &datadir),
            RocketfuelCommand::MergeNextAs {
                output,
                ases,
                collectors,
                datadir,
            } => rocketfuel::merge_next_hops(&output, &ases, &collectors, &datadir),
            RocketfuelCommand::DirectedPrefixes {
                asn,
                collectors,
                output,
                break_prefix,
                start,
                end,
            } => rocketfuel::parse_ribs_dependent(asn, &collectors, &output, break_prefix, &start, &end),
        },
        Command::Analysis { command } => match command {
            AnalysisCommand::Overlays { forwarding_tables } => {
                rib::analysis::analyse_overlays(&forwarding_tables)
            }
            AnalysisCommand::AnalyseMergedOverlays {
                merged_overlays,
                forwarding_tables,
            } => rib::analysis::analyse_merged_overlays(&merged_overlays, &forwarding_tables),
            AnalysisCommand::OverlaysRepartitionVp {
                overlay_file,
                forwarding_table,
            } => rib::analysis::analyse_overlays_repartition_vp(&overlay_file, &forwarding_table),
            AnalysisCommand::MergeOverlays { dir } => rib::analysis::merge_overlays(&dir),
            AnalysisCommand::BuildOverlaysPerAs {
                ases,
                all_overlays,
                directed_prefixes_dir,
                output,
            } => rib::analysis::build_overlays_per_as(
                &ases,
                &all_overlays,
                &directed_prefixes_dir,
                &output,
            ),
        },
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    run(Cli::parse())?;
    Ok(())
}
