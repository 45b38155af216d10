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
//! Replay simulation: walk a strategy's ordered targets against the
//! recorded traces and track how much of the AS of interest (links,
//! addresses, routers) each probe would have discovered.

pub mod greedy;
pub mod parallel;
pub mod sequential;

use std::{
    collections::{HashMap, HashSet},
    fs,
    io::Write,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use ipnet::Ipv4Net;
use rayon::prelude::*;

use crate::{
    annotation::Annotations,
    caida::{ConeSizes, Ip2As},
    error::{Error, Result},
    readers::read_ases_file,
    stats,
    strategy::{read_strategy, AsLimit},
    traces::{self, Trace, TraceData},
    Asn,
};

pub use parallel::WeightFn;

/// The traceroute dataset plus its annotations, shared by all per-AS
/// simulation tasks.
pub struct SimData {
    pub data: TraceData,
    pub annotations: Annotations,
}

/// Ground truth of one AS of interest: what a complete probing campaign
/// could discover at best.
#[derive(Debug, Default)]
pub struct GroundTruth {
    pub adjs: HashSet<(Ipv4Addr, Ipv4Addr)>,
    pub multi_adjs: HashSet<(Ipv4Addr, Ipv4Addr)>,
    pub addresses: HashSet<Ipv4Addr>,
    pub routers: HashSet<String>,
}

/// Keep only the ground-truth elements annotated to the AS of interest.
pub fn filter_as(sim: &SimData, as_interest: Asn) -> GroundTruth {
    let asn_of = |addr: Ipv4Addr| sim.annotations.asn_of(addr);
    GroundTruth {
        adjs: sim
            .data
            .adjs
            .iter()
            .filter(|&&(a, b)| asn_of(a) == as_interest || asn_of(b) == as_interest)
            .copied()
            .collect(),
        multi_adjs: sim
            .data
            .multi_adjs
            .iter()
            .filter(|&&(a, b)| asn_of(a) == as_interest || asn_of(b) == as_interest)
            .copied()
            .collect(),
        addresses: sim
            .data
            .addresses
            .iter()
            .filter(|&&a| asn_of(a) == as_interest)
            .copied()
            .collect(),
        routers: sim
            .annotations
            .router_to_asn
            .iter()
            .filter(|(_, &asn)| asn == as_interest)
            .map(|(router, _)| router.clone())
            .collect(),
    }
}

/// Incremental discovery sets of one simulation.
#[derive(Debug, Default)]
pub struct Discovery {
    pub adjs: HashSet<(Ipv4Addr, Ipv4Addr)>,
    pub multi_adjs: HashSet<(Ipv4Addr, Ipv4Addr)>,
    pub addresses: HashSet<Ipv4Addr>,
    /// Routers with at least two discovered addresses.
    pub routers: HashSet<String>,
    /// First discovered address of each router; only the first two
    /// addresses of a router are ever tracked.
    router_first_addr: HashMap<String, Ipv4Addr>,
}

/// Replay one trace: collect the addresses, routers and (multi-hop)
/// adjacencies annotated to the AS of interest. Returns how many hops of
/// the trace belong to that AS.
pub fn process_trace(trace: Option<&Trace>, as_interest: Asn, disc: &mut Discovery) -> usize {
    let Some(trace) = trace else {
        return 0;
    };
    let mut discovery = 0usize;
    for (i, hop) in trace.iter().enumerate() {
        if hop.asn == as_interest {
            discovery += 1;
            disc.addresses.insert(hop.addr);
            if let Some(router) = &hop.router {
                match disc.router_first_addr.get(router) {
                    None => {
                        disc.router_first_addr.insert(router.clone(), hop.addr);
                    }
                    Some(&first) if first != hop.addr => {
                        // second distinct address: the router counts as
                        // discovered; further addresses are not tracked
                        disc.routers.insert(router.clone());
                    }
                    Some(_) => {}
                }
            }
        }
        if i == trace.len() - 1 {
            break;
        }
        let next = &trace[i + 1];
        // incoming links count too
        if hop.asn != as_interest && next.asn != as_interest {
            continue;
        }
        let distance = next.probe_ttl.saturating_sub(hop.probe_ttl);
        if distance == 1 {
            disc.adjs.insert((hop.addr, next.addr));
        } else if distance > 1 {
            disc.multi_adjs.insert((hop.addr, next.addr));
        }
    }
    discovery
}

fn frac(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

/// The discovery curve: one line per probe that advanced any of the
/// visible counters (adjacencies, addresses, routers).
#[derive(Debug, Default)]
pub(crate) struct DiscoveryLog {
    lines: Vec<(usize, String)>,
    prev: (usize, usize, usize),
}

impl DiscoveryLog {
    /// Record the probe at `counter` if it discovered anything new.
    pub(crate) fn observe(
        &mut self,
        counter: usize,
        disc: &Discovery,
        truth: &GroundTruth,
    ) -> bool {
        let now = (disc.adjs.len(), disc.addresses.len(), disc.routers.len());
        if now == self.prev {
            return false;
        }
        self.lines.push((
            counter,
            format!(
                "{:.4} {:.4} {:.4} {:.4}",
                frac(disc.adjs.len(), truth.adjs.len()),
                frac(disc.multi_adjs.len(), truth.multi_adjs.len()),
                frac(disc.addresses.len(), truth.addresses.len()),
                frac(disc.routers.len(), truth.routers.len()),
            ),
        ));
        self.prev = now;
        true
    }

    /// Write the curve sorted by probe counter as
    /// `sorted_<output-file-name>`.
    pub(crate) fn write_sorted(mut self, output_file: &Path) -> Result<()> {
        let dir = output_file.parent().unwrap_or_else(|| Path::new("."));
        let name = output_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::missing("write_results", "bad output file name"))?;
        let path = dir.join(format!("sorted_{name}"));
        self.lines.sort_by_key(|&(counter, _)| counter);

        let file = fs::File::create(&path).map_err(|e| Error::io("write_results", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        for (counter, line) in self.lines {
            writeln!(writer, "{counter} {line}").map_err(|e| Error::io("write_results", &path, e))?;
        }
        Ok(())
    }
}

/// Probing progress of one AS's contiguous run of targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsStatus {
    pub asn: Asn,
    /// Index of its first probe in the global target list.
    pub start: usize,
    /// One past the index of its last probe.
    pub end: usize,
    /// Next probe to launch.
    pub cur: usize,
    /// Length of the current run of useless probes.
    pub plateau: usize,
    pub stopped: bool,
    /// Rank of the AS in the strategy's boundary list.
    pub position: usize,
}

/// The per-AS ranges of a strategy, skipping empty runs. Positions keep
/// the rank in the boundary list, so the internals stay at position 0.
pub fn build_status(limits: &[AsLimit]) -> Vec<AsStatus> {
    let mut status = Vec::with_capacity(limits.len());
    let mut start = 0usize;
    for (position, limit) in limits.iter().enumerate() {
        if limit.limit == start {
            continue;
        }
        status.push(AsStatus {
            asn: limit.asn,
            start,
            end: limit.limit,
            cur: start,
            plateau: 0,
            stopped: false,
            position,
        });
        start = limit.limit;
    }
    status
}

/// Hand out the next target of an AS, if any. The cursor advances on
/// every call; an AS consuming its last probe becomes stopped exactly
/// once, even when it already stopped on a plateau.
pub fn next_probe(
    status: &mut AsStatus,
    targets: &[Ipv4Net],
    stopped_ases: &mut usize,
) -> Option<Ipv4Net> {
    let destination = if status.stopped || status.cur >= status.end {
        None
    } else {
        Some(targets[status.cur])
    };
    status.cur += 1;
    if status.cur == status.end && !status.stopped {
        status.stopped = true;
        *stopped_ases += 1;
    }
    destination
}

/// Ground truth, targets and boundaries of one per-AS simulation task.
pub(crate) struct Session {
    pub truth: GroundTruth,
    pub targets: Vec<Ipv4Net>,
    pub limits: Vec<AsLimit>,
}

pub(crate) fn prepare(sim: &SimData, as_interest: Asn, strategy_dir: &Path) -> Result<Session> {
    let truth = filter_as(sim, as_interest);
    stats::emit(format_args!(
        "raw.txt {as_interest} {} {} {} {}",
        truth.adjs.len(),
        truth.multi_adjs.len(),
        truth.addresses.len(),
        truth.routers.len()
    ));
    let (targets, limits) = read_strategy(strategy_dir, as_interest)?;
    Ok(Session {
        truth,
        targets,
        limits,
    })
}

pub(crate) fn per_as_output(output_file: &Path, as_interest: Asn) -> PathBuf {
    let stem = output_file
        .to_string_lossy()
        .trim_end_matches(".txt")
        .to_owned();
    PathBuf::from(format!("{stem}_{as_interest}.txt"))
}

/// The scheduling discipline replaying the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    Sequential,
    Parallel,
    Greedy,
}

impl TryFrom<usize> for SimulationMode {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self> {
        match index {
            0 => Ok(Self::Sequential),
            1 => Ok(Self::Parallel),
            2 => Ok(Self::Greedy),
            other => Err(Error::InvalidArgument(format!(
                "unknown simulation mode {other}"
            ))),
        }
    }
}

/// Inputs of the simulation step.
pub struct SimulationConfig {
    pub mode: SimulationMode,
    pub output_file: PathBuf,
    pub strategy_dir: PathBuf,
    pub ases_interest_file: PathBuf,
    pub annotation_file: PathBuf,
    pub traces_directory: PathBuf,
    /// Plateau threshold in `[0, 1]`.
    pub threshold: f64,
    /// Weight-function selector and parameters (batched scheduling).
    pub weights: Vec<f64>,
    pub ip2as_file: Option<PathBuf>,
    pub ppdc_file: Option<PathBuf>,
    pub record_successful_traces: bool,
}

/// Run the chosen scheduler for every AS of interest.
pub fn launch_simulation(config: SimulationConfig) -> Result<()> {
    let start = std::time::Instant::now();
    let annotations = Annotations::from_file(&config.annotation_file)?;
    let data = traces::read_trace_directory(&config.traces_directory, &annotations)?;
    let sim = SimData { data, annotations };
    log::info!("Parsing the trace dataset took {:?}", start.elapsed());

    // the cone-based weight function needs the customer cones
    let cones = match (&config.ip2as_file, &config.ppdc_file) {
        (Some(ip2as_file), Some(ppdc_file)) => {
            let start = std::time::Instant::now();
            let ip2as = Ip2As::from_file(ip2as_file)?;
            let cones = ConeSizes::from_file(ppdc_file, &ip2as)?;
            log::info!("Parsing the CAIDA files took {:?}", start.elapsed());
            Some(cones)
        }
        _ => None,
    };

    let ases_interest = read_ases_file(&config.ases_interest_file)?;
    log::info!("Launching simulation...");
    ases_interest.par_iter().for_each(|&as_interest| {
        let output = per_as_output(&config.output_file, as_interest);
        let run = || -> Result<()> {
            match config.mode {
                SimulationMode::Sequential => sequential::run(
                    &sim,
                    as_interest,
                    &config.strategy_dir,
                    &output,
                    config.threshold,
                    config.record_successful_traces,
                ),
                SimulationMode::Parallel => {
                    let session = prepare(&sim, as_interest, &config.strategy_dir)?;
                    let status = build_status(&session.limits);
                    let weight_fn =
                        WeightFn::build(&config.weights, status.len(), cones.as_ref())?;
                    parallel::run(&sim, as_interest, session, status, &weight_fn, &output, config.threshold)
                }
                SimulationMode::Greedy => greedy::run(
                    &sim,
                    as_interest,
                    &config.strategy_dir,
                    &output,
                    config.threshold,
                ),
            }
        };
        if let Err(e) = run() {
            log::error!("simulation for AS {as_interest}: {e}");
        }
    });

    let output_dir = config
        .output_file
        .parent()
        .unwrap_or_else(|| Path::new("."));
    stats::merge_reduction_files(output_dir)?;
    stats::split_stats_file(output_dir)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::traces::Hop;

    pub(crate) fn hop(addr: &str, asn: Asn, ttl: u32, router: Option<&str>) -> Hop {
        Hop {
            addr: addr.parse().unwrap(),
            asn,
            probe_ttl: ttl,
            ingress: false,
            egress: false,
            router: router.map(str::to_owned),
        }
    }

    #[test]
    fn trace_processing_classifies_links() {
        let trace: Trace = vec![
            hop("10.0.0.1", 174, 1, None),
            hop("10.0.0.2", 174, 2, None),
            hop("10.0.0.3", 174, 4, None),
            hop("10.0.1.1", 3356, 5, None),
            hop("10.0.1.2", 3356, 6, None),
        ];
        let mut disc = Discovery::default();
        let discovery = process_trace(Some(&trace), 174, &mut disc);

        assert_eq!(discovery, 3);
        assert_eq!(disc.addresses.len(), 3);
        // ttl gap 1 inside the AS, and the border link counts too
        assert!(disc.adjs.contains(&("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap())));
        assert!(disc.adjs.contains(&("10.0.0.3".parse().unwrap(), "10.0.1.1".parse().unwrap())));
        // ttl gap 2: multi-hop adjacency
        assert!(disc
            .multi_adjs
            .contains(&("10.0.0.2".parse().unwrap(), "10.0.0.3".parse().unwrap())));
        // the link fully outside the AS is ignored
        assert!(!disc.adjs.contains(&("10.0.1.1".parse().unwrap(), "10.0.1.2".parse().unwrap())));
    }

    #[test]
    fn router_needs_two_distinct_addresses() {
        let mut disc = Discovery::default();
        let t1: Trace = vec![hop("10.0.0.1", 174, 1, Some("N1"))];
        process_trace(Some(&t1), 174, &mut disc);
        assert!(disc.routers.is_empty());

        // same address again: still not discovered
        process_trace(Some(&t1), 174, &mut disc);
        assert!(disc.routers.is_empty());

        let t2: Trace = vec![hop("10.0.0.2", 174, 1, Some("N1"))];
        process_trace(Some(&t2), 174, &mut disc);
        assert_eq!(disc.routers.len(), 1);

        // a third address changes nothing
        let t3: Trace = vec![hop("10.0.0.3", 174, 1, Some("N1"))];
        process_trace(Some(&t3), 174, &mut disc);
        assert_eq!(disc.routers.len(), 1);
    }

    #[test]
    fn missing_trace_discovers_nothing() {
        let mut disc = Discovery::default();
        assert_eq!(process_trace(None, 174, &mut disc), 0);
        assert!(disc.addresses.is_empty());
    }

    #[test]
    fn status_skips_empty_runs_but_keeps_positions() {
        let limits = vec![
            AsLimit { asn: 10, limit: 4 },
            AsLimit { asn: 11, limit: 4 },
            AsLimit { asn: 12, limit: 9 },
        ];
        let status = build_status(&limits);
        assert_eq!(status.len(), 2);
        assert_eq!((status[0].asn, status[0].start, status[0].end, status[0].position), (10, 0, 4, 0));
        assert_eq!((status[1].asn, status[1].start, status[1].end, status[1].position), (12, 4, 9, 2));
    }

    #[test]
    fn next_probe_stops_each_as_once() {
        let targets: Vec<Ipv4Net> = (0..3)
            .map(|i| format!("10.0.{i}.0/24").parse().unwrap())
            .collect();
        let mut status = AsStatus {
            asn: 10,
            start: 0,
            end: 3,
            cur: 0,
            plateau: 0,
            stopped: false,
            position: 0,
        };
        let mut stopped = 0usize;
        assert!(next_probe(&mut status, &targets, &mut stopped).is_some());
        assert!(next_probe(&mut status, &targets, &mut stopped).is_some());
        assert_eq!(stopped, 0);
        assert!(next_probe(&mut status, &targets, &mut stopped).is_some());
        assert_eq!(stopped, 1);
        assert!(status.stopped);
        // further calls neither yield targets nor re-count the stop
        assert!(next_probe(&mut status, &targets, &mut stopped).is_none());
        assert_eq!(stopped, 1);
    }

    #[test]
    fn plateau_stopped_as_does_not_double_count() {
        let targets: Vec<Ipv4Net> = (0..3)
            .map(|i| format!("10.0.{i}.0/24").parse().unwrap())
            .collect();
        let mut status = AsStatus {
            asn: 10,
            start: 0,
            end: 3,
            cur: 2,
            plateau: 0,
            stopped: true,
            position: 0,
        };
        let mut stopped = 1usize;
        // the cursor passes `end` while the AS is already stopped
        assert!(next_probe(&mut status, &targets, &mut stopped).is_none());
        assert_eq!(stopped, 1);
    }

    #[test]
    fn fractions_stay_in_unit_interval() {
        assert_eq!(frac(0, 0), 0.0);
        assert_eq!(frac(3, 4), 0.75);
        let mut log = DiscoveryLog::default();
        let truth = GroundTruth::default();
        let mut disc = Discovery::default();
        disc.addresses.insert("10.0.0.1".parse().unwrap());
        assert!(log.observe(0, &disc, &truth));
        // empty ground truth reports zero, not NaN
        assert!(log.lines[0].1.starts_with("0.0000"));
    }
}
