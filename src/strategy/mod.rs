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
//! The strategy step: turn the parsed routing data into, per AS of
//! interest, an ordered target list plus the boundaries between the ASes
//! the probes belong to. The simulator replays these files afterwards.

pub mod groups;
pub mod menu;

use std::{
    fs,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use ipnet::Ipv4Net;
use rayon::prelude::*;

use crate::{
    annotation::Annotations,
    caida::{AsRelations, ConeSizes, Ip2As, Ip2AsView},
    error::{Error, Result},
    prefix,
    readers::{read_ases_file, read_vps_file},
    stats,
    traces::{self, TargetVps},
    Asn,
};

/// End of the contiguous run of probes of one AS in the target list:
/// `limit` is one past the index of its last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsLimit {
    pub asn: Asn,
    pub limit: usize,
}

/// Read-only data shared by all strategies.
pub struct StrategyEnv {
    pub relations: AsRelations,
    pub ip2as: Ip2As,
    pub cones: ConeSizes,
    /// Work on `/24` tiles instead of the raw announced prefixes.
    pub break_prefix: bool,
    pub vps: Vec<String>,
    pub directed_prefixes_dir: Option<PathBuf>,
    pub overlays_global_file: Option<PathBuf>,
    pub next_hop_as_dir: Option<PathBuf>,
    pub oracle_prefixes_dir: Option<PathBuf>,
    /// Seed of the shuffled baseline strategy.
    pub shuffle_seed: u64,
}

impl StrategyEnv {
    pub fn prefixes(&self) -> Ip2AsView<'_> {
        self.ip2as.view(self.break_prefix)
    }

    pub(crate) fn directed_prefixes_dir(&self) -> Result<&Path> {
        self.directed_prefixes_dir
            .as_deref()
            .ok_or_else(|| Error::missing("strategy", "no directed-prefixes directory given"))
    }
}

/// Compute the ordered target list and AS limits for one AS of interest.
pub fn apply_strategy(
    env: &StrategyEnv,
    strategy: usize,
    destinations: &[Ipv4Net],
    as_interest: Asn,
    target_to_vp: &TargetVps,
) -> Result<(Vec<Ipv4Net>, Vec<AsLimit>)> {
    menu::apply(env, strategy, destinations, as_interest, target_to_vp)
}

/// Persist a strategy's output: one random host address per target in
/// `targets.txt`, and the `<limit> <asn>` boundaries in `as_limits.txt`
/// (boundaries of empty runs are skipped).
pub fn write_strategy(
    output_dir: &Path,
    targets: &[Ipv4Net],
    limits: &[AsLimit],
) -> Result<()> {
    let targets_path = output_dir.join("targets.txt");
    let file =
        fs::File::create(&targets_path).map_err(|e| Error::io("write_strategy", &targets_path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for target in targets {
        writeln!(writer, "{}", prefix::random_host(*target))
            .map_err(|e| Error::io("write_strategy", &targets_path, e))?;
    }
    drop(writer);

    let limits_path = output_dir.join("as_limits.txt");
    let file =
        fs::File::create(&limits_path).map_err(|e| Error::io("write_strategy", &limits_path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    let mut previous = 0usize;
    for limit in limits {
        if limit.limit != previous {
            writeln!(writer, "{} {}", limit.limit, limit.asn)
                .map_err(|e| Error::io("write_strategy", &limits_path, e))?;
        }
        previous = limit.limit;
    }
    Ok(())
}

/// Read a strategy's output back for the simulator: the target host
/// addresses become `/24` targets again.
pub fn read_strategy(
    strategy_dir: &Path,
    as_interest: Asn,
) -> Result<(Vec<Ipv4Net>, Vec<AsLimit>)> {
    let targets_path = strategy_dir.join(format!("{as_interest}/targets.txt"));
    let reader = crate::readers::open_input(&targets_path)?;
    let mut targets = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("read_strategy", &targets_path, e))?;
        let Ok(host) = line.trim().parse::<std::net::Ipv4Addr>() else {
            return Err(Error::Parse {
                context: "read_strategy",
                what: "target address",
                line,
            });
        };
        targets.push(prefix::net_24_of(host));
    }

    let limits_path = strategy_dir.join(format!("{as_interest}/as_limits.txt"));
    let reader = crate::readers::open_input(&limits_path)?;
    let mut limits = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("read_strategy", &limits_path, e))?;
        let mut fields = line.split_whitespace();
        let (Some(Ok(limit)), Some(Ok(asn))) = (
            fields.next().map(str::parse::<usize>),
            fields.next().map(str::parse::<Asn>),
        ) else {
            return Err(Error::Parse {
                context: "read_strategy",
                what: "AS limit",
                line,
            });
        };
        limits.push(AsLimit { asn, limit });
    }
    Ok((targets, limits))
}

/// Inputs of the strategy step.
pub struct StrategyConfig {
    pub strategy: usize,
    pub break_prefix: bool,
    pub output_dir: PathBuf,
    pub ases_interest_file: PathBuf,
    pub as_rel_file: PathBuf,
    pub ppdc_file: PathBuf,
    pub ip2as_file: PathBuf,
    pub directed_prefixes_dir: Option<PathBuf>,
    pub overlays_global_file: Option<PathBuf>,
    pub next_hop_as_dir: Option<PathBuf>,
    pub oracle_prefixes_dir: Option<PathBuf>,
    /// Optional traceroute dataset the strategy is recorded against.
    pub annotation_file: Option<PathBuf>,
    pub traces_directory: Option<PathBuf>,
    pub vps_file: Option<PathBuf>,
    pub shuffle_seed: u64,
}

/// Run the strategy step for every AS of interest.
pub fn launch_strategy(config: StrategyConfig) -> Result<()> {
    log::info!("Reading data...");
    let relations = AsRelations::from_file(&config.as_rel_file)?;
    if relations.is_empty() {
        return Err(Error::missing("launch_strategy", "as_neighbors is empty"));
    }
    let ip2as = Ip2As::from_file(&config.ip2as_file)?;
    let cones = ConeSizes::from_file(&config.ppdc_file, &ip2as)?;
    let ases_interest = read_ases_file(&config.ases_interest_file)?;

    let mut env = StrategyEnv {
        relations,
        ip2as,
        cones,
        break_prefix: config.break_prefix,
        vps: vec!["my_VP".to_owned()],
        directed_prefixes_dir: config.directed_prefixes_dir,
        overlays_global_file: config.overlays_global_file,
        next_hop_as_dir: config.next_hop_as_dir,
        oracle_prefixes_dir: config.oracle_prefixes_dir,
        shuffle_seed: config.shuffle_seed,
    };

    // replaying the strategy against a recorded dataset pins the targets
    // and vantage points to the traces
    let mut destinations: Vec<Ipv4Net> = Vec::new();
    let mut target_to_vp = TargetVps::Fixed("my_VP".to_owned());
    if let (Some(traces_dir), Some(vps_file)) =
        (&config.traces_directory, &config.vps_file)
    {
        let annotation_file = config.annotation_file.as_deref().ok_or_else(|| {
            Error::missing("launch_strategy", "a traceroute dataset needs the annotation file")
        })?;
        let annotations = Annotations::from_file(annotation_file)?;
        let data = traces::read_trace_directory(traces_dir, &annotations)?;
        destinations = data.traces.keys().copied().collect();
        destinations.sort();
        target_to_vp = TargetVps::PerTarget(data.target_to_vp);
        env.vps = read_vps_file(vps_file)?;
    }

    log::info!("Launch strategy {}...", config.strategy);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(3)
        .build()
        .map_err(|e| Error::missing("launch_strategy", e.to_string()))?;
    pool.install(|| {
        ases_interest.par_iter().for_each(|&as_interest| {
            let run = || -> Result<()> {
                let as_dir = config.output_dir.join(as_interest.to_string());
                fs::create_dir_all(&as_dir)
                    .map_err(|e| Error::io("launch_strategy", &as_dir, e))?;
                let (targets, limits) = apply_strategy(
                    &env,
                    config.strategy,
                    &destinations,
                    as_interest,
                    &target_to_vp,
                )?;
                write_strategy(&as_dir, &targets, &limits)
            };
            if let Err(e) = run() {
                log::error!("strategy for AS {as_interest}: {e}");
            }
        });
    });

    stats::split_stats_file(&config.output_dir)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn limits_written_without_empty_runs() {
        let dir = std::env::temp_dir().join(format!("anaximander_strategy_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let targets: Vec<Ipv4Net> =
            vec!["1.0.0.0/24".parse().unwrap(), "2.0.0.0/24".parse().unwrap()];
        let limits = vec![
            AsLimit { asn: 10, limit: 1 },
            AsLimit { asn: 11, limit: 1 },
            AsLimit { asn: 12, limit: 2 },
        ];
        write_strategy(&dir, &targets, &limits).unwrap();

        let content = fs::read_to_string(dir.join("as_limits.txt")).unwrap();
        assert_eq!(content, "1 10\n2 12\n");

        let hosts = fs::read_to_string(dir.join("targets.txt")).unwrap();
        let lines: Vec<&str> = hosts.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1.0.0."));
        assert!(lines[1].starts_with("2.0.0."));
        fs::remove_dir_all(dir).ok();
    }
}
