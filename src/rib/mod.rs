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
//! RIB ingestion: streaming the BGP reader's records per collector,
//! collapsing the entries of each prefix to one selected route, and
//! persisting the forwarding tables, next-hop-AS files, collector peers
//! and per-collector overlays.

pub mod analysis;
pub mod count;
pub mod heuristics;

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::Mutex,
};

use indicatif::ProgressBar;
use ipnet::Ipv4Net;
use itertools::Itertools;
use rayon::prelude::*;

use crate::{
    caida::AsRelations,
    error::{Error, Result},
    overlays, prefix,
    readers::read_ases_file,
    Asn,
};

/// Reader turning archived BGP dumps into pipe-delimited text records.
const BGP_READER: &str = "bgpreader";

/// One candidate route for a prefix, as learned from one BGP peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibEntry {
    /// AS path in wire order: collector peer first, origin last.
    pub as_path: Vec<Asn>,
    /// For each AS of interest on the path, the AS right after it on the
    /// way towards the origin (or the AS itself when it is the origin).
    pub next_hop_by_as: BTreeMap<Asn, Asn>,
}

impl RibEntry {
    pub fn new(as_path: Vec<Asn>, ases_interest: &[Asn]) -> Self {
        let mut next_hop_by_as = BTreeMap::new();
        for &interest in ases_interest {
            if let Some(pos) = as_path.iter().position(|&a| a == interest) {
                let target = as_path.get(pos + 1).copied().unwrap_or(interest);
                next_hop_by_as.insert(interest, target);
            }
        }
        Self {
            as_path,
            next_hop_by_as,
        }
    }

    pub fn path_string(&self) -> String {
        self.as_path.iter().join(" ")
    }
}

/// The route-selection discipline applied to each prefix's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    ShortestPath,
    ValleyFree,
}

impl TryFrom<usize> for Heuristic {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self> {
        match index {
            0 => Ok(Self::ShortestPath),
            1 => Ok(Self::ValleyFree),
            other => Err(Error::InvalidArgument(format!(
                "unknown heuristic index {other}"
            ))),
        }
    }
}

/// Everything extracted from one collector's RIB dump.
#[derive(Debug, Default)]
pub struct CollectorTables {
    /// Selected entry per prefix.
    pub entries: BTreeMap<Ipv4Net, RibEntry>,
    /// BGP peers feeding the collector.
    pub peers: BTreeSet<Asn>,
    /// Times the grouped-by-prefix assumption was observed broken.
    pub assumption_violations: usize,
}

/// Per-origin announced prefixes, merged across all collectors.
pub type OriginSet = Mutex<BTreeMap<Asn, BTreeSet<Ipv4Net>>>;

fn collapse(
    prefix: Option<Ipv4Net>,
    bucket: &mut Vec<RibEntry>,
    heuristic: Heuristic,
    relations: Option<&AsRelations>,
    tables: &mut CollectorTables,
) {
    let candidates = std::mem::take(bucket);
    let Some(prefix) = prefix else {
        return;
    };
    if candidates.is_empty() {
        return;
    }
    let selected = match heuristic {
        Heuristic::ShortestPath => heuristics::apply_shortest_path(candidates),
        Heuristic::ValleyFree => heuristics::apply_valley_free(
            candidates,
            relations.expect("relations are loaded for the valley-free heuristic"),
        ),
    };
    if let Some(entry) = selected {
        // a repeated prefix silently replaces its earlier selection
        tables.entries.insert(prefix, entry);
    }
}

/// Consume one collector's record stream.
///
/// Records of one prefix are assumed contiguous; a violation is counted
/// and logged, and the later bucket replaces the earlier selection.
pub fn parse_collector_stream(
    reader: impl BufRead,
    collector: &str,
    ases_interest: &[Asn],
    heuristic: Heuristic,
    relations: Option<&AsRelations>,
    origin_set: &OriginSet,
) -> Result<CollectorTables> {
    let mut tables = CollectorTables::default();
    let mut bucket: Vec<RibEntry> = Vec::new();
    let mut bucket_prefix: Option<Ipv4Net> = None;
    let mut memory: HashSet<Ipv4Net> = HashSet::new();

    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("parse_collector_stream", collector, e))?;
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 13 {
            log::debug!("skipping short record from {collector}: {line}");
            continue;
        }
        if fields[1] != "R" {
            continue;
        }
        let valid = prefix::validate(fields[9]);

        // prefix change (or invalid record) closes the current bucket
        if valid != bucket_prefix || valid.is_none() {
            collapse(
                bucket_prefix.take(),
                &mut bucket,
                heuristic,
                relations,
                &mut tables,
            );
            if let Some(net) = valid {
                if !memory.insert(net) {
                    tables.assumption_violations += 1;
                    log::warn!("{collector}: RIB entries of {net} are not contiguous");
                }
                bucket_prefix = Some(net);
            }
        }
        let Some(net) = valid else {
            continue;
        };

        let as_path: Option<Vec<Asn>> = fields[11]
            .split_whitespace()
            .map(|t| t.parse::<Asn>().ok())
            .collect();
        let Some(as_path) = as_path else {
            log::debug!("skipping record with unparsable AS path: {}", fields[11]);
            continue;
        };
        bucket.push(RibEntry::new(as_path, ases_interest));

        // recorded for every candidate, irrespective of the selection
        if let Ok(origin) = fields[12].parse::<Asn>() {
            origin_set
                .lock()
                .unwrap()
                .entry(origin)
                .or_default()
                .insert(net);
        }
        if let Ok(peer) = fields[7].parse::<Asn>() {
            tables.peers.insert(peer);
        }
    }
    collapse(
        bucket_prefix.take(),
        &mut bucket,
        heuristic,
        relations,
        &mut tables,
    );
    Ok(tables)
}

/// Spawn the BGP reader for one collector over a time window. Extra
/// arguments (prefix or AS-path filters) are appended verbatim.
pub(crate) fn spawn_bgp_reader(
    collector: &str,
    start: &str,
    end: &str,
    extra_args: &[String],
) -> Result<(Child, impl BufRead)> {
    let window = format!("{start},{end}");
    let mut child = Command::new(BGP_READER)
        .args(["-t", "ribs", "-c", collector, "-w", window.as_str()])
        .args(extra_args)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Subprocess {
            context: "spawn_bgp_reader",
            command: BGP_READER.into(),
            message: e.to_string(),
        })?;
    let stdout = child.stdout.take().expect("stdout was piped");
    Ok((child, BufReader::new(stdout)))
}

/// Wait for the reader once its stream is fully parsed.
pub(crate) fn wait_bgp_reader(mut child: Child, collector: &str) -> Result<()> {
    let status = child.wait().map_err(|e| Error::Subprocess {
        context: "wait_bgp_reader",
        command: format!("{BGP_READER} -c {collector}"),
        message: e.to_string(),
    })?;
    if !status.success() {
        return Err(Error::Subprocess {
            context: "wait_bgp_reader",
            command: format!("{BGP_READER} -c {collector}"),
            message: status.to_string(),
        });
    }
    Ok(())
}

fn create_output(path: &Path) -> Result<BufWriter<fs::File>> {
    let file = fs::File::create(path).map_err(|e| Error::io("write_to_file", path, e))?;
    Ok(BufWriter::new(file))
}

fn write_forwarding_table(path: &Path, tables: &CollectorTables) -> Result<()> {
    let mut writer = create_output(path)?;
    for (net, entry) in &tables.entries {
        writeln!(writer, "{net} {}", entry.path_string())
            .map_err(|e| Error::io("write_forwarding_table", path, e))?;
    }
    Ok(())
}

/// The next-hop-AS file of a collector, plus its per-AS-of-interest
/// splits (`next_hop_AS_<collector>_<AS>.txt`, lines `<prefix> <next>`).
fn write_next_hop_files(dir: &Path, collector: &str, tables: &CollectorTables) -> Result<()> {
    let global_path = dir.join(format!("next_hop_AS_{collector}.txt"));
    let mut global = create_output(&global_path)?;
    let mut per_as: BTreeMap<Asn, Vec<(Ipv4Net, Asn)>> = BTreeMap::new();
    for (net, entry) in &tables.entries {
        for (&interest, &next) in &entry.next_hop_by_as {
            writeln!(global, "{net} {interest} {next}")
                .map_err(|e| Error::io("write_next_hop_files", &global_path, e))?;
            per_as.entry(interest).or_default().push((*net, next));
        }
    }
    for (interest, lines) in per_as {
        let path = dir.join(format!("next_hop_AS_{collector}_{interest}.txt"));
        let mut writer = create_output(&path)?;
        for (net, next) in lines {
            writeln!(writer, "{net} {next}")
                .map_err(|e| Error::io("write_next_hop_files", &path, e))?;
        }
    }
    Ok(())
}

fn write_peers_file(path: &Path, collector: &str, tables: &CollectorTables) -> Result<()> {
    let mut writer = create_output(path)?;
    writeln!(writer, "{collector} {}", tables.peers.iter().join(" "))
        .map_err(|e| Error::io("write_peers_file", path, e))?;
    Ok(())
}

/// Write overlay groups, one per line, representative first.
pub(crate) fn write_overlay_groups(
    path: &Path,
    groups: &[(Ipv4Net, Vec<Ipv4Net>)],
) -> Result<()> {
    let mut writer = create_output(path)?;
    for (representative, members) in groups {
        write!(writer, "{representative}")
            .map_err(|e| Error::io("write_overlay_groups", path, e))?;
        for member in members {
            write!(writer, " {member}").map_err(|e| Error::io("write_overlay_groups", path, e))?;
        }
        writeln!(writer).map_err(|e| Error::io("write_overlay_groups", path, e))?;
    }
    Ok(())
}

/// Full per-collector pipeline: stream the reader, select routes, and
/// persist the four per-collector outputs.
fn process_collector(
    collector: &str,
    output_dir: &Path,
    start: &str,
    end: &str,
    ases_interest: &[Asn],
    heuristic: Heuristic,
    relations: Option<&AsRelations>,
    origin_set: &OriginSet,
) -> Result<()> {
    let (child, reader) = spawn_bgp_reader(collector, start, end, &[])?;
    let tables = parse_collector_stream(
        reader,
        collector,
        ases_interest,
        heuristic,
        relations,
        origin_set,
    );
    wait_bgp_reader(child, collector)?;
    let tables = tables?;
    if tables.assumption_violations > 0 {
        log::warn!(
            "{collector}: {} prefixes had non-contiguous RIB entries",
            tables.assumption_violations
        );
    }

    write_peers_file(
        &output_dir.join(format!("collectors/BGP_peers_{collector}.txt")),
        collector,
        &tables,
    )?;

    let edges = overlays::collect_overlay_edges(
        tables
            .entries
            .iter()
            .map(|(net, entry)| (*net, entry.path_string())),
    );
    write_overlay_groups(
        &output_dir.join(format!("overlays/overlays_{collector}.txt")),
        &overlays::closure(edges),
    )?;

    write_forwarding_table(
        &output_dir.join(format!("forwarding_tables/{collector}.txt")),
        &tables,
    )?;

    let next_hop_dir = output_dir.join(format!("next-hop_AS/{collector}"));
    fs::create_dir_all(&next_hop_dir)
        .map_err(|e| Error::io("process_collector", &next_hop_dir, e))?;
    write_next_hop_files(&next_hop_dir, collector, &tables)?;
    Ok(())
}

/// Parse the RIBs of all collectors (16-way parallel) and write the
/// per-collector and merged outputs.
#[allow(clippy::too_many_arguments)]
pub fn parse_ribs(
    ases_interest_file: &Path,
    collectors_file: &Path,
    output_dir: &Path,
    start: &str,
    end: &str,
    heuristic: Heuristic,
    as_rel_file: Option<&Path>,
) -> Result<()> {
    let ases_interest = read_ases_file(ases_interest_file)?;
    for sub in ["overlays", "forwarding_tables", "next-hop_AS", "collectors"] {
        let dir = output_dir.join(sub);
        fs::create_dir_all(&dir).map_err(|e| Error::io("parse_ribs", &dir, e))?;
    }

    let relations = match heuristic {
        Heuristic::ValleyFree => {
            let path = as_rel_file.ok_or_else(|| {
                Error::missing("parse_ribs", "the valley-free heuristic needs an as-rel file")
            })?;
            Some(AsRelations::from_file(path)?)
        }
        Heuristic::ShortestPath => None,
    };

    let collectors = crate::readers::read_collectors_file(collectors_file)?;
    log::info!("Collectors: {}", collectors.len());
    let origin_set = OriginSet::default();
    let bar = ProgressBar::new(collectors.len() as u64);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(16)
        .build()
        .map_err(|e| Error::missing("parse_ribs", e.to_string()))?;
    pool.install(|| {
        collectors.par_iter().for_each(|collector| {
            if let Err(e) = process_collector(
                collector,
                output_dir,
                start,
                end,
                &ases_interest,
                heuristic,
                relations.as_ref(),
                &origin_set,
            ) {
                log::error!("{e}");
            }
            bar.inc(1);
        });
    });
    bar.finish_and_clear();

    // post-processing once every collector is in
    let origin_path = output_dir.join("collectors/origin_ases.txt");
    let mut writer = create_output(&origin_path)?;
    for (origin, prefixes) in origin_set.lock().unwrap().iter() {
        writeln!(writer, "{origin} {}", prefixes.iter().join(" "))
            .map_err(|e| Error::io("parse_ribs", &origin_path, e))?;
    }
    drop(writer);

    analysis::merge_overlays(output_dir)?;
    gather_peer_files(output_dir)?;
    Ok(())
}

/// Concatenate the per-collector peer files into `all_BGP_peers.txt` and
/// remove them.
fn gather_peer_files(output_dir: &Path) -> Result<()> {
    let dir = output_dir.join("collectors");
    let mut peer_files: Vec<PathBuf> = fs::read_dir(&dir)
        .map_err(|e| Error::io("gather_peer_files", &dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("BGP_peers_"))
        })
        .collect();
    peer_files.sort();

    let all_path = dir.join("all_BGP_peers.txt");
    let mut writer = create_output(&all_path)?;
    for path in peer_files {
        let content =
            fs::read_to_string(&path).map_err(|e| Error::io("gather_peer_files", &path, e))?;
        writer
            .write_all(content.as_bytes())
            .map_err(|e| Error::io("gather_peer_files", &all_path, e))?;
        fs::remove_file(&path).map_err(|e| Error::io("gather_peer_files", &path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(prefix: &str, peer: &str, path: &str, origin: &str) -> String {
        format!("R|R|1618876800|ris|rrc00|||{peer}|192.0.2.1|{prefix}|192.0.2.1|{path}|{origin}|||")
    }

    #[test]
    fn next_hop_map_points_towards_origin() {
        let entry = RibEntry::new(vec![50, 20, 10], &[20, 10, 99]);
        assert_eq!(entry.next_hop_by_as.get(&20), Some(&10));
        // the origin maps to itself
        assert_eq!(entry.next_hop_by_as.get(&10), Some(&10));
        assert_eq!(entry.next_hop_by_as.get(&99), None);
    }

    #[test]
    fn stream_collapses_per_prefix() {
        let stream = [
            record("8.8.8.0/24", "1", "50 20 10", "10"),
            record("8.8.8.0/24", "2", "60 40 20 10", "10"),
            record("9.9.9.0/24", "1", "50 30", "30"),
        ]
        .join("\n");
        let origin_set = OriginSet::default();
        let tables = parse_collector_stream(
            stream.as_bytes(),
            "rrc00",
            &[],
            Heuristic::ShortestPath,
            None,
            &origin_set,
        )
        .unwrap();

        assert_eq!(tables.entries.len(), 2);
        let google: Ipv4Net = "8.8.8.0/24".parse().unwrap();
        assert_eq!(tables.entries[&google].as_path, vec![50, 20, 10]);
        assert_eq!(tables.peers, BTreeSet::from([1, 2]));
        assert_eq!(tables.assumption_violations, 0);

        let origins = origin_set.lock().unwrap();
        assert!(origins[&10].contains(&google));
        assert!(origins[&30].contains(&"9.9.9.0/24".parse().unwrap()));
    }

    #[test]
    fn non_contiguous_prefixes_are_counted() {
        let stream = [
            record("8.8.8.0/24", "1", "50 10", "10"),
            record("9.9.9.0/24", "1", "50 30", "30"),
            record("8.8.8.0/24", "2", "60 40 10", "10"),
        ]
        .join("\n");
        let origin_set = OriginSet::default();
        let tables = parse_collector_stream(
            stream.as_bytes(),
            "rrc00",
            &[],
            Heuristic::ShortestPath,
            None,
            &origin_set,
        )
        .unwrap();

        assert_eq!(tables.assumption_violations, 1);
        // the later bucket replaced the earlier selection
        let google: Ipv4Net = "8.8.8.0/24".parse().unwrap();
        assert_eq!(tables.entries[&google].as_path, vec![60, 40, 10]);
    }

    #[test]
    fn invalid_prefixes_are_dropped() {
        let stream = [
            record("10.1.2.0/24", "1", "50 10", "10"),
            record("8.8.8.0/30", "1", "50 10", "10"),
            record("2001:db8::/32", "1", "50 10", "10"),
            record("8.8.8.0/24", "1", "50 10", "10"),
        ]
        .join("\n");
        let origin_set = OriginSet::default();
        let tables = parse_collector_stream(
            stream.as_bytes(),
            "rrc00",
            &[],
            Heuristic::ShortestPath,
            None,
            &origin_set,
        )
        .unwrap();
        assert_eq!(tables.entries.len(), 1);
        assert!(tables.entries.contains_key(&"8.8.8.0/24".parse().unwrap()));
    }
}
