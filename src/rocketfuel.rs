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
//! Replay evaluation of the classic path-reduction techniques: ingress
//! reduction, next-hop-AS reduction, and directed probing with
//! dependent-prefix classification.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fs,
    io::{BufRead, Write},
    net::Ipv4Addr,
    path::Path,
    sync::Mutex,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use rayon::prelude::*;

use crate::{
    annotation::Annotations,
    error::{Error, Result},
    prefix,
    readers::{open_input, read_ases_file, read_collectors_file},
    rib::{spawn_bgp_reader, wait_bgp_reader},
    traces, Asn,
};

/* ---------- ingress reduction ---------- */

/// Count, per vantage point, the distinct ingress addresses of each AS
/// of interest, and per AS the egress addresses of each
/// `(ingress, next AS)` pair.
pub fn ingress_reduction(
    ases_file: &Path,
    annotation_file: &Path,
    traces_directory: &Path,
    output_dir: &Path,
) -> Result<()> {
    let annotations = Annotations::from_file(annotation_file)?;
    let data = traces::read_trace_directory(traces_directory, &annotations)?;
    let ases = read_ases_file(ases_file)?;

    // vp -> as -> ingress addresses
    let mut vp_as_ingresses: BTreeMap<String, BTreeMap<Asn, HashSet<Ipv4Addr>>> = BTreeMap::new();
    // as -> (ingress, next as) -> egress addresses
    let mut as_egresses: BTreeMap<Asn, BTreeMap<String, HashSet<Ipv4Addr>>> = BTreeMap::new();

    for (dst, trace) in &data.traces {
        let mut ingress = String::new();
        for (i, hop) in trace.iter().enumerate() {
            if hop.ingress && ases.contains(&hop.asn) {
                if let Some(vp) = data.target_to_vp.get(dst) {
                    vp_as_ingresses
                        .entry(vp.clone())
                        .or_default()
                        .entry(hop.asn)
                        .or_default()
                        .insert(hop.addr);
                    ingress = hop.addr.to_string();
                }
            }
            if hop.egress && ases.contains(&hop.asn) {
                let next_asn = trace[i + 1].asn;
                as_egresses
                    .entry(hop.asn)
                    .or_default()
                    .entry(format!("{ingress}{next_asn}"))
                    .or_default()
                    .insert(hop.addr);
            }
        }
    }

    let table_path = output_dir.join("ingresses_per_vp.txt");
    let file =
        fs::File::create(&table_path).map_err(|e| Error::io("ingress_reduction", &table_path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    writeln!(writer, "VP {}", ases.iter().join(" "))
        .map_err(|e| Error::io("ingress_reduction", &table_path, e))?;
    for (vp, as_ingresses) in &vp_as_ingresses {
        let counts = ases
            .iter()
            .map(|asn| as_ingresses.get(asn).map_or(0, HashSet::len).to_string())
            .join(" ");
        writeln!(writer, "{vp} {counts}")
            .map_err(|e| Error::io("ingress_reduction", &table_path, e))?;
    }
    drop(writer);

    let egress_path = output_dir.join("nbegresses_per_as.txt");
    let file =
        fs::File::create(&egress_path).map_err(|e| Error::io("ingress_reduction", &egress_path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for (asn, per_pair) in &as_egresses {
        let counts = per_pair.values().map(|addrs| addrs.len().to_string()).join(" ");
        writeln!(writer, "{asn} {counts}")
            .map_err(|e| Error::io("ingress_reduction", &egress_path, e))?;
    }
    Ok(())
}

/* ---------- next-hop-AS reduction ---------- */

fn per_as_next_hop_file(dir: &Path, collector: &str, asn: Asn) -> std::path::PathBuf {
    dir.join(format!("{collector}/next_hop_AS_{collector}_{asn}.txt"))
}

/// For each AS of interest, count the prefixes that saw more than one
/// next-hop AS across all collectors.
pub fn analyse_next_hops(
    outdir: &Path,
    ases_file: &Path,
    collectors_file: &Path,
    next_hop_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(outdir).map_err(|e| Error::io("analyse_next_hops", outdir, e))?;
    let ases = read_ases_file(ases_file)?;
    let collectors = read_collectors_file(collectors_file)?;

    for asn in ases {
        let mut prefix_next: BTreeMap<Ipv4Net, BTreeSet<Asn>> = BTreeMap::new();
        for collector in &collectors {
            let path = per_as_next_hop_file(next_hop_dir, collector, asn);
            // a collector without the file is simply skipped
            let Ok(reader) = open_input(&path) else {
                continue;
            };
            for line in reader.lines() {
                let line = line.map_err(|e| Error::io("analyse_next_hops", &path, e))?;
                let mut fields = line.split_whitespace();
                let (Some(Ok(net)), Some(Ok(next))) = (
                    fields.next().map(str::parse::<Ipv4Net>),
                    fields.next().map(str::parse::<Asn>),
                ) else {
                    continue;
                };
                prefix_next.entry(net).or_default().insert(next);
            }
        }

        let path = outdir.join(format!("{asn}.txt"));
        let file = fs::File::create(&path).map_err(|e| Error::io("analyse_next_hops", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        for (net, next_hops) in prefix_next {
            if next_hops.len() > 1 {
                writeln!(writer, "{net} {}", next_hops.len())
                    .map_err(|e| Error::io("analyse_next_hops", &path, e))?;
            }
        }
    }
    Ok(())
}

/// Merge the per-collector next-hop files of each AS of interest into
/// one `merged_next_AS_<AS>.txt` table (the last collector read wins).
pub fn merge_next_hops(
    outdir: &Path,
    ases_file: &Path,
    collectors_file: &Path,
    next_hop_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(outdir).map_err(|e| Error::io("merge_next_hops", outdir, e))?;
    let ases = read_ases_file(ases_file)?;
    let collectors = read_collectors_file(collectors_file)?;

    for asn in ases {
        let mut prefix_next: BTreeMap<Ipv4Net, Asn> = BTreeMap::new();
        for collector in &collectors {
            let path = per_as_next_hop_file(next_hop_dir, collector, asn);
            let Ok(reader) = open_input(&path) else {
                continue;
            };
            for line in reader.lines() {
                let line = line.map_err(|e| Error::io("merge_next_hops", &path, e))?;
                let mut fields = line.split_whitespace();
                let (Some(Ok(net)), Some(Ok(next))) = (
                    fields.next().map(str::parse::<Ipv4Net>),
                    fields.next().map(str::parse::<Asn>),
                ) else {
                    continue;
                };
                prefix_next.insert(net, next);
            }
        }

        let path = outdir.join(format!("merged_next_AS_{asn}.txt"));
        let file = fs::File::create(&path).map_err(|e| Error::io("merge_next_hops", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        for (net, next) in prefix_next {
            writeln!(writer, "{net} {next}").map_err(|e| Error::io("merge_next_hops", &path, e))?;
        }
    }
    Ok(())
}

/* ---------- directed probing / dependent prefixes ---------- */

/// Regex matching any AS path containing one of the given ASes, in the
/// external reader's `-A` filter syntax.
fn as_path_regex(ases: &[Asn]) -> String {
    format!("(^|[^0-9]+)({})([^0-9]+|$)", ases.iter().join("|"))
}

/// Parse the RIBs of all collectors filtered on one AS of interest, and
/// record for each prefix the bitmask of the collectors that saw it.
/// Prefixes seen by every collector are *dependent* (`d`), the rest are
/// up/down (`u/d`).
pub fn parse_ribs_dependent(
    as_interest: Asn,
    collectors_file: &Path,
    output_file: &Path,
    break_prefix: bool,
    start: &str,
    end: &str,
) -> Result<()> {
    let mut collectors = read_collectors_file(collectors_file)?;
    collectors.sort();
    if collectors.len() > 64 {
        return Err(Error::missing(
            "parse_ribs_dependent",
            "cannot handle more than 64 collectors",
        ));
    }
    let collector_index: HashMap<&str, usize> = collectors
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let seen_by: Mutex<BTreeMap<Ipv4Net, u64>> = Mutex::new(BTreeMap::new());
    let filter = as_path_regex(&[as_interest]);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(32)
        .build()
        .map_err(|e| Error::missing("parse_ribs_dependent", e.to_string()))?;
    pool.install(|| {
        collectors.par_iter().for_each(|collector| {
            let index = collector_index[collector.as_str()];
            let run = || -> Result<()> {
                let extra = vec!["-A".to_owned(), filter.clone()];
                let (child, mut reader) = spawn_bgp_reader(collector, start, end, &extra)?;
                let mut memory: HashSet<Ipv4Net> = HashSet::new();
                let parsed = (|| -> Result<()> {
                    for line in (&mut reader).lines() {
                        let line =
                            line.map_err(|e| Error::io("parse_ribs_dependent", collector, e))?;
                        let fields: Vec<&str> = line.split('|').collect();
                        if fields.len() < 10 || fields[1] != "R" {
                            continue;
                        }
                        let Some(net) = prefix::validate(fields[9]) else {
                            continue;
                        };
                        if !memory.insert(net) {
                            continue;
                        }
                        let target_len = if break_prefix { 24 } else { net.prefix_len() };
                        let mut seen = seen_by.lock().unwrap();
                        for subnet in prefix::subnets(net, target_len) {
                            *seen.entry(subnet).or_insert(0) |= 1 << index;
                            memory.insert(subnet);
                        }
                    }
                    Ok(())
                })();
                wait_bgp_reader(child, collector)?;
                parsed
            };
            if let Err(e) = run() {
                log::error!("{e}");
            }
        });
    });

    log::info!("Writing to file");
    let file =
        fs::File::create(output_file).map_err(|e| Error::io("parse_ribs_dependent", output_file, e))?;
    let mut writer = std::io::BufWriter::new(file);
    let full = collectors.len() as u32;
    for (net, mask) in seen_by.lock().unwrap().iter() {
        let class = if mask.count_ones() == full { "d" } else { "u/d" };
        writeln!(writer, "{net} {class} {mask:b}")
            .map_err(|e| Error::io("parse_ribs_dependent", output_file, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn as_path_filter_regex() {
        assert_eq!(as_path_regex(&[701, 3549]), "(^|[^0-9]+)(701|3549)([^0-9]+|$)");
    }

    #[test]
    fn dependent_classification_uses_the_full_mask() {
        // two collectors: a prefix seen by both is dependent
        let full: u64 = 0b11;
        let partial: u64 = 0b10;
        assert_eq!(full.count_ones(), 2);
        assert_ne!(partial.count_ones(), 2);
    }
}
