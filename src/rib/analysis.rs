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
//! Post-processing of the RIB parsing results: building the
//! best-path directed probes, merging and analysing overlays, and the
//! tier-1 composition of AS paths.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use rayon::prelude::*;

use crate::{
    caida::read_tier1s,
    error::{Error, Result},
    overlays,
    readers::{open_input, read_ases_file, read_collectors_file, read_newline_delimited,
        read_overlay_file},
    Asn,
};

use super::{spawn_bgp_reader, wait_bgp_reader, write_overlay_groups};

/* ---------- directed probes ---------- */

/// Build one directed-prefix file per AS of interest out of the saved
/// next-hop-AS tables (`<prefix> <as_interest> <next_AS>`): every prefix
/// whose best-selected path crosses the AS.
pub fn build_best_directed_probes(
    outdir: &Path,
    ases_file: &Path,
    collectors_file: &Path,
    datadir: &Path,
) -> Result<()> {
    let collectors = read_collectors_file(collectors_file)?;
    let ases_interest = read_ases_file(ases_file)?;

    let mut as_targets: BTreeMap<Asn, BTreeSet<Ipv4Net>> =
        ases_interest.iter().map(|&a| (a, BTreeSet::new())).collect();
    for collector in &collectors {
        let path = datadir.join(format!(
            "next-hop_AS/{collector}/next_hop_AS_{collector}.txt"
        ));
        let reader = open_input(&path)?;
        for line in reader.lines() {
            let line = line.map_err(|e| Error::io("build_best_directed_probes", &path, e))?;
            let mut fields = line.split_whitespace();
            let (Some(prefix), Some(interest)) = (fields.next(), fields.next()) else {
                continue;
            };
            let (Ok(prefix), Ok(interest)) = (prefix.parse::<Ipv4Net>(), interest.parse::<Asn>())
            else {
                continue;
            };
            if let Some(targets) = as_targets.get_mut(&interest) {
                targets.insert(prefix);
            }
        }
    }

    for (asn, targets) in as_targets {
        let path = outdir.join(format!("directed_prefixes_{asn}.txt"));
        let file = fs::File::create(&path)
            .map_err(|e| Error::io("build_best_directed_probes", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        for target in targets {
            writeln!(writer, "{target}")
                .map_err(|e| Error::io("build_best_directed_probes", &path, e))?;
        }
    }
    Ok(())
}

/* ---------- overlays ---------- */

/// Merge the per-collector overlay files of `<dir>/overlays/` into
/// `all_overlays.txt` by re-closing the union of all their edges.
pub fn merge_overlays(dir: &Path) -> Result<()> {
    let overlay_dir = dir.join("overlays");
    let mut files: Vec<PathBuf> = match fs::read_dir(&overlay_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("overlays_"))
            })
            .collect(),
        // a run without any overlay output is not an error
        Err(_) => return Ok(()),
    };
    files.sort();

    let mut edges: Vec<(Ipv4Net, Ipv4Net)> = Vec::new();
    for path in files {
        let reader = open_input(&path)?;
        for line in reader.lines() {
            let line = line.map_err(|e| Error::io("merge_overlays", &path, e))?;
            let mut members = line.split_whitespace().filter_map(|t| t.parse::<Ipv4Net>().ok());
            let Some(representative) = members.next() else {
                continue;
            };
            for member in members {
                edges.push((representative, member));
            }
        }
    }
    write_overlay_groups(&overlay_dir.join("all_overlays.txt"), &overlays::closure(edges))
}

/// Per overlay file: how many groups survive with `vp_count` vantage
/// points, and how many prefixes the groups contain in total.
fn overlay_reduction(overlay_file: &Path, vp_count: usize) -> Result<(usize, usize)> {
    let reader = open_input(overlay_file)?;
    let mut kept = 0usize;
    let mut total = 0usize;
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("analyse_overlay", overlay_file, e))?;
        let members = line.split_whitespace().count();
        total += members;
        kept += vp_count.min(members);
    }
    Ok((kept, total))
}

fn count_lines(path: &Path) -> Result<usize> {
    let reader = open_input(path)?;
    Ok(reader.lines().count())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_deviation(values: &[f64]) -> f64 {
    let m = mean(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    mean(&deviations)
}

/// Mean reduction of the forwarding tables their own overlays allow.
pub fn analyse_overlays(forwarding_tables: &[PathBuf]) -> Result<()> {
    let mut reductions = Vec::with_capacity(forwarding_tables.len());
    for table in forwarding_tables {
        let collector = table
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::missing("analyse_overlays", "bad forwarding table path"))?;
        let overlay_file = table
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| Error::missing("analyse_overlays", "bad forwarding table path"))?
            .join(format!("overlays/overlays_{collector}"));

        let (kept, total) = overlay_reduction(&overlay_file, 1)?;
        let entries = count_lines(table)?;
        let new_targets = entries - total + kept;
        reductions.push(new_targets as f64 / entries as f64);
    }
    log::info!("Mean reduction: {}", mean(&reductions));
    log::info!("Deviation: {}", mean_deviation(&reductions));
    Ok(())
}

/// Same analysis against the merged overlay file.
pub fn analyse_merged_overlays(
    all_overlays_file: &Path,
    forwarding_tables: &[PathBuf],
) -> Result<()> {
    let (kept, total) = overlay_reduction(all_overlays_file, 1)?;
    let mut reductions = Vec::with_capacity(forwarding_tables.len());
    for table in forwarding_tables {
        let entries = count_lines(table)?;
        let new_targets = entries - total.min(entries) + kept;
        reductions.push(new_targets as f64 / entries as f64);
    }
    log::info!("Mean reduction: {}", mean(&reductions));
    log::info!("Deviation: {}", mean_deviation(&reductions));
    Ok(())
}

/// Theoretical reduction when each overlay group is spread over a
/// growing number of vantage points.
pub fn analyse_overlays_repartition_vp(
    overlay_file: &Path,
    forwarding_table: &Path,
) -> Result<()> {
    let entries = count_lines(forwarding_table)?;
    let mut reductions = Vec::with_capacity(24);
    for vp_count in 1..25 {
        let (kept, total) = overlay_reduction(overlay_file, vp_count)?;
        reductions.push(entries - total.min(entries) + kept);
    }
    log::info!("The reductions: {reductions:?}");
    Ok(())
}

/// For each AS of interest, the overlay groups restricted to its
/// directed prefixes (`overlays_<AS>.txt`, same format as the merged
/// file).
pub fn build_overlays_per_as(
    ases_file: &Path,
    all_overlays_file: &Path,
    directed_prefixes_dir: &Path,
    outdir: &Path,
) -> Result<()> {
    let ases = read_ases_file(ases_file)?;
    let groups = read_overlay_file(all_overlays_file)?;

    for asn in ases {
        let prefixes_file = directed_prefixes_dir.join(format!("directed_prefixes_{asn}.txt"));
        let directed = read_newline_delimited(&prefixes_file, 0)?;

        let path = outdir.join(format!("overlays_{asn}.txt"));
        let file = fs::File::create(&path).map_err(|e| Error::io("build_overlays_per_AS", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        for token in directed {
            let Ok(net) = token.parse::<Ipv4Net>() else {
                continue;
            };
            match groups.get(&net) {
                Some(group) => writeln!(
                    writer,
                    "{net} {}",
                    group.iter().filter(|m| **m != net).sorted().join(" ")
                ),
                None => writeln!(writer, "{net}"),
            }
            .map_err(|e| Error::io("build_overlays_per_AS", &path, e))?;
        }
    }
    Ok(())
}

/* ---------- tier-1 composition of paths ---------- */

/// Whether the origin-side hop, and the one before it, are tier-1 ASes.
fn analyse_as_path(path: &[Asn], tier1s: &HashSet<Asn>) -> Option<(bool, bool)> {
    if path.len() < 2 {
        return None;
    }
    let last = path[path.len() - 1];
    let before_last = path[path.len() - 2];
    let last_t1 = tier1s.contains(&last);
    Some((last_t1, last_t1 && tier1s.contains(&before_last)))
}

/// Count, per collector, the RIB paths ending on one (and two
/// consecutive) tier-1 ASes.
pub fn analyse_ribs(
    output_file: &Path,
    collectors_file: &Path,
    rel_file: &Path,
    start: &str,
    end: &str,
) -> Result<()> {
    log::info!("Reading AS relationships...");
    let tier1s = read_tier1s(rel_file)?;
    let collectors = read_collectors_file(collectors_file)?;

    log::info!("Reading RIBs...");
    let results: Vec<(String, usize, usize)> = collectors
        .par_iter()
        .filter_map(|collector| {
            let run = || -> Result<(String, usize, usize)> {
                let (child, mut reader) = spawn_bgp_reader(collector, start, end, &[])?;
                let mut nb_path = 0usize;
                let mut nb_entries = 0usize;
                let parsed = (|| -> Result<()> {
                    for line in (&mut reader).lines() {
                        let line =
                            line.map_err(|e| Error::io("analyse_ribs", collector, e))?;
                        let fields: Vec<&str> = line.split('|').collect();
                        if fields.len() < 13 || fields[1] != "R" {
                            continue;
                        }
                        if crate::prefix::validate(fields[9]).is_none() {
                            continue;
                        }
                        let path: Vec<Asn> = fields[11]
                            .split_whitespace()
                            .filter_map(|t| t.parse().ok())
                            .collect();
                        if let Some((last, before_last)) = analyse_as_path(&path, &tier1s) {
                            nb_path += usize::from(last);
                            nb_entries += usize::from(before_last);
                        }
                    }
                    Ok(())
                })();
                wait_bgp_reader(child, collector)?;
                parsed?;
                Ok((collector.clone(), nb_path, nb_entries))
            };
            match run() {
                Ok(result) => Some(result),
                Err(e) => {
                    log::error!("{e}");
                    None
                }
            }
        })
        .collect();

    let file =
        fs::File::create(output_file).map_err(|e| Error::io("analyse_ribs", output_file, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for (collector, nb_path, nb_entries) in results {
        writeln!(writer, "{collector} {nb_path} {nb_entries}")
            .map_err(|e| Error::io("analyse_ribs", output_file, e))?;
    }
    Ok(())
}

/// Same analysis over the saved forwarding tables. A collector without a
/// table is skipped.
pub fn analyse_fibs(
    data_dir: &Path,
    collectors_file: &Path,
    rel_file: &Path,
    output_file: &Path,
) -> Result<()> {
    log::info!("Reading AS relationships...");
    let tier1s = read_tier1s(rel_file)?;
    let collectors = read_collectors_file(collectors_file)?;

    let file =
        fs::File::create(output_file).map_err(|e| Error::io("analyse_fibs", output_file, e))?;
    let mut writer = std::io::BufWriter::new(file);
    let mut ratios = Vec::with_capacity(collectors.len());
    for collector in collectors {
        let table = data_dir.join(format!("{collector}.txt"));
        let Ok(reader) = open_input(&table) else {
            continue;
        };
        let mut nb_path = 0usize;
        let mut nb_entries = 0usize;
        for line in reader.lines() {
            let line = line.map_err(|e| Error::io("analyse_fibs", &table, e))?;
            // first token is the prefix, not part of the path
            let path: Vec<Asn> = line
                .split_whitespace()
                .skip(1)
                .filter_map(|t| t.parse().ok())
                .collect();
            if let Some((last, before_last)) = analyse_as_path(&path, &tier1s) {
                nb_path += usize::from(last);
                nb_entries += usize::from(before_last);
            }
        }
        writeln!(writer, "{collector} {nb_path} {nb_entries}")
            .map_err(|e| Error::io("analyse_fibs", output_file, e))?;
        if nb_path > 0 {
            ratios.push(nb_entries as f64 / nb_path as f64);
        }
    }
    if !ratios.is_empty() {
        log::info!("Mean: {}", mean(&ratios));
        log::info!("Deviation: {}", mean_deviation(&ratios));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tier1_composition_of_paths() {
        let tier1s: HashSet<Asn> = [174, 3356].into_iter().collect();
        // too short
        assert_eq!(analyse_as_path(&[174], &tier1s), None);
        // origin is a tier-1, the hop before it is not
        assert_eq!(analyse_as_path(&[5511, 1299, 174], &tier1s), Some((true, false)));
        // two consecutive tier-1s at the origin side
        assert_eq!(analyse_as_path(&[5511, 3356, 174], &tier1s), Some((true, true)));
        // no tier-1 at the origin
        assert_eq!(analyse_as_path(&[174, 3356, 5511], &tier1s), Some((false, false)));
    }

    #[test]
    fn reduction_counts_per_group() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("anaximander_overlay_red_{}", std::process::id()));
        std::fs::write(&path, "1.0.0.0/22 1.0.0.0/24 1.0.1.0/24\n2.0.0.0/24 2.0.1.0/24\n")
            .unwrap();
        // one VP: one probe kept per group
        assert_eq!(overlay_reduction(&path, 1).unwrap(), (2, 5));
        // two VPs: up to two probes kept per group
        assert_eq!(overlay_reduction(&path, 2).unwrap(), (4, 5));
        std::fs::remove_file(path).ok();
    }
}
