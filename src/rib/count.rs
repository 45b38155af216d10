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
//! Per-collector prefix counting, used to sort out which collectors
//! carry a full table (more than ~800k entries).

use std::{
    collections::HashSet,
    fs,
    io::{BufRead, Write},
    path::Path,
};

use ipnet::Ipv4Net;
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    prefix,
    readers::read_collectors_file,
};

use super::{spawn_bgp_reader, wait_bgp_reader};

fn count_collector(collector: &str, start: &str, end: &str) -> Result<usize> {
    let (child, mut reader) = spawn_bgp_reader(collector, start, end, &[])?;
    let mut seen: HashSet<Ipv4Net> = HashSet::new();
    // consume the stream fully before waiting, so a parse failure never
    // leaves the reader process behind
    let parsed = (|| -> Result<()> {
        for line in (&mut reader).lines() {
            let line = line.map_err(|e| Error::io("count_collector", collector, e))?;
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 10 || fields[1] != "R" {
                continue;
            }
            if let Some(net) = prefix::validate(fields[9]) {
                seen.insert(net);
            }
        }
        Ok(())
    })();
    wait_bgp_reader(child, collector)?;
    parsed?;
    Ok(seen.len())
}

/// Count the distinct valid prefixes of every collector's table and
/// write `<collector> <count>` lines.
pub fn count_ribs(
    output_file: &Path,
    collectors_file: &Path,
    start: &str,
    end: &str,
) -> Result<()> {
    let collectors = read_collectors_file(collectors_file)?;
    log::info!("Counting the tables of {} collectors...", collectors.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(32)
        .build()
        .map_err(|e| Error::missing("count_ribs", e.to_string()))?;
    let mut counts: Vec<(String, usize)> = pool.install(|| {
        collectors
            .par_iter()
            .filter_map(|collector| match count_collector(collector, start, end) {
                Ok(count) => Some((collector.clone(), count)),
                Err(e) => {
                    log::error!("{e}");
                    None
                }
            })
            .collect()
    });
    counts.sort();

    log::info!("Number of elements: {}", counts.len());
    let file =
        fs::File::create(output_file).map_err(|e| Error::io("count_ribs", output_file, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for (collector, count) in counts {
        writeln!(writer, "{collector} {count}")
            .map_err(|e| Error::io("count_ribs", output_file, e))?;
    }
    Ok(())
}
