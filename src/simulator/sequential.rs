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
//! Sequential scheduling: probe one AS after the other, giving up on an
//! AS once the run of useless probes exceeds the plateau threshold.

use std::{collections::HashMap, fs, io::Write, path::Path};

use ipnet::Ipv4Net;

use crate::{
    error::{Error, Result},
    stats, Asn,
};

use super::{prepare, process_trace, Discovery, DiscoveryLog, SimData};

pub fn run(
    sim: &SimData,
    as_interest: Asn,
    strategy_dir: &Path,
    output_file: &Path,
    threshold: f64,
    record_successful_traces: bool,
) -> Result<()> {
    let session = prepare(sim, as_interest, strategy_dir)?;
    let (truth, targets, limits) = (session.truth, session.targets, session.limits);

    let mut disc = Discovery::default();
    let mut log = DiscoveryLog::default();
    let mut successful_traces: HashMap<Ipv4Net, usize> = HashMap::new();
    let mut counter = 0usize;
    let mut missing_traces = 0usize;
    let mut false_positives = 0usize;

    // per-AS lengths actually probed, written as cumulative boundaries
    let mut truncated_limits: Vec<usize> = Vec::with_capacity(limits.len());
    let mut total_length = 0usize;

    let mut start = 0usize;
    for boundary in &limits {
        let stop = boundary.limit;
        if stop == start {
            continue;
        }
        let mut plateau = 0usize;
        let mut halt = false;
        let mut k = start;
        while k < stop {
            let destination = targets[k];
            let trace = sim.data.traces.get(&destination);
            if trace.is_none() {
                // treated as a probe that discovered nothing
                missing_traces += 1;
            }
            let discovery = process_trace(trace, as_interest, &mut disc);
            if discovery != 0 {
                successful_traces.insert(destination, discovery);
            } else {
                false_positives += 1;
            }

            if log.observe(counter, &disc, &truth) {
                plateau = 0;
            } else {
                plateau += 1;
                if plateau as f64 / (stop - start) as f64 > threshold {
                    halt = true;
                }
            }
            counter += 1;
            k += 1;
            if halt {
                break;
            }
        }
        total_length += k - start;
        truncated_limits.push(total_length);
        start = stop;
    }

    let reduction_path = format!(
        "{}_limits_reduction.txt",
        output_file.to_string_lossy().trim_end_matches(".txt")
    );
    let file = fs::File::create(&reduction_path)
        .map_err(|e| Error::io("anaximander_sequential", &reduction_path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    write!(writer, "{as_interest} ")
        .map_err(|e| Error::io("anaximander_sequential", &reduction_path, e))?;
    for length in &truncated_limits {
        write!(writer, "{length} ")
            .map_err(|e| Error::io("anaximander_sequential", &reduction_path, e))?;
    }
    writeln!(writer).map_err(|e| Error::io("anaximander_sequential", &reduction_path, e))?;
    drop(writer);

    log.write_sorted(output_file)?;

    if record_successful_traces {
        let dir = output_file.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join(format!("successful_traces_{as_interest}.txt"));
        let file = fs::File::create(&path)
            .map_err(|e| Error::io("anaximander_sequential", &path, e))?;
        let mut writer = std::io::BufWriter::new(file);
        let mut entries: Vec<(&Ipv4Net, &usize)> = successful_traces.iter().collect();
        entries.sort();
        for (destination, discovery) in entries {
            writeln!(writer, "{destination} {discovery}")
                .map_err(|e| Error::io("anaximander_sequential", &path, e))?;
        }
    }

    stats::emit(format_args!("missing_traces.txt {as_interest} {missing_traces}"));
    stats::emit(format_args!("false_positives.txt {as_interest} {false_positives}"));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::{build_status, test::hop, GroundTruth};
    use super::*;
    use crate::strategy::AsLimit;
    use crate::traces::Trace;

    /// Replays the inner loop of the scheduler over synthetic targets.
    fn simulate(
        traces: &HashMap<Ipv4Net, Trace>,
        truth: &GroundTruth,
        targets: &[Ipv4Net],
        limits: &[AsLimit],
        as_interest: Asn,
        threshold: f64,
    ) -> (Vec<usize>, usize) {
        let mut disc = Discovery::default();
        let mut log = DiscoveryLog::default();
        let mut counter = 0usize;
        let mut stopped = 0usize;
        let mut probed = Vec::new();

        let status = build_status(limits);
        for as_status in status {
            let (start, stop) = (as_status.start, as_status.end);
            let mut plateau = 0usize;
            let mut halt = false;
            let mut k = start;
            while k < stop {
                let discovery = process_trace(traces.get(&targets[k]), as_interest, &mut disc);
                let _ = discovery;
                if log.observe(counter, &disc, truth) {
                    plateau = 0;
                } else {
                    plateau += 1;
                    if plateau as f64 / (stop - start) as f64 > threshold {
                        halt = true;
                    }
                }
                counter += 1;
                k += 1;
                if halt {
                    break;
                }
            }
            if halt || k == stop {
                stopped += 1;
            }
            probed.push(k - start);
        }
        (probed, stopped)
    }

    #[test]
    fn plateau_breaks_to_the_next_as() {
        // 100 probes for AS 10, none of which discovers anything, then 1
        // probe for AS 20 that does
        let mut targets: Vec<Ipv4Net> = (0..100)
            .map(|i| format!("10.{}.{}.0/24", i / 256, i % 256).parse().unwrap())
            .collect();
        let productive: Ipv4Net = "20.0.0.0/24".parse().unwrap();
        targets.push(productive);
        let limits = vec![AsLimit { asn: 10, limit: 100 }, AsLimit { asn: 20, limit: 101 }];

        let mut traces = HashMap::new();
        traces.insert(productive, vec![hop("20.0.0.7", 99, 1, None)]);
        let mut truth = GroundTruth::default();
        truth.addresses.insert("20.0.0.7".parse().unwrap());

        let (probed, stopped) = simulate(&traces, &truth, &targets, &limits, 99, 0.1);
        // 10 consecutive useless probes push the plateau ratio over 0.1
        // at the 11th probe
        assert_eq!(probed[0], 11);
        assert_eq!(probed[1], 1);
        assert_eq!(stopped, 2);
    }

    #[test]
    fn discovery_resets_the_plateau() {
        let targets: Vec<Ipv4Net> = (0..4)
            .map(|i| format!("10.0.{i}.0/24").parse().unwrap())
            .collect();
        let limits = vec![AsLimit { asn: 10, limit: 4 }];

        // every other probe discovers a new address
        let mut traces = HashMap::new();
        let mut truth = GroundTruth::default();
        for i in [0usize, 2] {
            let addr = format!("10.9.{i}.1");
            traces.insert(targets[i], vec![hop(&addr, 10, 1, None)]);
            truth.addresses.insert(addr.parse().unwrap());
        }

        let (probed, _) = simulate(&traces, &truth, &targets, &limits, 10, 0.3);
        // the plateau never reaches 2 in a row before the end
        assert_eq!(probed[0], 4);
    }
}
