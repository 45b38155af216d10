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
//! Greedy scheduling: stay on an AS while its probes keep discovering,
//! hop to the next one at the first useless probe, and come back on the
//! next iteration. The internals (position 0) are never abandoned early.

use std::path::Path;

use crate::{error::Result, Asn};

use super::{
    build_status, next_probe, prepare, process_trace, Discovery, DiscoveryLog, SimData,
};

pub fn run(
    sim: &SimData,
    as_interest: Asn,
    strategy_dir: &Path,
    output_file: &Path,
    threshold: f64,
) -> Result<()> {
    let session = prepare(sim, as_interest, strategy_dir)?;
    let (truth, targets) = (session.truth, session.targets);
    let mut status = build_status(&session.limits);

    let mut disc = Discovery::default();
    let mut log = DiscoveryLog::default();
    let mut counter = 0usize;
    let mut stopped_ases = 0usize;

    while stopped_ases != status.len() {
        for as_status in status.iter_mut() {
            let mut keep_going = true;
            while keep_going {
                let Some(destination) = next_probe(as_status, &targets, &mut stopped_ases)
                else {
                    break;
                };
                process_trace(sim.data.traces.get(&destination), as_interest, &mut disc);

                if log.observe(counter, &disc, &truth) {
                    as_status.plateau = 0;
                } else {
                    if as_status.position != 0 {
                        // a useless probe hands over to the next AS;
                        // the internals keep going regardless
                        keep_going = false;
                    }
                    as_status.plateau += 1;
                    let span = (as_status.end - as_status.start) as f64;
                    if as_status.plateau as f64 / span > threshold {
                        if !as_status.stopped {
                            as_status.stopped = true;
                            stopped_ases += 1;
                        }
                        break;
                    }
                }
                counter += 1;
            }
        }
    }

    log.write_sorted(output_file)
}
