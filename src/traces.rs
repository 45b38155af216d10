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
//! Recorded traceroutes: decoding the external reader's text output,
//! sanitizing traces, and accumulating the ground-truth sets replayed by
//! the simulator.

use std::{
    collections::{HashMap, HashSet},
    io::{BufRead, BufReader, Read, Write},
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;

use crate::{
    annotation::Annotations,
    error::{Error, Result},
    prefix, Asn,
};

/// Decoder turning binary traceroute captures into text sections.
const TRACE_DECODER: &str = "sc_tnt";

lazy_static! {
    static ref RE_SOURCE_DEST: Regex = Regex::new(
        r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\s*to\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})"
    )
    .unwrap();
}

/// One responding hop of a trace, annotated with its AS and router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub addr: Ipv4Addr,
    pub asn: Asn,
    pub probe_ttl: u32,
    /// First hop inside its AS along the trace.
    pub ingress: bool,
    /// Last hop inside its AS along the trace.
    pub egress: bool,
    pub router: Option<String>,
}

pub type Trace = Vec<Hop>;

/// Everything extracted from a traceroute dataset.
#[derive(Debug, Default)]
pub struct TraceData {
    /// Destination `/24` to its recorded trace.
    pub traces: HashMap<Ipv4Net, Trace>,
    /// Consecutive-hop links (probe-TTL distance exactly 1).
    pub adjs: HashSet<(Ipv4Addr, Ipv4Addr)>,
    /// Links spanning unresponsive hops (probe-TTL distance > 1).
    pub multi_adjs: HashSet<(Ipv4Addr, Ipv4Addr)>,
    /// All routable addresses seen in the traces.
    pub addresses: HashSet<Ipv4Addr>,
    /// Destination `/24` to the source address of its vantage point.
    pub target_to_vp: HashMap<Ipv4Net, String>,
}

/// Lookup of the vantage point that probed a target: a real per-target
/// map when a dataset is loaded, or one synthetic VP covering everything
/// when the strategy runs without traces.
#[derive(Debug, Clone)]
pub enum TargetVps {
    Fixed(String),
    PerTarget(HashMap<Ipv4Net, String>),
}

impl TargetVps {
    pub fn get(&self, target: Ipv4Net) -> Option<&str> {
        match self {
            Self::Fixed(vp) => Some(vp),
            Self::PerTarget(map) => map.get(&target).map(String::as_str),
        }
    }
}

impl TraceData {
    fn merge(&mut self, other: TraceData) {
        self.traces.extend(other.traces);
        self.adjs.extend(other.adjs);
        self.multi_adjs.extend(other.multi_adjs);
        self.addresses.extend(other.addresses);
        self.target_to_vp.extend(other.target_to_vp);
    }
}

/// Drop consecutive duplicate addresses from a trace.
fn prune_dups(trace: Trace) -> Trace {
    let mut pruned: Trace = Vec::with_capacity(trace.len());
    for hop in trace {
        if pruned.last().map(|prev: &Hop| prev.addr) != Some(hop.addr) {
            pruned.push(hop);
        }
    }
    pruned
}

/// Sanitize a finished trace and fold it into the accumulated data:
/// record its adjacencies, mark the AS borders, and key the trace by the
/// `/24` of its destination.
fn commit_trace(source: &str, dest: Ipv4Addr, trace: Trace, out: &mut TraceData) {
    let mut trace = prune_dups(trace);
    for i in 0..trace.len().saturating_sub(1) {
        let (addr, ttl, asn) = (trace[i].addr, trace[i].probe_ttl, trace[i].asn);
        let (next_addr, next_ttl, next_asn) =
            (trace[i + 1].addr, trace[i + 1].probe_ttl, trace[i + 1].asn);
        let distance = next_ttl.saturating_sub(ttl);
        if distance == 1 {
            out.adjs.insert((addr, next_addr));
        } else if distance > 1 {
            out.multi_adjs.insert((addr, next_addr));
        }
        if asn != next_asn {
            trace[i].egress = true;
            trace[i + 1].ingress = true;
        }
    }
    let dest_24 = prefix::net_24_of(dest);
    out.traces.insert(dest_24, trace);
    out.target_to_vp.insert(dest_24, source.to_owned());
}

/// Parse the text output of the traceroute decoder: sections separated by
/// blank lines, each introduced by a `... from <src> to <dst>` header and
/// followed by `<ttl> <addr> ...` hop lines. Unresponsive (`*`), reserved
/// (`rsvd`) and destination addresses are dropped.
pub fn parse_decoder_output(reader: impl BufRead, annotations: &Annotations) -> Result<TraceData> {
    let mut out = TraceData::default();
    let mut source = String::new();
    let mut dest: Option<Ipv4Addr> = None;
    let mut trace: Trace = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("parse_traces", "<decoder>", e))?;
        if line.contains('#') || line.contains("DUMP") {
            continue;
        }
        if line.is_empty() {
            if let Some(dest) = dest.take() {
                commit_trace(&source, dest, std::mem::take(&mut trace), &mut out);
            }
            continue;
        }
        if line.contains("from") {
            if let Some(captures) = RE_SOURCE_DEST.captures(&line) {
                source = captures[1].to_owned();
                dest = captures[2].parse().ok();
                trace = Vec::with_capacity(16);
            }
            continue;
        }
        if dest.is_none() || line.contains("rsvd") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(ttl), Some(addr)) = (fields.next(), fields.next()) else {
            continue;
        };
        if addr == "*" {
            continue;
        }
        let (Ok(probe_ttl), Ok(addr)) = (ttl.parse::<u32>(), addr.parse::<Ipv4Addr>()) else {
            log::debug!("skipping malformed hop line: {line}");
            continue;
        };
        if Some(addr) == dest {
            continue;
        }
        out.addresses.insert(addr);
        trace.push(Hop {
            addr,
            asn: annotations.asn_of(addr),
            probe_ttl,
            ingress: false,
            egress: false,
            router: annotations.router_of(addr).map(str::to_owned),
        });
    }
    if let Some(dest) = dest {
        commit_trace(&source, dest, trace, &mut out);
    }
    Ok(out)
}

/// Run the decoder over one capture file and parse its output. The
/// decoder process and the parser run concurrently; the child is always
/// waited on, even when parsing fails.
fn read_trace_file(path: &Path, annotations: &Annotations) -> Result<TraceData> {
    let gz = path.to_string_lossy().ends_with(".gz");
    let mut command = Command::new(TRACE_DECODER);
    command.arg("-d2").stdout(Stdio::piped());
    if gz {
        command.stdin(Stdio::piped());
    } else {
        command.arg(path);
    }
    let mut child = command.spawn().map_err(|e| Error::Subprocess {
        context: "read_trace_file",
        command: TRACE_DECODER.into(),
        message: e.to_string(),
    })?;

    // feed decompressed bytes on stdin while we consume stdout
    let feeder = if gz {
        let mut stdin = child.stdin.take().expect("stdin was piped");
        let path = path.to_path_buf();
        Some(std::thread::spawn(move || {
            let Ok(file) = std::fs::File::open(&path) else {
                return;
            };
            let mut decoder = flate2::read::GzDecoder::new(file);
            let mut buf = [0u8; 1 << 16];
            while let Ok(n) = decoder.read(&mut buf) {
                if n == 0 || stdin.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        }))
    } else {
        None
    };

    let stdout = child.stdout.take().expect("stdout was piped");
    let parsed = parse_decoder_output(BufReader::new(stdout), annotations);
    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }
    let status = child.wait().map_err(|e| Error::Subprocess {
        context: "read_trace_file",
        command: TRACE_DECODER.into(),
        message: e.to_string(),
    })?;
    if !status.success() {
        return Err(Error::Subprocess {
            context: "read_trace_file",
            command: format!("{TRACE_DECODER} {}", path.display()),
            message: status.to_string(),
        });
    }
    parsed
}

/// Decode every capture in a directory (32-way parallel) and merge the
/// per-file results.
pub fn read_trace_directory(dir: &Path, annotations: &Annotations) -> Result<TraceData> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| Error::io("read_trace_directory", dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(32)
        .build()
        .map_err(|e| Error::missing("read_trace_directory", e.to_string()))?;
    let partials: Vec<TraceData> = pool.install(|| {
        files
            .par_iter()
            .filter_map(|path| match read_trace_file(path, annotations) {
                Ok(data) => Some(data),
                Err(e) => {
                    log::warn!("{e}");
                    None
                }
            })
            .collect()
    });

    let mut merged = TraceData::default();
    for partial in partials {
        merged.merge(partial);
    }
    log::info!(" ---- Trace stats ---- ");
    log::info!("Number of traces: {}", merged.traces.len());
    log::info!("Number of adjs: {}", merged.adjs.len());
    log::info!("Number of multi_adjs: {}", merged.multi_adjs.len());
    log::info!(
        "Number of addresses (excluding private addresses): {}",
        merged.addresses.len()
    );
    Ok(merged)
}

#[cfg(test)]
mod test {
    use super::*;

    fn annotations() -> Annotations {
        let mut a = Annotations::default();
        for (addr, asn, router) in [
            ("10.0.0.1", 174, Some("N1")),
            ("10.0.0.2", 174, Some("N1")),
            ("10.0.1.1", 3356, None),
            ("10.0.2.1", 3356, None),
        ] {
            let addr: Ipv4Addr = addr.parse().unwrap();
            a.addr_to_asn.insert(addr, asn);
            a.addr_to_router.insert(addr, router.map(str::to_owned));
            if let Some(router) = router {
                a.router_to_asn.insert(router.to_owned(), asn);
            }
        }
        a
    }

    const DECODER_OUTPUT: &str = "\
# comment
trace [tnt] from 192.0.10.1 to 10.0.2.77
1 10.0.0.1 1.2ms
2 10.0.0.1 1.3ms
3 *
4 10.0.1.1 8.1ms
5 10.0.2.77 9.0ms

trace [tnt] from 192.0.10.1 to 10.0.3.1
1 10.0.0.2 1.0ms
2 10.0.2.1 2.0ms
";

    #[test]
    fn parses_sections_and_adjacencies() {
        let data = parse_decoder_output(DECODER_OUTPUT.as_bytes(), &annotations()).unwrap();

        // duplicate hop pruned, `*` skipped, destination dropped
        let t1: Ipv4Net = "10.0.2.0/24".parse().unwrap();
        assert_eq!(data.traces[&t1].len(), 2);
        assert_eq!(data.traces[&t1][0].addr, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        // TTL gap of 3 between the surviving hops: a multi-hop link
        assert!(data
            .multi_adjs
            .contains(&("10.0.0.1".parse().unwrap(), "10.0.1.1".parse().unwrap())));
        assert_eq!(data.adjs.len(), 1);

        // AS border marked on both sides
        assert!(data.traces[&t1][0].egress);
        assert!(data.traces[&t1][1].ingress);

        // second trace, committed at EOF, has a plain adjacency
        let t2: Ipv4Net = "10.0.3.0/24".parse().unwrap();
        assert!(data
            .adjs
            .contains(&("10.0.0.2".parse().unwrap(), "10.0.2.1".parse().unwrap())));
        assert_eq!(data.target_to_vp[&t2], "192.0.10.1");

        // destination address never enters the address set
        assert!(!data.addresses.contains(&"10.0.2.77".parse::<Ipv4Addr>().unwrap()));
        assert_eq!(data.addresses.len(), 4);
    }
}
