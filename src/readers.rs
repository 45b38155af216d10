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
//! Line-oriented readers for the various auxiliary input files, with
//! transparent gzip/bzip2 decompression.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    sync::Arc,
};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use ipnet::Ipv4Net;

use crate::{
    error::{Error, Result},
    Asn,
};

/// A prefix-keyed view of overlay groups: every member of a group maps to
/// the same shared group set.
pub type OverlayGroups = HashMap<Ipv4Net, Arc<HashSet<Ipv4Net>>>;

/// Open a file, decompressing `.gz` and `.bz2` based on the extension.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| Error::io("open_input", path, e))?;
    let name = path.to_string_lossy();
    if name.ends_with(".gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else if name.ends_with(".bz2") {
        Ok(Box::new(BufReader::new(BzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// The whitespace-separated tokens of the first line of a file.
pub fn read_whitespace_delimited(path: &Path) -> Result<Vec<String>> {
    let mut reader = open_input(path)?;
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| Error::io("read_whitespace_delimited", path, e))?;
    Ok(line.split_whitespace().map(str::to_owned).collect())
}

/// One selected field per line of a newline-delimited file.
pub fn read_newline_delimited(path: &Path, field: usize) -> Result<Vec<String>> {
    let reader = open_input(path)?;
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("read_newline_delimited", path, e))?;
        match line.split_whitespace().nth(field) {
            Some(token) => out.push(token.to_owned()),
            None if line.trim().is_empty() => continue,
            None => {
                return Err(Error::Parse {
                    context: "read_newline_delimited",
                    what: "field",
                    line,
                })
            }
        }
    }
    Ok(out)
}

/// The ASes of interest: a single whitespace-delimited line.
pub fn read_ases_file(path: &Path) -> Result<Vec<Asn>> {
    read_whitespace_delimited(path)?
        .iter()
        .map(|t| {
            t.parse().map_err(|_| Error::Parse {
                context: "read_ases_file",
                what: "ASN",
                line: t.clone(),
            })
        })
        .collect()
}

/// The collector names, one per line.
pub fn read_collectors_file(path: &Path) -> Result<Vec<String>> {
    read_newline_delimited(path, 0)
}

/// The source addresses of the vantage points.
/// File format: `<name> <source_ip> <AS>`.
pub fn read_vps_file(path: &Path) -> Result<Vec<String>> {
    read_newline_delimited(path, 1)
}

/// Read an overlay file (one group per line, members whitespace-separated)
/// into a per-prefix view. All members of a group share a single set, so
/// the map has one key per prefix but only one value per group.
pub fn read_overlay_file(path: &Path) -> Result<OverlayGroups> {
    let reader = open_input(path)?;
    let mut map = OverlayGroups::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("read_overlay_file", path, e))?;
        let members: HashSet<Ipv4Net> = line
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        if members.is_empty() {
            continue;
        }
        let group = Arc::new(members);
        for member in group.iter() {
            map.insert(*member, Arc::clone(&group));
        }
    }
    Ok(map)
}

/// Read a next-AS file (`<prefix> <next_AS>` per line) into both a
/// per-prefix and a per-AS view.
#[allow(clippy::type_complexity)]
pub fn read_next_as_file(
    path: &Path,
) -> Result<(HashMap<Ipv4Net, Asn>, HashMap<Asn, HashSet<Ipv4Net>>)> {
    let reader = open_input(path)?;
    let mut prefix_to_next = HashMap::new();
    let mut next_to_prefixes: HashMap<Asn, HashSet<Ipv4Net>> = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io("read_next_as_file", path, e))?;
        let mut fields = line.split_whitespace();
        let (Some(prefix), Some(next)) = (fields.next(), fields.next()) else {
            continue;
        };
        let (Ok(prefix), Ok(next)) = (prefix.parse::<Ipv4Net>(), next.parse::<Asn>()) else {
            log::warn!("skipping malformed next-AS line: {line}");
            continue;
        };
        prefix_to_next.insert(prefix, next);
        next_to_prefixes.entry(next).or_default().insert(prefix);
    }
    Ok((prefix_to_next, next_to_prefixes))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn tmp_file(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "anaximander_reader_test_{}_{:x}",
            std::process::id(),
            content.len() as u64 * 31 + content.bytes().map(u64::from).sum::<u64>()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn whitespace_and_newline_readers() {
        let path = tmp_file("174 3356 6453\n");
        assert_eq!(read_ases_file(&path).unwrap(), vec![174, 3356, 6453]);
        std::fs::remove_file(path).ok();

        let path = tmp_file("vp1 192.0.10.1 174\nvp2 192.0.10.2 3356\n");
        assert_eq!(read_vps_file(&path).unwrap(), vec!["192.0.10.1", "192.0.10.2"]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn overlay_file_shares_groups() {
        let path = tmp_file("1.0.0.0/22 1.0.0.0/24 1.0.1.0/24\n2.0.0.0/24 2.0.1.0/24\n");
        let map = read_overlay_file(&path).unwrap();
        std::fs::remove_file(path).ok();

        assert_eq!(map.len(), 5);
        let a: Ipv4Net = "1.0.0.0/24".parse().unwrap();
        let b: Ipv4Net = "1.0.1.0/24".parse().unwrap();
        assert!(Arc::ptr_eq(&map[&a], &map[&b]));
        assert_eq!(map[&a].len(), 3);
        assert_eq!(map[&"2.0.0.0/24".parse::<Ipv4Net>().unwrap()].len(), 2);
    }

    #[test]
    fn next_as_file_views() {
        let path = tmp_file("1.0.0.0/24 174\n1.0.1.0/24 174\n2.0.0.0/24 3356\n");
        let (by_prefix, by_next) = read_next_as_file(&path).unwrap();
        std::fs::remove_file(path).ok();

        assert_eq!(by_prefix[&"1.0.1.0/24".parse::<Ipv4Net>().unwrap()], 174);
        assert_eq!(by_next[&174].len(), 2);
        assert_eq!(by_next[&3356].len(), 1);
    }
}
