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
//! Reader for the address-annotation database: the per-address ASN and
//! router assignments produced by the alias-resolution toolchain.

use std::{collections::HashMap, net::Ipv4Addr, path::Path};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    Asn, UNATTRIBUTED,
};

/// One row of the annotation table. Older exports lack the last two
/// columns.
#[derive(Debug, Deserialize)]
struct AnnotationRow {
    addr: String,
    router: String,
    asn: Asn,
    #[allow(dead_code)]
    org: String,
    #[allow(dead_code)]
    conn_asn: Asn,
    #[allow(dead_code)]
    conn_org: String,
    #[allow(dead_code)]
    rtype: i64,
    #[allow(dead_code)]
    itype: i64,
    #[serde(default)]
    #[allow(dead_code)]
    prouter: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pasn: Option<Asn>,
}

/// The per-address annotations the simulator works with.
#[derive(Debug, Default)]
pub struct Annotations {
    pub addr_to_asn: HashMap<Ipv4Addr, Asn>,
    pub router_to_asn: HashMap<String, Asn>,
    /// `None` when the address was not matched to a router.
    pub addr_to_router: HashMap<Ipv4Addr, Option<String>>,
}

impl Annotations {
    /// Read the annotation table. An address whose `router` field parses
    /// as an IP address was not matched to a router by alias resolution.
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = crate::readers::open_input(path)?;
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut annotations = Self::default();
        let mut unattributed = 0usize;
        for row in csv.deserialize::<AnnotationRow>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    log::warn!("skipping malformed annotation row: {e}");
                    continue;
                }
            };
            let Ok(addr) = row.addr.parse::<Ipv4Addr>() else {
                log::warn!("skipping annotation row with bad address: {}", row.addr);
                continue;
            };
            annotations.addr_to_asn.insert(addr, row.asn);
            if row.router.parse::<Ipv4Addr>().is_ok() {
                // unmatched: the toolchain echoes the address itself
                annotations.addr_to_router.insert(addr, None);
            } else {
                annotations
                    .router_to_asn
                    .insert(row.router.clone(), row.asn);
                annotations.addr_to_router.insert(addr, Some(row.router));
            }
            if row.asn == UNATTRIBUTED {
                unattributed += 1;
            }
        }
        if annotations.addr_to_asn.is_empty() {
            return Err(Error::missing(
                "read_annotations",
                format!("no usable rows in {}", path.display()),
            ));
        }
        log::info!(
            "There are {unattributed} addresses for which an AS wasn't found."
        );
        Ok(annotations)
    }

    /// ASN of an address, `-1` when unannotated.
    pub fn asn_of(&self, addr: Ipv4Addr) -> Asn {
        self.addr_to_asn.get(&addr).copied().unwrap_or(UNATTRIBUTED)
    }

    /// Router identifier of an address, if it was matched to one.
    pub fn router_of(&self, addr: Ipv4Addr) -> Option<&str> {
        self.addr_to_router.get(&addr)?.as_deref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rows_split_matched_and_unmatched() {
        let data = "\
addr,router,asn,org,conn_asn,conn_org,rtype,itype
1.2.3.4,N1,174,Cogent,3356,Lumen,1,1
1.2.3.5,1.2.3.5,174,Cogent,3356,Lumen,1,1
1.2.3.6,N1,-1,?,0,?,0,0
";
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());
        let mut annotations = Annotations::default();
        for row in csv.deserialize::<AnnotationRow>() {
            let row = row.unwrap();
            let addr: Ipv4Addr = row.addr.parse().unwrap();
            annotations.addr_to_asn.insert(addr, row.asn);
            if row.router.parse::<Ipv4Addr>().is_ok() {
                annotations.addr_to_router.insert(addr, None);
            } else {
                annotations.router_to_asn.insert(row.router.clone(), row.asn);
                annotations.addr_to_router.insert(addr, Some(row.router));
            }
        }

        assert_eq!(annotations.asn_of("1.2.3.4".parse().unwrap()), 174);
        assert_eq!(annotations.router_of("1.2.3.4".parse().unwrap()), Some("N1"));
        assert_eq!(annotations.router_of("1.2.3.5".parse().unwrap()), None);
        assert_eq!(annotations.asn_of("9.9.9.9".parse().unwrap()), UNATTRIBUTED);
    }
}
