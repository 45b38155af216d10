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
//! Stores built from the CAIDA datasets: AS relationships, customer-cone
//! sizes, and the prefix-to-AS mapping (raw and broken down into `/24`s).

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::Path,
};

use ipnet::Ipv4Net;
use itertools::Itertools;

use crate::{
    error::{Error, Result},
    prefix, Asn,
};

/// Relationship of a neighbor AS towards a pivot AS.
///
/// The ordering is the preference used by the valley-free heuristic: a
/// route learned from a customer beats a route learned from a peer, which
/// beats a route learned from a provider. `Unknown` loses against all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelKind {
    Customer,
    Peer,
    Provider,
    Unknown,
}

/// Bidirectional AS-relationship store built from a CAIDA as-rel file.
#[derive(Debug, Default, Clone)]
pub struct AsRelations {
    neighbors: HashMap<Asn, HashMap<Asn, RelKind>>,
}

impl AsRelations {
    /// Read an as-rel file. Lines are `<a>|<b>|0` for peers and
    /// `<a>|<b>|-1` when `b` is a customer of `a`; `#` lines are comments.
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = crate::readers::open_input(path)?;
        let mut neighbors: HashMap<Asn, HashMap<Asn, RelKind>> = HashMap::new();
        let mut record = |a: Asn, b: Asn, rel: RelKind| {
            neighbors.entry(a).or_default().insert(b, rel);
        };
        for line in std::io::BufRead::lines(reader) {
            let line = line.map_err(|e| Error::io("read_as_rel", path, e))?;
            if line.contains('#') {
                continue;
            }
            let Some((a, b, rel)) = line.split('|').collect_tuple() else {
                continue;
            };
            let (Ok(a), Ok(b)) = (a.parse::<Asn>(), b.parse::<Asn>()) else {
                log::warn!("skipping malformed as-rel line: {line}");
                continue;
            };
            match rel {
                "0" => {
                    record(a, b, RelKind::Peer);
                    record(b, a, RelKind::Peer);
                }
                "-1" => {
                    record(a, b, RelKind::Customer);
                    record(b, a, RelKind::Provider);
                }
                _ => log::warn!("skipping malformed as-rel line: {line}"),
            }
        }
        Ok(Self { neighbors })
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// All neighbors of `asn` with their relationship towards it.
    pub fn neighbors(&self, asn: Asn) -> Option<&HashMap<Asn, RelKind>> {
        self.neighbors.get(&asn)
    }

    /// How `b` relates to `a`: `b` is a customer/peer/provider of `a`.
    /// `Unknown` when either AS is absent from the store, so that known
    /// relationships are always preferred over unknown ones.
    pub fn relation(&self, a: Asn, b: Asn) -> RelKind {
        self.neighbors
            .get(&a)
            .and_then(|n| n.get(&b))
            .copied()
            .unwrap_or(RelKind::Unknown)
    }

    /// Build a store from `(a, b, rel)` triples in the as-rel line
    /// encoding (`0` peers, `-1` b-customer-of-a).
    #[cfg(test)]
    pub(crate) fn from_pairs(lines: &[(Asn, Asn, i8)]) -> Self {
        let mut neighbors: HashMap<Asn, HashMap<Asn, RelKind>> = HashMap::new();
        for &(a, b, rel) in lines {
            match rel {
                0 => {
                    neighbors.entry(a).or_default().insert(b, RelKind::Peer);
                    neighbors.entry(b).or_default().insert(a, RelKind::Peer);
                }
                -1 => {
                    neighbors.entry(a).or_default().insert(b, RelKind::Customer);
                    neighbors.entry(b).or_default().insert(a, RelKind::Provider);
                }
                _ => unreachable!(),
            }
        }
        Self { neighbors }
    }

    /// The neighbors of `asn`'s neighbors, minus `asn` itself and minus
    /// its direct neighbors.
    pub fn one_hop(&self, asn: Asn) -> BTreeSet<Asn> {
        let Some(direct) = self.neighbors.get(&asn) else {
            return BTreeSet::new();
        };
        let mut result: BTreeSet<Asn> = direct
            .keys()
            .filter_map(|n| self.neighbors.get(n))
            .flat_map(|nn| nn.keys())
            .copied()
            .filter(|n| *n != asn)
            .collect();
        for n in direct.keys() {
            result.remove(n);
        }
        result
    }
}

/// The set of ASes that never appear as a customer in an as-rel file.
pub fn read_tier1s(path: &Path) -> Result<HashSet<Asn>> {
    let reader = crate::readers::open_input(path)?;
    let mut all: HashSet<Asn> = HashSet::new();
    let mut customers: HashSet<Asn> = HashSet::new();
    for line in std::io::BufRead::lines(reader) {
        let line = line.map_err(|e| Error::io("read_providers", path, e))?;
        if line.contains('#') {
            continue;
        }
        let Some((a, b, rel)) = line.split('|').collect_tuple() else {
            continue;
        };
        let (Ok(a), Ok(b)) = (a.parse::<Asn>(), b.parse::<Asn>()) else {
            continue;
        };
        if rel == "-1" {
            customers.insert(b);
        }
        all.insert(a);
        all.insert(b);
    }
    log::info!("Nb customers: {}", customers.len());
    let tier1s: HashSet<Asn> = all.difference(&customers).copied().collect();
    log::info!("Nb tier1s: {}", tier1s.len());
    Ok(tier1s)
}

/// Prefix ownership, raw and expanded into `/24` tiles.
#[derive(Debug, Default)]
pub struct Ip2As {
    pub as_prefixes: HashMap<Asn, HashSet<Ipv4Net>>,
    pub prefix_as: HashMap<Ipv4Net, Asn>,
    pub as_24prefixes: HashMap<Asn, HashSet<Ipv4Net>>,
    pub prefix24_as: HashMap<Ipv4Net, Asn>,
}

/// A single-resolution view of [`Ip2As`], either raw or `/24`.
#[derive(Debug, Clone, Copy)]
pub struct Ip2AsView<'a> {
    pub as_prefixes: &'a HashMap<Asn, HashSet<Ipv4Net>>,
    pub prefix_as: &'a HashMap<Ipv4Net, Asn>,
}

impl<'a> Ip2AsView<'a> {
    /// Owning AS of a prefix, if attributed.
    pub fn as_of(&self, net: Ipv4Net) -> Option<Asn> {
        self.prefix_as.get(&net).copied()
    }

    /// Announced prefixes of an AS.
    pub fn prefixes_of(&self, asn: Asn) -> Option<&'a HashSet<Ipv4Net>> {
        self.as_prefixes.get(&asn)
    }
}

impl Ip2As {
    /// Read an ip2as file (`<prefix> <AS>` per line). IPv6 lines, comment
    /// lines, and unattributed (`-1`) entries are skipped.
    ///
    /// The `/24` expansion processes source prefixes in increasing mask
    /// length, so that more-specific entries override the covering
    /// less-specific ones, tile by tile.
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = crate::readers::open_input(path)?;
        let mut store = Self::default();
        for line in std::io::BufRead::lines(reader) {
            let line = line.map_err(|e| Error::io("read_ip2as", path, e))?;
            if line.is_empty() || line.contains('#') || line.contains(':') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(p), Some(asn)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Ok(asn) = asn.parse::<Asn>() else {
                log::warn!("skipping malformed ip2as line: {line}");
                continue;
            };
            if asn == crate::UNATTRIBUTED {
                continue;
            }
            let Some(net) = prefix::parse(p) else {
                log::warn!("skipping malformed ip2as line: {line}");
                continue;
            };
            store.as_prefixes.entry(asn).or_default().insert(net);
            store.prefix_as.insert(net, asn);
        }

        // expand least-specific first: tiles of a more-specific entry win
        // over the tiles of its covering aggregate
        let by_mask: BTreeMap<u8, Vec<Ipv4Net>> = store
            .prefix_as
            .keys()
            .copied()
            .sorted()
            .map(|net| (net.prefix_len(), net))
            .into_group_map()
            .into_iter()
            .collect();
        for net in by_mask.into_values().flatten() {
            let asn = store.prefix_as[&net];
            for tile in prefix::subnets(net, 24) {
                if let Some(previous) = store.prefix24_as.insert(tile, asn) {
                    if previous != asn {
                        if let Some(set) = store.as_24prefixes.get_mut(&previous) {
                            set.remove(&tile);
                        }
                    }
                }
                store.as_24prefixes.entry(asn).or_default().insert(tile);
            }
        }
        Ok(store)
    }

    pub fn view(&self, break_prefix: bool) -> Ip2AsView<'_> {
        if break_prefix {
            Ip2AsView {
                as_prefixes: &self.as_24prefixes,
                prefix_as: &self.prefix24_as,
            }
        } else {
            Ip2AsView {
                as_prefixes: &self.as_prefixes,
                prefix_as: &self.prefix_as,
            }
        }
    }
}

/// Customer-cone sizes: how many distinct `/24`s each AS transitively
/// announces through its customer cone.
#[derive(Debug, Default)]
pub struct ConeSizes {
    sizes: HashMap<Asn, usize>,
    pub max: usize,
}

impl ConeSizes {
    /// Read a CAIDA ppdc customer-cone file (`<as> [<cone_as>]*` per
    /// line) and count the `/24`s of the cone members.
    pub fn from_file(path: &Path, ip2as: &Ip2As) -> Result<Self> {
        if ip2as.as_24prefixes.is_empty() {
            return Err(Error::missing("read_customer_cone", "as_24prefixes not set"));
        }
        let reader = crate::readers::open_input(path)?;
        let mut sizes = HashMap::new();
        let mut max = 0;
        for line in std::io::BufRead::lines(reader) {
            let line = line.map_err(|e| Error::io("read_customer_cone", path, e))?;
            if line.is_empty() || line.contains('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(Ok(asn)) = fields.next().map(str::parse::<Asn>) else {
                log::warn!("skipping malformed ppdc line: {line}");
                continue;
            };
            let mut cone_prefixes: HashSet<Ipv4Net> = HashSet::new();
            for customer in fields {
                let Ok(customer) = customer.parse::<Asn>() else {
                    continue;
                };
                if let Some(prefixes) = ip2as.as_24prefixes.get(&customer) {
                    cone_prefixes.extend(prefixes.iter().copied());
                }
            }
            let size = cone_prefixes.len();
            max = max.max(size);
            sizes.insert(asn, size);
        }
        Ok(Self { sizes, max })
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_sizes(sizes: &[(Asn, usize)]) -> Self {
        Self {
            sizes: sizes.iter().copied().collect(),
            max: sizes.iter().map(|&(_, s)| s).max().unwrap_or(0),
        }
    }

    /// Cone size of an AS, defaulting to 1 when absent.
    pub fn cone(&self, asn: Asn) -> usize {
        self.sizes.get(&asn).copied().unwrap_or(1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn relations_from(lines: &[(Asn, Asn, i8)]) -> AsRelations {
        AsRelations::from_pairs(lines)
    }

    #[test]
    fn relation_is_bidirectional() {
        // 10 provides to 20, 20 peers with 30
        let rel = relations_from(&[(10, 20, -1), (20, 30, 0)]);
        assert_eq!(rel.relation(10, 20), RelKind::Customer);
        assert_eq!(rel.relation(20, 10), RelKind::Provider);
        assert_eq!(rel.relation(20, 30), RelKind::Peer);
        assert_eq!(rel.relation(30, 20), RelKind::Peer);
        assert_eq!(rel.relation(10, 30), RelKind::Unknown);
        assert_eq!(rel.relation(99, 10), RelKind::Unknown);
    }

    #[test]
    fn relation_preference_order() {
        assert!(RelKind::Customer < RelKind::Peer);
        assert!(RelKind::Peer < RelKind::Provider);
        assert!(RelKind::Provider < RelKind::Unknown);
    }

    #[test]
    fn one_hop_excludes_direct_neighbors() {
        // 1 - 2 - 3 - 4 chain plus direct 1 - 3
        let rel = relations_from(&[(1, 2, -1), (2, 3, -1), (3, 4, -1), (1, 3, 0)]);
        let one_hop = rel.one_hop(1);
        // 4 is two hops away through 3; 2 and 3 are direct, 1 is itself
        assert_eq!(one_hop, BTreeSet::from([4]));
    }

    fn ip2as_from(entries: &[(&str, Asn)]) -> Ip2As {
        let mut store = Ip2As::default();
        for &(p, asn) in entries {
            let net: Ipv4Net = p.parse().unwrap();
            store.as_prefixes.entry(asn).or_default().insert(net);
            store.prefix_as.insert(net, asn);
        }
        let nets: Vec<Ipv4Net> = store
            .prefix_as
            .keys()
            .copied()
            .sorted_by_key(|n| (n.prefix_len(), *n))
            .collect();
        for net in nets {
            let asn = store.prefix_as[&net];
            for tile in prefix::subnets(net, 24) {
                if let Some(previous) = store.prefix24_as.insert(tile, asn) {
                    if previous != asn {
                        store.as_24prefixes.get_mut(&previous).unwrap().remove(&tile);
                    }
                }
                store.as_24prefixes.entry(asn).or_default().insert(tile);
            }
        }
        store
    }

    #[test]
    fn more_specific_wins_24_expansion() {
        let store = ip2as_from(&[("10.0.0.0/22", 1), ("10.0.0.0/24", 2)]);
        let p0: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let p1: Ipv4Net = "10.0.1.0/24".parse().unwrap();
        assert_eq!(store.prefix24_as[&p0], 2);
        assert_eq!(store.prefix24_as[&p1], 1);
        assert!(store.as_24prefixes[&2].contains(&p0));
        assert!(!store.as_24prefixes[&1].contains(&p0));
        assert_eq!(store.as_24prefixes[&1].len(), 3);
    }

    #[test]
    fn cone_defaults_to_one() {
        let cones = ConeSizes {
            sizes: HashMap::from([(10, 42)]),
            max: 42,
        };
        assert_eq!(cones.cone(10), 42);
        assert_eq!(cones.cone(11), 1);
    }
}
