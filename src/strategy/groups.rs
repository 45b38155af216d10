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
//! Directed probes and their partition, relative to the AS of interest,
//! into internals, direct neighbors, one-hop neighbors and others; plus
//! the orderings (customer cone, relationship classes) the strategies
//! compose.

use std::collections::{BTreeMap, BTreeSet};

use ipnet::Ipv4Net;
use itertools::Itertools;

use crate::{
    caida::RelKind,
    error::Result,
    prefix,
    readers::read_newline_delimited,
    stats, Asn, UNATTRIBUTED,
};

use super::{AsLimit, StrategyEnv};

/// The directed probes of one AS of interest, partitioned by the probed
/// AS's position relative to it. None of the sets contain the AS of
/// interest itself.
#[derive(Debug, Default)]
pub struct DirectedGroups {
    /// Probes bucketed by the AS owning their prefix (`-1` collects the
    /// prefixes without attribution).
    pub as_probes: BTreeMap<Asn, BTreeSet<Ipv4Net>>,
    pub neighbors: BTreeSet<Asn>,
    pub one_hop: BTreeSet<Asn>,
    pub others: BTreeSet<Asn>,
    pub total: usize,
}

/// Read the directed prefixes of an AS and turn each into a probe: its
/// `/24`, picked uniformly at random when the prefix is wider.
pub fn directed_probes(env: &StrategyEnv, as_interest: Asn) -> Result<Vec<Ipv4Net>> {
    let path = env
        .directed_prefixes_dir()?
        .join(format!("directed_prefixes_{as_interest}.txt"));
    let mut probes = Vec::new();
    for token in read_newline_delimited(&path, 0)? {
        let Ok(net) = token.parse::<Ipv4Net>() else {
            log::warn!("skipping malformed directed prefix: {token}");
            continue;
        };
        probes.push(prefix::random_24(net));
    }
    Ok(probes)
}

/// Group the directed probes by owning AS and compute the partition.
pub fn directed_probes_and_groups(
    env: &StrategyEnv,
    as_interest: Asn,
) -> Result<DirectedGroups> {
    let probes = directed_probes(env, as_interest)?;
    let view = env.prefixes();

    let mut groups = DirectedGroups {
        total: probes.len(),
        ..Default::default()
    };
    let mut missing = 0usize;
    for probe in probes {
        let asn = match view.as_of(probe) {
            Some(asn) => asn,
            None => {
                missing += 1;
                UNATTRIBUTED
            }
        };
        groups.as_probes.entry(asn).or_default().insert(probe);
    }
    stats::emit(format_args!("missing_prefixes.txt {as_interest} {missing}"));

    let observed: BTreeSet<Asn> = groups
        .as_probes
        .keys()
        .copied()
        .filter(|&asn| asn != as_interest)
        .collect();

    groups.neighbors = env
        .relations
        .neighbors(as_interest)
        .map(|n| n.keys().copied().filter(|a| observed.contains(a)).collect())
        .unwrap_or_default();
    groups.one_hop = env
        .relations
        .one_hop(as_interest)
        .into_iter()
        .filter(|a| observed.contains(a))
        .collect();
    groups.others = observed
        .iter()
        .copied()
        .filter(|a| !groups.neighbors.contains(a) && !groups.one_hop.contains(a))
        .collect();
    Ok(groups)
}

/// Order a set of ASes by customer-cone size (ASN breaks ties).
pub fn order_by_cone(
    ases: impl IntoIterator<Item = Asn>,
    env: &StrategyEnv,
    reverse: bool,
) -> Vec<Asn> {
    let mut ordered: Vec<Asn> = ases
        .into_iter()
        .sorted_by_key(|&asn| (env.cones.cone(asn), asn))
        .collect();
    if reverse {
        ordered.reverse();
    }
    ordered
}

/// Direct neighbors grouped by relationship class, customers first, then
/// peers, then providers, each class ordered by customer cone. Only the
/// ASes present among `observed` are kept.
pub fn group_by_relationships(
    observed: &BTreeSet<Asn>,
    env: &StrategyEnv,
    as_interest: Asn,
    reverse: bool,
) -> Vec<Asn> {
    let mut classes: BTreeMap<RelKind, BTreeSet<Asn>> = BTreeMap::new();
    if let Some(neighbors) = env.relations.neighbors(as_interest) {
        for (&neighbor, &rel) in neighbors {
            if observed.contains(&neighbor) {
                classes.entry(rel).or_default().insert(neighbor);
            }
        }
    }
    [RelKind::Customer, RelKind::Peer, RelKind::Provider]
        .into_iter()
        .flat_map(|class| {
            order_by_cone(
                classes.get(&class).into_iter().flatten().copied(),
                env,
                reverse,
            )
        })
        .collect()
}

/// Append, for each AS in order, its probes as `/24`s, and push the AS's
/// one-past-last boundary. ASes without a probe bucket contribute
/// nothing.
pub fn add_as_probes(
    sequence: &mut Vec<Ipv4Net>,
    ases: impl IntoIterator<Item = Asn>,
    limits: &mut Vec<AsLimit>,
    as_probes: &BTreeMap<Asn, BTreeSet<Ipv4Net>>,
) {
    for asn in ases {
        if let Some(probes) = as_probes.get(&asn) {
            sequence.extend(probes.iter().map(|&p| prefix::random_24(p)));
            limits.push(AsLimit {
                asn,
                limit: sequence.len(),
            });
        }
    }
}

/// All `/24` prefixes of the AS of interest itself.
pub fn internals(env: &StrategyEnv, as_interest: Asn) -> Vec<Ipv4Net> {
    env.ip2as
        .as_24prefixes
        .get(&as_interest)
        .map(|prefixes| prefixes.iter().copied().sorted().collect())
        .unwrap_or_default()
}

/// All `/24` prefixes of the direct neighbors of the AS of interest.
pub fn direct_neighbor_prefixes(env: &StrategyEnv, as_interest: Asn) -> Vec<Ipv4Net> {
    let Some(neighbors) = env.relations.neighbors(as_interest) else {
        return Vec::new();
    };
    neighbors
        .keys()
        .sorted()
        .flat_map(|neighbor| {
            env.ip2as
                .as_24prefixes
                .get(neighbor)
                .into_iter()
                .flatten()
                .copied()
        })
        .collect()
}

/// Direct neighbors ordered by customer cone.
pub fn neighbors_by_cone(env: &StrategyEnv, as_interest: Asn, reverse: bool) -> Vec<Asn> {
    let neighbors = env
        .relations
        .neighbors(as_interest)
        .map(|n| n.keys().copied().collect_vec())
        .unwrap_or_default();
    order_by_cone(neighbors, env, reverse)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::caida::{AsRelations, ConeSizes, Ip2As};
    use crate::traces::TargetVps;

    pub(crate) fn env_with(
        relations: AsRelations,
        cone_sizes: &[(Asn, usize)],
        prefix24_as: &[(&str, Asn)],
    ) -> StrategyEnv {
        let mut ip2as = Ip2As::default();
        for &(p, asn) in prefix24_as {
            let net: Ipv4Net = p.parse().unwrap();
            ip2as.prefix24_as.insert(net, asn);
            ip2as.as_24prefixes.entry(asn).or_default().insert(net);
            ip2as.prefix_as.insert(net, asn);
            ip2as.as_prefixes.entry(asn).or_default().insert(net);
        }
        StrategyEnv {
            relations,
            ip2as,
            cones: ConeSizes::from_sizes(cone_sizes),
            break_prefix: true,
            vps: vec!["vp1".to_owned()],
            directed_prefixes_dir: None,
            overlays_global_file: None,
            next_hop_as_dir: None,
            oracle_prefixes_dir: None,
            shuffle_seed: 0,
        }
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        // 1 - 2 - 3 - 4 chain: 2 direct, 3 one-hop, 4 further out
        let env = env_with(
            AsRelations::from_pairs(&[(1, 2, -1), (2, 3, -1), (3, 4, -1)]),
            &[],
            &[
                ("10.0.0.0/24", 1),
                ("10.0.1.0/24", 2),
                ("10.0.2.0/24", 3),
                ("10.0.3.0/24", 4),
            ],
        );
        let mut groups = DirectedGroups::default();
        for (p, asn) in [
            ("10.0.0.0/24", 1),
            ("10.0.1.0/24", 2),
            ("10.0.2.0/24", 3),
            ("10.0.3.0/24", 4),
            ("10.0.9.0/24", UNATTRIBUTED),
        ] {
            groups
                .as_probes
                .entry(asn)
                .or_default()
                .insert(p.parse().unwrap());
        }
        let observed: BTreeSet<Asn> = groups
            .as_probes
            .keys()
            .copied()
            .filter(|&a| a != 1)
            .collect();
        groups.neighbors = env
            .relations
            .neighbors(1)
            .map(|n| n.keys().copied().filter(|a| observed.contains(a)).collect())
            .unwrap_or_default();
        groups.one_hop = env
            .relations
            .one_hop(1)
            .into_iter()
            .filter(|a| observed.contains(a))
            .collect();
        groups.others = observed
            .iter()
            .copied()
            .filter(|a| !groups.neighbors.contains(a) && !groups.one_hop.contains(a))
            .collect();

        assert_eq!(groups.neighbors, BTreeSet::from([2]));
        assert_eq!(groups.one_hop, BTreeSet::from([3]));
        assert_eq!(groups.others, BTreeSet::from([4, UNATTRIBUTED]));
        // disjoint and covering all observed ASes
        let mut union = BTreeSet::new();
        union.extend(&groups.neighbors);
        union.extend(&groups.one_hop);
        union.extend(&groups.others);
        assert_eq!(union, observed);
    }

    #[test]
    fn add_as_probes_limits_are_cumulative() {
        let mut as_probes: BTreeMap<Asn, BTreeSet<Ipv4Net>> = BTreeMap::new();
        as_probes
            .entry(10)
            .or_default()
            .extend(["1.0.0.0/24".parse::<Ipv4Net>().unwrap(), "1.0.1.0/24".parse().unwrap()]);
        as_probes
            .entry(20)
            .or_default()
            .insert("2.0.0.0/24".parse().unwrap());

        let mut sequence = Vec::new();
        let mut limits = Vec::new();
        // 30 has no bucket and must not produce a boundary
        add_as_probes(&mut sequence, [10, 30, 20], &mut limits, &as_probes);

        assert_eq!(sequence.len(), 3);
        assert_eq!(
            limits,
            vec![AsLimit { asn: 10, limit: 2 }, AsLimit { asn: 20, limit: 3 }]
        );
        // boundaries delimit exactly the sequence
        assert_eq!(limits.last().unwrap().limit, sequence.len());
        assert!(limits.windows(2).all(|w| w[0].limit <= w[1].limit));
    }

    #[test]
    fn relationship_grouping_orders_classes() {
        // neighbors of 1: customers 21 (cone 5) and 22 (cone 2), peer 31
        // (cone 10), provider 41 (cone 100)
        let env = env_with(
            AsRelations::from_pairs(&[(1, 21, -1), (1, 22, -1), (1, 31, 0), (41, 1, -1)]),
            &[(21, 5), (22, 2), (31, 10), (41, 100)],
            &[],
        );
        let observed: BTreeSet<Asn> = [21, 22, 31, 41].into_iter().collect();
        let ordered = group_by_relationships(&observed, &env, 1, false);
        assert_eq!(ordered, vec![22, 21, 31, 41]);

        let reversed = group_by_relationships(&observed, &env, 1, true);
        assert_eq!(reversed, vec![21, 22, 31, 41]);
    }

    #[test]
    fn cone_ordering_breaks_ties_by_asn() {
        let env = env_with(AsRelations::from_pairs(&[]), &[(10, 7), (20, 7), (30, 1)], &[]);
        assert_eq!(order_by_cone([20, 30, 10], &env, false), vec![30, 10, 20]);
        assert_eq!(order_by_cone([20, 30, 10], &env, true), vec![20, 10, 30]);
    }

    #[test]
    fn target_vps_fixed_covers_everything() {
        let vps = TargetVps::Fixed("my_VP".to_owned());
        assert_eq!(vps.get("1.0.0.0/24".parse().unwrap()), Some("my_VP"));
    }
}
