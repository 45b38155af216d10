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
//! The menu of probing strategies, from naive baselines to the final
//! scheme (internals, then neighbors grouped by relationship and ordered
//! by customer cone, then one-hop neighbors, then the rest, with overlay
//! reduction).

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
    error::{Error, Result},
    overlays::remove_overlays,
    readers::{read_next_as_file, read_overlay_file, OverlayGroups},
    stats,
    traces::TargetVps,
    Asn,
};

use super::{
    groups::{
        add_as_probes, direct_neighbor_prefixes, directed_probes, directed_probes_and_groups,
        group_by_relationships, internals, neighbors_by_cone, order_by_cone,
    },
    AsLimit, StrategyEnv,
};

type StrategyOutput = (Vec<Ipv4Net>, Vec<AsLimit>);

/// Run strategy `strategy` for one AS of interest.
pub fn apply(
    env: &StrategyEnv,
    strategy: usize,
    destinations: &[Ipv4Net],
    as_interest: Asn,
    target_to_vp: &TargetVps,
) -> Result<StrategyOutput> {
    match strategy {
        0 => random(env, destinations),
        1 => lexicographic(destinations),
        2 => direct_neighbors(env, as_interest),
        3 => neighbors_then_internals(env, as_interest, false),
        4 => neighbors_then_internals(env, as_interest, true),
        5 => cone_neighbors(env, as_interest, true),
        6 => cone_neighbors(env, as_interest, false),
        7 | 12 => directed_probing(env, as_interest),
        8 => three_groups(env, as_interest, false),
        9 => three_groups(env, as_interest, true),
        10 => internals_then_mixed(env, as_interest),
        11 => four_groups(env, as_interest, false),
        13 | 16 => four_groups(env, as_interest, true),
        14 => three_groups_wide_internals(env, as_interest),
        15 => internals_then_cone_neighbors(env, as_interest),
        17 => overlay_reduction(env, as_interest, target_to_vp, false, false),
        18 => next_hop_as_reduction(env, as_interest, target_to_vp),
        19 => oracle(env, as_interest),
        20 => overlay_reduction(env, as_interest, target_to_vp, true, false),
        21 => overlay_reduction(env, as_interest, target_to_vp, true, true),
        other => Err(Error::InvalidArgument(format!(
            "unknown strategy index {other}"
        ))),
    }
}

fn single_limit(targets: Vec<Ipv4Net>) -> StrategyOutput {
    let limit = AsLimit {
        asn: 0,
        limit: targets.len(),
    };
    (targets, vec![limit])
}

/// 0. The targets in seeded-random order.
fn random(env: &StrategyEnv, destinations: &[Ipv4Net]) -> Result<StrategyOutput> {
    if destinations.is_empty() {
        return Err(Error::missing("strategy", "cannot shuffle without a trace dataset"));
    }
    let mut targets = destinations.to_vec();
    let mut rng = StdRng::seed_from_u64(env.shuffle_seed);
    targets.shuffle(&mut rng);
    Ok(single_limit(targets))
}

/// 1. The targets in lexicographic order.
fn lexicographic(destinations: &[Ipv4Net]) -> Result<StrategyOutput> {
    if destinations.is_empty() {
        return Err(Error::missing("strategy", "cannot sort without a trace dataset"));
    }
    let targets = destinations
        .iter()
        .copied()
        .sorted_by_key(|net| net.to_string())
        .collect();
    Ok(single_limit(targets))
}

fn buckets_from(
    ases: &[Asn],
    map: &HashMap<Asn, HashSet<Ipv4Net>>,
) -> BTreeMap<Asn, BTreeSet<Ipv4Net>> {
    ases.iter()
        .filter_map(|&asn| {
            map.get(&asn)
                .map(|prefixes| (asn, prefixes.iter().copied().collect()))
        })
        .collect()
}

/// 2. The `/24`s of the direct neighbors, one AS after the other.
fn direct_neighbors(env: &StrategyEnv, as_interest: Asn) -> Result<StrategyOutput> {
    let neighbors: Vec<Asn> = env
        .relations
        .neighbors(as_interest)
        .map(|n| n.keys().copied().sorted().collect())
        .unwrap_or_default();
    let buckets = buckets_from(&neighbors, &env.ip2as.as_24prefixes);
    let mut targets = Vec::new();
    let mut limits = Vec::new();
    add_as_probes(&mut targets, neighbors, &mut limits, &buckets);
    Ok((targets, limits))
}

/// 3./4. Direct-neighbor and internal `/24`s, in either order.
fn neighbors_then_internals(
    env: &StrategyEnv,
    as_interest: Asn,
    internals_first: bool,
) -> Result<StrategyOutput> {
    let neighbors = direct_neighbor_prefixes(env, as_interest);
    let own = internals(env, as_interest);
    let (first, second) = if internals_first {
        (own, neighbors)
    } else {
        (neighbors, own)
    };
    let boundary = first.len();
    let targets: Vec<Ipv4Net> = first.into_iter().chain(second).collect();
    let limits = vec![
        AsLimit { asn: 0, limit: boundary },
        AsLimit { asn: 1, limit: targets.len() },
    ];
    Ok((targets, limits))
}

/// 5./6. Direct neighbors ordered by customer cone.
fn cone_neighbors(env: &StrategyEnv, as_interest: Asn, reverse: bool) -> Result<StrategyOutput> {
    let ordered = neighbors_by_cone(env, as_interest, reverse);
    let buckets = buckets_from(&ordered, env.prefixes().as_prefixes);
    let mut targets = Vec::new();
    let mut limits = Vec::new();
    add_as_probes(&mut targets, ordered, &mut limits, &buckets);
    Ok((targets, limits))
}

/// 7./12. All directed probes, unordered.
fn directed_probing(env: &StrategyEnv, as_interest: Asn) -> Result<StrategyOutput> {
    Ok(single_limit(directed_probes(env, as_interest)?))
}

/// 8./9. Internals, direct neighbors, then one-hop neighbors and others
/// mixed (9 orders the groups by increasing customer cone).
fn three_groups(env: &StrategyEnv, as_interest: Asn, ordered: bool) -> Result<StrategyOutput> {
    let groups = directed_probes_and_groups(env, as_interest)?;
    let mut targets = Vec::new();
    let mut limits = Vec::new();

    targets.extend(groups.as_probes.get(&as_interest).into_iter().flatten().copied());
    limits.push(AsLimit { asn: as_interest, limit: targets.len() });
    let group_1 = targets.len();

    let neighbors: Vec<Asn> = if ordered {
        order_by_cone(groups.neighbors.iter().copied(), env, false)
    } else {
        groups.neighbors.iter().copied().collect()
    };
    add_as_probes(&mut targets, neighbors, &mut limits, &groups.as_probes);
    let group_2 = targets.len();

    let mixed: Vec<Asn> = {
        let union = groups.one_hop.iter().chain(&groups.others).copied();
        if ordered {
            order_by_cone(union, env, false)
        } else {
            union.collect()
        }
    };
    add_as_probes(&mut targets, mixed, &mut limits, &groups.as_probes);
    let group_3 = targets.len();

    stats::emit(format_args!(
        "main_groups_limits.txt {as_interest} {group_1} {group_2} {group_3}"
    ));
    Ok((targets, limits))
}

/// 10. Internals, then everything else mixed, by increasing cone.
fn internals_then_mixed(env: &StrategyEnv, as_interest: Asn) -> Result<StrategyOutput> {
    let groups = directed_probes_and_groups(env, as_interest)?;
    let mut targets = Vec::new();
    let mut limits = Vec::new();

    targets.extend(groups.as_probes.get(&as_interest).into_iter().flatten().copied());
    limits.push(AsLimit { asn: as_interest, limit: targets.len() });
    let group_1 = targets.len();

    let mixed = order_by_cone(
        groups
            .neighbors
            .iter()
            .chain(&groups.one_hop)
            .chain(&groups.others)
            .copied(),
        env,
        false,
    );
    add_as_probes(&mut targets, mixed, &mut limits, &groups.as_probes);
    let group_2 = targets.len();

    stats::emit(format_args!(
        "main_groups_limits.txt {as_interest} {group_1} {group_2}"
    ));
    Ok((targets, limits))
}

/// 11./13./16. Internals, direct neighbors, one-hop neighbors, others,
/// every group by increasing customer cone. The `wide_internals`
/// variants start from all the AS's `/24`s instead of the directed ones.
fn four_groups(env: &StrategyEnv, as_interest: Asn, wide_internals: bool) -> Result<StrategyOutput> {
    let groups = directed_probes_and_groups(env, as_interest)?;
    let mut targets = Vec::new();
    let mut limits = Vec::new();

    if wide_internals {
        targets.extend(internals(env, as_interest));
    } else {
        targets.extend(groups.as_probes.get(&as_interest).into_iter().flatten().copied());
    }
    limits.push(AsLimit { asn: as_interest, limit: targets.len() });
    let group_1 = targets.len();

    let neighbors = order_by_cone(groups.neighbors.iter().copied(), env, false);
    add_as_probes(&mut targets, neighbors, &mut limits, &groups.as_probes);
    let group_2 = targets.len();

    let one_hop = order_by_cone(groups.one_hop.iter().copied(), env, false);
    add_as_probes(&mut targets, one_hop, &mut limits, &groups.as_probes);
    let group_3 = targets.len();

    let others = order_by_cone(groups.others.iter().copied(), env, false);
    add_as_probes(&mut targets, others, &mut limits, &groups.as_probes);
    let group_4 = targets.len();

    stats::emit(format_args!(
        "main_groups_limits.txt {as_interest} {group_1} {group_2} {group_3} {group_4}"
    ));
    Ok((targets, limits))
}

/// 14. All internal `/24`s, direct neighbors, then one-hop neighbors and
/// others mixed, by increasing cone.
fn three_groups_wide_internals(env: &StrategyEnv, as_interest: Asn) -> Result<StrategyOutput> {
    let groups = directed_probes_and_groups(env, as_interest)?;
    let mut targets = internals(env, as_interest);
    let mut limits = vec![AsLimit { asn: as_interest, limit: targets.len() }];
    let group_1 = targets.len();

    let neighbors = order_by_cone(groups.neighbors.iter().copied(), env, false);
    add_as_probes(&mut targets, neighbors, &mut limits, &groups.as_probes);
    let group_2 = targets.len();

    let mixed = order_by_cone(
        groups.one_hop.iter().chain(&groups.others).copied(),
        env,
        false,
    );
    add_as_probes(&mut targets, mixed, &mut limits, &groups.as_probes);
    let group_3 = targets.len();

    stats::emit(format_args!(
        "main_groups_limits.txt {as_interest} {group_1} {group_2} {group_3}"
    ));
    Ok((targets, limits))
}

/// 15. All internal `/24`s, then direct neighbors by increasing cone.
fn internals_then_cone_neighbors(env: &StrategyEnv, as_interest: Asn) -> Result<StrategyOutput> {
    let mut targets = internals(env, as_interest);
    let mut limits = vec![AsLimit { asn: as_interest, limit: targets.len() }];
    let group_1 = targets.len();

    let neighbors = neighbors_by_cone(env, as_interest, false);
    let buckets = buckets_from(&neighbors, env.prefixes().as_prefixes);
    add_as_probes(&mut targets, neighbors, &mut limits, &buckets);
    let group_2 = targets.len();

    stats::emit(format_args!(
        "main_groups_limits.txt {as_interest} {group_1} {group_2}"
    ));
    Ok((targets, limits))
}

fn global_overlay_view(env: &StrategyEnv) -> Result<HashMap<String, Arc<OverlayGroups>>> {
    let path = env
        .overlays_global_file
        .as_deref()
        .ok_or_else(|| Error::missing("strategy", "no merged overlay file given"))?;
    let view = Arc::new(read_overlay_file(path)?);
    Ok(env
        .vps
        .iter()
        .map(|vp| (vp.clone(), Arc::clone(&view)))
        .collect())
}

/// 17./20./21. The full scheme: all internal `/24`s first, then the
/// direct neighbors (ordered by cone, or grouped customers before peers
/// before providers for 20/21), then one-hop neighbors, then others,
/// with overlay reduction applied to every group but the internals.
fn overlay_reduction(
    env: &StrategyEnv,
    as_interest: Asn,
    target_to_vp: &TargetVps,
    by_relationships: bool,
    reverse: bool,
) -> Result<StrategyOutput> {
    let overlay_view = global_overlay_view(env)?;
    let mut groups = directed_probes_and_groups(env, as_interest)?;

    let mut targets = internals(env, as_interest);
    let mut limits = vec![AsLimit { asn: as_interest, limit: targets.len() }];
    let group_1 = targets.len();

    let neighbors: Vec<Asn> = if by_relationships {
        let observed: BTreeSet<Asn> = groups
            .as_probes
            .keys()
            .copied()
            .filter(|&asn| asn != as_interest)
            .collect();
        group_by_relationships(&observed, env, as_interest, reverse)
    } else {
        order_by_cone(groups.neighbors.iter().copied(), env, reverse)
    };
    remove_overlays(&mut groups.as_probes, &neighbors, target_to_vp, &overlay_view);
    add_as_probes(&mut targets, neighbors, &mut limits, &groups.as_probes);
    let group_2 = targets.len();

    let one_hop = order_by_cone(groups.one_hop.iter().copied(), env, reverse);
    remove_overlays(&mut groups.as_probes, &one_hop, target_to_vp, &overlay_view);
    add_as_probes(&mut targets, one_hop, &mut limits, &groups.as_probes);
    let group_3 = targets.len();

    let others = order_by_cone(groups.others.iter().copied(), env, reverse);
    remove_overlays(&mut groups.as_probes, &others, target_to_vp, &overlay_view);
    add_as_probes(&mut targets, others, &mut limits, &groups.as_probes);
    let group_4 = targets.len();

    stats::emit(format_args!(
        "main_groups_limits.txt {as_interest} {group_1} {group_2} {group_3} {group_4}"
    ));
    Ok((targets, limits))
}

/// 18. Directed probes collapsed so that, per vantage point, one probe
/// stands for all the prefixes sharing its next-hop AS. The AS of
/// interest's own next hops are left alone.
fn next_hop_as_reduction(
    env: &StrategyEnv,
    as_interest: Asn,
    target_to_vp: &TargetVps,
) -> Result<StrategyOutput> {
    let dir = env
        .next_hop_as_dir
        .as_deref()
        .ok_or_else(|| Error::missing("strategy", "no merged next-AS directory given"))?;
    let (by_prefix, by_next) = read_next_as_file(&dir.join(format!(
        "merged_next_AS_{as_interest}.txt"
    )))?;

    let shared: HashMap<Asn, Arc<HashSet<Ipv4Net>>> = by_next
        .into_iter()
        .map(|(next, prefixes)| (next, Arc::new(prefixes)))
        .collect();
    let mut view = OverlayGroups::new();
    for (prefix, next) in by_prefix {
        if next == as_interest {
            continue;
        }
        view.insert(prefix, Arc::clone(&shared[&next]));
    }
    let view = Arc::new(view);
    let overlay_view: HashMap<String, Arc<OverlayGroups>> = env
        .vps
        .iter()
        .map(|vp| (vp.clone(), Arc::clone(&view)))
        .collect();

    let directed = directed_probes(env, as_interest)?;
    let total = directed.len();
    let mut as_probes: BTreeMap<Asn, BTreeSet<Ipv4Net>> =
        BTreeMap::from([(0, directed.into_iter().collect())]);
    remove_overlays(&mut as_probes, &[0], target_to_vp, &overlay_view);

    let targets: Vec<Ipv4Net> = as_probes.remove(&0).unwrap_or_default().into_iter().collect();
    stats::emit(format_args!(
        "nextAS_reduction.txt {as_interest} {} {total}",
        targets.len()
    ));
    Ok(single_limit(targets))
}

/// 19. Oracle: the prefixes that actually discovered something in a
/// recorded run, most productive first.
fn oracle(env: &StrategyEnv, as_interest: Asn) -> Result<StrategyOutput> {
    let dir = env
        .oracle_prefixes_dir
        .as_deref()
        .ok_or_else(|| Error::missing("strategy", "no oracle-prefixes directory given"))?;
    let path = dir.join(format!("successful_traces_{as_interest}.txt"));
    let reader = crate::readers::open_input(&path)?;

    let mut weighted: Vec<(Ipv4Net, usize)> = Vec::new();
    for line in std::io::BufRead::lines(reader) {
        let line = line.map_err(|e| Error::io("oracle", &path, e))?;
        let mut fields = line.split_whitespace();
        let (Some(Ok(net)), Some(Ok(weight))) = (
            fields.next().map(str::parse::<Ipv4Net>),
            fields.next().map(str::parse::<usize>),
        ) else {
            log::warn!("skipping malformed oracle line: {line}");
            continue;
        };
        weighted.push((net, weight));
    }
    weighted.sort_by_key(|&(net, weight)| (std::cmp::Reverse(weight), net));
    Ok(single_limit(weighted.into_iter().map(|(net, _)| net).collect()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::caida::AsRelations;
    use crate::strategy::groups::test::env_with;

    fn net(p: &str) -> Ipv4Net {
        p.parse().unwrap()
    }

    #[test]
    fn random_is_reproducible_and_complete() {
        let env = env_with(AsRelations::from_pairs(&[]), &[], &[]);
        let destinations = vec![net("1.0.0.0/24"), net("2.0.0.0/24"), net("3.0.0.0/24")];
        let (a, limits) = apply(&env, 0, &destinations, 1, &TargetVps::Fixed("vp".into())).unwrap();
        let (b, _) = apply(&env, 0, &destinations, 1, &TargetVps::Fixed("vp".into())).unwrap();
        assert_eq!(a, b);
        assert_eq!(limits, vec![AsLimit { asn: 0, limit: 3 }]);
        let sorted: BTreeSet<Ipv4Net> = a.into_iter().collect();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn random_without_dataset_fails() {
        let env = env_with(AsRelations::from_pairs(&[]), &[], &[]);
        assert!(apply(&env, 0, &[], 1, &TargetVps::Fixed("vp".into())).is_err());
    }

    #[test]
    fn internals_then_neighbors_boundaries() {
        let env = env_with(
            AsRelations::from_pairs(&[(1, 2, -1)]),
            &[],
            &[("10.0.0.0/24", 1), ("10.0.1.0/24", 1), ("20.0.0.0/24", 2)],
        );
        let (targets, limits) = apply(&env, 4, &[], 1, &TargetVps::Fixed("vp".into())).unwrap();
        assert_eq!(targets.len(), 3);
        // internals first
        assert!(targets[..2].iter().all(|t| t.to_string().starts_with("10.")));
        assert_eq!(
            limits,
            vec![AsLimit { asn: 0, limit: 2 }, AsLimit { asn: 1, limit: 3 }]
        );
    }

    #[test]
    fn final_scheme_orders_relationship_classes() {
        let dir = std::env::temp_dir().join(format!("anaximander_menu20_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("directed_prefixes_1.txt"),
            "1.0.0.0/24\n21.0.0.0/24\n22.0.0.0/24\n31.0.0.0/24\n41.0.0.0/24\n",
        )
        .unwrap();
        std::fs::write(dir.join("overlays.txt"), "").unwrap();

        // neighbors of 1: customers 21 (cone 5) and 22 (cone 2), peer 31
        // (cone 10), provider 41 (cone 100)
        let mut env = env_with(
            AsRelations::from_pairs(&[(1, 21, -1), (1, 22, -1), (1, 31, 0), (41, 1, -1)]),
            &[(21, 5), (22, 2), (31, 10), (41, 100)],
            &[
                ("1.0.0.0/24", 1),
                ("21.0.0.0/24", 21),
                ("22.0.0.0/24", 22),
                ("31.0.0.0/24", 31),
                ("41.0.0.0/24", 41),
            ],
        );
        env.directed_prefixes_dir = Some(dir.clone());
        env.overlays_global_file = Some(dir.join("overlays.txt"));

        let (targets, limits) =
            apply(&env, 20, &[], 1, &TargetVps::Fixed("vp1".into())).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        // internals, then customers by ascending cone, then the peer,
        // then the provider
        let order: Vec<Asn> = limits.iter().map(|l| l.asn).collect();
        assert_eq!(order, vec![1, 22, 21, 31, 41]);
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[0], net("1.0.0.0/24"));
        assert_eq!(limits.last().unwrap().limit, targets.len());
    }

    #[test]
    fn limits_concatenation_matches_targets() {
        let env = env_with(
            AsRelations::from_pairs(&[(1, 2, -1), (1, 3, 0)]),
            &[(2, 4), (3, 9)],
            &[
                ("20.0.0.0/24", 2),
                ("20.0.1.0/24", 2),
                ("30.0.0.0/24", 3),
            ],
        );
        let (targets, limits) = apply(&env, 6, &[], 1, &TargetVps::Fixed("vp".into())).unwrap();
        // cone ascending: AS 2 (cone 4) before AS 3 (cone 9); AS 1 has
        // no prefixes and no boundary
        assert_eq!(
            limits,
            vec![AsLimit { asn: 2, limit: 2 }, AsLimit { asn: 3, limit: 3 }]
        );
        assert_eq!(limits.last().unwrap().limit, targets.len());
        assert!(limits.windows(2).all(|w| w[0].limit <= w[1].limit));
    }
}
