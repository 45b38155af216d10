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
//! Routing overlays: prefixes whose selected AS path is the one of a
//! covering aggregate, found with a binary radix tree over the selected
//! entries, then transitively closed into equivalence groups. Also the
//! probe-reduction pass that keeps one probe per overlay group and per
//! vantage point.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use ipnet::Ipv4Net;
use petgraph::unionfind::UnionFind;

use crate::{prefix, readers::OverlayGroups, traces::TargetVps, Asn};

/// Path-compressed binary trie keyed by the bit string of a prefix.
#[derive(Debug, Default)]
pub struct RadixTree {
    root: Node,
}

#[derive(Debug, Default)]
struct Node {
    /// Bit string from the tree root down to this node.
    key: String,
    value: Option<String>,
    children: [Option<Box<Node>>; 2],
}

fn bit(key: &str, index: usize) -> usize {
    usize::from(key.as_bytes()[index] == b'1')
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

impl RadixTree {
    pub fn insert(&mut self, key: &str, value: String) {
        Self::insert_at(&mut self.root, key, value);
    }

    fn insert_at(node: &mut Node, key: &str, value: String) {
        if key == node.key {
            node.value = Some(value);
            return;
        }
        let branch = bit(key, node.key.len());
        match &mut node.children[branch] {
            slot @ None => {
                *slot = Some(Box::new(Node {
                    key: key.to_owned(),
                    value: Some(value),
                    children: [None, None],
                }));
            }
            Some(child) => {
                let lcp = common_prefix_len(key, &child.key);
                if lcp == child.key.len() {
                    Self::insert_at(child, key, value);
                    return;
                }
                // diverging below the edge: split it at the shared bits
                let old = std::mem::replace(
                    child,
                    Box::new(Node {
                        key: key[..lcp].to_owned(),
                        value: None,
                        children: [None, None],
                    }),
                );
                let old_branch = bit(&old.key, lcp);
                child.children[old_branch] = Some(old);
                if key.len() == lcp {
                    child.value = Some(value);
                } else {
                    let new_branch = bit(key, lcp);
                    child.children[new_branch] = Some(Box::new(Node {
                        key: key.to_owned(),
                        value: Some(value),
                        children: [None, None],
                    }));
                }
            }
        }
    }

    /// Post-order walk. The callback receives the node's key, its value,
    /// and the topmost leaves of each child subtree (the direct
    /// more-specifics, with no other inserted prefix in between).
    ///
    /// It fires at every inserted node with such children, and at the
    /// topmost branching point of a region with no inserted prefix above
    /// it (where an implicit aggregate may hide). Deeper branching points
    /// stay silent: children always group under one nearest parent, never
    /// under several sub-aggregates.
    pub fn walk_post<F>(&self, f: &mut F)
    where
        F: FnMut(&str, Option<&str>, &[(&str, &str)]),
    {
        Self::walk_node(&self.root, false, f);
    }

    fn walk_node<F>(node: &Node, has_grouping_ancestor: bool, f: &mut F)
    where
        F: FnMut(&str, Option<&str>, &[(&str, &str)]),
    {
        let branching = node.children.iter().flatten().count() == 2;
        let below = has_grouping_ancestor || node.value.is_some() || branching;
        for child in node.children.iter().flatten() {
            Self::walk_node(child, below, f);
        }
        let children: Vec<(&str, &str)> = node
            .children
            .iter()
            .flatten()
            .flat_map(|c| Self::top_leaves(c))
            .collect();
        if !children.is_empty()
            && (node.value.is_some() || (branching && !has_grouping_ancestor))
        {
            f(&node.key, node.value.as_deref(), &children);
        }
    }

    fn top_leaves(node: &Node) -> Vec<(&str, &str)> {
        match &node.value {
            Some(value) => vec![(node.key.as_str(), value.as_str())],
            None => node
                .children
                .iter()
                .flatten()
                .flat_map(|c| Self::top_leaves(c))
                .collect(),
        }
    }
}

/// Find the `aggregate <-> member` overlay edges of one selected-entry
/// table, given `(prefix, joined AS path)` pairs.
///
/// Explicit overlays are more-specifics sharing the AS path of an
/// inserted covering prefix. Among the children that do not match, an
/// implicit aggregate is detected when they exactly tile one binary
/// aggregate (`2^k` children below a non-empty common prefix) and all
/// share one AS path. Children are never split into several implicit
/// groups; only the single spanning group is tested.
pub fn collect_overlay_edges(
    table: impl IntoIterator<Item = (Ipv4Net, String)>,
) -> Vec<(Ipv4Net, Ipv4Net)> {
    let mut tree = RadixTree::default();
    for (net, as_path) in table {
        tree.insert(&prefix::binary_string(net), as_path);
    }

    let mut edges: Vec<(Ipv4Net, Ipv4Net)> = Vec::new();
    tree.walk_post(&mut |node_key, aggregate_path, children| {
        let mut marked: Vec<(&str, &str)> = Vec::with_capacity(children.len());
        for &(child_key, child_path) in children {
            if aggregate_path == Some(child_path) {
                // a match implies the node holds a value, i.e. the
                // aggregate is itself an inserted prefix
                edges.push((prefix::from_binary(node_key), prefix::from_binary(child_key)));
            } else {
                marked.push((child_key, child_path));
            }
        }
        if marked.len() < 2 {
            return;
        }
        marked.sort_by_key(|(key, _)| key.len());
        let common = marked
            .iter()
            .skip(1)
            .fold(marked[0].0.len(), |lcp, (key, _)| {
                lcp.min(common_prefix_len(marked[0].0, key))
            });
        if common == 0 {
            return;
        }
        let suffix_len = marked[0].0.len() - common;
        if 1usize << suffix_len != marked.len() {
            return;
        }
        if !marked.iter().all(|(_, path)| *path == marked[0].1) {
            return;
        }
        let aggregate = prefix::from_binary(&marked[0].0[..common]);
        for (key, _) in marked {
            edges.push((aggregate, prefix::from_binary(key)));
        }
    });
    edges
}

/// Transitive closure of overlay edges as connected components of the
/// undirected `aggregate <-> member` graph. Each component becomes one
/// group whose representative is its first-observed prefix.
pub fn closure(
    edges: impl IntoIterator<Item = (Ipv4Net, Ipv4Net)>,
) -> Vec<(Ipv4Net, Vec<Ipv4Net>)> {
    let edges: Vec<(Ipv4Net, Ipv4Net)> = edges.into_iter().collect();
    let mut index: HashMap<Ipv4Net, usize> = HashMap::new();
    let mut nodes: Vec<Ipv4Net> = Vec::new();
    let mut intern = |net: Ipv4Net, nodes: &mut Vec<Ipv4Net>| -> usize {
        *index.entry(net).or_insert_with(|| {
            nodes.push(net);
            nodes.len() - 1
        })
    };
    let edge_ids: Vec<(usize, usize)> = edges
        .iter()
        .map(|&(a, b)| (intern(a, &mut nodes), intern(b, &mut nodes)))
        .collect();

    let mut union_find: UnionFind<usize> = UnionFind::new(nodes.len());
    for (a, b) in edge_ids {
        union_find.union(a, b);
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..nodes.len() {
        components.entry(union_find.find(i)).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = components.into_values().collect();
    groups.sort_by_key(|members| members[0]);
    groups
        .into_iter()
        .map(|members| {
            let representative = nodes[members[0]];
            let rest = members[1..].iter().map(|&i| nodes[i]).collect();
            (representative, rest)
        })
        .collect()
}

/// Overlay reduction over the probes of the given ASes: per vantage
/// point, the first probe of an overlay group is kept (as its `/24`) and
/// the other members of the group are suppressed. Probes without VP
/// information are kept untouched.
pub fn remove_overlays(
    as_probes: &mut BTreeMap<Asn, BTreeSet<Ipv4Net>>,
    ases: &[Asn],
    target_to_vp: &TargetVps,
    overlays: &HashMap<String, Arc<OverlayGroups>>,
) {
    for asn in ases {
        let Some(probes) = as_probes.get(asn) else {
            continue;
        };
        let mut seen: HashMap<&str, HashSet<Ipv4Net>> = HashMap::new();
        let mut kept: BTreeSet<Ipv4Net> = BTreeSet::new();
        for &probe in probes {
            let probe_24 = prefix::random_24(probe);
            let Some(vp) = target_to_vp.get(probe_24) else {
                // not in the traces: keep it, the replay ignores it anyway
                kept.insert(probe_24);
                continue;
            };
            if seen.get(vp).is_some_and(|s| s.contains(&probe)) {
                continue;
            }
            kept.insert(probe_24);
            if let Some(group) = overlays.get(vp).and_then(|o| o.get(&probe)) {
                seen.entry(vp).or_default().extend(group.iter().copied());
            }
        }
        as_probes.insert(*asn, kept);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn net(p: &str) -> Ipv4Net {
        p.parse().unwrap()
    }

    fn edges_of(table: &[(&str, &str)]) -> Vec<(Ipv4Net, Ipv4Net)> {
        collect_overlay_edges(
            table
                .iter()
                .map(|(p, path)| (net(p), path.to_string())),
        )
    }

    #[test]
    fn explicit_and_implicit_overlays() {
        let edges = edges_of(&[
            ("10.0.0.0/22", "1 2"),
            ("10.0.0.0/24", "1 2"),
            ("10.0.1.0/24", "1 2"),
            ("10.0.2.0/24", "1 3"),
            ("10.0.3.0/24", "1 3"),
        ]);

        // explicit: the two /24s sharing the aggregate's path
        assert!(edges.contains(&(net("10.0.0.0/22"), net("10.0.0.0/24"))));
        assert!(edges.contains(&(net("10.0.0.0/22"), net("10.0.1.0/24"))));
        // implicit: the two non-matching /24s exactly tile 10.0.2.0/23
        assert!(edges.contains(&(net("10.0.2.0/23"), net("10.0.2.0/24"))));
        assert!(edges.contains(&(net("10.0.2.0/23"), net("10.0.3.0/24"))));
        assert_eq!(edges.len(), 4);
    }

    #[test]
    fn implicit_needs_exact_tiling_and_same_path() {
        // three children under a /22: 2^k never equals 3
        let edges = edges_of(&[
            ("10.0.0.0/24", "1 3"),
            ("10.0.1.0/24", "1 3"),
            ("10.0.2.0/24", "1 3"),
        ]);
        assert!(edges.is_empty());

        // exact pair but different paths
        let edges = edges_of(&[("10.0.2.0/24", "1 3"), ("10.0.3.0/24", "1 4")]);
        assert!(edges.is_empty());

        // exact pair, same path, no inserted parent: implicit aggregate
        let edges = edges_of(&[("10.0.2.0/24", "1 3"), ("10.0.3.0/24", "1 3")]);
        assert_eq!(
            edges,
            vec![
                (net("10.0.2.0/23"), net("10.0.2.0/24")),
                (net("10.0.2.0/23"), net("10.0.3.0/24")),
            ]
        );
    }

    #[test]
    fn intervening_prefix_blocks_the_aggregate() {
        // the /23 sits between the /22 and the left /24s, so those attach
        // to the /23 instead of the /22
        let edges = edges_of(&[
            ("10.0.0.0/22", "1 2"),
            ("10.0.0.0/23", "1 9"),
            ("10.0.0.0/24", "1 2"),
            ("10.0.1.0/24", "1 2"),
        ]);
        // the /24s do not match the /23's path, tile it exactly, and
        // share one path: implicit group at the /23; and the /23 itself
        // does not match the /22
        assert!(edges.contains(&(net("10.0.0.0/23"), net("10.0.0.0/24"))));
        assert!(edges.contains(&(net("10.0.0.0/23"), net("10.0.1.0/24"))));
        assert!(!edges.contains(&(net("10.0.0.0/22"), net("10.0.0.0/24"))));
    }

    #[test]
    fn closure_merges_touching_groups() {
        let groups = closure(vec![
            (net("10.0.0.0/22"), net("10.0.0.0/24")),
            (net("10.0.0.0/24"), net("10.0.1.0/24")),
            (net("20.0.0.0/24"), net("20.0.1.0/24")),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, net("10.0.0.0/22"));
        assert_eq!(
            groups[0].1.iter().copied().collect::<BTreeSet<_>>(),
            BTreeSet::from([net("10.0.0.0/24"), net("10.0.1.0/24")])
        );
        assert_eq!(groups[1].0, net("20.0.0.0/24"));
        assert_eq!(groups[1].1, vec![net("20.0.1.0/24")]);
    }

    #[test]
    fn reduction_keeps_one_probe_per_group_and_vp() {
        let group: Arc<HashSet<Ipv4Net>> = Arc::new(
            [net("10.0.0.0/24"), net("10.0.1.0/24"), net("10.0.2.0/24")]
                .into_iter()
                .collect(),
        );
        let mut overlay_map = OverlayGroups::new();
        for member in group.iter() {
            overlay_map.insert(*member, Arc::clone(&group));
        }
        let overlays = HashMap::from([("vp1".to_string(), Arc::new(overlay_map))]);

        let mut as_probes = BTreeMap::from([(
            174,
            BTreeSet::from([
                net("10.0.0.0/24"),
                net("10.0.1.0/24"),
                net("10.0.2.0/24"),
                net("10.9.9.0/24"),
            ]),
        )]);
        let target_to_vp = TargetVps::Fixed("vp1".to_string());

        remove_overlays(&mut as_probes, &[174], &target_to_vp, &overlays);

        let kept = &as_probes[&174];
        // exactly one member of the overlay group survives, plus the
        // probe outside any group
        let in_group = kept.iter().filter(|p| group.contains(p)).count();
        assert_eq!(in_group, 1);
        assert!(kept.contains(&net("10.9.9.0/24")));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn reduction_keeps_probes_without_vp() {
        let overlays = HashMap::from([("vp1".to_string(), Arc::new(OverlayGroups::new()))]);
        let mut as_probes =
            BTreeMap::from([(174, BTreeSet::from([net("10.0.0.0/24"), net("10.0.1.0/24")]))]);
        let target_to_vp = TargetVps::PerTarget(HashMap::new());

        remove_overlays(&mut as_probes, &[174], &target_to_vp, &overlays);
        assert_eq!(as_probes[&174].len(), 2);
    }
}
