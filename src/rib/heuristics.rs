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
//! Route selection among the candidate entries of one prefix.
//!
//! The valley-free heuristic builds a trie over the reversed AS paths so
//! that paths reaching the prefix the same way share a branch. An AS that
//! shows up at two distinct trie positions routes towards the prefix
//! differently depending on the path: it is a *pivot*, and the entry kept
//! among the paths through it is chosen by a cascade of tie-breaks
//! (relation of the pivot to its next hop, next-hop popularity, path
//! length, number of ASes of interest). Paths through no pivot join the
//! survivors, and one final shortest-path pass picks the selected entry.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::caida::{AsRelations, RelKind};

use super::RibEntry;

/// De-prepend (drop adjacent duplicate ASes) and discard paths with
/// routing loops. Both selection heuristics work on sanitized candidates
/// only, so every selected entry is loop-free.
pub fn sanitize(entries: Vec<RibEntry>) -> Vec<RibEntry> {
    entries
        .into_iter()
        .filter_map(|mut entry| {
            entry.as_path.dedup();
            let mut seen = HashSet::with_capacity(entry.as_path.len());
            entry
                .as_path
                .iter()
                .all(|asn| seen.insert(*asn))
                .then_some(entry)
        })
        .collect()
}

/// The trie digest: for every AS, the candidate entries whose path
/// contains it, plus the ASes that appeared at more than one position.
#[derive(Debug, Default)]
struct PathForest {
    node_entries: BTreeMap<crate::Asn, Vec<usize>>,
    pivots: BTreeSet<crate::Asn>,
}

fn build_forest(entries: &[RibEntry]) -> PathForest {
    #[derive(Default)]
    struct TrieNode(BTreeMap<crate::Asn, TrieNode>);

    let mut root = TrieNode::default();
    let mut forest = PathForest::default();
    for (idx, entry) in entries.iter().enumerate() {
        let mut node = &mut root;
        for &asn in entry.as_path.iter().rev() {
            if !node.0.contains_key(&asn) && forest.node_entries.contains_key(&asn) {
                // same AS under a different branch: the paths diverge
                // on the origin side of this AS
                forest.pivots.insert(asn);
            }
            forest.node_entries.entry(asn).or_default().push(idx);
            node = node.0.entry(asn).or_default();
        }
    }
    forest
}

/// The AS right after `pivot` on the way towards the origin.
fn next_hop_of(path: &[crate::Asn], pivot: crate::Asn) -> Option<crate::Asn> {
    let pos = path.iter().position(|&a| a == pivot)?;
    path.get(pos + 1).copied()
}

/// Strip origin pivots (an AS announcing the prefix itself has no next
/// hop to compare) and count, per next hop of the remaining pivots, how
/// many candidate paths go through it. Returns the surviving pivots, the
/// most popular next hop, and how many next hops tie for that maximum.
fn pivot_popularity(
    forest: &PathForest,
    entries: &[RibEntry],
) -> (BTreeSet<crate::Asn>, Option<crate::Asn>, usize) {
    let mut pivots = forest.pivots.clone();
    let mut counts: BTreeMap<crate::Asn, usize> = BTreeMap::new();
    for &pivot in &forest.pivots {
        for &idx in &forest.node_entries[&pivot] {
            let path = &entries[idx].as_path;
            if path.last() == Some(&pivot) {
                pivots.remove(&pivot);
                continue;
            }
            if let Some(next_hop) = next_hop_of(path, pivot) {
                counts.insert(next_hop, forest.node_entries[&next_hop].len());
            }
        }
    }
    let Some(max_count) = counts.values().copied().max() else {
        return (pivots, None, 0);
    };
    let mut tied = counts.iter().filter(|(_, c)| **c == max_count);
    let max_next_hop = tied.next().map(|(asn, _)| *asn);
    (pivots, max_next_hop, 1 + tied.count())
}

/// Pick the best entry among `candidates` by the cascading tie-breaks.
/// Once a heuristic discriminates between the incumbent and a challenger,
/// the later ones are skipped for that pair.
fn select_entry(
    pivot: Option<crate::Asn>,
    candidates: impl IntoIterator<Item = usize>,
    entries: &[RibEntry],
    relations: Option<&AsRelations>,
    max_next_hop: Option<crate::Asn>,
    popularity_unique: bool,
) -> Option<usize> {
    let relation = |next_hop: Option<crate::Asn>| -> RelKind {
        match (pivot, relations, next_hop) {
            (Some(p), Some(rel), Some(nh)) => rel.relation(p, nh),
            _ => RelKind::Unknown,
        }
    };

    let mut selected: Option<(usize, Option<crate::Asn>)> = None;
    for idx in candidates {
        let entry = &entries[idx];
        let next_hop = pivot.and_then(|p| next_hop_of(&entry.as_path, p));
        let Some((sel_idx, sel_next_hop)) = selected else {
            selected = Some((idx, next_hop));
            continue;
        };
        let sel_entry = &entries[sel_idx];

        if pivot.is_some() {
            // relation of the pivot to the next hop: customer beats peer
            // beats provider beats unknown
            let (r_new, r_sel) = (relation(next_hop), relation(sel_next_hop));
            if r_new != r_sel {
                if r_new < r_sel {
                    selected = Some((idx, next_hop));
                }
                continue;
            }
            // next-hop popularity, skipped when several tie at the top
            if popularity_unique && next_hop != sel_next_hop {
                if next_hop == max_next_hop {
                    selected = Some((idx, next_hop));
                }
                continue;
            }
        }
        // shortest AS path
        if entry.as_path.len() != sel_entry.as_path.len() {
            if entry.as_path.len() < sel_entry.as_path.len() {
                selected = Some((idx, next_hop));
            }
            continue;
        }
        // most ASes of interest along the path
        if entry.next_hop_by_as.len() > sel_entry.next_hop_by_as.len() {
            selected = Some((idx, next_hop));
        }
    }
    selected.map(|(idx, _)| idx)
}

/// Valley-free selection over the candidate entries of one prefix.
pub fn apply_valley_free(entries: Vec<RibEntry>, relations: &AsRelations) -> Option<RibEntry> {
    let mut entries = sanitize(entries);
    if entries.is_empty() {
        return None;
    }
    let forest = build_forest(&entries);
    let (pivots, max_next_hop, top_count) = pivot_popularity(&forest, &entries);

    let mut survivors: BTreeSet<usize> = BTreeSet::new();
    for &pivot in &pivots {
        if let Some(idx) = select_entry(
            Some(pivot),
            forest.node_entries[&pivot].iter().copied(),
            &entries,
            Some(relations),
            max_next_hop,
            top_count == 1,
        ) {
            survivors.insert(idx);
        }
    }

    // paths through no pivot take part individually
    let covered: HashSet<usize> = pivots
        .iter()
        .flat_map(|p| forest.node_entries[p].iter().copied())
        .collect();
    survivors.extend((0..entries.len()).filter(|idx| !covered.contains(idx)));

    let best = select_entry(None, survivors, &entries, None, None, false)?;
    Some(entries.swap_remove(best))
}

/// Plain fallback: shortest path, then most ASes of interest, over all
/// candidates without any pivot analysis.
pub fn apply_shortest_path(entries: Vec<RibEntry>) -> Option<RibEntry> {
    let mut entries = sanitize(entries);
    let best = select_entry(None, 0..entries.len(), &entries, None, None, false)?;
    Some(entries.swap_remove(best))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Asn;

    fn entry(path: &[Asn]) -> RibEntry {
        RibEntry::new(path.to_vec(), &[])
    }

    fn entry_with_interest(path: &[Asn], interest: &[Asn]) -> RibEntry {
        RibEntry::new(path.to_vec(), interest)
    }

    #[test]
    fn sanitize_deprepends_and_drops_loops() {
        let entries = sanitize(vec![
            entry(&[10, 10, 10, 20, 30]),
            entry(&[10, 20, 30, 10]),
            entry(&[40, 50]),
        ]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].as_path, vec![10, 20, 30]);
        assert_eq!(entries[1].as_path, vec![40, 50]);
    }

    #[test]
    fn customer_route_wins_at_pivot() {
        // both paths traverse 20, which reaches the prefix either through
        // its customer 10 or through its provider 40
        let relations = AsRelations::from_pairs(&[(20, 10, -1), (40, 20, -1)]);
        let candidates = vec![entry(&[50, 20, 10]), entry(&[60, 20, 40])];
        let selected = apply_valley_free(candidates, &relations).unwrap();
        assert_eq!(selected.as_path, vec![50, 20, 10]);

        // same selection regardless of candidate order
        let candidates = vec![entry(&[60, 20, 40]), entry(&[50, 20, 10])];
        let selected = apply_valley_free(candidates, &relations).unwrap();
        assert_eq!(selected.as_path, vec![50, 20, 10]);
    }

    #[test]
    fn relation_tie_falls_back_to_shortest_path() {
        // pivot 20 reaches the origin 10 either directly or through 30;
        // both next hops are customers of 20, so the relation rule ties
        let relations = AsRelations::from_pairs(&[(20, 10, -1), (20, 30, -1)]);
        let candidates = vec![entry(&[50, 20, 30, 10]), entry(&[50, 20, 10])];
        let selected = apply_valley_free(candidates, &relations).unwrap();
        assert_eq!(selected.as_path, vec![50, 20, 10]);
    }

    #[test]
    fn popularity_skipped_on_tie() {
        // pivot 20 with two next hops seen on one path each: the
        // popularity rule must not discriminate, and with everything else
        // tied the first candidate stays selected
        let relations = AsRelations::from_pairs(&[]);
        let candidates = vec![entry(&[50, 20, 10]), entry(&[60, 20, 40])];
        let selected = apply_valley_free(candidates, &relations).unwrap();
        assert_eq!(selected.as_path, vec![50, 20, 10]);
    }

    #[test]
    fn origin_pivot_is_stripped() {
        // 20 announces the prefix itself on the second path: it looks
        // like a pivot by construction but has no next hop there
        let relations = AsRelations::from_pairs(&[]);
        let candidates = vec![entry(&[10, 20, 30]), entry(&[40, 20])];
        let selected = apply_valley_free(candidates, &relations).unwrap();
        // no usable pivot: plain shortest path wins
        assert_eq!(selected.as_path, vec![40, 20]);
    }

    #[test]
    fn loops_discarded_entirely() {
        let relations = AsRelations::from_pairs(&[]);
        assert!(apply_valley_free(vec![entry(&[10, 20, 10])], &relations).is_none());
        let selected =
            apply_valley_free(vec![entry(&[10, 20, 10]), entry(&[30, 40])], &relations).unwrap();
        assert_eq!(selected.as_path, vec![30, 40]);
    }

    #[test]
    fn interest_count_breaks_equal_lengths() {
        let interest = &[20, 30];
        let candidates = vec![
            entry_with_interest(&[50, 40, 10], interest),
            entry_with_interest(&[50, 20, 30], interest),
        ];
        let selected = apply_shortest_path(candidates).unwrap();
        assert_eq!(selected.as_path, vec![50, 20, 30]);
    }

    #[test]
    fn shortest_path_over_all_candidates() {
        let candidates = vec![entry(&[10, 20, 30, 40]), entry(&[50, 60]), entry(&[70, 80, 90])];
        let selected = apply_shortest_path(candidates).unwrap();
        assert_eq!(selected.as_path, vec![50, 60]);
    }
}
