//! Shortest paths over the weighted multigraph with a per-change penalty.
//!
//! Plain node relaxation is wrong here: whether leaving a hub costs the
//! change penalty depends on which line arrived there, so shortest (s, u)
//! does not extend to (s, v) on its own. The search therefore runs in the
//! line-labelled state space (hub, incoming line), whose size is bounded
//! by the edge count.

use ahash::AHashMap;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::graph::{TransportGraph, TRANSFER_KEY};

#[derive(Copy, Clone, PartialEq, Eq)]
struct State {
    cost: OrderedFloat<f64>,
    node: u32,
    incoming: Option<u32>,
}

// Flip the ordering so the BinaryHeap pops the cheapest state first; break
// ties on the state identity to keep Ord consistent with PartialEq.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| self.node.cmp(&other.node))
            .then_with(|| self.incoming.cmp(&other.incoming))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone)]
struct SearchEdge {
    target: u32,
    key: u32,
    weight: f64,
}

/// One hop of a reconstructed path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathHop {
    pub hub: String,
    /// Edge key ridden into this hub; `None` for the start.
    pub line: Option<String>,
}

/// An indexed, immutable view of the graph for repeated searches. Edges
/// without a weight are invisible: they cannot carry a shortest path.
pub struct SearchGraph {
    ids: Vec<String>,
    index: AHashMap<String, u32>,
    out: Vec<Vec<SearchEdge>>,
    keys: Vec<String>,
    key_is_transfer: Vec<bool>,
    change_penalty: f64,
}

impl SearchGraph {
    pub fn new(graph: &TransportGraph, change_penalty: f64) -> SearchGraph {
        let mut ids: Vec<String> = graph.hub_ids().map(str::to_string).collect();
        ids.sort();
        let index: AHashMap<String, u32> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i as u32))
            .collect();

        let mut keys: Vec<String> = Vec::new();
        let mut key_index: AHashMap<String, u32> = AHashMap::new();
        let mut out: Vec<Vec<SearchEdge>> = vec![Vec::new(); ids.len()];
        for (source, target, key, edge) in graph.edges() {
            let Some(weight) = edge.weight else { continue };
            let key_idx = *key_index.entry(key.to_string()).or_insert_with(|| {
                keys.push(key.to_string());
                (keys.len() - 1) as u32
            });
            let (s, t) = (index[source], index[target]);
            out[s as usize].push(SearchEdge {
                target: t,
                key: key_idx,
                weight,
            });
        }
        let key_is_transfer = keys.iter().map(|k| k == TRANSFER_KEY).collect();
        SearchGraph {
            ids,
            index,
            out,
            keys,
            key_is_transfer,
            change_penalty,
        }
    }

    fn penalty(&self, incoming: Option<u32>, next_key: u32) -> f64 {
        match incoming {
            Some(previous)
                if previous != next_key
                    && !self.key_is_transfer[previous as usize]
                    && !self.key_is_transfer[next_key as usize] =>
            {
                self.change_penalty
            }
            _ => 0.0,
        }
    }

    /// Label-setting search over (hub, incoming line). Returns per-state
    /// distances and predecessors.
    fn search(
        &self,
        source: u32,
    ) -> (
        AHashMap<(u32, Option<u32>), f64>,
        AHashMap<(u32, Option<u32>), (u32, Option<u32>)>,
    ) {
        let mut dist: AHashMap<(u32, Option<u32>), f64> = AHashMap::new();
        let mut prev: AHashMap<(u32, Option<u32>), (u32, Option<u32>)> = AHashMap::new();
        let mut heap = BinaryHeap::new();

        dist.insert((source, None), 0.0);
        heap.push(State {
            cost: OrderedFloat(0.0),
            node: source,
            incoming: None,
        });

        while let Some(State {
            cost,
            node,
            incoming,
        }) = heap.pop()
        {
            let cost = cost.into_inner();
            if dist
                .get(&(node, incoming))
                .map(|&d| cost > d)
                .unwrap_or(true)
            {
                continue;
            }
            for edge in &self.out[node as usize] {
                let next_cost = cost + edge.weight + self.penalty(incoming, edge.key);
                let state = (edge.target, Some(edge.key));
                if next_cost < dist.get(&state).copied().unwrap_or(f64::INFINITY) {
                    dist.insert(state, next_cost);
                    prev.insert(state, (node, incoming));
                    heap.push(State {
                        cost: OrderedFloat(next_cost),
                        node: edge.target,
                        incoming: Some(edge.key),
                    });
                }
            }
        }
        (dist, prev)
    }

    /// Minimum cost from `source` to every hub, indexed like `hub_ids`.
    /// Unreachable hubs hold infinity. Returns `None` for an unknown
    /// source.
    pub fn costs_from(&self, source: &str) -> Option<AHashMap<String, f64>> {
        let &source = self.index.get(source)?;
        let (dist, _) = self.search(source);
        let mut best: Vec<f64> = vec![f64::INFINITY; self.ids.len()];
        for (&(node, _), &cost) in &dist {
            if cost < best[node as usize] {
                best[node as usize] = cost;
            }
        }
        Some(
            self.ids
                .iter()
                .zip(best)
                .map(|(id, cost)| (id.clone(), cost))
                .collect(),
        )
    }

    /// Minimum cost and the hop sequence from `source` to `target`.
    pub fn shortest_path(&self, source: &str, target: &str) -> Option<(f64, Vec<PathHop>)> {
        let &source_idx = self.index.get(source)?;
        let &target_idx = self.index.get(target)?;
        if source_idx == target_idx {
            return Some((
                0.0,
                vec![PathHop {
                    hub: source.to_string(),
                    line: None,
                }],
            ));
        }
        let (dist, prev) = self.search(source_idx);

        let mut best: Option<((u32, Option<u32>), f64)> = None;
        for (&state, &cost) in &dist {
            if state.0 == target_idx && best.map(|(_, c)| cost < c).unwrap_or(true) {
                best = Some((state, cost));
            }
        }
        let (mut state, cost) = best?;

        let mut hops = Vec::new();
        loop {
            hops.push(PathHop {
                hub: self.ids[state.0 as usize].clone(),
                line: state.1.map(|k| self.keys[k as usize].clone()),
            });
            match prev.get(&state) {
                Some(&previous) => state = previous,
                None => break,
            }
        }
        hops.reverse();
        Some((cost, hops))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{bare_hub, line_edge};
    use crate::graph::{EdgeData, Mode};

    fn graph_from(edges: &[(&str, &str, &str, f64)]) -> TransportGraph {
        let mut g = TransportGraph::new();
        for (s, t, key, w) in edges {
            if !g.contains_hub(s) {
                g.insert_hub(bare_hub(s, s, 51.5, -0.1));
            }
            if !g.contains_hub(t) {
                g.insert_hub(bare_hub(t, t, 51.5, -0.1));
            }
            let data = if *key == TRANSFER_KEY {
                let mut e = EdgeData::walking_transfer();
                e.weight = Some(*w);
                e
            } else {
                line_edge(key, Mode::Tube, Some(*w))
            };
            g.add_edge(s, t, key, data);
        }
        g
    }

    #[test]
    fn change_penalty_reroutes_around_the_direct_line() {
        // Staying on L1 via D (cost 11) beats the shorter L1+L2 pair
        // through B (3 + 4 + 5 penalty = 12).
        let g = graph_from(&[
            ("A", "B", "L1", 3.0),
            ("B", "C", "L2", 4.0),
            ("A", "D", "L1", 10.0),
            ("D", "C", "L1", 1.0),
        ]);
        let search = SearchGraph::new(&g, 5.0);
        let (cost, hops) = search.shortest_path("A", "C").unwrap();
        assert!((cost - 11.0).abs() < 1e-9);
        let lines: Vec<Option<&str>> = hops.iter().map(|h| h.line.as_deref()).collect();
        assert_eq!(lines, vec![None, Some("L1"), Some("L1")]);
    }

    #[test]
    fn cost_to_self_is_zero() {
        let g = graph_from(&[("A", "B", "L1", 3.0)]);
        let search = SearchGraph::new(&g, 5.0);
        assert_eq!(search.shortest_path("A", "A").map(|(c, _)| c), Some(0.0));
    }

    #[test]
    fn transfer_only_paths_carry_no_penalty() {
        let g = graph_from(&[
            ("A", "B", TRANSFER_KEY, 2.0),
            ("B", "C", TRANSFER_KEY, 3.0),
        ]);
        let search = SearchGraph::new(&g, 5.0);
        let (cost, _) = search.shortest_path("A", "C").unwrap();
        assert!((cost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn alternating_line_and_transfer_carries_no_penalty() {
        let g = graph_from(&[
            ("A", "B", "L1", 3.0),
            ("B", "C", TRANSFER_KEY, 2.0),
            ("C", "D", "L2", 4.0),
        ]);
        let search = SearchGraph::new(&g, 5.0);
        let (cost, _) = search.shortest_path("A", "D").unwrap();
        assert!((cost - 9.0).abs() < 1e-9);
    }

    #[test]
    fn consecutive_distinct_lines_cost_one_penalty() {
        let g = graph_from(&[("A", "B", "L1", 3.0), ("B", "C", "L2", 4.0)]);
        let search = SearchGraph::new(&g, 5.0);
        let (cost, _) = search.shortest_path("A", "C").unwrap();
        assert!((cost - 12.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_targets_report_infinity_in_bulk_costs() {
        let mut g = graph_from(&[("A", "B", "L1", 3.0)]);
        g.insert_hub(bare_hub("Z", "Z", 51.4, -0.3));
        let search = SearchGraph::new(&g, 5.0);
        let costs = search.costs_from("A").unwrap();
        assert_eq!(costs["B"], 3.0);
        assert!(costs["Z"].is_infinite());
        assert_eq!(costs["A"], 0.0);
    }

    #[test]
    fn unweighted_edges_cannot_carry_paths() {
        let mut g = graph_from(&[("A", "B", "L1", 3.0)]);
        g.add_edge("B", "C", "L1", line_edge("L1", Mode::Tube, None));
        g.insert_hub(bare_hub("C", "C", 51.5, -0.1));
        let search = SearchGraph::new(&g, 5.0);
        let costs = search.costs_from("A").unwrap();
        assert!(costs.get("C").map(|c| c.is_infinite()).unwrap_or(true));
    }

    #[test]
    fn bulk_costs_agree_with_single_target_search() {
        let g = graph_from(&[
            ("A", "B", "L1", 3.0),
            ("B", "C", "L2", 4.0),
            ("A", "C", "L3", 14.0),
            ("C", "D", TRANSFER_KEY, 2.0),
        ]);
        let search = SearchGraph::new(&g, 5.0);
        let costs = search.costs_from("A").unwrap();
        for target in ["B", "C", "D"] {
            let (cost, _) = search.shortest_path("A", target).unwrap();
            assert!((costs[target] - cost).abs() < 1e-9, "disagree on {target}");
        }
    }
}
