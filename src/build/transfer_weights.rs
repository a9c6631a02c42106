//! Stage 3: put a walking time on every transfer pair stage 2 found, via
//! the provider's journey planner in walking mode. Pairs the planner
//! cannot route stay null and are left for the gate's pruning policy.

use ahash::AHashMap;
use futures::StreamExt;

use crate::error::{BuildError, ProviderError};
use crate::graph::{TRANSFER_KEY, TransportGraph};
use crate::tfl::TflClient;

pub struct TransferWeightOutcome {
    pub weighted: usize,
    /// Pairs left null: planner said no journey, or retries ran out.
    pub unmeasured: Vec<(String, String)>,
}

/// Writes one measured duration onto both directed twins. Returns false
/// when either edge is missing (the pair list and graph disagree).
pub fn write_transfer_weight(
    graph: &mut TransportGraph,
    primary_to_hub: &AHashMap<String, String>,
    id_a: &str,
    id_b: &str,
    minutes: f64,
) -> bool {
    let (Some(hub_a), Some(hub_b)) = (primary_to_hub.get(id_a), primary_to_hub.get(id_b)) else {
        log::warn!("transfer pair ({id_a}, {id_b}) no longer resolves to hubs");
        return false;
    };
    let (hub_a, hub_b) = (hub_a.clone(), hub_b.clone());
    let mut both = true;
    for (s, t) in [(&hub_a, &hub_b), (&hub_b, &hub_a)] {
        match graph.edge_mut(s, t, TRANSFER_KEY) {
            Some(edge) => edge.weight = Some(minutes),
            None => {
                log::warn!("transfer edge {s} -> {t} missing while weighting");
                both = false;
            }
        }
    }
    both
}

pub fn primary_id_index(graph: &TransportGraph) -> AHashMap<String, String> {
    graph
        .hubs()
        .map(|h| (h.primary_naptan_id.clone(), h.id.clone()))
        .collect()
}

pub async fn run_transfer_weight_stage(
    client: &TflClient,
    graph: &mut TransportGraph,
    pairs: &[(String, String)],
    concurrency: usize,
) -> Result<TransferWeightOutcome, BuildError> {
    let index = primary_id_index(graph);

    let fetched = futures::stream::iter(pairs.iter().map(|(a, b)| async move {
        let minutes = client
            .fastest_journey_minutes(a, b, Some(crate::graph::Mode::Walking))
            .await;
        (a.clone(), b.clone(), minutes)
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    let mut outcome = TransferWeightOutcome {
        weighted: 0,
        unmeasured: Vec::new(),
    };
    for (a, b, minutes) in fetched {
        match minutes {
            Ok(minutes) => {
                if write_transfer_weight(graph, &index, &a, &b, minutes as f64) {
                    outcome.weighted += 1;
                }
            }
            Err(e) if e.is_fatal() => {
                return Err(BuildError::Provider {
                    stage: "transfer-weights",
                    source: e,
                });
            }
            Err(ProviderError::NoJourney { .. }) => {
                log::warn!("no walking journey for pair ({a}, {b}); weight stays null");
                outcome.unmeasured.push((a, b));
            }
            Err(e) => {
                log::warn!("walking journey failed for pair ({a}, {b}): {e}");
                outcome.unmeasured.push((a, b));
            }
        }
    }
    log::info!(
        "transfer weights: {} weighted, {} unmeasured",
        outcome.weighted,
        outcome.unmeasured.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeData;
    use crate::graph::test_support::bare_hub;

    #[test]
    fn measured_duration_lands_on_both_twins() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("P", "Latimer Road", 51.501, -0.225));
        g.insert_hub(bare_hub("Q", "Wood Lane", 51.500, -0.226));
        g.add_edge("P", "Q", TRANSFER_KEY, EdgeData::walking_transfer());
        g.add_edge("Q", "P", TRANSFER_KEY, EdgeData::walking_transfer());

        let index = primary_id_index(&g);
        assert!(write_transfer_weight(&mut g, &index, "P-stn", "Q-stn", 3.0));

        assert_eq!(g.edge("P", "Q", TRANSFER_KEY).unwrap().weight, Some(3.0));
        assert_eq!(g.edge("Q", "P", TRANSFER_KEY).unwrap().weight, Some(3.0));
    }

    #[test]
    fn missing_twin_is_reported() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("P", "Latimer Road", 51.501, -0.225));
        g.insert_hub(bare_hub("Q", "Wood Lane", 51.500, -0.226));
        g.add_edge("P", "Q", TRANSFER_KEY, EdgeData::walking_transfer());

        let index = primary_id_index(&g);
        assert!(!write_transfer_weight(&mut g, &index, "P-stn", "Q-stn", 3.0));
    }
}
