//! The online query engine: spatial filter, penalty-aware estimates over
//! the graph, provider refinement of the shortlist, final ranking.

pub mod dijkstra;
pub mod refine;
pub mod spatial;

use rayon::prelude::*;
use thiserror::Error;

use crate::config::Config;
use crate::graph::{Hub, TransportGraph};
use crate::tfl::TflClient;
use dijkstra::SearchGraph;
use refine::RefinedCandidate;
use spatial::{SpatialParams, StartPoint};

/// One participant: where they enter the network and how long they walk
/// to get there. `start_station_id` is the constituent station used for
/// provider calls; it defaults to the hub's primary id but may be a
/// specific platform group when the hub has several.
#[derive(Debug, Clone)]
pub struct UserStart {
    pub hub_id: String,
    pub walk_minutes: f64,
    pub start_station_id: String,
}

impl UserStart {
    pub fn at_hub(hub: &Hub, walk_minutes: f64) -> UserStart {
        UserStart {
            hub_id: hub.id.clone(),
            walk_minutes,
            start_station_id: hub.primary_naptan_id.clone(),
        }
    }
}

/// Graph-estimate ranking entry, before refinement.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub hub_id: String,
    pub total_minutes: f64,
    pub avg_minutes: f64,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub best: RefinedCandidate,
    pub alternatives: Vec<RefinedCandidate>,
    /// How many candidates each stage saw, for the CLI's diagnostics.
    pub candidates_considered: usize,
    pub candidates_estimated: usize,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("need at least two participants, got {0}")]
    TooFewUsers(usize),

    #[error("start hub '{0}' is not in the graph")]
    UnknownStartHub(String),

    #[error("spatial filter left no candidate hubs")]
    NoSpatialCandidates,

    #[error("no candidate is reachable by every participant in the graph estimate")]
    NoEstimates,

    #[error("the journey planner could not price any shortlisted candidate")]
    RefinementEmpty,
}

/// Exact-name hub lookup (case-insensitive). Fuzzy matching is the CLI
/// collaborator's business, not the engine's.
pub fn resolve_hub_by_name<'g>(graph: &'g TransportGraph, name: &str) -> Option<&'g Hub> {
    let wanted = name.trim().to_lowercase();
    graph
        .hubs()
        .find(|hub| hub.name.to_lowercase() == wanted || hub.id.to_lowercase() == wanted)
}

/// Stage 2 of the engine: per-user all-targets searches, aggregated per
/// candidate. Candidates any user cannot reach are dropped.
pub fn estimate_candidates(
    search: &SearchGraph,
    users: &[UserStart],
    candidates: &[String],
) -> Vec<Estimate> {
    let per_user_costs: Vec<_> = users
        .par_iter()
        .map(|user| search.costs_from(&user.hub_id))
        .collect();

    let mut estimates = Vec::new();
    'candidates: for candidate in candidates {
        let mut total = 0.0;
        for (user, costs) in users.iter().zip(&per_user_costs) {
            let cost = costs
                .as_ref()
                .and_then(|c| c.get(candidate.as_str()))
                .copied()
                .unwrap_or(f64::INFINITY);
            if !cost.is_finite() {
                continue 'candidates;
            }
            total += cost + user.walk_minutes;
        }
        estimates.push(Estimate {
            hub_id: candidate.clone(),
            total_minutes: total,
            avg_minutes: total / users.len() as f64,
        });
    }
    estimates.sort_by(|a, b| {
        a.avg_minutes
            .total_cmp(&b.avg_minutes)
            .then_with(|| a.hub_id.cmp(&b.hub_id))
    });
    estimates
}

/// Runs the full query: filter, estimate, refine, rank.
pub async fn find_meeting_point(
    client: &TflClient,
    graph: &TransportGraph,
    users: &[UserStart],
    config: &Config,
) -> Result<QueryOutcome, QueryError> {
    if users.len() < 2 {
        return Err(QueryError::TooFewUsers(users.len()));
    }
    let mut starts = Vec::with_capacity(users.len());
    for user in users {
        let hub = graph
            .hub(&user.hub_id)
            .ok_or_else(|| QueryError::UnknownStartHub(user.hub_id.clone()))?;
        starts.push(StartPoint {
            hub_id: hub.id.clone(),
            lat: hub.lat,
            lon: hub.lon,
        });
    }

    let candidates = spatial::filter_candidates(graph, &starts, &SpatialParams::from(config));
    if candidates.is_empty() {
        return Err(QueryError::NoSpatialCandidates);
    }
    log::info!("spatial filter: {} candidate hub(s)", candidates.len());

    let search = SearchGraph::new(graph, config.change_penalty_minutes);
    let estimates = estimate_candidates(&search, users, &candidates);
    if estimates.is_empty() {
        return Err(QueryError::NoEstimates);
    }
    log::info!(
        "graph estimates: {} candidate(s) reachable by everyone",
        estimates.len()
    );

    let shortlist: Vec<String> = estimates
        .iter()
        .take(config.top_k_refined)
        .map(|e| e.hub_id.clone())
        .collect();
    let mut refined = refine::refine_candidates(
        client,
        graph,
        users,
        &shortlist,
        config.concurrency_journey,
    )
    .await
    .into_iter();
    let Some(best) = refined.next() else {
        return Err(QueryError::RefinementEmpty);
    };
    let alternatives: Vec<RefinedCandidate> =
        refined.take(config.alternatives_returned).collect();
    Ok(QueryOutcome {
        best,
        alternatives,
        candidates_considered: candidates.len(),
        candidates_estimated: estimates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Mode;
    use crate::graph::test_support::{bare_hub, line_edge};

    fn estimate_fixture() -> (TransportGraph, Vec<UserStart>) {
        // Two users at A and E; candidates C1 (cheap for both) and C2.
        let mut g = TransportGraph::new();
        for id in ["A", "E", "C1", "C2"] {
            g.insert_hub(bare_hub(id, id, 51.5, -0.1));
        }
        for (s, t, w) in [
            ("A", "C1", 6.0),
            ("E", "C1", 7.0),
            ("A", "C2", 4.0),
            ("E", "C2", 12.0),
        ] {
            g.add_edge(s, t, "L1", line_edge("L1", Mode::Tube, Some(w)));
        }
        let users = vec![
            UserStart::at_hub(g.hub("A").unwrap(), 4.0),
            UserStart::at_hub(g.hub("E").unwrap(), 4.0),
        ];
        (g, users)
    }

    #[test]
    fn estimates_aggregate_walks_and_sort_by_average() {
        let (g, users) = estimate_fixture();
        let search = SearchGraph::new(&g, 5.0);
        let candidates = vec!["C1".to_string(), "C2".to_string()];
        let estimates = estimate_candidates(&search, &users, &candidates);

        // C1: (6+4) + (7+4) = 21; C2: (4+4) + (12+4) = 24.
        assert_eq!(estimates[0].hub_id, "C1");
        assert!((estimates[0].total_minutes - 21.0).abs() < 1e-9);
        assert_eq!(estimates[1].hub_id, "C2");
        assert!((estimates[1].total_minutes - 24.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_candidates_are_dropped_for_everyone() {
        let (mut g, users) = estimate_fixture();
        g.insert_hub(bare_hub("ISLAND", "ISLAND", 51.5, -0.1));
        let search = SearchGraph::new(&g, 5.0);
        let estimates = estimate_candidates(
            &search,
            &users,
            &["C1".to_string(), "ISLAND".to_string()],
        );
        assert_eq!(estimates.len(), 1);
        assert_eq!(estimates[0].hub_id, "C1");
    }

    #[test]
    fn hub_names_resolve_case_insensitively() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("HUBKGX", "King's Cross St. Pancras", 51.53, -0.12));
        assert!(resolve_hub_by_name(&g, "king's cross st. pancras").is_some());
        assert!(resolve_hub_by_name(&g, "HUBKGX").is_some());
        assert!(resolve_hub_by_name(&g, "Angel").is_none());
    }
}
