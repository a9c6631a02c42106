//! Second-stage refinement: the journey planner prices the shortlisted
//! candidates door to door, replacing graph estimates with the provider's
//! own itineraries before the final ranking.

use futures::StreamExt;

use super::UserStart;
use crate::error::ProviderError;
use crate::graph::TransportGraph;
use crate::tfl::TflClient;

#[derive(Debug, Clone)]
pub struct RefinedCandidate {
    pub hub_id: String,
    pub name: String,
    pub total_minutes: f64,
    pub avg_minutes: f64,
    pub per_user_minutes: Vec<f64>,
}

/// Prices every (candidate, user) pair. A candidate any user cannot reach
/// is dropped. Result is sorted by combined travel time.
pub async fn refine_candidates(
    client: &TflClient,
    graph: &TransportGraph,
    users: &[UserStart],
    shortlist: &[String],
    concurrency: usize,
) -> Vec<RefinedCandidate> {
    let priced = futures::stream::iter(shortlist.iter().map(|hub_id| {
        let hub_id = hub_id.clone();
        async move {
            let Some(hub) = graph.hub(&hub_id) else {
                return None;
            };
            let mut per_user = Vec::with_capacity(users.len());
            for user in users {
                let minutes = client
                    .fastest_journey_minutes(&user.start_station_id, &hub.primary_naptan_id, None)
                    .await;
                match minutes {
                    Ok(minutes) => per_user.push(f64::from(minutes) + user.walk_minutes),
                    Err(ProviderError::NoJourney { .. }) => {
                        log::info!(
                            "refinement dropped {}: no journey for start {}",
                            hub.name,
                            user.start_station_id
                        );
                        return None;
                    }
                    Err(e) => {
                        log::warn!("refinement dropped {}: {e}", hub.name);
                        return None;
                    }
                }
            }
            let total: f64 = per_user.iter().sum();
            Some(RefinedCandidate {
                hub_id,
                name: hub.name.clone(),
                total_minutes: total,
                avg_minutes: total / users.len() as f64,
                per_user_minutes: per_user,
            })
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    rank_by_total(priced.into_iter().flatten().collect())
}

/// The final ordering is decided by the provider's combined totals, not by
/// the graph estimate that produced the shortlist.
pub fn rank_by_total(mut refined: Vec<RefinedCandidate>) -> Vec<RefinedCandidate> {
    refined.sort_by(|a, b| {
        a.total_minutes
            .total_cmp(&b.total_minutes)
            .then_with(|| a.hub_id.cmp(&b.hub_id))
    });
    refined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(hub_id: &str, per_user: &[f64]) -> RefinedCandidate {
        let total: f64 = per_user.iter().sum();
        RefinedCandidate {
            hub_id: hub_id.to_string(),
            name: hub_id.to_string(),
            total_minutes: total,
            avg_minutes: total / per_user.len() as f64,
            per_user_minutes: per_user.to_vec(),
        }
    }

    #[test]
    fn provider_totals_overrule_the_estimate_order() {
        // The estimate shortlisted C1 ahead of C2; the planner says C2 is
        // quicker overall (avg 20 vs 25). C2 wins, C1 becomes the first
        // alternative.
        let refined = rank_by_total(vec![
            candidate("C1", &[26.0, 24.0]),
            candidate("C2", &[21.0, 19.0]),
        ]);
        assert_eq!(refined[0].hub_id, "C2");
        assert!((refined[0].avg_minutes - 20.0).abs() < 1e-9);
        assert_eq!(refined[1].hub_id, "C1");
    }
}
