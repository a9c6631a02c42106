//! Serde views of the provider payloads, trimmed to the fields the
//! pipeline reads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

// --- /Line/{id}/Route/Sequence/{direction} ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSequence {
    #[serde(default)]
    pub line_id: Option<String>,
    #[serde(default)]
    pub line_name: Option<String>,
    #[serde(default)]
    pub stop_point_sequences: Vec<StopPointSequence>,
}

/// One ordered branch run in one direction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPointSequence {
    #[serde(default)]
    pub branch_id: Option<i64>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub stop_point: Vec<SequenceStop>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStop {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub top_most_parent_id: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub lines: Vec<LineRef>,
}

impl SequenceStop {
    /// The provider uses both `id` and `stationId` for the same thing.
    pub fn station_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.station_id.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// The hub this station groups under: top-most parent, else itself.
    pub fn hub_id(&self) -> Option<&str> {
        self.top_most_parent_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.station_id())
    }
}

// --- /StopPoint?lat&lon&radius ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPointsResponse {
    #[serde(default)]
    pub stop_points: Vec<NearbyStop>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyStop {
    #[serde(default)]
    pub naptan_id: Option<String>,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub top_most_parent_id: Option<String>,
    #[serde(default)]
    pub modes: Vec<String>,
}

impl NearbyStop {
    pub fn hub_id(&self) -> Option<&str> {
        self.top_most_parent_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.naptan_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

// --- /Line/{id}/Timetable/{fromStopId} ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableResponse {
    #[serde(default)]
    pub timetable: Option<TimetableBody>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableBody {
    #[serde(default)]
    pub departure_stop_id: Option<String>,
    #[serde(default)]
    pub routes: Vec<TimetableRoute>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableRoute {
    #[serde(default)]
    pub station_intervals: Vec<StationIntervalGroup>,
}

/// One branch's schedule: ordered stops with arrival offsets (minutes)
/// relative to the departure terminal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationIntervalGroup {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub intervals: Vec<StopInterval>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopInterval {
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub time_to_arrival: Option<f64>,
}

// --- /Journey/JourneyResults/{from}/to/{to} ---

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyResponse {
    #[serde(default)]
    pub journeys: Vec<Journey>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Journey {
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub legs: Vec<JourneyLeg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyLeg {
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub mode: Option<LegMode>,
    #[serde(default)]
    pub route_options: Vec<RouteOption>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegMode {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOption {
    #[serde(default)]
    pub line_identifier: Option<LineRef>,
}

impl JourneyResponse {
    /// Minimum duration over every returned itinerary.
    pub fn fastest_minutes(&self) -> Option<u32> {
        self.journeys.iter().filter_map(|j| j.duration).min()
    }

    /// Durations of itineraries that ride the named line directly: exactly
    /// one non-walking leg, and that leg's first route option is the line.
    pub fn direct_line_minutes(&self, line: &str) -> Vec<u32> {
        self.journeys
            .iter()
            .filter_map(|journey| {
                let transit_legs: Vec<&JourneyLeg> = journey
                    .legs
                    .iter()
                    .filter(|leg| {
                        leg.mode
                            .as_ref()
                            .and_then(|m| m.id.as_deref())
                            .map(|id| id != "walking")
                            .unwrap_or(true)
                    })
                    .collect();
                let [leg] = transit_legs.as_slice() else {
                    return None;
                };
                let leg_line = leg
                    .route_options
                    .first()
                    .and_then(|r| r.line_identifier.as_ref())
                    .and_then(|l| l.id.as_deref())?;
                if leg_line == line { leg.duration } else { None }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_line_minutes_ignores_multi_leg_and_wrong_line_journeys() {
        let raw = serde_json::json!({
            "journeys": [
                {
                    "duration": 9,
                    "legs": [
                        {"duration": 2, "mode": {"id": "walking"}},
                        {"duration": 7, "mode": {"id": "overground"},
                         "routeOptions": [{"lineIdentifier": {"id": "mildmay", "name": "Mildmay"}}]}
                    ]
                },
                {
                    "duration": 14,
                    "legs": [
                        {"duration": 6, "mode": {"id": "overground"},
                         "routeOptions": [{"lineIdentifier": {"id": "windrush"}}]},
                        {"duration": 5, "mode": {"id": "overground"},
                         "routeOptions": [{"lineIdentifier": {"id": "mildmay"}}]}
                    ]
                }
            ]
        });
        let parsed: JourneyResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.direct_line_minutes("mildmay"), vec![7]);
        assert_eq!(parsed.fastest_minutes(), Some(9));
    }

    #[test]
    fn sequence_stop_prefers_top_most_parent() {
        let stop: SequenceStop = serde_json::from_value(serde_json::json!({
            "stationId": "940GZZLUKSX",
            "name": "King's Cross St. Pancras",
            "topMostParentId": "HUBKGX"
        }))
        .unwrap();
        assert_eq!(stop.station_id(), Some("940GZZLUKSX"));
        assert_eq!(stop.hub_id(), Some("HUBKGX"));
    }
}
