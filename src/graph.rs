//! Hub-level transport multigraph and its node-link JSON form.
//!
//! Nodes are hubs (one per distinct top-most parent id in the provider's
//! data); edges are keyed by line id so parallel lines between the same
//! hub pair coexist, with `"transfer"` reserved for walking transfers.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::BuildError;

/// Transport modes carried by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "tube")]
    Tube,
    #[serde(rename = "dlr")]
    Dlr,
    #[serde(rename = "overground")]
    Overground,
    #[serde(rename = "elizabeth-line")]
    Elizabeth,
    #[serde(rename = "national-rail")]
    NationalRail,
    #[serde(rename = "walking")]
    Walking,
}

impl Mode {
    pub fn from_id(id: &str) -> Option<Mode> {
        match id {
            "tube" => Some(Mode::Tube),
            "dlr" => Some(Mode::Dlr),
            "overground" => Some(Mode::Overground),
            "elizabeth-line" => Some(Mode::Elizabeth),
            "national-rail" => Some(Mode::NationalRail),
            "walking" => Some(Mode::Walking),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Tube => "tube",
            Mode::Dlr => "dlr",
            Mode::Overground => "overground",
            Mode::Elizabeth => "elizabeth-line",
            Mode::NationalRail => "national-rail",
            Mode::Walking => "walking",
        }
    }

    /// Preference order when picking a hub's representative coordinates:
    /// lower rank wins.
    pub fn coordinate_rank(&self) -> u8 {
        match self {
            Mode::Tube => 0,
            Mode::Dlr => 1,
            Mode::Overground => 2,
            Mode::Elizabeth => 3,
            Mode::NationalRail => 4,
            Mode::Walking => 5,
        }
    }

    /// Modes whose line edges are weighted from timetables (stage 5).
    pub fn uses_timetable_weights(&self) -> bool {
        matches!(self, Mode::Tube | Mode::Dlr)
    }

    /// Modes whose line edges are weighted from the journey endpoint
    /// (stage 6).
    pub fn uses_journey_weights(&self) -> bool {
        matches!(self, Mode::Overground | Mode::Elizabeth | Mode::NationalRail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "inbound")]
    Inbound,
    #[serde(rename = "outbound")]
    Outbound,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
            Direction::Unknown => "unknown",
        }
    }
}

/// An individual provider station grouped under a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentStation {
    pub name: String,
    pub naptan_id: String,
}

/// A graph node: every station sharing one top-most parent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hub {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub zone: Option<String>,
    pub modes: BTreeSet<Mode>,
    pub lines: BTreeSet<String>,
    pub constituent_stations: Vec<ConstituentStation>,
    pub primary_naptan_id: String,
}

impl Hub {
    /// The id used for journey-planner calls: the first constituent that is
    /// a concrete station rather than a hub alias, else the hub id itself.
    pub fn recompute_primary_id(&mut self) {
        self.primary_naptan_id = self
            .constituent_stations
            .iter()
            .map(|s| s.naptan_id.as_str())
            .find(|id| !id.starts_with("HUB") && *id != self.id)
            .unwrap_or(self.id.as_str())
            .to_string();
    }
}

pub const TRANSFER_KEY: &str = "transfer";
pub const WALKING_LINE: &str = "walking";

/// Attributes of one directed edge. Parallel edges between the same hub
/// pair are distinguished by their key (the line id, or `"transfer"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeData {
    pub line: String,
    pub line_name: String,
    pub mode: Mode,
    pub direction: Direction,
    pub branch: Option<String>,
    pub transfer: bool,
    pub weight: Option<f64>,
}

impl EdgeData {
    pub fn walking_transfer() -> EdgeData {
        EdgeData {
            line: WALKING_LINE.to_string(),
            line_name: WALKING_LINE.to_string(),
            mode: Mode::Walking,
            direction: Direction::Unknown,
            branch: None,
            transfer: true,
            weight: None,
        }
    }
}

/// Directed multigraph keyed (source, target, edge key).
#[derive(Debug, Clone, Default)]
pub struct TransportGraph {
    nodes: AHashMap<String, Hub>,
    // source -> target -> key -> edge
    adjacency: AHashMap<String, AHashMap<String, AHashMap<String, EdgeData>>>,
}

impl TransportGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency
            .values()
            .flat_map(|targets| targets.values())
            .map(|keys| keys.len())
            .sum()
    }

    pub fn hub(&self, id: &str) -> Option<&Hub> {
        self.nodes.get(id)
    }

    pub fn hub_mut(&mut self, id: &str) -> Option<&mut Hub> {
        self.nodes.get_mut(id)
    }

    pub fn hubs(&self) -> impl Iterator<Item = &Hub> {
        self.nodes.values()
    }

    pub fn hub_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    pub fn contains_hub(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn insert_hub(&mut self, hub: Hub) {
        self.nodes.insert(hub.id.clone(), hub);
    }

    /// Adds an edge unless that (source, target, key) slot is taken.
    /// Self-loops are refused. Returns whether the edge was inserted.
    pub fn add_edge(&mut self, source: &str, target: &str, key: &str, data: EdgeData) -> bool {
        if source == target {
            return false;
        }
        let slot = self
            .adjacency
            .entry(source.to_string())
            .or_default()
            .entry(target.to_string())
            .or_default();
        if slot.contains_key(key) {
            return false;
        }
        slot.insert(key.to_string(), data);
        true
    }

    pub fn edge(&self, source: &str, target: &str, key: &str) -> Option<&EdgeData> {
        self.adjacency.get(source)?.get(target)?.get(key)
    }

    pub fn edge_mut(&mut self, source: &str, target: &str, key: &str) -> Option<&mut EdgeData> {
        self.adjacency.get_mut(source)?.get_mut(target)?.get_mut(key)
    }

    pub fn remove_edge(&mut self, source: &str, target: &str, key: &str) -> Option<EdgeData> {
        let targets = self.adjacency.get_mut(source)?;
        let keys = targets.get_mut(target)?;
        let removed = keys.remove(key);
        if keys.is_empty() {
            targets.remove(target);
        }
        removed
    }

    /// Every edge, as (source, target, key, data).
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &str, &EdgeData)> {
        self.adjacency.iter().flat_map(|(source, targets)| {
            targets.iter().flat_map(move |(target, keys)| {
                keys.iter()
                    .map(move |(key, data)| (source.as_str(), target.as_str(), key.as_str(), data))
            })
        })
    }

    /// Whether any non-transfer edge runs `a -> b`.
    pub fn has_line_edge(&self, a: &str, b: &str) -> bool {
        self.adjacency
            .get(a)
            .and_then(|targets| targets.get(b))
            .map(|keys| keys.values().any(|e| !e.transfer))
            .unwrap_or(false)
    }

    /// Whether any non-transfer edge connects the pair in either direction.
    pub fn has_line_edge_between(&self, a: &str, b: &str) -> bool {
        self.has_line_edge(a, b) || self.has_line_edge(b, a)
    }

    /// Edge keys touching `hub` (either endpoint) on the given line.
    pub fn edges_on_line_touching(&self, hub: &str, line: &str) -> Vec<(String, String, String)> {
        self.edges()
            .filter(|(s, t, _, e)| (*s == hub || *t == hub) && e.line == line)
            .map(|(s, t, k, _)| (s.to_string(), t.to_string(), k.to_string()))
            .collect()
    }

    // --- node-link serialisation ---

    pub fn to_node_link(&self) -> NodeLinkFile {
        let mut nodes: Vec<Hub> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut links: Vec<LinkRecord> = self
            .edges()
            .map(|(source, target, key, data)| LinkRecord {
                source: source.to_string(),
                target: target.to_string(),
                key: key.to_string(),
                line: data.line.clone(),
                line_name: data.line_name.clone(),
                mode: data.mode,
                direction: data.direction,
                branch: data.branch.clone(),
                transfer: data.transfer,
                weight: data.weight,
            })
            .collect();
        links.sort_by(|a, b| {
            (&a.source, &a.target, &a.key).cmp(&(&b.source, &b.target, &b.key))
        });
        NodeLinkFile {
            directed: true,
            multigraph: true,
            graph: serde_json::Map::new(),
            nodes,
            links,
        }
    }

    pub fn from_node_link(file: NodeLinkFile) -> Result<TransportGraph, String> {
        let mut graph = TransportGraph::new();
        for hub in file.nodes {
            if hub.name.is_empty() || hub.primary_naptan_id.is_empty() {
                return Err(format!("hub {} has an empty name or primary id", hub.id));
            }
            if hub.constituent_stations.is_empty() {
                return Err(format!("hub {} has no constituent stations", hub.id));
            }
            if !hub.lat.is_finite()
                || !hub.lon.is_finite()
                || hub.lat.abs() > 90.0
                || hub.lon.abs() > 180.0
            {
                return Err(format!("hub {} has invalid coordinates", hub.id));
            }
            graph.insert_hub(hub);
        }
        for link in file.links {
            if !graph.contains_hub(&link.source) || !graph.contains_hub(&link.target) {
                return Err(format!(
                    "link {} -> {} ({}) references a missing hub",
                    link.source, link.target, link.key
                ));
            }
            let data = EdgeData {
                line: link.line,
                line_name: link.line_name,
                mode: link.mode,
                direction: link.direction,
                branch: link.branch,
                transfer: link.transfer,
                weight: link.weight,
            };
            graph.add_edge(&link.source, &link.target, &link.key, data);
        }
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<TransportGraph, BuildError> {
        let raw = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        let file: NodeLinkFile =
            serde_json::from_str(&raw).map_err(|e| BuildError::Artifact {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        TransportGraph::from_node_link(file).map_err(|detail| BuildError::Artifact {
            path: path.to_path_buf(),
            detail,
        })
    }
}

/// The on-disk artifact shape shared by every graph stage output.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeLinkFile {
    pub directed: bool,
    pub multigraph: bool,
    #[serde(default)]
    pub graph: serde_json::Map<String, serde_json::Value>,
    pub nodes: Vec<Hub>,
    pub links: Vec<LinkRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: String,
    pub target: String,
    pub key: String,
    pub line: String,
    pub line_name: String,
    pub mode: Mode,
    pub direction: Direction,
    pub branch: Option<String>,
    pub transfer: bool,
    pub weight: Option<f64>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn bare_hub(id: &str, name: &str, lat: f64, lon: f64) -> Hub {
        Hub {
            id: id.to_string(),
            name: name.to_string(),
            lat,
            lon,
            zone: None,
            modes: BTreeSet::new(),
            lines: BTreeSet::new(),
            constituent_stations: vec![ConstituentStation {
                name: name.to_string(),
                naptan_id: format!("{id}-stn"),
            }],
            primary_naptan_id: format!("{id}-stn"),
        }
    }

    pub fn line_edge(line: &str, mode: Mode, weight: Option<f64>) -> EdgeData {
        EdgeData {
            line: line.to_string(),
            line_name: line.to_string(),
            mode,
            direction: Direction::Inbound,
            branch: None,
            transfer: false,
            weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn duplicate_edge_keys_are_rejected() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("A", "Alpha", 51.5, -0.1));
        g.insert_hub(bare_hub("B", "Beta", 51.6, -0.2));
        assert!(g.add_edge("A", "B", "central", line_edge("central", Mode::Tube, None)));
        assert!(!g.add_edge("A", "B", "central", line_edge("central", Mode::Tube, None)));
        // A second line between the same pair is a distinct edge.
        assert!(g.add_edge("A", "B", "victoria", line_edge("victoria", Mode::Tube, None)));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn self_loops_are_refused() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("A", "Alpha", 51.5, -0.1));
        assert!(!g.add_edge("A", "A", "central", line_edge("central", Mode::Tube, None)));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn transfer_edges_do_not_count_as_line_edges() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("A", "Alpha", 51.5, -0.1));
        g.insert_hub(bare_hub("B", "Beta", 51.6, -0.2));
        g.add_edge("A", "B", TRANSFER_KEY, EdgeData::walking_transfer());
        assert!(!g.has_line_edge_between("A", "B"));
        g.add_edge("B", "A", "dlr", line_edge("dlr", Mode::Dlr, None));
        assert!(g.has_line_edge_between("A", "B"));
    }

    #[test]
    fn primary_id_skips_hub_aliases() {
        let mut hub = bare_hub("HUBWIG", "Willesden Green", 51.549, -0.221);
        hub.constituent_stations = vec![
            ConstituentStation {
                name: "Willesden Green".into(),
                naptan_id: "HUBWIG".into(),
            },
            ConstituentStation {
                name: "Willesden Green Underground Station".into(),
                naptan_id: "940GZZLUWIG".into(),
            },
        ];
        hub.recompute_primary_id();
        assert_eq!(hub.primary_naptan_id, "940GZZLUWIG");
    }

    #[test]
    fn node_link_output_is_deterministically_ordered() {
        let mut g = TransportGraph::new();
        g.insert_hub(bare_hub("B", "Beta", 51.6, -0.2));
        g.insert_hub(bare_hub("A", "Alpha", 51.5, -0.1));
        g.add_edge("B", "A", "central", line_edge("central", Mode::Tube, Some(2.0)));
        g.add_edge("A", "B", "central", line_edge("central", Mode::Tube, Some(2.0)));
        let file = g.to_node_link();
        assert_eq!(file.nodes[0].id, "A");
        assert_eq!(file.links[0].source, "A");
        assert!(file.directed && file.multigraph);
    }
}
