use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How stage 8 treats transfer edges whose walking time could not be
/// measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnweightedTransferPolicy {
    /// Remove both directions of the pair (default).
    Prune,
    /// Keep the edges with a null weight; Dijkstra will never cross them.
    Keep,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider API token. Usually injected from the TFL_API_KEY env var.
    pub api_token: String,

    /// Root for caches and pipeline artifacts.
    pub data_dir: PathBuf,

    // Worker counts per endpoint family.
    pub concurrency_sequence: usize,
    pub concurrency_stoppoint: usize,
    pub concurrency_timetable: usize,
    pub concurrency_journey: usize,

    // Token-bucket refill rates, requests per second per endpoint family.
    pub rate_sequence_per_s: f64,
    pub rate_stoppoint_per_s: f64,
    pub rate_timetable_per_s: f64,
    pub rate_journey_per_s: f64,

    pub max_attempts: u32,
    pub timeout_sequence_s: u64,
    pub timeout_timetable_s: u64,
    pub timeout_journey_s: u64,

    pub proximity_radius_m: f64,
    pub change_penalty_minutes: f64,
    pub ellipse_expansion_factor: f64,
    pub hull_buffer_fraction: f64,
    pub coverage_fraction: f64,
    pub top_k_refined: usize,
    pub alternatives_returned: usize,
    pub unweighted_transfer_policy: UnweightedTransferPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_token: String::new(),
            data_dir: PathBuf::from("graph_data"),
            concurrency_sequence: 8,
            concurrency_stoppoint: 8,
            concurrency_timetable: 2,
            concurrency_journey: 4,
            rate_sequence_per_s: 4.0,
            rate_stoppoint_per_s: 4.0,
            rate_timetable_per_s: 1.0,
            rate_journey_per_s: 2.0,
            max_attempts: 5,
            timeout_sequence_s: 15,
            timeout_timetable_s: 15,
            timeout_journey_s: 30,
            proximity_radius_m: 250.0,
            change_penalty_minutes: 5.0,
            ellipse_expansion_factor: 1.2,
            hull_buffer_fraction: 0.005,
            coverage_fraction: 0.70,
            top_k_refined: 10,
            alternatives_returned: 5,
            unweighted_transfer_policy: UnweightedTransferPolicy::Prune,
        }
    }
}

impl Config {
    /// Loads the optional config file, then lets the environment and an
    /// explicit CLI token override the file's token.
    pub fn load(path: Option<&Path>, cli_token: Option<&str>) -> anyhow::Result<Config> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", p.display()))?;
                serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("bad config {}: {e}", p.display()))?
            }
            None => Config::default(),
        };
        if let Ok(token) = std::env::var("TFL_API_KEY") {
            if !token.is_empty() {
                config.api_token = token;
            }
        }
        if let Some(token) = cli_token {
            config.api_token = token.to_string();
        }
        Ok(config)
    }

    pub fn require_token(&self) -> anyhow::Result<()> {
        if self.api_token.is_empty() {
            anyhow::bail!("no API token: set TFL_API_KEY or pass --api-key");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.proximity_radius_m, 250.0);
        assert_eq!(c.change_penalty_minutes, 5.0);
        assert_eq!(c.ellipse_expansion_factor, 1.2);
        assert_eq!(c.hull_buffer_fraction, 0.005);
        assert_eq!(c.coverage_fraction, 0.70);
        assert_eq!(c.top_k_refined, 10);
        assert_eq!(c.alternatives_returned, 5);
        assert_eq!(c.max_attempts, 5);
        assert_eq!(c.unweighted_transfer_policy, UnweightedTransferPolicy::Prune);
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let c: Config = serde_json::from_str(r#"{"top_k_refined": 4}"#).unwrap();
        assert_eq!(c.top_k_refined, 4);
        assert_eq!(c.alternatives_returned, 5);
    }
}
