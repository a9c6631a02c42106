use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::cache::ResponseCache;
use super::models::{
    JourneyResponse, NearbyStop, RouteSequence, StopPointsResponse, TimetableResponse,
};
use super::rate_limit::TokenBucket;
use crate::config::Config;
use crate::error::ProviderError;
use crate::graph::{Direction, Mode};

/// Journey calls for timetabled heavy-rail modes pin a date so results do
/// not depend on when the pipeline runs: an off-peak weekday mid-morning.
const JOURNEY_DATE: &str = "20250510";
const JOURNEY_TIME: &str = "1100";

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 16_000;
const JITTER_MS: u64 = 250;

/// Cooperative cancellation shared between the orchestrator and every
/// in-flight provider call. Cancelling lets running calls finish their
/// current attempt; nothing new is started.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointFamily {
    Sequence,
    StopPoint,
    Timetable,
    Journey,
}

pub struct TflClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    cache: ResponseCache,
    sequence_bucket: TokenBucket,
    stoppoint_bucket: TokenBucket,
    timetable_bucket: TokenBucket,
    journey_bucket: TokenBucket,
    timeout_sequence: Duration,
    timeout_timetable: Duration,
    timeout_journey: Duration,
    max_attempts: u32,
    cancel: CancelFlag,
}

impl TflClient {
    pub fn new(config: &Config, cancel: CancelFlag) -> Result<TflClient, ProviderError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .build()
            .map_err(|source| ProviderError::Transport {
                request_id: "client-init".to_string(),
                source,
            })?;
        Ok(TflClient {
            http,
            base_url: "https://api.tfl.gov.uk".to_string(),
            token: config.api_token.clone(),
            cache: ResponseCache::new(config.data_dir.join("response_cache")),
            sequence_bucket: TokenBucket::new(
                config.concurrency_sequence as f64,
                config.rate_sequence_per_s,
            ),
            stoppoint_bucket: TokenBucket::new(
                config.concurrency_stoppoint as f64,
                config.rate_stoppoint_per_s,
            ),
            timetable_bucket: TokenBucket::new(
                config.concurrency_timetable as f64,
                config.rate_timetable_per_s,
            ),
            journey_bucket: TokenBucket::new(
                config.concurrency_journey as f64,
                config.rate_journey_per_s,
            ),
            timeout_sequence: Duration::from_secs(config.timeout_sequence_s),
            timeout_timetable: Duration::from_secs(config.timeout_timetable_s),
            timeout_journey: Duration::from_secs(config.timeout_journey_s),
            max_attempts: config.max_attempts.max(1),
            cancel,
        })
    }

    fn bucket(&self, family: EndpointFamily) -> &TokenBucket {
        match family {
            EndpointFamily::Sequence => &self.sequence_bucket,
            EndpointFamily::StopPoint => &self.stoppoint_bucket,
            EndpointFamily::Timetable => &self.timetable_bucket,
            EndpointFamily::Journey => &self.journey_bucket,
        }
    }

    fn timeout(&self, family: EndpointFamily) -> Duration {
        match family {
            EndpointFamily::Sequence | EndpointFamily::StopPoint => self.timeout_sequence,
            EndpointFamily::Timetable => self.timeout_timetable,
            EndpointFamily::Journey => self.timeout_journey,
        }
    }

    /// Fetches `url` (token-free; the key for logging and caching), retrying
    /// transient failures with exponential backoff and jitter.
    async fn get_json(
        &self,
        family: EndpointFamily,
        url: &str,
        use_cache: bool,
    ) -> Result<Value, ProviderError> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if use_cache {
            if let Some(body) = self.cache.get(url).await {
                log::debug!("cache hit for {url}");
                return Ok(body);
            }
        }

        let request_id = format!("{:016x}", seahash::hash(url.as_bytes()));
        let timeout = self.timeout(family);
        let mut last_retryable: Option<ProviderError> = None;

        for attempt in 1..=self.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            self.bucket(family).acquire().await;
            log::debug!("request {request_id} GET {url} (attempt {attempt})");

            let mut request = self.http.get(url).timeout(timeout);
            if !self.token.is_empty() {
                request = request.query(&[("app_key", self.token.as_str())]);
            }

            let retryable = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: Value =
                            response
                                .json()
                                .await
                                .map_err(|e| ProviderError::Malformed {
                                    url: url.to_string(),
                                    detail: e.to_string(),
                                })?;
                        if use_cache {
                            if let Err(e) = self.cache.put(url, &body).await {
                                log::warn!("cache write failed for {url}: {e}");
                            }
                        }
                        return Ok(body);
                    }
                    match status.as_u16() {
                        401 | 403 => {
                            return Err(ProviderError::Auth {
                                status: status.as_u16(),
                            });
                        }
                        404 => {
                            return Err(ProviderError::NotFound {
                                url: url.to_string(),
                            });
                        }
                        429 => ProviderError::RateLimited {
                            url: url.to_string(),
                            attempts: attempt,
                        },
                        s if s >= 500 => ProviderError::Transport {
                            request_id: request_id.clone(),
                            source: response.error_for_status().unwrap_err(),
                        },
                        _ => {
                            return Err(ProviderError::Malformed {
                                url: url.to_string(),
                                detail: format!("unexpected status {status}"),
                            });
                        }
                    }
                }
                Err(source) if source.is_timeout() => ProviderError::Timeout {
                    request_id: request_id.clone(),
                    seconds: timeout.as_secs(),
                },
                Err(source) => ProviderError::Transport {
                    request_id: request_id.clone(),
                    source,
                },
            };

            log::warn!("request {request_id} attempt {attempt} failed: {retryable}");
            last_retryable = Some(retryable);
            if attempt < self.max_attempts {
                let backoff = (BACKOFF_BASE_MS << (attempt - 1)).min(BACKOFF_CAP_MS);
                let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
        }

        Err(last_retryable.unwrap_or(ProviderError::Cancelled))
    }

    /// Route sequence for one line in one direction. Cached.
    pub async fn line_route_sequence(
        &self,
        line_id: &str,
        direction: Direction,
    ) -> Result<RouteSequence, ProviderError> {
        let url = format!(
            "{}/Line/{}/Route/Sequence/{}?excludeCrowding=true",
            self.base_url,
            line_id,
            direction.as_str()
        );
        let body = self.get_json(EndpointFamily::Sequence, &url, true).await?;
        serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
            url,
            detail: e.to_string(),
        })
    }

    /// Rail/metro stops near a point. The provider is loose about the
    /// radius; callers re-filter by distance.
    pub async fn stops_near(
        &self,
        lat: f64,
        lon: f64,
        radius_m: f64,
    ) -> Result<Vec<NearbyStop>, ProviderError> {
        let url = format!(
            "{}/StopPoint?lat={lat}&lon={lon}&radius={}&stopTypes=NaptanMetroStation,NaptanRailStation&useStopPointHierarchy=false",
            self.base_url, radius_m as u32
        );
        let body = self.get_json(EndpointFamily::StopPoint, &url, false).await?;
        let parsed: StopPointsResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
                url,
                detail: e.to_string(),
            })?;
        Ok(parsed.stop_points)
    }

    /// Raw timetable payload for a line from one of its terminals. Cached.
    /// A 404 means the station is not a valid timetable root for the line.
    pub async fn timetable_json(
        &self,
        line_id: &str,
        from_stop_id: &str,
    ) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/Line/{}/Timetable/{}",
            self.base_url, line_id, from_stop_id
        );
        self.get_json(EndpointFamily::Timetable, &url, true).await
    }

    /// Typed view of [`Self::timetable_json`].
    pub async fn timetable(
        &self,
        line_id: &str,
        from_stop_id: &str,
    ) -> Result<TimetableResponse, ProviderError> {
        let body = self.timetable_json(line_id, from_stop_id).await?;
        serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
            url: format!("{}/Line/{}/Timetable/{}", self.base_url, line_id, from_stop_id),
            detail: e.to_string(),
        })
    }

    /// Fastest door-to-door duration in whole minutes. No date pinning:
    /// recall is better without one for walking and metro queries.
    pub async fn fastest_journey_minutes(
        &self,
        from: &str,
        to: &str,
        mode: Option<Mode>,
    ) -> Result<u32, ProviderError> {
        if from == to {
            return Ok(0);
        }
        let mut url = format!(
            "{}/Journey/JourneyResults/{}/to/{}?timeIs=Departing&journeyPreference=leasttime",
            self.base_url, from, to
        );
        if let Some(mode) = mode {
            url.push_str(&format!("&mode={}", mode.as_str()));
        }
        let body = match self.get_json(EndpointFamily::Journey, &url, false).await {
            Ok(body) => body,
            Err(ProviderError::NotFound { .. }) => {
                return Err(ProviderError::NoJourney {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        let parsed: JourneyResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
                url,
                detail: e.to_string(),
            })?;
        parsed.fastest_minutes().ok_or(ProviderError::NoJourney {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Durations of direct journeys riding `line`, for edge weighting.
    /// Overground and suburban-rail schedules differ enough by time of day
    /// that these calls pin the reference date; other modes omit it.
    pub async fn direct_line_minutes(
        &self,
        from: &str,
        to: &str,
        line: &str,
        mode: Mode,
    ) -> Result<Vec<u32>, ProviderError> {
        let mut url = format!(
            "{}/Journey/JourneyResults/{}/to/{}?timeIs=Departing&journeyPreference=LeastInterchange&mode={}",
            self.base_url,
            from,
            to,
            mode.as_str()
        );
        if matches!(mode, Mode::Overground | Mode::NationalRail) {
            url.push_str(&format!("&date={JOURNEY_DATE}&time={JOURNEY_TIME}"));
        }
        let body = match self.get_json(EndpointFamily::Journey, &url, false).await {
            Ok(body) => body,
            Err(ProviderError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let parsed: JourneyResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
                url,
                detail: e.to_string(),
            })?;
        Ok(parsed.direct_line_minutes(line))
    }
}
