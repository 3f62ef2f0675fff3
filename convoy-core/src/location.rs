//! Device location capability and the reporter that feeds it into the
//! service. Platform specifics live behind [`LocationProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConvoyError, Result as ConvoyResult};
use crate::service::ConvoyService;
use crate::types::{ConvoyId, Coordinate, UserId};

/// Fallback position used when the device has no location source
pub const DEFAULT_FIXED_LOCATION: (f64, f64) = (48.8566, 2.3522);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Raw reading from a provider. Values are not validated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: Utc::now(),
        }
    }

    pub fn coordinate(&self) -> ConvoyResult<Coordinate> {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[async_trait]
pub trait LocationProvider: Send {
    /// Wait for the next reading. `Ok(None)` means the source is exhausted.
    /// Must be cancel-safe: dropping the future loses no sample.
    async fn next_sample(&mut self) -> Result<Option<LocationSample>, LocationError>;
}

/// Reports the same position on a fixed period
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    latitude: f64,
    longitude: f64,
    period: Duration,
    next_at: Option<Instant>,
}

impl FixedLocationProvider {
    pub fn new(latitude: f64, longitude: f64, period: Duration) -> Self {
        Self {
            latitude,
            longitude,
            period,
            next_at: None,
        }
    }
}

impl Default for FixedLocationProvider {
    fn default() -> Self {
        let (latitude, longitude) = DEFAULT_FIXED_LOCATION;
        Self::new(latitude, longitude, Duration::from_secs(1))
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn next_sample(&mut self) -> Result<Option<LocationSample>, LocationError> {
        if let Some(next_at) = self.next_at {
            tokio::time::sleep_until(next_at).await;
        }
        let now = Instant::now();
        self.next_at = Some(now + self.period);
        Ok(Some(LocationSample::new(self.latitude, self.longitude)))
    }
}

/// Replays a prepared sequence of readings and failures, each after a delay
#[derive(Debug, Default)]
pub struct ScriptedLocationProvider {
    steps: VecDeque<(Duration, Result<LocationSample, LocationError>)>,
    due: Option<Instant>,
}

impl ScriptedLocationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(mut self, after: Duration, latitude: f64, longitude: f64) -> Self {
        self.steps
            .push_back((after, Ok(LocationSample::new(latitude, longitude))));
        self
    }

    pub fn error(mut self, after: Duration, error: LocationError) -> Self {
        self.steps.push_back((after, Err(error)));
        self
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl LocationProvider for ScriptedLocationProvider {
    async fn next_sample(&mut self) -> Result<Option<LocationSample>, LocationError> {
        let Some((delay, _)) = self.steps.front() else {
            return Ok(None);
        };

        let due = *self.due.get_or_insert_with(|| Instant::now() + *delay);
        tokio::time::sleep_until(due).await;
        self.due = None;

        match self.steps.pop_front() {
            Some((_, Ok(mut sample))) => {
                sample.timestamp = Utc::now();
                Ok(Some(sample))
            }
            Some((_, Err(error))) => Err(error),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportPolicy {
    /// Movement below this is jitter and not reported
    pub min_distance_meters: f64,
    /// Longest silence before the last position is re-sent
    pub heartbeat: Duration,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            min_distance_meters: 5.0,
            heartbeat: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Service(#[from] ConvoyError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub reported: usize,
    /// Samples within the jitter radius
    pub suppressed: usize,
    pub invalid: usize,
}

/// Pumps provider samples into [`ConvoyService::update_position`]
pub struct PositionReporter<P> {
    service: Arc<ConvoyService>,
    convoy_id: ConvoyId,
    user_id: UserId,
    provider: P,
    policy: ReportPolicy,
}

impl<P> fmt::Debug for PositionReporter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionReporter")
            .field("convoy_id", &self.convoy_id)
            .field("user_id", &self.user_id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<P: LocationProvider> PositionReporter<P> {
    pub fn new(
        service: Arc<ConvoyService>,
        convoy_id: ConvoyId,
        user_id: UserId,
        provider: P,
        policy: ReportPolicy,
    ) -> Self {
        Self {
            service,
            convoy_id,
            user_id,
            provider,
            policy,
        }
    }

    /// Run until the provider is exhausted or `shutdown` fires. Permission
    /// loss and membership loss end the reporter with an error.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ReportSummary, ReporterError> {
        let mut summary = ReportSummary::default();
        let mut last: Option<(Coordinate, Instant)> = None;

        loop {
            let heartbeat_at = last.map(|(_, at)| at + self.policy.heartbeat);

            let sample = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                sample = self.provider.next_sample() => sample,
                _ = sleep_until_opt(heartbeat_at) => {
                    if let Some((coordinate, _)) = last {
                        debug!(convoy = %self.convoy_id, user = %self.user_id, "heartbeat position");
                        self.report(coordinate).await?;
                        summary.reported += 1;
                        last = Some((coordinate, Instant::now()));
                    }
                    continue;
                }
            };

            let sample = match sample {
                Ok(Some(sample)) => sample,
                Ok(None) => break,
                Err(LocationError::PermissionDenied) => {
                    warn!(user = %self.user_id, "location permission denied, stopping reporter");
                    return Err(LocationError::PermissionDenied.into());
                }
                Err(LocationError::Unavailable(reason)) => {
                    warn!(user = %self.user_id, %reason, "location unavailable");
                    continue;
                }
            };

            let coordinate = match sample.coordinate() {
                Ok(coordinate) => coordinate,
                Err(err) => {
                    warn!(user = %self.user_id, error = %err, "discarding invalid location sample");
                    summary.invalid += 1;
                    continue;
                }
            };

            let now = Instant::now();
            let due = match last {
                None => true,
                Some((previous, at)) => {
                    previous.distance_meters(&coordinate) >= self.policy.min_distance_meters
                        || now.saturating_duration_since(at) >= self.policy.heartbeat
                }
            };

            if !due {
                summary.suppressed += 1;
                continue;
            }

            self.report(coordinate).await?;
            summary.reported += 1;
            last = Some((coordinate, now));
        }

        info!(
            convoy = %self.convoy_id,
            user = %self.user_id,
            reported = summary.reported,
            "position reporter finished"
        );
        Ok(summary)
    }

    async fn report(&self, coordinate: Coordinate) -> Result<(), ReporterError> {
        match self
            .service
            .update_position(
                &self.convoy_id,
                &self.user_id,
                coordinate.latitude,
                coordinate.longitude,
            )
            .await
        {
            Ok(_) => Ok(()),
            // Busy convoy, the next sample or heartbeat tries again
            Err(ConvoyError::ServiceUnavailable(reason)) => {
                warn!(convoy = %self.convoy_id, %reason, "position report deferred");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
