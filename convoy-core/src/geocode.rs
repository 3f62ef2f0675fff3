use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, fmt, time::Duration};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::types::Coordinate;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_USER_AGENT: &str = concat!("convoy-server/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum LookupError {
    /// Network or HTTP-level failure, worth one retry
    #[error("address lookup transport failure: {0}")]
    Transport(String),

    #[error("address lookup returned an unusable response: {0}")]
    InvalidResponse(String),

    /// The provider did not answer in time; never retried
    #[error("address lookup timed out")]
    Timeout,
}

impl LookupError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Resolves free text to at most one coordinate
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<Coordinate>, LookupError>;
}

/// OpenStreetMap Nominatim search endpoint
pub struct NominatimLookup {
    client: reqwest::Client,
    search_url: Url,
}

impl fmt::Debug for NominatimLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NominatimLookup")
            .field("search_url", &self.search_url.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    // Nominatim encodes both as strings
    lat: String,
    lon: String,
}

impl NominatimLookup {
    /// `connect_timeout` bounds connection setup only. The caller owns the
    /// deadline for the whole request.
    pub fn new(
        base_url: &Url,
        user_agent: &str,
        connect_timeout: Duration,
    ) -> Result<Self, LookupError> {
        let search_url = Url::parse(&format!(
            "{}/search",
            base_url.as_str().trim_end_matches('/')
        ))
        .map_err(|e| LookupError::InvalidResponse(format!("bad geocoder url: {e}")))?;

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        Ok(Self { client, search_url })
    }

    pub fn search_url(&self) -> &Url {
        &self.search_url
    }
}

fn transport_error(err: reqwest::Error) -> LookupError {
    if err.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Transport(err.to_string())
    }
}

fn first_coordinate(places: Vec<NominatimPlace>) -> Result<Option<Coordinate>, LookupError> {
    let Some(place) = places.into_iter().next() else {
        return Ok(None);
    };

    let latitude = place
        .lat
        .parse::<f64>()
        .map_err(|e| LookupError::InvalidResponse(format!("lat {:?}: {e}", place.lat)))?;
    let longitude = place
        .lon
        .parse::<f64>()
        .map_err(|e| LookupError::InvalidResponse(format!("lon {:?}: {e}", place.lon)))?;

    Coordinate::new(latitude, longitude)
        .map(Some)
        .map_err(|e| LookupError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl AddressLookup for NominatimLookup {
    async fn lookup(&self, query: &str) -> Result<Option<Coordinate>, LookupError> {
        debug!(query, "nominatim search");

        let response = self
            .client
            .get(self.search_url.clone())
            .query(&[("format", "json"), ("limit", "1"), ("q", query)])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LookupError::Transport(format!("nominatim returned {status}")));
        }
        if !status.is_success() {
            return Err(LookupError::InvalidResponse(format!(
                "nominatim returned {status}"
            )));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| LookupError::InvalidResponse(e.to_string()))?;

        first_coordinate(places)
    }
}

/// Fixed address table. Keys are matched case-insensitively after trimming.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    entries: HashMap<String, Coordinate>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, coordinate: Coordinate) -> Self {
        self.entries.insert(normalize(address), coordinate);
        self
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

#[async_trait]
impl AddressLookup for StaticLookup {
    async fn lookup(&self, query: &str) -> Result<Option<Coordinate>, LookupError> {
        Ok(self.entries.get(&normalize(query)).copied())
    }
}

/// Lookup turned off; every address is unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLookup;

#[async_trait]
impl AddressLookup for DisabledLookup {
    async fn lookup(&self, _query: &str) -> Result<Option<Coordinate>, LookupError> {
        Ok(None)
    }
}
