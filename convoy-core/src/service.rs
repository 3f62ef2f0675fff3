use serde::Serialize;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

use crate::convoy::{ConvoyEvent, ConvoySnapshot, DestinationInput, LeaveReason, PositionRecord};
use crate::error::{ConvoyError, Result};
use crate::fanout::{FanoutHub, Subscription, SubscriptionId};
use crate::geocode::{AddressLookup, LookupError};
use crate::locks::ConvoyLocks;
use crate::position_store::PositionStore;
use crate::presence::{PresenceMonitor, retire_member};
use crate::registry::ConvoyRegistry;
use crate::settings::{PresenceSettings, ServiceSettings};
use crate::types::{ConvoyId, Coordinate, UserId};

/// A transport failure gets this many lookup attempts in total
const LOOKUP_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// Convoys with at least one member
    pub convoys: usize,
    /// Live subscriptions
    pub subscribers: usize,
    /// Events handed to subscribers
    pub delivered: u64,
    /// Subscribers dropped for falling behind
    pub dropped: u64,
}

/// Request surface of the convoy service.
///
/// Every mutation takes the convoy's lock, mutates the registry or the
/// position store, and publishes to the hub before releasing it. The hub
/// therefore sees publishes in the same order as the mutations.
pub struct ConvoyService {
    positions: Arc<PositionStore>,
    registry: Arc<ConvoyRegistry>,
    hub: Arc<FanoutHub>,
    locks: Arc<ConvoyLocks>,
    lookup: Arc<dyn AddressLookup>,
    settings: ServiceSettings,
}

impl fmt::Debug for ConvoyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvoyService")
            .field("registry", &self.registry)
            .field("hub", &self.hub)
            .field("locks", &self.locks)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ConvoyService {
    pub fn new(settings: ServiceSettings, lookup: Arc<dyn AddressLookup>) -> Self {
        let positions = Arc::new(PositionStore::new());
        let registry = Arc::new(ConvoyRegistry::new(positions.clone()));
        let hub = Arc::new(FanoutHub::new(
            registry.clone(),
            positions.clone(),
            settings.subscriber_buffer,
        ));
        let locks = Arc::new(ConvoyLocks::new(settings.lock_timeout));

        Self {
            positions,
            registry,
            hub,
            locks,
            lookup,
            settings,
        }
    }

    /// Settings this service was built with
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Join without opening a subscription. Re-joining only refreshes the
    /// display name and publishes nothing.
    pub async fn join(
        &self,
        convoy_id: &ConvoyId,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<ConvoySnapshot> {
        let _guard = self.locks.acquire(convoy_id).await?;
        self.join_locked(convoy_id, user_id, display_name)
    }

    /// Join and subscribe in one step, so no event can fall between the
    /// snapshot and the start of the stream.
    pub async fn connect(
        &self,
        convoy_id: &ConvoyId,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<(ConvoySnapshot, Subscription)> {
        let _guard = self.locks.acquire(convoy_id).await?;
        let snapshot = self.join_locked(convoy_id, user_id, display_name)?;
        let subscription = self.hub.subscribe(convoy_id, Some(user_id.clone()))?;
        Ok((snapshot, subscription))
    }

    fn join_locked(
        &self,
        convoy_id: &ConvoyId,
        user_id: &UserId,
        display_name: &str,
    ) -> Result<ConvoySnapshot> {
        let outcome = self.registry.join(convoy_id, user_id, display_name);

        if outcome.newly_joined {
            let display_name = self
                .registry
                .membership(convoy_id, user_id)
                .map(|m| m.display_name)
                .unwrap_or_else(|| user_id.to_string());

            info!(convoy = %convoy_id, user = %user_id, created = outcome.created, "member joined");
            self.hub.publish(
                convoy_id,
                ConvoyEvent::MemberJoined {
                    user_id: user_id.clone(),
                    display_name,
                },
            );
        }

        self.hub
            .snapshot(convoy_id)
            .ok_or_else(|| ConvoyError::UnknownConvoy(convoy_id.clone()))
    }

    /// Open a subscription on an existing convoy. When `member` is given the
    /// subscription is tied to that member and ends when it leaves.
    pub async fn subscribe(
        &self,
        convoy_id: &ConvoyId,
        member: Option<UserId>,
    ) -> Result<Subscription> {
        let _guard = self.locks.acquire(convoy_id).await?;

        if let Some(user_id) = &member
            && self.registry.contains(convoy_id)
            && !self.registry.is_member(convoy_id, user_id)
        {
            return Err(ConvoyError::NotAMember {
                convoy_id: convoy_id.clone(),
                user_id: user_id.clone(),
            });
        }

        self.hub.subscribe(convoy_id, member)
    }

    /// Drop a subscription. Membership is not affected.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Store the member's latest position and publish it. Coordinates are
    /// validated before the lock is taken.
    pub async fn update_position(
        &self,
        convoy_id: &ConvoyId,
        user_id: &UserId,
        latitude: f64,
        longitude: f64,
    ) -> Result<PositionRecord> {
        let coordinate = Coordinate::new(latitude, longitude)?;

        let _guard = self.locks.acquire(convoy_id).await?;

        let membership = self.registry.membership(convoy_id, user_id).ok_or_else(|| {
            ConvoyError::NotAMember {
                convoy_id: convoy_id.clone(),
                user_id: user_id.clone(),
            }
        })?;

        let record = self.positions.upsert(
            convoy_id,
            PositionRecord::new(user_id.clone(), &membership.display_name, coordinate),
        );

        self.hub.publish(
            convoy_id,
            ConvoyEvent::PositionUpdated {
                user_id: user_id.clone(),
                record: record.clone(),
            },
        );

        Ok(record)
    }

    /// Resolve and store the convoy destination. Address lookup runs before
    /// the convoy lock is taken; failures leave the convoy untouched.
    pub async fn set_destination(
        &self,
        convoy_id: &ConvoyId,
        input: DestinationInput,
    ) -> Result<Coordinate> {
        if !self.registry.contains(convoy_id) {
            return Err(ConvoyError::UnknownConvoy(convoy_id.clone()));
        }

        let coordinate = match input {
            DestinationInput::Coordinate(coordinate) => coordinate,
            DestinationInput::Text(text) => self.resolve_address(&text).await?,
        };

        let _guard = self.locks.acquire(convoy_id).await?;
        self.registry.set_destination(convoy_id, coordinate)?;

        info!(convoy = %convoy_id, destination = %coordinate, "destination changed");
        self.hub
            .publish(convoy_id, ConvoyEvent::DestinationChanged { coordinate });

        Ok(coordinate)
    }

    async fn resolve_address(&self, text: &str) -> Result<Coordinate> {
        let timeout = self.settings.lookup_timeout;
        let mut attempt = 1;

        loop {
            match tokio::time::timeout(timeout, self.lookup.lookup(text)).await {
                Err(_) | Ok(Err(LookupError::Timeout)) => {
                    warn!(query = text, ?timeout, "address lookup timed out");
                    return Err(ConvoyError::AddressLookupTimeout(timeout));
                }
                Ok(Ok(Some(coordinate))) => {
                    debug!(query = text, %coordinate, "address resolved");
                    return Ok(coordinate);
                }
                Ok(Ok(None)) => return Err(ConvoyError::AddressNotFound(text.to_string())),
                Ok(Err(err)) if err.is_transient() && attempt < LOOKUP_ATTEMPTS => {
                    warn!(query = text, attempt, error = %err, "address lookup failed, retrying");
                    attempt += 1;
                }
                Ok(Err(err)) => {
                    warn!(query = text, attempt, error = %err, "address lookup failed");
                    return Err(ConvoyError::ServiceUnavailable(err.to_string()));
                }
            }
        }
    }

    /// Idempotent. Returns whether the user was a member.
    pub async fn leave(&self, convoy_id: &ConvoyId, user_id: &UserId) -> Result<bool> {
        let _guard = self.locks.acquire(convoy_id).await?;

        let removed = retire_member(
            &self.registry,
            &self.hub,
            convoy_id,
            user_id,
            LeaveReason::Left,
        );
        if removed {
            info!(convoy = %convoy_id, user = %user_id, "member left");
        }

        Ok(removed)
    }

    /// Current members, positions and destination
    pub fn snapshot(&self, convoy_id: &ConvoyId) -> Result<ConvoySnapshot> {
        self.hub
            .snapshot(convoy_id)
            .ok_or_else(|| ConvoyError::UnknownConvoy(convoy_id.clone()))
    }

    /// Monitor sharing this service's state and locks
    pub fn presence_monitor(&self, settings: PresenceSettings) -> Arc<PresenceMonitor> {
        Arc::new(PresenceMonitor::new(
            self.positions.clone(),
            self.registry.clone(),
            self.hub.clone(),
            self.locks.clone(),
            settings,
        ))
    }

    /// Counters for the health endpoint
    pub fn stats(&self) -> ServiceStats {
        let fanout = self.hub.stats();
        ServiceStats {
            convoys: self.registry.convoy_count(),
            subscribers: fanout.subscribers,
            delivered: fanout.delivered,
            dropped: fanout.dropped,
        }
    }
}
