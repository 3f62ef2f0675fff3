//! # Convoy Core
//!
//! Core library for the convoy presence service: a group of members shares
//! live positions and a single destination, and every member sees the
//! others move in near real time.
//!
//! ## Overview
//!
//! - **Positions**: last known position per member, partitioned by convoy
//! - **Membership**: explicit join/leave with the shared destination
//! - **Presence**: periodic eviction of members that stopped reporting
//! - **Fan-out**: ordered, non-blocking push of convoy events to subscribers
//! - **Address lookup**: free-text destinations resolved through Nominatim
//! - **Client capabilities**: location providers, a position reporter and a
//!   map view folded from the event stream
//!
//! ## Architecture
//!
//! - [`position_store`]: `(convoy, user) -> position` table
//! - [`registry`]: convoy membership and destination
//! - [`locks`]: per-convoy serialization of mutations
//! - [`presence`]: staleness-driven eviction
//! - [`fanout`]: subscriptions and event delivery
//! - [`service`]: the request surface tying the above together
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use convoy_core::{ConvoyId, ConvoyService, DisabledLookup, ServiceSettings, UserId};
//!
//! async fn roadtrip() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConvoyService::new(ServiceSettings::default(), Arc::new(DisabledLookup));
//!     let convoy = ConvoyId::parse("roadtrip")?;
//!     let alice = UserId::parse("u1")?;
//!
//!     let (snapshot, mut events) = service.connect(&convoy, &alice, "Alice").await?;
//!     assert!(snapshot.destination.is_none());
//!
//!     service.update_position(&convoy, &alice, 48.8566, 2.3522).await?;
//!     while let Some(event) = events.events.recv().await {
//!         println!("{}", event.kind());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod convoy;
pub mod error;
pub mod fanout;
/// Address lookup adapters
pub mod geocode;
pub mod location;
pub mod locks;
pub mod position_store;
pub mod presence;
pub mod registry;
pub mod service;
pub mod settings;
pub mod types;
/// Client-side convoy view and renderers
pub mod view;

pub use convoy::{
    ConvoyEvent, ConvoySnapshot, DestinationInput, LeaveReason, MemberView, PositionRecord,
};
pub use error::{ConvoyError, Result};
pub use fanout::{FanoutHub, FanoutStats, Subscription, SubscriptionId};
pub use geocode::{AddressLookup, DisabledLookup, LookupError, NominatimLookup, StaticLookup};
pub use location::{
    FixedLocationProvider, LocationError, LocationProvider, LocationSample, PositionReporter,
    ReportPolicy, ReporterError, ScriptedLocationProvider,
};
pub use presence::{PresenceMonitor, TickReport};
pub use service::{ConvoyService, ServiceStats};
pub use settings::{PresenceSettings, ServiceSettings};
pub use types::{ConvoyId, Coordinate, UserId};
pub use view::{ConvoyView, MapRenderer, Marker, MarkerKind, SidePanelRenderer};
