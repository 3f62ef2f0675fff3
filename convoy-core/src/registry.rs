use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{
    collections::{BTreeMap, btree_map::Entry},
    fmt,
    sync::Arc,
};
use tokio::time::Instant;
use tracing::debug;

use crate::convoy::{MemberView, display_name_or_id};
use crate::error::{ConvoyError, Result};
use crate::position_store::PositionStore;
use crate::types::{ConvoyId, Coordinate, UserId};

#[derive(Debug, Clone)]
pub struct Membership {
    pub display_name: String,
    /// Monotonic join time, used for the never-reported grace period
    pub joined_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Convoy {
    pub convoy_id: ConvoyId,
    pub members: BTreeMap<UserId, Membership>,
    pub destination: Option<Coordinate>,
    pub created_at: DateTime<Utc>,
}

impl Convoy {
    fn new(convoy_id: ConvoyId) -> Self {
        Self {
            convoy_id,
            members: BTreeMap::new(),
            destination: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub destination: Option<Coordinate>,
    /// The convoy did not exist before this join
    pub created: bool,
    /// False when the user was already a member
    pub newly_joined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    NotMember,
    Removed { convoy_closed: bool },
}

/// Membership and destination per convoy.
///
/// Removing a member here also removes its position record, so the two
/// tables cannot drift apart.
pub struct ConvoyRegistry {
    convoys: DashMap<ConvoyId, Convoy>,
    positions: Arc<PositionStore>,
}

impl fmt::Debug for ConvoyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvoyRegistry")
            .field("convoy_count", &self.convoys.len())
            .finish()
    }
}

impl ConvoyRegistry {
    pub fn new(positions: Arc<PositionStore>) -> Self {
        Self {
            convoys: DashMap::new(),
            positions,
        }
    }

    pub fn join(&self, convoy_id: &ConvoyId, user_id: &UserId, display_name: &str) -> JoinOutcome {
        let display_name = display_name_or_id(display_name, user_id);
        let mut created = false;

        let mut convoy = self.convoys.entry(convoy_id.clone()).or_insert_with(|| {
            created = true;
            Convoy::new(convoy_id.clone())
        });

        let newly_joined = match convoy.members.entry(user_id.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().display_name = display_name;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Membership {
                    display_name,
                    joined_at: Instant::now(),
                });
                true
            }
        };

        if created {
            debug!(convoy = %convoy_id, user = %user_id, "convoy created");
        }

        JoinOutcome {
            destination: convoy.destination,
            created,
            newly_joined,
        }
    }

    /// Best-effort: unknown convoys and users are a no-op
    pub fn leave(&self, convoy_id: &ConvoyId, user_id: &UserId) -> LeaveOutcome {
        let removed = self
            .convoys
            .get_mut(convoy_id)
            .map(|mut convoy| convoy.members.remove(user_id).is_some())
            .unwrap_or(false);

        if !removed {
            return LeaveOutcome::NotMember;
        }

        self.positions.remove(convoy_id, user_id);

        let convoy_closed = self
            .convoys
            .remove_if(convoy_id, |_, convoy| convoy.members.is_empty())
            .is_some();

        if convoy_closed {
            self.positions.remove_convoy(convoy_id);
            debug!(convoy = %convoy_id, "convoy emptied and removed");
        }

        LeaveOutcome::Removed { convoy_closed }
    }

    pub fn set_destination(&self, convoy_id: &ConvoyId, coordinate: Coordinate) -> Result<()> {
        match self.convoys.get_mut(convoy_id) {
            Some(mut convoy) if !convoy.members.is_empty() => {
                convoy.destination = Some(coordinate);
                Ok(())
            }
            _ => Err(ConvoyError::UnknownConvoy(convoy_id.clone())),
        }
    }

    pub fn get_members(&self, convoy_id: &ConvoyId) -> Vec<UserId> {
        self.convoys
            .get(convoy_id)
            .map(|convoy| convoy.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn memberships(&self, convoy_id: &ConvoyId) -> Vec<(UserId, Membership)> {
        self.convoys
            .get(convoy_id)
            .map(|convoy| {
                convoy
                    .members
                    .iter()
                    .map(|(id, membership)| (id.clone(), membership.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn member_views(&self, convoy_id: &ConvoyId) -> Vec<MemberView> {
        self.memberships(convoy_id)
            .into_iter()
            .map(|(user_id, membership)| MemberView {
                user_id,
                display_name: membership.display_name,
            })
            .collect()
    }

    pub fn membership(&self, convoy_id: &ConvoyId, user_id: &UserId) -> Option<Membership> {
        self.convoys
            .get(convoy_id)
            .and_then(|convoy| convoy.members.get(user_id).cloned())
    }

    pub fn is_member(&self, convoy_id: &ConvoyId, user_id: &UserId) -> bool {
        self.convoys
            .get(convoy_id)
            .is_some_and(|convoy| convoy.members.contains_key(user_id))
    }

    pub fn contains(&self, convoy_id: &ConvoyId) -> bool {
        self.convoys.contains_key(convoy_id)
    }

    pub fn destination(&self, convoy_id: &ConvoyId) -> Option<Coordinate> {
        self.convoys
            .get(convoy_id)
            .and_then(|convoy| convoy.destination)
    }

    pub fn convoy_ids(&self) -> Vec<ConvoyId> {
        self.convoys.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn convoy_count(&self) -> usize {
        self.convoys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convoy::PositionRecord;

    fn setup() -> (ConvoyRegistry, Arc<PositionStore>) {
        let positions = Arc::new(PositionStore::new());
        (ConvoyRegistry::new(positions.clone()), positions)
    }

    fn ids(convoy: &str, user: &str) -> (ConvoyId, UserId) {
        (ConvoyId::parse(convoy).unwrap(), UserId::parse(user).unwrap())
    }

    #[test]
    fn first_join_creates_convoy_without_destination() {
        let (registry, _) = setup();
        let (c, u1) = ids("roadtrip", "u1");

        let outcome = registry.join(&c, &u1, "Alice");
        assert_eq!(
            outcome,
            JoinOutcome {
                destination: None,
                created: true,
                newly_joined: true
            }
        );
        assert_eq!(registry.get_members(&c), vec![u1]);
    }

    #[test]
    fn repeated_join_is_idempotent_and_refreshes_name() {
        let (registry, _) = setup();
        let (c, u1) = ids("roadtrip", "u1");

        registry.join(&c, &u1, "Alice");
        let again = registry.join(&c, &u1, "Alice B.");

        assert!(!again.created);
        assert!(!again.newly_joined);
        assert_eq!(registry.get_members(&c).len(), 1);
        assert_eq!(registry.membership(&c, &u1).unwrap().display_name, "Alice B.");
    }

    #[test]
    fn join_returns_existing_destination() {
        let (registry, _) = setup();
        let (c, u1) = ids("roadtrip", "u1");
        let u2 = UserId::parse("u2").unwrap();
        let eiffel = Coordinate::new(48.8584, 2.2945).unwrap();

        registry.join(&c, &u1, "");
        registry.set_destination(&c, eiffel).unwrap();

        assert_eq!(registry.join(&c, &u2, "").destination, Some(eiffel));
    }

    #[test]
    fn last_leave_deletes_convoy_destination_and_positions() {
        let (registry, positions) = setup();
        let (c, u1) = ids("roadtrip", "u1");

        registry.join(&c, &u1, "");
        registry
            .set_destination(&c, Coordinate::new(1.0, 1.0).unwrap())
            .unwrap();
        positions.upsert(
            &c,
            PositionRecord::new(u1.clone(), "", Coordinate::new(2.0, 2.0).unwrap()),
        );

        assert_eq!(
            registry.leave(&c, &u1),
            LeaveOutcome::Removed {
                convoy_closed: true
            }
        );
        assert!(!registry.contains(&c));
        assert!(positions.list_by_convoy(&c).is_empty());

        // Rejoining starts from a fresh convoy
        let rejoin = registry.join(&c, &u1, "");
        assert!(rejoin.created);
        assert_eq!(rejoin.destination, None);
    }

    #[test]
    fn leave_twice_matches_leave_once() {
        let (registry, _) = setup();
        let (c, u1) = ids("roadtrip", "u1");
        let u2 = UserId::parse("u2").unwrap();

        registry.join(&c, &u1, "");
        registry.join(&c, &u2, "");

        assert_eq!(
            registry.leave(&c, &u1),
            LeaveOutcome::Removed {
                convoy_closed: false
            }
        );
        let members_after_first = registry.get_members(&c);
        assert_eq!(registry.leave(&c, &u1), LeaveOutcome::NotMember);
        assert_eq!(registry.get_members(&c), members_after_first);
    }

    #[test]
    fn leave_of_unknown_convoy_is_a_no_op() {
        let (registry, _) = setup();
        let (c, u1) = ids("nowhere", "u1");
        assert_eq!(registry.leave(&c, &u1), LeaveOutcome::NotMember);
    }

    #[test]
    fn set_destination_on_unknown_convoy_fails() {
        let (registry, _) = setup();
        let (c, _) = ids("nowhere", "u1");
        let err = registry
            .set_destination(&c, Coordinate::new(0.0, 0.0).unwrap())
            .unwrap_err();
        assert_eq!(err, ConvoyError::UnknownConvoy(c));
    }

    #[test]
    fn destination_is_last_write_wins() {
        let (registry, _) = setup();
        let (c, u1) = ids("roadtrip", "u1");
        registry.join(&c, &u1, "");

        let first = Coordinate::new(1.0, 1.0).unwrap();
        let second = Coordinate::new(2.0, 2.0).unwrap();
        registry.set_destination(&c, first).unwrap();
        registry.set_destination(&c, second).unwrap();

        assert_eq!(registry.destination(&c), Some(second));
    }
}
