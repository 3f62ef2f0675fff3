use dashmap::DashMap;
use serde::Serialize;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::convoy::{ConvoyEvent, ConvoySnapshot};
use crate::error::{ConvoyError, Result};
use crate::position_store::PositionStore;
use crate::registry::ConvoyRegistry;
use crate::types::{ConvoyId, UserId};

pub type SubscriptionId = Uuid;

/// Receiving end of a convoy subscription. The first event is always a
/// `Snapshot`. When the channel closes the subscriber was dropped (left,
/// fell behind, or the convoy closed) and must re-subscribe.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub convoy_id: ConvoyId,
    pub events: mpsc::Receiver<ConvoyEvent>,
}

struct Subscriber {
    convoy_id: ConvoyId,
    member: Option<UserId>,
    sender: mpsc::Sender<ConvoyEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanoutStats {
    /// Live subscriptions across all convoys
    pub subscribers: usize,
    /// Events queued to a subscriber since start
    pub delivered: u64,
    /// Subscribers removed because their channel was full or closed
    pub dropped: u64,
}

/// Publish/subscribe layer mirroring the registry and position store.
///
/// Publishing never waits on a subscriber: events are `try_send`-ed into
/// bounded per-subscriber channels and a subscriber whose channel is full or
/// closed is removed on the spot.
pub struct FanoutHub {
    registry: Arc<ConvoyRegistry>,
    positions: Arc<PositionStore>,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    /// convoy -> subscriptions, in subscription order
    rooms: DashMap<ConvoyId, Vec<SubscriptionId>>,
    buffer: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl fmt::Debug for FanoutHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutHub")
            .field("subscriber_count", &self.subscribers.len())
            .field("room_count", &self.rooms.len())
            .field("buffer", &self.buffer)
            .field("delivered", &self.delivered.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl FanoutHub {
    pub fn new(
        registry: Arc<ConvoyRegistry>,
        positions: Arc<PositionStore>,
        buffer: usize,
    ) -> Self {
        Self {
            registry,
            positions,
            subscribers: DashMap::new(),
            rooms: DashMap::new(),
            buffer: buffer.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self, convoy_id: &ConvoyId) -> Option<ConvoySnapshot> {
        if !self.registry.contains(convoy_id) {
            return None;
        }

        Some(ConvoySnapshot {
            convoy_id: convoy_id.clone(),
            members: self.registry.member_views(convoy_id),
            positions: self.positions.list_by_convoy(convoy_id),
            destination: self.registry.destination(convoy_id),
        })
    }

    /// Register a subscriber and queue the current snapshot as its first
    /// event. `member` tags the subscription so it is dropped when that
    /// member leaves.
    pub fn subscribe(&self, convoy_id: &ConvoyId, member: Option<UserId>) -> Result<Subscription> {
        let snapshot = self
            .snapshot(convoy_id)
            .ok_or_else(|| ConvoyError::UnknownConvoy(convoy_id.clone()))?;

        let (sender, events) = mpsc::channel(self.buffer);
        sender
            .try_send(ConvoyEvent::Snapshot { snapshot })
            .map_err(|e| ConvoyError::ServiceUnavailable(format!("snapshot not queued: {e}")))?;

        let id = Uuid::now_v7();
        self.subscribers.insert(
            id,
            Subscriber {
                convoy_id: convoy_id.clone(),
                member,
                sender,
            },
        );
        self.rooms.entry(convoy_id.clone()).or_default().push(id);

        debug!(convoy = %convoy_id, subscription = %id, "subscriber registered");

        Ok(Subscription {
            id,
            convoy_id: convoy_id.clone(),
            events,
        })
    }

    /// Idempotent
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, subscriber)) = self.subscribers.remove(&id) else {
            return false;
        };

        if let Some(mut room) = self.rooms.get_mut(&subscriber.convoy_id) {
            room.retain(|existing| existing != &id);
        }
        self.rooms
            .remove_if(&subscriber.convoy_id, |_, room| room.is_empty());

        true
    }

    /// Drop every subscription tagged with this member
    pub fn unsubscribe_member(&self, convoy_id: &ConvoyId, user_id: &UserId) -> usize {
        let tagged: Vec<SubscriptionId> = self
            .room_ids(convoy_id)
            .into_iter()
            .filter(|id| {
                self.subscribers
                    .get(id)
                    .is_some_and(|s| s.member.as_ref() == Some(user_id))
            })
            .collect();

        tagged.into_iter().filter(|id| self.unsubscribe(*id)).count()
    }

    /// Deliver to every subscriber of the convoy. Returns the number of
    /// subscribers that accepted the event.
    pub fn publish(&self, convoy_id: &ConvoyId, event: ConvoyEvent) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for id in self.room_ids(convoy_id) {
            let Some(subscriber) = self.subscribers.get(&id) else {
                // Unsubscribed mid-delivery
                continue;
            };

            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        convoy = %convoy_id,
                        subscription = %id,
                        event = event.kind(),
                        "subscriber delivery failure: buffer full, dropping subscriber"
                    );
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        convoy = %convoy_id,
                        subscription = %id,
                        "subscriber delivery failure: receiver gone"
                    );
                    failed.push(id);
                }
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(failed.len() as u64, Ordering::Relaxed);

        for id in failed {
            self.unsubscribe(id);
        }

        delivered
    }

    /// Announce the convoy is gone and release all of its subscriptions
    pub fn close_convoy(&self, convoy_id: &ConvoyId) {
        self.publish(convoy_id, ConvoyEvent::ConvoyClosed);
        for id in self.room_ids(convoy_id) {
            self.unsubscribe(id);
        }
    }

    pub fn subscriber_count(&self, convoy_id: &ConvoyId) -> usize {
        self.rooms
            .get(convoy_id)
            .map(|room| room.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            subscribers: self.subscribers.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn room_ids(&self, convoy_id: &ConvoyId) -> Vec<SubscriptionId> {
        self.rooms
            .get(convoy_id)
            .map(|room| room.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convoy::{LeaveReason, PositionRecord};
    use crate::types::Coordinate;

    struct Fixture {
        registry: Arc<ConvoyRegistry>,
        positions: Arc<PositionStore>,
        hub: FanoutHub,
        convoy: ConvoyId,
    }

    fn fixture(buffer: usize) -> Fixture {
        let positions = Arc::new(PositionStore::new());
        let registry = Arc::new(ConvoyRegistry::new(positions.clone()));
        let hub = FanoutHub::new(registry.clone(), positions.clone(), buffer);
        let convoy = ConvoyId::parse("roadtrip").unwrap();
        registry.join(&convoy, &user("u1"), "Alice");
        Fixture {
            registry,
            positions,
            hub,
            convoy,
        }
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn left(id: &str) -> ConvoyEvent {
        ConvoyEvent::MemberLeft {
            user_id: user(id),
            reason: LeaveReason::Left,
        }
    }

    #[test]
    fn subscribe_delivers_snapshot_first() {
        let f = fixture(8);
        f.positions.upsert(
            &f.convoy,
            PositionRecord::new(user("u1"), "Alice", Coordinate::new(1.0, 2.0).unwrap()),
        );

        let mut sub = f.hub.subscribe(&f.convoy, None).unwrap();
        match sub.events.try_recv().unwrap() {
            ConvoyEvent::Snapshot { snapshot } => {
                assert_eq!(snapshot.member_ids(), vec![user("u1")]);
                assert_eq!(snapshot.positions.len(), 1);
                assert_eq!(snapshot.destination, None);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn subscribing_to_unknown_convoy_fails() {
        let f = fixture(8);
        let unknown = ConvoyId::parse("nowhere").unwrap();
        assert!(matches!(
            f.hub.subscribe(&unknown, None),
            Err(ConvoyError::UnknownConvoy(_))
        ));
    }

    #[test]
    fn publishes_arrive_in_order_for_every_subscriber() {
        let f = fixture(16);
        let mut a = f.hub.subscribe(&f.convoy, None).unwrap();
        let mut b = f.hub.subscribe(&f.convoy, None).unwrap();
        a.events.try_recv().unwrap();
        b.events.try_recv().unwrap();

        let p1 = left("x1");
        let p2 = left("x2");
        assert_eq!(f.hub.publish(&f.convoy, p1.clone()), 2);
        assert_eq!(f.hub.publish(&f.convoy, p2.clone()), 2);

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.events.try_recv().unwrap(), p1);
            assert_eq!(sub.events.try_recv().unwrap(), p2);
        }
    }

    #[test]
    fn slow_subscriber_is_dropped_without_affecting_others() {
        let f = fixture(2);
        // Never drained: snapshot already occupies one slot
        let mut slow = f.hub.subscribe(&f.convoy, None).unwrap();
        let mut fast = f.hub.subscribe(&f.convoy, None).unwrap();
        fast.events.try_recv().unwrap();

        f.hub.publish(&f.convoy, left("x1"));
        fast.events.try_recv().unwrap();
        let delivered = f.hub.publish(&f.convoy, left("x2"));

        assert_eq!(delivered, 1);
        assert_eq!(f.hub.subscriber_count(&f.convoy), 1);
        assert_eq!(fast.events.try_recv().unwrap(), left("x2"));
        assert_eq!(f.hub.stats().dropped, 1);

        // The slow subscriber sees what was buffered, then the closed channel
        assert!(matches!(
            slow.events.try_recv().unwrap(),
            ConvoyEvent::Snapshot { .. }
        ));
        assert_eq!(slow.events.try_recv().unwrap(), left("x1"));
        assert!(matches!(
            slow.events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn dropped_receiver_is_cleaned_up_on_next_publish() {
        let f = fixture(4);
        let sub = f.hub.subscribe(&f.convoy, None).unwrap();
        drop(sub);

        assert_eq!(f.hub.publish(&f.convoy, left("x1")), 0);
        assert_eq!(f.hub.subscriber_count(&f.convoy), 0);
        assert_eq!(f.hub.stats().subscribers, 0);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let f = fixture(4);
        let sub = f.hub.subscribe(&f.convoy, None).unwrap();
        assert!(f.hub.unsubscribe(sub.id));
        assert!(!f.hub.unsubscribe(sub.id));
        assert_eq!(f.hub.subscriber_count(&f.convoy), 0);
    }

    #[test]
    fn unsubscribe_member_only_drops_tagged_subscriptions() {
        let f = fixture(4);
        f.registry.join(&f.convoy, &user("u2"), "");
        let _mine = f.hub.subscribe(&f.convoy, Some(user("u1"))).unwrap();
        let _theirs = f.hub.subscribe(&f.convoy, Some(user("u2"))).unwrap();
        let _observer = f.hub.subscribe(&f.convoy, None).unwrap();

        assert_eq!(f.hub.unsubscribe_member(&f.convoy, &user("u1")), 1);
        assert_eq!(f.hub.subscriber_count(&f.convoy), 2);
    }

    #[test]
    fn close_convoy_notifies_then_releases_subscribers() {
        let f = fixture(4);
        let mut observer = f.hub.subscribe(&f.convoy, None).unwrap();
        observer.events.try_recv().unwrap();

        f.hub.close_convoy(&f.convoy);

        assert_eq!(observer.events.try_recv().unwrap(), ConvoyEvent::ConvoyClosed);
        assert!(observer.events.try_recv().is_err());
        assert_eq!(f.hub.subscriber_count(&f.convoy), 0);
    }
}
