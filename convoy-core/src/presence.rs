use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::convoy::{ConvoyEvent, LeaveReason};
use crate::fanout::FanoutHub;
use crate::locks::ConvoyLocks;
use crate::position_store::PositionStore;
use crate::registry::{ConvoyRegistry, LeaveOutcome};
use crate::settings::PresenceSettings;
use crate::types::{ConvoyId, UserId};

/// Remove a member everywhere and tell the convoy about it. Must be called
/// with the convoy lock held. Returns false if the user was not a member,
/// in which case nothing is published.
pub(crate) fn retire_member(
    registry: &ConvoyRegistry,
    hub: &FanoutHub,
    convoy_id: &ConvoyId,
    user_id: &UserId,
    reason: LeaveReason,
) -> bool {
    let LeaveOutcome::Removed { convoy_closed } = registry.leave(convoy_id, user_id) else {
        return false;
    };

    hub.unsubscribe_member(convoy_id, user_id);
    hub.publish(
        convoy_id,
        ConvoyEvent::MemberLeft {
            user_id: user_id.clone(),
            reason,
        },
    );

    if convoy_closed {
        hub.close_convoy(convoy_id);
    }

    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another tick was still running
    pub skipped: bool,
    pub evicted: Vec<(ConvoyId, UserId)>,
    pub convoys_closed: usize,
}

/// Evicts members whose last position is older than the TTL, and members
/// that never reported one within the grace period.
pub struct PresenceMonitor {
    positions: Arc<PositionStore>,
    registry: Arc<ConvoyRegistry>,
    hub: Arc<FanoutHub>,
    locks: Arc<ConvoyLocks>,
    settings: PresenceSettings,
    running: AtomicBool,
}

impl fmt::Debug for PresenceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceMonitor")
            .field("settings", &self.settings)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PresenceMonitor {
    pub fn new(
        positions: Arc<PositionStore>,
        registry: Arc<ConvoyRegistry>,
        hub: Arc<FanoutHub>,
        locks: Arc<ConvoyLocks>,
        settings: PresenceSettings,
    ) -> Self {
        Self {
            positions,
            registry,
            hub,
            locks,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PresenceSettings {
        &self.settings
    }

    /// One scan over every convoy. Overlapping calls return a skipped report.
    pub async fn tick(&self) -> TickReport {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("presence tick still running, skipping");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }
        let _running = RunningGuard(&self.running);

        let mut report = TickReport::default();

        for convoy_id in self.registry.convoy_ids() {
            let _guard = match self.locks.acquire(&convoy_id).await {
                Ok(guard) => guard,
                Err(err) => {
                    warn!(convoy = %convoy_id, error = %err, "skipping convoy this tick");
                    continue;
                }
            };

            // Sampled after the lock so a long wait cannot make fresh updates look old
            let now = Instant::now();

            for (user_id, membership) in self.registry.memberships(&convoy_id) {
                let expired = match self.positions.get(&convoy_id, &user_id) {
                    Some(tracked) => PositionStore::is_stale(&tracked, now, self.settings.ttl),
                    None => {
                        now.saturating_duration_since(membership.joined_at)
                            > self.settings.grace_period
                    }
                };

                if !expired {
                    continue;
                }

                if retire_member(
                    &self.registry,
                    &self.hub,
                    &convoy_id,
                    &user_id,
                    LeaveReason::Evicted,
                ) {
                    info!(convoy = %convoy_id, user = %user_id, "evicted stale member");
                    report.evicted.push((convoy_id.clone(), user_id));
                }
            }

            if !self.registry.contains(&convoy_id) {
                report.convoys_closed += 1;
            }
        }

        let pruned = self.locks.prune();
        if pruned > 0 {
            debug!(pruned, "released idle convoy locks");
        }

        report
    }

    /// Tick on the configured interval until cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval = ?self.settings.interval,
            ttl = ?self.settings.ttl,
            grace_period = ?self.settings.grace_period,
            "presence monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.evicted.is_empty() {
                        info!(
                            evicted = report.evicted.len(),
                            convoys_closed = report.convoys_closed,
                            "presence tick complete"
                        );
                    }
                }
            }
        }

        info!("presence monitor stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convoy::PositionRecord;
    use crate::types::Coordinate;
    use std::time::Duration;

    struct Fixture {
        positions: Arc<PositionStore>,
        registry: Arc<ConvoyRegistry>,
        hub: Arc<FanoutHub>,
        monitor: Arc<PresenceMonitor>,
        convoy: ConvoyId,
    }

    fn fixture() -> Fixture {
        let positions = Arc::new(PositionStore::new());
        let registry = Arc::new(ConvoyRegistry::new(positions.clone()));
        let hub = Arc::new(FanoutHub::new(registry.clone(), positions.clone(), 32));
        let locks = Arc::new(ConvoyLocks::new(Duration::from_secs(1)));
        let monitor = Arc::new(PresenceMonitor::new(
            positions.clone(),
            registry.clone(),
            hub.clone(),
            locks,
            PresenceSettings {
                interval: Duration::from_secs(10),
                ttl: Duration::from_secs(30),
                grace_period: Duration::from_secs(30),
            },
        ));
        Fixture {
            positions,
            registry,
            hub,
            monitor,
            convoy: ConvoyId::parse("roadtrip").unwrap(),
        }
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn report_position(f: &Fixture, id: &str) {
        f.positions.upsert(
            &f.convoy,
            PositionRecord::new(user(id), id, Coordinate::new(45.0, 5.0).unwrap()),
        );
    }

    fn drain_member_left(events: &mut tokio::sync::mpsc::Receiver<ConvoyEvent>) -> Vec<UserId> {
        let mut left = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConvoyEvent::MemberLeft { user_id, reason } = event {
                assert_eq!(reason, LeaveReason::Evicted);
                left.push(user_id);
            }
        }
        left
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_members_survive_a_tick() {
        let f = fixture();
        f.registry.join(&f.convoy, &user("u1"), "");
        report_position(&f, "u1");

        tokio::time::advance(Duration::from_secs(29)).await;
        let report = f.monitor.tick().await;

        assert!(report.evicted.is_empty());
        assert!(f.registry.is_member(&f.convoy, &user("u1")));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_member_is_evicted_once_with_a_single_member_left() {
        let f = fixture();
        f.registry.join(&f.convoy, &user("u1"), "");
        f.registry.join(&f.convoy, &user("u2"), "");
        report_position(&f, "u1");
        report_position(&f, "u2");
        let mut observer = f.hub.subscribe(&f.convoy, None).unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        report_position(&f, "u2");
        tokio::time::advance(Duration::from_secs(11)).await;

        let first = f.monitor.tick().await;
        let second = f.monitor.tick().await;

        assert_eq!(first.evicted, vec![(f.convoy.clone(), user("u1"))]);
        assert!(second.evicted.is_empty());
        assert_eq!(drain_member_left(&mut observer.events), vec![user("u1")]);
        assert!(f.positions.get(&f.convoy, &user("u1")).is_none());
        assert_eq!(f.registry.get_members(&f.convoy), vec![user("u2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_member_gets_grace_period_before_eviction() {
        let f = fixture();
        f.registry.join(&f.convoy, &user("quiet"), "");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(f.monitor.tick().await.evicted.is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = f.monitor.tick().await;
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.convoys_closed, 1);
        assert!(!f.registry.contains(&f.convoy));
    }

    #[tokio::test(start_paused = true)]
    async fn evicting_last_member_closes_observer_subscriptions() {
        let f = fixture();
        f.registry.join(&f.convoy, &user("u1"), "");
        report_position(&f, "u1");
        let mut observer = f.hub.subscribe(&f.convoy, None).unwrap();
        observer.events.try_recv().unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        f.monitor.tick().await;

        assert!(matches!(
            observer.events.try_recv().unwrap(),
            ConvoyEvent::MemberLeft { .. }
        ));
        assert_eq!(observer.events.try_recv().unwrap(), ConvoyEvent::ConvoyClosed);
        assert!(observer.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_evicts_within_one_interval() {
        let f = fixture();
        f.registry.join(&f.convoy, &user("u1"), "");
        report_position(&f, "u1");

        let shutdown = CancellationToken::new();
        let handle = f.monitor.clone().spawn(shutdown.clone());

        // TTL + epsilon, then at most one more interval
        tokio::time::sleep(Duration::from_secs(31 + 10)).await;
        assert!(!f.registry.contains(&f.convoy));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let f = fixture();
        f.monitor.running.store(true, Ordering::SeqCst);
        assert!(f.monitor.tick().await.skipped);

        f.monitor.running.store(false, Ordering::SeqCst);
        assert!(!f.monitor.tick().await.skipped);
    }
}
