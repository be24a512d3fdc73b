//! Lobby presence: two trackers over one directory, and the async service.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use quickdraw_sync::clock::ManualClock;
use quickdraw_sync::{
    InMemoryDirectory, PresenceConfig, PresenceEvent, PresenceService, PresenceTracker,
    SessionDirectory,
};
use tokio::sync::mpsc::UnboundedReceiver;
use web_time::Duration;

use crate::common::TestConfig;

type Tracker = PresenceTracker<TestConfig>;

#[test]
fn heartbeats_decide_life_and_death() {
    let dir = InMemoryDirectory::new();
    dir.join(1u32);
    dir.join(2u32);
    let mut host = Tracker::new(1, PresenceConfig::default()).unwrap();
    let mut guest = Tracker::new(2, PresenceConfig::default()).unwrap();

    guest.publish_heartbeat(&dir, 100).unwrap();
    host.on_members_changed(&dir);
    assert_eq!(
        host.events().collect::<Vec<_>>(),
        vec![
            PresenceEvent::Joined(1),
            PresenceEvent::Joined(2),
            PresenceEvent::HeartbeatReceived {
                member: 2,
                unix_seconds: 100
            },
            PresenceEvent::OwnerChanged { owner: Some(1) },
        ]
    );
    assert_eq!(host.opponent(), Some(&2));

    host.check_liveness(104);
    assert!(host.events().next().is_none());
    host.check_liveness(105);
    assert_eq!(host.events().collect::<Vec<_>>(), vec![PresenceEvent::Died(2)]);
    assert!(host.record(&2).unwrap().is_dead);
    host.check_liveness(120);
    assert!(host.events().next().is_none(), "died twice");

    guest.publish_heartbeat(&dir, 106).unwrap();
    host.refresh_attributes(&dir);
    host.check_liveness(106);
    assert_eq!(
        host.events().collect::<Vec<_>>(),
        vec![
            PresenceEvent::HeartbeatReceived {
                member: 2,
                unix_seconds: 106
            },
            PresenceEvent::Revived(2),
        ]
    );
}

#[test]
fn ready_flags_and_owner_migration() {
    let dir = InMemoryDirectory::new();
    dir.join(1u32);
    dir.join(2u32);
    let mut host = Tracker::new(1, PresenceConfig::default()).unwrap();
    let mut guest = Tracker::new(2, PresenceConfig::default()).unwrap();
    host.on_members_changed(&dir);
    guest.on_members_changed(&dir);
    host.events().for_each(drop);
    guest.events().for_each(drop);

    host.set_ready(&dir, true).unwrap();
    guest.set_ready(&dir, true).unwrap();
    assert!(!host.all_ready());
    host.refresh_attributes(&dir);
    assert!(host.all_ready());
    assert_eq!(
        host.events().collect::<Vec<_>>(),
        vec![
            PresenceEvent::ReadyChanged {
                member: 1,
                ready: true
            },
            PresenceEvent::ReadyChanged {
                member: 2,
                ready: true
            },
        ]
    );

    dir.leave(&1);
    guest.on_members_changed(&dir);
    assert_eq!(
        guest.events().collect::<Vec<_>>(),
        vec![
            PresenceEvent::Left(1),
            PresenceEvent::OwnerChanged { owner: Some(2) },
        ]
    );
    assert!(dir.is_owner(&2));
    assert_eq!(guest.opponent(), None);
}

async fn wait_for(
    rx: &mut UnboundedReceiver<PresenceEvent<u32>>,
    wanted: &PresenceEvent<u32>,
) -> bool {
    let found = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(event) = rx.recv().await {
            if &event == wanted {
                return true;
            }
        }
        false
    })
    .await;
    found.unwrap_or(false)
}

#[tokio::test(start_paused = true)]
async fn exited_peer_is_declared_dead() {
    let dir = Arc::new(InMemoryDirectory::new());
    dir.join(1u32);
    dir.join(2u32);
    let clock = ManualClock::new(1_000);

    let (mut host, mut host_rx) = PresenceService::<TestConfig, _>::new(
        1,
        Arc::clone(&dir),
        PresenceConfig::default(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    let (mut guest, _guest_rx) = PresenceService::<TestConfig, _>::new(
        2,
        Arc::clone(&dir),
        PresenceConfig::default(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    host.enter().unwrap();
    guest.enter().unwrap();

    let first = PresenceEvent::HeartbeatReceived {
        member: 2,
        unix_seconds: 1_000,
    };
    assert!(wait_for(&mut host_rx, &first).await);

    guest.exit();
    clock.advance(5);
    assert!(wait_for(&mut host_rx, &PresenceEvent::Died(2)).await);
    assert!(host.with_tracker(|t| t.record(&2).unwrap().is_dead));
    host.exit();
}

#[tokio::test(start_paused = true)]
async fn exit_stops_heartbeats() {
    let dir = Arc::new(InMemoryDirectory::new());
    dir.join(1u32);
    let clock = ManualClock::new(50);
    let (mut svc, _rx) = PresenceService::<TestConfig, _>::new(
        1,
        Arc::clone(&dir),
        PresenceConfig::default(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    svc.enter().unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let published = dir.writes();
    assert!(published >= 3, "only {published} heartbeats");

    svc.exit();
    assert!(!svc.is_running());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(dir.writes(), published);
}

#[tokio::test(start_paused = true)]
async fn failed_publishes_are_retried() {
    let dir = Arc::new(InMemoryDirectory::new());
    dir.join(1u32);
    dir.set_fail_writes(true);
    let clock = ManualClock::new(7);
    let (mut svc, _rx) = PresenceService::<TestConfig, _>::new(
        1,
        Arc::clone(&dir),
        PresenceConfig::default(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    svc.enter().unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(dir.writes(), 0);

    dir.set_fail_writes(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(dir.writes() >= 1);
    assert_eq!(dir.member_attribute(&1, "HB").as_deref(), Some("7"));
    svc.exit();
}
