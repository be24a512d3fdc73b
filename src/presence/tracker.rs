//! Sans-IO presence tracking for one lobby.
//!
//! [`PresenceTracker`] turns directory snapshots and attribute reads into
//! [`PresenceEvent`]s: joins and leaves by set difference, owner changes,
//! heartbeats, ready flags, and dead/revived transitions. It never sleeps or
//! spawns; the [`PresenceService`](crate::PresenceService) drives it on
//! timers, and tests drive it by hand.
//!
//! ```
//! use quickdraw_sync::{Config, InMemoryDirectory, PresenceConfig, PresenceEvent, PresenceTracker};
//!
//! struct Lobby;
//! impl Config for Lobby {
//!     type Identity = u64;
//! }
//!
//! let dir = InMemoryDirectory::new();
//! dir.join(1);
//! dir.join(2);
//!
//! let mut tracker = PresenceTracker::<Lobby>::new(1, PresenceConfig::default())?;
//! tracker.on_members_changed(&dir);
//! let events: Vec<_> = tracker.events().collect();
//! assert!(events.contains(&PresenceEvent::Joined(2)));
//! assert_eq!(tracker.opponent(), Some(&2));
//! # Ok::<(), quickdraw_sync::QuickdrawError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::presence::directory::SessionDirectory;
use crate::report_violation_to;
use crate::sessions::event_drain::EventDrain;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{Config, PresenceConfig, QuickdrawError};

/// Last heartbeat seen from one member and whether it counts as dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberPresenceRecord {
    /// Unix seconds carried by the newest heartbeat.
    pub last_heartbeat_unix_seconds: i64,
    /// Set once the heartbeat is `dead_threshold_secs` old.
    pub is_dead: bool,
}

/// Things the tracker noticed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresenceEvent<I> {
    /// A member appeared in the snapshot.
    Joined(I),
    /// A member disappeared from the snapshot.
    Left(I),
    /// The owner differs from the previous snapshot.
    OwnerChanged {
        /// New owner, `None` if no member claims ownership.
        owner: Option<I>,
    },
    /// A fresh heartbeat was read.
    HeartbeatReceived {
        /// Whose heartbeat.
        member: I,
        /// The heartbeat's Unix seconds.
        unix_seconds: i64,
    },
    /// A member's ready flag appeared or changed.
    ReadyChanged {
        /// Whose flag.
        member: I,
        /// New value.
        ready: bool,
    },
    /// A member's heartbeat went stale.
    Died(I),
    /// A dead member's heartbeat became fresh again.
    Revived(I),
}

/// Membership, heartbeat and ready state for one lobby.
pub struct PresenceTracker<T: Config> {
    local: T::Identity,
    config: PresenceConfig,
    members: BTreeSet<T::Identity>,
    owner: Option<T::Identity>,
    records: BTreeMap<T::Identity, MemberPresenceRecord>,
    ready: BTreeMap<T::Identity, bool>,
    event_queue: VecDeque<PresenceEvent<T::Identity>>,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Config> std::fmt::Debug for PresenceTracker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("local", &self.local)
            .field("members", &self.members)
            .field("owner", &self.owner)
            .field("records", &self.records)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl<T: Config> PresenceTracker<T> {
    /// A tracker for `local` with an empty snapshot.
    ///
    /// # Errors
    /// [`QuickdrawError::InvalidConfig`] if `config` does not validate.
    pub fn new(local: T::Identity, config: PresenceConfig) -> Result<Self, QuickdrawError> {
        config.validate()?;
        Ok(Self {
            local,
            config,
            members: BTreeSet::new(),
            owner: None,
            records: BTreeMap::new(),
            ready: BTreeMap::new(),
            event_queue: VecDeque::new(),
            observer: None,
        })
    }

    /// Routes violations to `observer` instead of the tracing default.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// This side's identity.
    pub fn local(&self) -> &T::Identity {
        &self.local
    }

    /// Settings in use.
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Members of the last snapshot, in identity order.
    pub fn members(&self) -> impl Iterator<Item = &T::Identity> {
        self.members.iter()
    }

    /// Owner of the last snapshot.
    pub fn owner(&self) -> Option<&T::Identity> {
        self.owner.as_ref()
    }

    /// The one member that is not us, if any.
    pub fn opponent(&self) -> Option<&T::Identity> {
        self.members.iter().find(|m| **m != self.local)
    }

    /// Heartbeat record for `member`, if one was ever read.
    pub fn record(&self, member: &T::Identity) -> Option<MemberPresenceRecord> {
        self.records.get(member).copied()
    }

    /// `true` if `member` is in the snapshot and not dead.
    pub fn is_present(&self, member: &T::Identity) -> bool {
        self.members.contains(member) && !self.records.get(member).is_some_and(|r| r.is_dead)
    }

    /// Last ready value read for `member`.
    pub fn is_ready(&self, member: &T::Identity) -> Option<bool> {
        self.ready.get(member).copied()
    }

    /// `true` with exactly two members, both ready.
    pub fn all_ready(&self) -> bool {
        self.members.len() == 2
            && self
                .members
                .iter()
                .all(|m| self.ready.get(m).copied().unwrap_or(false))
    }

    /// Drains queued [`PresenceEvent`]s.
    pub fn events(&mut self) -> EventDrain<'_, PresenceEvent<T::Identity>> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// Forgets everything; used when entering or leaving a lobby.
    pub fn reset(&mut self) {
        trace!("presence tracker for {:?} reset", self.local);
        self.members.clear();
        self.owner = None;
        self.records.clear();
        self.ready.clear();
        self.event_queue.clear();
    }

    /// Diffs the directory's member list against the last snapshot.
    ///
    /// An empty list is treated as a transient read and ignored. Newly joined
    /// members have their attributes read right away.
    pub fn on_members_changed<D>(&mut self, directory: &D)
    where
        D: SessionDirectory<T::Identity> + ?Sized,
    {
        let listed = directory.current_members();
        if listed.is_empty() {
            return;
        }
        let current: BTreeSet<T::Identity> = listed.iter().cloned().collect();

        let joined: Vec<T::Identity> = current.difference(&self.members).cloned().collect();
        let left: Vec<T::Identity> = self.members.difference(&current).cloned().collect();
        self.members = current;

        for member in left {
            debug!("{:?} left the lobby", member);
            self.records.remove(&member);
            self.ready.remove(&member);
            self.event_queue.push_back(PresenceEvent::Left(member));
        }
        for member in joined {
            debug!("{:?} joined the lobby", member);
            self.event_queue.push_back(PresenceEvent::Joined(member.clone()));
            self.on_member_attribute_changed(directory, &member);
        }

        let owner = listed.into_iter().find(|m| directory.is_owner(m));
        if owner != self.owner {
            debug!("lobby owner {:?} -> {:?}", self.owner, owner);
            self.owner = owner.clone();
            self.event_queue.push_back(PresenceEvent::OwnerChanged { owner });
        }
    }

    /// Re-reads the heartbeat and ready attributes of `member`.
    ///
    /// Unchanged values produce no events. The local heartbeat is never
    /// tracked; the local ready flag is.
    pub fn on_member_attribute_changed<D>(&mut self, directory: &D, member: &T::Identity)
    where
        D: SessionDirectory<T::Identity> + ?Sized,
    {
        if *member != self.local {
            if let Some(raw) = directory.member_attribute(member, &self.config.heartbeat_key) {
                self.consume_heartbeat(member, &raw);
            }
        }
        if let Some(raw) = directory.member_attribute(member, &self.config.ready_key) {
            match raw.as_str() {
                "1" => self.observe_ready(member, true),
                "0" => self.observe_ready(member, false),
                other => report_violation_to!(
                    self.observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Presence,
                    "unreadable ready flag {:?} from {:?}",
                    other,
                    member
                ),
            }
        }
    }

    /// Re-reads attributes of every member in the snapshot.
    pub fn refresh_attributes<D>(&mut self, directory: &D)
    where
        D: SessionDirectory<T::Identity> + ?Sized,
    {
        let members: Vec<T::Identity> = self.members.iter().cloned().collect();
        for member in &members {
            self.on_member_attribute_changed(directory, member);
        }
    }

    fn consume_heartbeat(&mut self, member: &T::Identity, raw: &str) {
        let Ok(unix_seconds) = raw.trim().parse::<i64>() else {
            report_violation_to!(
                self.observer,
                ViolationSeverity::Warning,
                ViolationKind::Presence,
                "unreadable heartbeat {:?} from {:?}",
                raw,
                member
            );
            return;
        };
        let record = self
            .records
            .entry(member.clone())
            .or_insert(MemberPresenceRecord {
                last_heartbeat_unix_seconds: i64::MIN,
                is_dead: false,
            });
        if record.last_heartbeat_unix_seconds == unix_seconds {
            return;
        }
        record.last_heartbeat_unix_seconds = unix_seconds;
        trace!("heartbeat {} from {:?}", unix_seconds, member);
        self.event_queue.push_back(PresenceEvent::HeartbeatReceived {
            member: member.clone(),
            unix_seconds,
        });
    }

    fn observe_ready(&mut self, member: &T::Identity, ready: bool) {
        if self.ready.insert(member.clone(), ready) == Some(ready) {
            return;
        }
        debug!("{:?} ready = {}", member, ready);
        self.event_queue.push_back(PresenceEvent::ReadyChanged {
            member: member.clone(),
            ready,
        });
    }

    /// Writes the local heartbeat as `now_unix` in decimal.
    ///
    /// # Errors
    /// Whatever the directory returns. The failure is also reported; callers
    /// on a timer simply try again next tick.
    pub fn publish_heartbeat<D>(
        &mut self,
        directory: &D,
        now_unix: i64,
    ) -> Result<(), QuickdrawError>
    where
        D: SessionDirectory<T::Identity> + ?Sized,
    {
        let stamp = now_unix.to_string();
        let result =
            directory.set_member_attribute(&self.local, &self.config.heartbeat_key, &stamp);
        if let Err(err) = &result {
            report_violation_to!(
                self.observer,
                ViolationSeverity::Warning,
                ViolationKind::Presence,
                "heartbeat publish failed: {}",
                err
            );
        }
        result
    }

    /// Publishes the local ready flag and records it.
    ///
    /// # Errors
    /// Whatever the directory returns; nothing is recorded then.
    pub fn set_ready<D>(&mut self, directory: &D, ready: bool) -> Result<(), QuickdrawError>
    where
        D: SessionDirectory<T::Identity> + ?Sized,
    {
        let value = if ready { "1" } else { "0" };
        directory.set_member_attribute(&self.local, &self.config.ready_key, value)?;
        let local = self.local.clone();
        self.observe_ready(&local, ready);
        Ok(())
    }

    /// Marks members dead or alive against `now_unix`.
    ///
    /// A member is dead once `now - last_heartbeat >= dead_threshold_secs`.
    /// Members with no heartbeat yet are never dead.
    pub fn check_liveness(&mut self, now_unix: i64) {
        let threshold = self.config.dead_threshold_secs;
        for (member, record) in &mut self.records {
            let dead = now_unix.saturating_sub(record.last_heartbeat_unix_seconds) >= threshold;
            match (record.is_dead, dead) {
                (false, true) => {
                    debug!(
                        "{:?} dead: last heartbeat {}s ago",
                        member,
                        now_unix.saturating_sub(record.last_heartbeat_unix_seconds)
                    );
                    self.event_queue.push_back(PresenceEvent::Died(member.clone()));
                },
                (true, false) => {
                    debug!("{:?} revived", member);
                    self.event_queue.push_back(PresenceEvent::Revived(member.clone()));
                },
                _ => {},
            }
            record.is_dead = dead;
        }
    }
}
