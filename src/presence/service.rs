//! Async driver for a [`PresenceTracker`].
//!
//! While entered, three cooperative tasks run on fixed intervals:
//!
//! | task | interval | work |
//! |------|----------|------|
//! | heartbeat | `heartbeat_interval` | publish the local heartbeat |
//! | liveness | `liveness_interval` | re-read attributes, mark dead/revived |
//! | membership | `membership_poll_interval` (optional) | diff the member list |
//!
//! Every event the tracker produces is forwarded to the unbounded receiver
//! returned by [`PresenceService::new`]. Publish failures are reported and
//! retried on the next tick; only [`exit`](PresenceService::exit) stops the
//! loops.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use web_time::Duration;

use crate::clock::UnixClock;
use crate::presence::directory::SessionDirectory;
use crate::presence::tracker::{PresenceEvent, PresenceTracker};
use crate::{CancelSignal, Config, PresenceConfig, QuickdrawError};

type SharedTracker<T> = Arc<Mutex<PresenceTracker<T>>>;
type EventSender<T> = mpsc::UnboundedSender<PresenceEvent<<T as Config>::Identity>>;

struct Running {
    cancel: CancelSignal,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs presence tracking for one lobby on the current tokio runtime.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), quickdraw_sync::QuickdrawError> {
/// use std::sync::Arc;
/// use quickdraw_sync::clock::SystemClock;
/// use quickdraw_sync::{Config, InMemoryDirectory, PresenceConfig, PresenceService};
///
/// struct Lobby;
/// impl Config for Lobby {
///     type Identity = u64;
/// }
///
/// let dir = Arc::new(InMemoryDirectory::new());
/// dir.join(7);
/// let (mut service, mut events) =
///     PresenceService::<Lobby, _>::new(7, dir, PresenceConfig::default(), Arc::new(SystemClock))?;
/// service.enter()?;
/// assert!(events.recv().await.is_some());
/// service.exit();
/// # Ok(())
/// # }
/// ```
pub struct PresenceService<T, D>
where
    T: Config,
    D: SessionDirectory<T::Identity> + Send + Sync + 'static,
{
    tracker: SharedTracker<T>,
    directory: Arc<D>,
    clock: Arc<dyn UnixClock>,
    events_tx: EventSender<T>,
    running: Option<Running>,
}

impl<T, D> std::fmt::Debug for PresenceService<T, D>
where
    T: Config,
    D: SessionDirectory<T::Identity> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceService")
            .field("tracker", &*self.tracker.lock())
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, D> PresenceService<T, D>
where
    T: Config,
    D: SessionDirectory<T::Identity> + Send + Sync + 'static,
{
    /// Creates a stopped service and the receiver its events go to.
    ///
    /// # Errors
    /// [`QuickdrawError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        local: T::Identity,
        directory: Arc<D>,
        config: PresenceConfig,
        clock: Arc<dyn UnixClock>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PresenceEvent<T::Identity>>), QuickdrawError> {
        let tracker = PresenceTracker::new(local, config)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                tracker: Arc::new(Mutex::new(tracker)),
                directory,
                clock,
                events_tx,
                running: None,
            },
            events_rx,
        ))
    }

    /// `true` between `enter` and `exit`.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The shared directory.
    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// Runs `f` against the tracker under its lock.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&PresenceTracker<T>) -> R) -> R {
        let tracker = self.tracker.lock();
        f(&*tracker)
    }

    /// Resets the tracker, takes a first membership snapshot and starts the loops.
    ///
    /// Must be called from inside a tokio runtime.
    ///
    /// # Errors
    /// [`QuickdrawError::InvalidRequest`] if already running.
    pub fn enter(&mut self) -> Result<(), QuickdrawError> {
        if self.running.is_some() {
            return Err(QuickdrawError::InvalidRequest {
                info: "presence service already entered".to_owned(),
            });
        }

        let config = {
            let mut tracker = self.tracker.lock();
            tracker.reset();
            tracker.on_members_changed(&*self.directory);
            forward(&mut tracker, &self.events_tx);
            info!("entered lobby as {:?}", tracker.local());
            tracker.config().clone()
        };

        let cancel = CancelSignal::new();
        let mut tasks = Vec::with_capacity(3);

        tasks.push(self.spawn_loop(config.heartbeat_interval, &cancel, |tracker, directory, now| {
            // Failures are already reported by the tracker.
            let _ = tracker.publish_heartbeat(directory, now);
        }));
        tasks.push(self.spawn_loop(config.liveness_interval, &cancel, |tracker, directory, now| {
            tracker.refresh_attributes(directory);
            tracker.check_liveness(now);
        }));
        if let Some(poll) = config.membership_poll_interval {
            tasks.push(self.spawn_loop(poll, &cancel, |tracker, directory, _| {
                tracker.on_members_changed(directory);
            }));
        }

        self.running = Some(Running { cancel, tasks });
        Ok(())
    }

    fn spawn_loop<F>(&self, period: Duration, cancel: &CancelSignal, mut work: F) -> JoinHandle<()>
    where
        F: FnMut(&mut PresenceTracker<T>, &D, i64) + Send + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        let directory = Arc::clone(&self.directory);
        let clock = Arc::clone(&self.clock);
        let events_tx = self.events_tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = clock.now_unix();
                        let mut guard = tracker.lock();
                        work(&mut *guard, &*directory, now);
                        forward(&mut *guard, &events_tx);
                    }
                }
            }
        })
    }

    /// Publishes the local ready flag.
    ///
    /// # Errors
    /// Whatever the directory returns.
    pub fn set_ready(&self, ready: bool) -> Result<(), QuickdrawError> {
        let mut tracker = self.tracker.lock();
        let result = tracker.set_ready(&*self.directory, ready);
        forward(&mut tracker, &self.events_tx);
        result
    }

    /// Diffs the member list now instead of waiting for the poll.
    pub fn refresh_members(&self) {
        let mut tracker = self.tracker.lock();
        tracker.on_members_changed(&*self.directory);
        forward(&mut tracker, &self.events_tx);
    }

    /// Stops the loops, then resets the tracker. Idempotent.
    pub fn exit(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        for task in &running.tasks {
            task.abort();
        }
        let mut tracker = self.tracker.lock();
        debug!("left lobby as {:?}", tracker.local());
        tracker.reset();
    }
}

impl<T, D> Drop for PresenceService<T, D>
where
    T: Config,
    D: SessionDirectory<T::Identity> + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.exit();
    }
}

fn forward<T: Config>(tracker: &mut PresenceTracker<T>, tx: &EventSender<T>) {
    for event in tracker.events() {
        // A dropped receiver only means nobody is listening any more.
        let _ = tx.send(event);
    }
}
