//! Borrowing iterator over a component's queued events.
//!
//! [`PeerLink`](crate::PeerLink), [`PresenceTracker`](crate::PresenceTracker)
//! and [`NetMatch`](crate::NetMatch) all buffer what they observe in a
//! `VecDeque` and hand it out through [`EventDrain`].

use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

/// A zero-allocation opaque iterator that drains queued events.
///
/// Wraps the internal `VecDeque` drain so the public API does not expose
/// `std::collections::vec_deque::Drain` directly. Returned by
/// [`PeerLink::events`], [`PresenceTracker::events`] and [`NetMatch::events`].
///
/// Dropping the drain early still empties the queue.
///
/// ```
/// # use quickdraw_sync::{Config, HandshakeConfig, LoopbackChannel, PeerLink};
/// # struct Play;
/// # impl Config for Play { type Identity = u32; }
/// let channel = LoopbackChannel::<u32>::new();
/// let mut link = PeerLink::<Play, _>::new(1, channel, HandshakeConfig::default())
///     .expect("valid config");
/// for event in link.events() {
///     println!("{event:?}");
/// }
/// ```
///
/// [`PeerLink::events`]: crate::PeerLink::events
/// [`PresenceTracker::events`]: crate::PresenceTracker::events
/// [`NetMatch::events`]: crate::NetMatch::events
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a, E> {
    inner: Drain<'a, E>,
}

impl<'a, E> EventDrain<'a, E> {
    pub(crate) fn from_drain(drain: Drain<'a, E>) -> Self {
        Self { inner: drain }
    }
}

impl<E> Iterator for EventDrain<'_, E> {
    type Item = E;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<E> DoubleEndedIterator for EventDrain<'_, E> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<E> ExactSizeIterator for EventDrain<'_, E> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<E> FusedIterator for EventDrain<'_, E> {}

impl<E> std::fmt::Debug for EventDrain<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
    }
}
