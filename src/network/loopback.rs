//! In-process [`DatagramChannel`] for tests, demos and same-machine play.
//!
//! Every clone of a [`LoopbackChannel`] talks to the same hub, so two links
//! can each hold a clone and exchange datagrams as if over a network. Delivery
//! is reliable and ordered unless wrapped in a
//! [`ChaosChannel`](crate::ChaosChannel).

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::{ChannelEndpoint, DatagramChannel, QuickdrawError};

type Mailbox<I> = VecDeque<(I, Vec<u8>)>;

#[derive(Debug)]
struct Hub<I> {
    mailboxes: HashMap<(I, String), Mailbox<I>>,
    accepting: BTreeSet<(I, I, String)>,
    fail_sends: bool,
    datagrams_sent: u64,
}

impl<I> Default for Hub<I> {
    fn default() -> Self {
        Self {
            mailboxes: HashMap::new(),
            accepting: BTreeSet::new(),
            fail_sends: false,
            datagrams_sent: 0,
        }
    }
}

/// Shared in-memory datagram hub.
#[derive(Debug)]
pub struct LoopbackChannel<I> {
    hub: Arc<Mutex<Hub<I>>>,
}

impl<I> Clone for LoopbackChannel<I> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
        }
    }
}

impl<I> Default for LoopbackChannel<I> {
    fn default() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
        }
    }
}

impl<I> LoopbackChannel<I>
where
    I: Clone + Eq + Ord + Hash,
{
    /// A fresh hub with no mailboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Two handles onto one hub, one per peer.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a = Self::new();
        let b = a.clone();
        (a, b)
    }

    /// Makes every subsequent `send_to` fail until turned off again.
    pub fn set_fail_sends(&self, fail: bool) {
        self.hub.lock().fail_sends = fail;
    }

    /// `true` while `local` accepts datagrams from `remote` on `channel`.
    #[must_use]
    pub fn is_accepting(&self, local: &I, remote: &I, channel: &str) -> bool {
        self.hub
            .lock()
            .accepting
            .contains(&(local.clone(), remote.clone(), channel.to_owned()))
    }

    /// Datagrams queued for `local` on `channel`.
    #[must_use]
    pub fn pending(&self, local: &I, channel: &str) -> usize {
        self.hub
            .lock()
            .mailboxes
            .get(&(local.clone(), channel.to_owned()))
            .map_or(0, VecDeque::len)
    }

    /// Total datagrams accepted by `send_to` since creation.
    #[must_use]
    pub fn datagrams_sent(&self) -> u64 {
        self.hub.lock().datagrams_sent
    }

    /// Queues a raw datagram as if `from` had sent it, bypassing any link.
    pub fn inject(&self, from: I, to: I, channel: &str, payload: &[u8]) {
        self.hub
            .lock()
            .mailboxes
            .entry((to, channel.to_owned()))
            .or_default()
            .push_back((from, payload.to_vec()));
    }
}

impl<I> DatagramChannel<I> for LoopbackChannel<I>
where
    I: Clone + Eq + Ord + Hash + std::fmt::Debug,
{
    fn accept_incoming(&mut self, endpoint: &ChannelEndpoint<I>) -> Result<(), QuickdrawError> {
        trace!(
            "loopback: {:?} accepting {:?} on {}",
            endpoint.local,
            endpoint.remote,
            endpoint.channel
        );
        self.hub.lock().accepting.insert((
            endpoint.local.clone(),
            endpoint.remote.clone(),
            endpoint.channel.clone(),
        ));
        Ok(())
    }

    fn send_to(
        &mut self,
        endpoint: &ChannelEndpoint<I>,
        payload: &[u8],
    ) -> Result<(), QuickdrawError> {
        let mut hub = self.hub.lock();
        if hub.fail_sends {
            return Err(QuickdrawError::ChannelError {
                context: format!("loopback send to {:?} refused", endpoint.remote),
            });
        }
        hub.datagrams_sent += 1;
        hub.mailboxes
            .entry((endpoint.remote.clone(), endpoint.channel.clone()))
            .or_default()
            .push_back((endpoint.local.clone(), payload.to_vec()));
        Ok(())
    }

    fn try_receive(
        &mut self,
        local: &I,
        channel: &str,
        buf: &mut [u8],
    ) -> Result<Option<(I, usize)>, QuickdrawError> {
        let mut hub = self.hub.lock();
        let Some(mailbox) = hub.mailboxes.get_mut(&(local.clone(), channel.to_owned())) else {
            return Ok(None);
        };
        let Some((from, payload)) = mailbox.pop_front() else {
            return Ok(None);
        };
        let len = payload.len().min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..len), payload.get(..len)) {
            dst.copy_from_slice(src);
        }
        Ok(Some((from, len)))
    }

    fn close(&mut self, endpoint: &ChannelEndpoint<I>) {
        let mut hub = self.hub.lock();
        hub.accepting.remove(&(
            endpoint.local.clone(),
            endpoint.remote.clone(),
            endpoint.channel.clone(),
        ));
        if let Some(mailbox) =
            hub.mailboxes.get_mut(&(endpoint.local.clone(), endpoint.channel.clone()))
        {
            mailbox.retain(|(from, _)| from != &endpoint.remote);
        }
    }
}
