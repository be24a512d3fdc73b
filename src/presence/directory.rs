//! The lobby service as seen by the presence tracker.
//!
//! A lobby is a set of members with one owner and a string attribute map per
//! member. The tracker only reads the member list and reads/writes
//! attributes; it never creates or joins lobbies itself.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::QuickdrawError;

/// A shared lobby directory.
///
/// Methods take `&self`; implementations handle their own synchronization so
/// one directory can be shared between the tracker and the async presence
/// loops.
pub trait SessionDirectory<I> {
    /// Current members, in the directory's order.
    fn current_members(&self) -> Vec<I>;

    /// `true` if `member` owns the lobby.
    fn is_owner(&self, member: &I) -> bool;

    /// Writes `key = value` on `member`'s attribute map.
    ///
    /// # Errors
    /// [`QuickdrawError::DirectoryError`] when the write is refused.
    fn set_member_attribute(&self, member: &I, key: &str, value: &str)
        -> Result<(), QuickdrawError>;

    /// Reads `key` from `member`'s attribute map.
    fn member_attribute(&self, member: &I, key: &str) -> Option<String>;
}

impl<I, D: SessionDirectory<I> + ?Sized> SessionDirectory<I> for Arc<D> {
    fn current_members(&self) -> Vec<I> {
        (**self).current_members()
    }

    fn is_owner(&self, member: &I) -> bool {
        (**self).is_owner(member)
    }

    fn set_member_attribute(
        &self,
        member: &I,
        key: &str,
        value: &str,
    ) -> Result<(), QuickdrawError> {
        (**self).set_member_attribute(member, key, value)
    }

    fn member_attribute(&self, member: &I, key: &str) -> Option<String> {
        (**self).member_attribute(member, key)
    }
}

#[derive(Debug)]
struct Lobby<I> {
    members: Vec<I>,
    owner: Option<I>,
    attributes: HashMap<(I, String), String>,
    fail_writes: bool,
    writes: u64,
}

impl<I> Default for Lobby<I> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            owner: None,
            attributes: HashMap::new(),
            fail_writes: false,
            writes: 0,
        }
    }
}

/// Process-local [`SessionDirectory`]. Clones share one lobby.
///
/// The first member to join owns the lobby; when the owner leaves, ownership
/// passes to the longest-standing remaining member.
#[derive(Debug)]
pub struct InMemoryDirectory<I> {
    lobby: Arc<Mutex<Lobby<I>>>,
}

impl<I> Clone for InMemoryDirectory<I> {
    fn clone(&self) -> Self {
        Self {
            lobby: Arc::clone(&self.lobby),
        }
    }
}

impl<I> Default for InMemoryDirectory<I> {
    fn default() -> Self {
        Self {
            lobby: Arc::new(Mutex::new(Lobby::default())),
        }
    }
}

impl<I> InMemoryDirectory<I>
where
    I: Clone + Eq + Hash + std::fmt::Debug,
{
    /// An empty lobby.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member`; does nothing if already present.
    pub fn join(&self, member: I) {
        let mut lobby = self.lobby.lock();
        if lobby.members.contains(&member) {
            return;
        }
        trace!("directory: {:?} joined", member);
        if lobby.owner.is_none() {
            lobby.owner = Some(member.clone());
        }
        lobby.members.push(member);
    }

    /// Removes `member` and its attributes.
    pub fn leave(&self, member: &I) {
        let mut lobby = self.lobby.lock();
        lobby.members.retain(|m| m != member);
        lobby.attributes.retain(|(owner, _), _| owner != member);
        if lobby.owner.as_ref() == Some(member) {
            lobby.owner = lobby.members.first().cloned();
        }
        trace!("directory: {:?} left, owner now {:?}", member, lobby.owner);
    }

    /// Hands ownership to `member`.
    pub fn set_owner(&self, member: I) {
        self.lobby.lock().owner = Some(member);
    }

    /// The current owner.
    #[must_use]
    pub fn owner(&self) -> Option<I> {
        self.lobby.lock().owner.clone()
    }

    /// Makes every attribute write fail until turned off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lobby.lock().fail_writes = fail;
    }

    /// Successful attribute writes so far.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.lobby.lock().writes
    }
}

impl<I> SessionDirectory<I> for InMemoryDirectory<I>
where
    I: Clone + Eq + Hash + std::fmt::Debug,
{
    fn current_members(&self) -> Vec<I> {
        self.lobby.lock().members.clone()
    }

    fn is_owner(&self, member: &I) -> bool {
        self.lobby.lock().owner.as_ref() == Some(member)
    }

    fn set_member_attribute(
        &self,
        member: &I,
        key: &str,
        value: &str,
    ) -> Result<(), QuickdrawError> {
        let mut lobby = self.lobby.lock();
        if lobby.fail_writes {
            return Err(QuickdrawError::DirectoryError {
                context: format!("write of {key} for {member:?} refused"),
            });
        }
        if !lobby.members.contains(member) {
            return Err(QuickdrawError::DirectoryError {
                context: format!("{member:?} is not in the lobby"),
            });
        }
        lobby
            .attributes
            .insert((member.clone(), key.to_owned()), value.to_owned());
        lobby.writes += 1;
        Ok(())
    }

    fn member_attribute(&self, member: &I, key: &str) -> Option<String> {
        self.lobby
            .lock()
            .attributes
            .get(&(member.clone(), key.to_owned()))
            .cloned()
    }
}
