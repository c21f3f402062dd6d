//! Matchmaking Pool
//!
//! One FIFO queue of waiting players per group-size class. Enqueueing the
//! player that completes a group extracts that group in the same critical
//! section, so two racing joins can never both observe "one short of full"
//! and split or duplicate a player.

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;
use tokio::sync::Mutex;

use super::PlayerHandle;

/// Pool admission errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The username is already waiting in some queue.
    #[error("{0} is already waiting for a match")]
    AlreadyWaiting(String),
}

/// Per group-size FIFO queues of waiting players.
pub struct MatchmakingPool {
    inner: Mutex<Queues>,
}

#[derive(Default)]
struct Queues {
    by_size: BTreeMap<usize, VecDeque<PlayerHandle>>,
}

impl Queues {
    /// Append to the tail of the `group_size` queue; extract the earliest
    /// full group if one is now complete.
    fn enqueue(
        &mut self,
        player: PlayerHandle,
        group_size: usize,
    ) -> Result<Option<Vec<PlayerHandle>>, PoolError> {
        if self.contains(&player.username) {
            return Err(PoolError::AlreadyWaiting(player.username.clone()));
        }

        let queue = self.by_size.entry(group_size).or_default();
        queue.push_back(player);

        // The queue can briefly hold more than one group's worth after a
        // front requeue; still extract exactly one group per enqueue.
        if queue.len() >= group_size {
            Ok(Some(queue.drain(..group_size).collect()))
        } else {
            Ok(None)
        }
    }

    /// Remove a waiting player. Returns false if the player is not
    /// waiting (e.g. already extracted by a racing formation).
    fn cancel(&mut self, username: &str) -> bool {
        for queue in self.by_size.values_mut() {
            if let Some(pos) = queue.iter().position(|p| p.username == username) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Restore a just-extracted group to the head of its queue, keeping
    /// its original order.
    fn requeue_front(&mut self, group: Vec<PlayerHandle>, group_size: usize) {
        let queue = self.by_size.entry(group_size).or_default();
        for player in group.into_iter().rev() {
            queue.push_front(player);
        }
    }

    fn contains(&self, username: &str) -> bool {
        self.by_size
            .values()
            .any(|queue| queue.iter().any(|p| p.username == username))
    }

    fn waiting(&self, group_size: usize) -> usize {
        self.by_size.get(&group_size).map_or(0, VecDeque::len)
    }
}

impl MatchmakingPool {
    /// Empty pool.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Queues::default()),
        }
    }

    /// Enqueue a player for a group of `group_size`.
    ///
    /// Returns `Ok(Some(group))` when this player completed a group: the
    /// earliest `group_size` waiters, removed from the queue atomically,
    /// in join order. Returns `Ok(None)` when the player is left waiting.
    pub async fn enqueue(
        &self,
        player: PlayerHandle,
        group_size: usize,
    ) -> Result<Option<Vec<PlayerHandle>>, PoolError> {
        self.inner.lock().await.enqueue(player, group_size)
    }

    /// Remove a waiting player, if still present.
    ///
    /// Takes effect synchronously with respect to later `enqueue` calls:
    /// once this returns, no future formation can include the player.
    pub async fn cancel(&self, username: &str) -> bool {
        self.inner.lock().await.cancel(username)
    }

    /// Put an extracted group back at the front of its queue.
    ///
    /// Used when group formation fails for a reason that is not the
    /// players' fault (no free port); their join-order position is kept.
    pub async fn requeue_front(&self, group: Vec<PlayerHandle>, group_size: usize) {
        self.inner.lock().await.requeue_front(group, group_size);
    }

    /// Whether a username is currently waiting in any queue.
    pub async fn contains(&self, username: &str) -> bool {
        self.inner.lock().await.contains(username)
    }

    /// Number of players waiting in the `group_size` queue.
    pub async fn waiting(&self, group_size: usize) -> usize {
        self.inner.lock().await.waiting(group_size)
    }
}

impl Default for MatchmakingPool {
    fn default() -> Self {
        Self::new()
    }
}
