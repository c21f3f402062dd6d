//! Lobby Orchestration
//!
//! The lobby owns all shared matchmaking state - waiting queues, the port
//! set, the session registry - and is injected into every connection
//! handler. Connection tasks never touch the collections directly; every
//! mutation funnels through one of the async entry points here, which in
//! turn serialize on the owning component's lock.

pub mod pool;
pub mod ports;
pub mod registry;
pub mod runner;

use std::ops::RangeInclusive;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::network::protocol::{Envelope, PublicProfile};
use crate::network::relay::{RelayError, SignalingRelay};
use self::pool::{MatchmakingPool, PoolError};
use self::ports::{PortAllocator, PortError, DEFAULT_PORT_RANGE};
use self::registry::SessionRegistry;
use self::runner::{MatchSupervisor, RunnerConfig, SpawnError};

/// An authenticated live connection, as the lobby sees it.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    /// Unique username (the token subject).
    pub username: String,
    /// Credential-free profile shared with co-participants.
    pub profile: PublicProfile,
    /// Outbound message channel, drained by the connection's writer task.
    pub sender: mpsc::Sender<Envelope>,
}

/// Lifecycle phase of a connection, derived from pool and registry
/// membership. A connection is in at most one of the two at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Enqueued, no session yet.
    Waiting,
    /// In an active session; relay enabled.
    Paired,
    /// Not tracked anywhere; terminal.
    Closed,
}

/// How a connection went away, as classified by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Deliberate close (normal closure); the match, if any, already
    /// concluded from the client's point of view. No forfeiture notices.
    Graceful,
    /// Going-away or abnormal closure; mid-session this is a forfeit.
    Abrupt,
}

/// Lobby configuration.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Accepted group sizes.
    pub group_sizes: Vec<usize>,
    /// Port range reserved for match runners.
    pub port_range: RangeInclusive<u16>,
    /// Match-runner invocation.
    pub runner: RunnerConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            group_sizes: crate::SUPPORTED_GROUP_SIZES.to_vec(),
            port_range: DEFAULT_PORT_RANGE,
            runner: RunnerConfig::default(),
        }
    }
}

/// Join rejections. Both are admission failures: no shared state has been
/// touched when one is returned.
#[derive(Debug, Error)]
pub enum JoinError {
    /// The requested group size is not an accepted one.
    #[error("unsupported group size: {0}")]
    UnsupportedGroupSize(usize),
    /// The username is already waiting or in a session.
    #[error("{0} is already waiting or in a session")]
    AlreadyActive(String),
}

/// Owned service coordinating matchmaking, ports, supervision, and relay.
pub struct Lobby {
    config: LobbyConfig,
    pool: MatchmakingPool,
    ports: Arc<PortAllocator>,
    supervisor: MatchSupervisor,
    registry: Arc<SessionRegistry>,
    relay: SignalingRelay,
}

impl Lobby {
    /// Build a lobby and all the components it owns.
    pub fn new(config: LobbyConfig) -> Self {
        let ports = Arc::new(PortAllocator::new(config.port_range.clone()));
        let registry = Arc::new(SessionRegistry::new());
        Self {
            supervisor: MatchSupervisor::new(config.runner.clone(), ports.clone()),
            relay: SignalingRelay::new(registry.clone()),
            pool: MatchmakingPool::new(),
            ports,
            registry,
            config,
        }
    }

    /// Admit an authenticated connection into matchmaking.
    ///
    /// The player either waits or, when it completes a group, triggers
    /// formation of a session before this returns.
    pub async fn join(&self, player: PlayerHandle, group_size: usize) -> Result<(), JoinError> {
        if !self.config.group_sizes.contains(&group_size) {
            return Err(JoinError::UnsupportedGroupSize(group_size));
        }
        if self.registry.is_active(&player.username).await {
            return Err(JoinError::AlreadyActive(player.username));
        }

        let username = player.username.clone();
        let formed = self
            .pool
            .enqueue(player, group_size)
            .await
            .map_err(|PoolError::AlreadyWaiting(name)| JoinError::AlreadyActive(name))?;

        info!(username = %username, group_size, "joined the matchmaking");

        if let Some(group) = formed {
            self.form_session(group, group_size).await;
        }
        Ok(())
    }

    /// Forward a handshake frame from `username` to its session peer.
    pub async fn relay_message(
        &self,
        username: &str,
        envelope: Envelope,
    ) -> Result<(), RelayError> {
        self.relay.forward(username, envelope).await
    }

    /// Handle a closed socket.
    ///
    /// While waiting this cancels the pool entry and notifies no one.
    /// While paired it unlinks the participant; an abrupt close
    /// additionally sends each just-unlinked co-participant exactly one
    /// forfeiture notice. Safe to call for connections the lobby no
    /// longer tracks.
    pub async fn disconnect(&self, username: &str, kind: DisconnectKind) {
        if self.pool.cancel(username).await {
            info!(username = %username, "left the matchmaking while waiting");
            return;
        }

        if let Some(departure) = self.registry.depart(username).await {
            info!(
                username = %username,
                session = %departure.session,
                port = departure.port,
                ?kind,
                "left an active session"
            );
            if kind == DisconnectKind::Abrupt {
                self.relay.notify_forfeit(&departure).await;
            }
        }
    }

    /// Current lifecycle phase of a username.
    pub async fn phase(&self, username: &str) -> ConnectionPhase {
        if self.pool.contains(username).await {
            ConnectionPhase::Waiting
        } else if self.registry.is_active(username).await {
            ConnectionPhase::Paired
        } else {
            ConnectionPhase::Closed
        }
    }

    /// Whether a username is waiting or paired.
    pub async fn is_active(&self, username: &str) -> bool {
        self.phase(username).await != ConnectionPhase::Closed
    }

    /// Players currently waiting for a group of `group_size`.
    pub async fn waiting(&self, group_size: usize) -> usize {
        self.pool.waiting(group_size).await
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }

    /// Ports currently bound by match runners.
    pub async fn ports_in_use(&self) -> usize {
        self.ports.in_use_count().await
    }

    /// Turn an extracted group into a running session.
    ///
    /// Failure handling follows the error taxonomy: on port exhaustion the
    /// group goes back to the front of its queue; on spawn failure (port
    /// already released by the supervisor) the group is told the session
    /// will not start.
    async fn form_session(&self, group: Vec<PlayerHandle>, group_size: usize) {
        let port = match self.ports.acquire().await {
            Ok(port) => port,
            Err(PortError::Exhausted) => {
                warn!(group_size, "no free port; returning group to its queue");
                self.pool.requeue_front(group, group_size).await;
                return;
            }
        };

        if let Err(SpawnError::Spawn(err)) = self.supervisor.spawn(port, group_size).await {
            warn!(port, error = %err, "aborting session that failed to start");
            self.relay
                .notify_aborted(&group, "the match failed to start")
                .await;
            return;
        }

        let usernames: Vec<&str> = group.iter().map(|p| p.username.as_str()).collect();
        info!(port, "new match started: {}", usernames.join(" vs "));

        let formed = self.registry.register(port, group).await;
        self.relay.announce(&formed).await;

        // A participant can vanish between extraction and registration; its
        // disconnect found nothing to clean up, so finish the job here.
        for member in &formed.participants {
            if member.sender.is_closed() {
                debug!(username = %member.username, "participant vanished during formation");
                self.disconnect(&member.username, DisconnectKind::Abrupt).await;
            }
        }
    }
}
