//! Session Registry
//!
//! Indirection table replacing direct opponent back-references between
//! paired players: each connection knows only its username, the registry
//! resolves username -> session -> co-participants. This gives disconnect
//! handling a single teardown point and keeps teardown idempotent.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::PlayerHandle;
use crate::network::protocol::{Envelope, PublicProfile};

/// Unique session identifier.
pub type SessionId = Uuid;

/// One participant as seen at formation time. Slot numbers are 1-based
/// and follow join order.
#[derive(Debug, Clone)]
pub struct SessionMember {
    /// Participant username.
    pub username: String,
    /// Credential-free profile shared with co-participants.
    pub profile: PublicProfile,
    /// 1-based slot index.
    pub slot: u8,
    /// Outbound message channel.
    pub sender: mpsc::Sender<Envelope>,
}

/// Snapshot of a freshly registered session, consumed by the relay to
/// announce it.
#[derive(Debug, Clone)]
pub struct FormedSession {
    /// Session identifier.
    pub id: SessionId,
    /// Port the session's match runner is bound to.
    pub port: u16,
    /// Participants in slot order.
    pub participants: Vec<SessionMember>,
}

/// Result of unlinking a departing participant.
#[derive(Debug)]
pub struct Departure {
    /// Session the participant left.
    pub session: SessionId,
    /// Port assigned to that session (for logging; the supervisor owns
    /// its release).
    pub port: u16,
    /// Co-participants whose link to the leaver was cleared by this call.
    /// Each appears here at most once per leaver, which is what makes
    /// "exactly one forfeiture notice" hold.
    pub survivors: Vec<Survivor>,
}

/// A still-present co-participant of a departed player.
#[derive(Debug)]
pub struct Survivor {
    /// Survivor username.
    pub username: String,
    /// Survivor outbound channel.
    pub sender: mpsc::Sender<Envelope>,
}

/// Where a handshake frame from `username` may be forwarded.
#[derive(Debug)]
pub enum RelayTarget {
    /// The single live peer of a two-party session.
    Peer {
        /// Peer username.
        username: String,
        /// Peer outbound channel.
        sender: mpsc::Sender<Envelope>,
    },
    /// Sender is not in any session.
    NotInSession,
    /// Sender's opponent link was cleared by a prior disconnect.
    Unlinked,
    /// Handshake relay is only defined for two-party sessions.
    NotTwoParty,
}

struct Participant {
    profile: PublicProfile,
    slot: u8,
    sender: mpsc::Sender<Envelope>,
    /// Usernames of still-linked co-participants.
    peers: Vec<String>,
}

struct SessionRecord {
    port: u16,
    group_size: usize,
    participants: BTreeMap<String, Participant>,
}

#[derive(Default)]
struct Tables {
    sessions: BTreeMap<SessionId, SessionRecord>,
    by_player: BTreeMap<String, SessionId>,
}

/// Maps active sessions to participants and back.
pub struct SessionRegistry {
    inner: RwLock<Tables>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables::default()),
        }
    }

    /// Record a new session for an extracted group.
    ///
    /// Slots follow the group's order (join order); every participant
    /// starts linked to every other.
    pub async fn register(&self, port: u16, group: Vec<PlayerHandle>) -> FormedSession {
        let id = Uuid::new_v4();
        let group_size = group.len();

        let members: Vec<SessionMember> = group
            .into_iter()
            .enumerate()
            .map(|(index, player)| SessionMember {
                username: player.username,
                profile: player.profile,
                slot: (index + 1) as u8,
                sender: player.sender,
            })
            .collect();

        let mut tables = self.inner.write().await;
        let mut participants = BTreeMap::new();
        for member in &members {
            let peers = members
                .iter()
                .filter(|other| other.username != member.username)
                .map(|other| other.username.clone())
                .collect();
            participants.insert(
                member.username.clone(),
                Participant {
                    profile: member.profile.clone(),
                    slot: member.slot,
                    sender: member.sender.clone(),
                    peers,
                },
            );
            tables.by_player.insert(member.username.clone(), id);
        }
        tables.sessions.insert(
            id,
            SessionRecord {
                port,
                group_size,
                participants,
            },
        );

        FormedSession {
            id,
            port,
            participants: members,
        }
    }

    /// Unlink a departing participant from their session.
    ///
    /// Returns the co-participants whose link to the leaver was cleared by
    /// this call, or `None` if the participant is in no session (already
    /// departed, or never paired) - which makes a second teardown for the
    /// same leaver a no-op. The session record itself is dropped when the
    /// last participant departs.
    pub async fn depart(&self, username: &str) -> Option<Departure> {
        let mut tables = self.inner.write().await;
        let session_id = tables.by_player.remove(username)?;
        let record = tables.sessions.get_mut(&session_id)?;

        record.participants.remove(username);

        let mut survivors = Vec::new();
        for (name, participant) in record.participants.iter_mut() {
            if let Some(pos) = participant.peers.iter().position(|p| p == username) {
                participant.peers.remove(pos);
                survivors.push(Survivor {
                    username: name.clone(),
                    sender: participant.sender.clone(),
                });
            }
        }

        let port = record.port;
        if record.participants.is_empty() {
            tables.sessions.remove(&session_id);
        }

        Some(Departure {
            session: session_id,
            port,
            survivors,
        })
    }

    /// Resolve where a handshake frame from `username` may go.
    pub async fn relay_target(&self, username: &str) -> RelayTarget {
        let tables = self.inner.read().await;
        let Some(session_id) = tables.by_player.get(username) else {
            return RelayTarget::NotInSession;
        };
        let Some(record) = tables.sessions.get(session_id) else {
            return RelayTarget::NotInSession;
        };
        if record.group_size != 2 {
            return RelayTarget::NotTwoParty;
        }
        let Some(me) = record.participants.get(username) else {
            return RelayTarget::NotInSession;
        };
        let Some(peer_name) = me.peers.first() else {
            return RelayTarget::Unlinked;
        };
        match record.participants.get(peer_name) {
            Some(peer) => RelayTarget::Peer {
                username: peer_name.clone(),
                sender: peer.sender.clone(),
            },
            None => RelayTarget::Unlinked,
        }
    }

    /// Whether a username currently belongs to any session.
    pub async fn is_active(&self, username: &str) -> bool {
        self.inner.read().await.by_player.contains_key(username)
    }

    /// The session a username belongs to, if any.
    pub async fn session_of(&self, username: &str) -> Option<SessionId> {
        self.inner.read().await.by_player.get(username).copied()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Slot number of a participant, if still present in a session.
    pub async fn slot_of(&self, username: &str) -> Option<u8> {
        let tables = self.inner.read().await;
        let session_id = tables.by_player.get(username)?;
        let record = tables.sessions.get(session_id)?;
        Some(record.participants.get(username)?.slot)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(username: &str) -> PlayerHandle {
        let (sender, _) = mpsc::channel(8);
        PlayerHandle {
            username: username.into(),
            profile: PublicProfile::new(username),
            sender,
        }
    }

    async fn pair(registry: &SessionRegistry) -> FormedSession {
        registry
            .register(50000, vec![handle("alice"), handle("bob")])
            .await
    }

    #[tokio::test]
    async fn test_register_assigns_slots_in_join_order() {
        let registry = SessionRegistry::new();
        let formed = registry
            .register(50000, vec![handle("a"), handle("b"), handle("c"), handle("d")])
            .await;

        let slots: Vec<(String, u8)> = formed
            .participants
            .iter()
            .map(|m| (m.username.clone(), m.slot))
            .collect();
        assert_eq!(
            slots,
            [
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 3),
                ("d".to_string(), 4)
            ]
        );
        assert_eq!(registry.slot_of("c").await, Some(3));
    }

    #[tokio::test]
    async fn test_reverse_lookup() {
        let registry = SessionRegistry::new();
        let formed = pair(&registry).await;

        assert_eq!(registry.session_of("alice").await, Some(formed.id));
        assert_eq!(registry.session_of("bob").await, Some(formed.id));
        assert!(registry.session_of("carol").await.is_none());
    }

    #[tokio::test]
    async fn test_relay_target_resolves_peer() {
        let registry = SessionRegistry::new();
        pair(&registry).await;

        match registry.relay_target("alice").await {
            RelayTarget::Peer { username, .. } => assert_eq!(username, "bob"),
            other => panic!("expected peer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relay_target_outside_session() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.relay_target("nobody").await,
            RelayTarget::NotInSession
        ));
    }

    #[tokio::test]
    async fn test_relay_refused_for_four_player_session() {
        let registry = SessionRegistry::new();
        registry
            .register(50000, vec![handle("a"), handle("b"), handle("c"), handle("d")])
            .await;

        assert!(matches!(
            registry.relay_target("a").await,
            RelayTarget::NotTwoParty
        ));
    }

    #[tokio::test]
    async fn test_depart_clears_survivor_links() {
        let registry = SessionRegistry::new();
        pair(&registry).await;

        let departure = registry.depart("alice").await.unwrap();
        assert_eq!(departure.survivors.len(), 1);
        assert_eq!(departure.survivors[0].username, "bob");

        // bob's link is gone: no further relay in either direction.
        assert!(matches!(
            registry.relay_target("bob").await,
            RelayTarget::Unlinked
        ));
        assert!(matches!(
            registry.relay_target("alice").await,
            RelayTarget::NotInSession
        ));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let registry = SessionRegistry::new();
        pair(&registry).await;

        assert!(registry.depart("alice").await.is_some());
        assert!(registry.depart("alice").await.is_none());

        // The second disconnect finds no one still linked to notify.
        let second = registry.depart("bob").await.unwrap();
        assert!(second.survivors.is_empty());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_four_player_forfeit_notifies_each_survivor_once() {
        let registry = SessionRegistry::new();
        registry
            .register(50000, vec![handle("a"), handle("b"), handle("c"), handle("d")])
            .await;

        let departure = registry.depart("b").await.unwrap();
        let mut names: Vec<String> =
            departure.survivors.iter().map(|s| s.username.clone()).collect();
        names.sort();
        assert_eq!(names, ["a", "c", "d"]);

        // A later leaver only notifies those still present.
        let departure = registry.depart("d").await.unwrap();
        let mut names: Vec<String> =
            departure.survivors.iter().map(|s| s.username.clone()).collect();
        names.sort();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_session_removed_when_last_participant_departs() {
        let registry = SessionRegistry::new();
        pair(&registry).await;
        assert_eq!(registry.session_count().await, 1);

        registry.depart("alice").await;
        assert_eq!(registry.session_count().await, 1);
        registry.depart("bob").await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        pair(&registry).await;
        let second = registry
            .register(50001, vec![handle("carol"), handle("dave")])
            .await;

        registry.depart("alice").await;

        // carol/dave are untouched by the other session's teardown.
        assert_eq!(registry.session_of("carol").await, Some(second.id));
        assert!(matches!(
            registry.relay_target("carol").await,
            RelayTarget::Peer { .. }
        ));
    }
}
