//! Signaling Relay
//!
//! Delivers session-formed notices and forwards peer-to-peer handshake
//! frames between the two participants of a session. Frames are forwarded
//! verbatim; the relay validates only who may talk to whom, never the
//! payload. Delivery into a closed channel is logged and dropped - the
//! peer is on its way out and the disconnect path owns the consequences.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::lobby::registry::{Departure, FormedSession, RelayTarget, SessionRegistry};
use crate::lobby::PlayerHandle;
use crate::network::protocol::{Envelope, MatchAssignment};

/// Relay errors. These never tear anything down; the offending frame is
/// simply not forwarded.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The code is unknown or not one clients may originate.
    #[error("code {0} cannot be relayed")]
    UnsupportedCode(u8),
    /// The sender is not in any session.
    #[error("sender is not in a session")]
    NotInSession,
    /// The sender's opponent link was cleared by a prior disconnect.
    #[error("opponent link is no longer live")]
    LinkDown,
    /// Handshake relay is only defined for two-party sessions.
    #[error("handshake relay requires a two-player session")]
    NotTwoParty,
}

/// Fan-out point for all session-level notices and handshake forwarding.
pub struct SignalingRelay {
    registry: Arc<SessionRegistry>,
}

impl SignalingRelay {
    /// Relay resolving participants through `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Send every participant of a fresh session its assignment: the
    /// shared port, its own 1-based slot, and the public profiles of all
    /// co-participants in slot order.
    pub async fn announce(&self, session: &FormedSession) {
        for member in &session.participants {
            let assignment = MatchAssignment {
                port: session.port,
                player_number: member.slot,
                opponents: session
                    .participants
                    .iter()
                    .filter(|other| other.username != member.username)
                    .map(|other| other.profile.clone())
                    .collect(),
            };
            self.deliver(&member.sender, &member.username, Envelope::opponent_found(&assignment))
                .await;
        }
    }

    /// Forward a handshake frame from `sender` to its session peer.
    ///
    /// The frame goes out byte-for-byte as received; only the sender's
    /// standing is checked. A sender whose opponent already left gets
    /// [`RelayError::LinkDown`] and nothing is delivered.
    pub async fn forward(&self, sender: &str, envelope: Envelope) -> Result<(), RelayError> {
        match envelope.message_code() {
            Some(code) if code.client_originated() => {}
            _ => return Err(RelayError::UnsupportedCode(envelope.code)),
        }

        match self.registry.relay_target(sender).await {
            RelayTarget::Peer { username, sender: peer } => {
                self.deliver(&peer, &username, envelope).await;
                Ok(())
            }
            RelayTarget::NotInSession => Err(RelayError::NotInSession),
            RelayTarget::Unlinked => Err(RelayError::LinkDown),
            RelayTarget::NotTwoParty => Err(RelayError::NotTwoParty),
        }
    }

    /// Tell every just-unlinked co-participant that its opponent forfeited.
    pub async fn notify_forfeit(&self, departure: &Departure) {
        for survivor in &departure.survivors {
            self.deliver(&survivor.sender, &survivor.username, Envelope::opponent_left())
                .await;
        }
        if !departure.survivors.is_empty() {
            info!(
                session = %departure.session,
                notified = departure.survivors.len(),
                "forfeiture notices sent"
            );
        }
    }

    /// Tell an extracted-but-never-registered group that its session will
    /// not start.
    pub async fn notify_aborted(&self, group: &[PlayerHandle], reason: &str) {
        for player in group {
            self.deliver(&player.sender, &player.username, Envelope::session_aborted(reason))
                .await;
        }
    }

    async fn deliver(
        &self,
        sender: &tokio::sync::mpsc::Sender<Envelope>,
        recipient: &str,
        envelope: Envelope,
    ) {
        if sender.send(envelope).await.is_err() {
            debug!(recipient, "dropping notice for closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::network::protocol::{MessageCode, PublicProfile};

    fn wired_handle(username: &str) -> (PlayerHandle, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(8);
        (
            PlayerHandle {
                username: username.into(),
                profile: PublicProfile::new(username),
                sender,
            },
            receiver,
        )
    }

    fn sdp_offer() -> Envelope {
        Envelope::new(
            MessageCode::SessionDescription,
            serde_json::json!({"type": "offer", "sdp": "v=0"}),
        )
    }

    async fn paired_relay() -> (
        SignalingRelay,
        Arc<SessionRegistry>,
        mpsc::Receiver<Envelope>,
        mpsc::Receiver<Envelope>,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let relay = SignalingRelay::new(registry.clone());
        let (alice, alice_rx) = wired_handle("alice");
        let (bob, bob_rx) = wired_handle("bob");
        let formed = registry.register(52000, vec![alice, bob]).await;
        relay.announce(&formed).await;
        (relay, registry, alice_rx, bob_rx)
    }

    #[tokio::test]
    async fn test_announce_sends_each_participant_its_slot() {
        let (_relay, _registry, mut alice_rx, mut bob_rx) = paired_relay().await;

        let to_alice = alice_rx.recv().await.unwrap();
        assert_eq!(to_alice.message_code(), Some(MessageCode::OpponentFound));
        let body: MatchAssignment = serde_json::from_value(to_alice.data).unwrap();
        assert_eq!(body.port, 52000);
        assert_eq!(body.player_number, 1);
        assert_eq!(body.opponents.len(), 1);
        assert_eq!(body.opponents[0].username, "bob");

        let to_bob = bob_rx.recv().await.unwrap();
        let body: MatchAssignment = serde_json::from_value(to_bob.data).unwrap();
        assert_eq!(body.port, 52000);
        assert_eq!(body.player_number, 2);
        assert_eq!(body.opponents[0].username, "alice");
    }

    #[tokio::test]
    async fn test_forward_delivers_frame_verbatim() {
        let (relay, _registry, _alice_rx, mut bob_rx) = paired_relay().await;
        bob_rx.recv().await.unwrap(); // drain the announcement

        relay.forward("alice", sdp_offer()).await.unwrap();

        let received = bob_rx.recv().await.unwrap();
        assert_eq!(received.message_code(), Some(MessageCode::SessionDescription));
        assert_eq!(received.data["type"], "offer");
        assert_eq!(received.data["sdp"], "v=0");
    }

    #[tokio::test]
    async fn test_forward_rejects_server_only_codes() {
        let (relay, _registry, _alice_rx, _bob_rx) = paired_relay().await;

        let spoofed = Envelope::opponent_left();
        let result = relay.forward("alice", spoofed).await;
        assert!(matches!(result, Err(RelayError::UnsupportedCode(1))));
    }

    #[tokio::test]
    async fn test_forward_rejects_unknown_sender() {
        let registry = Arc::new(SessionRegistry::new());
        let relay = SignalingRelay::new(registry);

        let result = relay.forward("stranger", sdp_offer()).await;
        assert!(matches!(result, Err(RelayError::NotInSession)));
    }

    #[tokio::test]
    async fn test_forward_stops_after_link_cleared() {
        let (relay, registry, _alice_rx, mut bob_rx) = paired_relay().await;
        bob_rx.recv().await.unwrap();

        let departure = registry.depart("alice").await.unwrap();
        relay.notify_forfeit(&departure).await;

        let notice = bob_rx.recv().await.unwrap();
        assert_eq!(notice.message_code(), Some(MessageCode::OpponentLeft));

        // bob's own frames now go nowhere.
        let result = relay.forward("bob", sdp_offer()).await;
        assert!(matches!(result, Err(RelayError::LinkDown)));
    }

    #[tokio::test]
    async fn test_notify_aborted_reaches_whole_group() {
        let registry = Arc::new(SessionRegistry::new());
        let relay = SignalingRelay::new(registry);

        let (alice, mut alice_rx) = wired_handle("alice");
        let (bob, mut bob_rx) = wired_handle("bob");
        relay
            .notify_aborted(&[alice, bob], "the match failed to start")
            .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let notice = rx.recv().await.unwrap();
            assert_eq!(notice.message_code(), Some(MessageCode::SessionAborted));
            assert_eq!(notice.data["reason"], "the match failed to start");
        }
    }

    #[tokio::test]
    async fn test_delivery_to_closed_channel_is_not_an_error() {
        let (relay, _registry, alice_rx, mut bob_rx) = paired_relay().await;
        bob_rx.recv().await.unwrap();
        drop(bob_rx);

        // bob's channel is gone; alice's forward still succeeds.
        drop(alice_rx);
        relay.forward("alice", sdp_offer()).await.unwrap();
    }
}
