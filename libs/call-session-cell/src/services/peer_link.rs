// libs/call-session-cell/src/services/peer_link.rs
//! Peer link port: the negotiated media transport to the remote peer.
//!
//! The link is an opaque capability exposing offer/answer synthesis,
//! description application, candidate application, and an event stream for
//! asynchronously discovered candidates, inbound media, and connectivity
//! changes. `LoopbackPeerLink` joins two links in memory for deterministic
//! tests; the `webrtc-transport` feature provides the real implementation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{CallSessionError, IceCandidate, SdpType, SessionDescription};

/// Underlying connectivity of the peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from the link. Candidate discovery is a
/// stream that may continue after the call connects.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerLinkEvent {
    CandidateDiscovered(IceCandidate),
    RemoteMediaStarted,
    StateChanged(PeerLinkState),
}

#[async_trait]
pub trait PeerLink: Send {
    /// Synthesize and install the local offer description.
    async fn create_offer(&mut self) -> Result<SessionDescription, CallSessionError>;

    /// Synthesize and install the local answer description. Requires a
    /// remote offer to have been applied first.
    async fn create_answer(&mut self) -> Result<SessionDescription, CallSessionError>;

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallSessionError>;

    /// Apply a remote connectivity candidate. Duplicates must be ignorable.
    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallSessionError>;

    /// The link's event stream. Yields `None` on the second call; the
    /// session controller takes it exactly once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerLinkEvent>>;

    async fn close(&mut self);
}

// ==============================================================================
// LOOPBACK PEER LINK
// ==============================================================================

struct LoopbackShared {
    events: [mpsc::UnboundedSender<PeerLinkEvent>; 2],
    local_description: [Option<SessionDescription>; 2],
    remote_description: [Option<SessionDescription>; 2],
    applied_candidates: [Vec<IceCandidate>; 2],
    seen_candidates: [HashSet<String>; 2],
    closed: [bool; 2],
    media_started: bool,
    candidate_seq: u32,
}

impl LoopbackShared {
    // Once both sides hold a local and a remote description the pretend
    // media path comes up on both at once.
    fn maybe_connect(&mut self) {
        if self.media_started {
            return;
        }
        let ready = (0..2).all(|side| {
            self.local_description[side].is_some() && self.remote_description[side].is_some()
        });
        if !ready {
            return;
        }
        self.media_started = true;
        for tx in &self.events {
            let _ = tx.send(PeerLinkEvent::StateChanged(PeerLinkState::Connected));
            let _ = tx.send(PeerLinkEvent::RemoteMediaStarted);
        }
    }

    fn next_candidate(&mut self, side: usize) -> IceCandidate {
        self.candidate_seq += 1;
        IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2122260223 192.0.2.{} 5000{} typ host",
                self.candidate_seq,
                side + 1,
                side
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// Two peer links joined in memory: descriptions and candidates applied on
/// one side become observable on the other, and once both sides hold both
/// descriptions each reports inbound media. Deterministic, no networking.
pub struct LoopbackPeerLink {
    side: usize,
    shared: Arc<Mutex<LoopbackShared>>,
    events_rx: Option<mpsc::UnboundedReceiver<PeerLinkEvent>>,
}

impl LoopbackPeerLink {
    pub fn pair() -> (LoopbackPeerLink, LoopbackPeerLink) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(LoopbackShared {
            events: [tx_a, tx_b],
            local_description: [None, None],
            remote_description: [None, None],
            applied_candidates: [Vec::new(), Vec::new()],
            seen_candidates: [HashSet::new(), HashSet::new()],
            closed: [false, false],
            media_started: false,
            candidate_seq: 0,
        }));

        (
            LoopbackPeerLink {
                side: 0,
                shared: Arc::clone(&shared),
                events_rx: Some(rx_a),
            },
            LoopbackPeerLink {
                side: 1,
                shared,
                events_rx: Some(rx_b),
            },
        )
    }

    /// Observer for assertions after the link has been handed to a session.
    pub fn probe(&self) -> LoopbackProbe {
        LoopbackProbe {
            side: self.side,
            shared: Arc::clone(&self.shared),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LoopbackShared>, CallSessionError> {
        self.shared
            .lock()
            .map_err(|_| CallSessionError::protocol("loopback link state poisoned"))
    }

    fn synthesize(&self, sdp_type: SdpType) -> Result<SessionDescription, CallSessionError> {
        let mut shared = self.lock()?;
        if shared.closed[self.side] {
            return Err(CallSessionError::protocol("peer link is closed"));
        }
        if sdp_type == SdpType::Answer && shared.remote_description[self.side].is_none() {
            return Err(CallSessionError::protocol(
                "cannot create an answer without a remote offer",
            ));
        }

        let description = SessionDescription {
            sdp_type,
            sdp: format!("v=0 loopback {} side {}", sdp_type, self.side),
        };
        shared.local_description[self.side] = Some(description.clone());

        // Candidate discovery kicks off as soon as a local description
        // exists, mirroring how real gathering behaves.
        let candidate = shared.next_candidate(self.side);
        let _ = shared.events[self.side].send(PeerLinkEvent::CandidateDiscovered(candidate));
        let _ = shared.events[self.side].send(PeerLinkEvent::StateChanged(PeerLinkState::Connecting));

        shared.maybe_connect();
        Ok(description)
    }
}

#[async_trait]
impl PeerLink for LoopbackPeerLink {
    async fn create_offer(&mut self) -> Result<SessionDescription, CallSessionError> {
        self.synthesize(SdpType::Offer)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, CallSessionError> {
        self.synthesize(SdpType::Answer)
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallSessionError> {
        let mut shared = self.lock()?;
        if shared.closed[self.side] {
            return Err(CallSessionError::protocol("peer link is closed"));
        }
        shared.remote_description[self.side] = Some(description);
        shared.maybe_connect();
        Ok(())
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallSessionError> {
        let mut shared = self.lock()?;
        if shared.closed[self.side] {
            return Ok(());
        }
        // Redundant delivery is expected; repeats are no-ops.
        if shared.seen_candidates[self.side].insert(candidate.candidate.clone()) {
            shared.applied_candidates[self.side].push(candidate);
        }
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerLinkEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            if shared.closed[self.side] {
                return;
            }
            shared.closed[self.side] = true;
            debug!(side = self.side, "loopback peer link closed");

            // The surviving side observes the drop the way a real transport
            // reports lost connectivity.
            let other = 1 - self.side;
            if !shared.closed[other] && shared.media_started {
                let _ =
                    shared.events[other].send(PeerLinkEvent::StateChanged(PeerLinkState::Disconnected));
            }
        }
    }
}

/// Read-only view into one side of a loopback pair, usable after the link
/// itself has been moved into a session.
#[derive(Clone)]
pub struct LoopbackProbe {
    side: usize,
    shared: Arc<Mutex<LoopbackShared>>,
}

impl LoopbackProbe {
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        match self.shared.lock() {
            Ok(shared) => shared.applied_candidates[self.side].clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.shared.lock() {
            Ok(shared) => shared.closed[self.side],
            Err(_) => false,
        }
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        match self.shared.lock() {
            Ok(shared) => shared.remote_description[self.side].clone(),
            Err(_) => None,
        }
    }
}
