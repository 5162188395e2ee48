// libs/call-session-cell/src/negotiation.rs
//! Pure negotiation state machine for one call session.
//!
//! Holds no I/O: every external happening is fed in as a [`NegotiationEvent`]
//! and every side effect comes back out as a [`NegotiationAction`] for the
//! session controller to execute. This keeps the offer/answer/candidate
//! ordering rules testable without media devices or a relay.

use tracing::{debug, warn};

use crate::models::{
    CallEndReason, CallRole, CallSessionError, CallState, IceCandidate, SdpType,
    SessionDescription, SignalingMessage,
};
use crate::services::peer_link::PeerLinkState;

/// External happenings fed into the machine by the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    /// Session start requested by the owner.
    Start,
    /// Local camera/microphone capture is ready.
    MediaReady,
    /// Local capture could not be acquired.
    MediaFailed { message: String },
    /// A message arrived on the appointment's signaling channel.
    SignalReceived(SignalingMessage),
    /// The peer link finished synthesizing a local description.
    LocalDescriptionReady(SessionDescription),
    /// The peer link discovered a local connectivity candidate.
    LocalCandidate(IceCandidate),
    /// Inbound media started arriving from the remote peer.
    RemoteMediaStarted,
    /// The peer link's underlying connectivity changed.
    LinkStateChanged(PeerLinkState),
    /// The negotiation timer expired before the call connected.
    TimeoutExpired,
    /// The local owner hung up.
    HangUp,
    /// The owning view was dropped without an explicit hangup.
    TornDown,
}

/// Side effects for the session controller to execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationAction {
    AcquireMedia,
    CreateOffer,
    CreateAnswer,
    ApplyRemoteDescription(SessionDescription),
    ApplyCandidate(IceCandidate),
    Publish(SignalingMessage),
    StartTimer,
    NotifyConnected,
    EndSession(CallEndReason),
    FailSession(CallSessionError),
}

pub struct NegotiationStateMachine {
    role: CallRole,
    state: CallState,
    timeout_secs: u64,
    remote_description_applied: bool,
    local_description_published: bool,
    // Offer that arrived while local media was still being acquired; replayed
    // on MediaReady. The relay orders messages per sender only, so the remote
    // offer can legitimately beat our own media callback.
    pending_offer: Option<SessionDescription>,
    // Candidates that arrived before the remote description; flushed in
    // receipt order immediately after it is applied.
    pending_candidates: Vec<IceCandidate>,
}

impl NegotiationStateMachine {
    pub fn new(role: CallRole, timeout_secs: u64) -> Self {
        Self {
            role,
            state: CallState::Idle,
            timeout_secs,
            remote_description_applied: false,
            local_description_published: false,
            pending_offer: None,
            pending_candidates: Vec::new(),
        }
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Advance the machine. Returns the actions the controller must execute,
    /// in order. Events arriving after a terminal state are no-ops: completion
    /// callbacks for a torn-down session must be safely ignorable.
    pub fn handle(&mut self, event: NegotiationEvent) -> Vec<NegotiationAction> {
        if self.state.is_terminal() {
            debug!(state = %self.state, ?event, "ignoring event in terminal state");
            return Vec::new();
        }

        match event {
            NegotiationEvent::Start => self.on_start(),
            NegotiationEvent::MediaReady => self.on_media_ready(),
            NegotiationEvent::MediaFailed { message } => {
                self.fail(CallSessionError::media(message))
            }
            NegotiationEvent::SignalReceived(message) => self.on_signal(message),
            NegotiationEvent::LocalDescriptionReady(description) => {
                self.on_local_description(description)
            }
            NegotiationEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate),
            NegotiationEvent::RemoteMediaStarted => self.on_remote_media(),
            NegotiationEvent::LinkStateChanged(link_state) => self.on_link_state(link_state),
            NegotiationEvent::TimeoutExpired => self.on_timeout(),
            NegotiationEvent::HangUp => self.end(CallEndReason::HungUp),
            NegotiationEvent::TornDown => self.end(CallEndReason::TornDown),
        }
    }

    /// Force the session into `Failed` for an error detected outside the
    /// protocol itself (publish failure, undecodable payload, closed channel).
    pub fn fail(&mut self, error: CallSessionError) -> Vec<NegotiationAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        warn!(role = %self.role, state = %self.state, %error, "call session failed");
        self.state = CallState::Failed;
        vec![NegotiationAction::FailSession(error)]
    }

    fn end(&mut self, reason: CallEndReason) -> Vec<NegotiationAction> {
        debug!(role = %self.role, state = %self.state, %reason, "call session ending");
        self.state = CallState::Ended;
        vec![NegotiationAction::EndSession(reason)]
    }

    fn on_start(&mut self) -> Vec<NegotiationAction> {
        match self.state {
            CallState::Idle => {
                self.state = CallState::AcquiringMedia;
                vec![NegotiationAction::AcquireMedia]
            }
            _ => {
                warn!(state = %self.state, "start requested twice");
                Vec::new()
            }
        }
    }

    fn on_media_ready(&mut self) -> Vec<NegotiationAction> {
        if self.state != CallState::AcquiringMedia {
            debug!(state = %self.state, "media ready ignored");
            return Vec::new();
        }

        self.state = CallState::Negotiating;
        let mut actions = vec![NegotiationAction::StartTimer];

        match self.role {
            CallRole::Initiator => actions.push(NegotiationAction::CreateOffer),
            CallRole::Responder => {
                // Replay an offer that raced ahead of media acquisition.
                if let Some(offer) = self.pending_offer.take() {
                    actions.extend(self.apply_remote(offer));
                    actions.push(NegotiationAction::CreateAnswer);
                }
            }
        }

        actions
    }

    fn on_signal(&mut self, message: SignalingMessage) -> Vec<NegotiationAction> {
        match message {
            SignalingMessage::Offer { sdp } => self.on_offer(sdp),
            SignalingMessage::Answer { sdp } => self.on_answer(sdp),
            SignalingMessage::IceCandidate { candidate } => self.on_remote_candidate(candidate),
        }
    }

    fn on_offer(&mut self, sdp: SessionDescription) -> Vec<NegotiationAction> {
        if self.role == CallRole::Initiator {
            // Either the relay echoed our own offer back or a second
            // negotiation attempt is underway; both must fail fast rather
            // than silently overwrite live state.
            return self.fail(CallSessionError::protocol(
                "offer received by the initiating peer",
            ));
        }

        if self.remote_description_applied || self.pending_offer.is_some() {
            return self.fail(CallSessionError::protocol(
                "duplicate offer for an already-negotiated session",
            ));
        }

        match self.state {
            CallState::AcquiringMedia => {
                self.pending_offer = Some(sdp);
                Vec::new()
            }
            CallState::Negotiating => {
                let mut actions = self.apply_remote(sdp);
                actions.push(NegotiationAction::CreateAnswer);
                actions
            }
            _ => {
                debug!(state = %self.state, "offer ignored");
                Vec::new()
            }
        }
    }

    fn on_answer(&mut self, sdp: SessionDescription) -> Vec<NegotiationAction> {
        if self.role == CallRole::Responder {
            return self.fail(CallSessionError::protocol(
                "answer received by the responding peer",
            ));
        }

        if !self.local_description_published {
            // An answer can only be provoked by our offer; anything earlier
            // is a stale message from a previous attempt.
            return self.fail(CallSessionError::protocol(
                "answer received before an offer was published",
            ));
        }

        if self.remote_description_applied {
            return self.fail(CallSessionError::protocol(
                "duplicate answer for an already-negotiated session",
            ));
        }

        self.apply_remote(sdp)
    }

    fn apply_remote(&mut self, sdp: SessionDescription) -> Vec<NegotiationAction> {
        self.remote_description_applied = true;
        let mut actions = vec![NegotiationAction::ApplyRemoteDescription(sdp)];
        actions.extend(
            self.pending_candidates
                .drain(..)
                .map(NegotiationAction::ApplyCandidate),
        );
        actions
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Vec<NegotiationAction> {
        if self.remote_description_applied {
            vec![NegotiationAction::ApplyCandidate(candidate)]
        } else {
            self.pending_candidates.push(candidate);
            Vec::new()
        }
    }

    fn on_local_description(&mut self, description: SessionDescription) -> Vec<NegotiationAction> {
        if self.state != CallState::Negotiating {
            debug!(state = %self.state, "local description ignored");
            return Vec::new();
        }

        self.local_description_published = true;
        let message = match description.sdp_type {
            SdpType::Offer => SignalingMessage::Offer { sdp: description },
            SdpType::Answer => SignalingMessage::Answer { sdp: description },
        };
        vec![NegotiationAction::Publish(message)]
    }

    fn on_local_candidate(&mut self, candidate: IceCandidate) -> Vec<NegotiationAction> {
        // Candidate discovery is a stream and keeps going after the call
        // connects; later candidates can still improve the path.
        match self.state {
            CallState::Negotiating | CallState::Connected => {
                vec![NegotiationAction::Publish(SignalingMessage::IceCandidate {
                    candidate,
                })]
            }
            _ => {
                debug!(state = %self.state, "local candidate ignored");
                Vec::new()
            }
        }
    }

    fn on_remote_media(&mut self) -> Vec<NegotiationAction> {
        if self.state != CallState::Negotiating {
            debug!(state = %self.state, "remote media notification ignored");
            return Vec::new();
        }
        self.state = CallState::Connected;
        vec![NegotiationAction::NotifyConnected]
    }

    fn on_link_state(&mut self, link_state: PeerLinkState) -> Vec<NegotiationAction> {
        match (self.state, link_state) {
            (CallState::Connected, PeerLinkState::Disconnected)
            | (CallState::Connected, PeerLinkState::Failed) => {
                self.end(CallEndReason::RemoteDisconnected)
            }
            // Before the call is up, transient link states are expected;
            // the negotiation timer bounds the attempt.
            _ => {
                debug!(state = %self.state, ?link_state, "link state change ignored");
                Vec::new()
            }
        }
    }

    fn on_timeout(&mut self) -> Vec<NegotiationAction> {
        if self.state != CallState::Negotiating {
            return Vec::new();
        }
        let seconds = self.timeout_secs;
        warn!(role = %self.role, "negotiation timed out after {}s", seconds);
        self.state = CallState::Failed;
        vec![NegotiationAction::FailSession(
            CallSessionError::NegotiationTimeout { seconds },
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TIMEOUT: u64 = 30;

    fn offer() -> SessionDescription {
        SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 offer".to_string(),
        }
    }

    fn answer() -> SessionDescription {
        SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: "v=0 answer".to_string(),
        }
    }

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 192.0.2.1 54400 typ host", n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    fn started(role: CallRole) -> NegotiationStateMachine {
        let mut machine = NegotiationStateMachine::new(role, TIMEOUT);
        assert_eq!(
            machine.handle(NegotiationEvent::Start),
            vec![NegotiationAction::AcquireMedia]
        );
        assert_eq!(machine.state(), CallState::AcquiringMedia);
        machine
    }

    fn negotiating(role: CallRole) -> NegotiationStateMachine {
        let mut machine = started(role);
        machine.handle(NegotiationEvent::MediaReady);
        assert_eq!(machine.state(), CallState::Negotiating);
        machine
    }

    #[test]
    fn test_initiator_happy_path() {
        let mut machine = started(CallRole::Initiator);

        assert_eq!(
            machine.handle(NegotiationEvent::MediaReady),
            vec![NegotiationAction::StartTimer, NegotiationAction::CreateOffer]
        );

        assert_eq!(
            machine.handle(NegotiationEvent::LocalDescriptionReady(offer())),
            vec![NegotiationAction::Publish(SignalingMessage::Offer {
                sdp: offer()
            })]
        );

        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
                sdp: answer()
            })),
            vec![NegotiationAction::ApplyRemoteDescription(answer())]
        );

        assert_eq!(
            machine.handle(NegotiationEvent::RemoteMediaStarted),
            vec![NegotiationAction::NotifyConnected]
        );
        assert_eq!(machine.state(), CallState::Connected);
    }

    #[test]
    fn test_responder_happy_path() {
        let mut machine = negotiating(CallRole::Responder);

        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
                sdp: offer()
            })),
            vec![
                NegotiationAction::ApplyRemoteDescription(offer()),
                NegotiationAction::CreateAnswer,
            ]
        );

        assert_eq!(
            machine.handle(NegotiationEvent::LocalDescriptionReady(answer())),
            vec![NegotiationAction::Publish(SignalingMessage::Answer {
                sdp: answer()
            })]
        );

        machine.handle(NegotiationEvent::RemoteMediaStarted);
        assert_eq!(machine.state(), CallState::Connected);
    }

    #[test]
    fn test_responder_waits_for_offer_after_media() {
        let mut machine = started(CallRole::Responder);
        assert_eq!(
            machine.handle(NegotiationEvent::MediaReady),
            vec![NegotiationAction::StartTimer]
        );
    }

    #[test]
    fn test_offer_buffered_while_acquiring_media() {
        let mut machine = started(CallRole::Responder);

        // Offer and a candidate race ahead of local media acquisition.
        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
                sdp: offer()
            })),
            Vec::new()
        );
        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(
                SignalingMessage::IceCandidate {
                    candidate: candidate(1)
                }
            )),
            Vec::new()
        );

        assert_eq!(
            machine.handle(NegotiationEvent::MediaReady),
            vec![
                NegotiationAction::StartTimer,
                NegotiationAction::ApplyRemoteDescription(offer()),
                NegotiationAction::ApplyCandidate(candidate(1)),
                NegotiationAction::CreateAnswer,
            ]
        );
    }

    #[test]
    fn test_candidates_buffer_until_remote_description() {
        let mut machine = negotiating(CallRole::Responder);

        machine.handle(NegotiationEvent::SignalReceived(
            SignalingMessage::IceCandidate {
                candidate: candidate(1),
            },
        ));
        machine.handle(NegotiationEvent::SignalReceived(
            SignalingMessage::IceCandidate {
                candidate: candidate(2),
            },
        ));

        // Buffered candidates flush in receipt order right after the remote
        // description, before the answer is synthesized.
        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
                sdp: offer()
            })),
            vec![
                NegotiationAction::ApplyRemoteDescription(offer()),
                NegotiationAction::ApplyCandidate(candidate(1)),
                NegotiationAction::ApplyCandidate(candidate(2)),
                NegotiationAction::CreateAnswer,
            ]
        );

        // Later candidates apply immediately.
        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(
                SignalingMessage::IceCandidate {
                    candidate: candidate(3)
                }
            )),
            vec![NegotiationAction::ApplyCandidate(candidate(3))]
        );
    }

    #[test]
    fn test_candidates_still_applied_after_connected() {
        let mut machine = negotiating(CallRole::Initiator);
        machine.handle(NegotiationEvent::LocalDescriptionReady(offer()));
        machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));
        machine.handle(NegotiationEvent::RemoteMediaStarted);
        assert_eq!(machine.state(), CallState::Connected);

        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(
                SignalingMessage::IceCandidate {
                    candidate: candidate(7)
                }
            )),
            vec![NegotiationAction::ApplyCandidate(candidate(7))]
        );
        assert_eq!(
            machine.handle(NegotiationEvent::LocalCandidate(candidate(8))),
            vec![NegotiationAction::Publish(SignalingMessage::IceCandidate {
                candidate: candidate(8)
            })]
        );
    }

    #[test]
    fn test_second_offer_fails_without_overwriting() {
        let mut machine = negotiating(CallRole::Responder);
        machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
            sdp: offer(),
        }));
        machine.handle(NegotiationEvent::LocalDescriptionReady(answer()));

        let actions = machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
            sdp: offer(),
        }));
        assert_matches!(
            actions.as_slice(),
            [NegotiationAction::FailSession(CallSessionError::Protocol { .. })]
        );
        assert_eq!(machine.state(), CallState::Failed);
    }

    #[test]
    fn test_offer_to_initiator_is_fatal() {
        let mut machine = negotiating(CallRole::Initiator);
        let actions = machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
            sdp: offer(),
        }));
        assert_matches!(
            actions.as_slice(),
            [NegotiationAction::FailSession(CallSessionError::Protocol { .. })]
        );
    }

    #[test]
    fn test_answer_to_responder_is_fatal() {
        let mut machine = negotiating(CallRole::Responder);
        let actions = machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));
        assert_matches!(
            actions.as_slice(),
            [NegotiationAction::FailSession(CallSessionError::Protocol { .. })]
        );
    }

    #[test]
    fn test_answer_before_offer_published_is_stale() {
        let mut machine = negotiating(CallRole::Initiator);
        // CreateOffer is still in flight; no offer has been published yet.
        let actions = machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));
        assert_matches!(
            actions.as_slice(),
            [NegotiationAction::FailSession(CallSessionError::Protocol { .. })]
        );
    }

    #[test]
    fn test_duplicate_answer_is_fatal() {
        let mut machine = negotiating(CallRole::Initiator);
        machine.handle(NegotiationEvent::LocalDescriptionReady(offer()));
        machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));

        let actions = machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));
        assert_matches!(
            actions.as_slice(),
            [NegotiationAction::FailSession(CallSessionError::Protocol { .. })]
        );
    }

    #[test]
    fn test_media_failure_fails_before_any_publish() {
        let mut machine = started(CallRole::Initiator);
        let actions = machine.handle(NegotiationEvent::MediaFailed {
            message: "permission denied".to_string(),
        });
        assert_matches!(
            actions.as_slice(),
            [NegotiationAction::FailSession(
                CallSessionError::MediaAcquisition { .. }
            )]
        );
        assert_eq!(machine.state(), CallState::Failed);
    }

    #[test]
    fn test_timeout_only_fires_while_negotiating() {
        let mut machine = negotiating(CallRole::Responder);
        let actions = machine.handle(NegotiationEvent::TimeoutExpired);
        assert_eq!(
            actions,
            vec![NegotiationAction::FailSession(
                CallSessionError::NegotiationTimeout { seconds: TIMEOUT }
            )]
        );

        let mut machine = negotiating(CallRole::Initiator);
        machine.handle(NegotiationEvent::LocalDescriptionReady(offer()));
        machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));
        machine.handle(NegotiationEvent::RemoteMediaStarted);
        assert_eq!(machine.handle(NegotiationEvent::TimeoutExpired), Vec::new());
    }

    #[test]
    fn test_hangup_and_teardown_reasons() {
        let mut machine = negotiating(CallRole::Initiator);
        assert_eq!(
            machine.handle(NegotiationEvent::HangUp),
            vec![NegotiationAction::EndSession(CallEndReason::HungUp)]
        );
        assert_eq!(machine.state(), CallState::Ended);

        let mut machine = started(CallRole::Responder);
        assert_eq!(
            machine.handle(NegotiationEvent::TornDown),
            vec![NegotiationAction::EndSession(CallEndReason::TornDown)]
        );
    }

    #[test]
    fn test_link_drop_ends_connected_call_only() {
        let mut machine = negotiating(CallRole::Initiator);
        assert_eq!(
            machine.handle(NegotiationEvent::LinkStateChanged(
                PeerLinkState::Disconnected
            )),
            Vec::new()
        );

        machine.handle(NegotiationEvent::LocalDescriptionReady(offer()));
        machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Answer {
            sdp: answer(),
        }));
        machine.handle(NegotiationEvent::RemoteMediaStarted);

        assert_eq!(
            machine.handle(NegotiationEvent::LinkStateChanged(PeerLinkState::Failed)),
            vec![NegotiationAction::EndSession(
                CallEndReason::RemoteDisconnected
            )]
        );
    }

    #[test]
    fn test_terminal_states_ignore_everything() {
        let mut machine = negotiating(CallRole::Initiator);
        machine.handle(NegotiationEvent::HangUp);

        assert_eq!(machine.handle(NegotiationEvent::MediaReady), Vec::new());
        assert_eq!(
            machine.handle(NegotiationEvent::LocalDescriptionReady(offer())),
            Vec::new()
        );
        assert_eq!(
            machine.handle(NegotiationEvent::SignalReceived(SignalingMessage::Offer {
                sdp: offer()
            })),
            Vec::new()
        );
        assert_eq!(machine.handle(NegotiationEvent::HangUp), Vec::new());
        assert_eq!(
            machine.fail(CallSessionError::transport("late error")),
            Vec::new()
        );
    }
}
