// libs/call-session-cell/src/services/session.rs
//! Call session controller.
//!
//! One `CallSession` per appointment per process: it owns the local media
//! handle, the peer link, and the signaling subscription, drives the
//! negotiation state machine from a single event loop, and releases
//! everything through one teardown path no matter how the session exits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    CallEndReason, CallEvent, CallRole, CallSessionError, CallState, MediaConstraints,
    MediaTrackKind, SignalingMessage,
};
use crate::negotiation::{NegotiationAction, NegotiationEvent, NegotiationStateMachine};
use crate::services::media::{MediaHandle, MediaSource};
use crate::services::peer_link::{PeerLink, PeerLinkEvent};
use crate::services::signaling::{channel_key, SignalingChannel, SignalingTransport};

type MediaSlot = Arc<Mutex<Option<Box<dyn MediaHandle>>>>;

enum SessionCommand {
    HangUp,
}

enum SessionOutcome {
    Ended(CallEndReason),
    Failed(CallSessionError),
}

/// One attempt to connect two peers for one appointment.
///
/// Constructed with [`CallSession::start`]; destroyed by [`CallSession::end`]
/// or by dropping the value. Eligibility is the caller's contract: dashboards
/// check the policy in [`crate::eligibility`] before starting a session, and
/// the session does not re-check it. It still fails closed if media
/// acquisition or the signaling subscription fails.
pub struct CallSession {
    appointment_id: Uuid,
    role: CallRole,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    events_rx: Option<mpsc::UnboundedReceiver<CallEvent>>,
    media: MediaSlot,
    state_rx: watch::Receiver<CallState>,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("appointment_id", &self.appointment_id)
            .field("role", &self.role)
            .field("events_rx", &self.events_rx.is_some())
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl CallSession {
    /// Subscribe to the appointment's signaling channel and start driving
    /// the negotiation. A subscription failure is returned directly; every
    /// later failure arrives as [`CallEvent::Failed`], never both.
    pub async fn start(
        appointment_id: Uuid,
        role: CallRole,
        config: Arc<AppConfig>,
        transport: Arc<dyn SignalingTransport>,
        media_source: Arc<dyn MediaSource>,
        mut peer_link: Box<dyn PeerLink>,
    ) -> Result<Self, CallSessionError> {
        let key = channel_key(&config.signaling_channel_prefix, appointment_id);
        let channel = transport.subscribe(&key).await?;

        let link_events = peer_link
            .take_events()
            .ok_or_else(|| CallSessionError::protocol("peer link event stream already taken"))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CallState::Idle);
        let media: MediaSlot = Arc::new(Mutex::new(None));

        let timeout = Duration::from_secs(config.negotiation_timeout_secs);
        let session_loop = SessionLoop {
            appointment_id,
            machine: NegotiationStateMachine::new(role, config.negotiation_timeout_secs),
            channel,
            peer_link,
            link_events,
            media_source,
            media: Arc::clone(&media),
            event_tx,
            command_rx,
            state_tx,
            timer: Box::pin(tokio::time::sleep(timeout)),
            timer_armed: false,
            timeout,
            commands_open: true,
            channel_open: true,
            links_open: true,
            done: false,
        };
        tokio::spawn(session_loop.run());

        info!(%appointment_id, %role, "call session started");

        Ok(Self {
            appointment_id,
            role,
            command_tx,
            events_rx: Some(events_rx),
            media,
            state_rx,
        })
    }

    pub fn appointment_id(&self) -> Uuid {
        self.appointment_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        *self.state_rx.borrow()
    }

    /// Lifecycle notifications for the owner. Taken exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.events_rx.take()
    }

    /// Flip the local audio track. Purely local, no signaling traffic.
    /// Returns whether the microphone is now muted; a no-op without live
    /// media.
    pub fn toggle_mute(&self) -> bool {
        self.toggle_track(MediaTrackKind::Audio)
    }

    /// Flip the local video track. Returns whether the camera is now off.
    pub fn toggle_video(&self) -> bool {
        self.toggle_track(MediaTrackKind::Video)
    }

    fn toggle_track(&self, kind: MediaTrackKind) -> bool {
        if let Ok(mut slot) = self.media.lock() {
            if let Some(handle) = slot.as_mut() {
                let enabled = !handle.is_track_enabled(kind);
                handle.set_track_enabled(kind, enabled);
                return !enabled;
            }
        }
        false
    }

    /// Hang up. Idempotent: safe to call repeatedly and after the session
    /// has already ended or failed.
    pub fn end(&self) {
        let _ = self.command_tx.send(SessionCommand::HangUp);
    }
}

// Dropping the owner closes the command channel; the loop observes it and
// tears the session down, so a view unmounting mid-negotiation cannot leak
// the media device, the link, or the subscription.

struct SessionLoop {
    appointment_id: Uuid,
    machine: NegotiationStateMachine,
    channel: Box<dyn SignalingChannel>,
    peer_link: Box<dyn PeerLink>,
    link_events: mpsc::UnboundedReceiver<PeerLinkEvent>,
    media_source: Arc<dyn MediaSource>,
    media: MediaSlot,
    event_tx: mpsc::UnboundedSender<CallEvent>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    state_tx: watch::Sender<CallState>,
    timer: std::pin::Pin<Box<Sleep>>,
    timer_armed: bool,
    timeout: Duration,
    commands_open: bool,
    channel_open: bool,
    links_open: bool,
    done: bool,
}

impl SessionLoop {
    async fn run(mut self) {
        self.dispatch(NegotiationEvent::Start).await;

        while !self.done {
            tokio::select! {
                command = self.command_rx.recv(), if self.commands_open => match command {
                    Some(SessionCommand::HangUp) => {
                        self.dispatch(NegotiationEvent::HangUp).await;
                    }
                    None => {
                        self.commands_open = false;
                        self.dispatch(NegotiationEvent::TornDown).await;
                    }
                },
                payload = self.channel.recv(), if self.channel_open => match payload {
                    Some(value) => match serde_json::from_value::<SignalingMessage>(value) {
                        Ok(message) => {
                            self.dispatch(NegotiationEvent::SignalReceived(message)).await;
                        }
                        Err(e) => {
                            self.fail(CallSessionError::protocol(format!(
                                "undecodable signaling payload: {}",
                                e
                            )))
                            .await;
                        }
                    },
                    None => {
                        self.channel_open = false;
                        if self.machine.state() == CallState::Connected {
                            // The media path no longer depends on the relay;
                            // teardown is driven by the link state instead.
                            warn!(
                                appointment_id = %self.appointment_id,
                                "signaling channel dropped on a connected call"
                            );
                        } else {
                            self.fail(CallSessionError::transport("signaling channel closed"))
                                .await;
                        }
                    }
                },
                event = self.link_events.recv(), if self.links_open => match event {
                    Some(PeerLinkEvent::CandidateDiscovered(candidate)) => {
                        self.dispatch(NegotiationEvent::LocalCandidate(candidate)).await;
                    }
                    Some(PeerLinkEvent::RemoteMediaStarted) => {
                        self.dispatch(NegotiationEvent::RemoteMediaStarted).await;
                    }
                    Some(PeerLinkEvent::StateChanged(state)) => {
                        self.dispatch(NegotiationEvent::LinkStateChanged(state)).await;
                    }
                    None => self.links_open = false,
                },
                () = self.timer.as_mut(), if self.timer_armed => {
                    self.timer_armed = false;
                    self.dispatch(NegotiationEvent::TimeoutExpired).await;
                }
                else => {
                    // Every input source is gone; nothing can ever progress.
                    self.dispatch(NegotiationEvent::TornDown).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, event: NegotiationEvent) {
        let actions = self.machine.handle(event);
        self.process(actions).await;
    }

    async fn fail(&mut self, error: CallSessionError) {
        let actions = self.machine.fail(error);
        self.process(actions).await;
    }

    async fn process(&mut self, actions: Vec<NegotiationAction>) {
        let mut queue: VecDeque<NegotiationAction> = actions.into();
        let _ = self.state_tx.send(self.machine.state());

        while let Some(action) = queue.pop_front() {
            if self.done {
                break;
            }

            match action {
                NegotiationAction::AcquireMedia => {
                    match self.media_source.acquire(MediaConstraints::default()).await {
                        Ok(handle) => {
                            if let Ok(mut slot) = self.media.lock() {
                                *slot = Some(handle);
                            }
                            queue.extend(self.machine.handle(NegotiationEvent::MediaReady));
                        }
                        Err(error) => {
                            let message = match error {
                                CallSessionError::MediaAcquisition { message } => message,
                                other => other.to_string(),
                            };
                            queue.extend(
                                self.machine.handle(NegotiationEvent::MediaFailed { message }),
                            );
                        }
                    }
                }
                NegotiationAction::CreateOffer => match self.peer_link.create_offer().await {
                    Ok(description) => {
                        queue.extend(
                            self.machine
                                .handle(NegotiationEvent::LocalDescriptionReady(description)),
                        );
                    }
                    Err(error) => {
                        queue.clear();
                        queue.extend(self.machine.fail(error));
                    }
                },
                NegotiationAction::CreateAnswer => match self.peer_link.create_answer().await {
                    Ok(description) => {
                        queue.extend(
                            self.machine
                                .handle(NegotiationEvent::LocalDescriptionReady(description)),
                        );
                    }
                    Err(error) => {
                        queue.clear();
                        queue.extend(self.machine.fail(error));
                    }
                },
                NegotiationAction::ApplyRemoteDescription(description) => {
                    if let Err(error) = self.peer_link.apply_remote_description(description).await {
                        queue.clear();
                        queue.extend(self.machine.fail(error));
                    }
                }
                NegotiationAction::ApplyCandidate(candidate) => {
                    // Candidate failures are not fatal; the link keeps trying
                    // the paths it already has.
                    if let Err(error) = self.peer_link.apply_candidate(candidate).await {
                        warn!(
                            appointment_id = %self.appointment_id,
                            %error,
                            "failed to apply remote candidate"
                        );
                    }
                }
                NegotiationAction::Publish(message) => match serde_json::to_value(&message) {
                    Ok(payload) => {
                        if let Err(error) = self.channel.publish(payload).await {
                            queue.clear();
                            queue.extend(self.machine.fail(error));
                        }
                    }
                    Err(e) => {
                        queue.clear();
                        queue.extend(self.machine.fail(CallSessionError::protocol(format!(
                            "unserializable signaling message: {}",
                            e
                        ))));
                    }
                },
                NegotiationAction::StartTimer => {
                    self.timer.as_mut().reset(Instant::now() + self.timeout);
                    self.timer_armed = true;
                }
                NegotiationAction::NotifyConnected => {
                    self.timer_armed = false;
                    debug!(appointment_id = %self.appointment_id, "call connected");
                    let _ = self.event_tx.send(CallEvent::Connected);
                }
                NegotiationAction::EndSession(reason) => {
                    self.teardown(SessionOutcome::Ended(reason)).await;
                }
                NegotiationAction::FailSession(error) => {
                    self.teardown(SessionOutcome::Failed(error)).await;
                }
            }

            let _ = self.state_tx.send(self.machine.state());
        }
    }

    /// The single exit path. Releases the media device, closes the peer
    /// link, drops the signaling subscription, and notifies the owner
    /// exactly once, whichever way the session ends.
    async fn teardown(&mut self, outcome: SessionOutcome) {
        if self.done {
            return;
        }
        self.done = true;
        self.timer_armed = false;

        if let Ok(mut slot) = self.media.lock() {
            if let Some(mut handle) = slot.take() {
                handle.release();
            }
        }
        self.peer_link.close().await;
        self.channel.unsubscribe().await;

        let event = match outcome {
            SessionOutcome::Ended(reason) => {
                info!(appointment_id = %self.appointment_id, %reason, "call session ended");
                CallEvent::Ended { reason }
            }
            SessionOutcome::Failed(error) => {
                warn!(appointment_id = %self.appointment_id, %error, "call session failed");
                CallEvent::Failed { error }
            }
        };
        let _ = self.state_tx.send(self.machine.state());
        let _ = self.event_tx.send(event);
    }
}
