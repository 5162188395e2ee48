// libs/call-session-cell/src/services/webrtc.rs
//! Production peer link over the `webrtc` crate.
//!
//! Configures STUN from [`AppConfig`], registers the default codec set, and
//! maps the connection's callbacks onto [`PeerLinkEvent`]s. The link adds one
//! audio and one video transceiver; attaching real capture tracks is the
//! consuming dashboard's concern, like the rest of the media adapter.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use shared_config::AppConfig;

use crate::models::{CallSessionError, IceCandidate, SdpType, SessionDescription};
use crate::services::peer_link::{PeerLink, PeerLinkEvent, PeerLinkState};

pub struct WebRtcPeerLink {
    connection: Arc<RTCPeerConnection>,
    events_rx: Option<mpsc::UnboundedReceiver<PeerLinkEvent>>,
}

impl WebRtcPeerLink {
    pub async fn new(config: &AppConfig) -> Result<Self, CallSessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallSessionError::protocol(format!("codec registration: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallSessionError::protocol(format!("interceptor registration: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| CallSessionError::protocol(format!("peer connection: {}", e)))?,
        );

        connection
            .add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .map_err(|e| CallSessionError::protocol(format!("audio transceiver: {}", e)))?;
        connection
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .map_err(|e| CallSessionError::protocol(format!("video transceiver: {}", e)))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        connection.on_ice_candidate(Box::new(move |candidate| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                // None marks the end of gathering; there is nothing to relay.
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(PeerLinkEvent::CandidateDiscovered(
                            IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            },
                        ));
                    }
                    Err(e) => warn!("discarding unserializable candidate: {}", e),
                }
            })
        }));

        let track_tx = events_tx.clone();
        connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            debug!(kind = %track.kind(), "remote track started");
            let _ = track_tx.send(PeerLinkEvent::RemoteMediaStarted);
            Box::pin(async {})
        }));

        connection.on_peer_connection_state_change(Box::new(move |state| {
            let mapped = match state {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                    PeerLinkState::New
                }
                RTCPeerConnectionState::Connecting => PeerLinkState::Connecting,
                RTCPeerConnectionState::Connected => PeerLinkState::Connected,
                RTCPeerConnectionState::Disconnected => PeerLinkState::Disconnected,
                RTCPeerConnectionState::Failed => PeerLinkState::Failed,
                RTCPeerConnectionState::Closed => PeerLinkState::Closed,
            };
            let _ = events_tx.send(PeerLinkEvent::StateChanged(mapped));
            Box::pin(async {})
        }));

        Ok(Self {
            connection,
            events_rx: Some(events_rx),
        })
    }
}

#[async_trait]
impl PeerLink for WebRtcPeerLink {
    async fn create_offer(&mut self) -> Result<SessionDescription, CallSessionError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| CallSessionError::protocol(format!("create offer: {}", e)))?;
        let sdp = offer.sdp.clone();
        self.connection
            .set_local_description(offer)
            .await
            .map_err(|e| CallSessionError::protocol(format!("set local description: {}", e)))?;
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp,
        })
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, CallSessionError> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| CallSessionError::protocol(format!("create answer: {}", e)))?;
        let sdp = answer.sdp.clone();
        self.connection
            .set_local_description(answer)
            .await
            .map_err(|e| CallSessionError::protocol(format!("set local description: {}", e)))?;
        Ok(SessionDescription {
            sdp_type: SdpType::Answer,
            sdp,
        })
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallSessionError> {
        let description = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| CallSessionError::protocol(format!("malformed description: {}", e)))?;

        self.connection
            .set_remote_description(description)
            .await
            .map_err(|e| CallSessionError::protocol(format!("set remote description: {}", e)))
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallSessionError> {
        self.connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| CallSessionError::protocol(format!("add candidate: {}", e)))
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerLinkEvent>> {
        self.events_rx.take()
    }

    async fn close(&mut self) {
        if let Err(e) = self.connection.close().await {
            warn!("error closing peer connection: {}", e);
        }
    }
}
