// libs/call-session-cell/src/models.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use shared_models::UserRole;

// ==============================================================================
// SIGNALING WIRE MODELS
// ==============================================================================

/// One peer's proposed media/transport parameters, exchanged as offer/answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// One possible network path to a peer. Field names follow the browser's
/// candidate JSON so dashboard payloads pass through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages relayed over an appointment's signaling channel. Each message is
/// self-contained; the relay treats the payload as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Offer { sdp: SessionDescription },
    Answer { sdp: SessionDescription },
    IceCandidate { candidate: IceCandidate },
}

// ==============================================================================
// CALL SESSION DOMAIN MODELS
// ==============================================================================

/// Negotiation role for one call attempt. The booking party (the patient)
/// initiates; the doctor responds. Payment gating lives in the eligibility
/// policy, not here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    Initiator,
    Responder,
}

impl From<UserRole> for CallRole {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Patient => CallRole::Initiator,
            UserRole::Doctor => CallRole::Responder,
        }
    }
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Initiator => write!(f, "initiator"),
            CallRole::Responder => write!(f, "responder"),
        }
    }
}

/// Lifecycle state of one call session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    AcquiringMedia,
    Negotiating,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::AcquiringMedia => write!(f, "acquiring_media"),
            CallState::Negotiating => write!(f, "negotiating"),
            CallState::Connected => write!(f, "connected"),
            CallState::Ended => write!(f, "ended"),
            CallState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a session reached `Ended` (as opposed to `Failed`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallEndReason {
    HungUp,
    RemoteDisconnected,
    TornDown,
}

impl fmt::Display for CallEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEndReason::HungUp => write!(f, "hung_up"),
            CallEndReason::RemoteDisconnected => write!(f, "remote_disconnected"),
            CallEndReason::TornDown => write!(f, "torn_down"),
        }
    }
}

/// Lifecycle notifications delivered to the session's owner. `Connected`
/// fires at most once, followed by at most one of `Ended`/`Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Connected,
    Ended { reason: CallEndReason },
    Failed { error: CallSessionError },
}

// ==============================================================================
// MEDIA MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaTrackKind {
    Audio,
    Video,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

/// Fatal error taxonomy for one call attempt. Every variant transitions the
/// session to `Failed`, releases all owned resources, and is reported to the
/// owner exactly once. Nothing here is retried internally; the owner decides
/// whether to construct a fresh session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallSessionError {
    #[error("Media acquisition failed: {message}")]
    MediaAcquisition { message: String },

    #[error("Signaling transport error: {message}")]
    SignalingTransport { message: String },

    #[error("Signaling protocol violation: {message}")]
    Protocol { message: String },

    #[error("No connection within {seconds}s of starting negotiation")]
    NegotiationTimeout { seconds: u64 },
}

impl CallSessionError {
    pub fn media(message: impl Into<String>) -> Self {
        CallSessionError::MediaAcquisition {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        CallSessionError::SignalingTransport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CallSessionError::Protocol {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_format() {
        let message = SignalingMessage::Offer {
            sdp: SessionDescription {
                sdp_type: SdpType::Offer,
                sdp: "v=0\r\n".to_string(),
            },
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], json!("offer"));
        assert_eq!(value["sdp"]["type"], json!("offer"));
        assert_eq!(value["sdp"]["sdp"], json!("v=0\r\n"));
    }

    #[test]
    fn test_candidate_wire_format_matches_browser_json() {
        let message = SignalingMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: Some("abcd".to_string()),
            },
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], json!("ice-candidate"));
        assert_eq!(value["candidate"]["sdpMid"], json!("0"));
        assert_eq!(value["candidate"]["sdpMLineIndex"], json!(0));
        assert_eq!(value["candidate"]["usernameFragment"], json!("abcd"));

        let parsed: SignalingMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_role_derives_from_user_role() {
        assert_eq!(CallRole::from(UserRole::Patient), CallRole::Initiator);
        assert_eq!(CallRole::from(UserRole::Doctor), CallRole::Responder);
    }

    #[test]
    fn test_terminal_states() {
        assert!(CallState::Ended.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(!CallState::Connected.is_terminal());
        assert!(!CallState::Idle.is_terminal());
    }
}
