// libs/call-session-cell/src/lib.rs
//! # Call Session Cell
//!
//! This cell establishes direct audio/video consultations between a patient
//! and a doctor for a scheduled appointment, negotiating the connection over
//! a relay-based signaling channel before a direct media path exists.
//!
//! ## Features
//!
//! - **Call Eligibility**: pure call-window policy driving dashboard
//!   countdowns and join buttons
//! - **Offer/Answer Negotiation**: role-aware state machine with candidate
//!   buffering, duplicate detection, and a bounded negotiation timeout
//! - **Session Lifecycle**: single-owner sessions with exactly-once resource
//!   release on every exit path
//! - **Pluggable Transports**: signaling, media capture, and the peer link
//!   are ports with in-memory implementations for deterministic tests
//!
//! ## Architecture
//!
//! The cell follows the established cell architecture pattern:
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Call Session Cell                   |
//! +-----------------------------------------------------+
//! |  models.rs      |  Data structures & wire formats   |
//! |  eligibility.rs |  Call-window policy (pure)        |
//! |  negotiation.rs |  Negotiation state machine (pure) |
//! |  services/      |  Ports & the session controller   |
//! |    signaling.rs |  Relay contract + in-memory hub   |
//! |    media.rs     |  Capture contract + in-memory src |
//! |    peer_link.rs |  Peer link contract + loopback    |
//! |    webrtc.rs    |  Production link (feature-gated)  |
//! |    session.rs   |  Call session controller          |
//! +-----------------------------------------------------+
//! ```
//!
//! The state machine performs no I/O; the session controller executes its
//! actions against the ports and feeds completions back as events. Dashboards
//! check [`eligibility::is_call_eligible`] before constructing a session and
//! retry, if they choose to, by constructing a fresh one.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use call_session_cell::models::CallRole;
//! use call_session_cell::services::{CallSession, InMemoryMediaSource, InMemorySignalingHub};
//! use call_session_cell::services::peer_link::LoopbackPeerLink;
//! use shared_config::AppConfig;
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), call_session_cell::models::CallSessionError> {
//! let config = Arc::new(AppConfig::from_env());
//! let hub = Arc::new(InMemorySignalingHub::new());
//! let (link, _remote) = LoopbackPeerLink::pair();
//!
//! let session = CallSession::start(
//!     Uuid::new_v4(),
//!     CallRole::Initiator,
//!     config,
//!     hub,
//!     Arc::new(InMemoryMediaSource::new()),
//!     Box::new(link),
//! )
//! .await?;
//!
//! session.toggle_mute();
//! session.end();
//! # Ok(())
//! # }
//! ```

pub mod eligibility;
pub mod models;
pub mod negotiation;
pub mod services;

// Re-export commonly used types
pub use eligibility::{is_call_eligible, time_until_open, CallWindow};
pub use models::{
    CallEndReason, CallEvent, CallRole, CallSessionError, CallState, IceCandidate,
    MediaConstraints, MediaTrackKind, SdpType, SessionDescription, SignalingMessage,
};
pub use negotiation::{NegotiationAction, NegotiationEvent, NegotiationStateMachine};
pub use services::{
    CallSession, InMemoryMediaSource, InMemorySignalingHub, LoopbackPeerLink, PeerLink,
    PeerLinkEvent, PeerLinkState, SignalingTransport,
};
