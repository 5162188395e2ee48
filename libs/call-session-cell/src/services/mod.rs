// libs/call-session-cell/src/services/mod.rs

pub mod media;
pub mod peer_link;
pub mod session;
pub mod signaling;

#[cfg(feature = "webrtc-transport")]
pub mod webrtc;

pub use media::{InMemoryMediaSource, MediaHandle, MediaSource};
pub use peer_link::{LoopbackPeerLink, PeerLink, PeerLinkEvent, PeerLinkState};
pub use session::CallSession;
pub use signaling::{InMemorySignalingHub, SignalingChannel, SignalingTransport};

#[cfg(feature = "webrtc-transport")]
pub use webrtc::WebRtcPeerLink;
