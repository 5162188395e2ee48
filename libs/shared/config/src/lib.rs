use std::env;
use tracing::warn;

/// Public STUN endpoints the portal ships with when no override is set.
pub const DEFAULT_STUN_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

pub const DEFAULT_SIGNALING_CHANNEL_PREFIX: &str = "video-call-";
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stun_servers: Vec<String>,
    pub signaling_channel_prefix: String,
    pub negotiation_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let stun_servers = match env::var("CALL_STUN_SERVERS") {
            Ok(raw) => {
                let servers: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if servers.is_empty() {
                    warn!("CALL_STUN_SERVERS set but empty, using default STUN servers");
                    Self::default_stun_servers()
                } else {
                    servers
                }
            }
            Err(_) => Self::default_stun_servers(),
        };

        let signaling_channel_prefix = env::var("CALL_SIGNALING_CHANNEL_PREFIX")
            .unwrap_or_else(|_| DEFAULT_SIGNALING_CHANNEL_PREFIX.to_string());

        let negotiation_timeout_secs = match env::var("CALL_NEGOTIATION_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    "CALL_NEGOTIATION_TIMEOUT_SECS is not a number ({}), using default",
                    raw
                );
                DEFAULT_NEGOTIATION_TIMEOUT_SECS
            }),
            Err(_) => DEFAULT_NEGOTIATION_TIMEOUT_SECS,
        };

        Self {
            stun_servers,
            signaling_channel_prefix,
            negotiation_timeout_secs,
        }
    }

    fn default_stun_servers() -> Vec<String> {
        DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
    }

    pub fn is_configured(&self) -> bool {
        !self.stun_servers.is_empty() && self.negotiation_timeout_secs > 0
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stun_servers: Self::default_stun_servers(),
            signaling_channel_prefix: DEFAULT_SIGNALING_CHANNEL_PREFIX.to_string(),
            negotiation_timeout_secs: DEFAULT_NEGOTIATION_TIMEOUT_SECS,
        }
    }
}
