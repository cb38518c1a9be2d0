#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod credentials;
pub mod eventsub;
pub mod helix;
pub mod logging;
pub mod normalize;
pub mod oauth;
pub mod queue;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeStatus, Queued, TickConsumer};
pub use config::BridgeConfig;
pub use credentials::CredentialStore;
pub use eventsub::InboundMessage;
pub use eventsub::socket::{SessionSocket, SocketError, SocketOutput, SocketState};
pub use helix::{HelixClient, TwitchApi};
pub use logging::{HostLogLayer, LogSink, Severity};
pub use oauth::TokenManager;
pub use normalize::{Decoded, NormalizeError, decode_message, normalize};
pub use queue::{ChannelSnapshot, Drained, EventQueue, InfoUpdate};

pub use tickbridge_domain::{
	BridgeError, Credential, ErrorKind, EventType, NormalizedEvent, SecretString, Session, Subscription, Transport,
};
