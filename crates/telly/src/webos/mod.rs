//! Client for LG webOS TVs over the SSAP WebSocket API.

mod client;
mod commands;
mod connection;
mod error;
mod inputs;
mod link;
pub mod protocol;

pub use client::ClientEvent;
pub use client::ClientEventReceiver;
pub use client::ClientEventSender;
pub use client::ClientOptions;
pub use client::TvCapabilities;
pub use client::TvClient;
pub use client::TvSnapshot;
pub use client::PLAIN_PORT;
pub use client::SECURE_PORT;
pub use commands::TvCommand;
pub use connection::ConnectionState;
pub use connection::Endpoint;
pub use connection::TransportKind;
pub use error::ClientError;
pub use inputs::ForegroundSource;
pub use inputs::SoundOutput;
pub use inputs::TvInput;
pub use link::Connector;
pub use link::FrameReceiver;
pub use link::FrameSender;
pub use link::Link;
pub use link::LinkParts;
pub use link::WebSocketConnector;
pub use protocol::PayloadFields;
