//! Infinity Conference Client Library
//!
//! Client-side core for joining a server-hosted conference: discovers the
//! node serving a conference address, authenticates and keeps the
//! conference credential fresh, and consumes the conference event stream.
//!
//! # Modules
//!
//! - `config` - Client configuration
//! - `errors` - Error types
//! - `dns` - SRV/A record decoding and resolution
//! - `node` - Node selection and liveness probing
//! - `http` - HTTP transport
//! - `api` - Conference REST API
//! - `events` - Reconnecting server-sent event stream
//! - `token` - Credential refresh session
//! - `signaling` - Join/leave facade
//!
//! # Example
//!
//! ```rust,no_run
//! use common::types::ConferenceAddress;
//! use infinity_client::{ClientConfig, JoinOptions, SignalingClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SignalingClient::new(ClientConfig::from_env()?)?;
//! let address: ConferenceAddress = "meet.alice@example.com".parse()?;
//!
//! let mut session = client
//!     .join(&address, JoinOptions::new("Alice"), &CancellationToken::new())
//!     .await?;
//!
//! while let Some(Ok(event)) = session.next_event().await {
//!     println!("{event:?}");
//! }
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod dns;
pub mod errors;
pub mod events;
pub mod http;
pub mod node;
pub mod signaling;
pub mod token;

pub use config::ClientConfig;
pub use errors::{ClientError, JoinError, JoinErrorKind};
pub use events::conference::ConferenceEvent;
pub use signaling::{ConferenceSession, JoinOptions, SessionState, SignalingClient};
