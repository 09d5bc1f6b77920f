//! # Infinity Test Utilities
//!
//! Shared mocks and fixtures for testing the Infinity conference client
//! without real DNS, nodes or conference servers.
//!
//! ## Modules
//!
//! - `dns` - Scripted DNS lookups and SRV/A payload builders
//! - `probe` - Static node liveness probe
//! - `events` - Scripted event stream opener
//! - `token` - Mock token service and credential builder
//! - `clock` - Clock that follows tokio's paused time
//! - `server` - wiremock helpers for the conference REST API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use infinity_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let clock = paused_clock();
//!     let credential = TestCredential::new().expires_in(120).issued_at(clock()).build();
//!     let service = MockTokenService::new();
//!     // Run your test...
//! }
//! ```

pub mod clock;
pub mod dns;
pub mod events;
pub mod probe;
pub mod server;
pub mod token;

pub use clock::paused_clock;
pub use dns::{a_rdata, srv_rdata, ScriptedDnsLookup};
pub use events::{ScriptedStreamOpener, StreamTail};
pub use probe::StaticNodeProbe;
pub use server::{conference_path, token_response, TestConferenceServer};
pub use token::{MockTokenService, TestCredential};
