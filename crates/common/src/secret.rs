//! Secret types for protecting credentials from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every conference credential the
//! client handles: session tokens, PINs and SSO tokens. `SecretString`
//! implements `Debug` with redaction, so any struct deriving `Debug` that
//! holds one is safe to pass to `tracing` fields.
//!
//! Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct JoinRequest {
//!     display_name: String,
//!     pin: SecretString,
//! }
//!
//! let req = JoinRequest {
//!     display_name: "Alice".to_string(),
//!     pin: SecretString::from("1234"),
//! };
//!
//! // Safe: the PIN is redacted
//! println!("{:?}", req);
//!
//! // Reading the value requires an explicit call
//! let pin: &str = req.pin.expose_secret();
//! assert_eq!(pin, "1234");
//! ```
//!
//! # Usage
//!
//! Use `SecretString` for:
//! - Conference session tokens (the `token` header value)
//! - Conference PINs
//! - SSO tokens returned by an identity provider
//!
//! # Serde Integration
//!
//! Secrets can be deserialized directly from API responses:
//!
//! ```rust
//! use serde::Deserialize;
//! use common::secret::SecretString;
//!
//! #[derive(Debug, Deserialize)]
//! struct RefreshResponse {
//!     token: SecretString,
//!     expires: String,
//! }
//!
//! let json = r#"{"token": "abc-123", "expires": "120"}"#;
//! let response: RefreshResponse = serde_json::from_str(json).unwrap();
//!
//! // Debug output keeps the token hidden
//! println!("{:?}", response);
//! ```

pub use secrecy::{ExposeSecret, SecretString};
