//! Enrollment and authentication.
//!
//! The server side ([`service`]) verifies registration signatures, issues
//! bearer tokens, and compares presented credentials in constant time.
//! The agent side ([`keys`]) owns the on-disk RSA keypair and the stored
//! bearer token.

pub mod keys;
pub mod service;

pub use keys::AgentKeys;
pub use service::{constant_time_eq, AuthService, DEV_ADMIN_TOKEN};
