//! Server-side authentication helpers.
//!
//! Responsibilities (authN only):
//! - verify agent signatures over the registration challenge
//! - validate registration request shape and freshness
//! - issue opaque bearer tokens
//! - compare presented secrets against stored ones in constant time
//!
//! Challenge format: any string ending in `:<timestamp>`; by convention
//! agents send `"<agent_id>:<timestamp>"`.

use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::RegistrationRequest;

/// Fixed development token accepted only when `test_mode` is on.
pub const DEV_ADMIN_TOKEN: &str = "dev_admin_token_12345";

/// Acceptable clock skew between agent and server during registration.
const DEFAULT_SKEW_SECONDS: i64 = 300;

/// Why a registration request was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum RegistrationError {
    MissingField(&'static str),
    StaleTimestamp,
    MalformedChallenge,
    ChallengeTimestampMismatch,
    BadSignature,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::MissingField(name) => write!(f, "missing required field: {name}"),
            RegistrationError::StaleTimestamp => write!(f, "timestamp out of valid range"),
            RegistrationError::MalformedChallenge => {
                write!(f, "invalid challenge format (missing trailing ':<timestamp>')")
            }
            RegistrationError::ChallengeTimestampMismatch => {
                write!(f, "challenge timestamp mismatch")
            }
            RegistrationError::BadSignature => write!(f, "signature verification failed"),
        }
    }
}

pub struct AuthService {
    admin_token: String,
    test_mode: bool,
    skew_seconds: i64,
}

impl AuthService {
    pub fn new(admin_token: String, test_mode: bool) -> Self {
        Self {
            admin_token,
            test_mode,
            skew_seconds: DEFAULT_SKEW_SECONDS,
        }
    }

    /// Load the admin token from `auth_dir/admin_token`.
    ///
    /// Production requires the file to exist. Test mode falls back to a
    /// freshly generated ephemeral token (persisted best-effort so the
    /// operator can find it).
    pub fn load(path: &Path, test_mode: bool) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) if !raw.trim().is_empty() => {
                Ok(Self::new(raw.trim().to_string(), test_mode))
            }
            _ if test_mode => {
                let token = generate_admin_token();
                warn!("no admin token at {}; generated ephemeral token", path.display());
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if std::fs::write(path, &token).is_ok() {
                    restrict_permissions(path);
                    info!("ephemeral admin token written to {}", path.display());
                }
                Ok(Self::new(token, test_mode))
            }
            _ => anyhow::bail!(
                "admin token not readable at {} (required outside test mode)",
                path.display()
            ),
        }
    }

    /// Constant-time admin credential check. Test mode additionally accepts
    /// the fixed dev token.
    pub fn check_admin_token(&self, presented: &str) -> bool {
        let mut ok = constant_time_eq(presented.as_bytes(), self.admin_token.as_bytes());
        if self.test_mode {
            ok |= constant_time_eq(presented.as_bytes(), DEV_ADMIN_TOKEN.as_bytes());
        }
        ok
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Validate shape, freshness, and signature of a registration request.
    pub fn validate_registration(
        &self,
        request: &RegistrationRequest,
        now: i64,
    ) -> Result<(), RegistrationError> {
        if request.agent_id.trim().is_empty() {
            return Err(RegistrationError::MissingField("agent_id"));
        }
        if request.hostname.trim().is_empty() {
            return Err(RegistrationError::MissingField("hostname"));
        }
        if request.public_key.trim().is_empty() {
            return Err(RegistrationError::MissingField("public_key"));
        }
        if request.signature.trim().is_empty() {
            return Err(RegistrationError::MissingField("signature"));
        }

        if (now - request.timestamp).abs() > self.skew_seconds {
            return Err(RegistrationError::StaleTimestamp);
        }

        // The challenge trailer must match the declared timestamp.
        let trailer = request
            .challenge
            .rsplit_once(':')
            .map(|(_, ts)| ts)
            .ok_or(RegistrationError::MalformedChallenge)?;
        let challenge_ts: i64 = trailer
            .parse()
            .map_err(|_| RegistrationError::MalformedChallenge)?;
        if challenge_ts != request.timestamp {
            return Err(RegistrationError::ChallengeTimestampMismatch);
        }

        if !verify_signature(&request.public_key, &request.challenge, &request.signature) {
            return Err(RegistrationError::BadSignature);
        }

        Ok(())
    }
}

/// Verify an RSA PKCS#1 v1.5 SHA-256 signature over `message`.
pub fn verify_signature(public_key_pem: &str, message: &str, signature_b64: &str) -> bool {
    let public_key = match RsaPublicKey::from_public_key_pem(public_key_pem) {
        Ok(key) => key,
        Err(e) => {
            warn!("unparseable public key: {e}");
            return false;
        }
    };

    let signature_bytes = match STANDARD.decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("signature decode failed: {e}");
            return false;
        }
    };

    let signature = match Signature::try_from(signature_bytes.as_slice()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("signature parse failed: {e}");
            return false;
        }
    };

    VerifyingKey::<Sha256>::new(public_key)
        .verify(message.as_bytes(), &signature)
        .is_ok()
}

/// Opaque bearer token for an agent: 32 bytes of OS randomness, URL-safe.
pub fn generate_bearer_token() -> String {
    format!("rw_{}", random_urlsafe(32))
}

/// Opaque admin token (installer use).
pub fn generate_admin_token() -> String {
    format!("rw_admin_{}", random_urlsafe(32))
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Length-checked constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
}
