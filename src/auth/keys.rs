//! Agent-side credential management.
//!
//! Files under `auth_dir` (directory 0700):
//! - `client.key` - RSA-2048 private key, PKCS#8 PEM, 0600
//! - `client.pub` - public key PEM, 0644
//! - `client_token` - bearer token returned at registration, 0600

use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::info;

use crate::RegistrationRequest;

const KEY_BITS: usize = 2048;

pub struct AgentKeys {
    auth_dir: PathBuf,
    private_key_file: PathBuf,
    public_key_file: PathBuf,
    token_file: PathBuf,
}

impl AgentKeys {
    pub fn new(auth_dir: impl AsRef<Path>) -> Self {
        let auth_dir = auth_dir.as_ref().to_path_buf();
        Self {
            private_key_file: auth_dir.join("client.key"),
            public_key_file: auth_dir.join("client.pub"),
            token_file: auth_dir.join("client_token"),
            auth_dir,
        }
    }

    pub fn has_keys(&self) -> bool {
        self.private_key_file.exists() && self.public_key_file.exists()
    }

    /// Generate and persist a keypair if none exists yet.
    pub fn ensure_keys(&self) -> anyhow::Result<()> {
        if self.has_keys() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.auth_dir)?;
        set_mode(&self.auth_dir, 0o700);

        let mut rng = rand::rngs::OsRng;
        let private_key =
            RsaPrivateKey::new(&mut rng, KEY_BITS).context("RSA key generation failed")?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .context("private key serialization failed")?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .context("public key serialization failed")?;

        std::fs::write(&self.private_key_file, private_pem.as_bytes())?;
        set_mode(&self.private_key_file, 0o600);

        std::fs::write(&self.public_key_file, public_pem.as_bytes())?;
        set_mode(&self.public_key_file, 0o644);

        info!(
            "generated RSA keypair ({}, {})",
            self.private_key_file.display(),
            self.public_key_file.display()
        );
        Ok(())
    }

    pub fn public_key_pem(&self) -> anyhow::Result<String> {
        Ok(std::fs::read_to_string(&self.public_key_file)?
            .trim()
            .to_string())
    }

    fn load_private_key(&self) -> anyhow::Result<RsaPrivateKey> {
        let pem = std::fs::read_to_string(&self.private_key_file)?;
        RsaPrivateKey::from_pkcs8_pem(&pem).context("private key unparseable")
    }

    /// Sign arbitrary data, returning a base64 PKCS#1 v1.5 SHA-256 signature.
    pub fn sign(&self, data: &str) -> anyhow::Result<String> {
        let signing_key = SigningKey::<Sha256>::new(self.load_private_key()?);
        let signature = signing_key.sign(data.as_bytes());
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    /// Build the signed enrollment request.
    ///
    /// Challenge format: `"<agent_id>:<timestamp>"`; the server strictly
    /// validates only the trailing `:<timestamp>`.
    pub fn create_registration_request(
        &self,
        agent_id: &str,
        hostname: &str,
        timestamp: i64,
    ) -> anyhow::Result<RegistrationRequest> {
        let challenge = format!("{agent_id}:{timestamp}");
        let signature = self.sign(&challenge)?;

        Ok(RegistrationRequest {
            agent_id: agent_id.to_string(),
            hostname: hostname.to_string(),
            public_key: self.public_key_pem()?,
            challenge,
            signature,
            timestamp,
        })
    }

    pub fn save_token(&self, token: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.auth_dir)?;
        set_mode(&self.auth_dir, 0o700);
        std::fs::write(&self.token_file, token)?;
        set_mode(&self.token_file, 0o600);
        Ok(())
    }

    pub fn load_token(&self) -> Option<String> {
        std::fs::read_to_string(&self.token_file)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }
}

fn set_mode(path: &Path, mode: u32) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
}
