//! Signing identity used to prove who we are to the agent.
//!
//! The wallet connection is an external collaborator: anything that can hand
//! out an address and sign a payload implements [`Signer`]. [`LocalSigner`] is
//! an ed25519 key kept on disk, used by the CLI and the tests.

use crate::error::{Error, Result};
use crate::platform;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Proof produced by a [`Signer`]: hex public key plus hex signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureProof {
    pub public_key: String,
    pub signature: String,
}

/// Identity capability supplied by the wallet layer.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address of the local identity.
    fn address(&self) -> String;

    /// Sign a payload.
    async fn sign(&self, payload: &[u8]) -> Result<SignatureProof>;
}

/// Identity data that is persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityData {
    address: String,
    name: String,
    created_at: DateTime<Utc>,
    secret_key_hex: String,
}

/// Local ed25519 identity.
#[derive(Clone)]
pub struct LocalSigner {
    /// Account-style address derived from the public key
    pub address: String,

    /// User-provided name
    pub name: String,

    /// When this identity was created
    pub created_at: DateTime<Utc>,

    signing_key: SigningKey,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Generate a new identity with the given name.
    pub fn generate(name: String) -> Self {
        let secret: [u8; 32] = rand::random();
        Self::from_secret(name, Utc::now(), secret)
    }

    fn from_secret(name: String, created_at: DateTime<Utc>, secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        Self {
            address: address_for_key(&signing_key.verifying_key()),
            name,
            created_at,
            signing_key,
        }
    }

    /// Load the identity from the default location, creating it on first use.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&platform::identity_file_path())
    }

    /// Load the identity stored at `path`, creating it on first use.
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let identity = Self::generate(get_default_name());
            identity.save_to_file(path)?;
            Ok(identity)
        }
    }

    /// Raw secret key bytes, used to derive the network endpoint key.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Hex encoded public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Load identity from a file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let data: IdentityData = serde_json::from_str(&contents)?;

        let secret_key_bytes = hex::decode(&data.secret_key_hex)
            .map_err(|e| Error::Identity(format!("invalid secret key hex: {}", e)))?;

        let secret: [u8; 32] = secret_key_bytes
            .try_into()
            .map_err(|_| Error::Identity("secret key must be 32 bytes".to_string()))?;

        let identity = Self::from_secret(data.name, data.created_at, secret);
        if identity.address != data.address {
            return Err(Error::Identity(
                "address does not match secret key".to_string(),
            ));
        }

        Ok(identity)
    }

    /// Save identity to a specific file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = IdentityData {
            address: self.address.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            secret_key_hex: hex::encode(self.signing_key.to_bytes()),
        };

        let contents = serde_json::to_string_pretty(&data)?;
        std::fs::write(path, contents)?;

        Ok(())
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign(&self, payload: &[u8]) -> Result<SignatureProof> {
        let signature = self.signing_key.sign(payload);
        Ok(SignatureProof {
            public_key: self.public_key_hex(),
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

/// Account-style address for a public key: `0x` + the last 20 key bytes in hex.
pub fn address_for_key(key: &VerifyingKey) -> String {
    let bytes = key.to_bytes();
    format!("0x{}", hex::encode(&bytes[12..]))
}

/// Verify a signature proof over `payload`.
///
/// Returns the address the public key maps to.
pub fn verify_proof(proof: &SignatureProof, payload: &[u8]) -> Result<String> {
    let key_bytes: [u8; 32] = hex::decode(&proof.public_key)
        .map_err(|e| Error::Auth(format!("invalid public key hex: {}", e)))?
        .try_into()
        .map_err(|_| Error::Auth("public key must be 32 bytes".to_string()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::Auth(format!("invalid public key: {}", e)))?;

    let sig_bytes: [u8; 64] = hex::decode(&proof.signature)
        .map_err(|e| Error::Auth(format!("invalid signature hex: {}", e)))?
        .try_into()
        .map_err(|_| Error::Auth("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify_strict(payload, &signature)
        .map_err(|e| Error::Auth(format!("signature verification failed: {}", e)))?;

    Ok(address_for_key(&key))
}

/// Get the default identity name (hostname or fallback).
fn get_default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "Unknown Device".to_string())
}
