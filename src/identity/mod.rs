//! Identity Module - node key material
//!
//! A node is identified on the network by the `PeerId` of its ed25519
//! keypair. Keys can be generated, derived from a seed, or restored from
//! the base64 protobuf encoding stored in the configuration.

use base64::{engine::general_purpose::STANDARD, Engine};
use libp2p::identity::{ed25519, Keypair};
use libp2p::PeerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Keypair and peer id of the local node
#[derive(Clone)]
pub struct NodeIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl NodeIdentity {
    /// Generate a fresh ed25519 identity
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::generate_ed25519())
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = PeerId::from(keypair.public());
        Self { keypair, peer_id }
    }

    /// Derive an identity from seed material (deterministic)
    pub fn from_seed(seed: &[u8]) -> Result<Self, IdentityError> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(b"qri-libp2p"), seed);

        let mut libp2p_seed = [0u8; 32];
        hk.expand(b"libp2p-ed25519", &mut libp2p_seed)
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;

        let secret_key = ed25519::SecretKey::try_from_bytes(libp2p_seed)
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;

        let keypair = ed25519::Keypair::from(secret_key);
        Ok(Self::from_keypair(Keypair::from(keypair)))
    }

    /// Restore an identity from its base64 protobuf encoding
    pub fn from_base64(encoded: &str) -> Result<Self, IdentityError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| IdentityError::InvalidEncoding(e.to_string()))?;
        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| IdentityError::InvalidEncoding(e.to_string()))?;
        Ok(Self::from_keypair(keypair))
    }

    /// Base64 protobuf encoding of the keypair, suitable for the config file
    pub fn to_base64(&self) -> Result<String, IdentityError> {
        let bytes = self
            .keypair
            .to_protobuf_encoding()
            .map_err(|e| IdentityError::InvalidEncoding(e.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_derivation_is_deterministic() {
        let a = NodeIdentity::from_seed(b"correct horse battery staple").unwrap();
        let b = NodeIdentity::from_seed(b"correct horse battery staple").unwrap();
        let c = NodeIdentity::from_seed(b"another seed").unwrap();

        assert_eq!(a.peer_id(), b.peer_id());
        assert_ne!(a.peer_id(), c.peer_id());
    }

    #[test]
    fn test_base64_roundtrip() {
        let identity = NodeIdentity::generate();
        let encoded = identity.to_base64().unwrap();

        let restored = NodeIdentity::from_base64(&encoded).unwrap();
        assert_eq!(identity.peer_id(), restored.peer_id());
    }

    #[test]
    fn test_invalid_encoding() {
        assert!(matches!(
            NodeIdentity::from_base64("not base64!"),
            Err(IdentityError::InvalidEncoding(_))
        ));
    }
}
