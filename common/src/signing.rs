//! Thin wrapper around the node's Ed25519 identity key, used to sign and
//! verify ATXs and hare messages.

use libp2p_identity::ed25519::Keypair;

use crate::types::{NodeId, Signature};

/// A node's signing identity. Wraps `libp2p_identity::ed25519::Keypair`,
/// the same Ed25519 implementation the networking stack uses for peer
/// identities, so the smesher identity and the libp2p peer identity share
/// one key type.
#[derive(Clone)]
pub struct EdSigner {
    keypair: Keypair,
}

impl EdSigner {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate(),
        }
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn node_id(&self) -> NodeId {
        let bytes = self.keypair.public().to_bytes();
        NodeId(*blake3::hash(&bytes).as_bytes())
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        let sig = self.keypair.sign(msg);
        // ed25519 signatures are 64 bytes; libp2p_identity always returns that.
        Signature::from_slice(&sig).expect("ed25519 signature is 64 bytes")
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.keypair.public().to_bytes()
    }
}

/// Verifies `sig` over `msg` against the raw 32-byte Ed25519 public key.
pub fn verify(public_key: &[u8; 32], msg: &[u8], sig: &Signature) -> bool {
    match libp2p_identity::ed25519::PublicKey::try_from_bytes(public_key) {
        Ok(pk) => pk.verify(msg, &sig.0),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let signer = EdSigner::generate();
        let msg = b"hello ATX";
        let sig = signer.sign(msg);
        assert!(verify(&signer.public_key_bytes(), msg, &sig));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let signer = EdSigner::generate();
        let sig = signer.sign(b"original");
        assert!(!verify(&signer.public_key_bytes(), b"tampered", &sig));
    }
}
