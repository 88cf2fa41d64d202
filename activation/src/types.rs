use common::{Address, AtxId, Epoch, NodeId, Signature};
use post::{Post, PostMetadata, VrfNonceIndex};
use poet::PoetProof;
use serde::{Deserialize, Serialize};

/// Either this is the node's very first ATX, carrying its commitment and
/// initial proof, or it extends a previous ATX by one sequence number.
/// Represented as a sum type rather than four independent optional fields
/// so the "exactly one of the two forms" invariant is enforced by
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeKind {
    Initial {
        commitment_atx: AtxId,
        initial_post: PostRef,
    },
    Subsequent {
        prev_atx_id: AtxId,
        sequence: u64,
    },
}

/// A `Post` stripped to what the challenge needs to carry; the full proof
/// bytes live in `post.bin`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub metadata: PostMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NipostChallenge {
    pub publish_epoch: Epoch,
    pub positioning_atx: AtxId,
    pub kind: ChallengeKind,
}

impl NipostChallenge {
    pub fn is_initial(&self) -> bool {
        matches!(self.kind, ChallengeKind::Initial { .. })
    }

    /// Canonical bytes submitted to the PoET service and proved over by
    /// the post prover: the blake3 digest of the challenge itself.
    pub fn challenge_hash(&self) -> Result<[u8; 32], common::codec::Error> {
        common::codec::digest(self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Nipost {
    pub membership: PoetMembership,
    pub post: Post,
    pub num_units: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoetMembership {
    pub round: String,
    pub proof: Vec<u8>,
}

impl From<PoetProof> for PoetMembership {
    fn from(p: PoetProof) -> Self {
        Self {
            round: p.round,
            proof: p.membership,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivationTxInner {
    pub challenge: NipostChallenge,
    pub coinbase: Address,
    pub nipost: Nipost,
    pub num_units: u32,
    pub vrf_nonce: Option<VrfNonceIndex>,
    pub node_id: Option<NodeId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivationTx {
    pub inner: ActivationTxInner,
    pub signature: Signature,
    pub smesher_id: NodeId,
    pub id: AtxId,
}

impl ActivationTx {
    /// Builds and signs an ATX, deriving its id from the canonical
    /// encoding of `inner` plus the signature — computed once, here.
    pub fn sign_and_finalize(
        inner: ActivationTxInner,
        signer: &common::signing::EdSigner,
    ) -> Result<Self, common::codec::Error> {
        let smesher_id = signer.node_id();
        let inner_bytes = common::codec::encode(&inner)?;
        let signature = signer.sign(&inner_bytes);
        let mut id_input = inner_bytes;
        id_input.extend_from_slice(&signature.0);
        let id = AtxId(*blake3::hash(&id_input).as_bytes());
        Ok(Self {
            inner,
            signature,
            smesher_id,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inner() -> ActivationTxInner {
        ActivationTxInner {
            challenge: NipostChallenge {
                publish_epoch: Epoch::new(3),
                positioning_atx: AtxId::zero(),
                kind: ChallengeKind::Subsequent {
                    prev_atx_id: AtxId::zero(),
                    sequence: 1,
                },
            },
            coinbase: Address::zero(),
            nipost: Nipost {
                membership: PoetMembership {
                    round: "r1".into(),
                    proof: vec![1, 2, 3],
                },
                post: Post {
                    proof: vec![4, 5, 6],
                    metadata: PostMetadata {
                        challenge: vec![0u8; 32],
                        labels_per_unit: 2048,
                    },
                },
                num_units: 4,
            },
            num_units: 4,
            vrf_nonce: None,
            node_id: None,
        }
    }

    #[test]
    fn finalize_is_deterministic_for_same_inner_and_key() {
        let signer = common::signing::EdSigner::generate();
        let a = ActivationTx::sign_and_finalize(sample_inner(), &signer).unwrap();
        let b = ActivationTx::sign_and_finalize(sample_inner(), &signer).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.smesher_id, signer.node_id());
    }

    #[test]
    fn decode_of_encode_round_trips() {
        let signer = common::signing::EdSigner::generate();
        let atx = ActivationTx::sign_and_finalize(sample_inner(), &signer).unwrap();
        let bytes = common::codec::encode(&atx).unwrap();
        let back: ActivationTx = common::codec::decode(&bytes).unwrap();
        assert_eq!(back.id, atx.id);
        assert_eq!(back.signature, atx.signature);
    }
}
