//! Hare wire types: messages, the proposal set they carry, and the
//! aggregate proofs exchanged during the status/commit rounds.

use std::collections::BTreeSet;

use common::{Layer, NodeId, ProposalId, Signature, VrfSignature};
use serde::{Deserialize, Serialize};

/// An ordered, duplicate-free collection of proposal ids. Construction
/// from a `Vec` sorts and dedups so two sets with the same membership
/// always compare and hash equal regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set(Vec<ProposalId>);

impl Set {
    pub fn new(mut ids: Vec<ProposalId>) -> Self {
        ids.sort();
        ids.dedup();
        Self(ids)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn ids(&self) -> &[ProposalId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &ProposalId) -> bool {
        self.0.binary_search(id).is_ok()
    }

    pub fn union(&self, other: &Set) -> Set {
        let merged: BTreeSet<ProposalId> = self.0.iter().chain(other.0.iter()).copied().collect();
        Set(merged.into_iter().collect())
    }

    pub fn intersection(&self, other: &Set) -> Set {
        Set(self.0.iter().filter(|id| other.contains(id)).copied().collect())
    }

    pub fn difference(&self, other: &Set) -> Set {
        Set(self.0.iter().filter(|id| !other.contains(id)).copied().collect())
    }

    /// Canonical digest over the sorted membership, used to compare
    /// proposed sets for equality across messages cheaply.
    pub fn digest(&self) -> [u8; 32] {
        common::codec::digest(self).unwrap_or([0u8; 32])
    }
}

/// The status/commit round number, chained across an unbounded sequence
/// of four-round iterations: `preround` is round 0, then iteration `i`
/// occupies rounds `4*i+1 .. 4*i+4` as `{status, proposal, commit, notify}`.
pub type Round = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundKind {
    Preround,
    Status,
    Proposal,
    Commit,
    Notify,
}

pub fn round_kind(round: Round) -> RoundKind {
    if round == 0 {
        return RoundKind::Preround;
    }
    match (round - 1) % 4 {
        0 => RoundKind::Status,
        1 => RoundKind::Proposal,
        2 => RoundKind::Commit,
        _ => RoundKind::Notify,
    }
}

pub fn iteration(round: Round) -> u32 {
    if round == 0 {
        0
    } else {
        (round - 1) / 4
    }
}

/// Aggregate of signed status messages backing a proposal round's
/// candidate set; an aggregate of signed commit messages backing a
/// notify round's certificate. Both are just an unordered bag of
/// validated messages meeting the committee threshold — modeled
/// identically since neither imposes extra structure beyond that.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AggregateProof(pub Vec<Message>);

pub type Svp = AggregateProof;
pub type Cert = AggregateProof;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageInner {
    pub instance_id: Layer,
    pub round: Round,
    pub role_proof: VrfSignature,
    pub values: Set,
    pub svp: Option<Svp>,
    pub cert: Option<Cert>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub inner: MessageInner,
    pub signature: Signature,
    pub pub_key: [u8; 32],
}

impl Message {
    pub fn sign_and_finalize(
        inner: MessageInner,
        signer: &common::signing::EdSigner,
    ) -> Result<Self, common::codec::Error> {
        let bytes = common::codec::encode(&inner)?;
        let signature = signer.sign(&bytes);
        Ok(Self {
            inner,
            signature,
            pub_key: signer.public_key_bytes(),
        })
    }

    pub fn smesher_id(&self) -> NodeId {
        NodeId(*blake3::hash(&self.pub_key).as_bytes())
    }

    /// Verifies the embedded signature covers the embedded inner
    /// payload, converting the raw message into a trusted [`Msg`].
    pub fn validate(self) -> Option<Msg> {
        let bytes = common::codec::encode(&self.inner).ok()?;
        if !common::signing::verify(&self.pub_key, &bytes, &self.signature) {
            return None;
        }
        let smesher = self.smesher_id();
        Some(Msg {
            inner: self.inner,
            signature: self.signature,
            pub_key: self.pub_key,
            smesher,
        })
    }
}

/// A [`Message`] whose signature has already been checked, tagged with
/// the smesher id it was verified against. Everything downstream of the
/// broker's decode step operates on `Msg`, never on raw `Message`.
#[derive(Clone, Debug)]
pub struct Msg {
    pub inner: MessageInner,
    pub signature: Signature,
    pub pub_key: [u8; 32],
    pub smesher: NodeId,
}

impl Msg {
    pub fn layer(&self) -> Layer {
        self.inner.instance_id
    }

    pub fn round(&self) -> Round {
        self.inner.round
    }

    /// Reconstructs the wire `Message` this `Msg` was validated from, for
    /// re-encoding (aggregate proofs, malfeasance evidence).
    pub fn to_message(&self) -> Message {
        Message {
            inner: self.inner.clone(),
            signature: self.signature,
            pub_key: self.pub_key,
        }
    }

    /// Digest over the signed bytes, used by the equivocation tracker to
    /// distinguish two distinct messages from the same `(round, smesher)`.
    pub fn payload_hash(&self) -> [u8; 32] {
        let mut buf = common::codec::encode(&self.inner).unwrap_or_default();
        buf.extend_from_slice(&self.signature.0);
        *blake3::hash(&buf).as_bytes()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MalfeasanceKind {
    MultipleAtxs,
    MultipleBallots,
    HareEquivocation,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MalfeasanceProof {
    pub layer: Layer,
    pub kind: MalfeasanceKind,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(b: u8) -> ProposalId {
        ProposalId([b; 32])
    }

    #[test]
    fn set_dedups_and_sorts() {
        let s = Set::new(vec![pid(3), pid(1), pid(3), pid(2)]);
        assert_eq!(s.ids(), &[pid(1), pid(2), pid(3)]);
    }

    #[test]
    fn set_ops() {
        let a = Set::new(vec![pid(1), pid(2)]);
        let b = Set::new(vec![pid(2), pid(3)]);
        assert_eq!(a.union(&b), Set::new(vec![pid(1), pid(2), pid(3)]));
        assert_eq!(a.intersection(&b), Set::new(vec![pid(2)]));
        assert_eq!(a.difference(&b), Set::new(vec![pid(1)]));
    }

    #[test]
    fn round_kind_mapping() {
        assert_eq!(round_kind(0), RoundKind::Preround);
        assert_eq!(round_kind(1), RoundKind::Status);
        assert_eq!(round_kind(2), RoundKind::Proposal);
        assert_eq!(round_kind(3), RoundKind::Commit);
        assert_eq!(round_kind(4), RoundKind::Notify);
        assert_eq!(round_kind(5), RoundKind::Status);
        assert_eq!(iteration(5), 1);
    }

    #[test]
    fn message_validate_roundtrip() {
        let signer = common::signing::EdSigner::generate();
        let inner = MessageInner {
            instance_id: Layer::new(3),
            round: 0,
            role_proof: VrfSignature(vec![1, 2, 3]),
            values: Set::new(vec![pid(1)]),
            svp: None,
            cert: None,
        };
        let msg = Message::sign_and_finalize(inner, &signer).unwrap();
        let validated = msg.validate().unwrap();
        assert_eq!(validated.smesher, signer.node_id());
    }

    #[test]
    fn message_validate_rejects_tampered_signature() {
        let signer = common::signing::EdSigner::generate();
        let inner = MessageInner {
            instance_id: Layer::new(3),
            round: 0,
            role_proof: VrfSignature(vec![1, 2, 3]),
            values: Set::new(vec![pid(1)]),
            svp: None,
            cert: None,
        };
        let mut msg = Message::sign_and_finalize(inner, &signer).unwrap();
        msg.inner.round = 1;
        assert!(msg.validate().is_none());
    }

    #[test]
    fn distinct_payloads_hash_differently() {
        let signer = common::signing::EdSigner::generate();
        let mk = |round: Round| {
            Message::sign_and_finalize(
                MessageInner {
                    instance_id: Layer::new(1),
                    round,
                    role_proof: VrfSignature(vec![]),
                    values: Set::empty(),
                    svp: None,
                    cert: None,
                },
                &signer,
            )
            .unwrap()
            .validate()
            .unwrap()
        };
        assert_ne!(mk(1).payload_hash(), mk(2).payload_hash());
    }
}
