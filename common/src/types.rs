use serde::{Deserialize, Serialize};
use std::fmt;

/// A layer counter. Layers are grouped into epochs of `layers_per_epoch`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Layer(pub u32);

impl Layer {
    pub fn new(v: u32) -> Self {
        Self(v)
    }

    /// The epoch this layer belongs to, given the chain's epoch length.
    pub fn epoch(self, layers_per_epoch: u32) -> Epoch {
        Epoch(self.0 / layers_per_epoch)
    }

    pub fn add(self, n: u32) -> Self {
        Self(self.0 + n)
    }

    pub fn sub(self, n: u32) -> Option<Self> {
        self.0.checked_sub(n).map(Self)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {}", self.0)
    }
}

/// An epoch counter, `floor(layer / layers_per_epoch)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Epoch(pub u32);

impl Epoch {
    pub fn new(v: u32) -> Self {
        Self(v)
    }

    /// The first layer belonging to this epoch.
    pub fn first_layer(self, layers_per_epoch: u32) -> Layer {
        Layer(self.0 * layers_per_epoch)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {}", self.0)
    }
}

macro_rules! fixed_hash {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                if bytes.len() != $len {
                    return None;
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Some(Self(out))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(v: [u8; $len]) -> Self {
                Self(v)
            }
        }
    };
}

fixed_hash!(NodeId, 32);
fixed_hash!(AtxId, 32);
fixed_hash!(BallotId, 32);
fixed_hash!(ProposalId, 32);
fixed_hash!(BlockId, 32);
fixed_hash!(Address, 24);

/// Ed25519 signature, fixed width.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes_64")] pub [u8; 64]);

impl Signature {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        let mut out = [0u8; 64];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..8]))
    }
}

/// VRF signature, analogous to `Signature` but produced by the node's VRF key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfSignature(pub Vec<u8>);

impl fmt::Debug for VrfSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VrfSignature({} bytes)", self.0.len())
    }
}

/// Per-epoch random beacon value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Beacon(pub [u8; 4]);

impl fmt::Debug for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Beacon({})", hex::encode(self.0))
    }
}

/// Eligibility proof for a single (layer, round) pair, carrying the number
/// of times the identity may act.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Eligibility {
    pub proof: VrfSignature,
    pub count: u16,
}

mod serde_bytes_64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v: Vec<u8> = Vec::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_from_layer() {
        let l = Layer::new(33);
        assert_eq!(l.epoch(10), Epoch::new(3));
        assert_eq!(Epoch::new(3).first_layer(10), Layer::new(30));
    }

    #[test]
    fn fixed_hash_roundtrip() {
        let id = AtxId::from([7u8; 32]);
        let encoded = serde_json::to_vec(&id).unwrap();
        let decoded: AtxId = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(id, decoded);
    }
}
