//! Canonical encoding used for persisted builder state and gossip payloads.
//!
//! This wraps `cbor4ii`, the same CBOR-family codec family the rest of the
//! corpus reaches for, rather than a hand-rolled binary format.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    cbor4ii::serde::to_writer(&mut buf, value).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    cbor4ii::serde::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// blake3 digest over the canonical encoding of `value`.
pub fn digest<T: Serialize>(value: &T) -> Result<[u8; 32], Error> {
    let bytes = encode(value)?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Point {
        x: u32,
        y: u32,
    }

    #[test]
    fn roundtrip() {
        let p = Point { x: 1, y: 2 };
        let bytes = encode(&p).unwrap();
        let back: Point = decode(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn digest_is_stable() {
        let p = Point { x: 1, y: 2 };
        assert_eq!(digest(&p).unwrap(), digest(&p).unwrap());
    }
}
