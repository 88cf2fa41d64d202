//! Write-temp-then-rename persistence for the builder state files.
//!
//! Each of `post.bin`, `nipost_challenge.bin` and `nipost_state.bin` is
//! written through a sibling temp file and atomically renamed into place,
//! so a crash mid-write never leaves a half-written file behind. A missing
//! file is not an error (nothing was persisted yet); a malformed one is.

use std::io::Write;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: crate::codec::Error,
    },
}

/// Writes `bytes` to `path` atomically, via a temp file in the same
/// directory followed by a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    tmp.write_all(bytes).map_err(|e| Error::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    tmp.flush().map_err(|e| Error::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    tmp.persist(path).map_err(|e| Error::Write {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

/// Loads and decodes `path` if present. Returns `Ok(None)` when the file
/// does not exist; any other I/O error or a decoding failure is fatal
/// (the caller should treat it as corruption requiring operator action).
pub fn load_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    };
    let value = crate::codec::decode(&bytes).map_err(|e| Error::Decode {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Blob {
        n: u32,
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nipost_state.bin");
        let loaded: Option<Blob> = load_optional(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn write_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post.bin");
        let blob = Blob { n: 42 };
        write_atomic(&path, &crate::codec::encode(&blob).unwrap()).unwrap();
        let loaded: Option<Blob> = load_optional(&path).unwrap();
        assert_eq!(loaded, Some(blob));
    }

    #[test]
    fn malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nipost_challenge.bin");
        std::fs::write(&path, b"not valid cbor").unwrap();
        let loaded: Result<Option<Blob>, _> = load_optional(&path);
        assert!(loaded.is_err());
    }
}
